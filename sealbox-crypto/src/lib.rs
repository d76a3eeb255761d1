//! Crypto primitives for Sealbox.
//!
//! Provides the envelope-encryption building blocks:
//! - AES-256-GCM for authenticated encryption of secrets and wrapped DEKs
//! - Argon2id for KEK derivation from the user's security PIN
//! - bcrypt for the fast-fail PIN check in front of the KDF
//! - BIP39 mnemonics + PBKDF2-HMAC-SHA256 for the recovery unlock path
//! - Zeroize-on-drop key containers
//!
//! # Key hierarchy
//!
//! Each user has one random DEK that encrypts their secret payloads. The DEK
//! is never stored in the clear; it exists at rest only as two independent
//! wraps:
//!
//! 1. **KEK wrap**: the DEK sealed under a key derived from the security PIN.
//! 2. **Recovery wrap**: the DEK sealed under a key derived from a one-time
//!    24-word mnemonic.
//!
//! Rotating the DEK re-encrypts payloads; resetting the PIN only re-wraps,
//! leaving every payload untouched.

mod cipher;
mod error;
mod key;
mod mnemonic;
mod pin;

pub use cipher::{
    decrypt_aead, encrypt_aead, EncryptedPayload, BLOB_OVERHEAD, NONCE_SIZE, TAG_SIZE,
};
pub use error::{CryptoError, CryptoResult};
pub use key::{derive_kek, Salt, SymmetricKey, KEY_SIZE, SALT_SIZE};
pub use mnemonic::{
    derive_recovery_key, generate_mnemonic, hash_recovery_key, validate_mnemonic,
};
pub use pin::{hash_pin, verify_pin, BCRYPT_COST, MIN_PIN_LENGTH};
