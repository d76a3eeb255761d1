//! Security-PIN hashing.
//!
//! bcrypt at cost 12. The stored hash is a cheap gate in front of the
//! expensive Argon2id derivation: a wrong PIN fails here without burning
//! 64 MiB of KDF work.

use crate::error::{CryptoError, CryptoResult};

/// bcrypt work factor.
pub const BCRYPT_COST: u32 = 12;

/// Minimum accepted PIN length.
pub const MIN_PIN_LENGTH: usize = 8;

/// Hashes a security PIN for storage.
pub fn hash_pin(pin: &str) -> CryptoResult<String> {
    bcrypt::hash(pin, BCRYPT_COST).map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}

/// Verifies a PIN against a stored bcrypt hash.
///
/// A malformed hash verifies as `false` rather than erroring; the caller
/// treats every mismatch the same way.
pub fn verify_pin(pin: &str, hash: &str) -> bool {
    bcrypt::verify(pin, hash).unwrap_or(false)
}
