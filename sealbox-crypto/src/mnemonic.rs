//! BIP39 recovery mnemonics.
//!
//! A 24-word mnemonic (256 bits of entropy) is the second, independent
//! unlock path for a user's DEK. The recovery key is derived from the phrase
//! with PBKDF2-HMAC-SHA256 under a fixed domain salt; only its SHA-256 hash
//! is persisted, so a recovery attempt can be validated without unwrapping
//! anything.

use crate::error::{CryptoError, CryptoResult};
use crate::key::{SymmetricKey, KEY_SIZE};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

/// 256 bits of entropy — a 24-word phrase.
const MNEMONIC_ENTROPY_BYTES: usize = 32;

/// Domain-separated fixed salt. Safe because the mnemonic itself carries
/// 256 bits of entropy.
const RECOVERY_KDF_SALT: &[u8] = b"sealbox-recovery";

/// PBKDF2 iteration count. Fixed: stored recovery hashes depend on it.
const RECOVERY_KDF_ITERATIONS: u32 = 100_000;

/// Generates a new 24-word BIP39 mnemonic.
pub fn generate_mnemonic() -> CryptoResult<String> {
    let mut entropy = [0u8; MNEMONIC_ENTROPY_BYTES];
    OsRng.fill_bytes(&mut entropy);

    let mnemonic = bip39::Mnemonic::from_entropy(&entropy)
        .map_err(|e| CryptoError::KeyDerivation(format!("mnemonic generation failed: {e}")))?;
    entropy.zeroize();

    Ok(mnemonic.to_string())
}

/// Returns true if `phrase` is a well-formed BIP39 mnemonic (word list and
/// checksum both valid).
pub fn validate_mnemonic(phrase: &str) -> bool {
    phrase.parse::<bip39::Mnemonic>().is_ok()
}

/// Derives the 32-byte recovery key from a mnemonic phrase.
///
/// The phrase must pass BIP39 checksum validation first; derivation is
/// deterministic, so the same phrase always unlocks the same wrapped DEK.
pub fn derive_recovery_key(phrase: &str) -> CryptoResult<SymmetricKey> {
    if !validate_mnemonic(phrase) {
        return Err(CryptoError::InvalidMnemonic);
    }

    let mut out = [0u8; KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha256>(
        phrase.as_bytes(),
        RECOVERY_KDF_SALT,
        RECOVERY_KDF_ITERATIONS,
        &mut out,
    );

    let key = SymmetricKey::from_bytes(out);
    out.zeroize();
    Ok(key)
}

/// SHA-256 of the recovery key as a 64-char hex string — the persisted
/// verifier for recovery attempts.
pub fn hash_recovery_key(key: &SymmetricKey) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}
