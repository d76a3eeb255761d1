//! Recovery-mnemonic service.
//!
//! The mnemonic-derived recovery key is the second, independent unlock path
//! for the DEK. Resetting the PIN through it only re-wraps the DEK — the DEK
//! value never changes, so the operation is O(1) no matter how many secrets
//! the user owns, and every stored ciphertext byte stays untouched.

use crate::encryption::unwrap_dek;
use crate::error::{EngineError, EngineResult};
use sealbox_crypto::{
    derive_kek, derive_recovery_key, encrypt_aead, generate_mnemonic, hash_pin,
    hash_recovery_key, validate_mnemonic, Salt, MIN_PIN_LENGTH,
};
use sealbox_store::KeyStore;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

/// Service for verifying recovery mnemonics and resetting the security PIN.
#[derive(Clone)]
pub struct RecoveryService {
    keys: KeyStore,
}

impl RecoveryService {
    pub fn new(keys: KeyStore) -> Self {
        Self { keys }
    }

    /// Checks whether a mnemonic is the user's current recovery phrase.
    ///
    /// A wrong or malformed mnemonic returns `Ok(false)`, never an error —
    /// this is the cheap pre-check in front of destructive flows and it
    /// never unwraps the DEK.
    pub fn verify_recovery_key(&self, user_id: &str, mnemonic: &str) -> EngineResult<bool> {
        if !validate_mnemonic(mnemonic) {
            warn!(user_id, "recovery mnemonic failed checksum validation");
            return Ok(false);
        }

        let record = self
            .keys
            .get(user_id)?
            .ok_or_else(|| EngineError::NotFound("user key record".into()))?;

        let recovery_key = derive_recovery_key(mnemonic)
            .map_err(|e| EngineError::KeyDerivation(e.to_string()))?;
        let hash = hash_recovery_key(&recovery_key);

        let matches = bool::from(
            hash.as_bytes()
                .ct_eq(record.recovery_key_hash.as_bytes()),
        );
        if !matches {
            warn!(user_id, "recovery key hash mismatch");
        }
        Ok(matches)
    }

    /// Resets the security PIN using the recovery mnemonic.
    ///
    /// Unwraps the DEK through the recovery wrap, re-wraps it under a new
    /// PIN-derived KEK, and issues a brand-new mnemonic; the old phrase is
    /// invalidated by construction since its hash is replaced. No secret row
    /// is touched.
    pub fn reset_pin_with_recovery(
        &self,
        user_id: &str,
        mnemonic: &str,
        new_pin: &str,
    ) -> EngineResult<String> {
        if !validate_mnemonic(mnemonic) {
            return Err(EngineError::InvalidFormat("invalid recovery mnemonic".into()));
        }
        if new_pin.len() < MIN_PIN_LENGTH {
            return Err(EngineError::InvalidFormat(format!(
                "security PIN must be at least {MIN_PIN_LENGTH} characters"
            )));
        }

        let record = self
            .keys
            .get(user_id)?
            .ok_or_else(|| EngineError::NotFound("user key record".into()))?;

        let recovery_key = derive_recovery_key(mnemonic)
            .map_err(|e| EngineError::KeyDerivation(e.to_string()))?;
        let hash = hash_recovery_key(&recovery_key);
        if !bool::from(hash.as_bytes().ct_eq(record.recovery_key_hash.as_bytes())) {
            warn!(user_id, "recovery key rejected");
            return Err(EngineError::InvalidCredentials);
        }

        let dek = unwrap_dek(&record.wrapped_dek_recovery, &recovery_key)?;

        let new_pin_hash =
            hash_pin(new_pin).map_err(|e| EngineError::KeyDerivation(e.to_string()))?;
        let new_salt = Salt::random();
        let new_kek = derive_kek(new_pin, &new_salt)
            .map_err(|e| EngineError::KeyDerivation(e.to_string()))?;
        let new_wrapped_dek = encrypt_aead(dek.as_bytes(), &new_kek)
            .map_err(|e| EngineError::Crypto(e.to_string()))?
            .to_blob();

        let new_mnemonic =
            generate_mnemonic().map_err(|e| EngineError::Crypto(e.to_string()))?;
        let new_recovery_key = derive_recovery_key(&new_mnemonic)
            .map_err(|e| EngineError::KeyDerivation(e.to_string()))?;
        let new_recovery_key_hash = hash_recovery_key(&new_recovery_key);
        let new_wrapped_dek_recovery = encrypt_aead(dek.as_bytes(), &new_recovery_key)
            .map_err(|e| EngineError::Crypto(e.to_string()))?
            .to_blob();

        self.keys.reset_credentials(
            user_id,
            new_salt.as_bytes(),
            &new_wrapped_dek,
            &new_pin_hash,
            &new_recovery_key_hash,
            &new_wrapped_dek_recovery,
        )?;

        info!(user_id, "security PIN reset via recovery mnemonic");
        Ok(new_mnemonic)
    }
}
