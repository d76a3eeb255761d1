//! Secret encryption service.
//!
//! Owns the per-user key hierarchy: creating the envelope record, sealing
//! payloads under the DEK, and opening them on demand. Every unlock follows
//! the same path — bcrypt fast-fail on the PIN, Argon2id KEK derivation,
//! AEAD unwrap of the DEK — and every derived key is zeroed on drop.

use crate::error::{EngineError, EngineResult};
use sealbox_crypto::{
    decrypt_aead, derive_kek, derive_recovery_key, encrypt_aead, generate_mnemonic,
    hash_pin, hash_recovery_key, verify_pin, CryptoError, EncryptedPayload, Salt, SymmetricKey,
    MIN_PIN_LENGTH, NONCE_SIZE, TAG_SIZE,
};
use sealbox_store::{
    KeyStore, NewKeyRecord, SafeKeyRecord, SafeSecretRecord, SecretFilter, SecretMetadata,
    SecretPage, SecretRecord, SecretStore, SecretType, UserKeyRecord,
};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

/// A decrypted secret: the safe metadata plus the plaintext payload.
#[derive(Clone, Debug, Serialize)]
pub struct DecryptedSecret {
    #[serde(flatten)]
    pub secret: SafeSecretRecord,
    pub plaintext: String,
}

/// Input for storing a new secret.
#[derive(Clone, Debug, Default)]
pub struct NewSecretInput {
    pub name: String,
    pub secret_type: SecretType,
    pub description: Option<String>,
    pub metadata: Option<SecretMetadata>,
}

/// Service for creating key records and sealing/opening secrets.
#[derive(Clone)]
pub struct EncryptionService {
    keys: KeyStore,
    secrets: SecretStore,
}

impl EncryptionService {
    pub fn new(keys: KeyStore, secrets: SecretStore) -> Self {
        Self { keys, secrets }
    }

    /// Creates a user's key hierarchy. One-time: fails with `AlreadyExists`
    /// if the user already has a record.
    ///
    /// Returns the safe record plus the recovery mnemonic. **The mnemonic is
    /// returned exactly once and never stored in recoverable form** — only
    /// its derived key's hash and the DEK wrapped under that key persist.
    pub fn create_key(&self, user_id: &str, pin: &str) -> EngineResult<(SafeKeyRecord, String)> {
        if pin.len() < MIN_PIN_LENGTH {
            return Err(EngineError::InvalidFormat(format!(
                "security PIN must be at least {MIN_PIN_LENGTH} characters"
            )));
        }
        if self.keys.get(user_id)?.is_some() {
            warn!(user_id, "key record already exists");
            return Err(EngineError::AlreadyExists("user key record".into()));
        }

        let dek = SymmetricKey::generate();

        let pin_hash =
            hash_pin(pin).map_err(|e| EngineError::KeyDerivation(e.to_string()))?;

        let kek_salt = Salt::random();
        let kek = derive_kek(pin, &kek_salt)
            .map_err(|e| EngineError::KeyDerivation(e.to_string()))?;
        let wrapped_dek = encrypt_aead(dek.as_bytes(), &kek)
            .map_err(|e| EngineError::Crypto(e.to_string()))?
            .to_blob();

        let mnemonic =
            generate_mnemonic().map_err(|e| EngineError::Crypto(e.to_string()))?;
        let recovery_key = derive_recovery_key(&mnemonic)
            .map_err(|e| EngineError::KeyDerivation(e.to_string()))?;
        let recovery_key_hash = hash_recovery_key(&recovery_key);
        let wrapped_dek_recovery = encrypt_aead(dek.as_bytes(), &recovery_key)
            .map_err(|e| EngineError::Crypto(e.to_string()))?
            .to_blob();

        let record = self.keys.insert(NewKeyRecord {
            user_id: user_id.to_string(),
            kek_salt: kek_salt.as_bytes().to_vec(),
            wrapped_dek,
            security_pin_hash: pin_hash,
            recovery_key_hash,
            wrapped_dek_recovery,
        })?;

        info!(user_id, "user key record created");
        Ok((record.to_safe(), mnemonic))
    }

    /// Encrypts `plaintext` under the user's current DEK and persists it.
    pub fn encrypt_and_store(
        &self,
        user_id: &str,
        pin: &str,
        input: NewSecretInput,
        plaintext: &str,
    ) -> EngineResult<SafeSecretRecord> {
        let record = self.load_record(user_id)?;
        let dek = self.unlock_dek(&record, pin)?;

        let payload = encrypt_aead(plaintext.as_bytes(), &dek)
            .map_err(|e| EngineError::Crypto(e.to_string()))?;

        let now = now_millis();
        let secret = SecretRecord {
            secret_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            name: input.name,
            secret_type: input.secret_type,
            description: input.description,
            ciphertext: payload.ciphertext,
            nonce: payload.nonce.to_vec(),
            auth_tag: payload.tag.to_vec(),
            dek_version: record.dek_version,
            metadata: input.metadata,
            last_accessed_at: None,
            access_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.secrets.insert(&secret)?;

        info!(
            user_id,
            secret_id = secret.secret_id,
            secret_type = secret.secret_type.as_str(),
            "secret stored"
        );
        Ok(secret.to_safe())
    }

    /// Decrypts a stored secret.
    ///
    /// Access telemetry is bumped asynchronously after a successful open;
    /// a telemetry failure is logged and never affects the result.
    pub async fn decrypt(
        &self,
        user_id: &str,
        secret_id: &str,
        pin: &str,
    ) -> EngineResult<DecryptedSecret> {
        let secret = self
            .secrets
            .get(user_id, secret_id)?
            .ok_or_else(|| EngineError::NotFound("secret".into()))?;

        if secret.is_expired(now_millis()) {
            warn!(user_id, secret_id, "secret has expired");
            return Err(EngineError::NotFound("secret has expired".into()));
        }

        let record = self.load_record(user_id)?;

        // A mismatch means the row is mid-migration or stuck; opening it with
        // the wrong DEK generation would fail anyway, so refuse up front.
        if secret.dek_version != record.dek_version {
            warn!(
                user_id,
                secret_version = secret.dek_version,
                current_version = record.dek_version,
                "secret DEK version mismatch"
            );
            return Err(EngineError::Crypto("key version mismatch".into()));
        }

        let dek = self.unlock_dek(&record, pin)?;

        let nonce: [u8; NONCE_SIZE] = secret
            .nonce
            .as_slice()
            .try_into()
            .map_err(|_| EngineError::Crypto("invalid stored nonce length".into()))?;
        let tag: [u8; TAG_SIZE] = secret
            .auth_tag
            .as_slice()
            .try_into()
            .map_err(|_| EngineError::Crypto("invalid stored tag length".into()))?;

        let plaintext = Zeroizing::new(
            decrypt_aead(&secret.ciphertext, &dek, &nonce, &tag)
                .map_err(|_| EngineError::InvalidCredentials)?,
        );
        let plaintext = String::from_utf8(plaintext.to_vec())
            .map_err(|_| EngineError::Crypto("secret payload is not valid UTF-8".into()))?;

        // Best-effort telemetry, off the request path
        let secrets = self.secrets.clone();
        let sid = secret.secret_id.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = secrets.record_access(&sid) {
                warn!(secret_id = sid, error = %e, "failed to record secret access");
            }
        });

        Ok(DecryptedSecret {
            secret: secret.to_safe(),
            plaintext,
        })
    }

    /// Lists a user's secrets (metadata only).
    pub fn list_secrets(&self, user_id: &str, filter: &SecretFilter) -> EngineResult<SecretPage> {
        Ok(self.secrets.list(user_id, filter)?)
    }

    /// Soft-deletes a secret.
    pub fn delete_secret(&self, user_id: &str, secret_id: &str) -> EngineResult<()> {
        if !self.secrets.soft_delete(user_id, secret_id)? {
            warn!(user_id, secret_id, "delete target not found");
            return Err(EngineError::NotFound("secret".into()));
        }
        info!(user_id, secret_id, "secret deleted");
        Ok(())
    }

    pub(crate) fn load_record(&self, user_id: &str) -> EngineResult<UserKeyRecord> {
        self.keys
            .get(user_id)?
            .ok_or_else(|| EngineError::NotFound("user key record".into()))
    }

    /// Full PIN unlock path: bcrypt gate, Argon2id KEK, DEK unwrap.
    pub(crate) fn unlock_dek(
        &self,
        record: &UserKeyRecord,
        pin: &str,
    ) -> EngineResult<SymmetricKey> {
        if !verify_pin(pin, &record.security_pin_hash) {
            warn!(user_id = record.user_id, "security PIN verification failed");
            return Err(EngineError::InvalidCredentials);
        }

        let salt = Salt::from_slice(&record.kek_salt)
            .map_err(|e| EngineError::Crypto(e.to_string()))?;
        let kek =
            derive_kek(pin, &salt).map_err(|e| EngineError::KeyDerivation(e.to_string()))?;

        unwrap_dek(&record.wrapped_dek, &kek)
    }
}

/// Opens a `ciphertext || nonce || tag` wrapped-DEK blob with `key`.
///
/// A tag failure is a credential failure (wrong key), not a structural one;
/// only a blob too short to parse reports as `Crypto`.
pub(crate) fn unwrap_dek(blob: &[u8], key: &SymmetricKey) -> EngineResult<SymmetricKey> {
    let payload =
        EncryptedPayload::from_blob(blob).map_err(|e| EngineError::Crypto(e.to_string()))?;
    let dek_bytes = Zeroizing::new(payload.open(key).map_err(|e| match e {
        CryptoError::DecryptionFailed => EngineError::InvalidCredentials,
        other => EngineError::Crypto(other.to_string()),
    })?);
    SymmetricKey::from_slice(&dek_bytes).map_err(|e| EngineError::Crypto(e.to_string()))
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
