//! Envelope-encryption and key-rotation engine for Sealbox.
//!
//! Each user's secrets are sealed under a per-user DEK; the DEK itself is
//! never stored in the clear and rests only as two independent wraps — one
//! under a KEK derived from the user's security PIN, one under a key derived
//! from a 24-word recovery mnemonic. Three services operate on that envelope:
//!
//! - [`EncryptionService`] creates the key hierarchy and seals/opens secrets.
//! - [`RecoveryService`] verifies the mnemonic and resets the PIN by
//!   re-wrapping the DEK, without touching any stored ciphertext.
//! - [`KeyRotationService`] swaps in a fresh DEK and drives a background,
//!   batched, cancellable migration of every secret to the new key.
//!
//! [`Engine`] bundles the three services over one database together with the
//! hot-reloadable configuration they share.

mod config;
mod encryption;
mod error;
mod recovery;
mod rotation;

pub use config::{
    ConfigManager, ConfigWatcher, CONFIG_KEY_ROTATION_BATCH_SIZE,
    CONFIG_KEY_ROTATION_BATCH_SLEEP_MS,
};
pub use encryption::{DecryptedSecret, EncryptionService, NewSecretInput};
pub use error::{EngineError, EngineResult};
pub use recovery::RecoveryService;
pub use rotation::{KeyRotationService, RotationSnapshot};

// Storage types that cross the service boundary
pub use sealbox_store::{
    Database, RotationStatus, SafeKeyRecord, SafeSecretRecord, SecretFilter, SecretMetadata,
    SecretPage, SecretType,
};

use std::path::Path;
use std::sync::Arc;

/// The assembled vault engine: one database, the three services, and the
/// configuration store they share.
pub struct Engine {
    db: Database,
    config: Arc<ConfigManager>,
    encryption: EncryptionService,
    recovery: RecoveryService,
    rotation: KeyRotationService,
}

impl Engine {
    /// Opens (or creates) the vault database at `path` and wires up the
    /// services.
    pub fn open(path: &Path) -> EngineResult<Self> {
        Self::from_database(Database::open(path)?)
    }

    /// Opens an engine over an in-memory database (for testing).
    pub fn open_in_memory() -> EngineResult<Self> {
        Self::from_database(Database::open_in_memory()?)
    }

    fn from_database(db: Database) -> EngineResult<Self> {
        let config_store = db.config_store();
        config_store.seed_default(
            CONFIG_KEY_ROTATION_BATCH_SIZE,
            &rotation::DEFAULT_BATCH_SIZE.to_string(),
        )?;
        config_store.seed_default(
            CONFIG_KEY_ROTATION_BATCH_SLEEP_MS,
            &rotation::DEFAULT_BATCH_SLEEP_MS.to_string(),
        )?;
        let config = Arc::new(ConfigManager::new(config_store)?);

        let encryption = EncryptionService::new(db.key_store(), db.secret_store());
        let recovery = RecoveryService::new(db.key_store());
        let rotation = KeyRotationService::new(
            db.key_store(),
            db.secret_store(),
            encryption.clone(),
            &config,
        );

        Ok(Self {
            db,
            config,
            encryption,
            recovery,
            rotation,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &ConfigManager {
        &self.config
    }

    pub fn encryption(&self) -> &EncryptionService {
        &self.encryption
    }

    pub fn recovery(&self) -> &RecoveryService {
        &self.recovery
    }

    pub fn rotation(&self) -> &KeyRotationService {
        &self.rotation
    }

    /// Cancels and joins outstanding migration tasks. Call before exit;
    /// interrupted migrations keep the old wrap and stay resumable.
    pub async fn shutdown(&self) {
        self.rotation.shutdown().await;
    }
}
