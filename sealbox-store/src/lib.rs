//! DuckDB storage layer for Sealbox.
//!
//! Persists per-user key-envelope state, encrypted secrets, and the system
//! configuration table. All stores share a single connection behind an
//! `Arc<Mutex<_>>`; statements are short-lived and each multi-field update is
//! a single statement, so row state is always either old or new, never torn.
//!
//! Secrets are soft-deleted: queries filter on `deleted_at IS NULL` and a
//! delete only stamps the column.

mod config;
mod error;
mod keys;
mod secrets;

pub use config::ConfigStore;
pub use error::{StoreError, StoreResult};
pub use keys::{KeyStore, NewKeyRecord, RotationStatus, SafeKeyRecord, UserKeyRecord};
pub use secrets::{
    SafeSecretRecord, SecretFilter, SecretMetadata, SecretPage, SecretRecord, SecretStore,
    SecretType,
};

use duckdb::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Shared handle to the Sealbox database.
///
/// Cheap to clone; all clones share one DuckDB connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (or creates) the database file and ensures the schema exists.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        // Cap memory/threads — DuckDB defaults to ~80% RAM per connection
        conn.execute_batch("PRAGMA memory_limit='128MB'; PRAGMA threads=2;")?;
        Self::from_connection(conn)
    }

    /// Opens an in-memory database (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn key_store(&self) -> KeyStore {
        KeyStore::new(self.conn.clone())
    }

    pub fn secret_store(&self) -> SecretStore {
        SecretStore::new(self.conn.clone())
    }

    pub fn config_store(&self) -> ConfigStore {
        ConfigStore::new(self.conn.clone())
    }
}

fn initialize_schema(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS user_key_records (
            user_id VARCHAR PRIMARY KEY,
            kek_salt BLOB NOT NULL,
            kek_algorithm VARCHAR NOT NULL DEFAULT 'argon2id',
            wrapped_dek BLOB NOT NULL,
            wrapped_dek_old BLOB,
            dek_version BIGINT NOT NULL DEFAULT 1,
            dek_algorithm VARCHAR NOT NULL DEFAULT 'AES-256-GCM',
            security_pin_hash VARCHAR NOT NULL,
            recovery_key_hash VARCHAR NOT NULL,
            wrapped_dek_recovery BLOB NOT NULL,
            rotation_status VARCHAR NOT NULL DEFAULT 'none',
            rotation_started_at BIGINT,
            last_rotation_at BIGINT,
            created_at BIGINT NOT NULL,
            updated_at BIGINT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS encrypted_secrets (
            secret_id VARCHAR PRIMARY KEY,
            user_id VARCHAR NOT NULL,
            name VARCHAR NOT NULL,
            secret_type VARCHAR NOT NULL,
            description VARCHAR,
            ciphertext BLOB NOT NULL,
            nonce BLOB NOT NULL,
            auth_tag BLOB NOT NULL,
            dek_version BIGINT NOT NULL,
            metadata VARCHAR,
            last_accessed_at BIGINT,
            access_count BIGINT NOT NULL DEFAULT 0,
            created_at BIGINT NOT NULL,
            updated_at BIGINT NOT NULL,
            deleted_at BIGINT
        );
        CREATE INDEX IF NOT EXISTS idx_secrets_user ON encrypted_secrets(user_id);
        CREATE INDEX IF NOT EXISTS idx_secrets_user_version ON encrypted_secrets(user_id, dek_version);

        CREATE TABLE IF NOT EXISTS system_config (
            config_key VARCHAR PRIMARY KEY,
            config_value VARCHAR NOT NULL,
            updated_at BIGINT NOT NULL
        );
        "#,
    )?;
    Ok(())
}

/// Current time as Unix milliseconds — the timestamp format for every column.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
