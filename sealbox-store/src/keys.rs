//! Per-user key-envelope records.
//!
//! One row per user holds everything needed to unwrap the DEK through either
//! unlock path: the Argon2id salt and PIN hash for the KEK path, the recovery
//! hash and recovery-wrapped DEK for the mnemonic path, plus rotation state.
//! The plaintext DEK itself is never stored.

use crate::error::{StoreError, StoreResult};
use crate::now_millis;
use duckdb::{params, Connection, Row};
use serde::Serialize;
use std::sync::{Arc, Mutex};

/// Rotation state machine: `none → in_progress → {completed, failed}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationStatus {
    None,
    InProgress,
    Completed,
    Failed,
}

impl RotationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RotationStatus::None => "none",
            RotationStatus::InProgress => "in_progress",
            RotationStatus::Completed => "completed",
            RotationStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> StoreResult<Self> {
        match s {
            "none" => Ok(RotationStatus::None),
            "in_progress" => Ok(RotationStatus::InProgress),
            "completed" => Ok(RotationStatus::Completed),
            "failed" => Ok(RotationStatus::Failed),
            other => Err(StoreError::InvalidValue(format!(
                "unknown rotation status: {other}"
            ))),
        }
    }
}

/// Persisted envelope state for one user.
#[derive(Clone, Debug)]
pub struct UserKeyRecord {
    pub user_id: String,
    pub kek_salt: Vec<u8>,
    pub kek_algorithm: String,
    /// DEK sealed under the PIN-derived KEK: `ciphertext || nonce || tag`.
    pub wrapped_dek: Vec<u8>,
    /// Previous wrap, present only while a rotation migration is in flight.
    pub wrapped_dek_old: Option<Vec<u8>>,
    pub dek_version: i64,
    pub dek_algorithm: String,
    pub security_pin_hash: String,
    pub recovery_key_hash: String,
    /// DEK sealed under the mnemonic-derived recovery key. Refreshed on PIN
    /// reset (the only flow that has the mnemonic in hand), not on rotation.
    pub wrapped_dek_recovery: Vec<u8>,
    pub rotation_status: RotationStatus,
    pub rotation_started_at: Option<i64>,
    pub last_rotation_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl UserKeyRecord {
    /// Non-secret projection for callers outside the engine.
    pub fn to_safe(&self) -> SafeKeyRecord {
        SafeKeyRecord {
            user_id: self.user_id.clone(),
            kek_algorithm: self.kek_algorithm.clone(),
            dek_version: self.dek_version,
            dek_algorithm: self.dek_algorithm.clone(),
            rotation_status: self.rotation_status,
            last_rotation_at: self.last_rotation_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// The fields of a key record that are safe to hand to callers: no salts,
/// no hashes, no wrapped key material.
#[derive(Clone, Debug, Serialize)]
pub struct SafeKeyRecord {
    pub user_id: String,
    pub kek_algorithm: String,
    pub dek_version: i64,
    pub dek_algorithm: String,
    pub rotation_status: RotationStatus,
    pub last_rotation_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Input for creating a user's key record. Version starts at 1 and the
/// algorithm tags take their defaults.
pub struct NewKeyRecord {
    pub user_id: String,
    pub kek_salt: Vec<u8>,
    pub wrapped_dek: Vec<u8>,
    pub security_pin_hash: String,
    pub recovery_key_hash: String,
    pub wrapped_dek_recovery: Vec<u8>,
}

/// Store for [`UserKeyRecord`] rows.
#[derive(Clone)]
pub struct KeyStore {
    conn: Arc<Mutex<Connection>>,
}

const KEY_RECORD_COLUMNS: &str = "user_id, kek_salt, kek_algorithm, wrapped_dek, wrapped_dek_old, \
     dek_version, dek_algorithm, security_pin_hash, recovery_key_hash, wrapped_dek_recovery, \
     rotation_status, rotation_started_at, last_rotation_at, created_at, updated_at";

/// Row fields in `KEY_RECORD_COLUMNS` order, with the status still raw.
fn record_from_row(row: &Row<'_>) -> duckdb::Result<(UserKeyRecord, String)> {
    let status_raw: String = row.get(10)?;
    let record = UserKeyRecord {
        user_id: row.get(0)?,
        kek_salt: row.get(1)?,
        kek_algorithm: row.get(2)?,
        wrapped_dek: row.get(3)?,
        wrapped_dek_old: row.get(4)?,
        dek_version: row.get(5)?,
        dek_algorithm: row.get(6)?,
        security_pin_hash: row.get(7)?,
        recovery_key_hash: row.get(8)?,
        wrapped_dek_recovery: row.get(9)?,
        rotation_status: RotationStatus::None,
        rotation_started_at: row.get(11)?,
        last_rotation_at: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    };
    Ok((record, status_raw))
}

impl KeyStore {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Inserts a fresh key record (dek_version 1, no rotation history).
    pub fn insert(&self, new: NewKeyRecord) -> StoreResult<UserKeyRecord> {
        let now = now_millis();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO user_key_records (
                user_id, kek_salt, wrapped_dek, security_pin_hash,
                recovery_key_hash, wrapped_dek_recovery, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                new.user_id,
                new.kek_salt,
                new.wrapped_dek,
                new.security_pin_hash,
                new.recovery_key_hash,
                new.wrapped_dek_recovery,
                now,
                now
            ],
        )?;
        drop(conn);

        self.get(&new.user_id)?.ok_or_else(|| {
            StoreError::InvalidValue("key record missing immediately after insert".into())
        })
    }

    /// Loads a user's key record, or `None` if the user has never created one.
    pub fn get(&self, user_id: &str) -> StoreResult<Option<UserKeyRecord>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            &format!("SELECT {KEY_RECORD_COLUMNS} FROM user_key_records WHERE user_id = ?"),
            params![user_id],
            record_from_row,
        );

        match result {
            Ok((mut record, status_raw)) => {
                record.rotation_status = RotationStatus::parse(&status_raw)?;
                Ok(Some(record))
            }
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically starts a rotation: the live wrap moves to `wrapped_dek_old`,
    /// the new wrap and version go live, and the status/timestamps flip to
    /// `in_progress` — all in one statement.
    pub fn begin_rotation(
        &self,
        user_id: &str,
        new_wrapped_dek: &[u8],
        new_version: i64,
    ) -> StoreResult<()> {
        let now = now_millis();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE user_key_records SET
                wrapped_dek_old = wrapped_dek,
                wrapped_dek = ?,
                dek_version = ?,
                rotation_status = 'in_progress',
                rotation_started_at = ?,
                last_rotation_at = ?,
                updated_at = ?
             WHERE user_id = ?",
            params![new_wrapped_dek, new_version, now, now, now, user_id],
        )?;
        Ok(())
    }

    /// Marks a rotation completed and erases the old wrap.
    pub fn complete_rotation(&self, user_id: &str) -> StoreResult<()> {
        let now = now_millis();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE user_key_records SET
                wrapped_dek_old = NULL,
                rotation_status = 'completed',
                updated_at = ?
             WHERE user_id = ?",
            params![now, user_id],
        )?;
        Ok(())
    }

    /// Marks a rotation failed. The old wrap is deliberately retained so a
    /// retry or operator can still decrypt unmigrated rows.
    pub fn fail_rotation(&self, user_id: &str) -> StoreResult<()> {
        let now = now_millis();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE user_key_records SET
                rotation_status = 'failed',
                updated_at = ?
             WHERE user_id = ?",
            params![now, user_id],
        )?;
        Ok(())
    }

    /// Atomically replaces every credential-derived field after a recovery
    /// PIN reset. The DEK value is unchanged — only its wrappings move — so
    /// no secret row is touched.
    pub fn reset_credentials(
        &self,
        user_id: &str,
        kek_salt: &[u8],
        wrapped_dek: &[u8],
        security_pin_hash: &str,
        recovery_key_hash: &str,
        wrapped_dek_recovery: &[u8],
    ) -> StoreResult<()> {
        let now = now_millis();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE user_key_records SET
                kek_salt = ?,
                wrapped_dek = ?,
                security_pin_hash = ?,
                recovery_key_hash = ?,
                wrapped_dek_recovery = ?,
                updated_at = ?
             WHERE user_id = ?",
            params![
                kek_salt,
                wrapped_dek,
                security_pin_hash,
                recovery_key_hash,
                wrapped_dek_recovery,
                now,
                user_id
            ],
        )?;
        Ok(())
    }
}
