//! Encrypted secret rows.
//!
//! Each row carries the AES-GCM output columns (ciphertext, nonce, tag) plus
//! the `dek_version` it was sealed under. The version column is the join key
//! to the user's key record: a secret only opens with a DEK of the matching
//! version, and the rotation migration moves rows to the new version one
//! committed update at a time.

use crate::error::StoreResult;
use crate::now_millis;
use duckdb::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Kinds of secrets users store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretType {
    ApiKey,
    DbCredential,
    Certificate,
    SshKey,
    Token,
    Password,
    #[default]
    Other,
}

impl SecretType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecretType::ApiKey => "api_key",
            SecretType::DbCredential => "db_credential",
            SecretType::Certificate => "certificate",
            SecretType::SshKey => "ssh_key",
            SecretType::Token => "token",
            SecretType::Password => "password",
            SecretType::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "api_key" => SecretType::ApiKey,
            "db_credential" => SecretType::DbCredential,
            "certificate" => SecretType::Certificate,
            "ssh_key" => SecretType::SshKey,
            "token" => SecretType::Token,
            "password" => SecretType::Password,
            _ => SecretType::Other,
        }
    }
}

/// Optional caller-supplied metadata, stored as a JSON column.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SecretMetadata {
    /// Unix-millisecond expiry; expired secrets refuse to decrypt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// One stored secret, including its cipher columns.
#[derive(Clone, Debug)]
pub struct SecretRecord {
    pub secret_id: String,
    pub user_id: String,
    pub name: String,
    pub secret_type: SecretType,
    pub description: Option<String>,
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    pub auth_tag: Vec<u8>,
    pub dek_version: i64,
    pub metadata: Option<SecretMetadata>,
    pub last_accessed_at: Option<i64>,
    pub access_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SecretRecord {
    pub fn is_expired(&self, now: i64) -> bool {
        self.metadata
            .as_ref()
            .and_then(|m| m.expires_at)
            .is_some_and(|expires_at| now > expires_at)
    }

    /// Metadata-only projection: no cryptographic material leaves the
    /// service boundary through list/status paths.
    pub fn to_safe(&self) -> SafeSecretRecord {
        SafeSecretRecord {
            secret_id: self.secret_id.clone(),
            user_id: self.user_id.clone(),
            name: self.name.clone(),
            secret_type: self.secret_type,
            description: self.description.clone(),
            dek_version: self.dek_version,
            metadata: self.metadata.clone(),
            last_accessed_at: self.last_accessed_at,
            access_count: self.access_count,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Safe projection of a [`SecretRecord`].
#[derive(Clone, Debug, Serialize)]
pub struct SafeSecretRecord {
    pub secret_id: String,
    pub user_id: String,
    pub name: String,
    pub secret_type: SecretType,
    pub description: Option<String>,
    pub dek_version: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<SecretMetadata>,
    pub last_accessed_at: Option<i64>,
    pub access_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// List query parameters. Without paging the list is a capped full export.
#[derive(Clone, Debug, Default)]
pub struct SecretFilter {
    pub secret_type: Option<SecretType>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

/// One page of list results.
#[derive(Clone, Debug, Serialize)]
pub struct SecretPage {
    pub secrets: Vec<SafeSecretRecord>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
}

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_LIST_ROWS: u32 = 10_000;

const SECRET_COLUMNS: &str = "secret_id, user_id, name, secret_type, description, ciphertext, \
     nonce, auth_tag, dek_version, metadata, last_accessed_at, access_count, created_at, updated_at";

fn secret_from_row(row: &Row<'_>) -> duckdb::Result<SecretRecord> {
    let metadata_json: Option<String> = row.get(9)?;
    Ok(SecretRecord {
        secret_id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        secret_type: SecretType::parse(&row.get::<_, String>(3)?),
        description: row.get(4)?,
        ciphertext: row.get(5)?,
        nonce: row.get(6)?,
        auth_tag: row.get(7)?,
        dek_version: row.get(8)?,
        // Unparseable metadata degrades to none rather than poisoning reads
        metadata: metadata_json.and_then(|json| serde_json::from_str(&json).ok()),
        last_accessed_at: row.get(10)?,
        access_count: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

/// Store for [`SecretRecord`] rows.
#[derive(Clone)]
pub struct SecretStore {
    conn: Arc<Mutex<Connection>>,
}

impl SecretStore {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub fn insert(&self, record: &SecretRecord) -> StoreResult<()> {
        let metadata_json = record
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO encrypted_secrets (
                secret_id, user_id, name, secret_type, description,
                ciphertext, nonce, auth_tag, dek_version, metadata,
                access_count, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)",
            params![
                record.secret_id,
                record.user_id,
                record.name,
                record.secret_type.as_str(),
                record.description,
                record.ciphertext,
                record.nonce,
                record.auth_tag,
                record.dek_version,
                metadata_json,
                record.created_at,
                record.updated_at
            ],
        )?;
        Ok(())
    }

    /// Loads one active (non-deleted) secret owned by `user_id`.
    pub fn get(&self, user_id: &str, secret_id: &str) -> StoreResult<Option<SecretRecord>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            &format!(
                "SELECT {SECRET_COLUMNS} FROM encrypted_secrets
                 WHERE user_id = ? AND secret_id = ? AND deleted_at IS NULL"
            ),
            params![user_id, secret_id],
            secret_from_row,
        );
        match result {
            Ok(record) => Ok(Some(record)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Lists active secrets, newest first, with optional type filter and
    /// paging. Unpaged calls are a full export capped at `MAX_LIST_ROWS`.
    pub fn list(&self, user_id: &str, filter: &SecretFilter) -> StoreResult<SecretPage> {
        let mut where_clause =
            String::from("WHERE user_id = ? AND deleted_at IS NULL");
        if filter.secret_type.is_some() {
            where_clause.push_str(" AND secret_type = ?");
        }
        let type_str = filter.secret_type.map(|t| t.as_str());
        let type_params: Vec<&dyn duckdb::ToSql> = match &type_str {
            Some(t) => vec![&user_id, t],
            None => vec![&user_id],
        };

        let conn = self.conn.lock().unwrap();

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM encrypted_secrets {where_clause}"),
            &type_params[..],
            |row| row.get(0),
        )?;

        let (page, page_size, limit, offset) = match (filter.page, filter.page_size) {
            (None, None) => (1, MAX_LIST_ROWS, MAX_LIST_ROWS, 0u32),
            (page, size) => {
                let page = page.unwrap_or(1).max(1);
                let size = size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_LIST_ROWS);
                (page, size, size, (page - 1) * size)
            }
        };

        let mut stmt = conn.prepare(&format!(
            "SELECT {SECRET_COLUMNS} FROM encrypted_secrets {where_clause}
             ORDER BY created_at DESC, secret_id
             LIMIT {limit} OFFSET {offset}"
        ))?;
        let secrets: Vec<SafeSecretRecord> = stmt
            .query_map(&type_params[..], secret_from_row)?
            .filter_map(|r| r.ok())
            .map(|record| record.to_safe())
            .collect();

        let total_pages = (total as u32).div_ceil(page_size);

        Ok(SecretPage {
            secrets,
            total,
            page,
            page_size,
            total_pages,
        })
    }

    /// Soft-deletes a secret. Returns false when no active row matched.
    pub fn soft_delete(&self, user_id: &str, secret_id: &str) -> StoreResult<bool> {
        let now = now_millis();
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute(
            "UPDATE encrypted_secrets SET deleted_at = ?, updated_at = ?
             WHERE user_id = ? AND secret_id = ? AND deleted_at IS NULL",
            params![now, now, user_id, secret_id],
        )?;
        Ok(affected > 0)
    }

    /// Counts active secrets still sealed under `dek_version`.
    pub fn count_at_version(&self, user_id: &str, dek_version: i64) -> StoreResult<i64> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM encrypted_secrets
             WHERE user_id = ? AND dek_version = ? AND deleted_at IS NULL",
            params![user_id, dek_version],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Fetches the next migration batch: active secrets at `dek_version`
    /// with `secret_id` beyond the cursor, in id order. A keyset cursor
    /// terminates even when failed rows remain at the old version.
    pub fn batch_at_version(
        &self,
        user_id: &str,
        dek_version: i64,
        after_secret_id: Option<&str>,
        limit: u32,
    ) -> StoreResult<Vec<SecretRecord>> {
        let cursor = after_secret_id.unwrap_or("");
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SECRET_COLUMNS} FROM encrypted_secrets
             WHERE user_id = ? AND dek_version = ? AND deleted_at IS NULL
               AND secret_id > ?
             ORDER BY secret_id
             LIMIT ?"
        ))?;
        let records: Vec<SecretRecord> = stmt
            .query_map(params![user_id, dek_version, cursor, limit], secret_from_row)?
            .collect::<Result<_, _>>()?;
        Ok(records)
    }

    /// Writes a re-encrypted secret back in one statement: cipher columns and
    /// `dek_version` move together, so a crash leaves the row wholly old or
    /// wholly new.
    pub fn apply_reencryption(
        &self,
        secret_id: &str,
        ciphertext: &[u8],
        nonce: &[u8],
        auth_tag: &[u8],
        new_version: i64,
    ) -> StoreResult<()> {
        let now = now_millis();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE encrypted_secrets SET
                ciphertext = ?, nonce = ?, auth_tag = ?, dek_version = ?, updated_at = ?
             WHERE secret_id = ?",
            params![ciphertext, nonce, auth_tag, new_version, now, secret_id],
        )?;
        Ok(())
    }

    /// Bumps access telemetry after a successful decrypt. Best-effort: the
    /// caller fires this asynchronously and only logs a failure.
    pub fn record_access(&self, secret_id: &str) -> StoreResult<()> {
        let now = now_millis();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE encrypted_secrets SET
                last_accessed_at = ?, access_count = access_count + 1
             WHERE secret_id = ?",
            params![now, secret_id],
        )?;
        Ok(())
    }
}
