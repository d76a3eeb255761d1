//! System configuration key/value rows.
//!
//! Backs the hot-reloadable settings the rotation engine consumes. The
//! in-memory cache and change notification live in the engine crate; this is
//! just the persistence.

use crate::error::StoreResult;
use crate::now_millis;
use duckdb::{params, Connection};
use std::sync::{Arc, Mutex};

/// Store for `system_config` rows.
#[derive(Clone)]
pub struct ConfigStore {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigStore {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT config_value FROM system_config WHERE config_key = ?",
            params![key],
            |row| row.get(0),
        );
        match result {
            Ok(value) => Ok(Some(value)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Loads every row, for warming a cache at startup.
    pub fn load_all(&self) -> StoreResult<Vec<(String, String)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT config_key, config_value FROM system_config")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<_, _>>()?;
        Ok(rows)
    }

    /// Writes a value, inserting or replacing.
    pub fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO system_config (config_key, config_value, updated_at)
             VALUES (?, ?, ?)",
            params![key, value, now_millis()],
        )?;
        Ok(())
    }

    /// Inserts a default only if the key is absent (first-boot seeding).
    pub fn seed_default(&self, key: &str, value: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO system_config (config_key, config_value, updated_at)
             VALUES (?, ?, ?)",
            params![key, value, now_millis()],
        )?;
        Ok(())
    }
}
