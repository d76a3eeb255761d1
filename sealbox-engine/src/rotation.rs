//! DEK rotation and background re-encryption.
//!
//! `rotate_dek` swaps in a freshly generated DEK (old wrap retained as
//! `wrapped_dek_old`), then launches a per-user background task that walks
//! the user's secrets in batches, opening each with the old DEK and
//! resealing with the new one. The caller returns immediately; progress is
//! read through [`KeyRotationService::rotation_status`].
//!
//! Mutual exclusion is enforced twice: the persisted `rotation_status`
//! (authoritative, survives restarts) and the in-memory task registry
//! (fast-path duplicate rejection and live progress).

use crate::config::{
    ConfigManager, CONFIG_KEY_ROTATION_BATCH_SIZE, CONFIG_KEY_ROTATION_BATCH_SLEEP_MS,
};
use crate::encryption::{now_millis, unwrap_dek, EncryptionService};
use crate::error::{EngineError, EngineResult};
use sealbox_crypto::{
    decrypt_aead, derive_kek, encrypt_aead, verify_pin, Salt, SymmetricKey, NONCE_SIZE, TAG_SIZE,
};
use sealbox_store::{KeyStore, RotationStatus, SafeKeyRecord, SecretStore};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

/// Default migration batch size.
pub(crate) const DEFAULT_BATCH_SIZE: u32 = 100;

/// Default inter-batch sleep in milliseconds.
pub(crate) const DEFAULT_BATCH_SLEEP_MS: u64 = 100;

/// Manual rotations are rate-limited to one per 30 days.
const ROTATION_COOLDOWN_MS: i64 = 30 * 24 * 60 * 60 * 1000;

/// Point-in-time view of a rotation, live or historical.
#[derive(Clone, Debug, Serialize)]
pub struct RotationSnapshot {
    pub user_id: String,
    /// Version being migrated away from; `None` on the historical fallback
    /// where the task counters are gone.
    pub old_version: Option<i64>,
    pub new_version: i64,
    pub total: i64,
    pub migrated: i64,
    pub failed: i64,
    pub status: RotationStatus,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Mutable progress counters for one running migration.
struct MigrationProgress {
    old_version: i64,
    new_version: i64,
    total: i64,
    migrated: i64,
    failed: i64,
    status: RotationStatus,
    started_at: i64,
    completed_at: Option<i64>,
    error: Option<String>,
}

impl MigrationProgress {
    fn snapshot(&self, user_id: &str) -> RotationSnapshot {
        RotationSnapshot {
            user_id: user_id.to_string(),
            old_version: Some(self.old_version),
            new_version: self.new_version,
            total: self.total,
            migrated: self.migrated,
            failed: self.failed,
            status: self.status,
            started_at: Some(self.started_at),
            completed_at: self.completed_at,
            error: self.error.clone(),
        }
    }
}

/// Registry entry for one in-flight migration.
struct MigrationHandle {
    progress: Arc<Mutex<MigrationProgress>>,
    cancel: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

/// Cached hot-reloadable knobs, swapped atomically by config watchers.
struct RotationTuning {
    batch_size: u32,
    batch_sleep_ms: u64,
}

/// Service driving DEK rotation and the background migration.
pub struct KeyRotationService {
    keys: KeyStore,
    secrets: SecretStore,
    encryption: EncryptionService,
    tasks: Arc<tokio::sync::RwLock<HashMap<String, MigrationHandle>>>,
    tuning: Arc<RwLock<RotationTuning>>,
}

impl KeyRotationService {
    /// Builds the service, loads the tuning knobs, and subscribes to their
    /// config changes. Watchers swap the cached values; an in-flight
    /// migration picks the new values up on its next batch.
    pub fn new(
        keys: KeyStore,
        secrets: SecretStore,
        encryption: EncryptionService,
        config: &ConfigManager,
    ) -> Self {
        let batch_size = config
            .get_or(CONFIG_KEY_ROTATION_BATCH_SIZE, "")
            .parse()
            .ok()
            .filter(|&n: &u32| n > 0)
            .unwrap_or(DEFAULT_BATCH_SIZE);
        let batch_sleep_ms = config
            .get_or(CONFIG_KEY_ROTATION_BATCH_SLEEP_MS, "")
            .parse()
            .ok()
            .unwrap_or(DEFAULT_BATCH_SLEEP_MS);

        let tuning = Arc::new(RwLock::new(RotationTuning {
            batch_size,
            batch_sleep_ms,
        }));

        config.watch(CONFIG_KEY_ROTATION_BATCH_SIZE, {
            let tuning = tuning.clone();
            Arc::new(move |_old: &str, new: &str| match new.parse::<u32>() {
                Ok(size) if size > 0 => {
                    tuning.write().unwrap().batch_size = size;
                    info!(batch_size = size, "rotation batch size updated");
                }
                _ => warn!(value = new, "ignoring invalid rotation batch size"),
            })
        });
        config.watch(CONFIG_KEY_ROTATION_BATCH_SLEEP_MS, {
            let tuning = tuning.clone();
            Arc::new(move |_old: &str, new: &str| match new.parse::<u64>() {
                Ok(sleep_ms) => {
                    tuning.write().unwrap().batch_sleep_ms = sleep_ms;
                    info!(batch_sleep_ms = sleep_ms, "rotation batch sleep updated");
                }
                _ => warn!(value = new, "ignoring invalid rotation batch sleep"),
            })
        });

        info!(batch_size, batch_sleep_ms, "key rotation service initialized");

        Self {
            keys,
            secrets,
            encryption,
            tasks: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
            tuning,
        }
    }

    /// Rotates the user's DEK and launches the background migration.
    ///
    /// Returns as soon as the new wrap is persisted; migration progress is
    /// observable through [`rotation_status`](Self::rotation_status).
    pub async fn rotate_dek(&self, user_id: &str, pin: &str) -> EngineResult<SafeKeyRecord> {
        let record = self.encryption.load_record(user_id)?;

        if self.tasks.read().await.contains_key(user_id)
            || record.rotation_status == RotationStatus::InProgress
        {
            warn!(user_id, "rotation already in progress");
            return Err(EngineError::Conflict("rotation already in progress".into()));
        }

        if let Some(last) = record.last_rotation_at {
            let elapsed = now_millis() - last;
            if elapsed < ROTATION_COOLDOWN_MS {
                let remaining_days = (ROTATION_COOLDOWN_MS - elapsed) / (24 * 60 * 60 * 1000);
                warn!(user_id, remaining_days, "rotation cooldown not elapsed");
                return Err(EngineError::TooManyRequests(format!(
                    "rotation allowed again in {remaining_days} days"
                )));
            }
        }

        // Full unlock path: bcrypt gate, then one KEK derivation for both
        // the old-DEK unwrap and the new-DEK wrap
        if !verify_pin(pin, &record.security_pin_hash) {
            warn!(user_id, "security PIN verification failed");
            return Err(EngineError::InvalidCredentials);
        }
        let salt = Salt::from_slice(&record.kek_salt)
            .map_err(|e| EngineError::Crypto(e.to_string()))?;
        let kek =
            derive_kek(pin, &salt).map_err(|e| EngineError::KeyDerivation(e.to_string()))?;
        let old_dek = unwrap_dek(&record.wrapped_dek, &kek)?;

        let new_dek = SymmetricKey::generate();
        let new_version = record.dek_version + 1;
        let new_wrapped_dek = encrypt_aead(new_dek.as_bytes(), &kek)
            .map_err(|e| EngineError::Crypto(e.to_string()))?
            .to_blob();

        self.keys
            .begin_rotation(user_id, &new_wrapped_dek, new_version)?;

        info!(
            user_id,
            old_version = record.dek_version,
            new_version,
            "DEK rotation started"
        );

        self.spawn_migration(
            user_id.to_string(),
            record.dek_version,
            new_version,
            old_dek,
            new_dek,
        )
        .await;

        let updated = self.encryption.load_record(user_id)?;
        Ok(updated.to_safe())
    }

    /// Registers and spawns the migration task for one user.
    async fn spawn_migration(
        &self,
        user_id: String,
        old_version: i64,
        new_version: i64,
        old_dek: SymmetricKey,
        new_dek: SymmetricKey,
    ) {
        let progress = Arc::new(Mutex::new(MigrationProgress {
            old_version,
            new_version,
            total: 0,
            migrated: 0,
            failed: 0,
            status: RotationStatus::InProgress,
            started_at: now_millis(),
            completed_at: None,
            error: None,
        }));
        let cancel = Arc::new(AtomicBool::new(false));

        // Hold the registry write lock across the spawn so the task cannot
        // reach its own removal before the handle is inserted.
        let mut tasks = self.tasks.write().await;

        let join = tokio::spawn({
            let keys = self.keys.clone();
            let secrets = self.secrets.clone();
            let tasks = self.tasks.clone();
            let tuning = self.tuning.clone();
            let progress = progress.clone();
            let cancel = cancel.clone();
            let user_id = user_id.clone();
            async move {
                run_migration(
                    &keys, &secrets, &tuning, &progress, &cancel, &user_id, old_version,
                    new_version, old_dek, new_dek,
                )
                .await;
                tasks.write().await.remove(&user_id);
            }
        });

        tasks.insert(
            user_id,
            MigrationHandle {
                progress,
                cancel,
                join,
            },
        );
    }

    /// Returns migration progress: a copy of the live counters while the
    /// task runs, or the persisted state afterwards.
    pub async fn rotation_status(&self, user_id: &str) -> EngineResult<RotationSnapshot> {
        if let Some(handle) = self.tasks.read().await.get(user_id) {
            let progress = handle.progress.lock().unwrap();
            return Ok(progress.snapshot(user_id));
        }

        let record = self.encryption.load_record(user_id)?;
        Ok(RotationSnapshot {
            user_id: user_id.to_string(),
            old_version: None,
            new_version: record.dek_version,
            total: 0,
            migrated: 0,
            failed: 0,
            status: record.rotation_status,
            started_at: record.rotation_started_at,
            completed_at: record.last_rotation_at,
            error: None,
        })
    }

    /// Cancels and joins every outstanding migration task.
    ///
    /// Cancelled tasks leave their persisted status `in_progress` with the
    /// old wrap intact, so unmigrated rows stay decryptable.
    pub async fn shutdown(&self) {
        let handles: Vec<(String, MigrationHandle)> =
            self.tasks.write().await.drain().collect();
        if handles.is_empty() {
            return;
        }

        info!(count = handles.len(), "cancelling outstanding migration tasks");
        for (user_id, handle) in handles {
            handle.cancel.store(true, Ordering::Relaxed);
            if let Err(e) = handle.join.await {
                error!(user_id, error = %e, "migration task join failed");
            } else {
                debug!(user_id, "migration task stopped");
            }
        }
    }
}

/// The background migration loop for one user.
#[allow(clippy::too_many_arguments)]
async fn run_migration(
    keys: &KeyStore,
    secrets: &SecretStore,
    tuning: &RwLock<RotationTuning>,
    progress: &Mutex<MigrationProgress>,
    cancel: &AtomicBool,
    user_id: &str,
    old_version: i64,
    new_version: i64,
    old_dek: SymmetricKey,
    new_dek: SymmetricKey,
) {
    info!(user_id, old_version, new_version, "secret migration started");

    let total = match secrets.count_at_version(user_id, old_version) {
        Ok(total) => total,
        Err(e) => {
            mark_failed(keys, progress, user_id, &e.to_string());
            return;
        }
    };
    progress.lock().unwrap().total = total;

    if total == 0 {
        mark_completed(keys, progress, user_id);
        return;
    }

    let mut cursor: Option<String> = None;
    loop {
        if cancel.load(Ordering::Relaxed) {
            warn!(user_id, "secret migration cancelled");
            return;
        }

        let (batch_size, batch_sleep_ms) = {
            let tuning = tuning.read().unwrap();
            (tuning.batch_size, tuning.batch_sleep_ms)
        };

        let batch =
            match secrets.batch_at_version(user_id, old_version, cursor.as_deref(), batch_size) {
                Ok(batch) => batch,
                Err(e) => {
                    mark_failed(keys, progress, user_id, &e.to_string());
                    return;
                }
            };
        let Some(last) = batch.last() else {
            break;
        };
        cursor = Some(last.secret_id.clone());

        for secret in &batch {
            let nonce: [u8; NONCE_SIZE] = match secret.nonce.as_slice().try_into() {
                Ok(nonce) => nonce,
                Err(_) => {
                    warn!(secret_id = secret.secret_id, "skipping secret with bad nonce");
                    progress.lock().unwrap().failed += 1;
                    continue;
                }
            };
            let tag: [u8; TAG_SIZE] = match secret.auth_tag.as_slice().try_into() {
                Ok(tag) => tag,
                Err(_) => {
                    warn!(secret_id = secret.secret_id, "skipping secret with bad tag");
                    progress.lock().unwrap().failed += 1;
                    continue;
                }
            };

            let plaintext = match decrypt_aead(&secret.ciphertext, &old_dek, &nonce, &tag) {
                Ok(plaintext) => Zeroizing::new(plaintext),
                Err(_) => {
                    warn!(
                        secret_id = secret.secret_id,
                        "old DEK failed to open secret, skipping"
                    );
                    progress.lock().unwrap().failed += 1;
                    continue;
                }
            };

            let payload = match encrypt_aead(&plaintext, &new_dek) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(secret_id = secret.secret_id, error = %e, "reseal failed, skipping");
                    progress.lock().unwrap().failed += 1;
                    continue;
                }
            };

            if let Err(e) = secrets.apply_reencryption(
                &secret.secret_id,
                &payload.ciphertext,
                &payload.nonce,
                &payload.tag,
                new_version,
            ) {
                warn!(secret_id = secret.secret_id, error = %e, "write-back failed, skipping");
                progress.lock().unwrap().failed += 1;
                continue;
            }

            progress.lock().unwrap().migrated += 1;
        }

        {
            let progress = progress.lock().unwrap();
            debug!(
                user_id,
                migrated = progress.migrated,
                failed = progress.failed,
                total = progress.total,
                "migration batch done"
            );
        }

        tokio::time::sleep(Duration::from_millis(batch_sleep_ms)).await;
    }

    mark_completed(keys, progress, user_id);
}

fn mark_completed(keys: &KeyStore, progress: &Mutex<MigrationProgress>, user_id: &str) {
    {
        let mut progress = progress.lock().unwrap();
        progress.status = RotationStatus::Completed;
        progress.completed_at = Some(now_millis());
    }

    if let Err(e) = keys.complete_rotation(user_id) {
        error!(user_id, error = %e, "failed to persist rotation completion");
        return;
    }

    let progress = progress.lock().unwrap();
    info!(
        user_id,
        migrated = progress.migrated,
        failed = progress.failed,
        total = progress.total,
        "secret migration completed"
    );
}

fn mark_failed(keys: &KeyStore, progress: &Mutex<MigrationProgress>, user_id: &str, reason: &str) {
    {
        let mut progress = progress.lock().unwrap();
        progress.status = RotationStatus::Failed;
        progress.completed_at = Some(now_millis());
        progress.error = Some(reason.to_string());
    }

    // The old wrap is deliberately left in place so a retry can still
    // decrypt unmigrated rows.
    if let Err(e) = keys.fail_rotation(user_id) {
        error!(user_id, error = %e, "failed to persist rotation failure");
    }

    error!(user_id, reason, "secret migration failed");
}
