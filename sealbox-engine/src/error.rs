//! Engine error types.
//!
//! One closed enum covering the whole failure taxonomy callers can see.
//! The crypto layer's opaque `DecryptionFailed` never crosses this boundary:
//! it is mapped to [`EngineError::InvalidCredentials`] so callers cannot tell
//! a wrong PIN from tampered data.

use sealbox_store::StoreError;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the vault engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Wrong PIN or wrong recovery mnemonic — including AEAD tag failures,
    /// which are deliberately indistinguishable.
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("too many requests: {0}")]
    TooManyRequests(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Structural crypto problems: malformed wrapped-key blob, DEK version
    /// mismatch. Not credential failures.
    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}
