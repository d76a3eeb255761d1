//! AES-256-GCM authenticated encryption.
//!
//! Every call to [`encrypt_aead`] draws a fresh random 12-byte nonce from the
//! OS CSPRNG; nonce reuse under the same key breaks GCM entirely. Ciphertext
//! and the 16-byte tag are kept separate so storage can column them
//! individually, with [`EncryptedPayload::to_blob`] providing the fixed
//! `ciphertext || nonce || tag` framing used for wrapped DEKs at rest.

use crate::error::{CryptoError, CryptoResult};
use crate::key::SymmetricKey;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// GCM nonce length (96 bits).
pub const NONCE_SIZE: usize = 12;

/// GCM authentication tag length (128 bits).
pub const TAG_SIZE: usize = 16;

/// Fixed trailing framing of a wrapped-key blob: `nonce || tag`.
pub const BLOB_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

/// Output of one AEAD encryption.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_SIZE],
    pub tag: [u8; TAG_SIZE],
}

impl EncryptedPayload {
    /// Serializes as `ciphertext || nonce(12) || tag(16)` — the at-rest
    /// layout of wrapped DEKs.
    pub fn to_blob(&self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(self.ciphertext.len() + BLOB_OVERHEAD);
        blob.extend_from_slice(&self.ciphertext);
        blob.extend_from_slice(&self.nonce);
        blob.extend_from_slice(&self.tag);
        blob
    }

    /// Parses the `ciphertext || nonce(12) || tag(16)` layout. Anything
    /// shorter than the 28-byte framing is structurally invalid.
    pub fn from_blob(blob: &[u8]) -> CryptoResult<Self> {
        if blob.len() < BLOB_OVERHEAD {
            return Err(CryptoError::MalformedBlob(blob.len()));
        }
        let (ciphertext, trailer) = blob.split_at(blob.len() - BLOB_OVERHEAD);
        let (nonce, tag) = trailer.split_at(NONCE_SIZE);
        Ok(Self {
            ciphertext: ciphertext.to_vec(),
            // Lengths checked above
            nonce: nonce.try_into().expect("nonce is NONCE_SIZE bytes"),
            tag: tag.try_into().expect("tag is TAG_SIZE bytes"),
        })
    }

    /// Decrypts this payload with `key`.
    pub fn open(&self, key: &SymmetricKey) -> CryptoResult<Vec<u8>> {
        decrypt_aead(&self.ciphertext, key, &self.nonce, &self.tag)
    }
}

/// Encrypts `plaintext` under `key` with AES-256-GCM and a fresh random nonce.
pub fn encrypt_aead(plaintext: &[u8], key: &SymmetricKey) -> CryptoResult<EncryptedPayload> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));

    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    // The AEAD implementation appends the tag to the ciphertext; split it
    // back out so nonce, tag and ciphertext stay separate columns.
    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let split_at = sealed.len() - TAG_SIZE;
    let tag: [u8; TAG_SIZE] = sealed[split_at..]
        .try_into()
        .expect("tag is TAG_SIZE bytes");

    Ok(EncryptedPayload {
        ciphertext: sealed[..split_at].to_vec(),
        nonce,
        tag,
    })
}

/// Decrypts AES-256-GCM output.
///
/// Any failure — wrong key, flipped ciphertext bit, altered nonce or tag —
/// surfaces as the single opaque [`CryptoError::DecryptionFailed`].
pub fn decrypt_aead(
    ciphertext: &[u8],
    key: &SymmetricKey,
    nonce: &[u8; NONCE_SIZE],
    tag: &[u8; TAG_SIZE],
) -> CryptoResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));

    let mut sealed = Vec::with_capacity(ciphertext.len() + TAG_SIZE);
    sealed.extend_from_slice(ciphertext);
    sealed.extend_from_slice(tag);

    cipher
        .decrypt(Nonce::from_slice(nonce), sealed.as_ref())
        .map_err(|_| CryptoError::DecryptionFailed)
}
