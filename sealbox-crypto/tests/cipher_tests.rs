use sealbox_crypto::{
    decrypt_aead, encrypt_aead, CryptoError, EncryptedPayload, SymmetricKey, BLOB_OVERHEAD,
    NONCE_SIZE, TAG_SIZE,
};

#[test]
fn encrypt_decrypt_roundtrip() {
    let key = SymmetricKey::generate();
    let plaintext = b"sk-test-123";

    let payload = encrypt_aead(plaintext, &key).unwrap();
    let recovered = decrypt_aead(&payload.ciphertext, &key, &payload.nonce, &payload.tag).unwrap();

    assert_eq!(recovered, plaintext);
}

#[test]
fn empty_plaintext_roundtrip() {
    let key = SymmetricKey::generate();
    let payload = encrypt_aead(b"", &key).unwrap();
    assert!(payload.ciphertext.is_empty());
    assert_eq!(payload.open(&key).unwrap(), b"");
}

#[test]
fn wrong_key_fails_opaquely() {
    let key = SymmetricKey::generate();
    let other = SymmetricKey::generate();
    let payload = encrypt_aead(b"payload", &key).unwrap();

    let err = payload.open(&other).unwrap_err();
    assert!(matches!(err, CryptoError::DecryptionFailed));
}

#[test]
fn tampered_ciphertext_fails() {
    let key = SymmetricKey::generate();
    let mut payload = encrypt_aead(b"tamper target", &key).unwrap();
    payload.ciphertext[0] ^= 0x01;

    assert!(payload.open(&key).is_err());
}

#[test]
fn tampered_nonce_fails() {
    let key = SymmetricKey::generate();
    let mut payload = encrypt_aead(b"tamper target", &key).unwrap();
    payload.nonce[0] ^= 0x01;

    assert!(payload.open(&key).is_err());
}

#[test]
fn tampered_tag_fails() {
    let key = SymmetricKey::generate();
    let mut payload = encrypt_aead(b"tamper target", &key).unwrap();
    payload.tag[TAG_SIZE - 1] ^= 0x80;

    assert!(payload.open(&key).is_err());
}

#[test]
fn each_encryption_uses_a_fresh_nonce() {
    let key = SymmetricKey::generate();
    let p1 = encrypt_aead(b"same plaintext", &key).unwrap();
    let p2 = encrypt_aead(b"same plaintext", &key).unwrap();

    assert_ne!(p1.nonce, p2.nonce);
    assert_ne!(p1.ciphertext, p2.ciphertext);

    // Both still open to the same plaintext
    assert_eq!(p1.open(&key).unwrap(), b"same plaintext");
    assert_eq!(p2.open(&key).unwrap(), b"same plaintext");
}

#[test]
fn blob_framing_roundtrip() {
    let key = SymmetricKey::generate();
    let payload = encrypt_aead(b"wrapped dek bytes go here of any size", &key).unwrap();

    let blob = payload.to_blob();
    assert_eq!(blob.len(), payload.ciphertext.len() + BLOB_OVERHEAD);

    let parsed = EncryptedPayload::from_blob(&blob).unwrap();
    assert_eq!(parsed.ciphertext, payload.ciphertext);
    assert_eq!(parsed.nonce, payload.nonce);
    assert_eq!(parsed.tag, payload.tag);
    assert_eq!(parsed.open(&key).unwrap(), b"wrapped dek bytes go here of any size");
}

#[test]
fn blob_shorter_than_framing_is_rejected() {
    for len in 0..BLOB_OVERHEAD {
        let err = EncryptedPayload::from_blob(&vec![0u8; len]).unwrap_err();
        assert!(matches!(err, CryptoError::MalformedBlob(l) if l == len));
    }
}

#[test]
fn blob_of_exactly_framing_length_parses_as_empty_ciphertext() {
    let key = SymmetricKey::generate();
    let payload = encrypt_aead(b"", &key).unwrap();
    let blob = payload.to_blob();
    assert_eq!(blob.len(), NONCE_SIZE + TAG_SIZE);

    let parsed = EncryptedPayload::from_blob(&blob).unwrap();
    assert!(parsed.ciphertext.is_empty());
    assert_eq!(parsed.open(&key).unwrap(), b"");
}

// Property-based tests
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn roundtrip_always_recovers_plaintext(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let key = SymmetricKey::generate();
            let payload = encrypt_aead(&data, &key).unwrap();
            prop_assert_eq!(payload.open(&key).unwrap(), data);
        }

        #[test]
        fn blob_roundtrip_preserves_payload(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let key = SymmetricKey::generate();
            let payload = encrypt_aead(&data, &key).unwrap();
            let parsed = EncryptedPayload::from_blob(&payload.to_blob()).unwrap();
            prop_assert_eq!(parsed.open(&key).unwrap(), data);
        }

        #[test]
        fn single_bit_flip_anywhere_fails(
            data in proptest::collection::vec(any::<u8>(), 1..128),
            flip in any::<proptest::sample::Index>(),
        ) {
            let key = SymmetricKey::generate();
            let payload = encrypt_aead(&data, &key).unwrap();
            let mut blob = payload.to_blob();
            let idx = flip.index(blob.len());
            blob[idx] ^= 0x01;
            let tampered = EncryptedPayload::from_blob(&blob).unwrap();
            prop_assert!(tampered.open(&key).is_err());
        }
    }
}
