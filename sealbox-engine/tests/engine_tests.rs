use sealbox_engine::{
    Engine, EngineError, NewSecretInput, SecretFilter, SecretMetadata, SecretType,
};
use std::time::Duration;

const PIN: &str = "Secur3!Pin";

fn api_key_input(name: &str) -> NewSecretInput {
    NewSecretInput {
        name: name.to_string(),
        secret_type: SecretType::ApiKey,
        description: Some("payments gateway".to_string()),
        metadata: None,
    }
}

#[test]
fn create_key_returns_safe_record_and_one_time_mnemonic() {
    let engine = Engine::open_in_memory().unwrap();

    let (record, mnemonic) = engine.encryption().create_key("u1", PIN).unwrap();

    assert_eq!(record.user_id, "u1");
    assert_eq!(record.dek_version, 1);
    assert_eq!(record.kek_algorithm, "argon2id");
    assert_eq!(record.dek_algorithm, "AES-256-GCM");
    assert_eq!(mnemonic.split_whitespace().count(), 24);

    // The safe record never serializes salts, hashes, or wrapped keys
    let json = serde_json::to_value(&record).unwrap();
    assert!(json.get("kek_salt").is_none());
    assert!(json.get("wrapped_dek").is_none());
    assert!(json.get("security_pin_hash").is_none());
    assert!(json.get("recovery_key_hash").is_none());
    assert!(json.get("wrapped_dek_recovery").is_none());
}

#[test]
fn create_key_rejects_short_pin() {
    let engine = Engine::open_in_memory().unwrap();
    let err = engine.encryption().create_key("u1", "1234567").unwrap_err();
    assert!(matches!(err, EngineError::InvalidFormat(_)));
}

#[test]
fn create_key_is_one_time_per_user() {
    let engine = Engine::open_in_memory().unwrap();
    engine.encryption().create_key("u1", PIN).unwrap();

    let err = engine.encryption().create_key("u1", PIN).unwrap_err();
    assert!(matches!(err, EngineError::AlreadyExists(_)));
}

#[tokio::test]
async fn store_then_decrypt_roundtrip() {
    let engine = Engine::open_in_memory().unwrap();
    engine.encryption().create_key("u1", PIN).unwrap();

    let stored = engine
        .encryption()
        .encrypt_and_store("u1", PIN, api_key_input("prod api key"), "sk-test-123")
        .unwrap();
    assert_eq!(stored.dek_version, 1);

    let opened = engine
        .encryption()
        .decrypt("u1", &stored.secret_id, PIN)
        .await
        .unwrap();
    assert_eq!(opened.plaintext, "sk-test-123");
    assert_eq!(opened.secret.secret_id, stored.secret_id);
    assert_eq!(opened.secret.secret_type, SecretType::ApiKey);
}

#[tokio::test]
async fn wrong_pin_is_rejected_at_every_entry_point() {
    let engine = Engine::open_in_memory().unwrap();
    engine.encryption().create_key("u1", PIN).unwrap();
    let stored = engine
        .encryption()
        .encrypt_and_store("u1", PIN, api_key_input("k"), "sk-test-123")
        .unwrap();

    let err = engine
        .encryption()
        .encrypt_and_store("u1", "wrong-pin", api_key_input("k2"), "other")
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidCredentials));

    let err = engine
        .encryption()
        .decrypt("u1", &stored.secret_id, "wrong-pin")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidCredentials));
}

#[tokio::test]
async fn missing_key_record_or_secret_reports_not_found() {
    let engine = Engine::open_in_memory().unwrap();

    let err = engine
        .encryption()
        .encrypt_and_store("ghost", PIN, api_key_input("k"), "x")
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));

    engine.encryption().create_key("u1", PIN).unwrap();
    let err = engine
        .encryption()
        .decrypt("u1", "no-such-secret", PIN)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn tampered_ciphertext_reports_invalid_credentials() {
    let engine = Engine::open_in_memory().unwrap();
    engine.encryption().create_key("u1", PIN).unwrap();
    let stored = engine
        .encryption()
        .encrypt_and_store("u1", PIN, api_key_input("k"), "sk-test-123")
        .unwrap();

    // Flip one ciphertext bit behind the service's back
    let secrets = engine.database().secret_store();
    let mut row = secrets.get("u1", &stored.secret_id).unwrap().unwrap();
    row.ciphertext[0] ^= 0x01;
    secrets
        .apply_reencryption(&row.secret_id, &row.ciphertext, &row.nonce, &row.auth_tag, 1)
        .unwrap();

    let err = engine
        .encryption()
        .decrypt("u1", &stored.secret_id, PIN)
        .await
        .unwrap_err();
    // Indistinguishable from a wrong PIN
    assert!(matches!(err, EngineError::InvalidCredentials));
}

#[tokio::test]
async fn dek_version_mismatch_is_a_crypto_error() {
    let engine = Engine::open_in_memory().unwrap();
    engine.encryption().create_key("u1", PIN).unwrap();
    let stored = engine
        .encryption()
        .encrypt_and_store("u1", PIN, api_key_input("k"), "sk-test-123")
        .unwrap();

    let secrets = engine.database().secret_store();
    let row = secrets.get("u1", &stored.secret_id).unwrap().unwrap();
    secrets
        .apply_reencryption(&row.secret_id, &row.ciphertext, &row.nonce, &row.auth_tag, 99)
        .unwrap();

    let err = engine
        .encryption()
        .decrypt("u1", &stored.secret_id, PIN)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Crypto(_)));
}

#[tokio::test]
async fn expired_secret_refuses_to_decrypt() {
    let engine = Engine::open_in_memory().unwrap();
    engine.encryption().create_key("u1", PIN).unwrap();

    let input = NewSecretInput {
        name: "stale".to_string(),
        secret_type: SecretType::Token,
        description: None,
        metadata: Some(SecretMetadata {
            expires_at: Some(1_000),
            tags: vec![],
        }),
    };
    let stored = engine
        .encryption()
        .encrypt_and_store("u1", PIN, input, "expired-token")
        .unwrap();

    let err = engine
        .encryption()
        .decrypt("u1", &stored.secret_id, PIN)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn list_and_delete_flow() {
    let engine = Engine::open_in_memory().unwrap();
    engine.encryption().create_key("u1", PIN).unwrap();

    let a = engine
        .encryption()
        .encrypt_and_store("u1", PIN, api_key_input("a"), "one")
        .unwrap();
    let input = NewSecretInput {
        name: "b".to_string(),
        secret_type: SecretType::Token,
        ..Default::default()
    };
    engine
        .encryption()
        .encrypt_and_store("u1", PIN, input, "two")
        .unwrap();

    let all = engine
        .encryption()
        .list_secrets("u1", &SecretFilter::default())
        .unwrap();
    assert_eq!(all.total, 2);

    let tokens = engine
        .encryption()
        .list_secrets(
            "u1",
            &SecretFilter {
                secret_type: Some(SecretType::Token),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(tokens.total, 1);
    assert_eq!(tokens.secrets[0].name, "b");

    engine.encryption().delete_secret("u1", &a.secret_id).unwrap();

    let remaining = engine
        .encryption()
        .list_secrets("u1", &SecretFilter::default())
        .unwrap();
    assert_eq!(remaining.total, 1);

    let err = engine
        .encryption()
        .decrypt("u1", &a.secret_id, PIN)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));

    let err = engine
        .encryption()
        .delete_secret("u1", &a.secret_id)
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn decrypt_bumps_access_telemetry_asynchronously() {
    let engine = Engine::open_in_memory().unwrap();
    engine.encryption().create_key("u1", PIN).unwrap();
    let stored = engine
        .encryption()
        .encrypt_and_store("u1", PIN, api_key_input("k"), "sk-test-123")
        .unwrap();

    engine
        .encryption()
        .decrypt("u1", &stored.secret_id, PIN)
        .await
        .unwrap();

    // The bump is fire-and-forget; give it a moment to land
    let secrets = engine.database().secret_store();
    for _ in 0..40 {
        let row = secrets.get("u1", &stored.secret_id).unwrap().unwrap();
        if row.access_count == 1 {
            assert!(row.last_accessed_at.is_some());
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("access telemetry never recorded");
}

#[test]
fn verify_recovery_key_accepts_only_the_current_phrase() {
    let engine = Engine::open_in_memory().unwrap();
    let (_, mnemonic) = engine.encryption().create_key("u1", PIN).unwrap();

    assert!(engine.recovery().verify_recovery_key("u1", &mnemonic).unwrap());

    // A different valid mnemonic and outright garbage both verify false,
    // never error
    let other = sealbox_crypto::generate_mnemonic().unwrap();
    assert!(!engine.recovery().verify_recovery_key("u1", &other).unwrap());
    assert!(!engine
        .recovery()
        .verify_recovery_key("u1", "definitely not a mnemonic")
        .unwrap());

    let err = engine
        .recovery()
        .verify_recovery_key("ghost", &mnemonic)
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn reset_pin_with_recovery_swaps_credentials() {
    let engine = Engine::open_in_memory().unwrap();
    let (_, mnemonic) = engine.encryption().create_key("u1", PIN).unwrap();
    let stored = engine
        .encryption()
        .encrypt_and_store("u1", PIN, api_key_input("k"), "sk-test-123")
        .unwrap();

    let new_mnemonic = engine
        .recovery()
        .reset_pin_with_recovery("u1", &mnemonic, "N3w!Pin42")
        .unwrap();
    assert_ne!(new_mnemonic, mnemonic);

    // Old PIN is dead, new PIN opens the same secret
    let err = engine
        .encryption()
        .decrypt("u1", &stored.secret_id, PIN)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidCredentials));

    let opened = engine
        .encryption()
        .decrypt("u1", &stored.secret_id, "N3w!Pin42")
        .await
        .unwrap();
    assert_eq!(opened.plaintext, "sk-test-123");

    // Old phrase invalidated, new one live
    assert!(!engine.recovery().verify_recovery_key("u1", &mnemonic).unwrap());
    assert!(engine
        .recovery()
        .verify_recovery_key("u1", &new_mnemonic)
        .unwrap());
}

#[test]
fn recovery_reset_never_touches_stored_ciphertext() {
    let engine = Engine::open_in_memory().unwrap();
    let (_, mnemonic) = engine.encryption().create_key("u1", PIN).unwrap();
    let stored = engine
        .encryption()
        .encrypt_and_store("u1", PIN, api_key_input("k"), "sk-test-123")
        .unwrap();

    let keys = engine.database().key_store();
    let secrets = engine.database().secret_store();
    let record_before = keys.get("u1").unwrap().unwrap();
    let row_before = secrets.get("u1", &stored.secret_id).unwrap().unwrap();

    engine
        .recovery()
        .reset_pin_with_recovery("u1", &mnemonic, "N3w!Pin42")
        .unwrap();

    let record_after = keys.get("u1").unwrap().unwrap();
    assert_ne!(record_after.kek_salt, record_before.kek_salt);
    assert_ne!(record_after.wrapped_dek, record_before.wrapped_dek);
    assert_ne!(record_after.security_pin_hash, record_before.security_pin_hash);
    assert_ne!(record_after.recovery_key_hash, record_before.recovery_key_hash);
    assert_ne!(
        record_after.wrapped_dek_recovery,
        record_before.wrapped_dek_recovery
    );
    // Only the wrapping changed, so the DEK version stays put
    assert_eq!(record_after.dek_version, record_before.dek_version);

    // Every ciphertext byte is identical
    let row_after = secrets.get("u1", &stored.secret_id).unwrap().unwrap();
    assert_eq!(row_after.ciphertext, row_before.ciphertext);
    assert_eq!(row_after.nonce, row_before.nonce);
    assert_eq!(row_after.auth_tag, row_before.auth_tag);
    assert_eq!(row_after.dek_version, row_before.dek_version);
}

#[test]
fn reset_pin_rejects_bad_inputs() {
    let engine = Engine::open_in_memory().unwrap();
    let (_, mnemonic) = engine.encryption().create_key("u1", PIN).unwrap();

    let err = engine
        .recovery()
        .reset_pin_with_recovery("u1", "not a mnemonic", "N3w!Pin42")
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidFormat(_)));

    let err = engine
        .recovery()
        .reset_pin_with_recovery("u1", &mnemonic, "short")
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidFormat(_)));

    // Valid-but-wrong phrase is a credential failure
    let other = sealbox_crypto::generate_mnemonic().unwrap();
    let err = engine
        .recovery()
        .reset_pin_with_recovery("u1", &other, "N3w!Pin42")
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidCredentials));
}
