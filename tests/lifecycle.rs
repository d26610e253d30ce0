// End-to-end tests: sign with the current key, validate with the published set

mod common;

use std::sync::Arc;

use jsonwebtoken::{DecodingKey, Validation, decode, decode_header, encode};
use keywarden::{
    KeyLifecycleManager, RotationScheduler, SigningCredentialStore, ValidationKeysStore,
    jwks::Jwks,
    manager::LoadState,
    store::{KeyMaterialStore, SqliteKeyMaterialStore},
};
use serde::{Deserialize, Serialize};

use common::{CachedKeyGenerator, persistent_manager};

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Claims {
    sub: String,
    exp: i64,
}

fn claims() -> Claims {
    Claims {
        sub: "alice".to_string(),
        exp: chrono::Utc::now().timestamp() + 600,
    }
}

async fn issue(issuer: &dyn SigningCredentialStore) -> String {
    let key = issuer.signing_credentials().await.unwrap();
    encode(&key.header(), &claims(), &key.key().encoding_key().unwrap()).unwrap()
}

/// Validates the way a relying party would: pick the JWK by `kid`.
async fn verify(validator: &dyn ValidationKeysStore, token: &str) -> Claims {
    let header = decode_header(token).unwrap();
    let kid = header.kid.unwrap();

    let keys = validator.validation_keys().await.unwrap();
    let jwks = Jwks::from_keys(&keys);
    let jwk = jwks.keys.iter().find(|k| k.kid == kid).unwrap();

    let decoding_key = DecodingKey::from_rsa_components(&jwk.n, &jwk.e).unwrap();
    decode::<Claims>(token, &decoding_key, &Validation::new(header.alg))
        .unwrap()
        .claims
}

#[tokio::test]
async fn issued_token_verifies_against_published_keys() {
    let store = Arc::new(SqliteKeyMaterialStore::open_in_memory().unwrap());
    let manager = persistent_manager(Arc::new(CachedKeyGenerator::default()), store);

    let token = issue(manager.as_ref()).await;
    assert_eq!(verify(manager.as_ref(), &token).await.sub, "alice");
}

#[tokio::test]
async fn tokens_survive_a_restart_through_sqlite() {
    let path = std::env::temp_dir().join(format!(
        "keywarden-restart-{}-{}.db",
        std::process::id(),
        chrono::Utc::now().timestamp_nanos_opt().unwrap()
    ));
    let generator = Arc::new(CachedKeyGenerator::default());

    let (token, kid) = {
        let store = Arc::new(SqliteKeyMaterialStore::open(&path).unwrap());
        let before = persistent_manager(generator.clone(), store.clone());
        let token = issue(before.as_ref()).await;
        let kid = before.signing_credentials().await.unwrap().key_id().to_string();
        assert_eq!(store.load_all().await.unwrap().len(), 1);
        (token, kid)
    };

    let store = Arc::new(SqliteKeyMaterialStore::open(&path).unwrap());
    let after = persistent_manager(generator.clone(), store);

    assert_eq!(after.load_state().await, LoadState::Uninitialized);
    assert_eq!(verify(after.as_ref(), &token).await.sub, "alice");
    assert_eq!(after.load_state().await, LoadState::Ready);
    assert_eq!(after.signing_credentials().await.unwrap().key_id(), kid);
    assert_eq!(generator.calls(), 1);

    drop(after);
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn stored_rows_do_not_contain_the_private_key() {
    let store = Arc::new(SqliteKeyMaterialStore::open_in_memory().unwrap());
    let manager = persistent_manager(Arc::new(CachedKeyGenerator::default()), store.clone());
    let key = manager.signing_credentials().await.unwrap();

    let rows = store.load_all().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].key_id, key.key_id());
    assert_eq!(rows[0].algorithm, "RS256");
    assert_eq!(rows[0].expiry_date, key.expiry_date());

    let plain = key.key().to_pkcs8_der().unwrap();
    assert!(
        !rows[0]
            .key_data
            .windows(plain.len())
            .any(|w| w == plain.as_slice())
    );
}

#[tokio::test]
async fn scheduler_keeps_signing_and_validation_in_step() {
    let store = Arc::new(SqliteKeyMaterialStore::open_in_memory().unwrap());
    let manager: Arc<KeyLifecycleManager> =
        persistent_manager(Arc::new(CachedKeyGenerator::default()), store.clone());

    let scheduler = RotationScheduler::start(manager.clone());
    let token = issue(manager.as_ref()).await;
    assert_eq!(verify(manager.as_ref(), &token).await.sub, "alice");

    scheduler.stop().await;
    assert!(!store.load_all().await.unwrap().is_empty());
}
