#![allow(dead_code)]

use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;

use chrono::{DateTime, Utc};
use keywarden::{
    KeyLifecycleManager, KeyResult,
    config::KeyRotationOptions,
    generator::KeyGenerator,
    key::{SigningAlgorithm, SigningKey, SigningKeyInfo},
    material::KeySealer,
    store::KeyMaterialStore,
};
use rsa::RsaPrivateKey;

/// Hands out one cached RSA key under fresh ids.
#[derive(Debug, Default)]
pub struct CachedKeyGenerator {
    calls: AtomicUsize,
}

impl CachedKeyGenerator {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl KeyGenerator for CachedKeyGenerator {
    fn generate(
        &self,
        issued_at: DateTime<Utc>,
        expiry_date: DateTime<Utc>,
    ) -> KeyResult<SigningKeyInfo> {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        static NEXT: AtomicUsize = AtomicUsize::new(0);

        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = KEY
            .get_or_init(|| RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap())
            .clone();
        let key_id = format!(
            "{}-{}",
            issued_at.timestamp_millis(),
            NEXT.fetch_add(1, Ordering::SeqCst)
        );
        Ok(SigningKeyInfo::new(
            key_id,
            SigningKey::Rsa(key),
            SigningAlgorithm::RS256,
            expiry_date,
        ))
    }

    fn algorithm(&self) -> SigningAlgorithm {
        SigningAlgorithm::RS256
    }
}

pub fn options() -> KeyRotationOptions {
    KeyRotationOptions {
        key_lifetime: Duration::from_secs(24 * 3600),
        key_rotation_interval: Duration::from_secs(12 * 3600),
    }
}

pub fn sealer() -> KeySealer {
    KeySealer::new(&[3u8; 32])
}

pub fn memory_manager(generator: Arc<CachedKeyGenerator>) -> Arc<KeyLifecycleManager> {
    Arc::new(
        KeyLifecycleManager::builder(options())
            .generator(generator)
            .build()
            .unwrap(),
    )
}

pub fn persistent_manager(
    generator: Arc<CachedKeyGenerator>,
    store: Arc<dyn KeyMaterialStore>,
) -> Arc<KeyLifecycleManager> {
    Arc::new(
        KeyLifecycleManager::builder(options())
            .generator(generator)
            .persistence(store, sealer())
            .build()
            .unwrap(),
    )
}
