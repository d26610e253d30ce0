//! Shared fixtures for unit tests.
//!
//! RSA generation dominates test time, so every fixture key shares one
//! lazily generated private key and differs only in id and expiry.

use std::sync::{
    OnceLock,
    atomic::{AtomicUsize, Ordering},
};

use chrono::{DateTime, Utc};
use rsa::RsaPrivateKey;

use crate::{
    error::KeyResult,
    generator::KeyGenerator,
    key::{SigningAlgorithm, SigningKey, SigningKeyInfo},
    material::KeySealer,
};

fn shared_rsa_key() -> RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| {
        RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("generate test key")
    })
    .clone()
}

pub fn key_info(key_id: impl Into<String>, expiry_date: DateTime<Utc>) -> SigningKeyInfo {
    SigningKeyInfo::new(
        key_id,
        SigningKey::Rsa(shared_rsa_key()),
        SigningAlgorithm::RS256,
        expiry_date,
    )
}

pub fn sealer() -> KeySealer {
    KeySealer::new(&[42u8; 32])
}

/// Generator that hands out the shared key under fresh ids and counts calls.
#[derive(Debug, Default)]
pub struct CountingGenerator {
    calls: AtomicUsize,
}

impl CountingGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl KeyGenerator for CountingGenerator {
    fn generate(
        &self,
        _issued_at: DateTime<Utc>,
        expiry_date: DateTime<Utc>,
    ) -> KeyResult<SigningKeyInfo> {
        static NEXT_ID: AtomicUsize = AtomicUsize::new(1);
        self.calls.fetch_add(1, Ordering::SeqCst);
        let id = NEXT_ID.fetch_add(1, Ordering::SeqCst);
        Ok(key_info(format!("test-key-{id}"), expiry_date))
    }

    fn algorithm(&self) -> SigningAlgorithm {
        SigningAlgorithm::RS256
    }
}
