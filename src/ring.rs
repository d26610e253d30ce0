//! The key ring: the set of keys that can sign or validate right now.
//!
//! All operations take the same lock, so every call observes a complete
//! prior state. Expired keys are purged lazily by whichever operation runs
//! next, not at the exact expiry instant.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::{
    clock::Clock,
    error::{KeyResult, KeyStoreError},
    key::SigningKeyInfo,
};

#[derive(Debug)]
pub struct KeyRing {
    /// Insertion order, oldest first. The last entry is the signing key.
    keys: Mutex<Vec<SigningKeyInfo>>,
    clock: Arc<dyn Clock>,
}

impl KeyRing {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            keys: Mutex::new(Vec::new()),
            clock,
        }
    }

    /// Every unexpired key, oldest first.
    ///
    /// Order reflects insertion, not validation priority.
    pub fn validation_keys(&self) -> Vec<SigningKeyInfo> {
        let now = self.clock.now();
        let mut keys = self.keys.lock();
        purge(&mut keys, now);
        keys.clone()
    }

    /// The most recently added unexpired key, if any.
    pub fn signing_credentials(&self) -> Option<SigningKeyInfo> {
        let now = self.clock.now();
        let mut keys = self.keys.lock();
        purge(&mut keys, now);
        keys.last().cloned()
    }

    /// Appends a key. Keys sharing an expiry are fine; keys sharing an id are not.
    pub fn add_key(&self, info: SigningKeyInfo) -> KeyResult<()> {
        let mut keys = self.keys.lock();
        if keys.iter().any(|k| k.key_id() == info.key_id()) {
            return Err(KeyStoreError::DuplicateKeyId(info.key_id().to_string()));
        }
        keys.push(info);
        Ok(())
    }

    /// Removes every key whose expiry has passed and returns their ids.
    pub fn evict_expired(&self) -> Vec<String> {
        let now = self.clock.now();
        purge(&mut self.keys.lock(), now)
    }

    pub fn contains(&self, key_id: &str) -> bool {
        self.keys.lock().iter().any(|k| k.key_id() == key_id)
    }

    /// Number of keys held, expired or not.
    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }
}

fn purge(keys: &mut Vec<SigningKeyInfo>, now: DateTime<Utc>) -> Vec<String> {
    let mut removed = Vec::new();
    keys.retain(|k| {
        if k.is_expired_at(now) {
            removed.push(k.key_id().to_string());
            false
        } else {
            true
        }
    });
    removed
}
