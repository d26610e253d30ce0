//! The key lifecycle manager.
//!
//! This is what token issuance and validation depend on. It owns the
//! [`KeyRing`], the optional persistence layer and the key generator, and it
//! runs the cold-start sequence exactly once:
//!
//! ```text
//! Uninitialized ──first read or tick──► Loading ──► Ready
//!       ▲                                  │
//!       └────────── load failed ───────────┘
//! ```
//!
//! While `Loading`, persisted keys are restored. A rotation tick then adds
//! the key it just minted; a reader that found nothing usable synthesizes
//! exactly one. `Ready` is never reached with an empty ring, and once it is
//! reached readers skip the latch entirely.
//!
//! Within a rotation the key is added to memory before it is written to
//! storage. A freshly minted key can therefore sign before it is durable;
//! if the write fails the key stays memory-only until it expires.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use chrono::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    clock::{Clock, SystemClock},
    config::{ConfigError, KeyRotationOptions},
    error::{KeyResult, KeyStoreError},
    generator::{KeyGenerator, RsaKeyGenerator},
    key::{SigningAlgorithm, SigningKeyInfo},
    material::KeySealer,
    ring::KeyRing,
    store::KeyMaterialStore,
};

/// Capability used by token issuance.
#[async_trait]
pub trait SigningCredentialStore: Send + Sync {
    /// The key new tokens must be signed with.
    async fn signing_credentials(&self) -> KeyResult<SigningKeyInfo>;
}

/// Capability used by token validation.
#[async_trait]
pub trait ValidationKeysStore: Send + Sync {
    /// Every key a previously issued token may have been signed with.
    async fn validation_keys(&self) -> KeyResult<Vec<SigningKeyInfo>>;
}

/// Cold-start latch states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadState {
    Uninitialized,
    /// A load is in progress, or a previous one was abandoned mid-flight.
    Loading,
    Ready,
}

/// Result of one rotation tick.
#[derive(Clone, Debug)]
pub struct RotationOutcome {
    pub key_id: String,
    /// False when persistence is configured and the new key failed to save.
    pub persisted: bool,
    pub evicted: Vec<String>,
}

struct Persistence {
    store: Arc<dyn KeyMaterialStore>,
    sealer: KeySealer,
}

impl Persistence {
    async fn save(&self, key: &SigningKeyInfo) -> KeyResult<()> {
        let material = self.sealer.seal(key)?;
        self.store.save(&material).await?;
        Ok(())
    }
}

pub struct KeyLifecycleManager {
    ring: KeyRing,
    persistence: Option<Persistence>,
    generator: Arc<dyn KeyGenerator>,
    clock: Arc<dyn Clock>,
    options: KeyRotationOptions,
    key_lifetime: Duration,
    state: Mutex<LoadState>,
    /// Mirrors `state == Ready` for the lock-free read path.
    ready: AtomicBool,
}

pub struct KeyLifecycleManagerBuilder {
    options: KeyRotationOptions,
    persistence: Option<Persistence>,
    generator: Option<Arc<dyn KeyGenerator>>,
    clock: Option<Arc<dyn Clock>>,
}

impl KeyLifecycleManagerBuilder {
    /// Enables durable storage. Without it the manager runs memory-only and
    /// every restart begins with a freshly synthesized key.
    pub fn persistence(mut self, store: Arc<dyn KeyMaterialStore>, sealer: KeySealer) -> Self {
        self.persistence = Some(Persistence { store, sealer });
        self
    }

    pub fn generator(mut self, generator: Arc<dyn KeyGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<KeyLifecycleManager, ConfigError> {
        self.options.validate()?;
        let key_lifetime = self.options.key_lifetime_delta()?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let generator = self
            .generator
            .unwrap_or_else(|| Arc::new(RsaKeyGenerator::default()));

        Ok(KeyLifecycleManager {
            ring: KeyRing::new(clock.clone()),
            persistence: self.persistence,
            generator,
            clock,
            options: self.options,
            key_lifetime,
            state: Mutex::new(LoadState::Uninitialized),
            ready: AtomicBool::new(false),
        })
    }
}

impl KeyLifecycleManager {
    pub fn builder(options: KeyRotationOptions) -> KeyLifecycleManagerBuilder {
        KeyLifecycleManagerBuilder {
            options,
            persistence: None,
            generator: None,
            clock: None,
        }
    }

    pub fn options(&self) -> &KeyRotationOptions {
        &self.options
    }

    pub fn signing_algorithm(&self) -> SigningAlgorithm {
        self.generator.algorithm()
    }

    pub fn key_ring(&self) -> &KeyRing {
        &self.ring
    }

    pub async fn load_state(&self) -> LoadState {
        *self.state.lock().await
    }

    /// Every unexpired key, after the cold start has completed.
    pub async fn validation_keys(&self) -> KeyResult<Vec<SigningKeyInfo>> {
        self.ensure_ready().await?;
        Ok(self.ring.validation_keys())
    }

    /// The newest unexpired key, after the cold start has completed.
    ///
    /// Fails with [`KeyStoreError::NoSigningKey`] when every key has expired
    /// between rotations.
    pub async fn signing_credentials(&self) -> KeyResult<SigningKeyInfo> {
        self.ensure_ready().await?;
        self.ring.signing_credentials().ok_or_else(|| {
            warn!("signing key requested but the key ring holds no unexpired key");
            KeyStoreError::NoSigningKey
        })
    }

    /// Runs the cold-start sequence unless it already completed.
    ///
    /// The state lock is held for the whole sequence, so concurrent first
    /// callers wait for the one that got there first instead of each
    /// loading or minting on their own.
    async fn ensure_ready(&self) -> KeyResult<()> {
        if self.ready.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        if *state == LoadState::Ready {
            return Ok(());
        }
        self.run_cold_start(&mut state, None).await
    }

    /// Adds a key minted by a rotation tick. If the cold start has not run
    /// yet, the key is added under the latch after the restored keys, taking
    /// the place of a synthesized key.
    async fn add_minted(&self, key: SigningKeyInfo) -> KeyResult<()> {
        if !self.ready.load(Ordering::Acquire) {
            let mut state = self.state.lock().await;
            if *state != LoadState::Ready {
                return self.run_cold_start(&mut state, Some(key)).await;
            }
        }
        self.ring.add_key(key)
    }

    async fn run_cold_start(
        &self,
        state: &mut LoadState,
        minted: Option<SigningKeyInfo>,
    ) -> KeyResult<()> {
        *state = LoadState::Loading;
        match self.cold_start(minted).await {
            Ok(()) => {
                *state = LoadState::Ready;
                self.ready.store(true, Ordering::Release);
                Ok(())
            }
            Err(e) => {
                *state = LoadState::Uninitialized;
                Err(e)
            }
        }
    }

    #[tracing::instrument(skip_all)]
    async fn cold_start(&self, minted: Option<SigningKeyInfo>) -> KeyResult<()> {
        if let Some(persistence) = &self.persistence {
            self.restore(persistence).await?;
        }

        if let Some(key) = minted {
            // Persisted by the tick that minted it.
            return self.ring.add_key(key);
        }

        if self.ring.is_empty() {
            info!("no usable persisted key, synthesizing one");
            let key = self.mint().await?;
            self.ring.add_key(key.clone())?;
            crate::audit!(key_id = %key.key_id(), event = "synthesized", "signing key synthesized");
            if let Some(persistence) = &self.persistence
                && let Err(e) = persistence.save(&key).await
            {
                warn!(key_id = %key.key_id(), error = %e, "failed to persist synthesized key");
            }
        }
        Ok(())
    }

    /// Loads persisted keys into the ring, oldest first.
    async fn restore(&self, persistence: &Persistence) -> KeyResult<()> {
        let now = self.clock.now();
        let mut rows = persistence.store.load_all().await?;
        let loaded = rows.len();

        rows.retain(|m| !m.is_expired_at(now));
        // Expiry is creation time plus a fixed lifetime, so this is creation order.
        rows.sort_by(|a, b| a.expiry_date.cmp(&b.expiry_date));

        let mut restored = 0;
        for material in rows {
            if self.ring.contains(&material.key_id) {
                continue;
            }
            match persistence.sealer.open(&material) {
                Ok(key) => {
                    self.ring.add_key(key)?;
                    restored += 1;
                    crate::audit!(key_id = %material.key_id, event = "restored", "signing key restored");
                }
                Err(e) => {
                    warn!(key_id = %material.key_id, error = %e, "skipping unreadable key material");
                }
            }
        }

        info!(loaded, restored, "persisted keys loaded");
        Ok(())
    }

    async fn mint(&self) -> KeyResult<SigningKeyInfo> {
        let issued_at = self.clock.now();
        let expiry_date = issued_at + self.key_lifetime;
        let generator = self.generator.clone();
        tokio::task::spawn_blocking(move || generator.generate(issued_at, expiry_date)).await?
    }

    /// One rotation tick: mint, add (finishing the cold start if needed),
    /// persist, purge storage, evict.
    ///
    /// Storage failures are logged and do not stop the tick; the in-memory
    /// ring still advances and the next tick tries again.
    #[tracing::instrument(skip(self))]
    pub(crate) async fn rotate(&self) -> KeyResult<RotationOutcome> {
        let key = self.mint().await?;
        let key_id = key.key_id().to_string();
        self.add_minted(key.clone()).await?;
        crate::audit!(key_id = %key_id, expires = %key.expiry_date(), event = "minted", "signing key rotated in");

        let mut persisted = true;
        if let Some(persistence) = &self.persistence {
            if let Err(e) = persistence.save(&key).await {
                warn!(key_id = %key_id, error = %e, "failed to persist new key");
                persisted = false;
            }
            match persistence.store.purge_expired(self.clock.now()).await {
                Ok(removed) => debug!(removed, "purged expired key material"),
                Err(e) => warn!(error = %e, "failed to purge expired key material"),
            }
        }

        let evicted = self.ring.evict_expired();
        for id in &evicted {
            crate::audit!(key_id = %id, event = "evicted", "signing key evicted");
        }

        Ok(RotationOutcome {
            key_id,
            persisted,
            evicted,
        })
    }
}

#[async_trait]
impl SigningCredentialStore for KeyLifecycleManager {
    async fn signing_credentials(&self) -> KeyResult<SigningKeyInfo> {
        KeyLifecycleManager::signing_credentials(self).await
    }
}

#[async_trait]
impl ValidationKeysStore for KeyLifecycleManager {
    async fn validation_keys(&self) -> KeyResult<Vec<SigningKeyInfo>> {
        KeyLifecycleManager::validation_keys(self).await
    }
}
