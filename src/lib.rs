//! Keywarden keeps a rotating set of asymmetric signing keys for an OpenID
//! Connect provider.
//!
//! The newest key signs new tokens; every unexpired key stays available for
//! validation. Keys can be persisted (encrypted) so a restart picks up where
//! the previous process left off.

mod audit;

pub mod clock;
pub mod config;
pub mod error;
pub mod generator;
pub mod jwks;
pub mod key;
pub mod manager;
pub mod material;
pub mod ring;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod telemetry;

#[cfg(test)]
mod testutil;

pub use error::{KeyResult, KeyStoreError, StoreError, StoreResult};
pub use manager::{KeyLifecycleManager, SigningCredentialStore, ValidationKeysStore};
pub use scheduler::RotationScheduler;
