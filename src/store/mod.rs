//! Persistence for key material.
//!
//! The lifecycle manager only needs three operations from storage, captured
//! by [`KeyMaterialStore`]. [`MemoryKeyMaterialStore`] keeps rows in process
//! memory; [`SqliteKeyMaterialStore`] keeps them in a SQLite database so
//! rotation survives restarts.

mod memory;
mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{error::StoreResult, material::KeyMaterial};

pub use memory::MemoryKeyMaterialStore;
pub use sqlite::SqliteKeyMaterialStore;

/// Storage contract for key material.
///
/// Failures are reported as [`StoreError`](crate::error::StoreError) and are
/// always recoverable: callers log them and retry on the next rotation.
#[async_trait]
pub trait KeyMaterialStore: Send + Sync {
    /// Inserts the row, or replaces the row with the same `key_id`.
    async fn save(&self, material: &KeyMaterial) -> StoreResult<()>;

    /// Deletes every row whose expiry is strictly before `now`.
    ///
    /// Returns the number of rows removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<usize>;

    /// Every stored row, expired or not.
    async fn load_all(&self) -> StoreResult<Vec<KeyMaterial>>;
}
