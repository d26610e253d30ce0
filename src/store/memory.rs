use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::KeyMaterialStore;
use crate::{
    error::{StoreError, StoreResult},
    material::KeyMaterial,
};

/// In-memory [`KeyMaterialStore`].
///
/// Shared between manager instances (through an `Arc`) it behaves like a
/// database that outlives a process, which is how restarts are simulated in
/// tests. It can also be switched offline to exercise failure handling.
#[derive(Debug, Default)]
pub struct MemoryKeyMaterialStore {
    rows: RwLock<HashMap<String, KeyMaterial>>,
    unavailable: AtomicBool,
}

impl MemoryKeyMaterialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    pub fn contains(&self, key_id: &str) -> bool {
        self.rows.read().contains_key(key_id)
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyMaterialStore for MemoryKeyMaterialStore {
    async fn save(&self, material: &KeyMaterial) -> StoreResult<()> {
        self.check_available()?;
        self.rows
            .write()
            .insert(material.key_id.clone(), material.clone());
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        self.check_available()?;
        let mut rows = self.rows.write();
        let before = rows.len();
        rows.retain(|_, m| m.expiry_date >= now);
        Ok(before - rows.len())
    }

    async fn load_all(&self) -> StoreResult<Vec<KeyMaterial>> {
        self.check_available()?;
        Ok(self.rows.read().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn material(key_id: &str, expiry_date: DateTime<Utc>) -> KeyMaterial {
        KeyMaterial {
            key_id: key_id.to_string(),
            algorithm: "RS256".to_string(),
            key_data: vec![1, 2, 3],
            expiry_date,
        }
    }

    #[tokio::test]
    async fn save_is_an_upsert() {
        let store = MemoryKeyMaterialStore::new();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        store.save(&material("k1", now)).await.unwrap();
        let mut replacement = material("k1", now);
        replacement.key_data = vec![9];
        store.save(&replacement).await.unwrap();

        let rows = store.load_all().await.unwrap();
        assert_eq!(rows, vec![replacement]);
    }

    #[tokio::test]
    async fn purge_keeps_rows_expiring_now_or_later() {
        let store = MemoryKeyMaterialStore::new();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        store
            .save(&material("past", now - Duration::seconds(1)))
            .await
            .unwrap();
        store.save(&material("now", now)).await.unwrap();
        store
            .save(&material("future", now + Duration::hours(1)))
            .await
            .unwrap();

        assert_eq!(store.purge_expired(now).await.unwrap(), 1);
        assert!(!store.contains("past"));
        assert!(store.contains("now"));
        assert!(store.contains("future"));
    }

    #[tokio::test]
    async fn load_all_returns_expired_rows_too() {
        let store = MemoryKeyMaterialStore::new();
        let long_ago = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        store.save(&material("ancient", long_ago)).await.unwrap();

        assert_eq!(store.load_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn offline_store_reports_unavailable() {
        let store = MemoryKeyMaterialStore::new();
        store.set_unavailable(true);

        let err = store.load_all().await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));

        store.set_unavailable(false);
        assert!(store.load_all().await.unwrap().is_empty());
    }
}
