//! SQLite-backed key material storage.

use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, Row};
use tracing::warn;

use super::KeyMaterialStore;
use crate::{
    error::{StoreError, StoreResult},
    material::KeyMaterial,
};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS keys(
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key_id TEXT NOT NULL UNIQUE,
    algorithm TEXT NOT NULL,
    key_data BLOB NOT NULL,
    expiry_date INTEGER NOT NULL
)";

/// [`KeyMaterialStore`] over a single `keys` table.
///
/// Expiry is stored as unix nanoseconds so it reads back exactly as it was
/// written. Rows that cannot be decoded are skipped with a warning rather
/// than failing the whole load. rusqlite is synchronous, so every
/// call runs on the blocking pool while the async caller awaits.
#[derive(Clone, Debug)]
pub struct SqliteKeyMaterialStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteKeyMaterialStore {
    /// Opens (or creates) the database file and ensures the schema exists.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute(SCHEMA, [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || f(&conn.lock())).await?
    }
}

#[async_trait]
impl KeyMaterialStore for SqliteKeyMaterialStore {
    async fn save(&self, material: &KeyMaterial) -> StoreResult<()> {
        let material = material.clone();
        let expiry = to_nanos(&material.key_id, material.expiry_date)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO keys (key_id, algorithm, key_data, expiry_date)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key_id) DO UPDATE SET
                    algorithm = excluded.algorithm,
                    key_data = excluded.key_data,
                    expiry_date = excluded.expiry_date",
                rusqlite::params![
                    material.key_id,
                    material.algorithm,
                    material.key_data,
                    expiry
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        // Past the representable range every stored row is already expired.
        let now = now.timestamp_nanos_opt().unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM keys WHERE expiry_date < ?",
                rusqlite::params![now],
            )?;
            Ok(removed)
        })
        .await
    }

    async fn load_all(&self) -> StoreResult<Vec<KeyMaterial>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT key_id, algorithm, key_data, expiry_date FROM keys ORDER BY id",
            )?;
            let mut rows = stmt.query([])?;

            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                match material_from_row(row) {
                    Ok(material) => out.push(material),
                    Err(e @ StoreError::Corrupt { .. }) => {
                        warn!(error = %e, "skipping unreadable key row");
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok(out)
        })
        .await
    }
}

fn to_nanos(key_id: &str, at: DateTime<Utc>) -> StoreResult<i64> {
    at.timestamp_nanos_opt().ok_or_else(|| StoreError::Corrupt {
        key_id: key_id.to_string(),
        reason: format!("timestamp {at} cannot be stored in nanoseconds"),
    })
}

/// Maps one row. Column type mismatches become [`StoreError::Corrupt`].
fn material_from_row(row: &Row<'_>) -> StoreResult<KeyMaterial> {
    let key_id: String = row.get(0)?;
    let corrupt = |e: rusqlite::Error| StoreError::Corrupt {
        key_id: key_id.clone(),
        reason: e.to_string(),
    };
    let algorithm: String = row.get(1).map_err(corrupt)?;
    let key_data: Vec<u8> = row.get(2).map_err(corrupt)?;
    let expiry: i64 = row.get(3).map_err(corrupt)?;

    Ok(KeyMaterial {
        key_id,
        algorithm,
        key_data,
        expiry_date: DateTime::<Utc>::from_timestamp_nanos(expiry),
    })
}
