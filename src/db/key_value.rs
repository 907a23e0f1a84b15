//! Typed key/value store backed by the `key_values` table.
//!
//! Each [`Key`] fixes the Rust type of its value, so callers never parse
//! strings themselves:
//!
//! ```no_run
//! use starkex_sync::db::{create_pool, KeyValueStore, key_value::LAST_BLOCK_NUMBER_SYNCED};
//!
//! # async fn example() -> starkex_sync::error::SyncResult<()> {
//! let store = KeyValueStore::new(create_pool("sqlite::memory:").await?);
//! let cursor = store
//!     .find_by_key_with_default(LAST_BLOCK_NUMBER_SYNCED, 11_813_207)
//!     .await?;
//! store.add_or_update(LAST_BLOCK_NUMBER_SYNCED, &(cursor + 1)).await?;
//! # Ok(())
//! # }
//! ```

use std::marker::PhantomData;

use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{SyncError, SyncResult};
use crate::model::FreezeStatus;

/// A value that can be stored under a [`Key`].
pub trait StoredValue: Sized {
    /// Encodes the value for storage.
    fn encode(&self) -> String;

    /// Decodes a stored value.
    ///
    /// # Errors
    ///
    /// Returns a decoding error if the stored text is malformed.
    fn decode(raw: &str) -> SyncResult<Self>;
}

impl StoredValue for u64 {
    fn encode(&self) -> String {
        self.to_string()
    }

    fn decode(raw: &str) -> SyncResult<Self> {
        raw.parse().map_err(|e| {
            SyncError::decoding(format!("invalid integer value '{raw}'"), Some(Box::new(e)))
        })
    }
}

impl StoredValue for FreezeStatus {
    fn encode(&self) -> String {
        self.as_str().to_string()
    }

    fn decode(raw: &str) -> SyncResult<Self> {
        raw.parse()
    }
}

/// A key with a fixed value type.
#[derive(Debug)]
pub struct Key<T> {
    name: &'static str,
    _value: PhantomData<fn() -> T>,
}

impl<T> Key<T> {
    /// Declares a key.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _value: PhantomData,
        }
    }

    /// Stored key name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for Key<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Key<T> {}

/// Last block number fully synced.
pub const LAST_BLOCK_NUMBER_SYNCED: Key<u64> = Key::new("lastBlockNumberSynced");

/// Persisted freeze status.
pub const FREEZE_STATUS: Key<FreezeStatus> = Key::new("freezeStatus");

/// Number of the last one-time data migration applied.
pub const SOFTWARE_MIGRATION_NUMBER: Key<u64> = Key::new("softwareMigrationNumber");

/// Typed access to the `key_values` table.
#[derive(Debug, Clone)]
pub struct KeyValueStore {
    pool: SqlitePool,
}

impl KeyValueStore {
    /// Creates a store on the given pool.
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Returns the value under `key`, if any.
    pub async fn find_by_key<T: StoredValue>(&self, key: Key<T>) -> SyncResult<Option<T>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM key_values WHERE key = ?")
            .bind(key.name())
            .fetch_optional(&self.pool)
            .await
            .map_err(SyncError::sqlx(format!("Failed to read key '{}'", key.name())))?;

        row.map(|(raw,)| T::decode(&raw)).transpose()
    }

    /// Returns the value under `key`, or `default` if absent.
    pub async fn find_by_key_with_default<T: StoredValue>(
        &self,
        key: Key<T>,
        default: T,
    ) -> SyncResult<T> {
        Ok(self.find_by_key(key).await?.unwrap_or(default))
    }

    /// Inserts or replaces the value under `key`.
    pub async fn add_or_update<T: StoredValue>(&self, key: Key<T>, value: &T) -> SyncResult<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(SyncError::sqlx("Failed to acquire connection"))?;
        Self::add_or_update_in(&mut conn, key, value).await
    }

    /// Inserts or replaces the value under `key` on an existing connection.
    pub async fn add_or_update_in<T: StoredValue>(
        conn: &mut SqliteConnection,
        key: Key<T>,
        value: &T,
    ) -> SyncResult<()> {
        let encoded = value.encode();
        debug!(key = key.name(), value = %encoded, "Writing key value");
        sqlx::query(
            r#"
            INSERT INTO key_values (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key.name())
        .bind(encoded)
        .execute(conn)
        .await
        .map_err(SyncError::sqlx(format!("Failed to write key '{}'", key.name())))?;
        Ok(())
    }

    /// Removes `key`. Missing keys are not an error.
    pub async fn delete_by_key<T>(&self, key: Key<T>) -> SyncResult<()> {
        sqlx::query("DELETE FROM key_values WHERE key = ?")
            .bind(key.name())
            .execute(&self.pool)
            .await
            .map_err(SyncError::sqlx(format!("Failed to delete key '{}'", key.name())))?;
        Ok(())
    }

    /// All raw entries, ordered by key.
    pub async fn get_all(&self) -> SyncResult<Vec<(String, String)>> {
        sqlx::query_as("SELECT key, value FROM key_values ORDER BY key")
            .fetch_all(&self.pool)
            .await
            .map_err(SyncError::sqlx("Failed to read key values"))
    }

    /// Removes every entry.
    pub async fn delete_all(&self) -> SyncResult<()> {
        sqlx::query("DELETE FROM key_values")
            .execute(&self.pool)
            .await
            .map_err(SyncError::sqlx("Failed to clear key values"))?;
        Ok(())
    }
}
