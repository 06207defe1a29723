//! Record store collaborator - versioned single-record persistence.
//!
//! The registry persists its code collection through this seam. Writes carry
//! the version observed at read time; a stale version fails with a
//! distinguished conflict so the caller can re-read and retry.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

/// Opaque optimistic-concurrency token returned by reads and refreshed by
/// successful writes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Version(pub String);

/// Errors surfaced by a record store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The expected version was stale, or a create raced another create.
    #[error("version conflict for {owner}/{key}")]
    VersionConflict { owner: String, key: String },

    /// Backend I/O failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for guildlink_types::LinkError {
    fn from(err: StoreError) -> Self {
        guildlink_types::LinkError::Internal(err.to_string())
    }
}

/// Durable single-record persistence with optimistic versioning.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Read the record under `owner`/`key`, with its current version.
    async fn read(
        &self,
        owner: &str,
        key: &str,
    ) -> Result<Option<(serde_json::Value, Version)>, StoreError>;

    /// Write the record under `owner`/`key`.
    ///
    /// `expected: None` creates the record and conflicts if it already
    /// exists; `expected: Some(v)` replaces it and conflicts unless `v` is
    /// still current.
    async fn write(
        &self,
        owner: &str,
        key: &str,
        value: serde_json::Value,
        expected: Option<&Version>,
    ) -> Result<Version, StoreError>;
}

/// In-memory record store for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<(String, String), (serde_json::Value, u64)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn read(
        &self,
        owner: &str,
        key: &str,
    ) -> Result<Option<(serde_json::Value, Version)>, StoreError> {
        let records = self
            .records
            .lock()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(records
            .get(&(owner.to_owned(), key.to_owned()))
            .map(|(value, counter)| (value.clone(), Version(counter.to_string()))))
    }

    async fn write(
        &self,
        owner: &str,
        key: &str,
        value: serde_json::Value,
        expected: Option<&Version>,
    ) -> Result<Version, StoreError> {
        let mut records = self
            .records
            .lock()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let slot = (owner.to_owned(), key.to_owned());
        let current = records.get(&slot).map(|(_, counter)| *counter);

        let next = match (expected, current) {
            (None, None) => 1,
            (Some(v), Some(counter)) if v.0 == counter.to_string() => counter + 1,
            _ => {
                return Err(StoreError::VersionConflict {
                    owner: owner.to_owned(),
                    key: key.to_owned(),
                })
            }
        };

        records.insert(slot, (value, next));
        Ok(Version(next.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_then_update() {
        let store = MemoryStore::new();
        let v1 = store
            .write("system", "k", json!({"a": 1}), None)
            .await
            .unwrap();
        let (value, version) = store.read("system", "k").await.unwrap().unwrap();
        assert_eq!(value, json!({"a": 1}));
        assert_eq!(version, v1);

        store
            .write("system", "k", json!({"a": 2}), Some(&v1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let store = MemoryStore::new();
        let v1 = store.write("system", "k", json!(1), None).await.unwrap();
        store.write("system", "k", json!(2), Some(&v1)).await.unwrap();

        let err = store
            .write("system", "k", json!(3), Some(&v1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { .. }));
    }

    #[tokio::test]
    async fn test_create_conflicts_with_existing_record() {
        let store = MemoryStore::new();
        store.write("system", "k", json!(1), None).await.unwrap();
        let err = store.write("system", "k", json!(2), None).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { .. }));
    }
}
