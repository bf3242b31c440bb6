//! Key-value storage exposed by the host.
//!
//! Keys are `/`-separated paths. `list` returns the immediate children of a
//! prefix; children that have descendants are returned with a trailing `/`.

use crate::error::{SdkError, SdkResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// A stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEntry {
    /// Full key
    pub key: String,
    /// Raw bytes
    pub value: Vec<u8>,
}

impl StorageEntry {
    /// JSON-encode `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn from_json<T: Serialize>(key: impl Into<String>, value: &T) -> SdkResult<Self> {
        Ok(Self {
            key: key.into(),
            value: serde_json::to_vec(value)?,
        })
    }

    /// Decode the value as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not valid JSON for `T`.
    pub fn decode_json<T: DeserializeOwned>(&self) -> SdkResult<T> {
        Ok(serde_json::from_slice(&self.value)?)
    }
}

/// Host key-value storage.
#[async_trait]
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Immediate children of `prefix`.
    async fn list(&self, prefix: &str) -> SdkResult<Vec<String>>;

    /// Entry at `key`, if any.
    async fn get(&self, key: &str) -> SdkResult<Option<StorageEntry>>;

    /// Insert or overwrite an entry.
    async fn put(&self, entry: StorageEntry) -> SdkResult<()>;

    /// Remove an entry. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> SdkResult<()>;
}

/// In-memory [`Storage`].
///
/// Puts under a configured prefix can be made to fail, which lets tests
/// exercise partial-failure paths.
#[derive(Debug, Default)]
pub struct InmemStorage {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
    failing_prefix: RwLock<Option<String>>,
}

impl InmemStorage {
    /// Create empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every put under `prefix` fail until cleared with `None`.
    pub fn fail_puts_under(&self, prefix: Option<&str>) {
        *self.failing_prefix.write() = prefix.map(str::to_string);
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether storage is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl Storage for InmemStorage {
    async fn list(&self, prefix: &str) -> SdkResult<Vec<String>> {
        let entries = self.entries.read();
        let mut children = BTreeSet::new();
        for key in entries.keys().filter(|k| k.starts_with(prefix)) {
            let rest = &key[prefix.len()..];
            match rest.find('/') {
                Some(i) => children.insert(rest[..=i].to_string()),
                None => children.insert(rest.to_string()),
            };
        }
        Ok(children.into_iter().collect())
    }

    async fn get(&self, key: &str) -> SdkResult<Option<StorageEntry>> {
        Ok(self.entries.read().get(key).map(|value| StorageEntry {
            key: key.to_string(),
            value: value.clone(),
        }))
    }

    async fn put(&self, entry: StorageEntry) -> SdkResult<()> {
        if let Some(prefix) = self.failing_prefix.read().as_deref() {
            if entry.key.starts_with(prefix) {
                return Err(SdkError::storage(format!("put {} failed", entry.key)));
            }
        }
        self.entries.write().insert(entry.key, entry.value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> SdkResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Item {
        name: String,
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let storage = InmemStorage::new();
        let item = Item { name: "a".to_string() };
        storage.put(StorageEntry::from_json("config/a", &item).unwrap()).await.unwrap();

        let entry = storage.get("config/a").await.unwrap().unwrap();
        assert_eq!(entry.decode_json::<Item>().unwrap(), item);

        storage.delete("config/a").await.unwrap();
        assert!(storage.get("config/a").await.unwrap().is_none());
        storage.delete("config/a").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_immediate_children() {
        let storage = InmemStorage::new();
        for key in ["role/a", "role/b", "role/team/c", "static-role/x"] {
            storage
                .put(StorageEntry { key: key.to_string(), value: vec![] })
                .await
                .unwrap();
        }
        assert_eq!(storage.list("role/").await.unwrap(), vec!["a", "b", "team/"]);
        assert!(storage.list("missing/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failing_prefix() {
        let storage = InmemStorage::new();
        storage.fail_puts_under(Some("config/"));
        let entry = StorageEntry { key: "config/a".to_string(), value: vec![] };
        assert!(storage.put(entry.clone()).await.is_err());
        assert!(storage
            .put(StorageEntry { key: "role/a".to_string(), value: vec![] })
            .await
            .is_ok());

        storage.fail_puts_under(None);
        assert!(storage.put(entry).await.is_ok());
    }
}
