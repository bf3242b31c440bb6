//! Write-ahead log primitive.
//!
//! Engines record intent under `wal/<id>` before a side effect they cannot
//! undo atomically, delete the entry on success, and reconcile any leftovers
//! on startup or on a periodic rollback tick.

use crate::error::SdkResult;
use crate::storage::{Storage, StorageEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Storage prefix of WAL entries.
pub const WAL_PREFIX: &str = "wal/";

/// A stored WAL record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Kind tag chosen by the engine
    pub kind: String,
    /// Engine-defined payload
    pub data: Value,
    /// When the entry was written
    pub created_at: DateTime<Utc>,
}

impl WalEntry {
    /// Decode the payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not match `T`.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> SdkResult<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

/// Write a WAL entry and return its id.
///
/// # Errors
///
/// Returns an error if the payload cannot be encoded or storage fails.
pub async fn put_wal<T: Serialize + Sync>(
    storage: &dyn Storage,
    kind: &str,
    data: &T,
    now: DateTime<Utc>,
) -> SdkResult<String> {
    let id = uuid::Uuid::new_v4().to_string();
    let entry = WalEntry {
        kind: kind.to_string(),
        data: serde_json::to_value(data)?,
        created_at: now,
    };
    storage
        .put(StorageEntry::from_json(format!("{WAL_PREFIX}{id}"), &entry)?)
        .await?;
    tracing::trace!(wal_id = %id, kind, "wrote WAL entry");
    Ok(id)
}

/// Read a WAL entry.
///
/// # Errors
///
/// Returns an error on storage failure or a malformed entry.
pub async fn get_wal(storage: &dyn Storage, id: &str) -> SdkResult<Option<WalEntry>> {
    match storage.get(&format!("{WAL_PREFIX}{id}")).await? {
        Some(entry) => Ok(Some(entry.decode_json()?)),
        None => Ok(None),
    }
}

/// Delete a WAL entry. Deleting a missing entry is not an error.
///
/// # Errors
///
/// Returns an error on storage failure.
pub async fn delete_wal(storage: &dyn Storage, id: &str) -> SdkResult<()> {
    storage.delete(&format!("{WAL_PREFIX}{id}")).await
}

/// Ids of every WAL entry.
///
/// # Errors
///
/// Returns an error on storage failure.
pub async fn list_wal(storage: &dyn Storage) -> SdkResult<Vec<String>> {
    storage.list(WAL_PREFIX).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InmemStorage;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Intent {
        role: String,
    }

    #[tokio::test]
    async fn test_wal_lifecycle() {
        let storage = InmemStorage::new();
        let now = Utc::now();
        let id = put_wal(&storage, "staticRotationKey", &Intent { role: "r".to_string() }, now)
            .await
            .unwrap();

        assert_eq!(list_wal(&storage).await.unwrap(), vec![id.clone()]);

        let entry = get_wal(&storage, &id).await.unwrap().unwrap();
        assert_eq!(entry.kind, "staticRotationKey");
        assert_eq!(entry.created_at, now);
        assert_eq!(entry.data, json!({"role": "r"}));
        assert_eq!(entry.decode::<Intent>().unwrap().role, "r");

        delete_wal(&storage, &id).await.unwrap();
        assert!(get_wal(&storage, &id).await.unwrap().is_none());
        assert!(list_wal(&storage).await.unwrap().is_empty());
    }
}
