//! Local disk key store

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::backend::{PersistentKeyStore, check_key, key_digest};
use crate::error::StorageError;

/// Local disk key store
///
/// Each key maps to one file named after the key's SHA256:
/// `<base_path>/entries/<first 2 chars>/<digest>`
pub struct LocalKeyStore {
    base_path: PathBuf,
    tmp_path: PathBuf,
}

impl LocalKeyStore {
    /// Create a new local key store, creating directories as needed
    pub async fn new(base_path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        let tmp_path = base_path.join("tmp");

        fs::create_dir_all(base_path.join("entries")).await?;
        fs::create_dir_all(&tmp_path).await?;

        info!("Initialized local key store at {:?}", base_path);

        Ok(Self {
            base_path,
            tmp_path,
        })
    }

    /// Get the file path for a key
    fn entry_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        check_key(key)?;
        let digest = key_digest(key);

        // Use first 2 characters for sharding
        let shard = &digest[..2];
        Ok(self.base_path.join("entries").join(shard).join(&digest))
    }
}

#[async_trait]
impl PersistentKeyStore for LocalKeyStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        let path = self.entry_path(key)?;

        match fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<(), StorageError> {
        let path = self.entry_path(key)?;
        debug!("Writing {} bytes for key {} to {:?}", value.len(), key, path);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write atomically using a uniquely named temp file
        let temp_path = self.tmp_path.join(uuid::Uuid::new_v4().to_string());
        fs::write(&temp_path, &value).await?;
        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StorageError::Io(e));
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.entry_path(key)?;
        debug!("Deleting key {} at {:?}", key, path);

        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalKeyStore::new(dir.path()).await.unwrap();

        assert!(store.get("teams").await.unwrap().is_none());

        store
            .set("teams", Bytes::from_static(b"[{\"name\":\"Bears\"}]"))
            .await
            .unwrap();
        assert_eq!(
            store.get("teams").await.unwrap().unwrap(),
            Bytes::from_static(b"[{\"name\":\"Bears\"}]")
        );

        store.set("teams", Bytes::from_static(b"[]")).await.unwrap();
        assert_eq!(store.get("teams").await.unwrap().unwrap(), Bytes::from_static(b"[]"));

        assert!(store.delete("teams").await.unwrap());
        assert!(!store.delete("teams").await.unwrap());
        assert!(store.get("teams").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = LocalKeyStore::new(dir.path()).await.unwrap();
            store
                .set("picks:2025-10-05:static", Bytes::from_static(b"slate"))
                .await
                .unwrap();
        }

        let reopened = LocalKeyStore::new(dir.path()).await.unwrap();
        assert_eq!(
            reopened.get("picks:2025-10-05:static").await.unwrap().unwrap(),
            Bytes::from_static(b"slate")
        );
    }

    #[tokio::test]
    async fn test_keys_with_path_characters() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalKeyStore::new(dir.path()).await.unwrap();

        let key = "roster:../../etc/passwd";
        store.set(key, Bytes::from_static(b"x")).await.unwrap();
        assert!(store.get(key).await.unwrap().is_some());
        assert!(store.entry_path(key).unwrap().starts_with(dir.path()));
    }

    #[tokio::test]
    async fn test_empty_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalKeyStore::new(dir.path()).await.unwrap();
        assert!(matches!(
            store.set("", Bytes::new()).await,
            Err(StorageError::InvalidKey(_))
        ));
    }
}
