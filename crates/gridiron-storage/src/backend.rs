//! Key store trait

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageError;

/// Durable key/value store
///
/// Values are opaque bytes. Implementations must make `set` atomic with
/// respect to concurrent `get`s: a reader sees either the old value or the
/// new one, never a torn write.
#[async_trait]
pub trait PersistentKeyStore: Send + Sync {
    /// Read a value, `None` when the key is absent
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StorageError>;

    /// Write a value, replacing any previous one
    async fn set(&self, key: &str, value: Bytes) -> Result<(), StorageError>;

    /// Remove a value; returns whether it existed
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Short name for logs
    fn backend_name(&self) -> &'static str;
}

/// Hex SHA256 of a key, used where keys must become file names
pub fn key_digest(key: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Reject keys no backend can address
pub(crate) fn check_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("empty key".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_digest_is_stable_hex() {
        let digest = key_digest("picks:2025-6:2025-10-05:static");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(digest, key_digest("picks:2025-6:2025-10-05:static"));
        assert_ne!(digest, key_digest("picks:2025-6:2025-10-05:live"));
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(matches!(check_key(""), Err(StorageError::InvalidKey(_))));
        assert!(check_key("teams").is_ok());
    }
}
