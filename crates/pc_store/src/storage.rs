//! Secure-storage capability.
//!
//! Three operations over opaque UTF-8 strings. The contract the rest of
//! the core relies on: `set` linearizes before any subsequent `get` on
//! the same key, and `set` followed by `get` round-trips exactly. The
//! at-rest protection (OS keychain, encrypted database) belongs to the
//! implementation, not to this trait.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;

#[async_trait]
pub trait SecureStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Plain in-memory storage. Tests and ephemeral (never-persisted)
/// profiles; offers no at-rest protection.
#[derive(Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecureStorage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let storage = MemoryStorage::new();
        storage.set("signal:prekeys", "{\"v\":1}").await.unwrap();
        assert_eq!(
            storage.get("signal:prekeys").await.unwrap().as_deref(),
            Some("{\"v\":1}")
        );
    }

    #[tokio::test]
    async fn delete_removes_the_key() {
        let storage = MemoryStorage::new();
        storage.set("k", "v").await.unwrap();
        storage.delete("k").await.unwrap();
        assert!(storage.get("k").await.unwrap().is_none());
        // Deleting a missing key is a no-op
        storage.delete("k").await.unwrap();
    }
}
