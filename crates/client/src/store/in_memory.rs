use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;

use super::{KeyValueStore, StoreError};

/// In-memory scope-isolated store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<HashMap<(String, String), Value>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries in `scope`.
    pub fn len(&self, scope: &str) -> usize {
        match self.inner.read() {
            Ok(map) => map.keys().filter(|(s, _)| s == scope).count(),
            Err(_) => 0,
        }
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("in-memory store lock poisoned".to_string())
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, scope: &str, key: &str) -> Result<Option<Value>, StoreError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map.get(&(scope.to_string(), key.to_string())).cloned())
    }

    async fn set(&self, scope: &str, key: &str, value: Value) -> Result<(), StoreError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        map.insert((scope.to_string(), key.to_string()), value);
        Ok(())
    }

    async fn remove(&self, scope: &str, key: &str) -> Result<(), StoreError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        map.remove(&(scope.to_string(), key.to_string()));
        Ok(())
    }

    async fn clear(&self, scope: &str) -> Result<(), StoreError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        map.retain(|(s, _k), _v| s != scope);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_get_remove() {
        let store = InMemoryStore::new();
        store.set("permissions", "7", json!({"a": 1})).await.unwrap();

        assert_eq!(
            store.get("permissions", "7").await.unwrap(),
            Some(json!({"a": 1}))
        );
        assert_eq!(store.get("session", "7").await.unwrap(), None);

        store.remove("permissions", "7").await.unwrap();
        assert_eq!(store.get("permissions", "7").await.unwrap(), None);
    }

    #[tokio::test]
    async fn clear_only_touches_one_scope() {
        let store = InMemoryStore::new();
        store.set("permissions", "GLOBAL_PERMS", json!({})).await.unwrap();
        store.set("permissions", "3", json!({})).await.unwrap();
        store.set("session", "user", json!({})).await.unwrap();

        store.clear("permissions").await.unwrap();

        assert_eq!(store.len("permissions"), 0);
        assert_eq!(store.len("session"), 1);
    }
}
