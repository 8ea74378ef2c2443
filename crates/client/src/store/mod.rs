//! Scoped, durable key/value storage.
//!
//! Every consumer gets its own named scope (`"permissions"`, `"session"`)
//! over one shared backend. Values are JSON documents.

pub mod in_memory;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

pub use in_memory::InMemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store backend failure: {0}")]
    Backend(String),
    #[error("stored value could not be (de)serialized: {0}")]
    Codec(String),
}

/// Scope-isolated key/value store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, scope: &str, key: &str) -> Result<Option<Value>, StoreError>;
    async fn set(&self, scope: &str, key: &str, value: Value) -> Result<(), StoreError>;
    async fn remove(&self, scope: &str, key: &str) -> Result<(), StoreError>;
    /// Remove every entry in `scope`.
    async fn clear(&self, scope: &str) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> KeyValueStore for Arc<S>
where
    S: KeyValueStore + ?Sized,
{
    async fn get(&self, scope: &str, key: &str) -> Result<Option<Value>, StoreError> {
        (**self).get(scope, key).await
    }

    async fn set(&self, scope: &str, key: &str, value: Value) -> Result<(), StoreError> {
        (**self).set(scope, key, value).await
    }

    async fn remove(&self, scope: &str, key: &str) -> Result<(), StoreError> {
        (**self).remove(scope, key).await
    }

    async fn clear(&self, scope: &str) -> Result<(), StoreError> {
        (**self).clear(scope).await
    }
}

/// A handle bound to one scope of a shared backend, with typed access.
#[derive(Clone)]
pub struct ScopedStore {
    backend: Arc<dyn KeyValueStore>,
    scope: &'static str,
}

impl ScopedStore {
    pub fn new(backend: Arc<dyn KeyValueStore>, scope: &'static str) -> Self {
        Self { backend, scope }
    }

    pub fn scope(&self) -> &'static str {
        self.scope
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.backend.get(self.scope, key).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| StoreError::Codec(e.to_string())),
            None => Ok(None),
        }
    }

    pub async fn set_json<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        let value = serde_json::to_value(value).map_err(|e| StoreError::Codec(e.to_string()))?;
        self.backend.set(self.scope, key, value).await
    }

    pub async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.backend.remove(self.scope, key).await
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        self.backend.clear(self.scope).await
    }
}

impl core::fmt::Debug for ScopedStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ScopedStore").field("scope", &self.scope).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        n: u32,
    }

    #[tokio::test]
    async fn scoped_handles_do_not_see_each_other() {
        let backend: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
        let a = ScopedStore::new(backend.clone(), "a");
        let b = ScopedStore::new(backend, "b");

        a.set_json("k", &Doc { n: 1 }).await.unwrap();
        b.set_json("k", &Doc { n: 2 }).await.unwrap();

        a.clear().await.unwrap();

        assert_eq!(a.get_json::<Doc>("k").await.unwrap(), None);
        assert_eq!(b.get_json::<Doc>("k").await.unwrap(), Some(Doc { n: 2 }));
    }

    #[tokio::test]
    async fn undecodable_value_is_a_codec_error() {
        let backend = Arc::new(InMemoryStore::new());
        backend
            .set("a", "k", serde_json::json!({"unexpected": true}))
            .await
            .unwrap();

        let scoped = ScopedStore::new(backend, "a");
        let err = scoped.get_json::<Doc>("k").await.unwrap_err();
        assert!(matches!(err, StoreError::Codec(_)));
    }
}
