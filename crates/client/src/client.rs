//! One-stop wiring of API, store, permission cache and session.

use std::sync::Arc;

use anyhow::Context;

use crate::api::HttpApi;
use crate::config::ClientConfig;
use crate::permissions::PermissionCache;
use crate::session::SessionManager;
use crate::store::{KeyValueStore, SqliteStore};

/// The application-wide client: construct once at startup and share.
#[derive(Debug)]
pub struct CodeGradeClient {
    api: Arc<HttpApi>,
    session: SessionManager,
}

impl CodeGradeClient {
    /// Build a client over the SQLite store named by `config`.
    pub fn from_config(config: &ClientConfig) -> anyhow::Result<Self> {
        let store = match &config.store_path {
            Some(path) => SqliteStore::open(path),
            None => SqliteStore::open_default()?,
        };
        Self::with_store(config, Arc::new(store))
    }

    /// Build a client over an arbitrary store.
    pub fn with_store(
        config: &ClientConfig,
        store: Arc<dyn KeyValueStore>,
    ) -> anyhow::Result<Self> {
        let api = Arc::new(HttpApi::from_config(config).context("failed to create API client")?);
        let permissions = PermissionCache::builder(api.clone(), store.clone())
            .max_age(config.permission_max_age)
            .build();
        let session = SessionManager::new(api.clone(), permissions, store);

        tracing::debug!(api_url = api.api_url(), "client initialized");
        Ok(Self { api, session })
    }

    pub fn api(&self) -> &HttpApi {
        &self.api
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn permissions(&self) -> &PermissionCache {
        self.session.permissions()
    }
}
