//! Client-side permission cache.
//!
//! Answers "does the current user have permission X in scope S?" from a
//! persisted, time-bounded copy of the scope's permission map, fetching the
//! map from the server only on a miss. Concurrent misses for one scope share
//! a single request.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use codegrade_auth::{
    Permission, PermissionAnswer, PermissionMap, PermissionQuery, PermissionScope,
};
use codegrade_core::{Clock, SystemClock};

use crate::api::{ApiError, PermissionSource};
use crate::config::DEFAULT_PERMISSION_MAX_AGE;
use crate::store::{KeyValueStore, ScopedStore, StoreError};

/// Store scope holding the cached permission maps.
pub const PERMISSIONS_SCOPE: &str = "permissions";

/// A persisted permission map and the instant (epoch ms) it stops being trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub map: PermissionMap,
    pub expiration: i64,
}

impl CacheEntry {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now.timestamp_millis() < self.expiration
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PermissionError {
    #[error("failed to fetch permissions: {source}")]
    Fetch {
        #[source]
        source: ApiError,
        denied: PermissionAnswer,
    },
}

impl PermissionError {
    /// The answer callers should act on: every requested permission `false`.
    pub fn denied(&self) -> &PermissionAnswer {
        match self {
            PermissionError::Fetch { denied, .. } => denied,
        }
    }

    pub fn into_denied(self) -> PermissionAnswer {
        match self {
            PermissionError::Fetch { denied, .. } => denied,
        }
    }
}

type FetchResult = Result<Arc<PermissionMap>, ApiError>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

struct InFlight {
    id: u64,
    fetch: SharedFetch,
}

struct Inner {
    source: Arc<dyn PermissionSource>,
    store: ScopedStore,
    clock: Arc<dyn Clock>,
    max_age: Duration,
    in_flight: Mutex<HashMap<String, InFlight>>,
    /// Bumped by every clear; fetches issued under an older epoch never persist.
    epoch: AtomicU64,
    next_request_id: AtomicU64,
}

/// Handle to the permission cache. Clones share one cache.
#[derive(Clone)]
pub struct PermissionCache {
    inner: Arc<Inner>,
}

pub struct PermissionCacheBuilder {
    source: Arc<dyn PermissionSource>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    max_age: Duration,
}

impl PermissionCacheBuilder {
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> PermissionCache {
        PermissionCache {
            inner: Arc::new(Inner {
                source: self.source,
                store: ScopedStore::new(self.store, PERMISSIONS_SCOPE),
                clock: self.clock,
                max_age: self.max_age,
                in_flight: Mutex::new(HashMap::new()),
                epoch: AtomicU64::new(0),
                next_request_id: AtomicU64::new(0),
            }),
        }
    }
}

impl PermissionCache {
    /// Cache with the default 24 hour lifetime and the system clock.
    pub fn new(source: Arc<dyn PermissionSource>, store: Arc<dyn KeyValueStore>) -> Self {
        Self::builder(source, store).build()
    }

    pub fn builder(
        source: Arc<dyn PermissionSource>,
        store: Arc<dyn KeyValueStore>,
    ) -> PermissionCacheBuilder {
        PermissionCacheBuilder {
            source,
            store,
            clock: Arc::new(SystemClock),
            max_age: DEFAULT_PERMISSION_MAX_AGE,
        }
    }

    pub fn max_age(&self) -> Duration {
        self.inner.max_age
    }

    /// Answer `query` in `scope`. A failed fetch yields the all-`false`
    /// answer instead of an error.
    pub async fn has_permission(
        &self,
        query: &PermissionQuery,
        scope: PermissionScope,
    ) -> PermissionAnswer {
        match self.try_has_permission(query, scope).await {
            Ok(answer) => answer,
            Err(err) => {
                tracing::warn!(%scope, error = %err, "permission check failed; denying");
                err.into_denied()
            }
        }
    }

    /// Answer `query` in `scope`, surfacing a failed fetch as an error that
    /// still carries the all-`false` answer.
    pub async fn try_has_permission(
        &self,
        query: &PermissionQuery,
        scope: PermissionScope,
    ) -> Result<PermissionAnswer, PermissionError> {
        let key = scope.cache_key();

        if let Some(answer) = self.cached_answer(query, &key).await {
            tracing::debug!(%scope, "permission cache hit");
            return Ok(answer);
        }

        match self.join_or_start(scope, &key).await {
            Ok(map) => Ok(query.answer_from(&map)),
            Err(source) => Err(PermissionError::Fetch {
                denied: query.denied(),
                source,
            }),
        }
    }

    pub async fn has(&self, name: impl Into<Permission>, scope: PermissionScope) -> bool {
        let query = PermissionQuery::single(name);
        self.has_permission(&query, scope).await.as_bool().unwrap_or(false)
    }

    /// One boolean per name, in input order.
    pub async fn has_all<I, P>(&self, names: I, scope: PermissionScope) -> Vec<bool>
    where
        I: IntoIterator<Item = P>,
        P: Into<Permission>,
    {
        let query = PermissionQuery::list(names);
        match self.has_permission(&query, scope).await {
            PermissionAnswer::List(values) => values,
            _ => Vec::new(),
        }
    }

    pub async fn has_map<I, P>(&self, names: I, scope: PermissionScope) -> BTreeMap<String, bool>
    where
        I: IntoIterator<Item = P>,
        P: Into<Permission>,
    {
        let query = PermissionQuery::as_map(names);
        match self.has_permission(&query, scope).await {
            PermissionAnswer::Map(values) => values,
            _ => BTreeMap::new(),
        }
    }

    /// Drop every in-flight marker and every persisted entry.
    ///
    /// Fetches already running still answer their own callers, but their
    /// results are not written back.
    pub async fn clear_cache(&self) -> Result<(), StoreError> {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        let dropped = {
            let mut table = self.inner.lock_in_flight();
            let n = table.len();
            table.clear();
            n
        };
        tracing::info!(dropped_in_flight = dropped, "permission cache cleared");
        self.inner.store.clear().await
    }

    /// The persisted entry for `scope`, if any (fresh or not).
    pub async fn cached_entry(&self, scope: PermissionScope) -> Option<CacheEntry> {
        self.inner
            .store
            .get_json(&scope.cache_key())
            .await
            .ok()
            .flatten()
    }

    /// Number of fetches currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.lock_in_flight().len()
    }

    async fn cached_answer(&self, query: &PermissionQuery, key: &str) -> Option<PermissionAnswer> {
        let entry: CacheEntry = match self.inner.store.get_json(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(err) => {
                tracing::debug!(key, error = %err, "unreadable permission cache entry; refetching");
                return None;
            }
        };

        if !entry.is_fresh(self.inner.clock.now()) {
            tracing::debug!(key, "permission cache entry expired");
            return None;
        }

        query.answer_from_cache(&entry.map)
    }

    fn join_or_start(&self, scope: PermissionScope, key: &str) -> SharedFetch {
        let mut table = self.inner.lock_in_flight();

        if let Some(existing) = table.get(key) {
            tracing::debug!(%scope, "joining in-flight permission request");
            return existing.fetch.clone();
        }

        let id = self.inner.next_request_id.fetch_add(1, Ordering::SeqCst);
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        let owned_key = key.to_string();

        tracing::debug!(%scope, "fetching permissions");
        let fetch = async move { inner.fetch_and_persist(scope, owned_key, id, epoch).await }
            .boxed()
            .shared();

        table.insert(
            key.to_string(),
            InFlight {
                id,
                fetch: fetch.clone(),
            },
        );
        fetch
    }
}

impl Inner {
    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<String, InFlight>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    async fn fetch_and_persist(
        self: Arc<Self>,
        scope: PermissionScope,
        key: String,
        id: u64,
        epoch: u64,
    ) -> FetchResult {
        let result = self.source.fetch_permissions(scope).await;

        match &result {
            Ok(map) if self.is_current(epoch) => self.persist(&key, map, epoch).await,
            Ok(_) => tracing::debug!(%scope, "cache cleared during fetch; result not persisted"),
            Err(err) => tracing::debug!(%scope, error = %err, "permission fetch failed"),
        }

        // The marker goes only after the write, so no caller can slip
        // between "request finished" and "entry visible".
        self.finish(&key, id);
        result.map(Arc::new)
    }

    async fn persist(&self, key: &str, map: &PermissionMap, epoch: u64) {
        let max_age_ms = i64::try_from(self.max_age.as_millis()).unwrap_or(i64::MAX);
        let entry = CacheEntry {
            map: map.clone(),
            expiration: self.clock.now().timestamp_millis().saturating_add(max_age_ms),
        };

        if let Err(err) = self.store.set_json(key, &entry).await {
            tracing::warn!(key, error = %err, "failed to persist permissions");
            return;
        }

        // A clear may have run while the write was pending.
        if !self.is_current(epoch) {
            if let Err(err) = self.store.remove(key).await {
                tracing::warn!(key, error = %err, "failed to drop stale permission entry");
            }
        }
    }

    fn finish(&self, key: &str, id: u64) {
        let mut table = self.lock_in_flight();
        if table.get(key).is_some_and(|f| f.id == id) {
            table.remove(key);
        }
    }
}

impl core::fmt::Debug for PermissionCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PermissionCache")
            .field("max_age", &self.inner.max_age)
            .field("in_flight", &self.in_flight())
            .field("epoch", &self.inner.epoch.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use codegrade_core::{CourseId, ManualClock};
    use serde_json::Value;
    use tokio::sync::Notify;

    use crate::store::InMemoryStore;

    /// Permission source that counts requests and can hold them until released.
    struct FakeSource {
        maps: Mutex<HashMap<String, PermissionMap>>,
        calls: AtomicUsize,
        gate: Option<Notify>,
        fail: std::sync::atomic::AtomicBool,
    }

    impl FakeSource {
        fn new() -> Self {
            Self {
                maps: Mutex::new(HashMap::new()),
                calls: AtomicUsize::new(0),
                gate: None,
                fail: std::sync::atomic::AtomicBool::new(false),
            }
        }

        fn gated() -> Self {
            Self {
                gate: Some(Notify::new()),
                ..Self::new()
            }
        }

        fn with(self, scope: PermissionScope, perms: &[(&str, bool)]) -> Self {
            self.set(scope, perms);
            self
        }

        fn set(&self, scope: PermissionScope, perms: &[(&str, bool)]) {
            let map: PermissionMap = perms.iter().map(|(k, v)| (*k, *v)).collect();
            self.maps.lock().unwrap().insert(scope.cache_key(), map);
        }

        fn release(&self) {
            if let Some(gate) = &self.gate {
                gate.notify_one();
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PermissionSource for FakeSource {
        async fn fetch_permissions(
            &self,
            scope: PermissionScope,
        ) -> Result<PermissionMap, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(ApiError::Network("connection refused".into()));
            }
            Ok(self
                .maps
                .lock()
                .unwrap()
                .get(&scope.cache_key())
                .cloned()
                .unwrap_or_default())
        }
    }

    /// In-memory store whose writes wait until released.
    #[derive(Default)]
    struct GatedWriteStore {
        inner: InMemoryStore,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl KeyValueStore for GatedWriteStore {
        async fn get(&self, scope: &str, key: &str) -> Result<Option<Value>, StoreError> {
            self.inner.get(scope, key).await
        }

        async fn set(&self, scope: &str, key: &str, value: Value) -> Result<(), StoreError> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.set(scope, key, value).await
        }

        async fn remove(&self, scope: &str, key: &str) -> Result<(), StoreError> {
            self.inner.remove(scope, key).await
        }

        async fn clear(&self, scope: &str) -> Result<(), StoreError> {
            self.inner.clear(scope).await
        }
    }

    struct Fixture {
        source: Arc<FakeSource>,
        store: Arc<InMemoryStore>,
        clock: Arc<ManualClock>,
        cache: PermissionCache,
    }

    fn fixture(source: FakeSource) -> Fixture {
        let source = Arc::new(source);
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = PermissionCache::builder(source.clone(), store.clone())
            .clock(clock.clone())
            .build();
        Fixture {
            source,
            store,
            clock,
            cache,
        }
    }

    async fn wait_for_calls(source: &FakeSource, n: usize) {
        for _ in 0..100 {
            if source.calls() >= n {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("expected {n} calls, saw {}", source.calls());
    }

    fn course(id: u64) -> PermissionScope {
        PermissionScope::Course(CourseId::new(id))
    }

    #[tokio::test]
    async fn miss_fetches_persists_and_answers() {
        let fx = fixture(FakeSource::new().with(course(7), &[("can_grade_work", true)]));

        assert!(fx.cache.has("can_grade_work", course(7)).await);
        assert_eq!(fx.source.calls(), 1);

        let entry = fx.cache.cached_entry(course(7)).await.unwrap();
        assert_eq!(entry.map.get("can_grade_work"), Some(true));
        assert_eq!(
            entry.expiration,
            fx.clock.now().timestamp_millis() + 24 * 60 * 60 * 1000
        );
        assert_eq!(fx.cache.in_flight(), 0);
    }

    #[tokio::test]
    async fn fresh_entry_is_answered_without_network() {
        let fx = fixture(
            FakeSource::new().with(PermissionScope::Global, &[("a", true), ("b", false)]),
        );

        fx.cache.has("a", PermissionScope::Global).await;
        let answer = fx
            .cache
            .has_permission(&PermissionQuery::list(["b", "a"]), PermissionScope::Global)
            .await;

        assert_eq!(answer, PermissionAnswer::List(vec![false, true]));
        assert_eq!(fx.source.calls(), 1);
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss() {
        let fx = fixture(FakeSource::new().with(course(1), &[("a", true)]));

        fx.cache.has("a", course(1)).await;
        fx.clock.advance(chrono::Duration::hours(24));
        fx.cache.has("a", course(1)).await;

        assert_eq!(fx.source.calls(), 2);
    }

    #[tokio::test]
    async fn missing_name_forces_refetch() {
        let fx = fixture(FakeSource::new().with(course(1), &[("a", true)]));

        fx.cache.has("a", course(1)).await;
        fx.source.set(course(1), &[("a", true), ("b", true)]);

        assert!(fx.cache.has("b", course(1)).await);
        assert_eq!(fx.source.calls(), 2);
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_request() {
        let fx = fixture(FakeSource::gated().with(course(3), &[("a", true), ("b", false)]));

        let first = tokio::spawn({
            let cache = fx.cache.clone();
            async move { cache.has("a", course(3)).await }
        });
        wait_for_calls(&fx.source, 1).await;

        let second = tokio::spawn({
            let cache = fx.cache.clone();
            async move { cache.has_map(["a", "b"], course(3)).await }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(fx.cache.in_flight(), 1);

        fx.source.release();

        assert!(first.await.unwrap());
        let map = second.await.unwrap();
        assert_eq!(map.get("a"), Some(&true));
        assert_eq!(map.get("b"), Some(&false));
        assert_eq!(fx.source.calls(), 1);
        assert_eq!(fx.cache.in_flight(), 0);
    }

    #[tokio::test]
    async fn different_scopes_fetch_independently() {
        let fx = fixture(
            FakeSource::new()
                .with(course(1), &[("a", true)])
                .with(PermissionScope::Global, &[("a", false)]),
        );

        assert!(fx.cache.has("a", course(1)).await);
        assert!(!fx.cache.has("a", PermissionScope::Global).await);
        assert_eq!(fx.source.calls(), 2);
    }

    #[tokio::test]
    async fn transport_failure_denies_in_requested_shape() {
        let fx = fixture(FakeSource::new());
        fx.source.fail.store(true, Ordering::SeqCst);

        assert!(!fx.cache.has("x", course(1)).await);
        assert_eq!(fx.cache.has_all(["x", "y"], course(1)).await, vec![false, false]);

        let err = fx
            .cache
            .try_has_permission(&PermissionQuery::as_map(["x"]), course(1))
            .await
            .unwrap_err();
        assert!(matches!(err, PermissionError::Fetch { source: ApiError::Network(_), .. }));
        assert!(!err.denied().any());

        // Nothing cached, nothing left in flight: the next call retries.
        assert_eq!(fx.cache.in_flight(), 0);
        assert!(fx.cache.cached_entry(course(1)).await.is_none());
        fx.source.fail.store(false, Ordering::SeqCst);
        fx.source.set(course(1), &[("x", true)]);
        assert!(fx.cache.has("x", course(1)).await);
    }

    #[tokio::test]
    async fn clear_cache_forces_refetch() {
        let fx = fixture(FakeSource::new().with(course(1), &[("a", true)]));

        fx.cache.has("a", course(1)).await;
        fx.cache.clear_cache().await.unwrap();
        assert_eq!(fx.store.len(PERMISSIONS_SCOPE), 0);

        fx.cache.has("a", course(1)).await;
        assert_eq!(fx.source.calls(), 2);
    }

    #[tokio::test]
    async fn fetch_resolving_after_clear_is_not_persisted() {
        let fx = fixture(FakeSource::gated().with(course(5), &[("a", true)]));

        let pending = tokio::spawn({
            let cache = fx.cache.clone();
            async move { cache.has("a", course(5)).await }
        });
        wait_for_calls(&fx.source, 1).await;

        fx.cache.clear_cache().await.unwrap();
        assert_eq!(fx.cache.in_flight(), 0);
        fx.source.release();

        // The original caller still gets its answer...
        assert!(pending.await.unwrap());
        // ...but nothing from the old epoch lands in the store.
        assert!(fx.cache.cached_entry(course(5)).await.is_none());
    }

    #[tokio::test]
    async fn corrupt_entry_is_treated_as_miss() {
        let fx = fixture(FakeSource::new().with(course(2), &[("a", true)]));
        fx.store
            .set(PERMISSIONS_SCOPE, "2", serde_json::json!("not an entry"))
            .await
            .unwrap();

        assert!(fx.cache.has("a", course(2)).await);
        assert_eq!(fx.source.calls(), 1);
        assert!(fx.cache.cached_entry(course(2)).await.is_some());
    }

    #[tokio::test]
    async fn custom_max_age_is_honored() {
        let source = Arc::new(FakeSource::new().with(course(1), &[("a", true)]));
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = PermissionCache::builder(source.clone(), Arc::new(InMemoryStore::new()))
            .clock(clock.clone())
            .max_age(Duration::from_secs(60))
            .build();

        cache.has("a", course(1)).await;
        clock.advance(chrono::Duration::seconds(59));
        cache.has("a", course(1)).await;
        assert_eq!(source.calls(), 1);

        clock.advance(chrono::Duration::seconds(1));
        cache.has("a", course(1)).await;
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn clear_while_write_is_pending_drops_the_entry() {
        let source = Arc::new(FakeSource::new().with(course(4), &[("a", true)]));
        let store = Arc::new(GatedWriteStore::default());
        let cache = PermissionCache::new(source.clone(), store.clone());

        let pending = tokio::spawn({
            let cache = cache.clone();
            async move { cache.has("a", course(4)).await }
        });
        // The fetch has resolved and its write is now held.
        store.entered.notified().await;

        cache.clear_cache().await.unwrap();
        store.release.notify_one();

        assert!(pending.await.unwrap());
        assert!(cache.cached_entry(course(4)).await.is_none());
        assert_eq!(store.inner.len(PERMISSIONS_SCOPE), 0);
        assert_eq!(cache.in_flight(), 0);
    }
}
