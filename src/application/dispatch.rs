//! Stale-while-revalidate dispatch for rendered routes.

use std::sync::Arc;

use bytes::Bytes;
use metrics::counter;
use tracing::{info, warn};

use crate::cache::{CacheConfig, CacheStore, Freshness, unix_now};

use super::{
    refresh::Refresher,
    render::{RenderError, RenderInvoker},
};

/// Where the served HTML came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Fresh,
    Stale,
    Rendered,
}

impl CacheStatus {
    /// Value of the `x-ssr-cache` response header.
    pub fn as_header(self) -> &'static str {
        match self {
            CacheStatus::Fresh => "HIT",
            CacheStatus::Stale => "STALE",
            CacheStatus::Rendered => "MISS",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServeOutcome {
    pub html: Bytes,
    pub status: CacheStatus,
}

/// Scope of a cache clear.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClearScope {
    Prefix(String),
    All,
}

impl ClearScope {
    /// Build the scope from an optional name; blank names clear everything.
    pub fn from_name(name: Option<&str>) -> Self {
        match name {
            Some(name) if !name.is_empty() => ClearScope::Prefix(name.to_string()),
            _ => ClearScope::All,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            ClearScope::Prefix(name) => name,
            ClearScope::All => "all",
        }
    }
}

/// Shared application context behind every HTTP handler.
#[derive(Clone)]
pub struct SsrService {
    config: CacheConfig,
    store: Arc<dyn CacheStore>,
    invoker: RenderInvoker,
    refresher: Refresher,
}

impl SsrService {
    pub fn new(invoker: RenderInvoker, refresher: Refresher) -> Self {
        Self {
            config: invoker.config().clone(),
            store: Arc::clone(invoker.store()),
            invoker,
            refresher,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn refresher(&self) -> &Refresher {
        &self.refresher
    }

    /// Serve `route` from the cache, refreshing stale entries in the background
    /// and rendering missing ones synchronously.
    pub async fn serve(&self, route: &str) -> Result<ServeOutcome, RenderError> {
        let key = self.config.key_for(route);

        let cached = match self.store.get(&key) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(
                    target = "coffee_ssr::dispatch",
                    key = %key,
                    error = %err,
                    "cache read failed, rendering as a miss"
                );
                None
            }
        };

        let Some(entry) = cached else {
            counter!("coffee_ssr_cache_miss_total").increment(1);
            let html = self.invoker.render_and_cache(route).await?;
            return Ok(ServeOutcome {
                html,
                status: CacheStatus::Rendered,
            });
        };

        let now = unix_now();
        let freshness = entry.freshness(now, self.config.refresh_seconds);
        counter!("coffee_ssr_cache_hit_total", "freshness" => freshness.as_str()).increment(1);

        let status = match freshness {
            Freshness::Fresh => {
                info!(
                    target = "coffee_ssr::dispatch",
                    key = %key,
                    outcome = "fresh",
                    "Serving from cache"
                );
                CacheStatus::Fresh
            }
            Freshness::Stale => {
                info!(
                    target = "coffee_ssr::dispatch",
                    key = %key,
                    outcome = "stale",
                    age_seconds = entry.age_at(now),
                    "Cache is old, serving stale content and refreshing in the background"
                );
                self.refresher.schedule(route);
                CacheStatus::Stale
            }
        };

        Ok(ServeOutcome {
            html: entry.html,
            status,
        })
    }

    /// Re-render `route` regardless of its cached state.
    pub async fn recache(&self, route: &str) -> Result<Bytes, RenderError> {
        self.invoker.render_and_cache(route).await
    }

    /// Drop cached entries by key prefix, or all of them.
    pub fn clear(&self, name: Option<&str>) -> ClearScope {
        let scope = ClearScope::from_name(name);
        let result = match &scope {
            ClearScope::Prefix(prefix) => self.store.delete_by_prefix(prefix),
            ClearScope::All => self.store.flush_all(),
        };

        match result {
            Ok(removed) => {
                counter!("coffee_ssr_cache_cleared_total").increment(removed as u64);
                info!(
                    target = "coffee_ssr::dispatch",
                    scope = scope.label(),
                    removed,
                    "cache cleared"
                );
            }
            Err(err) => {
                warn!(
                    target = "coffee_ssr::dispatch",
                    scope = scope.label(),
                    error = %err,
                    "cache clear failed"
                );
            }
        }

        scope
    }

    /// Whether a normalized route currently has a cache entry.
    pub fn is_cached(&self, route: &str) -> bool {
        self.store
            .contains(&self.config.key_for(route))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::application::render::{PageRenderer, RenderRequest};
    use crate::cache::{CacheEntry, CacheError, CacheKey, MemoryStore};

    use super::*;

    struct CountingRenderer {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PageRenderer for CountingRenderer {
        async fn render(&self, request: &RenderRequest) -> Result<String, RenderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("{} v{n}", request.route))
        }
    }

    struct BrokenStore;

    impl CacheStore for BrokenStore {
        fn get(&self, _key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
            Err(CacheError::Unavailable("offline".to_string()))
        }

        fn set(&self, _key: CacheKey, _html: Bytes, _timestamp: i64) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("offline".to_string()))
        }

        fn delete_by_prefix(&self, _prefix: &str) -> Result<usize, CacheError> {
            Ok(0)
        }

        fn flush_all(&self) -> Result<usize, CacheError> {
            Ok(0)
        }

        fn keys(&self) -> Result<Vec<String>, CacheError> {
            Ok(Vec::new())
        }

        fn len(&self) -> Result<usize, CacheError> {
            Ok(0)
        }
    }

    fn service_with(
        store: Arc<dyn CacheStore>,
        calls: &Arc<AtomicUsize>,
    ) -> (SsrService, crate::application::refresh::RefreshWorker) {
        let renderer = Arc::new(CountingRenderer {
            calls: Arc::clone(calls),
        });
        let invoker = RenderInvoker::new(renderer, store, CacheConfig::default());
        let (refresher, worker) = Refresher::queue(invoker.clone(), 8);
        (SsrService::new(invoker, refresher), worker)
    }

    #[tokio::test]
    async fn miss_then_fresh_hit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (service, _worker) = service_with(Arc::new(MemoryStore::new()), &calls);

        let first = service.serve("/menu").await.expect("render");
        assert_eq!(first.status, CacheStatus::Rendered);
        assert_eq!(first.html, "/menu v1");

        let second = service.serve("/menu").await.expect("hit");
        assert_eq!(second.status, CacheStatus::Fresh);
        assert_eq!(second.html, "/menu v1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_hit_serves_old_html_and_schedules_refresh() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
        let (service, worker) = service_with(store.clone(), &calls);

        let key = service.config().key_for("/menu");
        let old = unix_now() - 2401;
        store.set(key.clone(), Bytes::from("old"), old).expect("seed");

        let outcome = service.serve("/menu").await.expect("stale hit");
        assert_eq!(outcome.status, CacheStatus::Stale);
        assert_eq!(outcome.html, "old");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(service.refresher().pending_len(), 1);

        drop(service);
        worker.run().await;

        let entry = store.get(&key).expect("get").expect("refreshed");
        assert_eq!(entry.html, "/menu v1");
        assert!(entry.timestamp > old);
    }

    #[tokio::test]
    async fn cache_read_error_renders_as_miss() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (service, _worker) = service_with(Arc::new(BrokenStore), &calls);

        let outcome = service.serve("/").await.expect("rendered");
        assert_eq!(outcome.status, CacheStatus::Rendered);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recache_bypasses_fresh_entry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (service, _worker) = service_with(Arc::new(MemoryStore::new()), &calls);

        service.serve("/about").await.expect("render");
        let html = service.recache("/about").await.expect("recache");

        assert_eq!(html, "/about v2");
        let served = service.serve("/about").await.expect("hit");
        assert_eq!(served.html, "/about v2");
    }

    #[tokio::test]
    async fn clear_by_prefix_and_all() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
        let (service, _worker) = service_with(store.clone(), &calls);

        store.set(CacheKey::new("myapp", "/a"), Bytes::from("a"), 1).expect("set");
        store.set(CacheKey::new("myapp", "/b"), Bytes::from("b"), 1).expect("set");
        store.set(CacheKey::new("other", "/a"), Bytes::from("c"), 1).expect("set");

        let scope = service.clear(Some("myapp"));
        assert_eq!(scope, ClearScope::Prefix("myapp".to_string()));
        assert_eq!(store.keys().expect("keys"), vec!["other:/a".to_string()]);

        let scope = service.clear(Some(""));
        assert_eq!(scope.label(), "all");
        assert!(store.is_empty().expect("is_empty"));
    }
}
