use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use metrics::{counter, histogram};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::{CacheConfig, CacheStore, unix_now};

use super::{
    runtime::{InFlightRenders, RenderRole},
    types::{PageRenderer, RenderError, RenderRequest},
};

/// Runs the rendering engine for a route and stores the result in the cache.
///
/// Every caller (request path, background refresh, `/recache`) goes through
/// here so that concurrent renders of one route are shared and a successful
/// render always lands in the cache before it is returned.
#[derive(Clone)]
pub struct RenderInvoker {
    renderer: Arc<dyn PageRenderer>,
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
    inflight: InFlightRenders,
    timeout: Option<Duration>,
}

impl RenderInvoker {
    pub fn new(
        renderer: Arc<dyn PageRenderer>,
        store: Arc<dyn CacheStore>,
        config: CacheConfig,
    ) -> Self {
        Self {
            renderer,
            store,
            config,
            inflight: InFlightRenders::new(),
            timeout: None,
        }
    }

    /// Abort engine invocations that run longer than `limit`.
    pub fn with_timeout(mut self, limit: Option<Duration>) -> Self {
        self.timeout = limit;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn engine_name(&self) -> &'static str {
        self.renderer.name()
    }

    /// Render `route` and overwrite its cache entry with the fresh HTML.
    ///
    /// A failed render leaves the existing entry untouched.
    pub async fn render_and_cache(&self, route: &str) -> Result<Bytes, RenderError> {
        let key = self.config.key_for(route);

        let (result, role) = self
            .inflight
            .run(&key, || self.render_uncached(route))
            .await;

        if role == RenderRole::Joined {
            counter!("coffee_ssr_render_joined_total").increment(1);
            debug!(
                target = "coffee_ssr::render",
                route = %route,
                "joined in-flight render"
            );
        }

        result
    }

    async fn render_uncached(&self, route: &str) -> Result<Bytes, RenderError> {
        let request = RenderRequest::for_route(route);
        let started = Instant::now();

        info!(
            target = "coffee_ssr::render",
            route = %route,
            engine = self.renderer.name(),
            "Rendering and caching new content"
        );

        let outcome = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.renderer.render(&request))
                .await
                .unwrap_or(Err(RenderError::Timeout { limit })),
            None => self.renderer.render(&request).await,
        };

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        histogram!("coffee_ssr_render_ms").record(elapsed_ms);

        let html = match outcome {
            Ok(html) => Bytes::from(html),
            Err(err) => {
                counter!("coffee_ssr_render_error_total").increment(1);
                warn!(
                    target = "coffee_ssr::render",
                    route = %route,
                    engine = self.renderer.name(),
                    elapsed_ms,
                    error = %err,
                    "render failed"
                );
                return Err(err);
            }
        };

        let key = self.config.key_for(route);
        if let Err(err) = self.store.set(key, html.clone(), unix_now()) {
            warn!(
                target = "coffee_ssr::render",
                route = %route,
                error = %err,
                "failed to store rendered page"
            );
        }

        debug!(
            target = "coffee_ssr::render",
            route = %route,
            elapsed_ms,
            bytes = html.len(),
            "render stored"
        );

        Ok(html)
    }
}
