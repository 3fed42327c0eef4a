#![allow(dead_code)]

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, Response},
};
use coffee_ssr::{
    application::{
        dispatch::SsrService,
        refresh::{RefreshWorker, Refresher},
        render::{PageRenderer, RenderError, RenderInvoker, RenderRequest},
    },
    cache::{CacheConfig, CacheStore, MemoryStore, unix_now},
    infra::{
        assets::StaticAssets,
        http::{HttpState, build_router},
    },
};
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

/// Renders `<main>{route} #{n}</main>`; routes containing `broken` fail.
pub struct ScriptedRenderer {
    pub calls: AtomicUsize,
    pub delay: Option<Duration>,
}

#[async_trait]
impl PageRenderer for ScriptedRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<String, RenderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if request.route.contains("broken") {
            return Err(RenderError::engine("scripted failure"));
        }
        Ok(format!("<main>{} #{n}</main>", request.route))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<dyn CacheStore>,
    pub renderer: Arc<ScriptedRenderer>,
    pub service: SsrService,
    pub worker: Option<RefreshWorker>,
    pub static_dir: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_delay(None)
    }

    pub fn with_delay(delay: Option<Duration>) -> Self {
        let static_dir = tempfile::tempdir().expect("static dir");
        std::fs::write(static_dir.path().join("main.js"), "console.log('coffee');")
            .expect("write asset");

        let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
        let renderer = Arc::new(ScriptedRenderer {
            calls: AtomicUsize::new(0),
            delay,
        });
        let invoker = RenderInvoker::new(renderer.clone(), store.clone(), CacheConfig::default());
        let (refresher, worker) = Refresher::queue(invoker.clone(), 16);
        let service = SsrService::new(invoker, refresher);

        let router = build_router(HttpState {
            ssr: service.clone(),
            assets: StaticAssets::new(static_dir.path(), Duration::from_secs(31_536_000)),
        });

        Self {
            router,
            store,
            renderer,
            service,
            worker: Some(worker),
            static_dir,
        }
    }

    /// Start draining the refresh queue in the background.
    pub fn spawn_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            tokio::spawn(worker.run());
        }
    }

    pub fn render_calls(&self) -> usize {
        self.renderer.calls.load(Ordering::SeqCst)
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Method::GET, uri, Body::empty()).await
    }

    pub async fn post_json(&self, uri: &str, body: &str) -> Response<Body> {
        self.send(Method::POST, uri, Body::from(body.to_string()))
            .await
    }

    pub async fn send(&self, method: Method, uri: &str, body: Body) -> Response<Body> {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .expect("request should build");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router should respond")
    }
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body should collect")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

/// Poll `check` until it holds or about two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

/// Wait until the wall clock has just ticked over to a new second, so a seeded
/// timestamp and the request that reads it see the same `unix_now()`.
pub async fn start_of_second() {
    let start = unix_now();
    while unix_now() == start {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
