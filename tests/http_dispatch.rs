mod support;

use std::time::Duration;

use axum::{
    body::Body,
    http::{Method, StatusCode, header},
};
use bytes::Bytes;
use coffee_ssr::cache::{CacheConfig, CacheKey, unix_now};
use coffee_ssr::infra::http::{CACHE_STATUS_HEADER, REQUEST_ID_HEADER};
use support::{TestApp, body_text, eventually, start_of_second};

fn key(route: &str) -> CacheKey {
    CacheConfig::default().key_for(route)
}

#[tokio::test]
async fn miss_renders_then_fresh_hit_serves_cache() {
    let app = TestApp::new();

    let response = app.get("/menu").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CACHE_STATUS_HEADER], "MISS");
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/html; charset=utf-8"
    );
    assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    assert_eq!(body_text(response).await, "<main>/menu #1</main>");

    let response = app.get("/menu").await;
    assert_eq!(response.headers()[CACHE_STATUS_HEADER], "HIT");
    assert_eq!(body_text(response).await, "<main>/menu #1</main>");
    assert_eq!(app.render_calls(), 1);
}

#[tokio::test]
async fn stale_hit_serves_old_html_and_refreshes_in_background() {
    let mut app = TestApp::new();
    let stale_at = unix_now() - 2401;
    app.store
        .set(key("/menu"), Bytes::from("<main>old</main>"), stale_at)
        .expect("seed");

    let response = app.get("/menu").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CACHE_STATUS_HEADER], "STALE");
    assert_eq!(body_text(response).await, "<main>old</main>");
    assert_eq!(app.render_calls(), 0);
    assert_eq!(app.service.refresher().pending_len(), 1);

    app.spawn_worker();
    let store = app.store.clone();
    let refreshed = eventually(|| {
        store
            .get(&key("/menu"))
            .ok()
            .flatten()
            .is_some_and(|entry| entry.html == "<main>/menu #1</main>")
    })
    .await;
    assert!(refreshed, "background refresh did not overwrite the entry");

    let response = app.get("/menu").await;
    assert_eq!(response.headers()[CACHE_STATUS_HEADER], "HIT");
}

#[tokio::test]
async fn entry_at_threshold_is_still_fresh() {
    let app = TestApp::new();
    start_of_second().await;
    app.store
        .set(key("/"), Bytes::from("home"), unix_now() - 2400)
        .expect("seed");

    let response = app.get("/").await;
    assert_eq!(response.headers()[CACHE_STATUS_HEADER], "HIT");
    assert_eq!(body_text(response).await, "home");
    assert_eq!(app.service.refresher().pending_len(), 0);
}

#[tokio::test]
async fn entry_one_second_past_threshold_is_stale() {
    let app = TestApp::new();
    start_of_second().await;
    app.store
        .set(key("/"), Bytes::from("home"), unix_now() - 2401)
        .expect("seed");

    let response = app.get("/").await;
    assert_eq!(response.headers()[CACHE_STATUS_HEADER], "STALE");
    assert_eq!(body_text(response).await, "home");
    assert_eq!(app.service.refresher().pending_len(), 1);
}

#[tokio::test]
async fn render_failure_on_miss_is_bad_gateway_and_not_cached() {
    let app = TestApp::new();

    let response = app.get("/broken").await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_text(response).await, "Page rendering failed");
    assert!(app.store.get(&key("/broken")).expect("get").is_none());
}

#[tokio::test]
async fn concurrent_misses_share_one_render() {
    let app = TestApp::with_delay(Some(Duration::from_millis(200)));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let router = app.router.clone();
        handles.push(tokio::spawn(async move {
            let request = axum::http::Request::builder()
                .uri("/hot")
                .body(Body::empty())
                .expect("request should build");
            tower::ServiceExt::oneshot(router, request)
                .await
                .expect("router should respond")
        }));
    }

    for handle in handles {
        let response = handle.await.expect("task joined");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "<main>/hot #1</main>");
    }
    assert_eq!(app.render_calls(), 1);
}

#[tokio::test]
async fn static_assets_bypass_the_renderer() {
    let app = TestApp::new();

    let response = app.get("/main.js").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CACHE_CONTROL],
        "public, max-age=31536000"
    );
    assert!(!response.headers().contains_key(CACHE_STATUS_HEADER));
    assert_eq!(body_text(response).await, "console.log('coffee');");

    assert_eq!(app.render_calls(), 0);
    assert!(app.store.is_empty().expect("is_empty"));
}

#[tokio::test]
async fn dotted_path_without_a_file_is_rendered() {
    let app = TestApp::new();

    let response = app.get("/users/john.doe").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CACHE_STATUS_HEADER], "MISS");
    assert_eq!(body_text(response).await, "<main>/users/john.doe #1</main>");

    let response = app.get("/blog/v1.2").await;
    assert_eq!(response.headers()[CACHE_STATUS_HEADER], "MISS");

    assert_eq!(app.render_calls(), 2);
    assert!(
        app.store
            .get(&key("/users/john.doe"))
            .expect("get")
            .is_some()
    );

    let response = app.get("/../secret.txt").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.render_calls(), 2);
}

#[tokio::test]
async fn recache_requires_a_route() {
    let app = TestApp::new();

    for body in ["{}", "not json", r#"{"route":""}"#, r#"{"route":42}"#, ""] {
        let response = app.post_json("/recache", body).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {body}");
        assert_eq!(body_text(response).await, "Route is required");
    }
    assert_eq!(app.render_calls(), 0);
}

#[tokio::test]
async fn recache_renders_and_overwrites_entry() {
    let app = TestApp::new();
    app.store
        .set(key("/about"), Bytes::from("old"), unix_now())
        .expect("seed");

    let response = app.post_json("/recache", r#"{"route":"about"}"#).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "<main>/about #1</main>");

    let entry = app
        .store
        .get(&key("/about"))
        .expect("get")
        .expect("cached");
    assert_eq!(entry.html, "<main>/about #1</main>");
}

#[tokio::test]
async fn recache_failure_keeps_previous_entry() {
    let app = TestApp::new();
    app.store
        .set(key("/broken"), Bytes::from("kept"), 5)
        .expect("seed");

    let response = app.post_json("/recache", r#"{"route":"/broken"}"#).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let entry = app
        .store
        .get(&key("/broken"))
        .expect("get")
        .expect("cached");
    assert_eq!(entry.html, "kept");
}

#[tokio::test]
async fn clear_cache_by_prefix_and_all() {
    let app = TestApp::new();
    for (prefix, route) in [("myapp", "/a"), ("myapp", "/b"), ("other", "/a")] {
        app.store
            .set(CacheKey::new(prefix, route), Bytes::from("x"), 1)
            .expect("seed");
    }

    let response = app.post_json("/clear-cache", r#"{"name":"myapp"}"#).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_text(response).await,
        "Cache cleared for prefix: myapp"
    );
    assert_eq!(app.store.keys().expect("keys"), vec!["other:/a".to_string()]);

    let response = app.post_json("/clear-cache", "").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "Cache cleared for prefix: all");
    assert!(app.store.is_empty().expect("is_empty"));
}

#[tokio::test]
async fn health_and_method_handling() {
    let app = TestApp::new();

    let response = app.get("/_health").await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app.send(Method::DELETE, "/menu", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

    assert_eq!(app.render_calls(), 0);
}

#[tokio::test]
async fn get_on_admin_paths_renders_the_page() {
    let app = TestApp::new();

    let response = app.get("/recache").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CACHE_STATUS_HEADER], "MISS");
    assert_eq!(body_text(response).await, "<main>/recache #1</main>");

    let response = app.get("/clear-cache").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "<main>/clear-cache #2</main>");

    assert_eq!(app.render_calls(), 2);
    assert_eq!(app.store.len().expect("len"), 2);
}
