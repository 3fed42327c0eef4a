//! Administrative endpoints: forced re-render and cache clearing.

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, de::DeserializeOwned};
use tracing::info;

use crate::{application::error::HttpError, cache::normalize_route};

use super::public::HttpState;

const RECACHE_SOURCE: &str = "infra::http::admin::recache";

#[derive(Debug, Deserialize)]
struct RecacheRequest {
    route: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClearCacheRequest {
    name: Option<String>,
}

/// `POST /recache {"route": "..."}`: render the route now and overwrite its cache entry.
pub(super) async fn recache(State(state): State<HttpState>, body: Bytes) -> Response {
    let Some(route) = parse_body::<RecacheRequest>(&body)
        .and_then(|request| request.route)
        .and_then(|raw| normalize_route(&raw))
    else {
        return HttpError::bad_request(
            RECACHE_SOURCE,
            "Route is required",
            "request body has no usable `route` string",
        )
        .into_response();
    };

    info!(
        target = "coffee_ssr::http::admin",
        route = %route,
        "recache requested"
    );

    match state.ssr.recache(&route).await {
        Ok(html) => {
            let mut response = Response::new(Body::from(html));
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/html; charset=utf-8"),
            );
            response
        }
        Err(err) => HttpError::render_failed(RECACHE_SOURCE, &err).into_response(),
    }
}

/// `POST /clear-cache {"name": "..."}`: drop entries whose key starts with `name`, or all entries.
pub(super) async fn clear_cache(State(state): State<HttpState>, body: Bytes) -> Response {
    let name = parse_body::<ClearCacheRequest>(&body).and_then(|request| request.name);
    let scope = state.ssr.clear(name.as_deref());
    (
        StatusCode::OK,
        format!("Cache cleared for prefix: {}", scope.label()),
    )
        .into_response()
}

/// Lenient JSON body: a missing, malformed or mistyped body yields `None`.
fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Option<T> {
    serde_json::from_slice(body).ok()
}
