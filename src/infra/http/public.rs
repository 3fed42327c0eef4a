use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderValue, Method, Request, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};

use crate::{
    application::{
        dispatch::{ServeOutcome, SsrService},
        error::{ErrorReport, HttpError},
    },
    infra::assets::{StaticAssets, is_asset_path},
};

use super::{
    CACHE_STATUS_HEADER, admin,
    middleware::{log_responses, set_request_context},
};

/// State shared by every handler.
#[derive(Clone)]
pub struct HttpState {
    pub ssr: SsrService,
    pub assets: StaticAssets,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/_health", get(health))
        .route("/recache", post(admin::recache).fallback(dispatch))
        .route("/clear-cache", post(admin::clear_cache).fallback(dispatch))
        .fallback(dispatch)
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Static files for paths naming an existing file, rendered pages for everything else.
async fn dispatch(State(state): State<HttpState>, request: Request<Body>) -> Response {
    if request.method() != Method::GET && request.method() != Method::HEAD {
        let mut response = StatusCode::METHOD_NOT_ALLOWED.into_response();
        ErrorReport::from_message(
            "infra::http::dispatch",
            StatusCode::METHOD_NOT_ALLOWED,
            format!("{} is not served", request.method()),
        )
        .attach(&mut response);
        return response;
    }

    let path = request.uri().path();
    if is_asset_path(path) {
        if let Some(response) = state.assets.serve(path).await {
            return response;
        }
    }

    match state.ssr.serve(path).await {
        Ok(outcome) => html_response(outcome),
        Err(err) => HttpError::from(err).into_response(),
    }
}

fn html_response(outcome: ServeOutcome) -> Response {
    let mut response = Response::new(Body::from(outcome.html));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    headers.insert(
        CACHE_STATUS_HEADER,
        HeaderValue::from_static(outcome.status.as_header()),
    );
    response
}
