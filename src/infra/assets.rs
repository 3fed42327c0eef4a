//! Static asset serving from the application build directory.

use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use axum::{
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use mime_guess::Mime;
use tracing::warn;

use crate::application::error::ErrorReport;

const SOURCE: &str = "infra::assets::serve";

/// Files under the static directory, served with a long-lived cache header.
#[derive(Debug, Clone)]
pub struct StaticAssets {
    root: PathBuf,
    cache_control: HeaderValue,
}

impl StaticAssets {
    pub fn new(root: impl Into<PathBuf>, max_age: Duration) -> Self {
        let cache_control = HeaderValue::from_str(&format!("public, max-age={}", max_age.as_secs()))
            .unwrap_or_else(|_| HeaderValue::from_static("public, max-age=31536000"));
        Self {
            root: root.into(),
            cache_control,
        }
    }

    /// Serve the file at request path `path`.
    ///
    /// `None` when no such file exists, so the caller can render the path instead.
    pub async fn serve(&self, path: &str) -> Option<Response> {
        let candidate = match resolve_asset(path) {
            Ok(Some(candidate)) => candidate,
            Ok(None) => return None,
            Err(status) => return Some(rejected_response(status)),
        };

        let full_path = self.root.join(candidate);
        match read_file(&full_path).await {
            Ok(Some(bytes)) => Some(build_response(
                bytes,
                mime_guess::from_path(&full_path).first_or_octet_stream(),
                self.cache_control.clone(),
            )),
            Ok(None) => None,
            Err(err) => {
                warn!(
                    target = "coffee_ssr::assets",
                    path = %full_path.display(),
                    error = %err,
                    "failed to read static asset"
                );
                let mut response = StatusCode::INTERNAL_SERVER_ERROR.into_response();
                ErrorReport::from_error(SOURCE, StatusCode::INTERNAL_SERVER_ERROR, &err)
                    .attach(&mut response);
                Some(response)
            }
        }
    }
}

/// Whether a request path names a file, i.e. its last segment contains a dot.
pub fn is_asset_path(path: &str) -> bool {
    path.rsplit('/').next().is_some_and(|segment| segment.contains('.'))
}

fn resolve_asset(path: &str) -> Result<Option<&str>, StatusCode> {
    let candidate = path.trim_start_matches('/');

    if candidate.contains("..") || candidate.contains('\\') {
        return Err(StatusCode::BAD_REQUEST);
    }
    if candidate.is_empty() || candidate.ends_with('/') {
        return Ok(None);
    }

    Ok(Some(candidate))
}

async fn read_file(path: &Path) -> io::Result<Option<Bytes>> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => return Ok(None),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    }

    match tokio::fs::read(path).await {
        Ok(contents) => Ok(Some(Bytes::from(contents))),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

fn rejected_response(status: StatusCode) -> Response {
    let mut response = status.into_response();
    ErrorReport::from_message(SOURCE, status, "Static asset request rejected")
        .attach(&mut response);
    response
}

fn build_response(bytes: Bytes, mime: Mime, cache_control: HeaderValue) -> Response {
    let len = bytes.len();
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&len.to_string()) {
        headers.insert(header::CONTENT_LENGTH, value);
    }
    headers.insert(header::CACHE_CONTROL, cache_control);

    response
}
