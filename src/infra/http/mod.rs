mod admin;
mod middleware;
mod public;

use axum::http::HeaderName;

pub use middleware::{REQUEST_ID_HEADER, RequestContext};
pub use public::{HttpState, build_router};

/// Diagnostic header reporting how a rendered page was served (`HIT`, `STALE` or `MISS`).
pub const CACHE_STATUS_HEADER: HeaderName = HeaderName::from_static("x-ssr-cache");
