use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Rendering request passed to the engine.
///
/// Carries the route being rendered and the base href the application should
/// resolve against. The base href is the route itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    pub route: String,
    pub base_href: String,
}

impl RenderRequest {
    pub fn for_route(route: impl Into<String>) -> Self {
        let route = route.into();
        Self {
            base_href: route.clone(),
            route,
        }
    }
}

/// Structured errors surfaced by a rendering engine.
///
/// Cloneable so that every caller sharing an in-flight render gets the same outcome.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("rendering engine failed: {message}")]
    Engine { message: String },
    #[error("rendering engine i/o failed: {message}")]
    Io { message: String },
    #[error("template processing failed: {message}")]
    Template { message: String },
    #[error("rendering timed out after {}s", .limit.as_secs())]
    Timeout { limit: Duration },
}

impl RenderError {
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    pub fn template(message: impl Into<String>) -> Self {
        Self::Template {
            message: message.into(),
        }
    }
}

/// External rendering engine turning a route into a full HTML document.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, request: &RenderRequest) -> Result<String, RenderError>;

    /// Short engine name used in logs.
    fn name(&self) -> &'static str {
        "custom"
    }
}
