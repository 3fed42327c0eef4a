use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    application::{refresh::RefreshError, render::RenderError, warmup::ManifestError},
    config::LoadError,
    infra::error::InfraError,
};

/// Diagnostic detail attached to an error response for the logging middleware.
///
/// Never sent to the client; the middleware removes it before the response leaves.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    /// Report `error` together with every error in its source chain.
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// A plain-text error response with its diagnostic report.
#[derive(Debug)]
pub struct HttpError {
    body: &'static str,
    report: ErrorReport,
}

impl HttpError {
    pub fn bad_request(source: &'static str, body: &'static str, detail: impl Into<String>) -> Self {
        Self {
            body,
            report: ErrorReport::from_message(source, StatusCode::BAD_REQUEST, detail),
        }
    }

    /// A render that produced no HTML. The previous cache entry, if any, is untouched.
    pub fn render_failed(source: &'static str, error: &RenderError) -> Self {
        Self {
            body: "Page rendering failed",
            report: ErrorReport::from_error(source, StatusCode::BAD_GATEWAY, error),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.report.status
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = (self.report.status, self.body).into_response();
        self.report.attach(&mut response);
        response
    }
}

impl From<RenderError> for HttpError {
    fn from(error: RenderError) -> Self {
        HttpError::render_failed("application::render", &error)
    }
}

/// Failures that end the process.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("failed to set up background refresh: {0}")]
    Refresh(#[from] RefreshError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}
