use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use crate::external::price_source::UpstreamError;
use crate::models::iso8601;

/// Terminal outcomes of a refresh cycle. Single-attempt failures are `UpstreamError`s
/// and stay inside the retry loop.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProxyError {
    #[error("upstream failed after {attempts} attempts: {source}")]
    ExhaustedRetries { attempts: u32, source: UpstreamError },

    #[error("no price data available after {attempts} failed attempts: {source}")]
    NoDataAvailable { attempts: u32, source: UpstreamError },
}

impl ProxyError {
    /// The error of the last attempt, as reported to HTTP clients.
    pub fn upstream(&self) -> &UpstreamError {
        match self {
            ProxyError::ExhaustedRetries { source, .. }
            | ProxyError::NoDataAvailable { source, .. } => source,
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Prices(#[from] ProxyError),
    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub timestamp: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            timestamp: iso8601(Utc::now()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = match &self {
            AppError::Prices(e) => {
                ErrorBody::new("Failed to fetch data from the price API", e.upstream().to_string())
            }
            AppError::Internal(msg) => ErrorBody::new("Internal server error", msg.clone()),
        };
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}
