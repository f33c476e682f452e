use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// A single failed attempt to read the upstream price feed.
///
/// These never reach HTTP callers directly: the retry loop absorbs them and only the
/// last one is kept as the source of the terminal error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {0} ms")]
    Timeout(u64),

    #[error("HTTP error! status: {0}")]
    BadStatus(u16),

    #[error("parse error: {0}")]
    Parse(String),
}

/// Anything that can produce the raw LME price document in one attempt.
///
/// The payload is passed through untouched, so it stays an opaque `serde_json::Value`.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_prices(&self) -> Result<Value, UpstreamError>;

    /// Short label used in log lines.
    fn name(&self) -> &str {
        "upstream"
    }
}
