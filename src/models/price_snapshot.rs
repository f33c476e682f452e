use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

/// Where a price document handed to a caller came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    /// Fetched from upstream within the cache TTL.
    Fresh,
    /// Upstream failed; this is the last good document, older than the TTL.
    StaleCache,
}

#[derive(Debug, Clone)]
pub struct PriceSnapshot {
    pub data: Arc<Value>,
    pub provenance: Provenance,
    pub fetched_at: DateTime<Utc>,
}

impl PriceSnapshot {
    pub fn is_stale(&self) -> bool {
        self.provenance == Provenance::StaleCache
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub timestamp: String,
}

impl HealthStatus {
    pub fn healthy_at(now: DateTime<Utc>) -> Self {
        Self {
            status: "healthy",
            timestamp: iso8601(now),
        }
    }
}

/// `2024-01-15T10:30:00.000Z`, the format browsers produce with `toISOString()`.
pub fn iso8601(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
