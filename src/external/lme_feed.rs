use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::external::price_source::{PriceSource, UpstreamError};

const USER_AGENT: &str = concat!("lme-price-proxy/", env!("CARGO_PKG_VERSION"));

/// Reads the daily LME quotation document over HTTP.
pub struct HttpPriceSource {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpPriceSource {
    /// Fails only if the TLS backend cannot be initialised.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn map_transport_error(&self, err: reqwest::Error) -> UpstreamError {
        if err.is_timeout() {
            UpstreamError::Timeout(self.timeout.as_millis() as u64)
        } else {
            UpstreamError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl PriceSource for HttpPriceSource {
    async fn fetch_prices(&self) -> Result<Value, UpstreamError> {
        debug!("GET {}", self.url);

        let resp = self
            .client
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(UpstreamError::BadStatus(status.as_u16()));
        }

        resp.json::<Value>().await.map_err(|e| {
            if e.is_timeout() {
                self.map_transport_error(e)
            } else {
                UpstreamError::Parse(e.to_string())
            }
        })
    }

    fn name(&self) -> &str {
        "lme-feed"
    }
}
