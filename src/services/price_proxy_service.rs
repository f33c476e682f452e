use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::ProxyConfig;
use crate::errors::ProxyError;
use crate::external::price_source::{PriceSource, UpstreamError};
use crate::external::ptax::PtaxEnricher;
use crate::models::{HealthStatus, PriceSnapshot, Provenance};
use crate::services::price_cache::{CacheEntry, PriceCache};

/// Serves the LME price document from a single-slot cache, refreshing it from upstream
/// with a fixed-delay retry and falling back to stale data when upstream is down.
///
/// Concurrent callers that find the cache expired wait for one refresh cycle instead of
/// each hitting upstream.
pub struct PriceProxyService {
    config: ProxyConfig,
    source: Arc<dyn PriceSource>,
    enricher: Option<PtaxEnricher>,
    cache: PriceCache,
    refresh_lock: tokio::sync::Mutex<()>,
    refresh_cycles: AtomicU64,
    last_failure: Mutex<Option<(u32, UpstreamError)>>,
}

impl PriceProxyService {
    pub fn new(config: ProxyConfig, source: Arc<dyn PriceSource>) -> Self {
        Self {
            config,
            source,
            enricher: None,
            cache: PriceCache::new(),
            refresh_lock: tokio::sync::Mutex::new(()),
            refresh_cycles: AtomicU64::new(0),
            last_failure: Mutex::new(None),
        }
    }

    pub fn with_enricher(mut self, enricher: PtaxEnricher) -> Self {
        self.enricher = Some(enricher);
        self
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub async fn get_prices(&self) -> Result<PriceSnapshot, ProxyError> {
        let ttl = self.config.cache_ttl;

        if let Some(entry) = self.cache.fresh(ttl) {
            debug!("Serving LME prices from cache (age {:?})", entry.age());
            return Ok(snapshot(&entry, Provenance::Fresh));
        }

        let observed_cycles = self.refresh_cycles.load(Ordering::Acquire);
        let _refresh = self.refresh_lock.lock().await;

        // Someone else may have finished a refresh cycle while we waited for the lock.
        if let Some(entry) = self.cache.fresh(ttl) {
            debug!("Cache refreshed by a concurrent request");
            return Ok(snapshot(&entry, Provenance::Fresh));
        }
        if self.refresh_cycles.load(Ordering::Acquire) != observed_cycles {
            let failure = self.last_failure.lock().clone();
            if let Some((attempts, source)) = failure {
                return self.fall_back(attempts, source);
            }
        }

        let outcome = self
            .fetch_with_retry(self.config.max_attempts, self.config.retry_delay)
            .await;

        let result = match outcome {
            Ok(data) => {
                let data = match &self.enricher {
                    Some(enricher) => enricher.enrich(data).await,
                    None => data,
                };
                let entry = self.cache.store(data);
                *self.last_failure.lock() = None;
                info!("✓ Refreshed LME prices from {}", self.source.name());
                Ok(snapshot(&entry, Provenance::Fresh))
            }
            Err(ProxyError::ExhaustedRetries { attempts, source }) => {
                *self.last_failure.lock() = Some((attempts, source.clone()));
                self.fall_back(attempts, source)
            }
            Err(other) => Err(other),
        };

        self.refresh_cycles.fetch_add(1, Ordering::Release);
        result
    }

    /// One GET per attempt, `retry_delay` between attempts, at most `max_attempts` calls.
    pub async fn fetch_with_retry(
        &self,
        max_attempts: u32,
        retry_delay: Duration,
    ) -> Result<Value, ProxyError> {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.source.fetch_prices().await {
                Ok(data) => {
                    if attempt > 1 {
                        info!("Upstream recovered on attempt {}/{}", attempt, max_attempts);
                    }
                    return Ok(data);
                }
                Err(e) if attempt < max_attempts => {
                    warn!(
                        "Attempt {}/{} to fetch LME prices failed: {}. Retrying in {}ms ({} attempts left)",
                        attempt,
                        max_attempts,
                        e,
                        retry_delay.as_millis(),
                        max_attempts - attempt
                    );
                    sleep(retry_delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!("Attempt {}/{} to fetch LME prices failed: {}", attempt, max_attempts, e);
                    return Err(ProxyError::ExhaustedRetries {
                        attempts: max_attempts,
                        source: e,
                    });
                }
            }
        }
    }

    /// Always succeeds; never touches upstream or the cache.
    pub fn health_check(&self) -> HealthStatus {
        HealthStatus::healthy_at(Utc::now())
    }

    fn fall_back(&self, attempts: u32, source: UpstreamError) -> Result<PriceSnapshot, ProxyError> {
        match self.cache.latest() {
            Some(entry) => {
                warn!(
                    "Upstream unavailable ({}), serving cached LME prices from {} (age {:?})",
                    source,
                    entry.fetched_at,
                    entry.age()
                );
                Ok(snapshot(&entry, Provenance::StaleCache))
            }
            None => {
                error!("Upstream unavailable after {} attempts and nothing cached: {}", attempts, source);
                Err(ProxyError::NoDataAvailable { attempts, source })
            }
        }
    }
}

fn snapshot(entry: &CacheEntry, provenance: Provenance) -> PriceSnapshot {
    PriceSnapshot {
        data: entry.data.clone(),
        provenance,
        fetched_at: entry.fetched_at,
    }
}
