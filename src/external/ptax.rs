use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::external::price_source::UpstreamError;

/// Field added to every daily record when enrichment is on.
pub const PTAX_FIELD: &str = "dolar_ptax";

const MAX_CONCURRENT_LOOKUPS: usize = 8;

/// Source of PTAX dollar selling rates, one business day at a time.
#[async_trait]
pub trait PtaxRateSource: Send + Sync {
    /// `Ok(None)` means the central bank published no quote for that day.
    async fn selling_rate(&self, date: NaiveDate) -> Result<Option<f64>, UpstreamError>;
}

/// Client for the Banco Central do Brasil Olinda OData PTAX service.
pub struct BcbPtaxClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct PtaxResponse {
    #[serde(default)]
    value: Vec<PtaxQuote>,
}

#[derive(Debug, Deserialize)]
struct PtaxQuote {
    #[serde(rename = "cotacaoVenda")]
    selling: f64,
}

impl BcbPtaxClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn quote_url(&self, date: NaiveDate) -> String {
        format!(
            "{}/CotacaoDolarDia(dataCotacao=@dataCotacao)?@dataCotacao='{}'&$format=json",
            self.base_url,
            date.format("%m-%d-%Y")
        )
    }
}

#[async_trait]
impl PtaxRateSource for BcbPtaxClient {
    async fn selling_rate(&self, date: NaiveDate) -> Result<Option<f64>, UpstreamError> {
        let resp = self
            .client
            .get(self.quote_url(date))
            .send()
            .await
            .map_err(|e| UpstreamError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(UpstreamError::BadStatus(resp.status().as_u16()));
        }

        let body: PtaxResponse = resp
            .json()
            .await
            .map_err(|e| UpstreamError::Parse(e.to_string()))?;

        Ok(body.value.first().map(|q| q.selling))
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedRate {
    rate: Option<f64>,
    cached_at: Instant,
}

/// Adds the PTAX selling rate to each record of an LME document.
///
/// Rates are cached per date. A day without a quote is cached as `None`; a failed
/// lookup is not cached, so the next refresh asks again. Enrichment never fails: any
/// problem for a record turns into `"dolar_ptax": null`.
pub struct PtaxEnricher {
    source: Arc<dyn PtaxRateSource>,
    rates: DashMap<NaiveDate, CachedRate>,
    ttl: Duration,
}

impl PtaxEnricher {
    pub fn new(source: Arc<dyn PtaxRateSource>, ttl: Duration) -> Self {
        Self {
            source,
            rates: DashMap::new(),
            ttl,
        }
    }

    /// Enriches `results[*]` in place, preserving record order.
    /// Documents without a `results` array come back untouched.
    ///
    /// Each distinct date is looked up once per call, however many records share it.
    pub async fn enrich(&self, mut document: Value) -> Value {
        let Some(results) = document.get_mut("results").and_then(Value::as_array_mut) else {
            debug!("LME document has no results array, skipping PTAX enrichment");
            return document;
        };

        let dates: Vec<Option<NaiveDate>> = results
            .iter()
            .map(|record| record.get("data").and_then(Value::as_str).and_then(parse_record_date))
            .collect();

        let mut distinct: Vec<NaiveDate> = dates.iter().flatten().copied().collect();
        distinct.sort_unstable();
        distinct.dedup();

        let rates: HashMap<NaiveDate, Option<f64>> = stream::iter(distinct)
            .map(|date| async move { (date, self.rate_for(date).await) })
            .buffer_unordered(MAX_CONCURRENT_LOOKUPS)
            .collect()
            .await;

        for (record, date) in results.iter_mut().zip(dates) {
            let rate = match date {
                Some(date) => rates.get(&date).copied().flatten(),
                None => {
                    debug!("Record has no usable date, setting {} to null", PTAX_FIELD);
                    None
                }
            };
            if let Some(fields) = record.as_object_mut() {
                fields.insert(PTAX_FIELD.to_string(), json!(rate));
            }
        }

        document
    }

    async fn rate_for(&self, date: NaiveDate) -> Option<f64> {
        if let Some(cached) = self.rates.get(&date) {
            if cached.cached_at.elapsed() < self.ttl {
                return cached.rate;
            }
        }

        match self.source.selling_rate(date).await {
            Ok(rate) => {
                self.rates.insert(
                    date,
                    CachedRate {
                        rate,
                        cached_at: Instant::now(),
                    },
                );
                rate
            }
            Err(e) => {
                warn!("Failed to fetch PTAX for {}: {}", date, e);
                None
            }
        }
    }

    /// Number of dates currently cached.
    pub fn cached_dates(&self) -> usize {
        self.rates.len()
    }
}

/// Accepts `YYYY-MM-DD` (optionally followed by a time part) and `DD/MM/YYYY`.
pub fn parse_record_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Some(day) = raw.get(..10) {
        if let Ok(date) = NaiveDate::parse_from_str(day, "%Y-%m-%d") {
            return Some(date);
        }
    }
    NaiveDate::parse_from_str(raw, "%d/%m/%Y").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedRates {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PtaxRateSource for FixedRates {
        async fn selling_rate(&self, date: NaiveDate) -> Result<Option<f64>, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match date.format("%Y-%m-%d").to_string().as_str() {
                "2024-01-15" => Ok(Some(4.9123)),
                "2024-01-13" => Ok(None),
                _ => Err(UpstreamError::BadStatus(500)),
            }
        }
    }

    fn enricher() -> (Arc<FixedRates>, PtaxEnricher) {
        let rates = Arc::new(FixedRates {
            calls: AtomicUsize::new(0),
        });
        let enricher = PtaxEnricher::new(rates.clone(), Duration::from_secs(3600));
        (rates, enricher)
    }

    #[test]
    fn test_parse_record_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert_eq!(parse_record_date("2024-01-15"), Some(expected));
        assert_eq!(parse_record_date("2024-01-15T00:00:00Z"), Some(expected));
        assert_eq!(parse_record_date("15/01/2024"), Some(expected));
        assert_eq!(parse_record_date("yesterday"), None);
        assert_eq!(parse_record_date(""), None);
    }

    #[tokio::test]
    async fn test_enrich_sets_rate_and_nulls() {
        let (_, enricher) = enricher();
        let doc = json!({
            "results": [
                { "data": "2024-01-15", "aluminio": 2210.5 },
                { "data": "2024-01-13", "aluminio": 2200.0 },
                { "data": "2024-01-12", "aluminio": 2190.0 },
                { "aluminio": 2180.0 }
            ]
        });

        let out = enricher.enrich(doc).await;
        let results = out["results"].as_array().unwrap();

        assert_eq!(results.len(), 4);
        assert_eq!(results[0][PTAX_FIELD], json!(4.9123));
        assert_eq!(results[0]["aluminio"], json!(2210.5));
        assert!(results[1][PTAX_FIELD].is_null());
        assert!(results[2][PTAX_FIELD].is_null());
        assert!(results[3][PTAX_FIELD].is_null());
    }

    #[tokio::test]
    async fn test_enrich_leaves_documents_without_results_alone() {
        let (rates, enricher) = enricher();
        let doc = json!({ "status": "ok", "rows": [1, 2, 3] });

        let out = enricher.enrich(doc.clone()).await;

        assert_eq!(out, doc);
        assert_eq!(rates.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rates_cached_per_date_but_failures_retried() {
        let (rates, enricher) = enricher();
        let doc = json!({
            "results": [
                { "data": "2024-01-15" },
                { "data": "2024-01-13" },
                { "data": "2024-01-12" }
            ]
        });

        enricher.enrich(doc.clone()).await;
        assert_eq!(rates.calls.load(Ordering::SeqCst), 3);
        // 2024-01-12 failed and must not be cached
        assert_eq!(enricher.cached_dates(), 2);

        enricher.enrich(doc).await;
        assert_eq!(rates.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_quote_url_uses_odata_parameter_format() {
        let client = BcbPtaxClient::new(
            "https://olinda.bcb.gov.br/olinda/servico/PTAX/versao/v1/odata/",
            Duration::from_secs(5),
        )
        .unwrap();

        let url = client.quote_url(NaiveDate::from_ymd_opt(2024, 3, 7).unwrap());
        assert_eq!(
            url,
            "https://olinda.bcb.gov.br/olinda/servico/PTAX/versao/v1/odata/CotacaoDolarDia(dataCotacao=@dataCotacao)?@dataCotacao='03-07-2024'&$format=json"
        );
    }

    #[tokio::test]
    async fn test_shared_dates_are_looked_up_once() {
        let (rates, enricher) = enricher();
        let doc = json!({
            "results": [
                { "data": "2024-01-15", "cobre": 8301.0 },
                { "data": "2024-01-15T18:00:00Z", "aluminio": 2210.0 },
                { "data": "15/01/2024", "zinco": 2520.0 }
            ]
        });

        let out = enricher.enrich(doc).await;

        assert_eq!(rates.calls.load(Ordering::SeqCst), 1);
        for record in out["results"].as_array().unwrap() {
            assert_eq!(record[PTAX_FIELD], json!(4.9123));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_rate_expires_after_ttl() {
        let (rates, enricher) = enricher();
        let doc = json!({ "results": [{ "data": "2024-01-15" }] });

        enricher.enrich(doc.clone()).await;
        tokio::time::advance(Duration::from_secs(3599)).await;
        enricher.enrich(doc.clone()).await;
        assert_eq!(rates.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        let out = enricher.enrich(doc).await;

        assert_eq!(rates.calls.load(Ordering::SeqCst), 2);
        assert_eq!(out["results"][0][PTAX_FIELD], json!(4.9123));
    }
}
