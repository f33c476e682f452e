use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ProxyConfig;

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub loki_enabled: bool,
    pub loki_url: Option<String>,
    pub service_name: String,
    pub environment: String,
    pub log_level: String,
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        Self {
            loki_enabled: std::env::var("LOKI_ENABLED")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            loki_url: std::env::var("LOKI_URL").ok(),
            service_name: std::env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "lme-price-proxy".to_string()),
            environment: std::env::var("ENVIRONMENT")
                .unwrap_or_else(|_| "development".to_string()),
            log_level: std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,lme_price_proxy=info,tower_http=info".to_string()),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.loki_enabled && self.loki_url.is_none() {
            return Err("LOKI_ENABLED is true but LOKI_URL is not set".to_string());
        }
        Ok(())
    }
}

/// First line every proxy instance logs, so a log search can tell which feed and policy
/// a given process was running with.
pub fn startup_banner(config: &LoggingConfig, proxy: &ProxyConfig) -> String {
    format!(
        "{} ({}) proxying {} [attempts={}, retry_delay={}ms, ttl={}s, timeout={}ms]",
        config.service_name,
        config.environment,
        proxy.upstream_url,
        proxy.max_attempts,
        proxy.retry_delay.as_millis(),
        proxy.cache_ttl.as_secs(),
        proxy.request_timeout.as_millis()
    )
}

/// Host part of the upstream URL, used as a low-cardinality Loki label.
#[cfg(any(feature = "loki", test))]
fn upstream_host(proxy: &ProxyConfig) -> String {
    url::Url::parse(&proxy.upstream_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn init_logging(
    config: LoggingConfig,
    proxy: &ProxyConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;

    #[cfg(feature = "loki")]
    {
        if config.loki_enabled {
            if let Some(loki_url) = config.loki_url.clone() {
                return init_with_loki(config, proxy, &loki_url);
            }
        }
    }

    init_console_only(config, proxy)
}

fn init_console_only(
    config: LoggingConfig,
    proxy: &ProxyConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.log_level))
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    tracing::info!("📊 {}", startup_banner(&config, proxy));
    Ok(())
}

#[cfg(feature = "loki")]
fn init_with_loki(
    config: LoggingConfig,
    proxy: &ProxyConfig,
    loki_url: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let url = url::Url::parse(loki_url)?;

    let (loki_layer, task) = tracing_loki::builder()
        .label("service", &config.service_name)?
        .label("environment", &config.environment)?
        .label("upstream_host", upstream_host(proxy))?
        .build_url(url)?;

    // Ships buffered log lines to Loki
    tokio::spawn(task);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.log_level))
        .with(tracing_subscriber::fmt::layer())
        .with(loki_layer)
        .try_init()?;

    tracing::info!("📊 {} (shipping to Loki at {})", startup_banner(&config, proxy), loki_url);
    Ok(())
}
