use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_UPSTREAM_URL: &str =
    "https://lme.gorilaxpress.com/cotacao/2cf4ff0e-8a30-48a5-8add-f4a1a63fee10/json/";
pub const DEFAULT_PTAX_BASE_URL: &str =
    "https://olinda.bcb.gov.br/olinda/servico/PTAX/versao/v1/odata";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("{key} must be {requirement}")]
    OutOfRange {
        key: &'static str,
        requirement: &'static str,
    },
}

/// Retry and cache policy of the price proxy.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub upstream_url: String,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub cache_ttl: Duration,
    /// Per-attempt limit on the upstream request.
    pub request_timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
            max_attempts: 3,
            retry_delay: Duration::from_millis(1000),
            cache_ttl: Duration::from_millis(5 * 60 * 1000),
            request_timeout: Duration::from_millis(10_000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PtaxConfig {
    pub enabled: bool,
    pub base_url: String,
    pub cache_ttl: Duration,
}

impl Default for PtaxConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: DEFAULT_PTAX_BASE_URL.to_string(),
            cache_ttl: Duration::from_millis(24 * 60 * 60 * 1000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub proxy: ProxyConfig,
    pub ptax: PtaxConfig,
    pub cors_allow: Vec<String>,
    pub static_dir: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            proxy: ProxyConfig::default(),
            ptax: PtaxConfig::default(),
            cors_allow: vec!["*".to_string()],
            static_dir: None,
        }
    }
}

impl Config {
    /// Reads the process environment; `main` loads `.env` into it beforehand.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let proxy = ProxyConfig {
            upstream_url: lookup("LME_UPSTREAM_URL")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.proxy.upstream_url),
            max_attempts: parse_or(&lookup, "LME_MAX_ATTEMPTS", defaults.proxy.max_attempts)?,
            retry_delay: millis_or(&lookup, "LME_RETRY_DELAY_MS", defaults.proxy.retry_delay)?,
            cache_ttl: millis_or(&lookup, "LME_CACHE_TTL_MS", defaults.proxy.cache_ttl)?,
            request_timeout: millis_or(
                &lookup,
                "LME_REQUEST_TIMEOUT_MS",
                defaults.proxy.request_timeout,
            )?,
        };

        let ptax = PtaxConfig {
            enabled: parse_or(&lookup, "PTAX_ENABLED", defaults.ptax.enabled)?,
            base_url: lookup("PTAX_BASE_URL")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.ptax.base_url),
            cache_ttl: millis_or(&lookup, "PTAX_CACHE_TTL_MS", defaults.ptax.cache_ttl)?,
        };

        let cors_allow = lookup("CORS_ALLOW_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|origins| !origins.is_empty())
            .unwrap_or(defaults.cors_allow);

        let config = Self {
            port: parse_or(&lookup, "PORT", defaults.port)?,
            proxy,
            ptax,
            cors_allow,
            static_dir: lookup("STATIC_DIR").filter(|s| !s.trim().is_empty()),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.proxy.max_attempts == 0 {
            return Err(ConfigError::OutOfRange {
                key: "LME_MAX_ATTEMPTS",
                requirement: "at least 1",
            });
        }
        if self.proxy.cache_ttl.is_zero() {
            return Err(ConfigError::OutOfRange {
                key: "LME_CACHE_TTL_MS",
                requirement: "greater than 0",
            });
        }
        if self.proxy.request_timeout.is_zero() {
            return Err(ConfigError::OutOfRange {
                key: "LME_REQUEST_TIMEOUT_MS",
                requirement: "greater than 0",
            });
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|_| ConfigError::Invalid { key, value: raw })
        }
        _ => Ok(default),
    }
}

fn millis_or<F>(lookup: &F, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let default_ms = default.as_millis() as u64;
    parse_or(lookup, key, default_ms).map(Duration::from_millis)
}
