use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;

use lme_price_proxy::app;
use lme_price_proxy::config::Config;
use lme_price_proxy::external::lme_feed::HttpPriceSource;
use lme_price_proxy::external::ptax::{BcbPtaxClient, PtaxEnricher};
use lme_price_proxy::logging::{init_logging, LoggingConfig};
use lme_price_proxy::services::price_proxy_service::PriceProxyService;
use lme_price_proxy::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("invalid configuration")?;

    init_logging(LoggingConfig::from_env(), &config.proxy)
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    let source = HttpPriceSource::new(&config.proxy.upstream_url, config.proxy.request_timeout)
        .context("failed to build upstream HTTP client")?;

    let mut service = PriceProxyService::new(config.proxy.clone(), Arc::new(source));
    if config.ptax.enabled {
        let client = BcbPtaxClient::new(&config.ptax.base_url, config.proxy.request_timeout)
            .context("failed to build PTAX HTTP client")?;
        service = service.with_enricher(PtaxEnricher::new(Arc::new(client), config.ptax.cache_ttl));
        tracing::info!("💵 PTAX enrichment enabled ({})", config.ptax.base_url);
    }

    let app = app::create_app(AppState::new(service), &config);

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("🚀 LME price proxy running at http://{}/", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
