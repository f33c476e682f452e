use std::any::Any;

use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any as AnyOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::config::Config;
use crate::errors::AppError;
use crate::routes::lme::DATA_SOURCE_HEADER;
use crate::routes::{health, lme};
use crate::state::AppState;

pub const SERVER_STATUS_HEADER: &str = "x-server-status";

pub fn create_app(state: AppState, config: &Config) -> Router {
    let mut app = Router::<AppState>::new()
        .nest("/health", health::router())
        .nest("/api/health", health::router())
        .nest("/api/lme", lme::router())
        .with_state(state);

    if let Some(dir) = &config.static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(CatchPanicLayer::custom(handle_panic))
        .layer(cors_layer(&config.cors_allow))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static(SERVER_STATUS_HEADER),
            HeaderValue::from_static("healthy"),
        ))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(allowed: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(SERVER_STATUS_HEADER),
        ])
        .expose_headers([
            HeaderName::from_static(DATA_SOURCE_HEADER),
            HeaderName::from_static(SERVER_STATUS_HEADER),
        ]);

    if allowed.iter().any(|o| o == "*") {
        return base.allow_origin(AnyOrigin);
    }

    let origins: Vec<HeaderValue> = allowed
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", o);
                None
            }
        })
        .collect();
    base.allow_origin(origins)
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    error!("Unhandled panic while serving request: {}", detail);
    AppError::Internal(detail).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::config::ProxyConfig;
    use crate::external::price_source::UpstreamError;
    use crate::services::price_proxy_service::tests::ScriptedSource;
    use crate::services::price_proxy_service::PriceProxyService;

    fn app_with(source: std::sync::Arc<ScriptedSource>) -> Router {
        let config = Config {
            proxy: ProxyConfig {
                retry_delay: Duration::from_millis(10),
                ..ProxyConfig::default()
            },
            ..Config::default()
        };
        let service = PriceProxyService::new(config.proxy.clone(), source);
        create_app(AppState::new(service), &config)
    }

    async fn get(app: &Router, uri: &str) -> (StatusCode, axum::http::HeaderMap, Value) {
        let resp = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, headers, body)
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_answers_with_upstream_down() {
        let source = ScriptedSource::new(vec![]);
        let app = app_with(source.clone());

        for uri in ["/health", "/api/health"] {
            let (status, headers, body) = get(&app, uri).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["status"], "healthy");
            assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));
            assert_eq!(headers[SERVER_STATUS_HEADER], "healthy");
        }
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lme_passthrough_then_stale_fallback() {
        let payload = json!({ "results": [{ "data": "2024-01-15", "aluminio": 2210.5, "cobre": 8301.0 }] });
        let source = ScriptedSource::new(vec![Ok(payload.clone())]);
        let app = app_with(source.clone());

        let (status, headers, body) = get(&app, "/api/lme").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, payload);
        assert!(headers.get(DATA_SOURCE_HEADER).is_none());

        tokio::time::advance(Duration::from_secs(301)).await;

        let (status, headers, body) = get(&app, "/api/lme").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, payload);
        assert_eq!(headers[DATA_SOURCE_HEADER], "cache");
        assert_eq!(source.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lme_without_any_data_is_500() {
        let source = ScriptedSource::new(vec![
            Err(UpstreamError::BadStatus(500)),
            Err(UpstreamError::BadStatus(500)),
            Err(UpstreamError::BadStatus(500)),
        ]);
        let app = app_with(source);

        let (status, headers, body) = get(&app, "/api/lme").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(headers[SERVER_STATUS_HEADER], "healthy");
        assert_eq!(body["message"], "HTTP error! status: 500");
        assert!(body["error"].is_string());
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cors_preflight_allows_any_origin_by_default() {
        let app = app_with(ScriptedSource::new(vec![]));

        let resp = app
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/api/lme")
                    .header(header::ORIGIN, "http://localhost:5173")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[test]
    fn test_panic_becomes_json_500() {
        let resp = handle_panic(Box::new("boom"));
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
