use axum::extract::State;
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use tracing::{error, info};

use crate::errors::AppError;
use crate::state::AppState;

/// Set to `cache` when the body is a stale fallback.
pub const DATA_SOURCE_HEADER: &str = "x-data-source";

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_lme_prices))
}

pub async fn get_lme_prices(State(state): State<AppState>) -> Result<Response, AppError> {
    info!("GET /api/lme - Getting LME prices");
    let snapshot = state.prices.get_prices().await.map_err(|e| {
        error!("Failed to get LME prices: {}", e);
        e
    })?;

    let mut response = Json(snapshot.data.as_ref()).into_response();
    if snapshot.is_stale() {
        response
            .headers_mut()
            .insert(DATA_SOURCE_HEADER, HeaderValue::from_static("cache"));
    }
    Ok(response)
}
