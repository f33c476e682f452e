use axum::extract::State;
use axum::{routing::get, Json, Router};
use tracing::debug;

use crate::models::HealthStatus;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(health))
}

async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    debug!("GET /health - Health check");
    Json(state.prices.health_check())
}
