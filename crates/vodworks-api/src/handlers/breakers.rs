use axum::extract::State;
use axum::Json;
use serde_json::json;
use std::sync::Arc;

use vodworks_resilience::BreakerStats;

use crate::state::AppState;

pub async fn get_breaker_stats(State(state): State<Arc<AppState>>) -> Json<Vec<BreakerStats>> {
    Json(state.breakers.all_stats())
}

/// Administrative: force every breaker back to Closed.
pub async fn reset_breakers(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    state.breakers.reset_all();
    tracing::info!("All circuit breakers reset");
    Json(json!({ "status": "reset" }))
}
