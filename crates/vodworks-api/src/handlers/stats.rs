use axum::extract::State;
use axum::Json;
use serde_json::json;
use std::sync::Arc;

use crate::state::AppState;

/// One snapshot across store, queue, and pool. The store is the source of
/// truth for task state; queue metrics are approximate scheduling signals.
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let tasks = state.store.stats().await;
    let queue = state.queue.metrics().snapshot();
    let pool = state.pool.stats().await;
    let workers = state.pool.workers().await;
    Json(json!({
        "tasks": tasks,
        "queue": queue,
        "pool": pool,
        "workers": workers,
    }))
}
