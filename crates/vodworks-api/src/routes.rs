use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::handlers::{breakers, health, services, stats, tasks};
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/metrics", get(health::metrics))
        .route(
            "/api/v1/tasks",
            post(tasks::submit_task).get(tasks::list_tasks),
        )
        .route(
            "/api/v1/tasks/{id}",
            get(tasks::get_task).delete(tasks::cancel_task),
        )
        .route("/api/v1/stats", get(stats::get_stats))
        .route("/api/v1/breakers", get(breakers::get_breaker_stats))
        .route("/api/v1/breakers/reset", post(breakers::reset_breakers))
        .route(
            "/api/v1/services/{name}",
            get(services::get_service_instances),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
