use axum::extract::{Path, State};
use axum::Json;
use std::sync::Arc;

use vodworks_core::models::ServiceInstance;

use crate::state::AppState;

/// Healthy instances of a named dependency, as the load balancer sees them.
pub async fn get_service_instances(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Json<Vec<ServiceInstance>> {
    Json(state.discovery.discover(&name).await)
}
