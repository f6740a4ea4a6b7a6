use axum::{extract::State, response::IntoResponse, Json};

use crate::api_state::ApiState;

/// Liveness plus dependency probes. Never fails the request itself; a
/// struggling dependency is reported as `degraded`/`unhealthy` in the body.
pub async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.management.health().await)
}
