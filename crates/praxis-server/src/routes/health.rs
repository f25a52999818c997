use axum::extract::State;
use axum::Json;

use crate::state::{AppState, Stores};

/// GET /api/v1/health — liveness, uptime, and deployment label. Unauthenticated.
pub async fn health<S: Stores>(State(app): State<AppState<S>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "uptime_seconds": app.started_at.elapsed().as_secs(),
        "environment": app.environment,
    }))
}
