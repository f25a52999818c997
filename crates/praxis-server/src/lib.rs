pub mod auth;
pub mod error;
pub mod routes;
pub mod state;

use axum::routing::{get, post, put};
use axum::Router;
use std::time::Duration;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub use state::{AppState, Stores};

/// Build the axum Router with all API routes and middleware. Generic over
/// the store so integration tests can drive the full surface against the
/// in-memory store.
pub fn build_router<S: Stores>(state: AppState<S>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/api/v1/health", get(routes::health::health::<S>))
        // Approvals
        .route("/api/v1/approvals", post(routes::approvals::create::<S>))
        .route("/api/v1/approvals", get(routes::approvals::list::<S>))
        .route(
            "/api/v1/approvals/statuses",
            get(routes::approvals::statuses::<S>),
        )
        .route(
            "/api/v1/approvals/status/{enrollment_id}",
            get(routes::approvals::status::<S>),
        )
        .route(
            "/api/v1/approvals/status/{enrollment_id}",
            put(routes::approvals::force_status::<S>),
        )
        .route(
            "/api/v1/approvals/advisor/{enrollment_id}",
            post(routes::approvals::advisor_decision::<S>),
        )
        .route(
            "/api/v1/approvals/committee-voting/{enrollment_id}",
            get(routes::approvals::voting::<S>),
        )
        .route(
            "/api/v1/approvals/committee-vote/{enrollment_id}",
            post(routes::approvals::committee_vote::<S>),
        )
        // Evaluations
        .route(
            "/api/v1/evaluations",
            get(routes::evaluations::list::<S>),
        )
        .route(
            "/api/v1/evaluations/trackers",
            post(routes::evaluations::create_trackers::<S>),
        )
        .route(
            "/api/v1/evaluations/summary/{training_id}",
            get(routes::evaluations::summary::<S>),
        )
        .route(
            "/api/v1/evaluations/{id}/status",
            put(routes::evaluations::update_status::<S>),
        )
        .route(
            "/api/v1/evaluations/{id}/assign",
            put(routes::evaluations::assign::<S>),
        )
        .route(
            "/api/v1/evaluations/complete",
            post(routes::evaluations::complete::<S>),
        )
        .route(
            "/api/v1/evaluations/update-overdue",
            post(routes::evaluations::update_overdue::<S>),
        )
        .route(
            "/api/v1/evaluations/overdue",
            get(routes::evaluations::overdue::<S>),
        )
        .route(
            "/api/v1/evaluations/stats",
            get(routes::evaluations::stats::<S>),
        )
        .route(
            "/api/v1/evaluations/student/{training_id}/status",
            get(routes::evaluations::student_status::<S>),
        )
        .route(
            "/api/v1/evaluations/instructor/{instructor_id}/assignments",
            get(routes::evaluations::assignments::<S>),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(error::handle_panic))
        // Deadline inherited by every request; a transaction cut off by it
        // rolls back and the command has no effect.
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until shutdown.
pub async fn serve<S: Stores>(state: AppState<S>, port: u16) -> anyhow::Result<()> {
    let app = build_router(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("praxis API listening on http://localhost:{port}");

    axum::serve(listener, app).await?;
    Ok(())
}
