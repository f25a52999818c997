use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use praxis_core::evaluation::{StudentEvaluationStatus, Summary};
use praxis_core::model::{EvaluationTracker, Page};
use praxis_core::store::TrackerStats;
use praxis_core::types::{EvaluationKind, TrackerStatus};
use serde::Deserialize;

use crate::auth::Auth;
use crate::error::AppError;
use crate::routes::{parse_id, parse_limit, parse_page};
use crate::state::{AppState, Stores};

#[derive(Deserialize)]
pub struct CreateTrackersBody {
    pub training_id: i64,
}

/// POST /api/v1/evaluations/trackers — fan out the three trackers for a
/// training. Idempotent.
pub async fn create_trackers<S: Stores>(
    State(app): State<AppState<S>>,
    Auth(_principal): Auth,
    Json(body): Json<CreateTrackersBody>,
) -> Result<(StatusCode, Json<Vec<EvaluationTracker>>), AppError> {
    if body.training_id <= 0 {
        return Err(AppError::validation("training_id must be positive"));
    }
    let trackers = app.evaluations.ensure_trackers(body.training_id).await?;
    Ok((StatusCode::CREATED, Json(trackers)))
}

/// GET /api/v1/evaluations/summary/{training_id} — trackers + derived
/// progress.
pub async fn summary<S: Stores>(
    State(app): State<AppState<S>>,
    Auth(_principal): Auth,
    Path(training_id): Path<String>,
) -> Result<Json<Summary>, AppError> {
    let training_id = parse_id(&training_id, "training id")?;
    Ok(Json(app.evaluations.summary(training_id).await?))
}

#[derive(Deserialize, Default)]
pub struct ListQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub status: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
}

/// GET /api/v1/evaluations?type=…&status=…&page=…&limit=… — paginated
/// listing.
pub async fn list<S: Stores>(
    State(app): State<AppState<S>>,
    Auth(_principal): Auth,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<EvaluationTracker>>, AppError> {
    let kind = query
        .kind
        .as_deref()
        .map(str::parse::<EvaluationKind>)
        .transpose()?;
    let status = query
        .status
        .as_deref()
        .map(str::parse::<TrackerStatus>)
        .transpose()?;
    let page = parse_page(query.page.as_deref())?;
    let limit = parse_limit(query.limit.as_deref())?;
    Ok(Json(app.evaluations.list(kind, status, page, limit).await?))
}

#[derive(Deserialize)]
pub struct UpdateStatusBody {
    pub status: String,
    #[serde(default)]
    pub remarks: Option<String>,
}

/// PUT /api/v1/evaluations/{id}/status — move a tracker along its lattice.
pub async fn update_status<S: Stores>(
    State(app): State<AppState<S>>,
    Auth(_principal): Auth,
    Path(tracker_id): Path<String>,
    Json(body): Json<UpdateStatusBody>,
) -> Result<Json<EvaluationTracker>, AppError> {
    let tracker_id = parse_id(&tracker_id, "tracker id")?;
    let status: TrackerStatus = body.status.parse()?;
    let tracker = app
        .evaluations
        .update_status(tracker_id, status, body.remarks)
        .await?;
    Ok(Json(tracker))
}

#[derive(Deserialize)]
pub struct AssignBody {
    pub evaluator_id: i64,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
}

/// PUT /api/v1/evaluations/{id}/assign — set evaluator and due date.
pub async fn assign<S: Stores>(
    State(app): State<AppState<S>>,
    Auth(_principal): Auth,
    Path(tracker_id): Path<String>,
    Json(body): Json<AssignBody>,
) -> Result<Json<EvaluationTracker>, AppError> {
    let tracker_id = parse_id(&tracker_id, "tracker id")?;
    if body.evaluator_id <= 0 {
        return Err(AppError::validation("evaluator_id must be positive"));
    }
    let tracker = app
        .evaluations
        .assign_evaluator(tracker_id, body.evaluator_id, body.due_date)
        .await?;
    Ok(Json(tracker))
}

#[derive(Deserialize)]
pub struct CompleteBody {
    pub training_id: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

/// POST /api/v1/evaluations/complete — completion signal from a form
/// handler. Idempotent.
pub async fn complete<S: Stores>(
    State(app): State<AppState<S>>,
    Auth(_principal): Auth,
    Json(body): Json<CompleteBody>,
) -> Result<Json<EvaluationTracker>, AppError> {
    if body.training_id <= 0 {
        return Err(AppError::validation("training_id must be positive"));
    }
    let kind: EvaluationKind = body.kind.parse()?;
    let tracker = app.evaluations.mark_completed(body.training_id, kind).await?;
    Ok(Json(tracker))
}

/// POST /api/v1/evaluations/update-overdue — run the overdue sweep.
pub async fn update_overdue<S: Stores>(
    State(app): State<AppState<S>>,
    Auth(_principal): Auth,
) -> Result<Json<serde_json::Value>, AppError> {
    let transitioned = app.evaluations.sweep_overdue().await?;
    Ok(Json(serde_json::json!({ "transitioned": transitioned })))
}

/// GET /api/v1/evaluations/overdue — live trackers already past due.
pub async fn overdue<S: Stores>(
    State(app): State<AppState<S>>,
    Auth(_principal): Auth,
) -> Result<Json<Vec<EvaluationTracker>>, AppError> {
    Ok(Json(app.evaluations.list_overdue().await?))
}

/// GET /api/v1/evaluations/stats — counts by status and type.
pub async fn stats<S: Stores>(
    State(app): State<AppState<S>>,
    Auth(_principal): Auth,
) -> Result<Json<TrackerStats>, AppError> {
    Ok(Json(app.evaluations.stats().await?))
}

/// GET /api/v1/evaluations/student/{training_id}/status — witness-backed
/// completion check.
pub async fn student_status<S: Stores>(
    State(app): State<AppState<S>>,
    Auth(_principal): Auth,
    Path(training_id): Path<String>,
) -> Result<Json<StudentEvaluationStatus>, AppError> {
    let training_id = parse_id(&training_id, "training id")?;
    Ok(Json(app.evaluations.student_status(training_id).await?))
}

#[derive(Deserialize, Default)]
pub struct AssignmentsQuery {
    pub status: Option<String>,
}

/// GET /api/v1/evaluations/instructor/{instructor_id}/assignments — trackers
/// assigned to an evaluator.
pub async fn assignments<S: Stores>(
    State(app): State<AppState<S>>,
    Auth(_principal): Auth,
    Path(instructor_id): Path<String>,
    Query(query): Query<AssignmentsQuery>,
) -> Result<Json<Vec<EvaluationTracker>>, AppError> {
    let instructor_id = parse_id(&instructor_id, "instructor id")?;
    let status = query
        .status
        .as_deref()
        .map(str::parse::<TrackerStatus>)
        .transpose()?;
    Ok(Json(app.evaluations.assignments(instructor_id, status).await?))
}
