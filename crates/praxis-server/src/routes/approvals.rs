use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use praxis_core::approval::{StatusView, VoteCast, VotingView};
use praxis_core::model::{Approval, Page};
use praxis_core::types::{ApprovalStatus, VoteDecision};
use serde::Deserialize;

use crate::auth::Auth;
use crate::error::AppError;
use crate::routes::{parse_id, parse_limit, parse_page};
use crate::state::{AppState, Stores};

#[derive(Deserialize)]
pub struct CreateApprovalBody {
    pub enrollment_id: i64,
    #[serde(default)]
    pub advisor_id: Option<i64>,
}

/// POST /api/v1/approvals — register an approval for an enrollment.
pub async fn create<S: Stores>(
    State(app): State<AppState<S>>,
    Auth(principal): Auth,
    Json(body): Json<CreateApprovalBody>,
) -> Result<(StatusCode, Json<Approval>), AppError> {
    if body.enrollment_id <= 0 {
        return Err(AppError::validation("enrollment_id must be positive"));
    }
    let approval = app
        .approvals
        .create(&principal, body.enrollment_id, body.advisor_id)
        .await?;
    Ok((StatusCode::CREATED, Json(approval)))
}

/// GET /api/v1/approvals/status/{enrollment_id} — current status + tally.
pub async fn status<S: Stores>(
    State(app): State<AppState<S>>,
    Auth(_principal): Auth,
    Path(enrollment_id): Path<String>,
) -> Result<Json<StatusView>, AppError> {
    let enrollment_id = parse_id(&enrollment_id, "enrollment id")?;
    Ok(Json(app.approvals.status_view(enrollment_id).await?))
}

#[derive(Deserialize)]
pub struct AdvisorDecisionBody {
    pub approved: bool,
    #[serde(default)]
    pub remarks: Option<String>,
}

/// POST /api/v1/approvals/advisor/{enrollment_id} — advisor verdict. The
/// advisor of record is the token subject.
pub async fn advisor_decision<S: Stores>(
    State(app): State<AppState<S>>,
    Auth(principal): Auth,
    Path(enrollment_id): Path<String>,
    Json(body): Json<AdvisorDecisionBody>,
) -> Result<Json<Approval>, AppError> {
    let enrollment_id = parse_id(&enrollment_id, "enrollment id")?;
    let approval = app
        .approvals
        .advisor_decision(&principal, enrollment_id, body.approved, body.remarks)
        .await?;
    Ok(Json(approval))
}

/// GET /api/v1/approvals/committee-voting/{enrollment_id} — members, votes,
/// tally, quorum flag.
pub async fn voting<S: Stores>(
    State(app): State<AppState<S>>,
    Auth(_principal): Auth,
    Path(enrollment_id): Path<String>,
) -> Result<Json<VotingView>, AppError> {
    let enrollment_id = parse_id(&enrollment_id, "enrollment id")?;
    Ok(Json(app.approvals.voting_view(enrollment_id).await?))
}

#[derive(Deserialize)]
pub struct CommitteeVoteBody {
    pub vote: String,
    #[serde(default)]
    pub remarks: Option<String>,
}

/// POST /api/v1/approvals/committee-vote/{enrollment_id} — cast a vote as the
/// token subject.
pub async fn committee_vote<S: Stores>(
    State(app): State<AppState<S>>,
    Auth(principal): Auth,
    Path(enrollment_id): Path<String>,
    Json(body): Json<CommitteeVoteBody>,
) -> Result<Json<VoteCast>, AppError> {
    let enrollment_id = parse_id(&enrollment_id, "enrollment id")?;
    let decision: VoteDecision = body.vote.parse()?;
    let cast = app
        .approvals
        .committee_vote(&principal, enrollment_id, decision, body.remarks)
        .await?;
    Ok(Json(cast))
}

#[derive(Deserialize)]
pub struct ForceStatusBody {
    pub status: String,
    pub reason: String,
}

/// PUT /api/v1/approvals/status/{enrollment_id} — admin-forced transition,
/// forward-only.
pub async fn force_status<S: Stores>(
    State(app): State<AppState<S>>,
    Auth(principal): Auth,
    Path(enrollment_id): Path<String>,
    Json(body): Json<ForceStatusBody>,
) -> Result<Json<Approval>, AppError> {
    let enrollment_id = parse_id(&enrollment_id, "enrollment id")?;
    let target: ApprovalStatus = body.status.parse()?;
    let approval = app
        .approvals
        .force_status(&principal, enrollment_id, target, body.reason)
        .await?;
    Ok(Json(approval))
}

#[derive(Deserialize, Default)]
pub struct ListQuery {
    pub status: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
}

/// GET /api/v1/approvals?status=…&page=…&limit=… — paginated listing.
pub async fn list<S: Stores>(
    State(app): State<AppState<S>>,
    Auth(_principal): Auth,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<Approval>>, AppError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<ApprovalStatus>)
        .transpose()?;
    let page = parse_page(query.page.as_deref())?;
    let limit = parse_limit(query.limit.as_deref())?;
    Ok(Json(app.approvals.list(status, page, limit).await?))
}

/// GET /api/v1/approvals/statuses — the status enumeration.
pub async fn statuses<S: Stores>(
    State(_app): State<AppState<S>>,
    Auth(_principal): Auth,
) -> Json<Vec<&'static str>> {
    Json(
        ApprovalStatus::all()
            .iter()
            .map(|status| status.as_str())
            .collect(),
    )
}
