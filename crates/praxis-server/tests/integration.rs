use axum::http::StatusCode;
use axum::Router;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use http_body_util::BodyExt;
use praxis_core::clock::FixedClock;
use praxis_core::model::{Enrollment, Training};
use praxis_core::store::MemStore;
use praxis_core::types::{CommitteeRole, Role};
use praxis_server::{build_router, AppState};
use std::sync::Arc;
use tower::ServiceExt;

const SECRET: &str = "integration-test-secret-0123456789abcdef";
const SECTION: i64 = 5;
const ENROLLMENT: i64 = 7;
const ADVISOR: i64 = 3;
const TRAINING: i64 = 42;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

/// Enrollment 7 in section 5 with advisor 3, training 42, and a committee
/// with the given instructor ids (first id is chair). Clock pinned to
/// 2025-01-20.
async fn state_with_committee(member_ids: &[i64]) -> (AppState<MemStore>, Arc<MemStore>) {
    let store = Arc::new(MemStore::new());
    store
        .seed_enrollment(Enrollment {
            enrollment_id: ENROLLMENT,
            student_id: 100,
            course_section_id: SECTION,
        })
        .await;
    for (i, id) in member_ids.iter().enumerate() {
        let role = if i == 0 {
            CommitteeRole::Chair
        } else {
            CommitteeRole::Member
        };
        store.seed_committee_member(SECTION, *id, role).await;
    }
    store
        .seed_training(Training {
            training_id: TRAINING,
            enrollment_id: ENROLLMENT,
            company_id: 500,
            start_date: NaiveDate::from_ymd_opt(2024, 11, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 2, 28).unwrap(),
        })
        .await;

    let clock = Arc::new(FixedClock(at(2025, 1, 20)));
    let state = AppState::new(Arc::clone(&store), clock, SECRET, "test".to_string());
    (state, store)
}

fn token(state: &AppState<MemStore>, subject: i64, roles: &[Role]) -> String {
    state.auth.mint(subject, roles, 3600).unwrap()
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    bearer: Option<&str>,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = axum::http::Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(axum::body::Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(axum::body::Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

/// Drive enrollment 7 to committee_pending-ready state: registered + advisor
/// approved.
async fn advisor_approved(app: &Router, state: &AppState<MemStore>) {
    let admin = token(state, 1, &[Role::Admin]);
    let (status, _) = send(
        app,
        "POST",
        "/api/v1/approvals",
        Some(&admin),
        Some(serde_json::json!({ "enrollment_id": ENROLLMENT, "advisor_id": ADVISOR })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let advisor = token(state, ADVISOR, &[Role::Instructor]);
    let (status, _) = send(
        app,
        "POST",
        &format!("/api/v1/approvals/advisor/{ENROLLMENT}"),
        Some(&advisor),
        Some(serde_json::json!({ "approved": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

async fn vote(
    app: &Router,
    state: &AppState<MemStore>,
    voter: i64,
    decision: &str,
) -> (StatusCode, serde_json::Value) {
    let token = token(state, voter, &[Role::Instructor]);
    send(
        app,
        "POST",
        &format!("/api/v1/approvals/committee-vote/{ENROLLMENT}"),
        Some(&token),
        Some(serde_json::json!({ "vote": decision })),
    )
    .await
}

// ---------------------------------------------------------------------------
// Ambient surface
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_is_public() {
    let (state, _) = state_with_committee(&[10]).await;
    let app = build_router(state);
    let (status, json) = send(&app, "GET", "/api/v1/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["environment"], "test");
    assert!(json["uptime_seconds"].is_u64());
}

#[tokio::test]
async fn missing_token_is_401() {
    let (state, _) = state_with_committee(&[10]).await;
    let app = build_router(state);
    let (status, json) = send(&app, "GET", "/api/v1/approvals", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["code"], "unauthorized");
}

#[tokio::test]
async fn error_body_carries_correlation_id() {
    let (state, _) = state_with_committee(&[10]).await;
    let admin = token(&state, 1, &[Role::Admin]);
    let app = build_router(state);
    let (status, json) = send(
        &app,
        "GET",
        "/api/v1/approvals/status/999",
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "not_found");
    assert_eq!(json["type"], "not_found");
    assert!(json["message"].is_string());
    assert!(json["correlation_id"].is_string());
}

#[tokio::test]
async fn non_numeric_id_is_422() {
    let (state, _) = state_with_committee(&[10]).await;
    let admin = token(&state, 1, &[Role::Admin]);
    let app = build_router(state);
    let (status, json) = send(
        &app,
        "GET",
        "/api/v1/approvals/status/abc",
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["code"], "validation");
}

#[tokio::test]
async fn unknown_status_filter_is_422() {
    let (state, _) = state_with_committee(&[10]).await;
    let admin = token(&state, 1, &[Role::Admin]);
    let app = build_router(state);
    let (status, _) = send(
        &app,
        "GET",
        "/api/v1/approvals?status=nonsense",
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn statuses_enumeration_is_complete() {
    let (state, _) = state_with_committee(&[10]).await;
    let admin = token(&state, 1, &[Role::Admin]);
    let app = build_router(state);
    let (status, json) = send(&app, "GET", "/api/v1/approvals/statuses", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_array().unwrap().len(), 10);
    assert!(json.as_array().unwrap().contains(&serde_json::json!("committee_pending")));
}

// ---------------------------------------------------------------------------
// Approval workflow
// ---------------------------------------------------------------------------

#[tokio::test]
async fn happy_approval_flow() {
    let (state, _) = state_with_committee(&[10, 11, 12]).await;
    let app = build_router(state.clone());
    advisor_approved(&app, &state).await;

    let (status, json) = vote(&app, &state, 10, "approve").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["approval"]["status"], "committee_pending");

    let (status, json) = vote(&app, &state, 11, "approve").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["approval"]["status"], "committee_approved");
    assert_eq!(json["quorum_reached"], true);

    let admin = token(&state, 1, &[Role::Admin]);
    let (status, json) = send(
        &app,
        "PUT",
        &format!("/api/v1/approvals/status/{ENROLLMENT}"),
        Some(&admin),
        Some(serde_json::json!({ "status": "final_approved", "reason": "complete dossier" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "final_approved");

    let (status, json) = send(
        &app,
        "GET",
        &format!("/api/v1/approvals/status/{ENROLLMENT}"),
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["current_status"], "final_approved");
    assert_eq!(json["vote_tally"]["approvals"], 2);
    assert_eq!(json["vote_tally"]["rejections"], 0);
}

#[tokio::test]
async fn tied_committee_resolved_by_chair() {
    let (state, _) = state_with_committee(&[10, 11, 12, 13]).await;
    let app = build_router(state.clone());
    advisor_approved(&app, &state).await;

    vote(&app, &state, 10, "approve").await;
    vote(&app, &state, 11, "approve").await;
    let (status, json) = vote(&app, &state, 12, "reject").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["approval"]["status"], "committee_pending");

    let (status, json) = vote(&app, &state, 13, "reject").await;
    assert_eq!(status, StatusCode::OK);
    // Chair voted approve, so the 2–2 tie resolves to approval.
    assert_eq!(json["approval"]["status"], "committee_approved");

    let admin = token(&state, 1, &[Role::Admin]);
    let (_, view) = send(
        &app,
        "GET",
        &format!("/api/v1/approvals/committee-voting/{ENROLLMENT}"),
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(view["votes"].as_array().unwrap().len(), 4);
    assert_eq!(view["tally"]["approvals"], 2);
    assert_eq!(view["tally"]["rejections"], 2);
    assert_eq!(view["quorum_reached"], true);
}

#[tokio::test]
async fn duplicate_vote_is_409_and_log_unchanged() {
    let (state, _) = state_with_committee(&[10, 11, 12]).await;
    let app = build_router(state.clone());
    advisor_approved(&app, &state).await;

    vote(&app, &state, 11, "approve").await;
    let (status, json) = vote(&app, &state, 11, "reject").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "duplicate_vote");

    let admin = token(&state, 1, &[Role::Admin]);
    let (_, view) = send(
        &app,
        "GET",
        &format!("/api/v1/approvals/committee-voting/{ENROLLMENT}"),
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(view["votes"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn outsider_vote_is_403() {
    let (state, _) = state_with_committee(&[10, 11, 12]).await;
    let app = build_router(state.clone());
    advisor_approved(&app, &state).await;
    let (status, json) = vote(&app, &state, 77, "approve").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["code"], "forbidden");
}

#[tokio::test]
async fn forced_transition_is_forward_only() {
    let (state, _) = state_with_committee(&[10, 11, 12]).await;
    let app = build_router(state.clone());
    advisor_approved(&app, &state).await;
    vote(&app, &state, 10, "approve").await;
    vote(&app, &state, 11, "approve").await;

    let admin = token(&state, 1, &[Role::Admin]);
    let (status, json) = send(
        &app,
        "PUT",
        &format!("/api/v1/approvals/status/{ENROLLMENT}"),
        Some(&admin),
        Some(serde_json::json!({ "status": "advisor_rejected", "reason": "undo" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "illegal_transition");

    let (status, json) = send(
        &app,
        "PUT",
        &format!("/api/v1/approvals/status/{ENROLLMENT}"),
        Some(&admin),
        Some(serde_json::json!({ "status": "final_rejected", "reason": "budget cut" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "final_rejected");
}

#[tokio::test]
async fn forced_transition_requires_admin() {
    let (state, _) = state_with_committee(&[10]).await;
    let app = build_router(state.clone());
    let admin = token(&state, 1, &[Role::Admin]);
    send(
        &app,
        "POST",
        "/api/v1/approvals",
        Some(&admin),
        Some(serde_json::json!({ "enrollment_id": ENROLLMENT, "advisor_id": ADVISOR })),
    )
    .await;

    let staff = token(&state, 2, &[Role::Staff]);
    let (status, json) = send(
        &app,
        "PUT",
        &format!("/api/v1/approvals/status/{ENROLLMENT}"),
        Some(&staff),
        Some(serde_json::json!({ "status": "advisor_approved", "reason": "x" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["code"], "forbidden");
}

#[tokio::test]
async fn duplicate_registration_is_409() {
    let (state, _) = state_with_committee(&[10]).await;
    let app = build_router(state.clone());
    let admin = token(&state, 1, &[Role::Admin]);
    let body = serde_json::json!({ "enrollment_id": ENROLLMENT });
    let (status, _) = send(&app, "POST", "/api/v1/approvals", Some(&admin), Some(body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, json) = send(&app, "POST", "/api/v1/approvals", Some(&admin), Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "conflict");
}

// ---------------------------------------------------------------------------
// Evaluation trackers
// ---------------------------------------------------------------------------

async fn fan_out(app: &Router, state: &AppState<MemStore>) -> Vec<serde_json::Value> {
    let staff = token(state, 2, &[Role::Staff]);
    let (status, json) = send(
        app,
        "POST",
        "/api/v1/evaluations/trackers",
        Some(&staff),
        Some(serde_json::json!({ "training_id": TRAINING })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    json.as_array().unwrap().clone()
}

#[tokio::test]
async fn tracker_fan_out_and_completion() {
    let (state, store) = state_with_committee(&[10]).await;
    let app = build_router(state.clone());
    let trackers = fan_out(&app, &state).await;
    assert_eq!(trackers.len(), 3);
    assert!(trackers.iter().all(|t| t["status"] == "pending"));

    let student = trackers
        .iter()
        .find(|t| t["kind"] == "student_eval_company")
        .unwrap();
    let staff = token(&state, 2, &[Role::Staff]);
    let (status, json) = send(
        &app,
        "PUT",
        &format!("/api/v1/evaluations/{}/assign", student["tracker_id"]),
        Some(&staff),
        Some(serde_json::json!({ "evaluator_id": 99, "due_date": "2025-02-10T00:00:00Z" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["evaluator_id"], 99);

    // The form handler inserts the witness row, then signals completion.
    store.seed_student_evaluation(TRAINING, at(2025, 1, 19)).await;
    let (status, json) = send(
        &app,
        "POST",
        "/api/v1/evaluations/complete",
        Some(&staff),
        Some(serde_json::json!({ "training_id": TRAINING, "type": "student_eval_company" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "completed");

    let (status, json) = send(
        &app,
        "GET",
        &format!("/api/v1/evaluations/summary/{TRAINING}"),
        Some(&staff),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["overall_progress"], "in_progress");

    let (status, json) = send(
        &app,
        "GET",
        &format!("/api/v1/evaluations/student/{TRAINING}/status"),
        Some(&staff),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["has_evaluated"], true);
}

#[tokio::test]
async fn fan_out_is_idempotent_over_http() {
    let (state, _) = state_with_committee(&[10]).await;
    let app = build_router(state.clone());
    let first = fan_out(&app, &state).await;
    let again = fan_out(&app, &state).await;
    assert_eq!(first, again);
}

#[tokio::test]
async fn overdue_sweep_counts_transitions() {
    // Clock is pinned to 2025-01-20: due dates straddle it.
    let (state, _) = state_with_committee(&[10]).await;
    let app = build_router(state.clone());
    let trackers = fan_out(&app, &state).await;
    let staff = token(&state, 2, &[Role::Staff]);

    let assign = |due: &str| serde_json::json!({ "evaluator_id": 90, "due_date": due });
    send(
        &app,
        "PUT",
        &format!("/api/v1/evaluations/{}/assign", trackers[0]["tracker_id"]),
        Some(&staff),
        Some(assign("2025-01-01T00:00:00Z")),
    )
    .await;
    send(
        &app,
        "PUT",
        &format!("/api/v1/evaluations/{}/assign", trackers[1]["tracker_id"]),
        Some(&staff),
        Some(assign("2025-01-15T00:00:00Z")),
    )
    .await;
    send(
        &app,
        "PUT",
        &format!("/api/v1/evaluations/{}/status", trackers[1]["tracker_id"]),
        Some(&staff),
        Some(serde_json::json!({ "status": "in_progress" })),
    )
    .await;
    send(
        &app,
        "PUT",
        &format!("/api/v1/evaluations/{}/assign", trackers[2]["tracker_id"]),
        Some(&staff),
        Some(assign("2025-02-01T00:00:00Z")),
    )
    .await;
    send(
        &app,
        "POST",
        "/api/v1/evaluations/complete",
        Some(&staff),
        Some(serde_json::json!({ "training_id": TRAINING, "type": trackers[2]["kind"] })),
    )
    .await;

    let (status, json) = send(
        &app,
        "POST",
        "/api/v1/evaluations/update-overdue",
        Some(&staff),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["transitioned"], 2);

    let (_, stats) = send(&app, "GET", "/api/v1/evaluations/stats", Some(&staff), None).await;
    assert_eq!(stats["overdue_count"], 2);
    assert_eq!(stats["by_status"]["completed"], 1);

    // Overdue trackers may still complete.
    let (status, json) = send(
        &app,
        "POST",
        "/api/v1/evaluations/complete",
        Some(&staff),
        Some(serde_json::json!({ "training_id": TRAINING, "type": trackers[0]["kind"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "completed");
}

#[tokio::test]
async fn completed_tracker_rejects_status_change() {
    let (state, _) = state_with_committee(&[10]).await;
    let app = build_router(state.clone());
    let trackers = fan_out(&app, &state).await;
    let staff = token(&state, 2, &[Role::Staff]);

    send(
        &app,
        "POST",
        "/api/v1/evaluations/complete",
        Some(&staff),
        Some(serde_json::json!({ "training_id": TRAINING, "type": "visitor_eval_company" })),
    )
    .await;

    let visitor = trackers
        .iter()
        .find(|t| t["kind"] == "visitor_eval_company")
        .unwrap();
    let (status, json) = send(
        &app,
        "PUT",
        &format!("/api/v1/evaluations/{}/status", visitor["tracker_id"]),
        Some(&staff),
        Some(serde_json::json!({ "status": "pending" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "invalid_state");
}

#[tokio::test]
async fn list_and_assignments_filters() {
    let (state, _) = state_with_committee(&[10]).await;
    let app = build_router(state.clone());
    let trackers = fan_out(&app, &state).await;
    let staff = token(&state, 2, &[Role::Staff]);

    send(
        &app,
        "PUT",
        &format!("/api/v1/evaluations/{}/assign", trackers[0]["tracker_id"]),
        Some(&staff),
        Some(serde_json::json!({ "evaluator_id": 99 })),
    )
    .await;

    let (status, json) = send(
        &app,
        "GET",
        "/api/v1/evaluations?type=student_eval_company",
        Some(&staff),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 1);
    assert_eq!(json["items"][0]["kind"], "student_eval_company");

    let (status, json) = send(
        &app,
        "GET",
        "/api/v1/evaluations/instructor/99/assignments",
        Some(&staff),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_array().unwrap().len(), 1);
}
