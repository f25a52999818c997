//! Persistence port.
//!
//! Engines describe transitions; stores own rows. Every read used to compute
//! a transition happens inside the same transaction as the write, through the
//! `*_for_update` methods (row-locked on Postgres, writer-serialized on the
//! in-memory store). Dropping a transaction without [`Persistence::commit`]
//! rolls it back.

pub mod memory;
pub mod postgres;

pub use memory::MemStore;
pub use postgres::PgStore;

use crate::error::Result;
use crate::model::{
    Approval, CommitteeMember, CommitteeVote, Enrollment, EvaluationTracker, Training, VoteTally,
};
use crate::types::{ApprovalStatus, EvaluationKind, TrackerStatus, VoteDecision};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Persistence: Send + Sync + 'static {
    type Tx: Send;

    async fn begin(&self) -> Result<Self::Tx>;
    async fn commit(&self, tx: Self::Tx) -> Result<()>;
}

// ---------------------------------------------------------------------------
// ApprovalStore
// ---------------------------------------------------------------------------

/// Insert payload for a new approval row.
#[derive(Debug, Clone)]
pub struct NewApproval {
    pub enrollment_id: i64,
    pub advisor_id: Option<i64>,
    pub now: DateTime<Utc>,
}

#[async_trait]
pub trait ApprovalStore: Persistence {
    /// Enrollment rows are externally owned; the core only reads them.
    async fn enrollment(&self, tx: &mut Self::Tx, enrollment_id: i64)
        -> Result<Option<Enrollment>>;

    /// Insert with `status = registered`, `version = 1`. A duplicate
    /// `enrollment_id` maps to `Conflict`.
    async fn insert_approval(&self, tx: &mut Self::Tx, new: NewApproval) -> Result<Approval>;

    /// Load the approval for this enrollment, acquiring a row lock held for
    /// the rest of the transaction.
    async fn approval_for_update(
        &self,
        tx: &mut Self::Tx,
        enrollment_id: i64,
    ) -> Result<Option<Approval>>;

    /// Optimistic write: matches on the version carried by `approval`, bumps
    /// it on success, fails with `StaleWrite` on mismatch.
    async fn update_approval(&self, tx: &mut Self::Tx, approval: &mut Approval) -> Result<()>;

    async fn list_approvals(
        &self,
        tx: &mut Self::Tx,
        status: Option<ApprovalStatus>,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<Approval>, i64)>;

    /// Append to the ballot log. The `(approval_id, voter)` unique key maps a
    /// replay to `DuplicateVote`.
    async fn append_vote(
        &self,
        tx: &mut Self::Tx,
        approval_id: i64,
        voter_instructor_id: i64,
        decision: VoteDecision,
        remarks: Option<String>,
        cast_at: DateTime<Utc>,
    ) -> Result<CommitteeVote>;

    async fn votes(&self, tx: &mut Self::Tx, approval_id: i64) -> Result<Vec<CommitteeVote>>;

    async fn count_votes(&self, tx: &mut Self::Tx, approval_id: i64) -> Result<VoteTally>;

    /// Committee membership is owned by the course section; the core reads
    /// it for quorum and tie-break.
    async fn committee_members(
        &self,
        tx: &mut Self::Tx,
        course_section_id: i64,
    ) -> Result<Vec<CommitteeMember>>;

    /// The instructor's role on the section committee, if any.
    async fn committee_role(
        &self,
        tx: &mut Self::Tx,
        course_section_id: i64,
        instructor_id: i64,
    ) -> Result<Option<crate::types::CommitteeRole>> {
        Ok(self
            .committee_members(tx, course_section_id)
            .await?
            .into_iter()
            .find(|member| member.instructor_id == instructor_id)
            .map(|member| member.role))
    }
}

// ---------------------------------------------------------------------------
// EvaluationStore
// ---------------------------------------------------------------------------

/// Aggregate counts for the stats endpoint.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct TrackerStats {
    pub by_status: BTreeMap<String, i64>,
    pub by_type: BTreeMap<String, i64>,
    pub overdue_count: i64,
}

#[async_trait]
pub trait EvaluationStore: Persistence {
    async fn training(&self, tx: &mut Self::Tx, training_id: i64) -> Result<Option<Training>>;

    /// Idempotently insert the three tracker rows for a training; rows that
    /// already exist are left untouched. Returns the full set.
    async fn ensure_trackers(
        &self,
        tx: &mut Self::Tx,
        training_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<EvaluationTracker>>;

    async fn tracker_for_update(
        &self,
        tx: &mut Self::Tx,
        tracker_id: i64,
    ) -> Result<Option<EvaluationTracker>>;

    async fn tracker_by_key_for_update(
        &self,
        tx: &mut Self::Tx,
        training_id: i64,
        kind: EvaluationKind,
    ) -> Result<Option<EvaluationTracker>>;

    async fn trackers_for_training(
        &self,
        tx: &mut Self::Tx,
        training_id: i64,
    ) -> Result<Vec<EvaluationTracker>>;

    /// Optimistic write, same contract as [`ApprovalStore::update_approval`].
    async fn update_tracker(
        &self,
        tx: &mut Self::Tx,
        tracker: &mut EvaluationTracker,
    ) -> Result<()>;

    async fn list_trackers(
        &self,
        tx: &mut Self::Tx,
        kind: Option<EvaluationKind>,
        status: Option<TrackerStatus>,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<EvaluationTracker>, i64)>;

    /// Sweep input: all trackers with `status ∈ {pending, in_progress}` and
    /// `due_date < now`, row-locked for the enclosing transaction.
    async fn overdue_for_update(
        &self,
        tx: &mut Self::Tx,
        now: DateTime<Utc>,
    ) -> Result<Vec<EvaluationTracker>>;

    async fn trackers_by_evaluator(
        &self,
        tx: &mut Self::Tx,
        evaluator_id: i64,
        status: Option<TrackerStatus>,
    ) -> Result<Vec<EvaluationTracker>>;

    async fn tracker_stats(&self, tx: &mut Self::Tx) -> Result<TrackerStats>;

    /// Completion witness for STUDENT_EVAL_COMPANY: the submission instant of
    /// the result row, if one exists. The result table is populated by the
    /// evaluation-form handlers, never by this crate.
    async fn student_evaluation(
        &self,
        tx: &mut Self::Tx,
        training_id: i64,
    ) -> Result<Option<DateTime<Utc>>>;
}
