//! In-memory store used by engine unit tests and server integration tests.
//!
//! A transaction takes the single state lock for its whole lifetime and works
//! on a copy; `commit` writes the copy back, dropping the transaction
//! discards it. That reproduces the semantics the engines rely on from
//! Postgres: writers on the same aggregate are serialized, and an aborted
//! transaction leaves no trace.

use crate::error::{CoreError, Result};
use crate::model::{
    Approval, CommitteeMember, CommitteeVote, Enrollment, EvaluationTracker, Training, VoteTally,
};
use crate::store::{ApprovalStore, EvaluationStore, NewApproval, Persistence, TrackerStats};
use crate::types::{ApprovalStatus, CommitteeRole, EvaluationKind, TrackerStatus, VoteDecision};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
struct MemState {
    next_id: i64,
    enrollments: HashMap<i64, Enrollment>,
    committee: Vec<CommitteeMember>,
    trainings: HashMap<i64, Training>,
    approvals: HashMap<i64, Approval>,
    votes: Vec<CommitteeVote>,
    trackers: HashMap<i64, EvaluationTracker>,
    student_evaluations: HashMap<i64, DateTime<Utc>>,
}

impl MemState {
    fn alloc_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

pub struct MemTx {
    work: MemState,
    guard: OwnedMutexGuard<MemState>,
}

#[derive(Clone, Default)]
pub struct MemStore {
    inner: Arc<Mutex<MemState>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Seeding of externally-owned rows
    // -----------------------------------------------------------------------

    pub async fn seed_enrollment(&self, enrollment: Enrollment) {
        let mut state = self.inner.lock().await;
        state
            .enrollments
            .insert(enrollment.enrollment_id, enrollment);
    }

    pub async fn seed_committee_member(
        &self,
        course_section_id: i64,
        instructor_id: i64,
        role: CommitteeRole,
    ) {
        let mut state = self.inner.lock().await;
        state.committee.push(CommitteeMember {
            course_section_id,
            instructor_id,
            role,
        });
    }

    pub async fn seed_training(&self, training: Training) {
        let mut state = self.inner.lock().await;
        state.trainings.insert(training.training_id, training);
    }

    /// Stand-in for the external evaluation-form handler inserting a witness
    /// row.
    pub async fn seed_student_evaluation(&self, training_id: i64, submitted_at: DateTime<Utc>) {
        let mut state = self.inner.lock().await;
        state.student_evaluations.insert(training_id, submitted_at);
    }
}

fn paginate<T: Clone>(rows: &[T], page: u32, limit: u32) -> Vec<T> {
    let offset = (page.max(1) - 1) as usize * limit as usize;
    rows.iter().skip(offset).take(limit as usize).cloned().collect()
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[async_trait]
impl Persistence for MemStore {
    type Tx = MemTx;

    async fn begin(&self) -> Result<Self::Tx> {
        let guard = self.inner.clone().lock_owned().await;
        let work = guard.clone();
        Ok(MemTx { work, guard })
    }

    async fn commit(&self, mut tx: Self::Tx) -> Result<()> {
        *tx.guard = tx.work;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ApprovalStore
// ---------------------------------------------------------------------------

#[async_trait]
impl ApprovalStore for MemStore {
    async fn enrollment(
        &self,
        tx: &mut Self::Tx,
        enrollment_id: i64,
    ) -> Result<Option<Enrollment>> {
        Ok(tx.work.enrollments.get(&enrollment_id).cloned())
    }

    async fn insert_approval(&self, tx: &mut Self::Tx, new: NewApproval) -> Result<Approval> {
        if tx
            .work
            .approvals
            .values()
            .any(|a| a.enrollment_id == new.enrollment_id)
        {
            return Err(CoreError::Conflict(format!(
                "approval already exists for enrollment {}",
                new.enrollment_id
            )));
        }
        let approval_id = tx.work.alloc_id();
        let approval = Approval {
            approval_id,
            enrollment_id: new.enrollment_id,
            advisor_id: new.advisor_id,
            status: ApprovalStatus::Registered,
            remarks: None,
            created_at: new.now,
            updated_at: new.now,
            version: 1,
        };
        tx.work.approvals.insert(approval_id, approval.clone());
        Ok(approval)
    }

    async fn approval_for_update(
        &self,
        tx: &mut Self::Tx,
        enrollment_id: i64,
    ) -> Result<Option<Approval>> {
        Ok(tx
            .work
            .approvals
            .values()
            .find(|a| a.enrollment_id == enrollment_id)
            .cloned())
    }

    async fn update_approval(&self, tx: &mut Self::Tx, approval: &mut Approval) -> Result<()> {
        let stored = tx
            .work
            .approvals
            .get_mut(&approval.approval_id)
            .ok_or_else(|| {
                CoreError::NotFound(format!("approval {}", approval.approval_id))
            })?;
        if stored.version != approval.version {
            return Err(CoreError::StaleWrite {
                entity: "approval",
                id: approval.approval_id,
            });
        }
        approval.version += 1;
        *stored = approval.clone();
        Ok(())
    }

    async fn list_approvals(
        &self,
        tx: &mut Self::Tx,
        status: Option<ApprovalStatus>,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<Approval>, i64)> {
        let mut rows: Vec<Approval> = tx
            .work
            .approvals
            .values()
            .filter(|a| status.map(|s| a.status == s).unwrap_or(true))
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.approval_id);
        let total = rows.len() as i64;
        Ok((paginate(&rows, page, limit), total))
    }

    async fn append_vote(
        &self,
        tx: &mut Self::Tx,
        approval_id: i64,
        voter_instructor_id: i64,
        decision: VoteDecision,
        remarks: Option<String>,
        cast_at: DateTime<Utc>,
    ) -> Result<CommitteeVote> {
        if tx
            .work
            .votes
            .iter()
            .any(|v| v.approval_id == approval_id && v.voter_instructor_id == voter_instructor_id)
        {
            return Err(CoreError::DuplicateVote {
                approval_id,
                voter_id: voter_instructor_id,
            });
        }
        let vote_id = tx.work.alloc_id();
        let vote = CommitteeVote {
            vote_id,
            approval_id,
            voter_instructor_id,
            decision,
            remarks,
            cast_at,
        };
        tx.work.votes.push(vote.clone());
        Ok(vote)
    }

    async fn votes(&self, tx: &mut Self::Tx, approval_id: i64) -> Result<Vec<CommitteeVote>> {
        let mut rows: Vec<CommitteeVote> = tx
            .work
            .votes
            .iter()
            .filter(|v| v.approval_id == approval_id)
            .cloned()
            .collect();
        rows.sort_by_key(|v| v.vote_id);
        Ok(rows)
    }

    async fn count_votes(&self, tx: &mut Self::Tx, approval_id: i64) -> Result<VoteTally> {
        let mut tally = VoteTally::default();
        for vote in tx.work.votes.iter().filter(|v| v.approval_id == approval_id) {
            match vote.decision {
                VoteDecision::Approve => tally.approvals += 1,
                VoteDecision::Reject => tally.rejections += 1,
            }
        }
        Ok(tally)
    }

    async fn committee_members(
        &self,
        tx: &mut Self::Tx,
        course_section_id: i64,
    ) -> Result<Vec<CommitteeMember>> {
        Ok(tx
            .work
            .committee
            .iter()
            .filter(|m| m.course_section_id == course_section_id)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// EvaluationStore
// ---------------------------------------------------------------------------

#[async_trait]
impl EvaluationStore for MemStore {
    async fn training(&self, tx: &mut Self::Tx, training_id: i64) -> Result<Option<Training>> {
        Ok(tx.work.trainings.get(&training_id).cloned())
    }

    async fn ensure_trackers(
        &self,
        tx: &mut Self::Tx,
        training_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<EvaluationTracker>> {
        for kind in EvaluationKind::all() {
            let exists = tx
                .work
                .trackers
                .values()
                .any(|t| t.training_id == training_id && t.kind == *kind);
            if exists {
                continue;
            }
            let tracker_id = tx.work.alloc_id();
            tx.work.trackers.insert(
                tracker_id,
                EvaluationTracker {
                    tracker_id,
                    training_id,
                    kind: *kind,
                    status: TrackerStatus::Pending,
                    evaluator_id: None,
                    due_date: None,
                    completed_at: None,
                    remarks: None,
                    created_at: now,
                    updated_at: now,
                    version: 1,
                },
            );
        }
        self.trackers_for_training(tx, training_id).await
    }

    async fn tracker_for_update(
        &self,
        tx: &mut Self::Tx,
        tracker_id: i64,
    ) -> Result<Option<EvaluationTracker>> {
        Ok(tx.work.trackers.get(&tracker_id).cloned())
    }

    async fn tracker_by_key_for_update(
        &self,
        tx: &mut Self::Tx,
        training_id: i64,
        kind: EvaluationKind,
    ) -> Result<Option<EvaluationTracker>> {
        Ok(tx
            .work
            .trackers
            .values()
            .find(|t| t.training_id == training_id && t.kind == kind)
            .cloned())
    }

    async fn trackers_for_training(
        &self,
        tx: &mut Self::Tx,
        training_id: i64,
    ) -> Result<Vec<EvaluationTracker>> {
        let mut rows: Vec<EvaluationTracker> = tx
            .work
            .trackers
            .values()
            .filter(|t| t.training_id == training_id)
            .cloned()
            .collect();
        rows.sort_by_key(|t| t.tracker_id);
        Ok(rows)
    }

    async fn update_tracker(
        &self,
        tx: &mut Self::Tx,
        tracker: &mut EvaluationTracker,
    ) -> Result<()> {
        let stored = tx
            .work
            .trackers
            .get_mut(&tracker.tracker_id)
            .ok_or_else(|| CoreError::NotFound(format!("tracker {}", tracker.tracker_id)))?;
        if stored.version != tracker.version {
            return Err(CoreError::StaleWrite {
                entity: "tracker",
                id: tracker.tracker_id,
            });
        }
        tracker.version += 1;
        *stored = tracker.clone();
        Ok(())
    }

    async fn list_trackers(
        &self,
        tx: &mut Self::Tx,
        kind: Option<EvaluationKind>,
        status: Option<TrackerStatus>,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<EvaluationTracker>, i64)> {
        let mut rows: Vec<EvaluationTracker> = tx
            .work
            .trackers
            .values()
            .filter(|t| kind.map(|k| t.kind == k).unwrap_or(true))
            .filter(|t| status.map(|s| t.status == s).unwrap_or(true))
            .cloned()
            .collect();
        rows.sort_by_key(|t| t.tracker_id);
        let total = rows.len() as i64;
        Ok((paginate(&rows, page, limit), total))
    }

    async fn overdue_for_update(
        &self,
        tx: &mut Self::Tx,
        now: DateTime<Utc>,
    ) -> Result<Vec<EvaluationTracker>> {
        let mut rows: Vec<EvaluationTracker> = tx
            .work
            .trackers
            .values()
            .filter(|t| t.status.is_sweepable())
            .filter(|t| t.due_date.map(|due| due < now).unwrap_or(false))
            .cloned()
            .collect();
        rows.sort_by_key(|t| t.tracker_id);
        Ok(rows)
    }

    async fn trackers_by_evaluator(
        &self,
        tx: &mut Self::Tx,
        evaluator_id: i64,
        status: Option<TrackerStatus>,
    ) -> Result<Vec<EvaluationTracker>> {
        let mut rows: Vec<EvaluationTracker> = tx
            .work
            .trackers
            .values()
            .filter(|t| t.evaluator_id == Some(evaluator_id))
            .filter(|t| status.map(|s| t.status == s).unwrap_or(true))
            .cloned()
            .collect();
        rows.sort_by_key(|t| t.tracker_id);
        Ok(rows)
    }

    async fn tracker_stats(&self, tx: &mut Self::Tx) -> Result<TrackerStats> {
        let mut stats = TrackerStats::default();
        for tracker in tx.work.trackers.values() {
            *stats
                .by_status
                .entry(tracker.status.as_str().to_string())
                .or_insert(0) += 1;
            *stats
                .by_type
                .entry(tracker.kind.as_str().to_string())
                .or_insert(0) += 1;
            if tracker.status == TrackerStatus::Overdue {
                stats.overdue_count += 1;
            }
        }
        Ok(stats)
    }

    async fn student_evaluation(
        &self,
        tx: &mut Self::Tx,
        training_id: i64,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(tx.work.student_evaluations.get(&training_id).copied())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
