use crate::types::{
    ApprovalStatus, CommitteeRole, EvaluationKind, TrackerStatus, VoteDecision,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Approval aggregate
// ---------------------------------------------------------------------------

/// One row per student enrollment. Created on registration, mutated by engine
/// transitions only, never physically deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    pub approval_id: i64,
    pub enrollment_id: i64,
    pub advisor_id: Option<i64>,
    pub status: ApprovalStatus,
    pub remarks: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Monotonic counter for optimistic concurrency.
    pub version: i64,
}

/// Append-only ballot entry. `(approval_id, voter_instructor_id)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitteeVote {
    pub vote_id: i64,
    pub approval_id: i64,
    pub voter_instructor_id: i64,
    pub decision: VoteDecision,
    pub remarks: Option<String>,
    pub cast_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    pub approvals: i64,
    pub rejections: i64,
}

impl VoteTally {
    pub fn cast(&self) -> i64 {
        self.approvals + self.rejections
    }
}

// ---------------------------------------------------------------------------
// Externally owned rows (core reads only)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub enrollment_id: i64,
    pub student_id: i64,
    pub course_section_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitteeMember {
    pub course_section_id: i64,
    pub instructor_id: i64,
    pub role: CommitteeRole,
}

/// One row per approved internship; materialized externally when the
/// approval reaches FINAL_APPROVED.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Training {
    pub training_id: i64,
    pub enrollment_id: i64,
    pub company_id: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

// ---------------------------------------------------------------------------
// Evaluation tracker
// ---------------------------------------------------------------------------

/// Per-(training, kind) record of an evaluation obligation.
/// `(training_id, kind)` is unique; exactly three rows exist per training
/// once fan-out has run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationTracker {
    pub tracker_id: i64,
    pub training_id: i64,
    pub kind: EvaluationKind,
    pub status: TrackerStatus,
    pub evaluator_id: Option<i64>,
    pub due_date: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub remarks: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

// ---------------------------------------------------------------------------
// Pagination envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, page: u32, limit: u32, total: i64) -> Self {
        Self {
            items,
            page,
            limit,
            total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_cast_sums_both_sides() {
        let tally = VoteTally {
            approvals: 2,
            rejections: 1,
        };
        assert_eq!(tally.cast(), 3);
        assert_eq!(VoteTally::default().cast(), 0);
    }
}
