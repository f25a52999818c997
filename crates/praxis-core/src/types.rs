use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// ApprovalStatus
// ---------------------------------------------------------------------------

/// Lifecycle states of an internship approval. The directed graph is
/// forward-only: forced transitions may only select a target reachable from
/// the current state, and terminal states admit no outbound edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Registered,
    AdvisorApproved,
    AdvisorRejected,
    CommitteePending,
    CommitteeApproved,
    CommitteeRejected,
    FinalApproved,
    FinalRejected,
    DocApproved,
    DocRejected,
}

impl ApprovalStatus {
    pub fn all() -> &'static [ApprovalStatus] {
        &[
            ApprovalStatus::Registered,
            ApprovalStatus::AdvisorApproved,
            ApprovalStatus::AdvisorRejected,
            ApprovalStatus::CommitteePending,
            ApprovalStatus::CommitteeApproved,
            ApprovalStatus::CommitteeRejected,
            ApprovalStatus::FinalApproved,
            ApprovalStatus::FinalRejected,
            ApprovalStatus::DocApproved,
            ApprovalStatus::DocRejected,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalStatus::Registered => "registered",
            ApprovalStatus::AdvisorApproved => "advisor_approved",
            ApprovalStatus::AdvisorRejected => "advisor_rejected",
            ApprovalStatus::CommitteePending => "committee_pending",
            ApprovalStatus::CommitteeApproved => "committee_approved",
            ApprovalStatus::CommitteeRejected => "committee_rejected",
            ApprovalStatus::FinalApproved => "final_approved",
            ApprovalStatus::FinalRejected => "final_rejected",
            ApprovalStatus::DocApproved => "doc_approved",
            ApprovalStatus::DocRejected => "doc_rejected",
        }
    }

    /// Direct successors in the workflow graph.
    pub fn successors(self) -> &'static [ApprovalStatus] {
        match self {
            ApprovalStatus::Registered => &[
                ApprovalStatus::AdvisorApproved,
                ApprovalStatus::AdvisorRejected,
            ],
            ApprovalStatus::AdvisorApproved => &[ApprovalStatus::CommitteePending],
            ApprovalStatus::CommitteePending => &[
                ApprovalStatus::CommitteeApproved,
                ApprovalStatus::CommitteeRejected,
            ],
            ApprovalStatus::CommitteeApproved => {
                &[ApprovalStatus::FinalApproved, ApprovalStatus::FinalRejected]
            }
            ApprovalStatus::FinalApproved => {
                &[ApprovalStatus::DocApproved, ApprovalStatus::DocRejected]
            }
            ApprovalStatus::AdvisorRejected
            | ApprovalStatus::CommitteeRejected
            | ApprovalStatus::FinalRejected
            | ApprovalStatus::DocApproved
            | ApprovalStatus::DocRejected => &[],
        }
    }

    pub fn is_terminal(self) -> bool {
        self.successors().is_empty()
    }

    /// True when `target` lies strictly ahead of `self` in the directed
    /// graph. A state never reaches itself.
    pub fn can_reach(self, target: ApprovalStatus) -> bool {
        let mut frontier = self.successors().to_vec();
        while let Some(next) = frontier.pop() {
            if next == target {
                return true;
            }
            frontier.extend_from_slice(next.successors());
        }
        false
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ApprovalStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ApprovalStatus::all()
            .iter()
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| CoreError::Validation(format!("unknown approval status '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// VoteDecision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteDecision {
    Approve,
    Reject,
}

impl VoteDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            VoteDecision::Approve => "approve",
            VoteDecision::Reject => "reject",
        }
    }
}

impl fmt::Display for VoteDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for VoteDecision {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" => Ok(VoteDecision::Approve),
            "reject" => Ok(VoteDecision::Reject),
            _ => Err(CoreError::Validation(format!("unknown vote '{s}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// CommitteeRole
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitteeRole {
    Chair,
    Member,
    Secretary,
}

impl CommitteeRole {
    pub fn as_str(self) -> &'static str {
        match self {
            CommitteeRole::Chair => "chair",
            CommitteeRole::Member => "member",
            CommitteeRole::Secretary => "secretary",
        }
    }
}

impl fmt::Display for CommitteeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CommitteeRole {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chair" => Ok(CommitteeRole::Chair),
            "member" => Ok(CommitteeRole::Member),
            "secretary" => Ok(CommitteeRole::Secretary),
            _ => Err(CoreError::Validation(format!("unknown committee role '{s}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// EvaluationKind
// ---------------------------------------------------------------------------

/// The three evaluation obligations fanned out for every training. A closed
/// enumeration with a per-kind witness table, not a class hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationKind {
    StudentEvalCompany,
    VisitorEvalStudent,
    VisitorEvalCompany,
}

impl EvaluationKind {
    pub fn all() -> &'static [EvaluationKind] {
        &[
            EvaluationKind::StudentEvalCompany,
            EvaluationKind::VisitorEvalStudent,
            EvaluationKind::VisitorEvalCompany,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EvaluationKind::StudentEvalCompany => "student_eval_company",
            EvaluationKind::VisitorEvalStudent => "visitor_eval_student",
            EvaluationKind::VisitorEvalCompany => "visitor_eval_company",
        }
    }

    /// Only the student-evaluates-company kind has a durable result table.
    pub fn has_witness(self) -> bool {
        matches!(self, EvaluationKind::StudentEvalCompany)
    }
}

impl fmt::Display for EvaluationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EvaluationKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EvaluationKind::all()
            .iter()
            .find(|kind| kind.as_str() == s)
            .copied()
            .ok_or_else(|| CoreError::Validation(format!("unknown evaluation type '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// TrackerStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerStatus {
    Pending,
    InProgress,
    Completed,
    Overdue,
}

impl TrackerStatus {
    pub fn all() -> &'static [TrackerStatus] {
        &[
            TrackerStatus::Pending,
            TrackerStatus::InProgress,
            TrackerStatus::Completed,
            TrackerStatus::Overdue,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TrackerStatus::Pending => "pending",
            TrackerStatus::InProgress => "in_progress",
            TrackerStatus::Completed => "completed",
            TrackerStatus::Overdue => "overdue",
        }
    }

    /// Overdue is entered by the sweep from these states only.
    pub fn is_sweepable(self) -> bool {
        matches!(self, TrackerStatus::Pending | TrackerStatus::InProgress)
    }
}

impl fmt::Display for TrackerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TrackerStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TrackerStatus::all()
            .iter()
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| CoreError::Validation(format!("unknown tracker status '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// OverallProgress
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallProgress {
    NotStarted,
    InProgress,
    Complete,
}

impl OverallProgress {
    /// Complete iff all trackers are completed, not-started iff all are
    /// pending, in-progress otherwise.
    pub fn derive(statuses: &[TrackerStatus]) -> Self {
        if statuses.iter().all(|s| *s == TrackerStatus::Completed) {
            OverallProgress::Complete
        } else if statuses.iter().all(|s| *s == TrackerStatus::Pending) {
            OverallProgress::NotStarted
        } else {
            OverallProgress::InProgress
        }
    }
}

impl fmt::Display for OverallProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OverallProgress::NotStarted => "not_started",
            OverallProgress::InProgress => "in_progress",
            OverallProgress::Complete => "complete",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Principal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Staff,
    Instructor,
    Student,
    Visitor,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Staff => "staff",
            Role::Instructor => "instructor",
            Role::Student => "student",
            Role::Visitor => "visitor",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "staff" => Ok(Role::Staff),
            "instructor" => Ok(Role::Instructor),
            "student" => Ok(Role::Student),
            "visitor" => Ok(Role::Visitor),
            _ => Err(CoreError::Validation(format!("unknown role '{s}'"))),
        }
    }
}

/// Authenticated caller as resolved by the HTTP edge. Engines consume this
/// for identity and capability preconditions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject_id: i64,
    pub roles: Vec<Role>,
}

impl Principal {
    pub fn new(subject_id: i64, roles: Vec<Role>) -> Self {
        Self { subject_id, roles }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(Role::Admin)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn approval_status_roundtrip() {
        for status in ApprovalStatus::all() {
            let parsed = ApprovalStatus::from_str(status.as_str()).unwrap();
            assert_eq!(*status, parsed);
        }
        assert!(ApprovalStatus::from_str("bogus").is_err());
    }

    #[test]
    fn terminal_states_have_no_successors() {
        let terminal = [
            ApprovalStatus::AdvisorRejected,
            ApprovalStatus::CommitteeRejected,
            ApprovalStatus::FinalRejected,
            ApprovalStatus::DocApproved,
            ApprovalStatus::DocRejected,
        ];
        for status in terminal {
            assert!(status.is_terminal(), "{status} should be terminal");
        }
        assert!(!ApprovalStatus::Registered.is_terminal());
        assert!(!ApprovalStatus::FinalApproved.is_terminal());
    }

    #[test]
    fn reachability_is_forward_only() {
        assert!(ApprovalStatus::Registered.can_reach(ApprovalStatus::DocApproved));
        assert!(ApprovalStatus::CommitteeApproved.can_reach(ApprovalStatus::FinalRejected));
        assert!(!ApprovalStatus::CommitteeApproved.can_reach(ApprovalStatus::AdvisorRejected));
        assert!(!ApprovalStatus::FinalRejected.can_reach(ApprovalStatus::DocApproved));
        // No self loops.
        assert!(!ApprovalStatus::Registered.can_reach(ApprovalStatus::Registered));
    }

    #[test]
    fn no_path_out_of_terminal_states() {
        for from in ApprovalStatus::all() {
            if !from.is_terminal() {
                continue;
            }
            for to in ApprovalStatus::all() {
                assert!(!from.can_reach(*to), "{from} must not reach {to}");
            }
        }
    }

    #[test]
    fn evaluation_kind_roundtrip() {
        assert_eq!(EvaluationKind::all().len(), 3);
        for kind in EvaluationKind::all() {
            assert_eq!(*kind, EvaluationKind::from_str(kind.as_str()).unwrap());
        }
        assert!(EvaluationKind::StudentEvalCompany.has_witness());
        assert!(!EvaluationKind::VisitorEvalStudent.has_witness());
    }

    #[test]
    fn tracker_status_sweepable() {
        assert!(TrackerStatus::Pending.is_sweepable());
        assert!(TrackerStatus::InProgress.is_sweepable());
        assert!(!TrackerStatus::Completed.is_sweepable());
        assert!(!TrackerStatus::Overdue.is_sweepable());
    }

    #[test]
    fn overall_progress_derivation() {
        use TrackerStatus::*;
        assert_eq!(
            OverallProgress::derive(&[Pending, Pending, Pending]),
            OverallProgress::NotStarted
        );
        assert_eq!(
            OverallProgress::derive(&[Completed, Completed, Completed]),
            OverallProgress::Complete
        );
        assert_eq!(
            OverallProgress::derive(&[Completed, Pending, Overdue]),
            OverallProgress::InProgress
        );
    }

    #[test]
    fn principal_roles() {
        let p = Principal::new(9, vec![Role::Staff, Role::Instructor]);
        assert!(p.has_role(Role::Staff));
        assert!(!p.is_admin());
        assert!(Principal::new(1, vec![Role::Admin]).is_admin());
    }

    #[test]
    fn wire_form_is_snake_case() {
        let json = serde_json::to_string(&ApprovalStatus::CommitteePending).unwrap();
        assert_eq!(json, "\"committee_pending\"");
        let json = serde_json::to_string(&EvaluationKind::StudentEvalCompany).unwrap();
        assert_eq!(json, "\"student_eval_company\"");
    }
}
