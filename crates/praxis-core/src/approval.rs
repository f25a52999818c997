//! Approval workflow engine.
//!
//! Every transition runs inside one transaction: load the approval with a row
//! lock, validate the precondition, mutate, write with a version check,
//! commit. Vote commands additionally append to the ballot log and recompute
//! the tally from that canonical log before applying quorum logic. A
//! transient fault (stale optimistic write) is retried once with fresh reads.

use crate::clock::SharedClock;
use crate::error::{CoreError, Result};
use crate::model::{Approval, CommitteeMember, CommitteeVote, Page, VoteTally};
use crate::quorum::{self, BallotOutcome};
use crate::store::{ApprovalStore, NewApproval};
use crate::types::{ApprovalStatus, CommitteeRole, Principal, Role, VoteDecision};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    pub enrollment_id: i64,
    pub current_status: ApprovalStatus,
    pub advisor_id: Option<i64>,
    pub vote_tally: VoteTally,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VotingView {
    pub enrollment_id: i64,
    pub members: Vec<CommitteeMember>,
    pub votes: Vec<CommitteeVote>,
    pub tally: VoteTally,
    pub quorum_reached: bool,
}

/// Result of an accepted committee vote.
#[derive(Debug, Clone, Serialize)]
pub struct VoteCast {
    pub approval: Approval,
    pub vote: CommitteeVote,
    pub tally: VoteTally,
    pub quorum_reached: bool,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct ApprovalEngine<S> {
    store: Arc<S>,
    clock: SharedClock,
}

impl<S> Clone for ApprovalEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<S: ApprovalStore> ApprovalEngine<S> {
    pub fn new(store: Arc<S>, clock: SharedClock) -> Self {
        Self { store, clock }
    }

    /// Register an approval for an enrollment. One live approval per
    /// enrollment; a duplicate registration is a conflict.
    pub async fn create(
        &self,
        actor: &Principal,
        enrollment_id: i64,
        advisor_id: Option<i64>,
    ) -> Result<Approval> {
        if !(actor.is_admin() || actor.has_role(Role::Staff)) {
            return Err(CoreError::Forbidden(
                "creating approvals requires the admin or staff role".to_string(),
            ));
        }
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        if self
            .store
            .enrollment(&mut tx, enrollment_id)
            .await?
            .is_none()
        {
            return Err(CoreError::NotFound(format!("enrollment {enrollment_id}")));
        }
        let approval = self
            .store
            .insert_approval(
                &mut tx,
                NewApproval {
                    enrollment_id,
                    advisor_id,
                    now,
                },
            )
            .await?;
        self.store.commit(tx).await?;
        tracing::info!(
            approval_id = approval.approval_id,
            enrollment_id,
            "approval registered"
        );
        Ok(approval)
    }

    /// Advisor verdict on a registered approval. The first call is
    /// authoritative; a replay observes InvalidState because the approval has
    /// left `registered`.
    pub async fn advisor_decision(
        &self,
        actor: &Principal,
        enrollment_id: i64,
        approved: bool,
        remarks: Option<String>,
    ) -> Result<Approval> {
        match self
            .advisor_decision_once(actor, enrollment_id, approved, remarks.clone())
            .await
        {
            Err(err) if err.is_transient() => {
                tracing::warn!(enrollment_id, %err, "retrying advisor decision");
                self.advisor_decision_once(actor, enrollment_id, approved, remarks)
                    .await
            }
            other => other,
        }
    }

    async fn advisor_decision_once(
        &self,
        actor: &Principal,
        enrollment_id: i64,
        approved: bool,
        remarks: Option<String>,
    ) -> Result<Approval> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut approval = self
            .store
            .approval_for_update(&mut tx, enrollment_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("approval for enrollment {enrollment_id}")))?;

        match approval.advisor_id {
            Some(advisor_id) if advisor_id == actor.subject_id => {}
            Some(_) => {
                return Err(CoreError::Forbidden(
                    "only the advisor of record may decide".to_string(),
                ))
            }
            None => {
                return Err(CoreError::Forbidden(
                    "approval has no advisor of record".to_string(),
                ))
            }
        }
        if approval.status != ApprovalStatus::Registered {
            return Err(CoreError::InvalidState(format!(
                "advisor decision requires registered, approval is {}",
                approval.status
            )));
        }

        approval.status = if approved {
            ApprovalStatus::AdvisorApproved
        } else {
            ApprovalStatus::AdvisorRejected
        };
        approval.remarks = remarks;
        approval.updated_at = now;
        self.store.update_approval(&mut tx, &mut approval).await?;
        self.store.commit(tx).await?;
        tracing::info!(
            approval_id = approval.approval_id,
            status = %approval.status,
            "advisor decision recorded"
        );
        Ok(approval)
    }

    /// Cast a committee vote. The first vote moves the approval from
    /// `advisor_approved` into `committee_pending`; the vote that makes the
    /// outcome mathematically final resolves the ballot.
    pub async fn committee_vote(
        &self,
        actor: &Principal,
        enrollment_id: i64,
        decision: VoteDecision,
        remarks: Option<String>,
    ) -> Result<VoteCast> {
        match self
            .committee_vote_once(actor, enrollment_id, decision, remarks.clone())
            .await
        {
            Err(err) if err.is_transient() => {
                tracing::warn!(enrollment_id, %err, "retrying committee vote");
                self.committee_vote_once(actor, enrollment_id, decision, remarks)
                    .await
            }
            other => other,
        }
    }

    async fn committee_vote_once(
        &self,
        actor: &Principal,
        enrollment_id: i64,
        decision: VoteDecision,
        remarks: Option<String>,
    ) -> Result<VoteCast> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut approval = self
            .store
            .approval_for_update(&mut tx, enrollment_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("approval for enrollment {enrollment_id}")))?;

        if !matches!(
            approval.status,
            ApprovalStatus::AdvisorApproved | ApprovalStatus::CommitteePending
        ) {
            return Err(CoreError::InvalidState(format!(
                "votes are accepted in advisor_approved or committee_pending, approval is {}",
                approval.status
            )));
        }

        let enrollment = self
            .store
            .enrollment(&mut tx, enrollment_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("enrollment {enrollment_id}")))?;
        if self
            .store
            .committee_role(&mut tx, enrollment.course_section_id, actor.subject_id)
            .await?
            .is_none()
        {
            return Err(CoreError::Forbidden(format!(
                "instructor {} is not on the committee of section {}",
                actor.subject_id, enrollment.course_section_id
            )));
        }
        let members = self
            .store
            .committee_members(&mut tx, enrollment.course_section_id)
            .await?;

        if approval.status == ApprovalStatus::AdvisorApproved {
            approval.status = ApprovalStatus::CommitteePending;
        }

        let vote = self
            .store
            .append_vote(
                &mut tx,
                approval.approval_id,
                actor.subject_id,
                decision,
                remarks,
                now,
            )
            .await?;

        // Recompute from the canonical log, not from the accepted vote.
        let tally = self.store.count_votes(&mut tx, approval.approval_id).await?;
        let votes = self.store.votes(&mut tx, approval.approval_id).await?;
        let chair_vote = chair_vote(&members, &votes);

        match quorum::resolve(tally, members.len(), chair_vote) {
            BallotOutcome::Approved => approval.status = ApprovalStatus::CommitteeApproved,
            BallotOutcome::Rejected => approval.status = ApprovalStatus::CommitteeRejected,
            BallotOutcome::Pending => {}
        }

        approval.updated_at = now;
        self.store.update_approval(&mut tx, &mut approval).await?;
        self.store.commit(tx).await?;
        tracing::info!(
            approval_id = approval.approval_id,
            voter = actor.subject_id,
            decision = %decision,
            status = %approval.status,
            "committee vote recorded"
        );
        Ok(VoteCast {
            quorum_reached: quorum::quorum_reached(tally, members.len()),
            approval,
            vote,
            tally,
        })
    }

    /// Admin-forced transition, constrained to targets reachable on the
    /// forward graph. Terminal states admit nothing.
    pub async fn force_status(
        &self,
        actor: &Principal,
        enrollment_id: i64,
        target: ApprovalStatus,
        reason: String,
    ) -> Result<Approval> {
        match self
            .force_status_once(actor, enrollment_id, target, reason.clone())
            .await
        {
            Err(err) if err.is_transient() => {
                tracing::warn!(enrollment_id, %err, "retrying forced transition");
                self.force_status_once(actor, enrollment_id, target, reason)
                    .await
            }
            other => other,
        }
    }

    async fn force_status_once(
        &self,
        actor: &Principal,
        enrollment_id: i64,
        target: ApprovalStatus,
        reason: String,
    ) -> Result<Approval> {
        if !actor.is_admin() {
            return Err(CoreError::Forbidden(
                "forcing a status requires the admin role".to_string(),
            ));
        }
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut approval = self
            .store
            .approval_for_update(&mut tx, enrollment_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("approval for enrollment {enrollment_id}")))?;

        if approval.status.is_terminal() {
            return Err(CoreError::InvalidState(format!(
                "{} is terminal",
                approval.status
            )));
        }
        if approval.status == target {
            return Err(CoreError::InvalidState(format!(
                "approval is already {target}"
            )));
        }
        if !approval.status.can_reach(target) {
            return Err(CoreError::IllegalTransition {
                from: approval.status.to_string(),
                to: target.to_string(),
                reason: "target is not reachable on the forward graph".to_string(),
            });
        }

        approval.status = target;
        approval.remarks = Some(reason);
        approval.updated_at = now;
        self.store.update_approval(&mut tx, &mut approval).await?;
        self.store.commit(tx).await?;
        tracing::info!(
            approval_id = approval.approval_id,
            status = %approval.status,
            "status forced"
        );
        Ok(approval)
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    pub async fn status_view(&self, enrollment_id: i64) -> Result<StatusView> {
        let mut tx = self.store.begin().await?;
        let approval = self
            .store
            .approval_for_update(&mut tx, enrollment_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("approval for enrollment {enrollment_id}")))?;
        let tally = self.store.count_votes(&mut tx, approval.approval_id).await?;
        self.store.commit(tx).await?;
        Ok(StatusView {
            enrollment_id,
            current_status: approval.status,
            advisor_id: approval.advisor_id,
            vote_tally: tally,
            updated_at: approval.updated_at,
        })
    }

    pub async fn voting_view(&self, enrollment_id: i64) -> Result<VotingView> {
        let mut tx = self.store.begin().await?;
        let approval = self
            .store
            .approval_for_update(&mut tx, enrollment_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("approval for enrollment {enrollment_id}")))?;
        let enrollment = self
            .store
            .enrollment(&mut tx, enrollment_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("enrollment {enrollment_id}")))?;
        let members = self
            .store
            .committee_members(&mut tx, enrollment.course_section_id)
            .await?;
        let votes = self.store.votes(&mut tx, approval.approval_id).await?;
        let tally = self.store.count_votes(&mut tx, approval.approval_id).await?;
        self.store.commit(tx).await?;
        Ok(VotingView {
            enrollment_id,
            quorum_reached: quorum::quorum_reached(tally, members.len()),
            members,
            votes,
            tally,
        })
    }

    pub async fn list(
        &self,
        status: Option<ApprovalStatus>,
        page: u32,
        limit: u32,
    ) -> Result<Page<Approval>> {
        let mut tx = self.store.begin().await?;
        let (items, total) = self
            .store
            .list_approvals(&mut tx, status, page, limit)
            .await?;
        self.store.commit(tx).await?;
        Ok(Page::new(items, page, limit, total))
    }
}

/// The chair's recorded vote, if the chair has voted.
fn chair_vote(members: &[CommitteeMember], votes: &[CommitteeVote]) -> Option<VoteDecision> {
    members
        .iter()
        .filter(|m| m.role == CommitteeRole::Chair)
        .find_map(|chair| {
            votes
                .iter()
                .find(|v| v.voter_instructor_id == chair.instructor_id)
                .map(|v| v.decision)
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
