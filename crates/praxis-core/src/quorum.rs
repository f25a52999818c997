//! Ballot math for committee voting.
//!
//! Quorum is a strict majority of the committee. An election resolves as soon
//! as the outcome is mathematically final: enough votes are in, and either
//! the margin exceeds the number of voters still outstanding or every member
//! has voted. A tie is only possible at full participation of an even-sized
//! committee and falls to the chair's recorded vote; a chair who abstained
//! resolves the tie as rejection.

use crate::model::VoteTally;
use crate::types::VoteDecision;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BallotOutcome {
    /// Not enough information yet; keep accepting votes.
    Pending,
    Approved,
    Rejected,
}

/// Strict-majority threshold: `⌊N/2⌋ + 1` votes must be cast before the
/// ballot may resolve.
pub fn threshold(committee_size: usize) -> usize {
    committee_size / 2 + 1
}

pub fn quorum_reached(tally: VoteTally, committee_size: usize) -> bool {
    tally.cast() >= threshold(committee_size) as i64
}

/// Resolve the ballot given the current tally, the committee size, and the
/// chair's recorded vote (if any).
pub fn resolve(
    tally: VoteTally,
    committee_size: usize,
    chair_vote: Option<VoteDecision>,
) -> BallotOutcome {
    if !quorum_reached(tally, committee_size) {
        return BallotOutcome::Pending;
    }

    let approvals = tally.approvals;
    let rejections = tally.rejections;
    let remaining = committee_size as i64 - tally.cast();
    let margin = (approvals - rejections).abs();

    if margin > remaining {
        return if approvals > rejections {
            BallotOutcome::Approved
        } else {
            BallotOutcome::Rejected
        };
    }

    if remaining == 0 {
        return match approvals.cmp(&rejections) {
            std::cmp::Ordering::Greater => BallotOutcome::Approved,
            std::cmp::Ordering::Less => BallotOutcome::Rejected,
            std::cmp::Ordering::Equal => match chair_vote {
                Some(VoteDecision::Approve) => BallotOutcome::Approved,
                Some(VoteDecision::Reject) | None => BallotOutcome::Rejected,
            },
        };
    }

    BallotOutcome::Pending
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn tally(approvals: i64, rejections: i64) -> VoteTally {
        VoteTally {
            approvals,
            rejections,
        }
    }

    #[test]
    fn threshold_is_strict_majority() {
        assert_eq!(threshold(2), 2);
        assert_eq!(threshold(3), 2);
        assert_eq!(threshold(4), 3);
        assert_eq!(threshold(5), 3);
        assert_eq!(threshold(7), 4);
    }

    #[test]
    fn below_quorum_stays_pending() {
        assert_eq!(resolve(tally(1, 0), 3, None), BallotOutcome::Pending);
        assert_eq!(resolve(tally(1, 1), 4, None), BallotOutcome::Pending);
    }

    #[test]
    fn three_member_committee_resolves_at_two_approvals() {
        // Quorum 2/3, both approvals, the absent voter cannot flip it.
        assert_eq!(
            resolve(tally(2, 0), 3, Some(VoteDecision::Approve)),
            BallotOutcome::Approved
        );
        assert_eq!(resolve(tally(0, 2), 3, None), BallotOutcome::Rejected);
    }

    #[test]
    fn split_vote_waits_for_the_decider() {
        // 1–1 of 3 has quorum but the last voter decides.
        assert_eq!(resolve(tally(1, 1), 3, None), BallotOutcome::Pending);
        assert_eq!(resolve(tally(2, 1), 3, None), BallotOutcome::Approved);
    }

    #[test]
    fn four_member_committee_keeps_accepting_until_settled() {
        // 2–1 of 4: the outstanding voter could force a tie.
        assert_eq!(
            resolve(tally(2, 1), 4, Some(VoteDecision::Approve)),
            BallotOutcome::Pending
        );
        // 3–1 of 4 is settled regardless of the chair.
        assert_eq!(resolve(tally(3, 1), 4, None), BallotOutcome::Approved);
    }

    #[test]
    fn tie_break_goes_to_the_chair() {
        assert_eq!(
            resolve(tally(2, 2), 4, Some(VoteDecision::Approve)),
            BallotOutcome::Approved
        );
        assert_eq!(
            resolve(tally(2, 2), 4, Some(VoteDecision::Reject)),
            BallotOutcome::Rejected
        );
    }

    #[test]
    fn tie_with_abstaining_chair_rejects() {
        assert_eq!(resolve(tally(2, 2), 4, None), BallotOutcome::Rejected);
    }

    #[test]
    fn large_committee_early_settlement() {
        // 3–0 of 5: quorum met and the two outstanding voters cannot catch up.
        assert_eq!(resolve(tally(3, 0), 5, None), BallotOutcome::Approved);
        // 3–2 of 7: margin 1, two outstanding — not settled.
        assert_eq!(resolve(tally(3, 2), 7, None), BallotOutcome::Pending);
    }

    #[test]
    fn quorum_reached_boundary() {
        assert!(!quorum_reached(tally(1, 0), 3));
        assert!(quorum_reached(tally(1, 1), 3));
        assert!(quorum_reached(tally(2, 1), 4));
    }
}
