//! A knowledge-commit proposal and its votes (spec §4.8).

use std::collections::HashMap;
use std::time::Duration;

use lib_knowledge::KnowledgeEntry;
use serde::{Deserialize, Serialize};

/// Default deadline for a proposal vote (spec §5: "consensus vote (default
/// 10 min)").
pub const DEFAULT_VOTE_DEADLINE: Duration = Duration::from_secs(10 * 60);

/// Default acceptance threshold (spec §4.8).
pub const DEFAULT_CONSENSUS_THRESHOLD: f64 = 0.75;

/// A participant requires at least this many voices before a devil's
/// advocate is assigned (spec §4.8).
pub const DISSENT_MIN_PARTICIPANTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vote {
    Approve,
    Reject,
    RequestChanges,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CastVote {
    pub voter: String,
    pub vote: Vote,
    pub comment: Option<String>,
    pub is_required_dissent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
    RevisionNeeded,
}

#[derive(Debug, Clone)]
pub struct Proposal {
    pub proposal_id: String,
    pub topic: String,
    pub summary: String,
    pub description: String,
    pub entries: Vec<KnowledgeEntry>,
    pub participants: Vec<String>,
    pub required_dissenter: Option<String>,
    pub votes: HashMap<String, CastVote>,
    pub deadline: Duration,
    pub done: bool,
}

impl Proposal {
    /// Every participant has voted, or the deadline elapsed (spec §4.8:
    /// "Finalization trigger: all participants have voted, or deadline
    /// elapsed").
    pub fn is_ready_to_finalize(&self, elapsed: Duration) -> bool {
        self.votes.len() >= self.participants.len() || elapsed >= self.deadline
    }

    /// Applies the spec's decision table: `approval_rate = approve /
    /// total_votes`; `>= threshold` approves (unanimous at rate 1.0, else
    /// majority); otherwise more rejects than request_changes rejects;
    /// otherwise revision is needed. Zero votes cast by the deadline is
    /// treated as `revision_needed` (an Open Question the spec leaves
    /// unresolved: there is no meaningful approval_rate to divide by).
    pub fn decide(&self, threshold: f64) -> (Decision, lib_commit::ConsensusType) {
        let total = self.votes.len();
        if total == 0 {
            return (Decision::RevisionNeeded, lib_commit::ConsensusType::Majority);
        }

        let approve = self.votes.values().filter(|v| v.vote == Vote::Approve).count();
        let reject = self.votes.values().filter(|v| v.vote == Vote::Reject).count();
        let request_changes = self.votes.values().filter(|v| v.vote == Vote::RequestChanges).count();

        let approval_rate = approve as f64 / total as f64;
        if approval_rate >= threshold {
            let consensus_type = if approval_rate >= 1.0 { lib_commit::ConsensusType::Unanimous } else { lib_commit::ConsensusType::Majority };
            (Decision::Approved, consensus_type)
        } else if reject > request_changes {
            (Decision::Rejected, lib_commit::ConsensusType::Majority)
        } else {
            (Decision::RevisionNeeded, lib_commit::ConsensusType::Majority)
        }
    }

    pub fn approved_by(&self) -> Vec<String> {
        let mut v: Vec<String> = self.votes.values().filter(|c| c.vote == Vote::Approve).map(|c| c.voter.clone()).collect();
        v.sort();
        v
    }

    pub fn rejected_by(&self) -> Vec<String> {
        let mut v: Vec<String> = self.votes.values().filter(|c| c.vote == Vote::Reject).map(|c| c.voter.clone()).collect();
        v.sort();
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proposal_with_votes(votes: Vec<(&str, Vote)>) -> Proposal {
        let mut p = Proposal {
            proposal_id: "proposal-1".into(),
            topic: "rust".into(),
            summary: "s".into(),
            description: "d".into(),
            entries: vec![],
            participants: votes.iter().map(|(n, _)| n.to_string()).collect(),
            required_dissenter: None,
            votes: HashMap::new(),
            deadline: DEFAULT_VOTE_DEADLINE,
            done: false,
        };
        for (voter, vote) in votes {
            p.votes.insert(voter.to_string(), CastVote { voter: voter.to_string(), vote, comment: None, is_required_dissent: false });
        }
        p
    }

    #[test]
    fn unanimous_approval_is_detected() {
        let p = proposal_with_votes(vec![("a", Vote::Approve), ("b", Vote::Approve)]);
        let (decision, consensus) = p.decide(DEFAULT_CONSENSUS_THRESHOLD);
        assert_eq!(decision, Decision::Approved);
        assert_eq!(consensus, lib_commit::ConsensusType::Unanimous);
    }

    #[test]
    fn majority_above_threshold_approves_as_majority() {
        let p = proposal_with_votes(vec![("a", Vote::Approve), ("b", Vote::Approve), ("c", Vote::Approve), ("d", Vote::RequestChanges)]);
        let (decision, consensus) = p.decide(DEFAULT_CONSENSUS_THRESHOLD);
        assert_eq!(decision, Decision::Approved);
        assert_eq!(consensus, lib_commit::ConsensusType::Majority);
    }

    #[test]
    fn more_rejects_than_request_changes_rejects() {
        let p = proposal_with_votes(vec![("a", Vote::Reject), ("b", Vote::Reject), ("c", Vote::RequestChanges)]);
        assert_eq!(p.decide(DEFAULT_CONSENSUS_THRESHOLD).0, Decision::Rejected);
    }

    #[test]
    fn more_request_changes_than_rejects_needs_revision() {
        let p = proposal_with_votes(vec![("a", Vote::RequestChanges), ("b", Vote::RequestChanges), ("c", Vote::Reject)]);
        assert_eq!(p.decide(DEFAULT_CONSENSUS_THRESHOLD).0, Decision::RevisionNeeded);
    }

    #[test]
    fn ready_when_all_have_voted() {
        let p = proposal_with_votes(vec![("a", Vote::Approve), ("b", Vote::Approve)]);
        assert!(p.is_ready_to_finalize(Duration::from_secs(1)));
    }

    #[test]
    fn ready_when_deadline_elapsed_even_with_missing_votes() {
        let mut p = proposal_with_votes(vec![("a", Vote::Approve)]);
        p.participants.push("b".into());
        assert!(!p.is_ready_to_finalize(Duration::from_secs(1)));
        assert!(p.is_ready_to_finalize(DEFAULT_VOTE_DEADLINE));
    }
}
