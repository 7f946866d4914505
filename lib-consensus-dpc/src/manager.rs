//! Consensus Manager (spec §4.8, C8): proposal lifecycle, mandatory-dissent
//! assignment, vote collection, the six-step approved-commit pipeline, and
//! the P2P wiring that carries proposals/votes/applied commits across the
//! mesh (spec §6).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use rand::seq::SliceRandom;
use tokio_util::sync::CancellationToken;

use lib_commit::{KnowledgeCommit, SignerCertLookup};
use lib_identity::{Identity, IdentityCertificate, IdentityStore, NodeId};
use lib_knowledge::{CommitHistoryRecord, KnowledgeEntry, PersonalContextStore, Topic};
use lib_p2p::P2pManager;
use lib_wire::Envelope;

use crate::envelope::{
    ApplyKnowledgeCommitWire, ContextUpdatedWire, ProposeKnowledgeCommitWire, RequestCommitRevisionWire,
    VoteKnowledgeCommitWire, COMMAND_APPLY_KNOWLEDGE_COMMIT, COMMAND_CONTEXT_UPDATED, COMMAND_PROPOSE_KNOWLEDGE_COMMIT,
    COMMAND_REQUEST_COMMIT_REVISION, COMMAND_VOTE_KNOWLEDGE_COMMIT,
};
use crate::proposal::{CastVote, Decision, Proposal, Vote, DEFAULT_CONSENSUS_THRESHOLD, DEFAULT_VOTE_DEADLINE, DISSENT_MIN_PARTICIPANTS};
use crate::ConsensusDpcError;

struct Tracked {
    proposal: Proposal,
    created_at: Instant,
}

/// Resolves a signer's certificate off the local identity (for self) or
/// the pinned peer-certificate directory (spec §4.7's usual adapter).
struct IdentityCertLookup {
    identity: Arc<Identity>,
    identity_store: Arc<IdentityStore>,
}

impl SignerCertLookup for IdentityCertLookup {
    fn cert_for(&self, node_id: &str) -> Option<IdentityCertificate> {
        if node_id == self.identity.node_id.as_str() {
            return IdentityCertificate::from_pem(&self.identity.certificate.certificate_pem).ok();
        }
        let peer = NodeId::parse(node_id).ok()?;
        self.identity_store.load_peer_certificate(&peer).ok().flatten()
    }
}

/// Owns every open proposal's state and the P2P fabric it broadcasts
/// proposals/votes/applied-commits over. Finalization is driven by either
/// a vote arriving or an external timer task calling
/// [`ConsensusManager::finalize_on_deadline`]; both paths share the same
/// lock so a proposal's `done` flag makes finalization idempotent (spec
/// §5: "use a 'done' flag to make finalization idempotent").
pub struct ConsensusManager {
    proposals: tokio::sync::Mutex<HashMap<String, Tracked>>,
    threshold: f64,
    p2p: Arc<P2pManager>,
    identity: Arc<Identity>,
    identity_store: Arc<IdentityStore>,
    context_store: Arc<PersonalContextStore>,
    context_lock: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
}

impl ConsensusManager {
    pub fn new(p2p: Arc<P2pManager>, identity: Arc<Identity>, identity_store: Arc<IdentityStore>, context_store: Arc<PersonalContextStore>) -> Arc<Self> {
        Self::with_threshold(p2p, identity, identity_store, context_store, DEFAULT_CONSENSUS_THRESHOLD)
    }

    pub fn with_threshold(
        p2p: Arc<P2pManager>,
        identity: Arc<Identity>,
        identity_store: Arc<IdentityStore>,
        context_store: Arc<PersonalContextStore>,
        threshold: f64,
    ) -> Arc<Self> {
        Arc::new(Self {
            proposals: tokio::sync::Mutex::new(HashMap::new()),
            threshold,
            p2p,
            identity,
            identity_store,
            context_store,
            context_lock: tokio::sync::Mutex::new(()),
            shutdown: CancellationToken::new(),
        })
    }

    fn cert_lookup(&self) -> IdentityCertLookup {
        IdentityCertLookup { identity: self.identity.clone(), identity_store: self.identity_store.clone() }
    }

    /// Sends `envelope` to every participant except ourselves, logging
    /// (rather than failing) on an unreachable peer — spec §7 treats a
    /// disconnected participant as something the mesh routes around, not
    /// a reason to abort the local state transition.
    async fn broadcast_to(&self, participants: &[String], envelope: &Envelope) {
        for participant in participants {
            if participant == self.identity.node_id.as_str() {
                continue;
            }
            let Ok(peer) = NodeId::parse(participant) else {
                tracing::warn!(%participant, "not a valid NodeId, skipping broadcast");
                continue;
            };
            if let Err(e) = self.p2p.send(&peer, envelope.clone()).await {
                tracing::warn!(%participant, error = %e, "failed to deliver consensus envelope");
            }
        }
    }

    /// Creates and registers a new proposal, randomly assigning a
    /// `required_dissenter` once `participants.len() >= 3` (spec §4.8),
    /// and broadcasts it to every other participant as
    /// `PROPOSE_KNOWLEDGE_COMMIT`.
    pub async fn create_proposal(
        &self,
        proposal_id: String,
        topic: String,
        summary: String,
        description: String,
        entries: Vec<KnowledgeEntry>,
        participants: Vec<String>,
    ) -> Proposal {
        let required_dissenter = if participants.len() >= DISSENT_MIN_PARTICIPANTS {
            participants.choose(&mut rand::thread_rng()).cloned()
        } else {
            None
        };

        let proposal = Proposal {
            proposal_id: proposal_id.clone(),
            topic,
            summary,
            description,
            entries,
            participants,
            required_dissenter,
            votes: HashMap::new(),
            deadline: DEFAULT_VOTE_DEADLINE,
            done: false,
        };

        {
            let mut proposals = self.proposals.lock().await;
            proposals.insert(proposal_id, Tracked { proposal: proposal.clone(), created_at: Instant::now() });
        }

        let wire = ProposeKnowledgeCommitWire {
            proposal_id: proposal.proposal_id.clone(),
            topic: proposal.topic.clone(),
            summary: proposal.summary.clone(),
            description: proposal.description.clone(),
            entries: proposal.entries.clone(),
            participants: proposal.participants.clone(),
            required_dissenter: proposal.required_dissenter.clone(),
            deadline_secs: proposal.deadline.as_secs(),
        };
        if let Ok(payload) = serde_json::to_value(&wire) {
            self.broadcast_to(&proposal.participants, &Envelope::new(COMMAND_PROPOSE_KNOWLEDGE_COMMIT, payload)).await;
        }

        proposal
    }

    /// Materializes a proposal a peer created, reusing the transmitted
    /// `required_dissenter` rather than re-randomizing it, so every
    /// participant's local copy agrees on who the dissenter is.
    async fn ingest_proposal(&self, wire: ProposeKnowledgeCommitWire) {
        let mut proposals = self.proposals.lock().await;
        if proposals.contains_key(&wire.proposal_id) {
            return;
        }
        let proposal = Proposal {
            proposal_id: wire.proposal_id.clone(),
            topic: wire.topic,
            summary: wire.summary,
            description: wire.description,
            entries: wire.entries,
            participants: wire.participants,
            required_dissenter: wire.required_dissenter,
            votes: HashMap::new(),
            deadline: std::time::Duration::from_secs(wire.deadline_secs),
            done: false,
        };
        proposals.insert(wire.proposal_id, Tracked { proposal, created_at: Instant::now() });
    }

    fn record_vote(tracked: &mut Tracked, voter: &str, vote: Vote, comment: Option<String>, threshold: f64) -> Result<Option<(Decision, Proposal)>, ConsensusDpcError> {
        if tracked.proposal.done {
            return Ok(None);
        }
        if !tracked.proposal.participants.iter().any(|p| p == voter) {
            return Err(ConsensusDpcError::VoterNotParticipant(voter.to_string()));
        }

        let is_required_dissent = tracked.proposal.required_dissenter.as_deref() == Some(voter);
        tracked.proposal.votes.insert(voter.to_string(), CastVote { voter: voter.to_string(), vote, comment, is_required_dissent });

        let elapsed = tracked.created_at.elapsed();
        if tracked.proposal.is_ready_to_finalize(elapsed) {
            tracked.proposal.done = true;
            let (decision, _) = tracked.proposal.decide(threshold);
            return Ok(Some((decision, tracked.proposal.clone())));
        }
        Ok(None)
    }

    /// Records one participant's vote, broadcasts it as
    /// `VOTE_KNOWLEDGE_COMMIT`, and — if the proposal finalizes as a
    /// result — applies or announces the decision. Returns the decision
    /// once the proposal finalizes, `None` if still awaiting more votes.
    pub async fn cast_vote(&self, proposal_id: &str, voter: &str, vote: Vote, comment: Option<String>) -> Result<Option<(Decision, Proposal)>, ConsensusDpcError> {
        let outcome = {
            let mut proposals = self.proposals.lock().await;
            let tracked = proposals.get_mut(proposal_id).ok_or(ConsensusDpcError::UnknownProposal(proposal_id.to_string()))?;
            Self::record_vote(tracked, voter, vote, comment.clone(), self.threshold)?
        };

        let wire = VoteKnowledgeCommitWire { proposal_id: proposal_id.to_string(), voter: voter.to_string(), vote, comment };
        if let Ok(payload) = serde_json::to_value(&wire) {
            if let Some(participants) = self.participants_of(proposal_id).await {
                self.broadcast_to(&participants, &Envelope::new(COMMAND_VOTE_KNOWLEDGE_COMMIT, payload)).await;
            }
        }

        if let Some((decision, proposal)) = &outcome {
            self.handle_decision(proposal, *decision).await;
        }
        Ok(outcome)
    }

    /// Records an inbound vote from a peer without re-broadcasting it
    /// (the peer that cast it already did), to avoid an amplification
    /// loop across the mesh.
    async fn ingest_vote(&self, wire: VoteKnowledgeCommitWire) {
        let outcome = {
            let mut proposals = self.proposals.lock().await;
            let Some(tracked) = proposals.get_mut(&wire.proposal_id) else { return };
            Self::record_vote(tracked, &wire.voter, wire.vote, wire.comment, self.threshold)
        };
        if let Ok(Some((decision, proposal))) = outcome {
            self.handle_decision(&proposal, decision).await;
        }
    }

    async fn participants_of(&self, proposal_id: &str) -> Option<Vec<String>> {
        self.proposals.lock().await.get(proposal_id).map(|t| t.proposal.participants.clone())
    }

    /// Forces finalization of a proposal whose deadline has passed,
    /// regardless of how many votes are in. Idempotent: returns `None` if
    /// already finalized.
    pub async fn finalize_on_deadline(&self, proposal_id: &str) -> Result<Option<(Decision, Proposal)>, ConsensusDpcError> {
        let outcome = {
            let mut proposals = self.proposals.lock().await;
            let tracked = proposals.get_mut(proposal_id).ok_or(ConsensusDpcError::UnknownProposal(proposal_id.to_string()))?;
            if tracked.proposal.done {
                return Ok(None);
            }
            tracked.proposal.done = true;
            let (decision, _) = tracked.proposal.decide(self.threshold);
            (decision, tracked.proposal.clone())
        };
        self.handle_decision(&outcome.1, outcome.0).await;
        Ok(Some(outcome))
    }

    /// Proposals that are not yet finalized and whose creation instant is
    /// at least `deadline` in the past — what a maintenance task should
    /// pass to [`Self::finalize_on_deadline`].
    pub async fn overdue_proposal_ids(&self) -> Vec<String> {
        let proposals = self.proposals.lock().await;
        proposals
            .iter()
            .filter(|(_, t)| !t.proposal.done && t.created_at.elapsed() >= t.proposal.deadline)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub async fn remove(&self, proposal_id: &str) -> Option<Proposal> {
        self.proposals.lock().await.remove(proposal_id).map(|t| t.proposal)
    }

    /// Dispatches on a freshly-reached decision: approved proposals run
    /// the apply pipeline and broadcast the result; proposals needing
    /// revision notify participants; rejections just close (spec §4.8's
    /// decision table has no further action for a plain rejection).
    async fn handle_decision(&self, proposal: &Proposal, decision: Decision) {
        match decision {
            Decision::Approved => {
                let timestamp = chrono::Utc::now().to_rfc3339();
                match self.apply_approved(proposal, decision, timestamp).await {
                    Ok(commit) => {
                        let wire = ApplyKnowledgeCommitWire { proposal_id: proposal.proposal_id.clone(), commit: commit.clone() };
                        if let Ok(payload) = serde_json::to_value(&wire) {
                            self.broadcast_to(&proposal.participants, &Envelope::new(COMMAND_APPLY_KNOWLEDGE_COMMIT, payload)).await;
                        }
                        let context_version = self.context_store.load_personal_context().await.map(|c| c.version).unwrap_or(0);
                        let updated = ContextUpdatedWire {
                            node_id: self.identity.node_id.as_str().to_string(),
                            topic: commit.topic.clone(),
                            commit_id: commit.commit_id.clone(),
                            version: context_version,
                        };
                        if let Ok(payload) = serde_json::to_value(&updated) {
                            self.broadcast_to(&proposal.participants, &Envelope::new(COMMAND_CONTEXT_UPDATED, payload)).await;
                        }
                    }
                    Err(e) => tracing::warn!(proposal_id = %proposal.proposal_id, error = %e, "failed to apply approved proposal"),
                }
            }
            Decision::RevisionNeeded => {
                let wire = RequestCommitRevisionWire { proposal_id: proposal.proposal_id.clone() };
                if let Ok(payload) = serde_json::to_value(&wire) {
                    self.broadcast_to(&proposal.participants, &Envelope::new(COMMAND_REQUEST_COMMIT_REVISION, payload)).await;
                }
            }
            Decision::Rejected => {}
        }
    }

    /// The six-step approved-commit pipeline (spec §4.8 "On approved"):
    /// links the new commit to our own context's current head, hashes
    /// and signs it, merges its entries into the named topic, appends a
    /// compact history record, writes the versioned Markdown file, and
    /// persists the updated context. Returns the applied commit.
    pub async fn apply_approved(&self, proposal: &Proposal, decision: Decision, timestamp: String) -> Result<KnowledgeCommit, ConsensusDpcError> {
        debug_assert_eq!(decision, Decision::Approved);
        let (_, consensus_type) = proposal.decide(self.threshold);

        let _guard = self.context_lock.lock().await;
        let mut context = self.context_store.load_personal_context().await?;

        let mut commit = KnowledgeCommit {
            commit_id: String::new(),
            commit_hash: String::new(),
            parent_commit_id: context.last_commit_id.clone(),
            topic: proposal.topic.clone(),
            summary: proposal.summary.clone(),
            description: proposal.description.clone(),
            entries: proposal.entries.clone(),
            participants: proposal.participants.clone(),
            approved_by: proposal.approved_by(),
            rejected_by: proposal.rejected_by(),
            consensus_type,
            confidence: average_entry_confidence(&proposal.entries),
            cultural_perspectives: Vec::new(),
            signatures: Default::default(),
            timestamp,
        };

        lib_commit::finalize(&mut commit);
        lib_commit::sign_commit(&mut commit, self.identity.node_id.as_str(), &self.identity.keypair.private)?;

        let topic_entry = context.knowledge.entry(proposal.topic.clone()).or_insert_with(Topic::default);
        topic_entry.merge_entries(commit.entries.clone());
        topic_entry.commit_id = Some(commit.commit_id.clone());

        context.record_commit(CommitHistoryRecord {
            commit_id: commit.commit_id.clone(),
            topic: commit.topic.clone(),
            timestamp: commit.timestamp.clone(),
            participants: commit.participants.clone(),
        });

        let path = lib_commit::write_commit_file(&self.context_store, &commit, self.identity.node_id.as_str(), topic_entry.version).await?;
        topic_entry.markdown_file = Some(path.display().to_string());

        self.context_store.save_personal_context(&context).await?;

        Ok(commit)
    }

    /// Merges a commit a peer already applied, for a participant whose
    /// own vote broadcast never reached everyone else (eventual
    /// consistency fallback; the common path is each participant
    /// independently finalizing and calling [`Self::apply_approved`]).
    /// Verifies `commit_hash` and every present signature before
    /// touching local state.
    async fn adopt_remote_commit(&self, source: &NodeId, commit: KnowledgeCommit) {
        if lib_commit::commit_hash(&commit) != commit.commit_hash {
            tracing::warn!(peer = %source, commit_id = %commit.commit_id, "rejecting APPLY_KNOWLEDGE_COMMIT with mismatched commit_hash");
            return;
        }
        let failures = lib_commit::verify_signatures(&commit, &self.cert_lookup());
        if !failures.is_empty() {
            tracing::warn!(peer = %source, commit_id = %commit.commit_id, ?failures, "rejecting APPLY_KNOWLEDGE_COMMIT with unverifiable signatures");
            return;
        }

        let _guard = self.context_lock.lock().await;
        let Ok(mut context) = self.context_store.load_personal_context().await else { return };
        if context.last_commit_id == commit.commit_id {
            return;
        }

        let topic_entry = context.knowledge.entry(commit.topic.clone()).or_insert_with(Topic::default);
        topic_entry.merge_entries(commit.entries.clone());
        topic_entry.commit_id = Some(commit.commit_id.clone());

        context.record_commit(CommitHistoryRecord {
            commit_id: commit.commit_id.clone(),
            topic: commit.topic.clone(),
            timestamp: commit.timestamp.clone(),
            participants: commit.participants.clone(),
        });

        if let Ok(path) = lib_commit::write_commit_file(&self.context_store, &commit, source.as_str(), topic_entry.version).await {
            topic_entry.markdown_file = Some(path.display().to_string());
        }

        let _ = self.context_store.save_personal_context(&context).await;
    }

    /// Spawns the task that serves inbound consensus envelopes — peer
    /// proposals, votes, applied commits, and revision requests —
    /// mirroring `lib-inference`'s orchestrator listener.
    pub fn spawn_listener(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.listen_loop().await })
    }

    async fn listen_loop(self: Arc<Self>) {
        let mut inbound = self.p2p.subscribe();
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                received = inbound.recv() => {
                    match received {
                        Ok((source, envelope)) => self.handle_inbound(source, envelope).await,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                    }
                }
            }
        }
    }

    async fn handle_inbound(&self, source: NodeId, envelope: Envelope) {
        match envelope.command.as_str() {
            COMMAND_PROPOSE_KNOWLEDGE_COMMIT => {
                if let Ok(wire) = serde_json::from_value::<ProposeKnowledgeCommitWire>(envelope.payload) {
                    self.ingest_proposal(wire).await;
                }
            }
            COMMAND_VOTE_KNOWLEDGE_COMMIT => {
                if let Ok(wire) = serde_json::from_value::<VoteKnowledgeCommitWire>(envelope.payload) {
                    self.ingest_vote(wire).await;
                }
            }
            COMMAND_APPLY_KNOWLEDGE_COMMIT => {
                if let Ok(wire) = serde_json::from_value::<ApplyKnowledgeCommitWire>(envelope.payload) {
                    self.remove(&wire.proposal_id).await;
                    self.adopt_remote_commit(&source, wire.commit).await;
                }
            }
            COMMAND_REQUEST_COMMIT_REVISION => {
                if let Ok(wire) = serde_json::from_value::<RequestCommitRevisionWire>(envelope.payload) {
                    tracing::info!(peer = %source, proposal_id = %wire.proposal_id, "peer requested revision");
                    self.remove(&wire.proposal_id).await;
                }
            }
            COMMAND_CONTEXT_UPDATED => {
                if let Ok(wire) = serde_json::from_value::<ContextUpdatedWire>(envelope.payload) {
                    tracing::debug!(peer = %source, topic = %wire.topic, commit_id = %wire.commit_id, "peer context updated");
                }
            }
            _ => {}
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

fn average_entry_confidence(entries: &[KnowledgeEntry]) -> f64 {
    if entries.is_empty() {
        return 0.0;
    }
    entries.iter().map(|e| e.confidence).sum::<f64>() / entries.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_identity::Identity;

    fn manager_in_tempdir() -> (Arc<ConsensusManager>, Arc<Identity>) {
        let identity = Arc::new(Identity::generate().unwrap());
        let identity_dir = tempfile::tempdir().unwrap();
        let identity_store = Arc::new(IdentityStore::new(identity_dir.into_path()));
        let context_dir = tempfile::tempdir().unwrap();
        let context_store = Arc::new(PersonalContextStore::new(context_dir.into_path()));

        let p2p_identity = Arc::new(Identity::generate().unwrap());
        let p2p_identity_store = Arc::new(IdentityStore::new(tempfile::tempdir().unwrap().into_path()));
        let p2p = Arc::new(P2pManager::new(p2p_identity, p2p_identity_store, None, None, None));

        let manager = ConsensusManager::new(p2p, identity.clone(), identity_store, context_store);
        (manager, identity)
    }

    #[tokio::test]
    async fn finalizes_once_every_participant_has_voted() {
        let (manager, _identity) = manager_in_tempdir();
        let proposal = manager
            .create_proposal("proposal-1".into(), "rust".into(), "s".into(), "d".into(), vec![], vec!["alice".into(), "bob".into()])
            .await;

        assert!(manager.cast_vote(&proposal.proposal_id, "alice", Vote::Approve, None).await.unwrap().is_none());
        let result = manager.cast_vote(&proposal.proposal_id, "bob", Vote::Approve, None).await.unwrap();
        assert_eq!(result.unwrap().0, Decision::Approved);
    }

    #[tokio::test]
    async fn finalization_is_idempotent() {
        let (manager, _identity) = manager_in_tempdir();
        let proposal = manager.create_proposal("proposal-1".into(), "rust".into(), "s".into(), "d".into(), vec![], vec!["alice".into()]).await;
        manager.cast_vote(&proposal.proposal_id, "alice", Vote::Approve, None).await.unwrap();
        assert!(manager.cast_vote(&proposal.proposal_id, "alice", Vote::Approve, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejects_a_vote_from_a_non_participant() {
        let (manager, _identity) = manager_in_tempdir();
        let proposal = manager.create_proposal("proposal-1".into(), "rust".into(), "s".into(), "d".into(), vec![], vec!["alice".into()]).await;
        assert!(manager.cast_vote(&proposal.proposal_id, "mallory", Vote::Approve, None).await.is_err());
    }

    #[tokio::test]
    async fn three_or_more_participants_get_a_required_dissenter() {
        let (manager, _identity) = manager_in_tempdir();
        let proposal = manager
            .create_proposal("proposal-1".into(), "rust".into(), "s".into(), "d".into(), vec![], vec!["a".into(), "b".into(), "c".into()])
            .await;
        assert!(proposal.required_dissenter.is_some());
    }

    #[tokio::test]
    async fn applying_an_approved_commit_updates_topic_and_context() {
        let (manager, identity) = manager_in_tempdir();
        let entry = KnowledgeEntry { content: "tokio is async".into(), tags: vec![], confidence: 0.9, source: None, alternative_viewpoints: vec![], cultural_specific: false };
        let proposal = manager
            .create_proposal(
                "proposal-1".into(),
                "rust".into(),
                "summary".into(),
                "description".into(),
                vec![entry],
                vec![identity.node_id.as_str().to_string()],
            )
            .await;

        let (decision, proposal) = manager
            .cast_vote(&proposal.proposal_id, identity.node_id.as_str(), Vote::Approve, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(decision, Decision::Approved);

        let commit = manager.apply_approved(&proposal, decision, "2025-01-01T00:00:00.000000".into()).await.unwrap();

        let reloaded = manager.context_store.load_personal_context().await.unwrap();
        assert_eq!(reloaded.last_commit_id, commit.commit_id);
        assert_eq!(reloaded.knowledge.get("rust").unwrap().entries.len(), 1);
        assert_eq!(reloaded.commit_history.len(), 1);
    }
}
