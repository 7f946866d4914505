//! Session Manager (spec §4.9, C9): conversation-scoped "new session" votes
//! that clear history on approval, and the P2P wiring that carries
//! proposals/votes/results across the mesh (spec §6).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use lib_identity::{Identity, NodeId};
use lib_p2p::P2pManager;
use lib_wire::Envelope;

use crate::envelope::{
    NewSessionResultWire, ProposeNewSessionWire, VoteNewSessionWire, COMMAND_NEW_SESSION_RESULT, COMMAND_PROPOSE_NEW_SESSION,
    COMMAND_VOTE_NEW_SESSION,
};
use crate::ConsensusDpcError;

/// Session proposal deadline (spec §4.9: "a 60-second deadline").
pub const SESSION_VOTE_DEADLINE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionDecision {
    Approved,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct SessionTally {
    pub approve: usize,
    pub total: usize,
}

struct TrackedSession {
    conversation_id: String,
    participants: Vec<String>,
    votes: HashMap<String, bool>,
    created_at: Instant,
    done: bool,
}

impl TrackedSession {
    fn decide(&self) -> SessionDecision {
        let approve = self.votes.values().filter(|v| **v).count();
        let total = self.votes.len();
        let approved = if self.participants.len() == 2 {
            approve == 2 && total == 2
        } else {
            approve > total / 2
        };
        if approved { SessionDecision::Approved } else { SessionDecision::Rejected }
    }
}

/// Tracks open `new_session` proposals, one at a time per conversation
/// (spec §4.9: "duplicate pending proposals for the same conversation are
/// refused"), and broadcasts/listens for them over the P2P fabric.
pub struct SessionManager {
    sessions: tokio::sync::Mutex<HashMap<String, TrackedSession>>,
    p2p: Arc<P2pManager>,
    identity: Arc<Identity>,
    shutdown: CancellationToken,
}

impl SessionManager {
    pub fn new(p2p: Arc<P2pManager>, identity: Arc<Identity>) -> Arc<Self> {
        Arc::new(Self { sessions: tokio::sync::Mutex::new(HashMap::new()), p2p, identity, shutdown: CancellationToken::new() })
    }

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
                tracing::warn!(%participant, error = %e, "failed to deliver session envelope");
            }
        }
    }

    /// Opens a new-session proposal. The initiator's vote is recorded as
    /// an automatic approve (spec §4.9), and the proposal is broadcast to
    /// every other participant as `PROPOSE_NEW_SESSION`.
    pub async fn propose(&self, conversation_id: &str, initiator: &str, participants: Vec<String>) -> Result<(), ConsensusDpcError> {
        {
            let mut sessions = self.sessions.lock().await;
            if let Some(existing) = sessions.get(conversation_id) {
                if !existing.done {
                    return Err(ConsensusDpcError::DuplicateSessionProposal(conversation_id.to_string()));
                }
            }

            let mut votes = HashMap::new();
            votes.insert(initiator.to_string(), true);

            sessions.insert(
                conversation_id.to_string(),
                TrackedSession { conversation_id: conversation_id.to_string(), participants: participants.clone(), votes, created_at: Instant::now(), done: false },
            );
        }

        let wire = ProposeNewSessionWire { conversation_id: conversation_id.to_string(), initiator: initiator.to_string(), participants: participants.clone() };
        if let Ok(payload) = serde_json::to_value(&wire) {
            self.broadcast_to(&participants, &Envelope::new(COMMAND_PROPOSE_NEW_SESSION, payload)).await;
        }
        Ok(())
    }

    /// Materializes a session proposal a peer opened, recording the
    /// transmitted initiator's automatic approve.
    async fn ingest_proposal(&self, wire: ProposeNewSessionWire) {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&wire.conversation_id) {
            return;
        }
        let mut votes = HashMap::new();
        votes.insert(wire.initiator.clone(), true);
        sessions.insert(
            wire.conversation_id.clone(),
            TrackedSession { conversation_id: wire.conversation_id, participants: wire.participants, votes, created_at: Instant::now(), done: false },
        );
    }

    fn record_vote(session: &mut TrackedSession, voter: &str, approve: bool) -> Result<Option<(SessionDecision, SessionTally)>, ConsensusDpcError> {
        if session.done {
            return Ok(None);
        }
        if !session.participants.iter().any(|p| p == voter) {
            return Err(ConsensusDpcError::VoterNotParticipant(voter.to_string()));
        }
        session.votes.insert(voter.to_string(), approve);

        let ready = session.votes.len() >= session.participants.len() || session.created_at.elapsed() >= SESSION_VOTE_DEADLINE;
        if ready {
            session.done = true;
            let decision = session.decide();
            let tally = SessionTally { approve: session.votes.values().filter(|v| **v).count(), total: session.votes.len() };
            return Ok(Some((decision, tally)));
        }
        Ok(None)
    }

    /// Records a participant's approve/reject vote, broadcasts it as
    /// `VOTE_NEW_SESSION`, and — once the proposal finalizes — announces
    /// the result to every participant as `NEW_SESSION_RESULT`. Returns
    /// the decision once the proposal finalizes.
    pub async fn cast_vote(&self, conversation_id: &str, voter: &str, approve: bool) -> Result<Option<(SessionDecision, SessionTally)>, ConsensusDpcError> {
        let (outcome, participants) = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions.get_mut(conversation_id).ok_or(ConsensusDpcError::UnknownSession(conversation_id.to_string()))?;
            let participants = session.participants.clone();
            (Self::record_vote(session, voter, approve)?, participants)
        };

        let wire = VoteNewSessionWire { conversation_id: conversation_id.to_string(), voter: voter.to_string(), approve };
        if let Ok(payload) = serde_json::to_value(&wire) {
            self.broadcast_to(&participants, &Envelope::new(COMMAND_VOTE_NEW_SESSION, payload)).await;
        }

        if let Some((decision, _)) = &outcome {
            self.announce_result(conversation_id, &participants, *decision).await;
        }
        Ok(outcome)
    }

    /// Records an inbound vote from a peer without re-broadcasting the
    /// vote itself (only the `NEW_SESSION_RESULT` announcement, once
    /// finalized — duplicate announcements from independently-finalizing
    /// participants are harmless, receivers just mark the session done).
    async fn ingest_vote(&self, wire: VoteNewSessionWire) {
        let (outcome, participants) = {
            let mut sessions = self.sessions.lock().await;
            let Some(session) = sessions.get_mut(&wire.conversation_id) else { return };
            let participants = session.participants.clone();
            (Self::record_vote(session, &wire.voter, wire.approve).ok().flatten(), participants)
        };
        if let Some((decision, _)) = outcome {
            self.announce_result(&wire.conversation_id, &participants, decision).await;
        }
    }

    async fn announce_result(&self, conversation_id: &str, participants: &[String], decision: SessionDecision) {
        if decision == SessionDecision::Approved {
            tracing::info!(%conversation_id, "new session approved, participants should clear cached conversation history");
        }
        let wire = NewSessionResultWire { conversation_id: conversation_id.to_string(), decision };
        if let Ok(payload) = serde_json::to_value(&wire) {
            self.broadcast_to(participants, &Envelope::new(COMMAND_NEW_SESSION_RESULT, payload)).await;
        }
    }

    /// Marks a session done from an inbound `NEW_SESSION_RESULT`
    /// announcement — the fallback path for a participant whose own
    /// votes never converged locally (e.g. a dropped vote broadcast).
    async fn ingest_result(&self, wire: NewSessionResultWire) {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get_mut(&wire.conversation_id) {
            session.done = true;
        }
        if wire.decision == SessionDecision::Approved {
            tracing::info!(conversation_id = %wire.conversation_id, "peer announced new session approval");
        }
    }

    pub async fn finalize_on_deadline(&self, conversation_id: &str) -> Result<Option<(SessionDecision, SessionTally)>, ConsensusDpcError> {
        let (outcome, participants) = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions.get_mut(conversation_id).ok_or(ConsensusDpcError::UnknownSession(conversation_id.to_string()))?;
            if session.done {
                return Ok(None);
            }
            session.done = true;
            let decision = session.decide();
            let tally = SessionTally { approve: session.votes.values().filter(|v| **v).count(), total: session.votes.len() };
            (Some((decision, tally)), session.participants.clone())
        };
        if let Some((decision, _)) = &outcome {
            self.announce_result(conversation_id, &participants, *decision).await;
        }
        Ok(outcome)
    }

    /// Drops finalized sessions older than `max_age` (spec §4.8: "its
    /// session is kept briefly for UI and swept by `clear_old_sessions`" —
    /// applied here to C9 sessions as the same sweep shape).
    pub async fn clear_old_sessions(&self, max_age: Duration) {
        let mut sessions = self.sessions.lock().await;
        sessions.retain(|_, s| !s.done || s.created_at.elapsed() < max_age);
    }

    pub async fn conversation_ids(&self) -> Vec<String> {
        self.sessions.lock().await.values().map(|s| s.conversation_id.clone()).collect()
    }

    /// Spawns the task that serves inbound session envelopes from peers,
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
                        Ok((_source, envelope)) => self.handle_inbound(envelope).await,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                    }
                }
            }
        }
    }

    async fn handle_inbound(&self, envelope: Envelope) {
        match envelope.command.as_str() {
            COMMAND_PROPOSE_NEW_SESSION => {
                if let Ok(wire) = serde_json::from_value::<ProposeNewSessionWire>(envelope.payload) {
                    self.ingest_proposal(wire).await;
                }
            }
            COMMAND_VOTE_NEW_SESSION => {
                if let Ok(wire) = serde_json::from_value::<VoteNewSessionWire>(envelope.payload) {
                    self.ingest_vote(wire).await;
                }
            }
            COMMAND_NEW_SESSION_RESULT => {
                if let Ok(wire) = serde_json::from_value::<NewSessionResultWire>(envelope.payload) {
                    self.ingest_result(wire).await;
                }
            }
            _ => {}
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
