//! Connection Status (spec §4.12, C12): derives a node's overall
//! connectivity mode from the hub/WebRTC/direct-TLS transport states
//! tracked elsewhere (C5's signaling client, C4's transport fabric), fires
//! a transition notification on every mode change, and picks a peer dial
//! preference.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const TRANSITION_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionMode {
    #[serde(rename = "FULLY_ONLINE")]
    FullyOnline,
    #[serde(rename = "HUB_OFFLINE")]
    HubOffline,
    #[serde(rename = "FULLY_OFFLINE")]
    FullyOffline,
}

/// The raw transport states this mode is derived from.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportState {
    pub hub_connected: bool,
    pub webrtc_available: bool,
    pub direct_tls_available: bool,
}

/// `(old_mode, new_mode)` fired on every transition (spec §4.12).
#[derive(Debug, Clone, Copy)]
pub struct ModeTransition {
    pub old_mode: ConnectionMode,
    pub new_mode: ConnectionMode,
}

/// `FULLY_ONLINE` requires the hub, WebRTC, and direct TLS all up.
/// `HUB_OFFLINE` only holds when direct TLS still works without the hub —
/// WebRTC is forced unavailable the moment the hub drops, since WebRTC
/// dialing goes through the hub's signaling relay (spec §4.12, §4.6).
/// Anything else is `FULLY_OFFLINE`.
pub fn derive_mode(state: TransportState) -> ConnectionMode {
    let webrtc_available = state.webrtc_available && state.hub_connected;

    if state.hub_connected && webrtc_available && state.direct_tls_available {
        ConnectionMode::FullyOnline
    } else if state.direct_tls_available && !state.hub_connected {
        ConnectionMode::HubOffline
    } else {
        ConnectionMode::FullyOffline
    }
}

/// Tracks the current mode, recomputing it from fresh [`TransportState`]
/// readings and broadcasting a [`ModeTransition`] whenever it changes.
pub struct ConnectionStatus {
    current: Mutex<ConnectionMode>,
    transitions: broadcast::Sender<ModeTransition>,
}

impl ConnectionStatus {
    pub fn new(initial: TransportState) -> Self {
        let (transitions, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        Self { current: Mutex::new(derive_mode(initial)), transitions }
    }

    pub fn current_mode(&self) -> ConnectionMode {
        *self.current.lock().unwrap()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ModeTransition> {
        self.transitions.subscribe()
    }

    /// Recomputes the mode from `state` and fires a transition if it
    /// changed. Returns the (possibly unchanged) current mode.
    pub fn update(&self, state: TransportState) -> ConnectionMode {
        let new_mode = derive_mode(state);
        let mut current = self.current.lock().unwrap();
        if *current != new_mode {
            let old_mode = *current;
            *current = new_mode;
            tracing::info!(?old_mode, ?new_mode, "connection mode changed");
            let _ = self.transitions.send(ModeTransition { old_mode, new_mode });
        }
        new_mode
    }
}

/// How to dial a given peer, in order of preference (spec §4.12).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialPreference {
    DirectTls,
    WebRtc,
}

/// Prefers direct TLS when the peer is on the same LAN, falls back to
/// WebRTC when the peer supports it, and otherwise falls back to direct
/// TLS again (spec §4.12) — a routed direct-TLS dial, relying on whatever
/// NAT traversal C4's dial strategy can manage.
pub fn can_connect_to_peer(peer_supports_webrtc: bool, peer_on_lan: bool) -> DialPreference {
    if peer_on_lan {
        DialPreference::DirectTls
    } else if peer_supports_webrtc {
        DialPreference::WebRtc
    } else {
        DialPreference::DirectTls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(hub: bool, webrtc: bool, tls: bool) -> TransportState {
        TransportState { hub_connected: hub, webrtc_available: webrtc, direct_tls_available: tls }
    }

    #[test]
    fn fully_online_requires_all_three_transports() {
        assert_eq!(derive_mode(state(true, true, true)), ConnectionMode::FullyOnline);
        assert_eq!(derive_mode(state(true, false, true)), ConnectionMode::FullyOffline);
    }

    #[test]
    fn hub_offline_holds_only_when_direct_tls_still_works() {
        assert_eq!(derive_mode(state(false, true, true)), ConnectionMode::HubOffline);
        assert_eq!(derive_mode(state(false, false, true)), ConnectionMode::HubOffline);
    }

    #[test]
    fn webrtc_alone_without_hub_or_tls_is_fully_offline() {
        assert_eq!(derive_mode(state(false, true, false)), ConnectionMode::FullyOffline);
    }

    #[test]
    fn update_fires_a_transition_only_on_change() {
        let status = ConnectionStatus::new(state(true, true, true));
        let mut rx = status.subscribe();

        assert_eq!(status.update(state(true, true, true)), ConnectionMode::FullyOnline);
        assert!(rx.try_recv().is_err());

        assert_eq!(status.update(state(false, true, true)), ConnectionMode::HubOffline);
        let transition = rx.try_recv().unwrap();
        assert_eq!(transition.old_mode, ConnectionMode::FullyOnline);
        assert_eq!(transition.new_mode, ConnectionMode::HubOffline);
    }

    #[test]
    fn can_connect_to_peer_prefers_lan_then_webrtc_then_direct_tls() {
        assert_eq!(can_connect_to_peer(true, true), DialPreference::DirectTls);
        assert_eq!(can_connect_to_peer(true, false), DialPreference::WebRtc);
        assert_eq!(can_connect_to_peer(false, false), DialPreference::DirectTls);
    }
}
