//! WebRTC datachannel transport (spec §4.4): an RTCDataChannel tunnel over
//! ICE (STUN+TURN), with SDP/ICE signaling carried by the Hub (`lib-signaling`)
//! rather than this crate. Once the channel opens, it is adapted to the
//! [`PeerConnection`] contract.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use lib_identity::NodeId;
use lib_wire::Envelope;

use crate::{PeerConnection, TransportError, TransportKind};

/// ICE server configuration (spec §4.4: STUN + TURN); addresses are
/// configuration, never embedded in the protocol (spec §9).
#[derive(Debug, Clone)]
pub struct IceServers {
    pub stun_urls: Vec<String>,
    pub turn_urls: Vec<String>,
    pub turn_username: Option<String>,
    pub turn_credential: Option<String>,
}

impl IceServers {
    fn to_rtc_servers(&self) -> Vec<RTCIceServer> {
        let mut servers = vec![RTCIceServer { urls: self.stun_urls.clone(), ..Default::default() }];
        if !self.turn_urls.is_empty() {
            servers.push(RTCIceServer {
                urls: self.turn_urls.clone(),
                username: self.turn_username.clone().unwrap_or_default(),
                credential: self.turn_credential.clone().unwrap_or_default(),
                ..Default::default()
            });
        }
        servers
    }
}

/// A WebRTC datachannel [`PeerConnection`]. The SDP offer/answer and ICE
/// candidate exchange happen through `lib-signaling` before this struct is
/// constructed; this struct owns only the open channel.
pub struct WebRtcTransport {
    peer_node_id: NodeId,
    peer_connection: Arc<RTCPeerConnection>,
    data_channel: Arc<RTCDataChannel>,
    inbound: mpsc::UnboundedReceiver<Envelope>,
}

impl WebRtcTransport {
    /// Builds the underlying `RTCPeerConnection` and a single ordered,
    /// reliable datachannel named `"dpc"`. The caller drives signaling
    /// (`create_offer`/`create_answer`/`set_remote_description`/ICE
    /// candidates) via the returned peer connection before the channel
    /// opens.
    pub async fn new_peer_connection(ice_servers: &IceServers) -> Result<Arc<RTCPeerConnection>, TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(|e| TransportError::HandshakeFailed(e.to_string()))?;
        let mut registry = webrtc::interceptor::registry::Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| TransportError::HandshakeFailed(e.to_string()))?;
        let api = APIBuilder::new().with_media_engine(media_engine).with_interceptor_registry(registry).build();

        let config = RTCConfiguration { ice_servers: ice_servers.to_rtc_servers(), ..Default::default() };
        let peer_connection =
            api.new_peer_connection(config).await.map_err(|e| TransportError::HandshakeFailed(e.to_string()))?;
        Ok(Arc::new(peer_connection))
    }

    /// Wraps an already-open datachannel (from either the offerer's
    /// `create_data_channel` or the answerer's `on_data_channel` callback)
    /// as a [`PeerConnection`].
    pub fn from_open_channel(
        peer_node_id: NodeId,
        peer_connection: Arc<RTCPeerConnection>,
        data_channel: Arc<RTCDataChannel>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        data_channel.on_message(Box::new(move |msg| {
            let tx = tx.clone();
            Box::pin(async move {
                if let Ok(envelope) = serde_json::from_slice::<Envelope>(&msg.data) {
                    let _ = tx.send(envelope);
                }
            })
        }));

        Self { peer_node_id, peer_connection, data_channel, inbound: rx }
    }

    pub async fn offer(peer_connection: &RTCPeerConnection) -> Result<RTCSessionDescription, TransportError> {
        let offer = peer_connection.create_offer(None).await.map_err(|e| TransportError::HandshakeFailed(e.to_string()))?;
        peer_connection
            .set_local_description(offer.clone())
            .await
            .map_err(|e| TransportError::HandshakeFailed(e.to_string()))?;
        Ok(offer)
    }

    pub async fn answer(peer_connection: &RTCPeerConnection) -> Result<RTCSessionDescription, TransportError> {
        let answer =
            peer_connection.create_answer(None).await.map_err(|e| TransportError::HandshakeFailed(e.to_string()))?;
        peer_connection
            .set_local_description(answer.clone())
            .await
            .map_err(|e| TransportError::HandshakeFailed(e.to_string()))?;
        Ok(answer)
    }
}

#[async_trait]
impl PeerConnection for WebRtcTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebRtc
    }

    fn peer_node_id(&self) -> &NodeId {
        &self.peer_node_id
    }

    async fn send(&mut self, message: &Envelope) -> Result<(), TransportError> {
        let payload = serde_json::to_vec(message).map_err(lib_wire::WireError::InvalidJson)?;
        self.data_channel
            .send(&bytes::Bytes::from(payload))
            .await
            .map_err(|e| TransportError::HandshakeFailed(e.to_string()))?;
        Ok(())
    }

    async fn read(&mut self) -> Result<Option<Envelope>, TransportError> {
        Ok(self.inbound.recv().await)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.data_channel.close().await.map_err(|e| TransportError::HandshakeFailed(e.to_string()))?;
        self.peer_connection.close().await.map_err(|e| TransportError::HandshakeFailed(e.to_string()))
    }
}
