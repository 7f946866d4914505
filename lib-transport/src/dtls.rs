//! DTLS-over-UDP transport (spec §4.4): used after STUN/Hub-assisted UDP
//! hole-punching, with a cooperative handshake over the already-punched
//! socket and a post-handshake peer-certificate CN check.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use webrtc_dtls::cipher_suite::CipherSuiteId;
use webrtc_dtls::config::Config as DtlsConfig;
use webrtc_dtls::conn::DTLSConn;
use webrtc_dtls::crypto::Certificate as DtlsCertificate;
use webrtc_util::conn::Conn;

use lib_identity::{Identity, IdentityCertificate, NodeId};
use lib_wire::{Envelope, WireError};

use crate::{PeerConnection, TransportError, TransportKind};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);

/// A DTLS [`PeerConnection`]. Because the underlying `Conn` trait is
/// datagram-oriented rather than a byte stream, this transport frames each
/// JSON envelope as exactly one DTLS record, rather than using `lib-wire`'s
/// length-prefixed stream codec.
pub struct DtlsTransport {
    peer_node_id: NodeId,
    conn: Arc<DTLSConn>,
    recv_buf: Vec<u8>,
}

impl DtlsTransport {
    fn dtls_certificate(identity: &Identity) -> Result<DtlsCertificate, TransportError> {
        DtlsCertificate::from_key_pair(&webrtc_dtls::crypto::CryptoPrivateKey::from_key_pair(
            &identity.keypair.private_key_pem().map_err(|e| TransportError::Tls(e.to_string()))?,
        )
        .map_err(|e| TransportError::Tls(e.to_string()))?)
        .map_err(|e| TransportError::Tls(e.to_string()))
    }

    /// Performs a cooperative DTLS handshake as the initiator over a socket
    /// already connected to `remote_addr` via UDP hole-punching.
    pub async fn connect(
        socket: UdpSocket,
        remote_addr: SocketAddr,
        identity: &Identity,
        expected_node_id: &NodeId,
    ) -> Result<Self, TransportError> {
        Self::handshake(socket, remote_addr, identity, Some(expected_node_id.clone()), true).await
    }

    /// Accepts an inbound DTLS handshake as the responder.
    pub async fn accept(socket: UdpSocket, remote_addr: SocketAddr, identity: &Identity) -> Result<Self, TransportError> {
        Self::handshake(socket, remote_addr, identity, None, false).await
    }

    async fn handshake(
        socket: UdpSocket,
        remote_addr: SocketAddr,
        identity: &Identity,
        expected_node_id: Option<NodeId>,
        is_client: bool,
    ) -> Result<Self, TransportError> {
        socket.connect(remote_addr).await?;
        let conn: Arc<dyn Conn + Send + Sync> = Arc::new(socket);

        let config = DtlsConfig {
            certificates: vec![Self::dtls_certificate(identity)?],
            insecure_skip_verify: true,
            cipher_suites: vec![CipherSuiteId::Tls_Ecdhe_Ecdsa_With_Aes_128_Gcm_Sha256],
            ..Default::default()
        };

        let dtls_conn = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
            if is_client {
                DTLSConn::new(conn, config, true, None).await
            } else {
                DTLSConn::new(conn, config, false, None).await
            }
        })
        .await
        .map_err(|_| TransportError::HandshakeTimeout(HANDSHAKE_TIMEOUT))?
        .map_err(|e| TransportError::HandshakeFailed(e.to_string()))?;

        let peer_certs = dtls_conn
            .connection_state()
            .await
            .peer_certificates;
        let der = peer_certs
            .first()
            .ok_or_else(|| TransportError::HandshakeFailed("peer presented no DTLS certificate".into()))?;
        let pem = crate::tls::pem_from_der_pub(der);
        let cert = IdentityCertificate::from_pem(&pem).map_err(|e| TransportError::HandshakeFailed(e.to_string()))?;
        let found_cn = cert.common_name().map_err(|e| TransportError::HandshakeFailed(e.to_string()))?;

        let peer_node_id = match expected_node_id {
            Some(expected) if found_cn != expected.as_str() => {
                return Err(TransportError::CertificateMismatch {
                    expected: expected.as_str().to_string(),
                    found: found_cn,
                });
            }
            Some(expected) => expected,
            None => NodeId::parse(&found_cn).map_err(|e| TransportError::HandshakeFailed(e.to_string()))?,
        };

        Ok(Self { peer_node_id, conn: Arc::new(dtls_conn), recv_buf: vec![0u8; 16 * 1024] })
    }
}

#[async_trait]
impl PeerConnection for DtlsTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Dtls
    }

    fn peer_node_id(&self) -> &NodeId {
        &self.peer_node_id
    }

    async fn send(&mut self, message: &Envelope) -> Result<(), TransportError> {
        let payload = serde_json::to_vec(message).map_err(WireError::InvalidJson)?;
        self.conn.send(&payload).await.map_err(|e| TransportError::HandshakeFailed(e.to_string()))?;
        Ok(())
    }

    async fn read(&mut self) -> Result<Option<Envelope>, TransportError> {
        match self.conn.recv(&mut self.recv_buf).await {
            Ok(0) => Ok(None),
            Ok(n) => {
                let envelope: Envelope =
                    serde_json::from_slice(&self.recv_buf[..n]).map_err(WireError::InvalidJson)?;
                Ok(Some(envelope))
            }
            Err(_) => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.conn.close().await.map_err(|e| TransportError::HandshakeFailed(e.to_string()))
    }
}
