//! Direct TLS stream transport (spec §4.4): a long-lived TCP connection
//! wrapped in TLS with mutual authentication via node certificates. Since
//! every node is its own self-signed CA (spec §4.1), the rustls verifier
//! accepts any well-formed certificate and the CN-vs-expected-NodeId check
//! happens explicitly after handshake, not via a trust chain.

use std::sync::Arc;

use async_trait::async_trait;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::WebPkiClientVerifier;
use rustls::{DigitallySignedStruct, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector, TlsStream};

use lib_identity::{Identity, IdentityCertificate, NodeId};
use lib_wire::{Envelope, FrameReader, FrameWriter};

use crate::{PeerConnection, TransportError, TransportKind};

/// Accepts any certificate presented (nodes are mutually self-signed); the
/// caller verifies the Common Name against the expected NodeId afterward.
#[derive(Debug)]
struct AcceptAnyServerVerifier;

impl ServerCertVerifier for AcceptAnyServerVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![SignatureScheme::RSA_PSS_SHA256, SignatureScheme::RSA_PKCS1_SHA256]
    }
}

fn extract_peer_cn(stream: &TlsStream<TcpStream>) -> Result<String, TransportError> {
    let (_, session) = stream.get_ref();
    let certs = session
        .peer_certificates()
        .ok_or_else(|| TransportError::HandshakeFailed("peer presented no certificate".into()))?;
    let der = certs.first().ok_or_else(|| TransportError::HandshakeFailed("empty certificate chain".into()))?;
    let pem = pem_from_der(der.as_ref());
    let cert = IdentityCertificate::from_pem(&pem).map_err(|e| TransportError::HandshakeFailed(e.to_string()))?;
    cert.common_name().map_err(|e| TransportError::HandshakeFailed(e.to_string()))
}

pub(crate) fn pem_from_der_pub(der: &[u8]) -> String {
    pem_from_der(der)
}

fn pem_from_der(der: &[u8]) -> String {
    use base64::Engine;
    let encoded = base64::engine::general_purpose::STANDARD.encode(der);
    let mut body = String::new();
    for chunk in encoded.as_bytes().chunks(64) {
        body.push_str(std::str::from_utf8(chunk).unwrap());
        body.push('\n');
    }
    format!("-----BEGIN CERTIFICATE-----\n{body}-----END CERTIFICATE-----\n")
}

/// A TLS [`PeerConnection`]: owns the encrypted stream, framed with
/// `lib-wire`'s length-prefixed JSON envelope codec.
pub struct TlsTransport {
    peer_node_id: NodeId,
    reader: FrameReader<tokio::io::ReadHalf<TlsStream<TcpStream>>>,
    writer: FrameWriter<tokio::io::WriteHalf<TlsStream<TcpStream>>>,
}

impl TlsTransport {
    /// Dials `addr` as a TLS client, verifying the responder's certificate
    /// CN equals `expected_node_id` (spec §4.4). Aborts the connection on
    /// mismatch.
    pub async fn connect(
        addr: std::net::SocketAddr,
        identity: &Identity,
        expected_node_id: &NodeId,
    ) -> Result<Self, TransportError> {
        let tcp = TcpStream::connect(addr).await?;

        let mut root_store = rustls::RootCertStore::empty();
        let _ = &root_store;
        let config = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerVerifier))
            .with_client_auth_cert(
                vec![rustls::pki_types::CertificateDer::from(identity.certificate.certificate_der.clone())],
                rustls::pki_types::PrivateKeyDer::try_from(
                    identity.keypair.private_key_pem().map_err(|e| TransportError::Tls(e.to_string()))?.into_bytes(),
                )
                .map_err(|e| TransportError::Tls(e.to_string()))?,
            )
            .map_err(|e| TransportError::Tls(e.to_string()))?;

        let connector = TlsConnector::from(Arc::new(config));
        let server_name = rustls::pki_types::ServerName::try_from("dpc-peer")
            .map_err(|e| TransportError::Tls(e.to_string()))?
            .to_owned();
        let stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| TransportError::HandshakeFailed(e.to_string()))?;
        let stream = TlsStream::Client(stream);

        let found_cn = extract_peer_cn(&stream)?;
        if found_cn != expected_node_id.as_str() {
            return Err(TransportError::CertificateMismatch {
                expected: expected_node_id.as_str().to_string(),
                found: found_cn,
            });
        }

        let (read_half, write_half) = tokio::io::split(stream);
        Ok(Self {
            peer_node_id: expected_node_id.clone(),
            reader: FrameReader::new(read_half),
            writer: FrameWriter::new(write_half),
        })
    }

    /// Accepts an inbound TLS connection as a server, identifying the peer
    /// from its presented client certificate's CN.
    pub async fn accept(tcp: TcpStream, identity: &Identity) -> Result<Self, TransportError> {
        let client_verifier = WebPkiClientVerifier::builder(Arc::new(rustls::RootCertStore::empty()))
            .allow_unauthenticated()
            .build()
            .unwrap_or_else(|_| NoClientAuthVerifier::new());

        let config = rustls::ServerConfig::builder()
            .with_client_cert_verifier(client_verifier)
            .with_single_cert(
                vec![rustls::pki_types::CertificateDer::from(identity.certificate.certificate_der.clone())],
                rustls::pki_types::PrivateKeyDer::try_from(
                    identity.keypair.private_key_pem().map_err(|e| TransportError::Tls(e.to_string()))?.into_bytes(),
                )
                .map_err(|e| TransportError::Tls(e.to_string()))?,
            )
            .map_err(|e| TransportError::Tls(e.to_string()))?;

        let acceptor = TlsAcceptor::from(Arc::new(config));
        let stream = acceptor.accept(tcp).await.map_err(|e| TransportError::HandshakeFailed(e.to_string()))?;
        let stream = TlsStream::Server(stream);

        let found_cn = extract_peer_cn(&stream)?;
        let peer_node_id =
            NodeId::parse(&found_cn).map_err(|e| TransportError::HandshakeFailed(e.to_string()))?;

        let (read_half, write_half) = tokio::io::split(stream);
        Ok(Self { peer_node_id, reader: FrameReader::new(read_half), writer: FrameWriter::new(write_half) })
    }
}

/// Placeholder verifier used only when `WebPkiClientVerifier` construction
/// fails on an intentionally empty root store; every node is its own CA so
/// there is no shared trust anchor to validate against.
#[derive(Debug)]
struct NoClientAuthVerifier;

impl NoClientAuthVerifier {
    fn new() -> Arc<dyn ClientCertVerifier> {
        Arc::new(Self)
    }
}

impl ClientCertVerifier for NoClientAuthVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        false
    }

    fn root_hint_subjects(&self) -> &[rustls::DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![SignatureScheme::RSA_PSS_SHA256, SignatureScheme::RSA_PKCS1_SHA256]
    }
}

#[async_trait]
impl PeerConnection for TlsTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Tls
    }

    fn peer_node_id(&self) -> &NodeId {
        &self.peer_node_id
    }

    async fn send(&mut self, message: &Envelope) -> Result<(), TransportError> {
        self.writer.write_message(message).await.map_err(Into::into)
    }

    async fn read(&mut self) -> Result<Option<Envelope>, TransportError> {
        self.reader.read_message().await.map_err(Into::into)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}
