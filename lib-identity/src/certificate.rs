//! Self-signed X.509 certificate issuance and parsing (spec §4.1): every
//! node presents a certificate whose Common Name is its NodeId, valid for
//! ten years, with `BasicConstraints.ca = true` so a node can terminate TLS
//! for peers without a separate CA hierarchy.

use time::{Duration, OffsetDateTime};

use crate::{IdentityError, NodeId};

const VALIDITY_YEARS: i64 = 10;

/// A certificate bound to a [`NodeId`], in both DER and PEM form.
pub struct IdentityCertificate {
    pub certificate_der: Vec<u8>,
    pub certificate_pem: String,
}

impl IdentityCertificate {
    /// Issues a self-signed certificate over `keypair`, with `node_id` as
    /// the certificate's Common Name.
    pub fn issue_self_signed(node_id: &NodeId, keypair: &lib_crypto::RsaKeyPair) -> Result<Self, IdentityError> {
        let private_key_pem = keypair.private_key_pem()?;
        let rcgen_keypair =
            rcgen::KeyPair::from_pem(&private_key_pem).map_err(|e| IdentityError::Certificate(e.to_string()))?;

        let mut params =
            rcgen::CertificateParams::new(Vec::<String>::new()).map_err(|e| IdentityError::Certificate(e.to_string()))?;
        let mut distinguished_name = rcgen::DistinguishedName::new();
        distinguished_name.push(rcgen::DnType::CommonName, node_id.as_str());
        params.distinguished_name = distinguished_name;
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);

        let now = OffsetDateTime::now_utc();
        params.not_before = now - Duration::days(1);
        params.not_after = now + Duration::days(365 * VALIDITY_YEARS);

        let certificate = params
            .self_signed(&rcgen_keypair)
            .map_err(|e| IdentityError::Certificate(e.to_string()))?;

        Ok(Self {
            certificate_der: certificate.der().to_vec(),
            certificate_pem: certificate.pem(),
        })
    }

    /// Parses a PEM-encoded certificate, e.g. one fetched from a peer.
    pub fn from_pem(pem: &str) -> Result<Self, IdentityError> {
        let (_, pem_block) =
            x509_parser::pem::parse_x509_pem(pem.as_bytes()).map_err(|e| IdentityError::Certificate(e.to_string()))?;
        pem_block
            .parse_x509()
            .map_err(|e| IdentityError::Certificate(e.to_string()))?;
        Ok(Self {
            certificate_der: pem_block.contents,
            certificate_pem: pem.to_string(),
        })
    }

    /// Extracts the certificate's RSA public key, used by the commit engine
    /// to verify a signer's signature against the cert pinned for its
    /// NodeId (spec §4.7: "Verification loads the signer's cert from the
    /// per-peer cert directory").
    pub fn public_key(&self) -> Result<rsa::RsaPublicKey, IdentityError> {
        use rsa::pkcs8::DecodePublicKey;

        let (_, cert) = x509_parser::parse_x509_certificate(&self.certificate_der)
            .map_err(|e| IdentityError::Certificate(e.to_string()))?;
        let spki_der = cert.public_key().raw;
        rsa::RsaPublicKey::from_public_key_der(spki_der)
            .map_err(|e| IdentityError::Certificate(format!("certificate does not hold an RSA SPKI key: {e}")))
    }

    /// Extracts the certificate's Common Name, used to verify a peer's
    /// claimed NodeId matches the certificate it presents over TLS/DTLS.
    pub fn common_name(&self) -> Result<String, IdentityError> {
        let (_, cert) = x509_parser::parse_x509_certificate(&self.certificate_der)
            .map_err(|e| IdentityError::Certificate(e.to_string()))?;
        let cn = cert
            .subject()
            .iter_common_name()
            .next()
            .ok_or_else(|| IdentityError::Certificate("certificate has no Common Name".into()))?
            .as_str()
            .map_err(|e| IdentityError::Certificate(e.to_string()))?;
        Ok(cn.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issues_certificate_with_matching_cn() {
        let keypair = lib_crypto::RsaKeyPair::generate().unwrap();
        let node_id = NodeId::from_public_key_pem(&keypair.public_key_pem().unwrap()).unwrap();
        let cert = IdentityCertificate::issue_self_signed(&node_id, &keypair).unwrap();
        assert_eq!(cert.common_name().unwrap(), node_id.as_str());
    }

    #[test]
    fn round_trips_through_pem() {
        let keypair = lib_crypto::RsaKeyPair::generate().unwrap();
        let node_id = NodeId::from_public_key_pem(&keypair.public_key_pem().unwrap()).unwrap();
        let cert = IdentityCertificate::issue_self_signed(&node_id, &keypair).unwrap();

        let parsed = IdentityCertificate::from_pem(&cert.certificate_pem).unwrap();
        assert_eq!(parsed.common_name().unwrap(), node_id.as_str());
        assert_eq!(parsed.certificate_der, cert.certificate_der);
    }
}
