//! Parses the `dpc://host:port?node_id=…` dial URI used for direct TLS
//! connections (spec §4.5 dial strategy step 1).

use std::net::{SocketAddr, ToSocketAddrs};

use lib_identity::NodeId;

use crate::P2pError;

const SCHEME: &str = "dpc://";

/// A fully-resolved direct-dial target.
#[derive(Debug, Clone)]
pub struct DialUri {
    pub host: String,
    pub port: u16,
    pub node_id: NodeId,
}

impl DialUri {
    pub fn parse(uri: &str) -> Result<Self, P2pError> {
        let rest = uri
            .strip_prefix(SCHEME)
            .ok_or_else(|| P2pError::InvalidUri(format!("missing '{SCHEME}' scheme: {uri}")))?;

        let (authority, query) = rest
            .split_once('?')
            .ok_or_else(|| P2pError::InvalidUri(format!("missing node_id query: {uri}")))?;

        let (host, port) = authority
            .rsplit_once(':')
            .ok_or_else(|| P2pError::InvalidUri(format!("missing port: {uri}")))?;
        let port: u16 = port
            .parse()
            .map_err(|_| P2pError::InvalidUri(format!("invalid port: {port}")))?;

        let node_id_str = query
            .split('&')
            .find_map(|kv| kv.strip_prefix("node_id="))
            .ok_or_else(|| P2pError::InvalidUri(format!("missing node_id= param: {uri}")))?;
        let node_id = NodeId::parse(node_id_str).map_err(|e| P2pError::InvalidUri(e.to_string()))?;

        Ok(Self { host: host.to_string(), port, node_id })
    }

    pub fn to_socket_addr(&self) -> Result<SocketAddr, P2pError> {
        format!("{}:{}", self.host, self.port)
            .to_socket_addrs()
            .map_err(|e| P2pError::InvalidUri(e.to_string()))?
            .next()
            .ok_or_else(|| P2pError::InvalidUri(format!("could not resolve {}:{}", self.host, self.port)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_uri() {
        let node_id = "dpc-node-".to_string() + &"a".repeat(32);
        let uri = format!("dpc://127.0.0.1:9000?node_id={node_id}");
        let parsed = DialUri::parse(&uri).unwrap();
        assert_eq!(parsed.host, "127.0.0.1");
        assert_eq!(parsed.port, 9000);
        assert_eq!(parsed.node_id.as_str(), node_id);
    }

    #[test]
    fn rejects_missing_scheme() {
        assert!(DialUri::parse("http://127.0.0.1:9000?node_id=x").is_err());
    }

    #[test]
    fn rejects_missing_node_id() {
        assert!(DialUri::parse("dpc://127.0.0.1:9000").is_err());
    }
}
