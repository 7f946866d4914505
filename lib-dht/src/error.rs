use thiserror::Error;

#[derive(Debug, Error)]
pub enum DhtError {
    #[error("rpc to {0} timed out")]
    Timeout(std::net::SocketAddr),

    #[error("malformed DHT message: {0}")]
    Malformed(String),

    #[error("routing table has no known contacts")]
    NoContacts,

    #[error("refusing to add local node to its own routing table")]
    IsLocalNode,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Identity(#[from] lib_identity::IdentityError),
}
