use thiserror::Error;

/// Errors produced by the discovery core and its backend adapters
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("invalid discovery configuration: {0}")]
    Config(String),

    #[error("invalid node address '{0}', expected cluster@host:port")]
    InvalidAddress(String),

    #[error("registry request failed: {0}")]
    Registry(String),

    #[error("cluster operation failed: {0}")]
    Cluster(String),

    #[error("registry backend does not support distributed locks")]
    LockNotSupported,

    #[error("failed to join cluster [{cluster}] after {attempts} attempts")]
    JoinFailed { cluster: String, attempts: u32 },
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;
