//! Error types for node assembly.

use thiserror::Error;

/// Errors raised while building or running a node.
#[derive(Error, Debug)]
pub enum CoreError {
    /// The configured server private key is not a 32-byte hex string.
    #[error("bad server private key: {0}")]
    BadPrivateKey(String),

    /// A listener or the admin surface could not bind.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The node was started twice.
    #[error("node already started")]
    AlreadyStarted,
}

/// Convenience result type for node assembly.
pub type Result<T> = std::result::Result<T, CoreError>;
