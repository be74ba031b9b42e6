//! Error types for the peer networking layer.

use thiserror::Error;

/// Errors that can occur in the peer networking layer.
#[derive(Error, Debug)]
pub enum NetError {
    /// Failed to serialize or deserialize a wire message.
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Message exceeds the maximum allowed size.
    #[error("message too large: {size} bytes (max {max} bytes)")]
    MessageTooLarge {
        /// Actual message size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// An inbound peer duplicates an existing federate server.
    #[error("duplicate federate peer: {0}")]
    PeerDuplicate(String),

    /// The peer's host is currently banned.
    #[error("peer host is banned: {0}")]
    PeerBanned(String),

    /// The peer set is full.
    #[error("maximum peers reached: {0}")]
    PeerAtCapacity(usize),

    /// The address book has no candidate to offer.
    #[error("no outbound address available")]
    AddressUnavailable,

    /// No peer with the given address or id is connected.
    #[error("peer not found: {0}")]
    PeerNotFound(String),

    /// A signed role-change message failed verification.
    #[error(transparent)]
    Consensus(#[from] fedchain_consensus::ConsensusError),

    /// Transport-level I/O error.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The peer manager (or a peer's send queue) is gone.
    #[error("channel closed")]
    ChannelClosed,

    /// The peer sent an invalid or malformed message.
    #[error("invalid message from peer: {0}")]
    InvalidMessage(String),
}

/// Convenience result type for networking operations.
pub type Result<T> = std::result::Result<T, NetError>;
