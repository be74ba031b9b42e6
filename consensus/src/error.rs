//! Error types for leader election.

use thiserror::Error;

/// Errors produced by roster and leader-machine operations.
#[derive(Error, Debug)]
pub enum ConsensusError {
    /// A signed role-change message failed verification.
    #[error("invalid signature on {message} from {node_id}")]
    SignatureInvalid {
        /// Message kind ("next-leader" / "current-leader").
        message: &'static str,
        /// Claimed emitter.
        node_id: String,
    },

    /// A role-change message named a node that is not in the roster.
    #[error("unknown federate server: {0}")]
    UnknownFederate(String),

    /// The emitter's roster entry carries no public key to verify against.
    #[error("no public key recorded for federate {0}")]
    MissingPublicKey(String),
}

/// Convenience result type for consensus operations.
pub type Result<T> = std::result::Result<T, ConsensusError>;
