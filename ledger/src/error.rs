//! Error types for ledger codecs.

use thiserror::Error;

/// Errors produced while marshaling or unmarshaling ledger structures.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// The input ended before the structure was fully decoded.
    #[error("unexpected end of input: need {need} more bytes, have {have}")]
    UnexpectedEnd {
        /// Bytes still required by the decoder.
        need: usize,
        /// Bytes actually remaining.
        have: usize,
    },

    /// A hash field carried a length prefix other than 32.
    #[error("bad hash length prefix: {0}")]
    BadHashPrefix(u8),

    /// The leading type byte does not name a known credit entry kind.
    #[error("unknown credit entry type: {0}")]
    UnknownEntryType(u8),

    /// A genesis block claimed a parent, or a later block lacked one.
    #[error("block {block_id} breaks the chain: {reason}")]
    BrokenChain {
        /// Offending block id.
        block_id: u64,
        /// Human-readable cause.
        reason: String,
    },
}

/// Convenience result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
