//! Fedchain ledger primitives.
//!
//! This crate owns the structures every other layer agrees on:
//!
//! - **Hashes**: the 33-byte (length-prefixed SHA-256) form used by all
//!   marshaled ledger structures.
//! - **Directory-block headers**: the fixed big-endian on-disk layout.
//! - **Credit-block entries**: the three payment entry kinds, modeled as
//!   a tagged variant and dispatched on the leading type byte.
//! - **The admin block model**: the JSON/XML-facing `Block` and
//!   `PlainEntry` served and mutated by the REST surface.
//!
//! Everything here is pure data and codecs; no I/O.

pub mod block;
pub mod entry;
pub mod error;
pub mod hash;
pub mod header;
pub mod merkle;

pub use {
    block::{Block, EntrySig, PlainEntry},
    entry::{CbInfo, CreditEntry, EcBalance},
    error::{LedgerError, Result},
    hash::Hash,
    header::DirBlockHeader,
};
