//! Fedchain peer networking.
//!
//! This crate provides the gossip overlay a federate server lives on:
//!
//! - **Peer connections**: one bidirectional, length-prefixed-framed TCP
//!   link per peer, with its own send and receive tasks.
//! - **The peer manager**: a single-owner event loop that is the sole
//!   mutator of the peer set and the federate roster, driven entirely by
//!   channels.
//! - **The address book**: candidate outbound addresses, grouped to
//!   avoid clumping on one network segment.
//! - **The rebroadcast queue**: re-announces inventory that has not yet
//!   made it into a block, on a randomized timer.
//!
//! ## Architecture
//!
//! ```text
//!  listeners ──┐                       ┌── send task ── TCP ──▶
//!              ├──▶ new_peers ─▶ ┌─────┴────┐
//!  dialer ─────┘                 │   Peer   │
//!                                │ Manager  │◀─ done/ban/query/relay
//!  rebroadcast ──▶ relay_inv ──▶ │  (task)  │
//!                                └─────┬────┘
//!         leader service ◀── federate removals, inbound role msgs
//! ```
//!
//! ## Crate modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`]       | `NetConfig` defaults and dev overrides |
//! | [`message`]      | Wire types, bincode ser/de, framing helpers |
//! | [`peer`]         | Peer state, handshake, per-peer send/receive tasks |
//! | [`peer_manager`] | The single-owner peer-set / roster event loop |
//! | [`address_book`] | Outbound candidate tracking and grouping |
//! | [`rebroadcast`]  | Pending-inventory re-announcement |
//! | [`error`]        | Crate-wide error enum |

pub mod address_book;
pub mod config;
pub mod error;
pub mod message;
pub mod peer;
pub mod peer_manager;
pub mod rebroadcast;

pub use {
    address_book::AddressBook,
    config::NetConfig,
    error::{NetError, Result},
    message::{InvType, InvVect, NodeKind, VersionInfo, WireMessage},
    peer::{ByteTotals, InboundMessage, Peer, PeerContext},
    peer_manager::{BroadcastMsg, PeerInfo, PeerManager, PeerManagerHandle, RelayMsg},
    rebroadcast::{random_uint16, RebroadcastHandle, RebroadcastQueue},
};
