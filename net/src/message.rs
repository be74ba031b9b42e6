//! Wire message types and framing.
//!
//! Every frame on a peer link is a u32-LE length prefix followed by the
//! bincode encoding of [`WireMessage`]. Leader role-change payloads carry
//! structured signatures; block and transaction bodies travel as opaque
//! payloads for the codec layer to interpret.

use {
    crate::error::{NetError, Result},
    fedchain_consensus::{CurrentLeaderMsg, NextLeaderMsg},
    serde::{Deserialize, Serialize},
    std::fmt,
};

/// Whether a node participates in leader rotation or merely observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    /// A federate server: joins the roster, eligible for rotation.
    Federate,
    /// A client node: gossip only.
    Client,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Federate => "federate",
            Self::Client => "client",
        })
    }
}

/// Inventory item kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum InvType {
    Error = 0,
    Tx = 1,
    Block = 2,
}

/// A `(type, hash)` announcement used to propagate new items through the
/// gossip overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvVect {
    pub inv_type: InvType,
    pub hash: [u8; 32],
}

/// Identity and capabilities exchanged during the version handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub node_id: String,
    pub node_kind: NodeKind,
    /// Raw ed25519 verifying key for role-change signatures.
    pub pub_key: [u8; 32],
    pub services: u64,
    pub protocol_version: u32,
    pub user_agent: String,
    /// Unix seconds the remote process started; tenure metric.
    pub start_time: i64,
    /// The remote's chain tip at handshake time.
    pub starting_height: u32,
    /// The remote does not want transaction inventory relayed to it.
    pub disable_relay_tx: bool,
}

/// Top-level gossip message.
///
/// Every frame on a peer link carries exactly one of these variants,
/// length-prefixed and bincode-encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireMessage {
    /// Identity handshake; first frame in each direction.
    Version(VersionInfo),

    /// Scheduled successor announcement from the sitting leader.
    NextLeader(NextLeaderMsg),

    /// Leadership announcement (scheduled or emergency).
    CurrentLeader(CurrentLeaderMsg),

    /// Inventory announcements.
    Inv(Vec<InvVect>),

    /// Lightweight keep-alive carrying the sender's tip height.
    Heartbeat {
        node_id: String,
        latest_height: u32,
    },

    /// Block announcement: the sender extended its chain to `height`.
    BlockAnnounce {
        hash: [u8; 32],
        height: u32,
    },

    /// Opaque traffic for the wire codec (blocks, transactions).
    Payload(Vec<u8>),
}

impl WireMessage {
    /// Serialize this message to bytes using bincode.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(NetError::Serialization)
    }

    /// Deserialize a message from bytes.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(NetError::Serialization)
    }

    /// Serialize with a 4-byte little-endian length prefix.
    ///
    /// Wire format: `[len: u32-le][payload: len bytes]`
    pub fn serialize_framed(&self, max_size: usize) -> Result<Vec<u8>> {
        let payload = self.serialize()?;
        if payload.len() > max_size {
            return Err(NetError::MessageTooLarge { size: payload.len(), max: max_size });
        }
        let len = payload.len() as u32;
        let mut buf = Vec::with_capacity(4 + payload.len());
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Read the length prefix from a 4-byte buffer.
    pub fn read_frame_len(header: &[u8; 4]) -> usize {
        u32::from_le_bytes(*header) as usize
    }

    /// Return a human-readable tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Version(_) => "version",
            Self::NextLeader(_) => "next_leader",
            Self::CurrentLeader(_) => "current_leader",
            Self::Inv(_) => "inv",
            Self::Heartbeat { .. } => "heartbeat",
            Self::BlockAnnounce { .. } => "block_announce",
            Self::Payload(_) => "payload",
        }
    }
}
