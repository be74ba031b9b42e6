//! Identities, roles, and the signed leader wire payloads.

use {
    serde::{Deserialize, Serialize},
    std::fmt,
};

/// A federate server's stable string identity.
pub type NodeId = String;

/// Stable key into the peer manager's peer arena. The roster stores this
/// id instead of any reference to the live connection.
pub type PeerId = u64;

/// Role a federate server currently holds in the rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    /// Joined but not yet eligible for leadership (chain still syncing).
    Candidate,
    /// Eligible participant.
    Follower,
    /// Designated to take over at the next scheduled boundary.
    LeaderElect,
    /// Currently sealing directory blocks.
    Leader,
    /// The immediately previous leader.
    LeaderPrev,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Candidate => "candidate",
            Self::Follower => "follower",
            Self::LeaderElect => "leader-elect",
            Self::Leader => "leader",
            Self::LeaderPrev => "leader-prev",
        };
        f.write_str(name)
    }
}

/// Scheduled notification that `next_id` takes over at `start_height`.
///
/// `sig` covers `current_id || next_id` under the emitter's key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextLeaderMsg {
    pub current_id: NodeId,
    pub next_id: NodeId,
    pub start_height: u32,
    pub sig: Vec<u8>,
}

impl NextLeaderMsg {
    /// The byte string the signature covers.
    pub fn signing_payload(current_id: &str, next_id: &str) -> Vec<u8> {
        let mut payload = Vec::with_capacity(current_id.len() + next_id.len());
        payload.extend_from_slice(current_id.as_bytes());
        payload.extend_from_slice(next_id.as_bytes());
        payload
    }
}

/// Announcement that `new_id` is the leader as of `height`, replacing
/// `dead_id` (empty when unknown).
///
/// `sig` covers `dead_id || new_id || source_id || decimal(height)` under
/// the emitter's key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentLeaderMsg {
    pub dead_id: NodeId,
    pub new_id: NodeId,
    pub source_id: NodeId,
    pub height: u32,
    pub sig: Vec<u8>,
}

impl CurrentLeaderMsg {
    /// The byte string the signature covers.
    pub fn signing_payload(dead_id: &str, new_id: &str, source_id: &str, height: u32) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(dead_id.as_bytes());
        payload.extend_from_slice(new_id.as_bytes());
        payload.extend_from_slice(source_id.as_bytes());
        payload.extend_from_slice(height.to_string().as_bytes());
        payload
    }
}

/// A leader-protocol message the machine asks the caller to broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaderBroadcast {
    NextLeader(NextLeaderMsg),
    CurrentLeader(CurrentLeaderMsg),
}
