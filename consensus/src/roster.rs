//! The ordered set of federate servers and their role state.
//!
//! All role mutation goes through the centralized setters, which enforce
//! that at most one server holds each of `Leader`, `LeaderElect`, and
//! `LeaderPrev` at any time: assigning a role demotes the previous holder
//! (`Leader` → `LeaderPrev` on replacement; `LeaderElect` / `LeaderPrev`
//! → `Follower`).

use {
    crate::types::{NodeId, NodeState, PeerId},
    ed25519_dalek::VerifyingKey,
    std::net::SocketAddr,
};

/// One federate server known to this node, with the tenure metadata used
/// to rank peers during an emergency election.
#[derive(Debug, Clone)]
pub struct FederateServer {
    pub node_id: NodeId,
    /// Key role-change signatures from this server verify against.
    pub pub_key: Option<VerifyingKey>,
    /// Arena id of the live connection; `None` for our own entry.
    pub peer: Option<PeerId>,
    /// Remote address; `None` for our own entry.
    pub addr: Option<SocketAddr>,
    /// Unix seconds the server process started; tenure tie-break.
    pub start_time: i64,
    /// Height at which this server joined as a candidate.
    pub first_joined: u32,
    /// Height at which it first became a follower.
    pub first_as_follower: u32,
    /// Height of its first successful directory-signature vote.
    pub last_success_vote: u32,
    /// Height at which it last held the leadership; round-robin key.
    pub leader_last: u32,
    pub state: NodeState,
}

impl FederateServer {
    /// A fresh candidate entry joining at `first_joined`.
    pub fn new(node_id: NodeId, start_time: i64, first_joined: u32) -> Self {
        Self {
            node_id,
            pub_key: None,
            peer: None,
            addr: None,
            start_time,
            first_joined,
            first_as_follower: 0,
            last_success_vote: 0,
            leader_last: 0,
            state: NodeState::Candidate,
        }
    }

    pub fn is_candidate(&self) -> bool {
        self.state == NodeState::Candidate
    }
}

/// Ordered list of federate servers; insertion order is preserved so the
/// round-robin tie-break is stable.
#[derive(Debug, Default)]
pub struct FederateRoster {
    servers: Vec<FederateServer>,
}

impl FederateRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Add a server. Duplicates (by node id or address) are the caller's
    /// concern; the peer manager rejects them before getting here.
    pub fn add(&mut self, server: FederateServer) {
        self.servers.push(server);
    }

    /// Remove a server by node id, returning its entry.
    pub fn remove(&mut self, node_id: &str) -> Option<FederateServer> {
        let idx = self.servers.iter().position(|s| s.node_id == node_id)?;
        Some(self.servers.remove(idx))
    }

    pub fn get(&self, node_id: &str) -> Option<&FederateServer> {
        self.servers.iter().find(|s| s.node_id == node_id)
    }

    pub fn get_mut(&mut self, node_id: &str) -> Option<&mut FederateServer> {
        self.servers.iter_mut().find(|s| s.node_id == node_id)
    }

    /// Whether any entry matches the given address or node id; used for
    /// the duplicate-federate rejection rule.
    pub fn conflicts_with(&self, addr: Option<SocketAddr>, node_id: &str) -> bool {
        self.servers
            .iter()
            .any(|s| s.node_id == node_id || (addr.is_some() && s.addr == addr))
    }

    /// First server currently holding `state`, if any.
    pub fn by_state(&self, state: NodeState) -> Option<&FederateServer> {
        self.servers.iter().find(|s| s.state == state)
    }

    pub fn leader(&self) -> Option<&FederateServer> {
        self.by_state(NodeState::Leader)
    }

    pub fn leader_elect(&self) -> Option<&FederateServer> {
        self.by_state(NodeState::LeaderElect)
    }

    pub fn prev_leader(&self) -> Option<&FederateServer> {
        self.by_state(NodeState::LeaderPrev)
    }

    pub fn state_of(&self, node_id: &str) -> Option<NodeState> {
        self.get(node_id).map(|s| s.state)
    }

    /// Split into `(non_candidates, candidates)` node-id lists, preserving
    /// roster order.
    pub fn split(&self) -> (Vec<&FederateServer>, Vec<&FederateServer>) {
        self.servers.iter().partition(|s| !s.is_candidate())
    }

    /// Non-candidate node ids sorted by `leader_last` ascending, the
    /// round-robin rotation order.
    pub fn non_candidates_by_leader_last(&self) -> Vec<&FederateServer> {
        let (mut non_candidates, _) = self.split();
        non_candidates.sort_by_key(|s| s.leader_last);
        non_candidates
    }

    /// Non-candidate node ids sorted by `start_time` ascending, longest
    /// tenure first.
    pub fn non_candidates_by_start_time(&self) -> Vec<&FederateServer> {
        let (mut non_candidates, _) = self.split();
        non_candidates.sort_by_key(|s| s.start_time);
        non_candidates
    }

    // ── Centralized role mutators ───────────────────────────────────────

    /// Make `node_id` the leader. The displaced leader becomes the
    /// previous leader (which in turn demotes any existing previous
    /// leader to follower).
    pub fn set_leader(&mut self, node_id: &str) -> bool {
        if let Some(old) = self.leader().map(|s| s.node_id.clone()) {
            if old != node_id {
                self.set_prev_leader(&old);
            }
        }
        self.set_state(node_id, NodeState::Leader)
    }

    /// Make `node_id` the leader-elect, demoting any other holder to
    /// follower.
    pub fn set_leader_elect(&mut self, node_id: &str) -> bool {
        if let Some(old) = self.leader_elect().map(|s| s.node_id.clone()) {
            if old != node_id {
                self.set_state(&old, NodeState::Follower);
            }
        }
        self.set_state(node_id, NodeState::LeaderElect)
    }

    /// Make `node_id` the previous leader, demoting any other holder to
    /// follower.
    pub fn set_prev_leader(&mut self, node_id: &str) -> bool {
        if let Some(old) = self.prev_leader().map(|s| s.node_id.clone()) {
            if old != node_id {
                self.set_state(&old, NodeState::Follower);
            }
        }
        self.set_state(node_id, NodeState::LeaderPrev)
    }

    pub fn set_follower(&mut self, node_id: &str) -> bool {
        self.set_state(node_id, NodeState::Follower)
    }

    fn set_state(&mut self, node_id: &str, state: NodeState) -> bool {
        match self.get_mut(node_id) {
            Some(server) => {
                server.state = state;
                true
            }
            None => false,
        }
    }

    // ── Role queries for this node's own entry ──────────────────────────

    pub fn is_leader(&self, self_id: &str) -> bool {
        self.state_of(self_id) == Some(NodeState::Leader)
    }

    pub fn is_leader_elect(&self, self_id: &str) -> bool {
        self.state_of(self_id) == Some(NodeState::LeaderElect)
    }

    pub fn is_prev_leader(&self, self_id: &str) -> bool {
        self.state_of(self_id) == Some(NodeState::LeaderPrev)
    }

    pub fn is_candidate(&self, self_id: &str) -> bool {
        self.state_of(self_id) == Some(NodeState::Candidate)
    }

    /// Follower in the wide sense: anything eligible that is not the
    /// sitting leader.
    pub fn is_follower(&self, self_id: &str) -> bool {
        matches!(
            self.state_of(self_id),
            Some(NodeState::Follower) | Some(NodeState::LeaderElect) | Some(NodeState::LeaderPrev)
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = &FederateServer> {
        self.servers.iter()
    }
}
