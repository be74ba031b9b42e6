//! The height-driven leader state machine.
//!
//! The machine reacts to two kinds of input: a sealed block height from
//! the processor, and the removal of a federate peer reported by the peer
//! manager. It is deterministic and does no I/O: every transition returns
//! a [`MachineOutput`] listing the signed messages to broadcast and the
//! processor hooks to fire. The owning service loop is responsible for
//! fanning those out.
//!
//! Role transitions run under the shared roster lock, so they are mutually
//! exclusive with the peer manager's roster mutations.

use {
    crate::{
        error::{ConsensusError, Result},
        policy::LeaderPolicy,
        roster::{FederateRoster, FederateServer},
        types::{CurrentLeaderMsg, LeaderBroadcast, NextLeaderMsg, NodeId, NodeState},
    },
    ed25519_dalek::{Signature, Signer, SigningKey, Verifier},
    log::{debug, info, warn},
    parking_lot::Mutex,
    std::sync::Arc,
};

/// Blocks added to our own term when no successor is eligible.
const LONE_LEADER_TERM_EXTENSION: u32 = 3;

/// What a transition asks the caller to do.
#[derive(Debug, Default)]
pub struct MachineOutput {
    /// Signed leader-protocol messages to broadcast.
    pub broadcasts: Vec<LeaderBroadcast>,
    /// Fire `ProcessorHooks::reset_leader_state` (emergency takeover).
    pub reset_leader_state: bool,
    /// Fire `ProcessorHooks::start_block_timer` (we are now the leader).
    pub arm_block_timer: bool,
    /// Fire `ProcessorHooks::stop_block_timer` (our term just ended).
    pub disarm_block_timer: bool,
}

impl MachineOutput {
    /// True when the transition produced nothing to act on.
    pub fn is_empty(&self) -> bool {
        self.broadcasts.is_empty()
            && !self.reset_leader_state
            && !self.arm_block_timer
            && !self.disarm_block_timer
    }
}

/// Leader-election policy machine for one node.
pub struct LeaderMachine {
    node_id: NodeId,
    signing_key: SigningKey,
    roster: Arc<Mutex<FederateRoster>>,
    /// Our term schedule; `None` unless we are the leader or a scheduled
    /// leader-elect.
    policy: Option<LeaderPolicy>,
    /// Set when the sitting leader disappeared; consumed by the next
    /// takeover to request a processor reset.
    leader_crashed: bool,
}

impl LeaderMachine {
    pub fn new(node_id: NodeId, signing_key: SigningKey, roster: Arc<Mutex<FederateRoster>>) -> Self {
        Self { node_id, signing_key, roster, policy: None, leader_crashed: false }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn policy(&self) -> Option<&LeaderPolicy> {
        self.policy.as_ref()
    }

    /// Seed the initial policy (used by nodes configured to boot as the
    /// network's first leader).
    pub fn install_policy(&mut self, policy: LeaderPolicy) {
        self.policy = Some(policy);
    }

    // ── Height events ───────────────────────────────────────────────────

    /// React to block `height` having been sealed.
    pub fn on_height_sealed(&mut self, height: u32) -> MachineOutput {
        let mut out = MachineOutput::default();
        let roster = self.roster.clone();
        let mut roster = roster.lock();

        if !roster.is_leader(&self.node_id) && !roster.is_leader_elect(&self.node_id) {
            debug!("height {height}: neither leader nor leader-elect, nothing to do");
            return out;
        }

        // Single-server mode: keep our own schedule sliding forward.
        if roster.len() == 1 && roster.is_leader(&self.node_id) {
            if let Some(policy) = self.policy.as_mut() {
                policy.start_db_height = height + 1;
                debug!("single-server mode: start height moved to {}", policy.start_db_height);
            }
            return out;
        }

        if roster.is_leader_elect(&self.node_id) {
            self.height_as_leader_elect(&mut roster, height, &mut out);
            return out;
        }

        self.height_as_leader(&mut roster, height, &mut out);
        out
    }

    fn height_as_leader_elect(
        &mut self,
        roster: &mut FederateRoster,
        height: u32,
        out: &mut MachineOutput,
    ) {
        let Some(policy) = self.policy.clone() else {
            warn!("leader-elect without a policy at height {height}");
            return;
        };
        if height > policy.start_db_height {
            warn!(
                "stale policy: height {height} past scheduled start {}",
                policy.start_db_height
            );
            return;
        }
        if height + 1 == policy.start_db_height {
            // Regime change: our scheduled term begins at the next block.
            let outgoing = roster.leader().map(|s| s.node_id.clone()).unwrap_or_default();
            if let Some(server) = roster.get_mut(&outgoing) {
                server.leader_last = height;
            }
            info!("regime change: taking leadership at height {}", height + 1);
            self.send_current_leader(roster, outgoing, height + 1, out);
        }
    }

    fn height_as_leader(
        &mut self,
        roster: &mut FederateRoster,
        height: u32,
        out: &mut MachineOutput,
    ) {
        let Some(policy) = self.policy.clone() else {
            warn!("leader without a policy at height {height}");
            return;
        };
        if height > policy.start_db_height + policy.term {
            // Can happen when we just left single-server mode.
            warn!(
                "stale policy: height {height} past term end {}",
                policy.start_db_height + policy.term
            );
            return;
        }
        if height + 1 == policy.start_db_height + policy.notify_db_height {
            self.select_next_leader_locked(roster, height, out);
        } else if height + 1 == policy.start_db_height + policy.term {
            info!("regime change: term ends, stepping down at height {height}");
            roster.set_prev_leader(&self.node_id);
            if let Some(elect) = roster.leader_elect().map(|s| s.node_id.clone()) {
                roster.set_leader(&elect);
            }
            self.policy = None;
            if let Some(me) = roster.get_mut(&self.node_id) {
                me.leader_last = height;
            }
            out.disarm_block_timer = true;
        }
    }

    // ── Peer-loss events ────────────────────────────────────────────────

    /// React to the peer manager removing federate server `removed`.
    /// `newest_height` is the latest sealed directory-block height.
    pub fn on_federate_removed(
        &mut self,
        removed: &FederateServer,
        newest_height: u32,
    ) -> MachineOutput {
        let mut out = MachineOutput::default();
        let roster = self.roster.clone();
        let mut roster = roster.lock();

        if roster.is_leader(&self.node_id) && removed.state == NodeState::LeaderElect {
            info!("leader-elect {} lost, selecting a new one", removed.node_id);
            self.select_next_leader_locked(&mut roster, newest_height, &mut out);
        } else if removed.state == NodeState::Leader {
            info!("leader {} lost, running emergency election", removed.node_id);
            self.leader_crashed = true;
            self.select_current_leader_locked(
                &mut roster,
                newest_height,
                Some(removed.node_id.clone()),
                &mut out,
            );
        }
        out
    }

    /// Run the emergency election directly (no removal context).
    pub fn select_current_leader(&mut self, height: u32) -> MachineOutput {
        let mut out = MachineOutput::default();
        let roster = self.roster.clone();
        let mut roster = roster.lock();
        self.select_current_leader_locked(&mut roster, height, None, &mut out);
        out
    }

    // ── Inbound role messages ───────────────────────────────────────────

    /// Handle a `NextLeader` notification from the sitting leader.
    pub fn on_next_leader(&mut self, msg: &NextLeaderMsg) -> Result<MachineOutput> {
        let out = MachineOutput::default();
        let roster = self.roster.clone();
        let mut roster = roster.lock();

        let payload = NextLeaderMsg::signing_payload(&msg.current_id, &msg.next_id);
        Self::verify(&roster, &msg.current_id, &payload, &msg.sig, "next-leader")?;

        roster.set_leader_elect(&msg.next_id);
        if msg.next_id == self.node_id {
            info!(
                "chosen as leader-elect, taking over at height {}",
                msg.start_height
            );
            self.policy = Some(LeaderPolicy::new(self.node_id.clone(), msg.start_height));
        }
        Ok(out)
    }

    /// Handle a `CurrentLeader` announcement.
    pub fn on_current_leader(&mut self, msg: &CurrentLeaderMsg) -> Result<MachineOutput> {
        let mut out = MachineOutput::default();
        let roster = self.roster.clone();
        let mut roster = roster.lock();

        let payload = CurrentLeaderMsg::signing_payload(
            &msg.dead_id,
            &msg.new_id,
            &msg.source_id,
            msg.height,
        );
        Self::verify(&roster, &msg.source_id, &payload, &msg.sig, "current-leader")?;

        roster.set_leader(&msg.new_id);
        if msg.new_id == self.node_id {
            out.arm_block_timer = true;
        }
        Ok(out)
    }

    fn verify(
        roster: &FederateRoster,
        node_id: &str,
        payload: &[u8],
        sig: &[u8],
        message: &'static str,
    ) -> Result<()> {
        let sender = roster
            .get(node_id)
            .ok_or_else(|| ConsensusError::UnknownFederate(node_id.to_string()))?;
        let key = sender
            .pub_key
            .ok_or_else(|| ConsensusError::MissingPublicKey(node_id.to_string()))?;
        let sig = Signature::from_slice(sig).map_err(|_| ConsensusError::SignatureInvalid {
            message,
            node_id: node_id.to_string(),
        })?;
        key.verify(payload, &sig).map_err(|_| ConsensusError::SignatureInvalid {
            message,
            node_id: node_id.to_string(),
        })
    }

    // ── Selection ───────────────────────────────────────────────────────

    /// Pick and announce the next leader. Only the sitting leader does
    /// this; everyone learns the choice from the broadcast.
    fn select_next_leader_locked(
        &mut self,
        roster: &mut FederateRoster,
        height: u32,
        out: &mut MachineOutput,
    ) {
        if !roster.is_leader(&self.node_id) {
            return;
        }

        let rotation: Vec<NodeId> = roster
            .non_candidates_by_leader_last()
            .iter()
            .map(|s| s.node_id.clone())
            .collect();

        // No eligible successor: extend our own term.
        if rotation.len() == 1 && rotation[0] == self.node_id {
            if let Some(policy) = self.policy.as_mut() {
                policy.start_db_height = height + LONE_LEADER_TERM_EXTENSION;
                info!(
                    "no eligible successor, extending own term to start {}",
                    policy.start_db_height
                );
            }
            return;
        }

        let Some(next) = rotation.into_iter().find(|id| *id != self.node_id) else {
            warn!("no qualified next leader found at height {height}");
            return;
        };
        let Some(policy) = self.policy.as_mut() else {
            warn!("leader without a policy while selecting a successor");
            return;
        };

        let start_height = policy.start_db_height + policy.term;
        let payload = NextLeaderMsg::signing_payload(&self.node_id, &next);
        let sig = self.signing_key.sign(&payload).to_bytes().to_vec();
        info!("next leader {next} takes over at height {start_height}");

        out.broadcasts.push(LeaderBroadcast::NextLeader(NextLeaderMsg {
            current_id: self.node_id.clone(),
            next_id: next.clone(),
            start_height,
            sig,
        }));
        policy.notified = true;
        policy.next_leader = next.clone();
        roster.set_leader_elect(&next);
    }

    /// Emergency election when the sitting leader disappeared.
    ///
    /// Precedence: leader-elect or the only remaining follower takes over;
    /// otherwise defer to a foreign leader-elect, then a foreign previous
    /// leader; a previous-leader self takes over; finally the longest
    /// tenure (earliest start time) wins.
    fn select_current_leader_locked(
        &mut self,
        roster: &mut FederateRoster,
        height: u32,
        dead_hint: Option<NodeId>,
        out: &mut MachineOutput,
    ) {
        if roster.is_leader(&self.node_id) {
            return;
        }

        let (non_candidates, candidates) = roster.split();
        let non_candidate_ids: Vec<NodeId> =
            non_candidates.iter().map(|s| s.node_id.clone()).collect();

        // Only candidates remain: their chains are not caught up, so no
        // one is promoted and the network stalls.
        if non_candidate_ids.is_empty() && !candidates.is_empty() {
            info!("only candidates remain, taking no action");
            return;
        }

        let dead = roster
            .leader()
            .map(|s| s.node_id.clone())
            .or(dead_hint)
            .unwrap_or_default();

        let only_follower = !roster.is_candidate(&self.node_id)
            && non_candidate_ids.len() == 1
            && non_candidate_ids[0] == self.node_id;

        if roster.is_leader_elect(&self.node_id) || only_follower {
            info!(
                "taking leadership (leader-elect={}, only-follower={only_follower})",
                roster.is_leader_elect(&self.node_id)
            );
            self.send_current_leader(roster, dead, height + 1, out);
            return;
        }

        // A leader-elect elsewhere will promote itself at its own height.
        if roster.leader_elect().is_some() {
            return;
        }

        if let Some(prev) = roster.prev_leader().map(|s| s.node_id.clone()) {
            if !roster.is_candidate(&self.node_id) && prev == self.node_id {
                info!("previous leader resuming leadership");
                self.send_current_leader(roster, prev, height + 1, out);
            }
            // A previous leader elsewhere takes over instead of us.
            return;
        }

        // Longest tenure wins. start_time differs per peer but each node
        // only acts when it believes itself the winner.
        let tenure: Vec<NodeId> =
            roster.non_candidates_by_start_time().iter().map(|s| s.node_id.clone()).collect();
        if tenure.first().map(String::as_str) == Some(self.node_id.as_str()) {
            info!("longest tenure, taking leadership");
            self.send_current_leader(roster, dead, height + 1, out);
        }
    }

    /// Become the leader and announce it.
    ///
    /// Our own role flips before the broadcast reaches peers, so the
    /// network may briefly observe two leaders. Documented behavior.
    fn send_current_leader(
        &mut self,
        roster: &mut FederateRoster,
        dead: NodeId,
        height: u32,
        out: &mut MachineOutput,
    ) {
        roster.set_leader(&self.node_id);
        self.policy = Some(LeaderPolicy::new(self.node_id.clone(), height));

        let payload =
            CurrentLeaderMsg::signing_payload(&dead, &self.node_id, &self.node_id, height);
        let sig = self.signing_key.sign(&payload).to_bytes().to_vec();
        out.broadcasts.push(LeaderBroadcast::CurrentLeader(CurrentLeaderMsg {
            dead_id: dead,
            new_id: self.node_id.clone(),
            source_id: self.node_id.clone(),
            height,
            sig,
        }));
        out.arm_block_timer = true;
        if self.leader_crashed {
            out.reset_leader_state = true;
            self.leader_crashed = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::policy::{DEFAULT_LEADER_TERM, DEFAULT_NOTIFY_DB_HEIGHT},
        ed25519_dalek::SigningKey,
        rand::rngs::OsRng,
    };

    struct Fixture {
        machine: LeaderMachine,
        roster: Arc<Mutex<FederateRoster>>,
        keys: Vec<(NodeId, SigningKey)>,
    }

    /// Build a machine for `self_id` over a roster of followers with
    /// distinct start times (insertion order = oldest first).
    fn fixture(self_id: &str, ids: &[&str]) -> Fixture {
        let roster = Arc::new(Mutex::new(FederateRoster::new()));
        let mut keys = Vec::new();
        {
            let mut guard = roster.lock();
            for (i, id) in ids.iter().enumerate() {
                let key = SigningKey::generate(&mut OsRng);
                let mut server = FederateServer::new(id.to_string(), 100 + i as i64, 0);
                server.state = NodeState::Follower;
                server.pub_key = Some(key.verifying_key());
                guard.add(server);
                keys.push((id.to_string(), key));
            }
        }
        let self_key = keys
            .iter()
            .find(|(id, _)| id == self_id)
            .map(|(_, k)| k.clone())
            .expect("self id must be in the roster");
        Fixture {
            machine: LeaderMachine::new(self_id.to_string(), self_key, roster.clone()),
            roster,
            keys,
        }
    }

    fn state_of(fx: &Fixture, id: &str) -> Option<NodeState> {
        fx.roster.lock().state_of(id)
    }

    #[test]
    fn test_round_robin_handoff() {
        // A leads with start=2, term=2, notify=1; B and C follow.
        let mut fx = fixture("a", &["a", "b", "c"]);
        {
            let mut roster = fx.roster.lock();
            roster.set_leader("a");
            roster.get_mut("a").unwrap().leader_last = 1;
        }
        fx.machine.install_policy(LeaderPolicy::new("a".into(), 2));
        assert_eq!(fx.machine.policy().unwrap().term, DEFAULT_LEADER_TERM);
        assert_eq!(fx.machine.policy().unwrap().notify_db_height, DEFAULT_NOTIFY_DB_HEIGHT);

        // h=2 is the notify height: the successor announcement goes out.
        let out = fx.machine.on_height_sealed(2);
        assert_eq!(out.broadcasts.len(), 1);
        let LeaderBroadcast::NextLeader(msg) = &out.broadcasts[0] else {
            panic!("expected a NextLeader broadcast");
        };
        assert_eq!(msg.current_id, "a");
        assert_eq!(msg.next_id, "b"); // lowest leader_last, not self
        assert_eq!(msg.start_height, 4); // start + term
        let key = &fx.keys.iter().find(|(id, _)| id == "a").unwrap().1;
        let payload = NextLeaderMsg::signing_payload("a", "b");
        key.verifying_key()
            .verify(&payload, &Signature::from_slice(&msg.sig).unwrap())
            .unwrap();
        assert!(fx.machine.policy().unwrap().notified);
        assert_eq!(state_of(&fx, "b"), Some(NodeState::LeaderElect));

        // h=3 is the handoff height: roles rotate, policy clears.
        let out = fx.machine.on_height_sealed(3);
        assert!(out.broadcasts.is_empty());
        assert_eq!(state_of(&fx, "a"), Some(NodeState::LeaderPrev));
        assert_eq!(state_of(&fx, "b"), Some(NodeState::Leader));
        assert!(fx.machine.policy().is_none());
        assert_eq!(fx.roster.lock().get("a").unwrap().leader_last, 3);
    }

    #[test]
    fn test_leader_elect_regime_change_broadcasts_current_leader() {
        // B is the scheduled leader-elect with start=4; A leads.
        let mut fx = fixture("b", &["a", "b"]);
        {
            let mut roster = fx.roster.lock();
            roster.set_leader("a");
            roster.set_leader_elect("b");
        }
        fx.machine.install_policy(LeaderPolicy::new("b".into(), 4));

        // Heights before start-1 do nothing.
        assert!(fx.machine.on_height_sealed(2).is_empty());

        let out = fx.machine.on_height_sealed(3);
        assert_eq!(out.broadcasts.len(), 1);
        let LeaderBroadcast::CurrentLeader(msg) = &out.broadcasts[0] else {
            panic!("expected a CurrentLeader broadcast");
        };
        assert_eq!(msg.dead_id, "a");
        assert_eq!(msg.new_id, "b");
        assert_eq!(msg.source_id, "b");
        assert_eq!(msg.height, 4);
        assert!(out.arm_block_timer);
        // The outgoing leader's rotation key was recorded.
        assert_eq!(fx.roster.lock().get("a").unwrap().leader_last, 3);
        assert_eq!(state_of(&fx, "b"), Some(NodeState::Leader));
        assert_eq!(fx.machine.policy().unwrap().start_db_height, 4);
    }

    #[test]
    fn test_leader_crash_promotes_leader_elect() {
        // Roster {A=leader, B=leader-elect, C=follower}; A disappears at
        // newest height 10.
        let mut fx = fixture("b", &["a", "b", "c"]);
        {
            let mut roster = fx.roster.lock();
            roster.set_leader("a");
            roster.set_leader_elect("b");
        }
        let removed = fx.roster.lock().remove("a").unwrap();
        let out = fx.machine.on_federate_removed(&removed, 10);

        assert_eq!(out.broadcasts.len(), 1);
        let LeaderBroadcast::CurrentLeader(msg) = &out.broadcasts[0] else {
            panic!("expected a CurrentLeader broadcast");
        };
        assert_eq!(msg.dead_id, "a");
        assert_eq!(msg.new_id, "b");
        assert_eq!(msg.source_id, "b");
        assert_eq!(msg.height, 11);
        assert!(out.reset_leader_state, "crash takeover must reset the processor");
        assert_eq!(state_of(&fx, "b"), Some(NodeState::Leader));
    }

    #[test]
    fn test_longest_tenure_wins_when_leader_and_elect_gone() {
        // D, E, F are plain followers (start times 100 < 101 < 102); no
        // leader, elect, or prev exists anywhere.
        let mut fx = fixture("d", &["d", "e", "f"]);
        let out = fx.machine.select_current_leader(20);

        assert_eq!(out.broadcasts.len(), 1);
        let LeaderBroadcast::CurrentLeader(msg) = &out.broadcasts[0] else {
            panic!("expected a CurrentLeader broadcast");
        };
        assert_eq!(msg.dead_id, "");
        assert_eq!(msg.new_id, "d");
        assert_eq!(msg.height, 21);
    }

    #[test]
    fn test_shorter_tenure_defers() {
        let mut fx = fixture("e", &["d", "e", "f"]);
        let out = fx.machine.select_current_leader(20);
        assert!(out.is_empty());
        assert_eq!(state_of(&fx, "e"), Some(NodeState::Follower));
    }

    #[test]
    fn test_candidate_never_becomes_leader() {
        // K joined as a candidate; the only non-candidate L crashes.
        let mut fx = fixture("k", &["l", "k"]);
        {
            let mut roster = fx.roster.lock();
            roster.set_leader("l");
            roster.get_mut("k").unwrap().state = NodeState::Candidate;
        }
        let removed = fx.roster.lock().remove("l").unwrap();
        let out = fx.machine.on_federate_removed(&removed, 15);
        assert!(out.is_empty(), "a candidate must not emit anything");
        assert_eq!(state_of(&fx, "k"), Some(NodeState::Candidate));
    }

    #[test]
    fn test_prev_leader_takes_over_when_no_elect() {
        let mut fx = fixture("p", &["p", "q"]);
        {
            let mut roster = fx.roster.lock();
            roster.set_prev_leader("p");
        }
        let out = fx.machine.select_current_leader(7);
        assert_eq!(out.broadcasts.len(), 1);
        let LeaderBroadcast::CurrentLeader(msg) = &out.broadcasts[0] else {
            panic!("expected a CurrentLeader broadcast");
        };
        assert_eq!(msg.new_id, "p");
        assert_eq!(msg.dead_id, "p"); // we were the prev leader on record
    }

    #[test]
    fn test_foreign_leader_elect_defers_election() {
        let mut fx = fixture("c", &["b", "c"]);
        fx.roster.lock().set_leader_elect("b");
        let out = fx.machine.select_current_leader(9);
        assert!(out.is_empty(), "the leader-elect promotes itself at its own height");
    }

    #[test]
    fn test_single_server_mode_slides_start_height() {
        let mut fx = fixture("a", &["a"]);
        fx.roster.lock().set_leader("a");
        fx.machine.install_policy(LeaderPolicy::new("a".into(), 5));
        let out = fx.machine.on_height_sealed(9);
        assert!(out.is_empty());
        assert_eq!(fx.machine.policy().unwrap().start_db_height, 10);
    }

    #[test]
    fn test_stale_height_ignored() {
        let mut fx = fixture("a", &["a", "b"]);
        fx.roster.lock().set_leader("a");
        fx.machine.install_policy(LeaderPolicy::new("a".into(), 2));
        // start + term = 4, so 5 is stale.
        let out = fx.machine.on_height_sealed(5);
        assert!(out.is_empty());
        assert!(fx.machine.policy().is_some());
    }

    #[test]
    fn test_lone_leader_extends_own_term() {
        // B is a candidate, so the rotation holds only the leader itself.
        let mut fx = fixture("a", &["a", "b"]);
        {
            let mut roster = fx.roster.lock();
            roster.set_leader("a");
            roster.get_mut("b").unwrap().state = NodeState::Candidate;
        }
        fx.machine.install_policy(LeaderPolicy::new("a".into(), 2));
        let out = fx.machine.on_height_sealed(2); // notify height
        assert!(out.is_empty());
        assert_eq!(fx.machine.policy().unwrap().start_db_height, 2 + 3);
    }

    #[test]
    fn test_on_next_leader_adopts_policy_and_roster_state() {
        let mut fx = fixture("b", &["a", "b"]);
        fx.roster.lock().set_leader("a");
        let leader_key = &fx.keys.iter().find(|(id, _)| id == "a").unwrap().1;
        let payload = NextLeaderMsg::signing_payload("a", "b");
        let msg = NextLeaderMsg {
            current_id: "a".into(),
            next_id: "b".into(),
            start_height: 12,
            sig: leader_key.sign(&payload).to_bytes().to_vec(),
        };

        fx.machine.on_next_leader(&msg).unwrap();
        assert_eq!(state_of(&fx, "b"), Some(NodeState::LeaderElect));
        assert_eq!(fx.machine.policy().unwrap().start_db_height, 12);
    }

    #[test]
    fn test_on_next_leader_rejects_bad_signature() {
        let mut fx = fixture("b", &["a", "b"]);
        let msg = NextLeaderMsg {
            current_id: "a".into(),
            next_id: "b".into(),
            start_height: 12,
            sig: vec![0u8; 64],
        };
        let err = fx.machine.on_next_leader(&msg).unwrap_err();
        assert!(matches!(err, ConsensusError::SignatureInvalid { .. }));
        assert!(fx.machine.policy().is_none());
    }

    #[test]
    fn test_on_current_leader_arms_timer_for_self() {
        let mut fx = fixture("b", &["a", "b"]);
        let source_key = &fx.keys.iter().find(|(id, _)| id == "a").unwrap().1;
        let payload = CurrentLeaderMsg::signing_payload("", "b", "a", 6);
        let msg = CurrentLeaderMsg {
            dead_id: "".into(),
            new_id: "b".into(),
            source_id: "a".into(),
            height: 6,
            sig: source_key.sign(&payload).to_bytes().to_vec(),
        };
        let out = fx.machine.on_current_leader(&msg).unwrap();
        assert!(out.arm_block_timer);
        assert_eq!(state_of(&fx, "b"), Some(NodeState::Leader));
    }

    #[test]
    fn test_role_invariant_over_height_history() {
        // Drive a full rotation and check the single-holder invariant at
        // every observable state.
        let mut fx = fixture("a", &["a", "b", "c"]);
        {
            let mut roster = fx.roster.lock();
            roster.set_leader("a");
            roster.get_mut("a").unwrap().leader_last = 1;
        }
        fx.machine.install_policy(LeaderPolicy::new("a".into(), 2));

        for h in 2..=6 {
            fx.machine.on_height_sealed(h);
            let roster = fx.roster.lock();
            for state in [NodeState::Leader, NodeState::LeaderElect, NodeState::LeaderPrev] {
                let holders = roster.iter().filter(|s| s.state == state).count();
                assert!(holders <= 1, "height {h}: {holders} holders of {state}");
            }
        }
    }
}
