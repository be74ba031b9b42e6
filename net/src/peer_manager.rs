//! The single-owner peer-set event loop.
//!
//! The peer manager task is the sole mutator of the peer set, the banned
//! map, and (together with the leader service, under the shared roster
//! lock) the federate roster. Every other component talks to it through
//! typed messages on its channels; queries carry a oneshot reply channel.
//! Because there is exactly one consumer, the events it observes are
//! totally ordered: a broadcast queued while handling event E reaches
//! every peer's send queue before event E+1 is handled.
//!
//! After each event the manager reconsiders outbound replenishment,
//! asking the address book for candidates subject to group-spreading and
//! recency rules, and re-arms a wakeup timer while it remains short.

use {
    crate::{
        address_book::{group_key, AddressBook},
        config::NetConfig,
        error::{NetError, Result},
        message::{InvType, InvVect, NodeKind, WireMessage},
        peer::{connect_outbound, Peer, PeerContext},
    },
    ed25519_dalek::VerifyingKey,
    fedchain_consensus::{FederateRoster, FederateServer, PeerId},
    log::{debug, info, trace, warn},
    parking_lot::Mutex,
    serde::Serialize,
    std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        time::{Duration, Instant},
    },
    tokio::sync::{mpsc, oneshot},
};

/// How long a freshly-attempted address is skipped by the dialer.
const RECENT_ATTEMPT_WINDOW: Duration = Duration::from_secs(10 * 60);
/// Skipped-candidate count after which recently-tried addresses are
/// accepted anyway.
const TRIES_BEFORE_RECENT_OK: usize = 30;
/// Skipped-candidate count after which non-default ports are accepted.
const TRIES_BEFORE_ANY_PORT: usize = 50;
/// Candidates to skip before giving up until the next wakeup.
const MAX_DIAL_TRIES: usize = 100;

/// An inventory vector plus the data it announces, for relay.
#[derive(Debug, Clone)]
pub struct RelayMsg {
    pub inv: InvVect,
    pub data: Vec<u8>,
}

/// A message to fan out to every connected peer except the exclusions.
#[derive(Debug, Clone)]
pub struct BroadcastMsg {
    pub message: WireMessage,
    pub exclude: Vec<PeerId>,
}

/// Peer statistics surfaced by the `peer_info` query.
#[derive(Debug, Clone, Serialize)]
pub struct PeerInfo {
    pub id: PeerId,
    pub node_id: String,
    pub node_type: String,
    pub addr: String,
    pub inbound: bool,
    pub services: u64,
    pub last_send: i64,
    pub last_recv: i64,
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub conn_time: i64,
    pub version: u32,
    pub user_agent: String,
    pub starting_height: u32,
    pub current_height: u32,
    pub ban_score: u32,
}

enum QueryMsg {
    ConnCount(oneshot::Sender<usize>),
    PeerInfo(oneshot::Sender<Vec<PeerInfo>>),
    AddedNodes(oneshot::Sender<Vec<String>>),
    ConnectNode { addr: String, permanent: bool, reply: oneshot::Sender<Result<()>> },
    DisconnectNodeByAddr { addr: String, reply: oneshot::Sender<Result<()>> },
    DisconnectNodeById { node_id: String, reply: oneshot::Sender<Result<()>> },
    RemoveNodeByAddr { addr: String, reply: oneshot::Sender<Result<()>> },
    RemoveNodeById { node_id: String, reply: oneshot::Sender<Result<()>> },
}

enum ManagerEvent {
    NewPeer(Arc<Peer>),
    DonePeer(PeerId),
    BanPeer(PeerId),
    DialFailed { addr: String, persistent: bool, retry_count: u32 },
    RelayInv(RelayMsg),
    Broadcast(BroadcastMsg),
    PeerHeights { sha: [u8; 32], height: u32, origin: PeerId },
    Query(QueryMsg),
    Wakeup,
    Quit,
}

/// Cheap, cloneable front door to the peer manager task.
#[derive(Clone)]
pub struct PeerManagerHandle {
    tx: mpsc::Sender<ManagerEvent>,
    shutdown: Arc<AtomicBool>,
}

impl PeerManagerHandle {
    pub(crate) fn new(tx: mpsc::Sender<ManagerEvent>, shutdown: Arc<AtomicBool>) -> Self {
        Self { tx, shutdown }
    }

    /// Whether the manager is (or is about to be) gone.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Offer a handshaken peer for admission. The peer is shut down if
    /// the manager refuses or is gone.
    pub async fn new_peer(&self, peer: Arc<Peer>) {
        if self.is_shutdown() {
            peer.shutdown();
            return;
        }
        if let Err(err) = self.tx.send(ManagerEvent::NewPeer(peer.clone())).await {
            if let ManagerEvent::NewPeer(peer) = err.0 {
                peer.shutdown();
            }
        }
    }

    /// Report a peer's connection as finished.
    pub async fn peer_done(&self, id: PeerId) {
        let _ = self.tx.send(ManagerEvent::DonePeer(id)).await;
    }

    /// Ban the host behind a connected peer. The peer's own loop
    /// terminates separately.
    pub async fn ban_peer(&self, id: PeerId) {
        let _ = self.tx.send(ManagerEvent::BanPeer(id)).await;
    }

    pub(crate) async fn dial_failed(&self, addr: String, persistent: bool, retry_count: u32) {
        let _ = self.tx.send(ManagerEvent::DialFailed { addr, persistent, retry_count }).await;
    }

    /// Relay an inventory vector to every connected peer not known to
    /// hold it (transaction inventory skips relay-disabled peers).
    pub async fn relay_inventory(&self, inv: InvVect, data: Vec<u8>) {
        let _ = self.tx.send(ManagerEvent::RelayInv(RelayMsg { inv, data })).await;
    }

    /// Fan a message out to all connected peers except `exclude`.
    pub async fn broadcast(&self, message: WireMessage, exclude: Vec<PeerId>) {
        let _ = self.tx.send(ManagerEvent::Broadcast(BroadcastMsg { message, exclude })).await;
    }

    /// Resolve pending block announcements matching `sha` to `height`.
    pub async fn update_peer_heights(&self, sha: [u8; 32], height: u32, origin: PeerId) {
        let _ = self.tx.send(ManagerEvent::PeerHeights { sha, height, origin }).await;
    }

    /// Nudge the outbound dialer.
    pub async fn wakeup(&self) {
        let _ = self.tx.send(ManagerEvent::Wakeup).await;
    }

    /// Stop the manager; every peer is signaled to shut down on exit.
    pub async fn quit(&self) {
        self.shutdown.store(true, Ordering::Release);
        let _ = self.tx.send(ManagerEvent::Quit).await;
    }

    async fn query<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> QueryMsg,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ManagerEvent::Query(make(reply_tx)))
            .await
            .map_err(|_| NetError::ChannelClosed)?;
        reply_rx.await.map_err(|_| NetError::ChannelClosed)
    }

    /// Number of currently connected peers.
    pub async fn connected_count(&self) -> Result<usize> {
        self.query(QueryMsg::ConnCount).await
    }

    /// Statistics for every connected peer.
    pub async fn peer_info(&self) -> Result<Vec<PeerInfo>> {
        self.query(QueryMsg::PeerInfo).await
    }

    /// Addresses of the persistent (added) peers.
    pub async fn added_nodes(&self) -> Result<Vec<String>> {
        self.query(QueryMsg::AddedNodes).await
    }

    /// Dial `addr` as a new outbound peer.
    pub async fn connect_node(&self, addr: String, permanent: bool) -> Result<()> {
        self.query(|reply| QueryMsg::ConnectNode { addr, permanent, reply }).await?
    }

    pub async fn disconnect_node_by_addr(&self, addr: String) -> Result<()> {
        self.query(|reply| QueryMsg::DisconnectNodeByAddr { addr, reply }).await?
    }

    pub async fn disconnect_node_by_id(&self, node_id: String) -> Result<()> {
        self.query(|reply| QueryMsg::DisconnectNodeById { node_id, reply }).await?
    }

    pub async fn remove_node_by_addr(&self, addr: String) -> Result<()> {
        self.query(|reply| QueryMsg::RemoveNodeByAddr { addr, reply }).await?
    }

    pub async fn remove_node_by_id(&self, node_id: String) -> Result<()> {
        self.query(|reply| QueryMsg::RemoveNodeById { node_id, reply }).await?
    }
}

/// The three disjoint peer maps plus ban and group bookkeeping.
#[derive(Default)]
struct PeerSet {
    inbound: HashMap<PeerId, Arc<Peer>>,
    outbound_transient: HashMap<PeerId, Arc<Peer>>,
    outbound_persistent: HashMap<PeerId, Arc<Peer>>,
    banned: HashMap<String, Instant>,
    outbound_groups: HashMap<String, usize>,
}

impl PeerSet {
    fn count(&self) -> usize {
        self.inbound.len() + self.outbound_transient.len() + self.outbound_persistent.len()
    }

    fn outbound_count(&self) -> usize {
        self.outbound_transient.len() + self.outbound_persistent.len()
    }

    fn all(&self) -> impl Iterator<Item = &Arc<Peer>> {
        self.inbound
            .values()
            .chain(self.outbound_transient.values())
            .chain(self.outbound_persistent.values())
    }

    fn get(&self, id: PeerId) -> Option<&Arc<Peer>> {
        self.inbound
            .get(&id)
            .or_else(|| self.outbound_transient.get(&id))
            .or_else(|| self.outbound_persistent.get(&id))
    }

    fn insert(&mut self, peer: Arc<Peer>) {
        if peer.inbound {
            self.inbound.insert(peer.id, peer);
        } else {
            *self.outbound_groups.entry(group_key(&peer.addr.ip())).or_default() += 1;
            if peer.persistent {
                self.outbound_persistent.insert(peer.id, peer);
            } else {
                self.outbound_transient.insert(peer.id, peer);
            }
        }
    }

    fn remove(&mut self, id: PeerId) -> Option<Arc<Peer>> {
        let peer = self
            .inbound
            .remove(&id)
            .or_else(|| self.outbound_transient.remove(&id))
            .or_else(|| self.outbound_persistent.remove(&id))?;
        if !peer.inbound {
            let key = group_key(&peer.addr.ip());
            if let Some(count) = self.outbound_groups.get_mut(&key) {
                *count = count.saturating_sub(1);
            }
        }
        Some(peer)
    }
}

/// The peer-manager task. Build with [`PeerManager::new`], then drive it
/// with [`PeerManager::run`].
pub struct PeerManager {
    config: NetConfig,
    events: mpsc::Receiver<ManagerEvent>,
    handle: PeerManagerHandle,
    address_book: AddressBook,
    roster: Arc<Mutex<FederateRoster>>,
    /// Removed federate servers go here for the leader service to run
    /// emergency elections over.
    federate_lost: mpsc::Sender<FederateServer>,
    peers: PeerSet,
    /// Outbound dials in flight, counted against the connection limits.
    pending_dials: usize,
    wakeup_armed: bool,
}

impl PeerManager {
    pub fn new(
        config: NetConfig,
        address_book: AddressBook,
        roster: Arc<Mutex<FederateRoster>>,
        federate_lost: mpsc::Sender<FederateServer>,
    ) -> (Self, PeerManagerHandle) {
        let (tx, rx) = mpsc::channel(config.channel_buffer_size.max(1));
        let handle = PeerManagerHandle::new(tx, Arc::new(AtomicBool::new(false)));
        let manager = Self {
            config,
            events: rx,
            handle: handle.clone(),
            address_book,
            roster,
            federate_lost,
            peers: PeerSet::default(),
            pending_dials: 0,
            wakeup_armed: false,
        };
        (manager, handle)
    }

    /// Run the event loop until `quit`. On exit every peer is signaled to
    /// shut down and the address book is persisted.
    pub async fn run(mut self, ctx: Arc<PeerContext>) {
        info!(
            "peer manager starting: max_peers={} max_outbound={}",
            self.config.max_peers, self.config.max_outbound
        );

        // Static peers first: an exclusive connect list if configured,
        // otherwise any added peers.
        let static_peers = if !self.config.connect_peers.is_empty() {
            self.config.connect_peers.clone()
        } else {
            self.config.add_peers.clone()
        };
        for addr in static_peers {
            self.pending_dials += 1;
            connect_outbound(ctx.clone(), addr, true, 0);
        }

        // If nothing else happens, wake us up soon.
        self.arm_wakeup();

        while let Some(event) = self.events.recv().await {
            if matches!(event, ManagerEvent::Quit) {
                break;
            }
            self.handle_event(event, &ctx);
            self.maybe_replenish(&ctx);
        }

        for peer in self.peers.all() {
            peer.shutdown();
        }
        self.address_book.save();
        // Drain so late senders are not left waiting on a full channel.
        while self.events.try_recv().is_ok() {}
        info!("peer manager done");
    }

    fn handle_event(&mut self, event: ManagerEvent, ctx: &Arc<PeerContext>) {
        match event {
            ManagerEvent::NewPeer(peer) => self.handle_add_peer(peer),
            ManagerEvent::DonePeer(id) => self.handle_done_peer(id, ctx),
            ManagerEvent::BanPeer(id) => self.handle_ban_peer(id),
            ManagerEvent::DialFailed { addr, persistent, retry_count } => {
                self.handle_dial_failed(addr, persistent, retry_count, ctx)
            }
            ManagerEvent::RelayInv(msg) => self.handle_relay_inv(msg),
            ManagerEvent::Broadcast(msg) => self.handle_broadcast(msg),
            ManagerEvent::PeerHeights { sha, height, origin } => {
                self.handle_peer_heights(sha, height, origin)
            }
            ManagerEvent::Query(query) => self.handle_query(query, ctx),
            ManagerEvent::Wakeup => self.wakeup_armed = false,
            ManagerEvent::Quit => unreachable!("quit handled by the loop"),
        }
    }

    fn handle_add_peer(&mut self, peer: Arc<Peer>) {
        if !peer.inbound {
            self.pending_dials = self.pending_dials.saturating_sub(1);
        }

        if self.handle.is_shutdown() {
            info!("new peer {} ignored: shutting down", peer.addr);
            peer.shutdown();
            return;
        }

        // A federate that duplicates an existing roster entry (by address
        // or node id) is rejected outright.
        if peer.kind == NodeKind::Federate
            && self.roster.lock().conflicts_with(Some(peer.addr), &peer.node_id)
        {
            info!("duplicate federate peer {} ({}), rejecting", peer.node_id, peer.addr);
            peer.shutdown();
            return;
        }

        let host = peer.addr.ip().to_string();
        if let Some(ban_end) = self.peers.banned.get(&host).copied() {
            if Instant::now() < ban_end {
                debug!("peer {host} is banned, disconnecting");
                peer.shutdown();
                return;
            }
            info!("peer {host} is no longer banned");
            self.peers.banned.remove(&host);
        }

        if self.peers.count() >= self.config.max_peers {
            info!("max peers reached [{}], disconnecting {}", self.config.max_peers, peer.addr);
            peer.shutdown();
            return;
        }

        debug!(
            "new {} peer {} ({}), total={}",
            if peer.inbound { "inbound" } else { "outbound" },
            peer.node_id,
            peer.addr,
            self.peers.count() + 1
        );

        if peer.kind == NodeKind::Federate {
            let mut fed = FederateServer::new(peer.node_id.clone(), peer.start_time, 0);
            fed.peer = Some(peer.id);
            fed.addr = Some(peer.addr);
            fed.pub_key = VerifyingKey::from_bytes(&peer.pub_key).ok();
            self.roster.lock().add(fed);
            info!("federate server {} joined as candidate", peer.node_id);
        }
        self.peers.insert(peer);
    }

    fn handle_done_peer(&mut self, id: PeerId, ctx: &Arc<PeerContext>) {
        let Some(peer) = self.peers.remove(id) else {
            trace!("done for unknown peer {id}");
            return;
        };
        debug!("removed peer {} ({})", peer.node_id, peer.addr);

        // Persistent outbound peers are reopened immediately.
        if !peer.inbound && peer.persistent && !self.handle.is_shutdown() {
            info!("reconnecting persistent peer {} (retry {})", peer.addr, peer.retry_count + 1);
            self.pending_dials += 1;
            connect_outbound(ctx.clone(), peer.addr.to_string(), true, peer.retry_count + 1);
        }

        if peer.kind == NodeKind::Federate {
            if let Some(fed) = self.roster.lock().remove(&peer.node_id) {
                info!("federate server {} removed ({})", fed.node_id, fed.state);
                if self.federate_lost.try_send(fed).is_err() {
                    warn!("leader service not consuming federate removals");
                }
            }
        }
    }

    fn handle_ban_peer(&mut self, id: PeerId) {
        let Some(peer) = self.peers.get(id) else {
            debug!("ban for unknown peer {id}");
            return;
        };
        let host = peer.addr.ip().to_string();
        info!("banned peer {host} for {:?}", self.config.ban_duration);
        self.peers.banned.insert(host, Instant::now() + self.config.ban_duration);
    }

    fn handle_dial_failed(
        &mut self,
        addr: String,
        persistent: bool,
        retry_count: u32,
        ctx: &Arc<PeerContext>,
    ) {
        self.pending_dials = self.pending_dials.saturating_sub(1);
        if persistent && !self.handle.is_shutdown() {
            let delay = self.config.retry_interval;
            let ctx = ctx.clone();
            self.pending_dials += 1;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                connect_outbound(ctx, addr, true, retry_count + 1);
            });
        }
    }

    fn handle_relay_inv(&mut self, msg: RelayMsg) {
        for peer in self.peers.all() {
            if !peer.connected() {
                continue;
            }
            // Transaction inventory respects the peer's relay opt-out.
            if msg.inv.inv_type == InvType::Tx && peer.relay_tx_disabled() {
                continue;
            }
            peer.queue_inventory(msg.inv);
        }
    }

    fn handle_broadcast(&mut self, msg: BroadcastMsg) {
        for peer in self.peers.all() {
            if msg.exclude.contains(&peer.id) || !peer.connected() {
                continue;
            }
            peer.queue_message(msg.message.clone());
        }
    }

    fn handle_peer_heights(&mut self, sha: [u8; 32], height: u32, origin: PeerId) {
        for peer in self.peers.all() {
            // The origin already has the updated height.
            if peer.id == origin {
                continue;
            }
            peer.resolve_announcement(&sha, height);
        }
    }

    fn handle_query(&mut self, query: QueryMsg, ctx: &Arc<PeerContext>) {
        match query {
            QueryMsg::ConnCount(reply) => {
                let connected = self.peers.all().filter(|p| p.connected()).count();
                let _ = reply.send(connected);
            }
            QueryMsg::PeerInfo(reply) => {
                let infos = self
                    .peers
                    .all()
                    .filter(|p| p.connected())
                    .map(|p| {
                        let stats = p.stats();
                        PeerInfo {
                            id: p.id,
                            node_id: p.node_id.clone(),
                            node_type: p.kind.to_string(),
                            addr: p.addr.to_string(),
                            inbound: p.inbound,
                            services: stats.services,
                            last_send: stats.last_send,
                            last_recv: stats.last_recv,
                            bytes_sent: stats.bytes_sent,
                            bytes_recv: stats.bytes_received,
                            conn_time: stats.time_connected,
                            version: stats.protocol_version,
                            user_agent: stats.user_agent,
                            starting_height: stats.starting_height,
                            current_height: stats.last_block,
                            ban_score: 0,
                        }
                    })
                    .collect();
                let _ = reply.send(infos);
            }
            QueryMsg::AddedNodes(reply) => {
                let addrs =
                    self.peers.outbound_persistent.values().map(|p| p.addr.to_string()).collect();
                let _ = reply.send(addrs);
            }
            QueryMsg::ConnectNode { addr, permanent, reply } => {
                let already =
                    self.peers.outbound_persistent.values().any(|p| p.addr.to_string() == addr);
                if already {
                    let _ = reply.send(Err(NetError::PeerDuplicate(addr)));
                    return;
                }
                self.pending_dials += 1;
                connect_outbound(ctx.clone(), addr, permanent, 0);
                let _ = reply.send(Ok(()));
            }
            QueryMsg::DisconnectNodeByAddr { addr, reply } => {
                let _ = reply.send(self.drop_matching(false, |p| p.addr.to_string() == addr, &addr));
            }
            QueryMsg::DisconnectNodeById { node_id, reply } => {
                let _ = reply.send(self.drop_matching(false, |p| p.node_id == node_id, &node_id));
            }
            QueryMsg::RemoveNodeByAddr { addr, reply } => {
                let _ = reply.send(self.drop_matching(true, |p| p.addr.to_string() == addr, &addr));
            }
            QueryMsg::RemoveNodeById { node_id, reply } => {
                let _ = reply.send(self.drop_matching(true, |p| p.node_id == node_id, &node_id));
            }
        }
    }

    /// Disconnect and drop every peer matching `pred`. `persistent`
    /// selects the persistent map (remove-node) versus the inbound and
    /// transient maps (disconnect-node).
    fn drop_matching(
        &mut self,
        persistent: bool,
        pred: impl Fn(&Peer) -> bool,
        target: &str,
    ) -> Result<()> {
        let ids: Vec<PeerId> = if persistent {
            self.peers.outbound_persistent.values().filter(|p| pred(p)).map(|p| p.id).collect()
        } else {
            self.peers
                .inbound
                .values()
                .chain(self.peers.outbound_transient.values())
                .filter(|p| pred(p))
                .map(|p| p.id)
                .collect()
        };
        if ids.is_empty() {
            return Err(NetError::PeerNotFound(target.to_string()));
        }
        for id in ids {
            if let Some(peer) = self.peers.remove(id) {
                peer.disconnect();
            }
        }
        Ok(())
    }

    fn need_more_outbound(&self) -> bool {
        self.peers.outbound_count() + self.pending_dials < self.config.max_outbound
            && self.peers.count() + self.pending_dials < self.config.max_peers
    }

    /// Ask the address book for outbound candidates until the limits are
    /// met or the candidates run dry.
    fn maybe_replenish(&mut self, ctx: &Arc<PeerContext>) {
        // The simulation network and an exclusive connect list both
        // suppress discovery-driven dialing.
        if self.handle.is_shutdown()
            || self.config.simnet
            || !self.config.connect_peers.is_empty()
            || !self.need_more_outbound()
        {
            return;
        }

        let mut tries = 0usize;
        while self.need_more_outbound() && !self.handle.is_shutdown() {
            let Some(candidate) = self.address_book.get_address() else {
                break;
            };

            // Spread outbound connections across network groups.
            let key = group_key(&candidate.addr.ip());
            if self.peers.outbound_groups.get(&key).copied().unwrap_or(0) != 0 {
                break;
            }

            tries += 1;
            if tries > MAX_DIAL_TRIES {
                break;
            }

            // Skip freshly-tried addresses until the burst has failed
            // enough times.
            if let Some(last) = candidate.last_attempt {
                if last.elapsed() < RECENT_ATTEMPT_WINDOW && tries < TRIES_BEFORE_RECENT_OK {
                    continue;
                }
            }

            // Non-default ports are a last resort.
            if candidate.addr.port() != self.config.default_port && tries < TRIES_BEFORE_ANY_PORT {
                continue;
            }

            self.address_book.mark_attempt(&candidate.addr);
            tries = 0;
            self.pending_dials += 1;
            connect_outbound(ctx.clone(), candidate.addr.to_string(), false, 0);
        }

        if self.need_more_outbound() {
            self.arm_wakeup();
        }
    }

    /// Schedule a wakeup after the retry interval, once.
    fn arm_wakeup(&mut self) {
        if self.wakeup_armed {
            return;
        }
        self.wakeup_armed = true;
        let handle = self.handle.clone();
        let delay = self.config.retry_interval;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            handle.wakeup().await;
        });
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            message::VersionInfo,
            peer::{ByteTotals, InboundMessage, PeerCommand},
        },
        fedchain_consensus::NodeState,
        tokio::sync::mpsc::Receiver,
    };

    struct Harness {
        handle: PeerManagerHandle,
        roster: Arc<Mutex<FederateRoster>>,
        federate_lost: Receiver<FederateServer>,
        ctx: Arc<PeerContext>,
        _inbound_rx: Receiver<InboundMessage>,
        next_id: PeerId,
    }

    impl Harness {
        fn new(config: NetConfig) -> Self {
            Self::new_named(config, "self")
        }

        fn new_named(config: NetConfig, node_id: &str) -> Self {
            let roster = Arc::new(Mutex::new(FederateRoster::new()));
            let (fed_tx, fed_rx) = mpsc::channel(8);
            let (manager, handle) =
                PeerManager::new(config.clone(), AddressBook::new(), roster.clone(), fed_tx);
            let (inbound_tx, inbound_rx) = mpsc::channel(8);
            let my_version = VersionInfo {
                node_id: node_id.into(),
                node_kind: NodeKind::Federate,
                pub_key: [0; 32],
                services: 1,
                protocol_version: 1,
                user_agent: "/test/".into(),
                start_time: 0,
                starting_height: 0,
                disable_relay_tx: false,
            };
            let ctx = Arc::new(PeerContext::new(
                config,
                handle.clone(),
                inbound_tx,
                Arc::new(ByteTotals::default()),
                my_version,
            ));
            tokio::spawn(manager.run(ctx.clone()));
            Self {
                handle,
                roster,
                federate_lost: fed_rx,
                ctx,
                _inbound_rx: inbound_rx,
                next_id: 1,
            }
        }

        /// Build a fake connected peer (no socket; we hold the command
        /// receiver to observe what the manager queues to it).
        fn make_peer(
            &mut self,
            node_id: &str,
            addr: &str,
            kind: NodeKind,
            disable_relay_tx: bool,
        ) -> (Arc<Peer>, Receiver<PeerCommand>) {
            let (tx, rx) = mpsc::channel(16);
            let version = VersionInfo {
                node_id: node_id.to_string(),
                node_kind: kind,
                pub_key: [0; 32],
                services: 1,
                protocol_version: 1,
                user_agent: "/test/".into(),
                start_time: 100,
                starting_height: 0,
                disable_relay_tx,
            };
            let id = self.next_id;
            self.next_id += 1;
            let peer =
                Arc::new(Peer::new(id, &version, addr.parse().unwrap(), true, false, 0, tx));
            peer.set_connected(true);
            (peer, rx)
        }

        /// Barrier: a query round-trip proves all prior events handled.
        async fn settle(&self) -> usize {
            self.handle.connected_count().await.unwrap()
        }
    }

    fn drain(rx: &mut Receiver<PeerCommand>) -> Vec<PeerCommand> {
        let mut out = Vec::new();
        while let Ok(cmd) = rx.try_recv() {
            out.push(cmd);
        }
        out
    }

    #[tokio::test]
    async fn test_capacity_limit_enforced() {
        let mut cfg = NetConfig::dev_default();
        cfg.max_peers = 2;
        let mut h = Harness::new(cfg);
        let (p1, _r1) = h.make_peer("n1", "10.0.0.1:9001", NodeKind::Client, false);
        let (p2, _r2) = h.make_peer("n2", "10.0.0.2:9001", NodeKind::Client, false);
        let (p3, mut r3) = h.make_peer("n3", "10.0.0.3:9001", NodeKind::Client, false);
        h.handle.new_peer(p1).await;
        h.handle.new_peer(p2).await;
        h.handle.new_peer(p3.clone()).await;
        assert_eq!(h.settle().await, 2);
        assert!(!p3.connected());
        assert!(drain(&mut r3).iter().any(|c| matches!(c, PeerCommand::Shutdown)));
    }

    #[tokio::test]
    async fn test_duplicate_federate_rejected() {
        let mut h = Harness::new(NetConfig::dev_default());
        let (p1, _r1) = h.make_peer("fed-1", "10.0.0.1:9001", NodeKind::Federate, false);
        // Same node id, different address.
        let (p2, mut r2) = h.make_peer("fed-1", "10.0.0.2:9001", NodeKind::Federate, false);
        h.handle.new_peer(p1).await;
        h.handle.new_peer(p2.clone()).await;
        assert_eq!(h.settle().await, 1);
        assert!(drain(&mut r2).iter().any(|c| matches!(c, PeerCommand::Shutdown)));
        assert_eq!(h.roster.lock().len(), 1);

        // Same address, different node id.
        let (p3, mut r3) = h.make_peer("fed-3", "10.0.0.1:9001", NodeKind::Federate, false);
        h.handle.new_peer(p3).await;
        assert_eq!(h.settle().await, 1);
        assert!(drain(&mut r3).iter().any(|c| matches!(c, PeerCommand::Shutdown)));
    }

    #[tokio::test]
    async fn test_federate_joins_roster_as_candidate() {
        let mut h = Harness::new(NetConfig::dev_default());
        let (p1, _r1) = h.make_peer("fed-1", "10.0.0.1:9001", NodeKind::Federate, false);
        h.handle.new_peer(p1).await;
        h.settle().await;
        let roster = h.roster.lock();
        let fed = roster.get("fed-1").unwrap();
        assert_eq!(fed.state, NodeState::Candidate);
        assert_eq!(fed.start_time, 100);
        assert!(fed.peer.is_some());
    }

    #[tokio::test]
    async fn test_done_federate_reports_removal() {
        let mut h = Harness::new(NetConfig::dev_default());
        let (p1, _r1) = h.make_peer("fed-1", "10.0.0.1:9001", NodeKind::Federate, false);
        let id = p1.id;
        h.handle.new_peer(p1).await;
        h.settle().await;
        h.handle.peer_done(id).await;
        assert_eq!(h.settle().await, 0);
        assert!(h.roster.lock().is_empty());
        let removed = h.federate_lost.try_recv().unwrap();
        assert_eq!(removed.node_id, "fed-1");
    }

    #[tokio::test]
    async fn test_banned_host_rejected_until_expiry() {
        let mut cfg = NetConfig::dev_default();
        cfg.ban_duration = Duration::from_secs(60);
        let mut h = Harness::new(cfg);
        let (p1, _r1) = h.make_peer("n1", "10.0.0.1:9001", NodeKind::Client, false);
        let id = p1.id;
        h.handle.new_peer(p1).await;
        h.settle().await;
        h.handle.ban_peer(id).await;
        h.handle.peer_done(id).await;
        h.settle().await;

        // Same host, new port: still banned.
        let (p2, mut r2) = h.make_peer("n2", "10.0.0.1:9002", NodeKind::Client, false);
        h.handle.new_peer(p2).await;
        assert_eq!(h.settle().await, 0);
        assert!(drain(&mut r2).iter().any(|c| matches!(c, PeerCommand::Shutdown)));

        // Different host is fine.
        let (p3, _r3) = h.make_peer("n3", "10.0.0.3:9001", NodeKind::Client, false);
        h.handle.new_peer(p3).await;
        assert_eq!(h.settle().await, 1);
    }

    #[tokio::test]
    async fn test_broadcast_excludes_and_skips_disconnected() {
        let mut h = Harness::new(NetConfig::dev_default());
        let (p1, mut r1) = h.make_peer("n1", "10.0.0.1:9001", NodeKind::Client, false);
        let (p2, mut r2) = h.make_peer("n2", "10.0.0.2:9001", NodeKind::Client, false);
        let (p3, mut r3) = h.make_peer("n3", "10.0.0.3:9001", NodeKind::Client, false);
        h.handle.new_peer(p1.clone()).await;
        h.handle.new_peer(p2.clone()).await;
        h.handle.new_peer(p3.clone()).await;
        h.settle().await;
        p3.set_connected(false);

        let msg = WireMessage::Heartbeat { node_id: "self".into(), latest_height: 1 };
        h.handle.broadcast(msg, vec![p1.id]).await;
        h.settle().await;

        assert!(drain(&mut r1).is_empty(), "excluded peer must not receive");
        assert_eq!(drain(&mut r2).len(), 1);
        assert!(drain(&mut r3).is_empty(), "disconnected peer must not receive");
    }

    #[tokio::test]
    async fn test_relay_inv_respects_tx_opt_out() {
        let mut h = Harness::new(NetConfig::dev_default());
        let (p1, mut r1) = h.make_peer("n1", "10.0.0.1:9001", NodeKind::Client, true);
        let (p2, mut r2) = h.make_peer("n2", "10.0.0.2:9001", NodeKind::Client, false);
        h.handle.new_peer(p1.clone()).await;
        h.handle.new_peer(p2.clone()).await;
        h.settle().await;

        let tx_inv = InvVect { inv_type: InvType::Tx, hash: [1; 32] };
        h.handle.relay_inventory(tx_inv, vec![]).await;
        h.settle().await;
        assert!(drain(&mut r1).is_empty(), "tx relay disabled");
        assert_eq!(drain(&mut r2).len(), 1);

        // Non-transaction inventory goes to everyone.
        let block_inv = InvVect { inv_type: InvType::Block, hash: [2; 32] };
        h.handle.relay_inventory(block_inv, vec![]).await;
        h.settle().await;
        assert_eq!(drain(&mut r1).len(), 1);
        assert_eq!(drain(&mut r2).len(), 1);
    }

    #[tokio::test]
    async fn test_relay_inv_skips_peers_that_know_it() {
        let mut h = Harness::new(NetConfig::dev_default());
        let (p1, mut r1) = h.make_peer("n1", "10.0.0.1:9001", NodeKind::Client, false);
        h.handle.new_peer(p1.clone()).await;
        h.settle().await;

        let inv = InvVect { inv_type: InvType::Block, hash: [3; 32] };
        h.handle.relay_inventory(inv, vec![]).await;
        h.handle.relay_inventory(inv, vec![]).await;
        h.settle().await;
        assert_eq!(drain(&mut r1).len(), 1, "second relay suppressed by known-inventory");
    }

    #[tokio::test]
    async fn test_peer_heights_update_matches_announcement() {
        let mut h = Harness::new(NetConfig::dev_default());
        let (p1, _r1) = h.make_peer("n1", "10.0.0.1:9001", NodeKind::Client, false);
        let (p2, _r2) = h.make_peer("n2", "10.0.0.2:9001", NodeKind::Client, false);
        h.handle.new_peer(p1.clone()).await;
        h.handle.new_peer(p2.clone()).await;
        h.settle().await;

        p1.set_announced_block([7; 32]);
        p2.set_announced_block([7; 32]);
        h.handle.update_peer_heights([7; 32], 41, p2.id).await;
        h.settle().await;

        assert_eq!(p1.stats().last_block, 41);
        assert!(p1.stats().last_announced_block.is_none());
        // Origin peer untouched.
        assert!(p2.stats().last_announced_block.is_some());
    }

    #[tokio::test]
    async fn test_disconnect_node_by_addr() {
        let mut h = Harness::new(NetConfig::dev_default());
        let (p1, _r1) = h.make_peer("n1", "10.0.0.1:9001", NodeKind::Client, false);
        h.handle.new_peer(p1.clone()).await;
        h.settle().await;

        h.handle.disconnect_node_by_addr("10.0.0.1:9001".into()).await.unwrap();
        assert_eq!(h.settle().await, 0);
        assert!(!p1.connected());

        let err = h.handle.disconnect_node_by_addr("10.9.9.9:9001".into()).await.unwrap_err();
        assert!(matches!(err, NetError::PeerNotFound(_)));
    }

    /// Two managers over real sockets: handshake registers each side's
    /// peer (and roster entry), and a broadcast height propagates.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_tcp_handshake_and_heartbeat_end_to_end() {
        let mut cfg_a = NetConfig::dev_default();
        cfg_a.node_id = "alpha".into();
        let h_a = Harness::new_named(cfg_a, "alpha");
        let mut cfg_b = NetConfig::dev_default();
        cfg_b.node_id = "beta".into();
        let h_b = Harness::new_named(cfg_b, "beta");

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(crate::peer::serve_inbound(listener, h_a.ctx.clone()));

        h_b.handle.connect_node(addr.to_string(), false).await.unwrap();

        for _ in 0..200 {
            if h_a.settle().await == 1 && h_b.settle().await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(h_a.settle().await, 1, "listener side should admit the peer");
        assert_eq!(h_b.settle().await, 1, "dialer side should admit the peer");
        assert!(h_a.roster.lock().get("beta").is_some(), "beta joins alpha's roster");
        assert!(h_b.roster.lock().get("alpha").is_some(), "alpha joins beta's roster");

        let heartbeat = WireMessage::Heartbeat { node_id: "alpha".into(), latest_height: 77 };
        h_a.handle.broadcast(heartbeat, Vec::new()).await;

        let mut seen = false;
        for _ in 0..200 {
            let infos = h_b.handle.peer_info().await.unwrap();
            if infos.iter().any(|info| info.current_height == 77) {
                seen = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(seen, "broadcast heartbeat height should reach the dialer's stats");
    }

    #[tokio::test]
    async fn test_quit_shuts_down_all_peers() {
        let mut h = Harness::new(NetConfig::dev_default());
        let (p1, mut r1) = h.make_peer("n1", "10.0.0.1:9001", NodeKind::Client, false);
        h.handle.new_peer(p1.clone()).await;
        h.settle().await;
        h.handle.quit().await;
        // The loop exits and signals every peer.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!p1.connected());
        assert!(drain(&mut r1).iter().any(|c| matches!(c, PeerCommand::Shutdown)));
        let _ = &h.ctx;
    }
}
