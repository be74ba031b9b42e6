//! Node construction, startup, and shutdown.
//!
//! `Node::new` wires every component; `start` spawns the long-lived
//! tasks (peer manager, leader service, processor, rebroadcast, one
//! listener per bound address, the admin surface) and registers them so
//! shutdown is observable. `started`, `shutting_down`, and
//! `shutdown_sched` are one-shot gates.

use {
    crate::{
        error::{CoreError, Result},
        leader_service::{LeaderEvent, LeaderService},
        processor::Processor,
        shutdown::dynamic_tick_duration,
    },
    ed25519_dalek::SigningKey,
    fedchain_admin::{serve as serve_admin, BlockStore},
    fedchain_consensus::{
        FederateRoster, FederateServer, LeaderMachine, LeaderPolicy, NodeState, ProcessorHooks,
    },
    fedchain_net::{
        peer::serve_inbound, AddressBook, ByteTotals, InboundMessage, NetConfig, NodeKind, Peer,
        PeerContext, PeerManager, PeerManagerHandle, RebroadcastHandle, RebroadcastQueue,
        VersionInfo, WireMessage,
    },
    log::{debug, info, warn},
    parking_lot::Mutex,
    rand::RngCore,
    std::{
        net::SocketAddr,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        time::Duration,
    },
    tokio::{net::TcpListener, sync::mpsc, task::JoinHandle},
};

/// How long to wait for a task to drain before aborting it.
const TASK_DRAIN_TIMEOUT: Duration = Duration::from_secs(3);

/// Top-level node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub net: NetConfig,
    /// Address of the RESTful admin surface.
    pub admin_addr: SocketAddr,
    /// Cadence of directory-block sealing while leader.
    pub block_interval: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            net: NetConfig::default(),
            admin_addr: "0.0.0.0:8083".parse().expect("valid default admin addr"),
            block_interval: Duration::from_secs(10),
        }
    }
}

impl NodeConfig {
    /// Loopback everything, fast timers.
    pub fn dev_default() -> Self {
        Self {
            net: NetConfig::dev_default(),
            admin_addr: "127.0.0.1:0".parse().expect("valid dev admin addr"),
            block_interval: Duration::from_millis(50),
        }
    }
}

/// Components built by `new` and consumed by `start`.
struct Startup {
    peer_manager: PeerManager,
    ctx: Arc<PeerContext>,
    leader_service: LeaderService,
    rebroadcast_queue: RebroadcastQueue,
    federate_lost_rx: mpsc::Receiver<FederateServer>,
    inbound_rx: mpsc::Receiver<InboundMessage>,
    leader_tx: mpsc::Sender<LeaderEvent>,
}

/// A running (or runnable) federate node.
pub struct Node {
    config: NodeConfig,
    node_id: String,
    manager: PeerManagerHandle,
    rebroadcast: RebroadcastHandle,
    store: Arc<BlockStore>,
    processor: Arc<Processor>,
    byte_totals: Arc<ByteTotals>,
    roster: Arc<Mutex<FederateRoster>>,
    started: AtomicBool,
    shutting_down: Arc<AtomicBool>,
    shutdown_sched: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    startup: Mutex<Option<Startup>>,
}

impl Node {
    pub fn new(mut config: NodeConfig) -> Result<Self> {
        let node_id = effective_node_id(&config.net);
        config.net.node_id = node_id.clone();
        let signing_key = load_signing_key(&config.net.server_priv_key)?;
        let verifying_key = signing_key.verifying_key();

        let store = Arc::new(BlockStore::bootstrap());
        let newest = store.newest_sealed_height() as u32;
        let start_time = unix_now();
        let roster = Arc::new(Mutex::new(FederateRoster::new()));

        // Server-mode nodes carry their own roster entry from the start.
        if config.net.node_mode == NodeKind::Federate {
            let mut me = FederateServer::new(node_id.clone(), start_time, newest);
            me.pub_key = Some(verifying_key);
            if config.net.init_leader {
                me.state = NodeState::Leader;
                me.leader_last = newest + 1;
                info!("booting as the network's initial leader");
            }
            roster.lock().add(me);
        }

        let byte_totals = Arc::new(ByteTotals::default());
        let (federate_lost_tx, federate_lost_rx) = mpsc::channel(16);
        let (inbound_tx, inbound_rx) = mpsc::channel(config.net.channel_buffer_size.max(1));
        let (leader_tx, leader_rx) = mpsc::channel(64);

        let address_book = AddressBook::open(&config.net.data_dir);
        let (peer_manager, manager) =
            PeerManager::new(config.net.clone(), address_book, roster.clone(), federate_lost_tx);

        let my_version = VersionInfo {
            node_id: node_id.clone(),
            node_kind: config.net.node_mode,
            pub_key: verifying_key.to_bytes(),
            services: config.net.services,
            protocol_version: config.net.protocol_version,
            user_agent: config.net.user_agent.clone(),
            start_time,
            starting_height: newest,
            disable_relay_tx: false,
        };
        let ctx = Arc::new(PeerContext::new(
            config.net.clone(),
            manager.clone(),
            inbound_tx,
            byte_totals.clone(),
            my_version,
        ));

        let shutting_down = Arc::new(AtomicBool::new(false));
        let processor =
            Processor::new(store.clone(), leader_tx.clone(), config.block_interval, shutting_down.clone());

        let mut machine = LeaderMachine::new(node_id.clone(), signing_key, roster.clone());
        if config.net.init_leader {
            // Give the network a little time to settle before rotating.
            machine.install_policy(LeaderPolicy::new(node_id.clone(), newest + 2));
            processor.start_block_timer();
        }
        let hooks: Arc<dyn ProcessorHooks> = processor.clone();
        let leader_service = LeaderService::new(machine, leader_rx, manager.clone(), hooks);

        let (rebroadcast_queue, rebroadcast) = RebroadcastQueue::new(
            manager.clone(),
            config.net.rebroadcast_initial_delay,
            config.net.rebroadcast_max_interval_secs,
        );

        Ok(Self {
            config,
            node_id,
            manager,
            rebroadcast,
            store,
            processor,
            byte_totals,
            roster,
            started: AtomicBool::new(false),
            shutting_down,
            shutdown_sched: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
            startup: Mutex::new(Some(Startup {
                peer_manager,
                ctx,
                leader_service,
                rebroadcast_queue,
                federate_lost_rx,
                inbound_rx,
                leader_tx,
            })),
        })
    }

    /// Spawn every long-lived task: listeners, the peer manager, the
    /// leader service, the processor, rebroadcast, and the admin surface.
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(CoreError::AlreadyStarted);
        }
        let Some(startup) = self.startup.lock().take() else {
            return Err(CoreError::AlreadyStarted);
        };
        let Startup {
            peer_manager,
            ctx,
            leader_service,
            rebroadcast_queue,
            mut federate_lost_rx,
            mut inbound_rx,
            leader_tx,
        } = startup;

        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(peer_manager.run(ctx.clone())));
        tasks.push(tokio::spawn(leader_service.run()));
        tasks.push(tokio::spawn(rebroadcast_queue.run()));
        tasks.push(tokio::spawn(self.processor.clone().run()));

        // Federate removals feed the emergency-election path.
        {
            let leader_tx = leader_tx.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(removed) = federate_lost_rx.recv().await {
                    if leader_tx.send(LeaderEvent::FederateLost(removed)).await.is_err() {
                        break;
                    }
                }
            }));
        }

        // Inbound role-change traffic feeds the leader machine; opaque
        // payloads are the codec layer's concern and are dropped here.
        tasks.push(tokio::spawn(async move {
            while let Some(inbound) = inbound_rx.recv().await {
                match inbound.message {
                    WireMessage::NextLeader(_) | WireMessage::CurrentLeader(_) => {
                        let event = LeaderEvent::Inbound {
                            node_id: inbound.node_id,
                            message: inbound.message,
                        };
                        if leader_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    other => debug!("dropping {} from {}", other.kind(), inbound.node_id),
                }
            }
        }));

        for addr in self.config.net.listen_addrs.clone() {
            let listener = TcpListener::bind(addr).await?;
            info!("listening on {} (max peers {})", listener.local_addr()?, self.config.net.max_peers);
            tasks.push(tokio::spawn(serve_inbound(listener, ctx.clone())));
        }

        {
            let store = self.store.clone();
            let admin_addr = self.config.admin_addr;
            tasks.push(tokio::spawn(async move {
                if let Err(err) = serve_admin(admin_addr, store).await {
                    warn!("admin surface failed: {err}");
                }
            }));
        }

        self.tasks.lock().extend(tasks);
        Ok(())
    }

    /// Stop the node: refuse new work, then tell every task to wind
    /// down. Idempotent.
    pub async fn stop(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            info!("server is already in the process of shutting down");
            return;
        }
        warn!("server shutting down");
        self.rebroadcast.quit().await;
        self.manager.quit().await;
    }

    /// Block until every registered task has drained (or been aborted
    /// after a grace period).
    pub async fn wait_for_shutdown(&self) {
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for mut task in tasks {
            if tokio::time::timeout(TASK_DRAIN_TIMEOUT, &mut task).await.is_err() {
                task.abort();
            }
        }
    }

    /// Schedule a shutdown after `duration`, warning on a dynamically
    /// shortening tick.
    pub fn schedule_shutdown(self: &Arc<Self>, duration: Duration) {
        if self.shutdown_sched.swap(true, Ordering::AcqRel) {
            return;
        }
        warn!("server shutdown in {duration:?}");
        let node = self.clone();
        tokio::spawn(async move {
            let mut remaining = duration;
            loop {
                let tick = dynamic_tick_duration(remaining);
                let step = tick.min(remaining);
                tokio::time::sleep(step).await;
                remaining = remaining.saturating_sub(step);
                if remaining.is_zero() {
                    node.stop().await;
                    break;
                }
                warn!("server shutdown in {remaining:?}");
            }
        });
    }

    // ── Accessors ───────────────────────────────────────────────────────

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn manager(&self) -> &PeerManagerHandle {
        &self.manager
    }

    pub fn rebroadcast(&self) -> &RebroadcastHandle {
        &self.rebroadcast
    }

    pub fn store(&self) -> &Arc<BlockStore> {
        &self.store
    }

    pub fn processor(&self) -> &Arc<Processor> {
        &self.processor
    }

    pub fn roster(&self) -> &Arc<Mutex<FederateRoster>> {
        &self.roster
    }

    /// `(bytes_sent, bytes_received)` across all peers since start.
    pub fn net_totals(&self) -> (u64, u64) {
        self.byte_totals.totals()
    }

    /// Offer an already-established peer to the manager (testing and
    /// embedding hook).
    pub async fn add_peer(&self, peer: Arc<Peer>) {
        self.manager.new_peer(peer).await;
    }
}

fn effective_node_id(net: &NetConfig) -> String {
    if !net.node_id.is_empty() {
        return net.node_id.clone();
    }
    let mut raw = [0u8; 4];
    rand::rngs::OsRng.fill_bytes(&mut raw);
    let generated = format!("node-{}", hex::encode(raw));
    info!("no node id configured, using {generated}");
    generated
}

fn load_signing_key(hex_key: &str) -> Result<SigningKey> {
    if hex_key.is_empty() {
        info!("no server key configured, generating an ephemeral one");
        return Ok(SigningKey::generate(&mut rand::rngs::OsRng));
    }
    let raw = hex::decode(hex_key)
        .map_err(|err| CoreError::BadPrivateKey(err.to_string()))?;
    let bytes: [u8; 32] = raw
        .as_slice()
        .try_into()
        .map_err(|_| CoreError::BadPrivateKey(format!("expected 32 bytes, got {}", raw.len())))?;
    Ok(SigningKey::from_bytes(&bytes))
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_signing_key_roundtrip() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let loaded = load_signing_key(&hex::encode(key.to_bytes())).unwrap();
        assert_eq!(loaded.to_bytes(), key.to_bytes());
    }

    #[test]
    fn test_load_signing_key_rejects_garbage() {
        assert!(matches!(load_signing_key("zz"), Err(CoreError::BadPrivateKey(_))));
        assert!(matches!(load_signing_key("aabb"), Err(CoreError::BadPrivateKey(_))));
    }

    #[test]
    fn test_init_leader_seeds_roster_and_timer() {
        let mut config = NodeConfig::dev_default();
        config.net.init_leader = true;
        config.net.node_id = "boot".into();
        let node = Node::new(config).unwrap();
        let roster = node.roster().lock();
        let me = roster.get("boot").unwrap();
        assert_eq!(me.state, NodeState::Leader);
        assert_eq!(me.leader_last, 1); // newest sealed (0) + 1
    }

    #[test]
    fn test_client_mode_has_no_roster_entry() {
        let mut config = NodeConfig::dev_default();
        config.net.node_mode = NodeKind::Client;
        config.net.node_id = "watcher".into();
        let node = Node::new(config).unwrap();
        assert!(node.roster().lock().is_empty());
    }

    #[test]
    fn test_generated_node_id_is_stable_for_instance() {
        let config = NodeConfig { net: NetConfig { node_id: String::new(), ..NetConfig::dev_default() }, ..NodeConfig::dev_default() };
        let node = Node::new(config).unwrap();
        assert!(node.node_id().starts_with("node-"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_stop_cycle() {
        let mut config = NodeConfig::dev_default();
        config.net.node_id = "cycle".into();
        let node = Arc::new(Node::new(config).unwrap());
        node.start().await.unwrap();
        assert!(matches!(node.start().await, Err(CoreError::AlreadyStarted)));

        // The manager answers queries while running.
        assert_eq!(node.manager().connected_count().await.unwrap(), 0);

        node.stop().await;
        node.stop().await; // idempotent
        node.wait_for_shutdown().await;
    }
}
