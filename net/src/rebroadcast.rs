//! Re-announcement of inventory that has not yet made it into a block.
//!
//! User-submitted inventory is rebroadcast at random intervals until the
//! owner deletes it (normally when it shows up in a block), in case peers
//! restarted or otherwise lost track of it. The first pass waits a fixed
//! initial delay; each later pass is scheduled a bias-free random number
//! of seconds out.

use {
    crate::{message::InvVect, peer_manager::PeerManagerHandle},
    log::{debug, trace},
    rand::RngCore,
    std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        time::Duration,
    },
    tokio::sync::mpsc,
};

enum RebroadcastEvent {
    Add(InvVect, Vec<u8>),
    Del(InvVect),
    Quit,
}

/// Front door to the rebroadcast task. Mutations are dropped once the
/// node is shutting down.
#[derive(Clone)]
pub struct RebroadcastHandle {
    tx: mpsc::Sender<RebroadcastEvent>,
    shutdown: Arc<AtomicBool>,
}

impl RebroadcastHandle {
    /// Add `inv` to the rebroadcast set until it shows up in a block.
    pub async fn add_inventory(&self, inv: InvVect, data: Vec<u8>) {
        if self.shutdown.load(Ordering::Acquire) {
            return;
        }
        let _ = self.tx.send(RebroadcastEvent::Add(inv, data)).await;
    }

    /// Remove `inv` from the rebroadcast set if present.
    pub async fn del_inventory(&self, inv: InvVect) {
        if self.shutdown.load(Ordering::Acquire) {
            return;
        }
        let _ = self.tx.send(RebroadcastEvent::Del(inv)).await;
    }

    /// Stop the rebroadcast task.
    pub async fn quit(&self) {
        self.shutdown.store(true, Ordering::Release);
        let _ = self.tx.send(RebroadcastEvent::Quit).await;
    }
}

/// The rebroadcast task. Owns the pending map; nothing else sees it.
pub struct RebroadcastQueue {
    events: mpsc::Receiver<RebroadcastEvent>,
    manager: PeerManagerHandle,
    initial_delay: Duration,
    max_interval_secs: u16,
}

impl RebroadcastQueue {
    pub fn new(
        manager: PeerManagerHandle,
        initial_delay: Duration,
        max_interval_secs: u16,
    ) -> (Self, RebroadcastHandle) {
        let (tx, rx) = mpsc::channel(16);
        let handle = RebroadcastHandle { tx, shutdown: Arc::new(AtomicBool::new(false)) };
        let queue = Self { events: rx, manager, initial_delay, max_interval_secs };
        (queue, handle)
    }

    pub async fn run(mut self) {
        let mut pending: HashMap<InvVect, Vec<u8>> = HashMap::new();
        let timer = tokio::time::sleep(self.initial_delay);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(RebroadcastEvent::Add(inv, data)) => {
                        trace!("rebroadcast add {:?}", inv.inv_type);
                        pending.insert(inv, data);
                    }
                    Some(RebroadcastEvent::Del(inv)) => {
                        trace!("rebroadcast del {:?}", inv.inv_type);
                        pending.remove(&inv);
                    }
                    Some(RebroadcastEvent::Quit) | None => break,
                },
                _ = &mut timer => {
                    // Anything still pending has not made it into a
                    // block; resubmit it all.
                    for (inv, data) in &pending {
                        self.manager.relay_inventory(*inv, data.clone()).await;
                    }
                    let secs = random_uint16(self.max_interval_secs).max(1);
                    timer.as_mut().reset(
                        tokio::time::Instant::now() + Duration::from_secs(u64::from(secs)),
                    );
                }
            }
        }
        // Drain so late senders are not left waiting around to send.
        while self.events.try_recv().is_ok() {}
        debug!("rebroadcast task done");
    }
}

/// A uniform random number in `[0, max)`, free of modulo bias: 16-bit
/// samples at or above the largest multiple of `max` are rejected before
/// taking the remainder.
pub fn random_uint16(max: u16) -> u16 {
    assert!(max > 0, "max must be positive");
    let bound = (65_536u32 / u32::from(max)) * u32::from(max);
    let mut rng = rand::rngs::OsRng;
    loop {
        let mut bytes = [0u8; 2];
        rng.fill_bytes(&mut bytes);
        let sample = u32::from(u16::from_le_bytes(bytes));
        if sample < bound {
            return (sample % u32::from(max)) as u16;
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            address_book::AddressBook,
            config::NetConfig,
            message::{InvType, NodeKind, VersionInfo, WireMessage},
            peer::{ByteTotals, Peer, PeerCommand, PeerContext},
            peer_manager::PeerManager,
        },
        fedchain_consensus::FederateRoster,
        parking_lot::Mutex,
        tokio::sync::mpsc::Receiver,
    };

    #[test]
    fn test_random_uint16_stays_in_range() {
        for max in [1u16, 2, 3, 5, 7, 100, 1800] {
            for _ in 0..1000 {
                assert!(random_uint16(max) < max);
            }
        }
    }

    #[test]
    fn test_random_uint16_is_uniform() {
        // Empirical distribution over many draws stays within one
        // percentage point of uniform for every bucket.
        for max in [2u16, 3, 5, 7, 100, 1800] {
            let draws = 1_000_000usize;
            let mut counts = vec![0u32; usize::from(max)];
            for _ in 0..draws {
                counts[usize::from(random_uint16(max))] += 1;
            }
            let uniform = 1.0 / f64::from(max);
            for (value, count) in counts.iter().enumerate() {
                let freq = f64::from(*count) / draws as f64;
                assert!(
                    (freq - uniform).abs() < 0.01,
                    "max={max} value={value} freq={freq} uniform={uniform}"
                );
            }
        }
    }

    #[test]
    fn test_random_uint16_covers_all_values_for_small_max() {
        let mut seen = [false; 5];
        for _ in 0..10_000 {
            seen[usize::from(random_uint16(5))] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    /// End-to-end: add → first tick relays, delete → next tick is quiet.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_rebroadcast_tick_relays_then_delete_silences() {
        let config = NetConfig::dev_default();
        let roster = Arc::new(Mutex::new(FederateRoster::new()));
        let (fed_tx, _fed_rx) = mpsc::channel(4);
        let (manager, handle) =
            PeerManager::new(config.clone(), AddressBook::new(), roster, fed_tx);
        let (inbound_tx, _inbound_rx) = mpsc::channel(4);
        let my_version = VersionInfo {
            node_id: "self".into(),
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
        tokio::spawn(manager.run(ctx));

        // One observable peer.
        let (peer_tx, mut peer_rx): (_, Receiver<PeerCommand>) = mpsc::channel(16);
        let version = VersionInfo {
            node_id: "n1".into(),
            node_kind: NodeKind::Client,
            pub_key: [0; 32],
            services: 1,
            protocol_version: 1,
            user_agent: "/test/".into(),
            start_time: 0,
            starting_height: 0,
            disable_relay_tx: false,
        };
        let peer =
            Arc::new(Peer::new(1, &version, "10.0.0.1:9001".parse().unwrap(), true, false, 0, peer_tx));
        peer.set_connected(true);
        handle.new_peer(peer.clone()).await;
        handle.connected_count().await.unwrap();

        // Fast timers: first pass after 20ms, then every second.
        let (queue, rebroadcast) =
            RebroadcastQueue::new(handle.clone(), Duration::from_millis(20), 1);
        tokio::spawn(queue.run());

        let inv = InvVect { inv_type: InvType::Tx, hash: [0xAA; 32] };
        rebroadcast.add_inventory(inv, vec![1, 2, 3]).await;

        // First tick must relay the pending inventory to the peer.
        let cmd = tokio::time::timeout(Duration::from_secs(3), peer_rx.recv())
            .await
            .expect("timed out waiting for rebroadcast")
            .expect("peer channel closed");
        match cmd {
            PeerCommand::Message(WireMessage::Inv(invs)) => assert_eq!(invs, vec![inv]),
            other => panic!("expected inventory, got {other:?}"),
        }

        // Delete it; later ticks must stay quiet (the peer's known-inv
        // set would suppress a repeat anyway, so check via a fresh peer).
        rebroadcast.del_inventory(inv).await;
        let (peer2_tx, mut peer2_rx) = mpsc::channel(16);
        let peer2 = Arc::new(Peer::new(
            2,
            &version,
            "10.0.0.2:9001".parse().unwrap(),
            true,
            false,
            0,
            peer2_tx,
        ));
        peer2.set_connected(true);
        handle.new_peer(peer2).await;
        handle.connected_count().await.unwrap();

        let quiet = tokio::time::timeout(Duration::from_millis(2500), peer2_rx.recv()).await;
        assert!(quiet.is_err(), "deleted inventory must not be rebroadcast");

        rebroadcast.quit().await;
    }
}
