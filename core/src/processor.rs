//! The block processor: seals directory blocks on a timer while this
//! node is the leader, and feeds each sealed height to the leader
//! service.
//!
//! Implements [`ProcessorHooks`], the narrow capability the leader
//! machine drives: the timer is armed when this node takes the
//! leadership, disarmed when its term rotates away, and re-armed by
//! `reset_leader_state` after an emergency takeover.

use {
    crate::leader_service::LeaderEvent,
    fedchain_admin::BlockStore,
    fedchain_consensus::ProcessorHooks,
    log::{debug, info},
    std::{
        sync::{
            atomic::{AtomicBool, AtomicU32, Ordering},
            Arc,
        },
        time::Duration,
    },
    tokio::sync::mpsc,
};

/// Seals blocks and caches the newest sealed height.
pub struct Processor {
    store: Arc<BlockStore>,
    /// The `FetchBlockHeightCache` analogue: newest sealed height.
    latest_height: AtomicU32,
    /// Whether the sealing timer is live (only the leader seals).
    timer_armed: AtomicBool,
    block_interval: Duration,
    events: mpsc::Sender<LeaderEvent>,
    shutdown: Arc<AtomicBool>,
}

impl Processor {
    pub fn new(
        store: Arc<BlockStore>,
        events: mpsc::Sender<LeaderEvent>,
        block_interval: Duration,
        shutdown: Arc<AtomicBool>,
    ) -> Arc<Self> {
        let latest = store.newest_sealed_height() as u32;
        Arc::new(Self {
            store,
            latest_height: AtomicU32::new(latest),
            timer_armed: AtomicBool::new(false),
            block_interval,
            events,
            shutdown,
        })
    }

    /// Seal one block immediately and report the height. Exposed for the
    /// run loop and tests.
    pub async fn seal_once(&self) -> u32 {
        let sealed = self.store.seal_tip() as u32;
        self.latest_height.store(sealed, Ordering::Release);
        if self.events.send(LeaderEvent::HeightSealed(sealed)).await.is_err() {
            debug!("leader service gone, sealed height {sealed} unreported");
        }
        sealed
    }

    /// Run the sealing timer until shutdown.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.block_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick of an interval fires immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            if !self.timer_armed.load(Ordering::Acquire) {
                continue;
            }
            let sealed = self.seal_once().await;
            debug!("sealed directory block {sealed}");
        }
        debug!("processor done");
    }
}

impl ProcessorHooks for Processor {
    fn reset_leader_state(&self) {
        info!("resetting leader block-production state");
        self.timer_armed.store(true, Ordering::Release);
    }

    fn start_block_timer(&self) {
        info!("block timer armed");
        self.timer_armed.store(true, Ordering::Release);
    }

    fn stop_block_timer(&self) {
        info!("block timer disarmed");
        self.timer_armed.store(false, Ordering::Release);
    }

    fn newest_height(&self) -> u32 {
        self.latest_height.load(Ordering::Acquire)
    }
}
