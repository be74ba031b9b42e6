//! The leader service: the task that owns the [`LeaderMachine`].
//!
//! Three kinds of event arrive on its channel: a height sealed by the
//! processor, a federate server removed by the peer manager, and an
//! inbound role-change message from a peer. Each is fed to the machine,
//! and the machine's output is applied: broadcasts fan out through the
//! peer manager, hook flags fire on the processor.

use {
    fedchain_consensus::{
        FederateServer, LeaderBroadcast, LeaderMachine, MachineOutput, ProcessorHooks,
    },
    fedchain_net::{PeerManagerHandle, WireMessage},
    log::{debug, warn},
    std::sync::Arc,
    tokio::sync::mpsc,
};

/// Inputs to the leader machine.
#[derive(Debug)]
pub enum LeaderEvent {
    /// The processor sealed block `h`.
    HeightSealed(u32),
    /// The peer manager removed a federate server.
    FederateLost(FederateServer),
    /// A role-change message arrived from a peer.
    Inbound {
        node_id: String,
        message: WireMessage,
    },
}

/// Drives the leader machine from the event channel.
pub struct LeaderService {
    machine: LeaderMachine,
    events: mpsc::Receiver<LeaderEvent>,
    manager: PeerManagerHandle,
    hooks: Arc<dyn ProcessorHooks>,
}

impl LeaderService {
    pub fn new(
        machine: LeaderMachine,
        events: mpsc::Receiver<LeaderEvent>,
        manager: PeerManagerHandle,
        hooks: Arc<dyn ProcessorHooks>,
    ) -> Self {
        Self { machine, events, manager, hooks }
    }

    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            let output = match event {
                LeaderEvent::HeightSealed(height) => self.machine.on_height_sealed(height),
                LeaderEvent::FederateLost(removed) => {
                    self.machine.on_federate_removed(&removed, self.hooks.newest_height())
                }
                LeaderEvent::Inbound { node_id, message } => match message {
                    WireMessage::NextLeader(msg) => match self.machine.on_next_leader(&msg) {
                        Ok(output) => output,
                        Err(err) => {
                            warn!("rejected next-leader from {node_id}: {err}");
                            continue;
                        }
                    },
                    WireMessage::CurrentLeader(msg) => {
                        match self.machine.on_current_leader(&msg) {
                            Ok(output) => output,
                            Err(err) => {
                                warn!("rejected current-leader from {node_id}: {err}");
                                continue;
                            }
                        }
                    }
                    other => {
                        debug!("leader service ignoring {} from {node_id}", other.kind());
                        continue;
                    }
                },
            };
            self.apply(output).await;
        }
        debug!("leader service done");
    }

    async fn apply(&self, output: MachineOutput) {
        for broadcast in output.broadcasts {
            let message = match broadcast {
                LeaderBroadcast::NextLeader(msg) => WireMessage::NextLeader(msg),
                LeaderBroadcast::CurrentLeader(msg) => WireMessage::CurrentLeader(msg),
            };
            self.manager.broadcast(message, Vec::new()).await;
        }
        if output.reset_leader_state {
            self.hooks.reset_leader_state();
        }
        if output.arm_block_timer {
            self.hooks.start_block_timer();
        }
        if output.disarm_block_timer {
            self.hooks.stop_block_timer();
        }
    }
}
