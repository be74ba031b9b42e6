//! Fedchain leader election.
//!
//! This crate is pure policy: it tracks the federate-server roster and
//! decides, at each sealed block height, whether to notify a successor,
//! rotate the leadership, or run an emergency election. All I/O and
//! networking is handled externally; inputs arrive as method calls and
//! outputs come back as [`machine::MachineOutput`] values for the caller
//! to broadcast.
//!
//! ## Crate modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`types`]   | Node roles, identities, signed leader wire payloads |
//! | [`roster`]  | Ordered federate-server set with single-holder role mutators |
//! | [`policy`]  | The current leader's term/notification schedule |
//! | [`machine`] | Height-driven transitions and emergency re-election |
//! | [`hooks`]   | The narrow processor capability the machine drives |
//! | [`error`]   | Crate-wide error enum |

pub mod error;
pub mod hooks;
pub mod machine;
pub mod policy;
pub mod roster;
pub mod types;

pub use {
    error::{ConsensusError, Result},
    hooks::ProcessorHooks,
    machine::{LeaderMachine, MachineOutput},
    policy::LeaderPolicy,
    roster::{FederateRoster, FederateServer},
    types::{CurrentLeaderMsg, LeaderBroadcast, NextLeaderMsg, NodeId, NodeState, PeerId},
};
