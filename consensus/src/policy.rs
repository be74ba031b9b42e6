//! The current leader's term schedule.

use crate::types::NodeId;

/// Number of blocks a leader presides over by default.
pub const DEFAULT_LEADER_TERM: u32 = 2;

/// How many blocks ahead of the boundary the successor is announced.
pub const DEFAULT_NOTIFY_DB_HEIGHT: u32 = 1;

/// Schedule for the current leader's term and its successor hand-off.
///
/// Held only while this node is the leader (or leader-elect waiting on a
/// scheduled `start_db_height`). `start_db_height + term` is the height at
/// which the successor takes over; `notify_db_height` is the lead time for
/// broadcasting the notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderPolicy {
    pub next_leader: NodeId,
    pub start_db_height: u32,
    pub term: u32,
    pub notify_db_height: u32,
    pub notified: bool,
    pub confirmed: bool,
}

impl LeaderPolicy {
    /// A fresh policy starting at `start_db_height` with default term and
    /// notification lead time.
    pub fn new(next_leader: NodeId, start_db_height: u32) -> Self {
        Self {
            next_leader,
            start_db_height,
            term: DEFAULT_LEADER_TERM,
            notify_db_height: DEFAULT_NOTIFY_DB_HEIGHT,
            notified: false,
            confirmed: false,
        }
    }

}
