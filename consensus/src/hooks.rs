//! The narrow processor capability the leader machine drives.

/// Hooks into the block processor.
///
/// The machine never talks to the processor directly; the service loop
/// that owns it invokes these when an output asks for it. Implementations
/// live with the node assembly.
pub trait ProcessorHooks: Send + Sync {
    /// Restart leader-side block production state after an emergency
    /// regime change.
    fn reset_leader_state(&self);

    /// Arm the block-building timer; called when this node becomes the
    /// leader.
    fn start_block_timer(&self);

    /// Disarm the block-building timer; called when this node's term
    /// ends and the leadership rotates away.
    fn stop_block_timer(&self);

    /// Newest sealed directory-block height.
    fn newest_height(&self) -> u32;
}
