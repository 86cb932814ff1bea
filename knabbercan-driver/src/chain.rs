//! Daisy-chain signal lines
//!
//! Nodes are wired point-to-point in a chain, separate from the CAN lines.
//! Each node exposes two line pairs:
//! * upstream: a connection-present sense line and the incoming daisy
//!   handshake line driven by the predecessor,
//! * downstream: the mirrored pair toward the successor.
//!
//! The lines serve only neighbor discovery and mutual exclusion during
//! addressing. The daisy handshake is the addressing token: a node gates
//! exactly one successor into accepting the next address by activating its
//! downstream daisy line, which the successor reads as its upstream daisy
//! line.

/// Access to the four chain lines of one node
///
/// Sense lines are sampled, never driven. Only the downstream daisy line is
/// an output; the upstream daisy line belongs to the predecessor.
pub trait ChainPort {
    /// Whether a predecessor node is plugged into the upstream port.
    fn upstream_connected(&self) -> bool;

    /// Whether a successor node is plugged into the downstream port.
    fn downstream_connected(&self) -> bool;

    /// Level of the upstream daisy line, driven by the predecessor.
    fn upstream_daisy(&self) -> bool;

    /// Drives the downstream daisy line.
    fn set_downstream_daisy(&mut self, active: bool);
}
