//! Transmission channel between the stack and a CAN driver

use knabbercan_core::Address;

use crate::frame::Frame;

/// Failure of a transport operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    /// Neither a hardware mailbox nor a retry queue slot was available.
    QueueFull,
    /// The channel is unusable, e.g. the controller is bus-off.
    ChannelDown,
}

/// Frame hand-off into a CAN driver
///
/// `send` must be all-or-nothing: either the frame is accepted (transmitted
/// immediately from a free hardware mailbox, or queued into the driver's
/// transmit retry queue drained by the transmit-complete interrupt) or an
/// error is returned. Accepted frames from one node must reach the bus in
/// hand-off order, and the driver must not drop an accepted frame without
/// surfacing a channel error through its own error path.
///
/// `set_filter` programs the receiver filter banks to accept frames addressed
/// to the given node address alongside broadcast traffic. Before the first
/// call the driver must accept all extended frames, since a node cannot know
/// its address until addressing completes.
pub trait Transport {
    fn send(&mut self, frame: &Frame) -> Result<(), TransportError>;

    fn set_filter(&mut self, address: Address) -> Result<(), TransportError>;
}
