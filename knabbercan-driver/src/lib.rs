//! knabberCAN driver interface
//!
//! The crate provides an interface between a CAN device driver and the knabberCAN
//! stack. Limited scope facilitates compatibility across versions. Driver crates
//! should depend on this crate. Stack users should depend on the `knabbercan`
//! crate instead.
//!
//! A driver owns the register-level CAN peripheral: bit timing, hardware transmit
//! mailboxes, a small transmit retry queue drained by the transmit-complete
//! interrupt, and the receiver filter banks. The stack only sees three seams:
//! * [`transport::Transport`]: hand off one physical frame for transmission
//!   and program the receiver filters.
//! * the reception path: the driver calls the stack's frame acceptance entry
//!   point from its receive interrupt.
//! * [`chain::ChainPort`]: the daisy-chain signal lines used for neighbor
//!   discovery during addressing, independent of the CAN lines themselves.
//!
//! Channel-level CAN errors (bit, ack, form, CRC, bus-off) stay inside the
//! driver. The stack relies on the peripheral's automatic bus-off recovery and
//! never treats channel errors as protocol errors.

#![no_std]

pub mod chain;
pub mod frame;
pub mod transport;

pub mod time {
    pub use embassy_time::{Duration, Instant};
}
