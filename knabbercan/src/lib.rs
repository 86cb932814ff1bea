//! # knabberCAN
//!
//! This library implements the knabberCAN protocol: distributed daisy-chain
//! addressing plus a typed event/command/response messaging layer over a
//! classic CAN bus, for no_std environments. It uses fixed-capacity buffers
//! and queues throughout, requiring no dynamic memory allocation.
//!
//! ## Architecture
//!
//! ```text
//!  CAN driver ──► accept_frame ──► reassembly table ──► receive queue
//!  (interrupt)                                               │
//!                                                            ▼
//!  application ──► poll ──► addressing machine / dispatch ──► handlers
//!  (task)             │                                        │
//!                     └──► Transport::send ◄── segmentation ◄──┘
//! ```
//!
//! Components:
//! * [`node::Node`] is the protocol engine: a single owned instance holding
//!   the handler registries, the node address, and the addressing state
//!   machine. Drivers feed it frames from interrupt context; the application
//!   drains it from task context by calling [`node::Node::poll`] regularly.
//! * [`format::FrameId`] packs the logical frame header (type, first/last,
//!   sequence counter, transaction id, sender, receiver) into the 29-bit
//!   extended CAN identifier.
//! * [`assembly`] splits outbound payloads into ≤8-byte segments and
//!   reconstructs inbound segments into complete messages, keyed by
//!   (sender, receiver, type, transaction).
//! * [`addressing`] assigns unique addresses 1..N along the physical chain
//!   and determines the bus size, without central coordination.
//! * [`registry`] maps transaction ids to event and command handlers.
//!
//! ## Concurrency model
//!
//! There are two logical execution contexts on one core: interrupt context
//! (frame arrival) and task context (the poll loop). All shared state lives
//! behind an `embassy_sync` blocking mutex generic over the raw mutex type;
//! `CriticalSectionRawMutex` gives the classic nestable interrupt-disable
//! critical section. The interrupt path never blocks: a full receive queue
//! surfaces as an `Overrun` error instead. Addressing events are queued
//! together with the chain line levels sampled at arrival, so the token
//! handshake does not depend on poll latency. Handlers run in task context,
//! outside any critical section.

#![no_std]

pub use knabbercan_core as core;
pub use knabbercan_driver::{chain, frame, time, transport};

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod addressing;
pub mod assembly;
pub mod format;
pub mod node;
pub mod registry;
pub(crate) mod utils;

pub use node::Node;
