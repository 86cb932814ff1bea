//! Message (de)segmentation
//!
//! A logical message travels as an ordered sequence of physical frames of at
//! most [`MAX_SEGMENT_LENGTH`] payload bytes each. [`scatter::Scatter`]
//! produces the outbound sequence; [`gather::Table`] reconstructs inbound
//! sequences, one in-flight entry per (sender, receiver, type, transaction)
//! key.

use crate::core::{Address, FrameType, TransactionId};

pub mod gather;
pub mod scatter;

/// Payload bytes of one physical frame, bounded by the classic CAN MTU.
pub const MAX_SEGMENT_LENGTH: usize = 8;

/// Capacity of a reassembled or outbound message payload.
///
/// A message longer than this cannot be reassembled; the receive side
/// surfaces the overflow as an `Allocation` error.
pub const MAX_MESSAGE_LENGTH: usize = 128;

/// Accumulation buffer for one message payload.
pub type PayloadBuf = heapless::Vec<u8, MAX_MESSAGE_LENGTH>;

/// A fully reassembled inbound message
///
/// Ownership of the payload moves from the reassembly table into the receive
/// queue and from there to the dispatch loop, which releases it exactly once
/// after the handler (if any) ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub frame_type: FrameType,
    pub sender: Address,
    pub receiver: Address,
    pub transaction: TransactionId,
    pub payload: PayloadBuf,
}
