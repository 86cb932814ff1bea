//! Frame identifier codec
//!
//! The logical frame header travels in the 29 significant bits of the
//! extended CAN identifier. The layout is fixed and must match across all
//! nodes on the bus, MSB to LSB:
//!
//! ```text
//! frame_type(2) | first(1) | last(1) | counter(3) | transaction(8) | sender(7) | receiver(7)
//! ```
//!
//! Placing the frame type in the most significant bits makes events win CAN
//! arbitration over commands and responses; the receiver address in the low
//! bits keeps it aligned for mask-mode filter banks.

use crate::core::{Address, FrameType, SequenceCounter, TransactionId};

/// Decoded logical header of one physical frame
///
/// Encoding and decoding are pure and total: every field is masked to its
/// bit width, and every 29-bit value decodes to some header. A field value
/// exceeding its width is a caller contract violation and truncates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameId {
    pub frame_type: FrameType,
    /// This frame begins a logical message.
    pub first: bool,
    /// This frame ends a logical message. May be set together with `first`
    /// for single-frame messages.
    pub last: bool,
    pub counter: SequenceCounter,
    pub transaction: TransactionId,
    pub sender: Address,
    pub receiver: Address,
}

impl FrameId {
    const RECEIVER: u32 = 0;
    const SENDER: u32 = 7;
    const TRANSACTION: u32 = 14;
    const COUNTER: u32 = 22;
    const LAST: u32 = 25;
    const FIRST: u32 = 26;
    const FRAME_TYPE: u32 = 27;

    pub const fn encode(self) -> u32 {
        (self.frame_type.into_u8() as u32) << Self::FRAME_TYPE
            | (self.first as u32) << Self::FIRST
            | (self.last as u32) << Self::LAST
            | (self.counter.into_u8() as u32) << Self::COUNTER
            | (self.transaction.into_u8() as u32) << Self::TRANSACTION
            | (self.sender.into_u8() as u32) << Self::SENDER
            | (self.receiver.into_u8() as u32) << Self::RECEIVER
    }

    pub const fn decode(value: u32) -> Self {
        Self {
            frame_type: FrameType::from_u8_truncating((value >> Self::FRAME_TYPE) as u8),
            first: (value >> Self::FIRST) & 0x1 != 0,
            last: (value >> Self::LAST) & 0x1 != 0,
            counter: SequenceCounter::from_u8_truncating((value >> Self::COUNTER) as u8),
            transaction: TransactionId::new((value >> Self::TRANSACTION) as u8),
            sender: Address::from_u8_truncating((value >> Self::SENDER) as u8),
            receiver: Address::from_u8_truncating((value >> Self::RECEIVER) as u8),
        }
    }
}

impl From<FrameId> for u32 {
    fn from(value: FrameId) -> Self {
        value.encode()
    }
}

impl From<u32> for FrameId {
    fn from(value: u32) -> Self {
        Self::decode(value)
    }
}
