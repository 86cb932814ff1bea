//! knabberCAN protocol core data types
//!
//! This crate provides basic data type definitions used by other knabberCAN crates.
//! Stack users should not depend on this crate directly. Use the `knabbercan::core`
//! reexport instead.
#![no_std]

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidValue;

/// Node address on the knabberCAN bus
///
/// Addresses are 7 bits wide. Address 0 is reserved as the broadcast address;
/// 1..N are handed out sequentially along the daisy chain during addressing.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Address(u8);

impl Address {
    const MAX_VALUE: u8 = 0x7f;
    pub const MAX: Address = Address(Self::MAX_VALUE);

    /// All nodes receive frames sent to this address.
    pub const BROADCAST: Address = Address(0);

    pub const fn new(value: u8) -> Option<Self> {
        if value <= Self::MAX_VALUE {
            Some(Self::from_u8_truncating(value))
        } else {
            None
        }
    }

    pub const fn from_u8_truncating(value: u8) -> Self {
        Self(value & Self::MAX_VALUE)
    }

    pub const fn into_u8(self) -> u8 {
        self.0
    }

    pub const fn is_broadcast(self) -> bool {
        self.0 == Self::BROADCAST.0
    }

    /// The address one hop further down the chain, if representable.
    pub const fn successor(self) -> Option<Self> {
        if self.0 < Self::MAX_VALUE {
            Some(Self(self.0 + 1))
        } else {
            None
        }
    }
}

impl From<Address> for u8 {
    fn from(value: Address) -> Self {
        value.into_u8()
    }
}

impl From<Address> for usize {
    fn from(value: Address) -> Self {
        u8::from(value).into()
    }
}

impl TryFrom<u8> for Address {
    type Error = InvalidValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidValue)
    }
}

/// Application-chosen identifier distinguishing event/command topics
///
/// The full 8-bit range is valid. Ids 0x00..=0x04 are reserved for the
/// addressing events of the protocol itself.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransactionId(u8);

impl TransactionId {
    pub const MAX: TransactionId = TransactionId(u8::MAX);

    /// Number of distinct transaction ids per frame type.
    pub const COUNT: usize = 256;

    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    pub const fn into_u8(self) -> u8 {
        self.0
    }
}

impl From<u8> for TransactionId {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl From<TransactionId> for u8 {
    fn from(value: TransactionId) -> Self {
        value.into_u8()
    }
}

impl From<TransactionId> for usize {
    fn from(value: TransactionId) -> Self {
        u8::from(value).into()
    }
}

/// Per-message segment counter, 3 bits, wraps mod 8
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SequenceCounter(u8);

impl SequenceCounter {
    const MAX_VALUE: u8 = 0x7;
    pub const MAX: SequenceCounter = SequenceCounter(Self::MAX_VALUE);

    /// Counter of the first segment of a message.
    pub const FIRST: SequenceCounter = SequenceCounter(0);

    pub const fn new(value: u8) -> Option<Self> {
        if value <= Self::MAX_VALUE {
            Some(Self::from_u8_truncating(value))
        } else {
            None
        }
    }

    pub const fn from_u8_truncating(value: u8) -> Self {
        Self(value & Self::MAX_VALUE)
    }

    pub const fn into_u8(self) -> u8 {
        self.0
    }

    pub const fn next(self) -> Self {
        Self((self.0 + 1) & Self::MAX_VALUE)
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::FIRST
    }
}

impl From<SequenceCounter> for u8 {
    fn from(value: SequenceCounter) -> Self {
        value.into_u8()
    }
}

impl TryFrom<u8> for SequenceCounter {
    type Error = InvalidValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidValue)
    }
}

/// Logical kind of a knabberCAN message
///
/// The type has explicit numeric encoding matching the 2-bit field of the
/// frame identifier. The encoding is shared by every node on the bus.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum FrameType {
    /// Unsolicited broadcast notification. No reply is produced.
    Event = 0,
    /// Request addressed to one node, answered with a `Response` carrying
    /// the same transaction id.
    Command = 1,
    /// Reply to a previously received `Command`.
    Response = 2,
    /// Error report frame.
    Error = 3,
}

impl FrameType {
    pub const fn try_from_u8(code: u8) -> Option<FrameType> {
        if code <= FrameType::Error as u8 {
            Some(Self::from_u8_truncating(code))
        } else {
            None
        }
    }

    pub const fn from_u8_truncating(code: u8) -> FrameType {
        match code & 0x3 {
            0 => FrameType::Event,
            1 => FrameType::Command,
            2 => FrameType::Response,
            3 => FrameType::Error,
            _ => unreachable!(),
        }
    }

    pub const fn into_u8(self) -> u8 {
        self as u8
    }
}

impl From<FrameType> for u8 {
    fn from(value: FrameType) -> Self {
        value.into_u8()
    }
}

impl TryFrom<u8> for FrameType {
    type Error = InvalidValue;

    fn try_from(value: u8) -> Result<Self, InvalidValue> {
        Self::try_from_u8(value).ok_or(InvalidValue)
    }
}

/// Protocol engine lifecycle state
///
/// Transitions are driven only by the addressing state machine and by
/// topology-change detection; `Ready -> Addressing` is re-entrant.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NodeState {
    Uninitialized,
    Initializing,
    Addressing,
    Ready,
}

/// Error classification shared across the stack
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorKind {
    /// Malformed identifier, sequence gap, or unexpected first/continuation
    /// segment.
    InvalidFrame,
    /// A bounded queue was full; the offending element was dropped.
    Overrun,
    /// A payload buffer could not grow any further.
    Allocation,
    /// A handler slot was already bound.
    DuplicateBinding,
    /// A configuration value was outside its valid range.
    Range,
    /// A state that the protocol invariants rule out.
    Impossible,
}

/// An error raised by the protocol engine
///
/// Replaces the non-local `throw(kind, message)` channel of the firmware
/// with a plain value travelling up through `Result`. The message is a
/// static diagnostic string, never interpolated.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Error {
    pub kind: ErrorKind,
    pub message: &'static str,
}

impl Error {
    pub const fn new(kind: ErrorKind, message: &'static str) -> Self {
        Self { kind, message }
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_range() {
        assert_eq!(Address::new(0), Some(Address::BROADCAST));
        assert_eq!(Address::new(0x7f), Some(Address::MAX));
        assert!(Address::new(0x80).is_none());
        assert_eq!(Address::from_u8_truncating(0x81).into_u8(), 0x01);
    }

    #[test]
    fn test_address_successor() {
        let first = Address::new(1).unwrap();
        assert_eq!(first.successor(), Address::new(2));
        assert_eq!(Address::MAX.successor(), None);
    }

    #[test]
    fn test_sequence_counter_wrap() {
        let mut counter = SequenceCounter::FIRST;
        for expected in [1, 2, 3, 4, 5, 6, 7, 0, 1] {
            counter = counter.next();
            assert_eq!(counter.into_u8(), expected);
        }
    }

    #[test]
    fn test_frame_type_round_trip() {
        for code in 0..4 {
            let frame_type = FrameType::try_from_u8(code).unwrap();
            assert_eq!(frame_type.into_u8(), code);
        }
        assert!(FrameType::try_from_u8(4).is_none());
    }
}
