//! Transport frame object

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidLength;

/// Classic CAN frame data vector, 0 to 8 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Data {
    length: u8,
    bytes: [u8; Self::MAX_LENGTH],
}

impl Data {
    /// Maximum data length of one classic CAN frame.
    pub const MAX_LENGTH: usize = 8;

    /// Creates a new vector from a slice of compatible length.
    pub fn new(data: &[u8]) -> Result<Self, InvalidLength> {
        if data.len() > Self::MAX_LENGTH {
            return Err(InvalidLength);
        }
        let mut bytes = [0; Self::MAX_LENGTH];
        bytes[..data.len()].copy_from_slice(data);

        Ok(Self {
            length: data.len() as u8,
            bytes,
        })
    }

    pub const fn empty() -> Self {
        Self {
            length: 0,
            bytes: [0; Self::MAX_LENGTH],
        }
    }

    pub fn length(&self) -> usize {
        usize::from(self.length)
    }
}

impl core::ops::Deref for Data {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.bytes[..usize::from(self.length)]
    }
}

/// One physical frame as seen by the stack
///
/// The identifier is carried raw; the stack owns its bit layout. knabberCAN
/// uses extended-identifier data frames exclusively, but the reception path
/// carries the `extended` and `remote` flags so the stack can reject anything
/// else as a protocol violation instead of silently dropping it.
///
/// Frames carry no timestamp; the stack's reception entry point takes the
/// arrival instant as a separate argument, so drivers that timestamp in
/// hardware and drivers that sample a tick counter look the same to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Frame {
    /// Raw 32-bit identifier field; 29 bits are significant when `extended`.
    pub id: u32,
    /// Extended (29-bit) identifier flag. Always set for stack-produced frames.
    pub extended: bool,
    /// Remote transmission request flag. Never set for stack-produced frames.
    pub remote: bool,
    pub data: Data,
}
