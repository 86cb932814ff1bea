//! Outbound segmentation

use crate::assembly::MAX_SEGMENT_LENGTH;
use crate::core::{Address, FrameType, SequenceCounter, TransactionId};
use crate::format::FrameId;
use crate::frame::{Data, Frame};

/// Splits one outbound payload into physical frames
///
/// Segment i carries `first = (i == 0)`, `last` once no bytes remain after
/// it, and `counter = i mod 8`. A zero-length payload still produces exactly
/// one frame with both `first` and `last` set, so empty events and commands
/// are representable on the wire.
pub struct Scatter<'a> {
    frame_type: FrameType,
    transaction: TransactionId,
    sender: Address,
    receiver: Address,
    payload: &'a [u8],
    offset: usize,
    counter: SequenceCounter,
    started: bool,
}

impl<'a> Scatter<'a> {
    pub fn new(
        frame_type: FrameType,
        transaction: TransactionId,
        sender: Address,
        receiver: Address,
        payload: &'a [u8],
    ) -> Self {
        Self {
            frame_type,
            transaction,
            sender,
            receiver,
            payload,
            offset: 0,
            counter: SequenceCounter::FIRST,
            started: false,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.started && self.offset == self.payload.len()
    }

    /// Total number of frames this payload occupies.
    pub const fn segment_count(payload_length: usize) -> usize {
        if payload_length == 0 {
            1
        } else {
            payload_length.div_ceil(MAX_SEGMENT_LENGTH)
        }
    }

    pub fn next_frame(&mut self) -> Option<Frame> {
        if self.is_exhausted() {
            return None;
        }

        let residual = &self.payload[self.offset..];
        let segment = &residual[..core::cmp::min(residual.len(), MAX_SEGMENT_LENGTH)];

        let id = FrameId {
            frame_type: self.frame_type,
            first: self.offset == 0,
            last: residual.len() == segment.len(),
            counter: self.counter,
            transaction: self.transaction,
            sender: self.sender,
            receiver: self.receiver,
        };

        self.offset += segment.len();
        self.counter = self.counter.next();
        self.started = true;

        Some(Frame {
            id: id.encode(),
            extended: true,
            remote: false,
            data: unwrap!(Data::new(segment)),
        })
    }
}

impl Iterator for Scatter<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        self.next_frame()
    }
}
