//! Inbound reassembly
//!
//! Runs in interrupt context: every operation is bounded, never blocks, and
//! never allocates in a way that can fail silently.
//!
//! Rules, per incoming segment:
//!
//! 1. A segment whose key (sender, receiver, type, transaction) matches an
//!    in-flight entry continues that entry. A `first` flag on such a segment
//!    means the previous message for this key never completed: the stale
//!    entry is evicted and the segment is rejected as `InvalidFrame`.
//! 2. A continuation segment must carry `(previous counter + 1) mod 8`;
//!    a gap evicts the entry and rejects the segment (`InvalidFrame`).
//! 3. A `last` segment completes the entry; the finished message is handed
//!    back to the caller and the entry is removed.
//! 4. A segment with no matching entry must carry `first`; otherwise the
//!    real first segment was lost and the segment is rejected
//!    (`InvalidFrame`). A `first` segment opens a new entry, or completes
//!    immediately when it also carries `last`.
//! 5. Payload growth past [`MAX_MESSAGE_LENGTH`](super::MAX_MESSAGE_LENGTH)
//!    or a full entry table surfaces as `Allocation`.
//! 6. Entries with no activity for longer than the caller's timeout are
//!    evicted by [`Table::evict_stale`], called from task context, so an
//!    abandoned transfer cannot occupy its slot forever.
//!
//! Eviction on rules 1 and 2 is a deliberate choice: after a protocol
//! violation the semantics of subsequent segments for that key are
//! ambiguous, and a clean `first` segment must be able to start over.

use crate::assembly::{Message, PayloadBuf};
use crate::core::{Error, ErrorKind, SequenceCounter};
use crate::format::FrameId;
use crate::time::{Duration, Instant};

/// Upper bound on concurrently reassembled messages.
pub const MAX_IN_FLIGHT: usize = 8;

#[derive(Debug)]
struct Entry {
    message: Message,
    last_counter: SequenceCounter,
    last_activity: Instant,
}

impl Entry {
    fn matches(&self, id: &FrameId) -> bool {
        self.message.sender == id.sender
            && self.message.receiver == id.receiver
            && self.message.frame_type == id.frame_type
            && self.message.transaction == id.transaction
    }
}

/// In-flight reassembly table
///
/// At most one entry per key exists at any time.
#[derive(Debug, Default)]
pub struct Table {
    entries: heapless::Vec<Entry, MAX_IN_FLIGHT>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_flight(&self) -> usize {
        self.entries.len()
    }

    /// Processes one inbound segment.
    ///
    /// Returns the completed message once its `last` segment arrives.
    pub fn push_segment(
        &mut self,
        id: FrameId,
        data: &[u8],
        timestamp: Instant,
    ) -> Result<Option<Message>, Error> {
        if let Some(index) = self.entries.iter().position(|entry| entry.matches(&id)) {
            return self.continue_entry(index, id, data, timestamp);
        }

        if !id.first {
            return Err(Error::new(
                ErrorKind::InvalidFrame,
                "first segment seems to have been dropped",
            ));
        }

        let mut payload = PayloadBuf::new();
        payload
            .extend_from_slice(data)
            .map_err(|()| Error::new(ErrorKind::Allocation, "message payload buffer exhausted"))?;

        let message = Message {
            frame_type: id.frame_type,
            sender: id.sender,
            receiver: id.receiver,
            transaction: id.transaction,
            payload,
        };

        if id.last {
            // Single-frame message, no entry ever materializes.
            return Ok(Some(message));
        }

        self.entries
            .push(Entry {
                message,
                last_counter: id.counter,
                last_activity: timestamp,
            })
            .map_err(|_| Error::new(ErrorKind::Allocation, "reassembly table full"))?;
        Ok(None)
    }

    fn continue_entry(
        &mut self,
        index: usize,
        id: FrameId,
        data: &[u8],
        timestamp: Instant,
    ) -> Result<Option<Message>, Error> {
        if id.first {
            self.entries.swap_remove(index);
            return Err(Error::new(
                ErrorKind::InvalidFrame,
                "previous message for this key never completed",
            ));
        }

        let entry = &mut self.entries[index];
        let expected = entry.last_counter.next();
        if id.counter != expected {
            self.entries.swap_remove(index);
            return Err(Error::new(ErrorKind::InvalidFrame, "sequence counter gap"));
        }

        if entry.message.payload.extend_from_slice(data).is_err() {
            self.entries.swap_remove(index);
            return Err(Error::new(
                ErrorKind::Allocation,
                "message payload buffer exhausted",
            ));
        }
        entry.last_counter = expected;
        entry.last_activity = timestamp;

        if id.last {
            let entry = self.entries.swap_remove(index);
            return Ok(Some(entry.message));
        }
        Ok(None)
    }

    /// Drops entries whose last segment is older than `timeout`.
    ///
    /// Returns the number of evicted entries.
    pub fn evict_stale(&mut self, now: Instant, timeout: Duration) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|entry| now.saturating_duration_since(entry.last_activity) <= timeout);
        before - self.entries.len()
    }

    /// Drops every in-flight entry, e.g. when addressing restarts and the
    /// keyed addresses lose their meaning.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
