//! Bounded FIFO queue
//!
//! Thin wrapper around a fixed-capacity deque with overrun reporting in the
//! shape the rest of the stack expects. Not synchronized; the owner is
//! expected to hold the engine mutex around every call.

use crate::core::{Error, ErrorKind};

#[derive(Debug)]
pub struct Fifo<T, const N: usize> {
    queue: heapless::Deque<T, N>,
}

impl<T, const N: usize> Default for Fifo<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Fifo<T, N> {
    pub const fn new() -> Self {
        Self {
            queue: heapless::Deque::new(),
        }
    }

    /// Appends an element, or reports `Overrun` when the queue is full.
    ///
    /// The element is dropped on overrun; the queue contents are untouched.
    pub fn push(&mut self, element: T) -> Result<(), Error> {
        self.queue
            .push_back(element)
            .map_err(|_| Error::new(ErrorKind::Overrun, "queue full, element dropped"))
    }

    /// Returns an element to the front, e.g. after a failed hand-off.
    pub fn push_front(&mut self, element: T) -> Result<(), Error> {
        self.queue
            .push_front(element)
            .map_err(|_| Error::new(ErrorKind::Overrun, "queue full, element dropped"))
    }

    pub fn pop(&mut self) -> Option<T> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}
