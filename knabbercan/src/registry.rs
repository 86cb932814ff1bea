//! Event and command handler registries
//!
//! Each node owns one handler slot per transaction id and frame type. A slot
//! binds at most once for the lifetime of the node; rebinding is a
//! programming error and surfaces as `DuplicateBinding` instead of silently
//! replacing the previous handler.

use crate::addressing;
use crate::assembly::PayloadBuf;
use crate::core::{Address, Error, ErrorKind, TransactionId};

/// A received event, borrowed for the duration of the handler call
#[derive(Debug)]
pub struct EventFrame<'p> {
    pub id: TransactionId,
    pub sender: Address,
    pub payload: &'p [u8],
}

/// A received command, borrowed for the duration of the handler call
#[derive(Debug)]
pub struct CommandFrame<'p> {
    pub id: TransactionId,
    pub sender: Address,
    pub payload: &'p [u8],
}

/// Response payload produced by a command handler
///
/// Sent back to the command's sender under the same transaction id.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Response {
    payload: PayloadBuf,
}

impl Response {
    pub const fn empty() -> Self {
        Self {
            payload: PayloadBuf::new(),
        }
    }

    pub fn new(payload: &[u8]) -> Result<Self, Error> {
        let mut buffer = PayloadBuf::new();
        buffer
            .extend_from_slice(payload)
            .map_err(|()| Error::new(ErrorKind::Allocation, "response payload too long"))?;
        Ok(Self { payload: buffer })
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Reacts to an event received under the bound transaction id.
///
/// Called from task context, outside any critical section. The handler must
/// not block; it may emit messages through the node it is registered with.
pub trait EventHandler: Sync {
    fn on_event(&self, event: &EventFrame<'_>);
}

/// Answers a command received under the bound transaction id.
///
/// Same execution contract as [`EventHandler`]; the returned response is sent
/// back to the command's sender.
pub trait CommandHandler: Sync {
    fn on_command(&self, command: &CommandFrame<'_>) -> Response;
}

/// Handler table of one node
///
/// One slot per transaction id, separate for events and commands. Lookups
/// are constant-time array indexing; the tables are sized for the full id
/// range so no id is privileged over another.
pub struct Registry<'h> {
    events: [Option<&'h dyn EventHandler>; TransactionId::COUNT],
    commands: [Option<&'h dyn CommandHandler>; TransactionId::COUNT],
}

impl Default for Registry<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'h> Registry<'h> {
    pub const fn new() -> Self {
        Self {
            events: [None; TransactionId::COUNT],
            commands: [None; TransactionId::COUNT],
        }
    }

    /// Binds an event handler to `id`.
    ///
    /// Ids reserved for the addressing protocol cannot be bound; they never
    /// reach application handlers.
    pub fn define_event(
        &mut self,
        id: TransactionId,
        handler: &'h dyn EventHandler,
    ) -> Result<(), Error> {
        if addressing::is_reserved(id) {
            return Err(Error::new(
                ErrorKind::DuplicateBinding,
                "event id is reserved for addressing",
            ));
        }
        let slot = &mut self.events[usize::from(id)];
        if slot.is_some() {
            return Err(Error::new(
                ErrorKind::DuplicateBinding,
                "event id already bound",
            ));
        }
        *slot = Some(handler);
        Ok(())
    }

    /// Binds a command handler to `id`.
    pub fn define_command(
        &mut self,
        id: TransactionId,
        handler: &'h dyn CommandHandler,
    ) -> Result<(), Error> {
        let slot = &mut self.commands[usize::from(id)];
        if slot.is_some() {
            return Err(Error::new(
                ErrorKind::DuplicateBinding,
                "command id already bound",
            ));
        }
        *slot = Some(handler);
        Ok(())
    }

    pub fn event(&self, id: TransactionId) -> Option<&'h dyn EventHandler> {
        self.events[usize::from(id)]
    }

    pub fn command(&self, id: TransactionId) -> Option<&'h dyn CommandHandler> {
        self.commands[usize::from(id)]
    }
}
