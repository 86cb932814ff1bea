//! Protocol engine
//!
//! [`Node`] ties the codec, the reassembly table, the addressing machine,
//! and the handler registry together behind one mutex. It is driven from two
//! contexts:
//!
//! * Interrupt context calls [`Node::accept_frame`] for every received
//!   frame. The call is bounded and never blocks; a full receive queue
//!   surfaces as `Overrun`. Addressing events are stamped with the chain
//!   line levels at arrival, so the token handshake stays correct no matter
//!   how late the poll loop gets around to them.
//! * Task context calls [`Node::poll`] in a loop. One poll advances the
//!   addressing machine, evicts stale reassembly entries, dispatches queued
//!   messages to their handlers, and flushes the transmit queue into the
//!   driver.
//!
//! Handlers run inside poll but outside the critical section, so they may
//! call [`Node::emit_event`] and [`Node::send_command`] freely. Outbound
//! messages are queued and leave the node on the next flush, within the same
//! poll when emitted from a handler.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::addressing::{self, Action, Actions, AddressingEvent, LineSample, Machine};
use crate::assembly::gather::Table;
use crate::assembly::scatter::Scatter;
use crate::assembly::{Message, MAX_MESSAGE_LENGTH};
use crate::chain::ChainPort;
use crate::core::{
    Address, Error, ErrorKind, FrameType, NodeState, SequenceCounter, TransactionId,
};
use crate::format::FrameId;
use crate::frame::{Data, Frame};
use crate::registry::{
    CommandFrame, CommandHandler, EventFrame, EventHandler, Registry, Response,
};
use crate::time::{Duration, Instant};
use crate::transport::{Transport, TransportError};
use crate::utils::fifo::Fifo;

/// Completed inbound messages awaiting dispatch.
pub const RECV_QUEUE_DEPTH: usize = 32;

/// Outbound frames awaiting hand-off to the driver.
pub const SEND_QUEUE_DEPTH: usize = 32;

/// In-flight reassembly entries older than this are evicted on poll.
pub const REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(2);

/// Addressing events awaiting the machine, with their arrival line levels.
const ADDRESSING_QUEUE_DEPTH: usize = 8;

struct Shared<'h> {
    machine: Machine,
    registry: Registry<'h>,
    gather: Table,
    recv: Fifo<Message, RECV_QUEUE_DEPTH>,
    send: Fifo<Frame, SEND_QUEUE_DEPTH>,
    addressing: Fifo<(AddressingEvent, Address, LineSample), ADDRESSING_QUEUE_DEPTH>,
    addressing_requested: bool,
}

/// One knabberCAN node
///
/// Generic over the raw mutex guarding the shared state;
/// `CriticalSectionRawMutex` gives the interrupt-safe critical section on
/// single-core targets, `NoopRawMutex` suffices when everything runs in one
/// task.
pub struct Node<'h, M: RawMutex> {
    shared: Mutex<M, RefCell<Shared<'h>>>,
}

impl<M: RawMutex> Default for Node<'_, M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'h, M: RawMutex> Node<'h, M> {
    pub fn new() -> Self {
        Self {
            shared: Mutex::new(RefCell::new(Shared {
                machine: Machine::new(),
                registry: Registry::new(),
                gather: Table::new(),
                recv: Fifo::new(),
                send: Fifo::new(),
                addressing: Fifo::new(),
                addressing_requested: false,
            })),
        }
    }

    /// Starts the node: the next poll enters addressing.
    ///
    /// Handlers should be bound before calling this, so that no event is
    /// dispatched into an empty slot during startup.
    pub fn init(&self) {
        self.shared.lock(|cell| {
            let mut shared = cell.borrow_mut();
            shared.machine.set_initializing();
            shared.addressing_requested = true;
        });
    }

    /// Requests a fresh addressing run, e.g. after a topology change.
    pub fn request_addressing(&self) {
        self.shared.lock(|cell| {
            cell.borrow_mut().addressing_requested = true;
        });
    }

    pub fn state(&self) -> NodeState {
        self.shared.lock(|cell| cell.borrow().machine.state())
    }

    /// The node's bus address; broadcast (0) while unaddressed.
    pub fn address(&self) -> Address {
        self.shared.lock(|cell| cell.borrow().machine.address())
    }

    /// Number of nodes found by the last completed addressing run.
    pub fn bus_size(&self) -> u8 {
        self.shared.lock(|cell| cell.borrow().machine.bus_size())
    }

    /// Binds an event handler to `id`. See [`Registry::define_event`].
    pub fn define_event(
        &self,
        id: TransactionId,
        handler: &'h dyn EventHandler,
    ) -> Result<(), Error> {
        self.shared
            .lock(|cell| cell.borrow_mut().registry.define_event(id, handler))
    }

    /// Binds a command handler to `id`. See [`Registry::define_command`].
    pub fn define_command(
        &self,
        id: TransactionId,
        handler: &'h dyn CommandHandler,
    ) -> Result<(), Error> {
        self.shared
            .lock(|cell| cell.borrow_mut().registry.define_command(id, handler))
    }

    /// Broadcasts an event to every node on the bus.
    ///
    /// Queued for transmission on the next flush. All-or-nothing: when the
    /// transmit queue cannot take the whole message, nothing is queued and
    /// `Overrun` is returned.
    pub fn emit_event(&self, id: TransactionId, payload: &[u8]) -> Result<(), Error> {
        if addressing::is_reserved(id) {
            return Err(Error::new(
                ErrorKind::Range,
                "event id is reserved for addressing",
            ));
        }
        self.queue_message(FrameType::Event, id, Address::BROADCAST, payload)
    }

    /// Sends a command to one node.
    ///
    /// The receiver answers with a response under the same transaction id.
    pub fn send_command(
        &self,
        receiver: Address,
        id: TransactionId,
        payload: &[u8],
    ) -> Result<(), Error> {
        if receiver.is_broadcast() {
            return Err(Error::new(
                ErrorKind::Range,
                "commands cannot be broadcast",
            ));
        }
        self.queue_message(FrameType::Command, id, receiver, payload)
    }

    /// Feeds one received frame into the node. Interrupt context.
    ///
    /// `timestamp` is the arrival instant; it drives stale-entry eviction.
    /// The chain lines are sampled here as well: whether an addressing
    /// handshake applies to this node is decided by the line levels at the
    /// moment the frame arrives, not when the poll loop processes it.
    /// Frames not addressed to this node are discarded silently.
    pub fn accept_frame<C: ChainPort>(
        &self,
        chain: &C,
        frame: &Frame,
        timestamp: Instant,
    ) -> Result<(), Error> {
        if frame.remote || !frame.extended {
            return Err(Error::new(
                ErrorKind::InvalidFrame,
                "only extended data frames are valid",
            ));
        }
        let id = FrameId::decode(frame.id);
        let lines = sample(chain);

        self.shared.lock(|cell| {
            let mut shared = cell.borrow_mut();

            if !id.receiver.is_broadcast() && id.receiver != shared.machine.address() {
                // Hardware filters are open until addressing completes, so
                // unicast traffic for other nodes can still show up here.
                return Ok(());
            }
            match id.frame_type {
                FrameType::Event | FrameType::Command => {}
                FrameType::Response | FrameType::Error => {
                    // No pending-command bookkeeping exists; responses are
                    // observable on the bus but not dispatched.
                    trace!("discarding frame of type {}", id.frame_type.into_u8());
                    return Ok(());
                }
            }

            if id.frame_type == FrameType::Event {
                if let Some(event) = AddressingEvent::from_id(id.transaction) {
                    if !id.first || !id.last {
                        return Err(Error::new(
                            ErrorKind::InvalidFrame,
                            "addressing events are single-frame",
                        ));
                    }
                    return shared.addressing.push((event, id.sender, lines));
                }
            }

            let shared = &mut *shared;
            if let Some(message) = shared.gather.push_segment(id, &frame.data, timestamp)? {
                shared.recv.push(message)?;
            }
            Ok(())
        })
    }

    /// Advances the node. Task context; call regularly.
    ///
    /// `now` is compared against frame arrival timestamps, so both must come
    /// from the same clock.
    pub fn poll<T: Transport, C: ChainPort>(
        &self,
        transport: &mut T,
        chain: &mut C,
        now: Instant,
    ) -> Result<(), Error> {
        let lines = sample(chain);

        let actions = self.shared.lock(|cell| -> Result<Actions, Error> {
            let mut shared = cell.borrow_mut();
            let was_addressing = shared.machine.state() == NodeState::Addressing;
            let mut actions = Actions::new();
            if shared.addressing_requested {
                shared.addressing_requested = false;
                actions = shared.machine.request();
            }
            actions.extend(shared.machine.step(lines)?);
            if !was_addressing && shared.machine.state() == NodeState::Addressing {
                // Reassembly keys contain addresses that just lost their
                // meaning.
                shared.gather.clear();
            }

            let evicted = shared.gather.evict_stale(now, REASSEMBLY_TIMEOUT);
            if evicted > 0 {
                warn!("evicted {} stale reassembly entries", evicted);
            }
            Ok(actions)
        })?;
        self.perform_actions(transport, chain, &actions)?;

        loop {
            let pending = self.shared.lock(|cell| cell.borrow_mut().addressing.pop());
            let Some((event, sender, lines)) = pending else {
                break;
            };
            self.on_addressing_event(transport, chain, event, sender, lines)?;
        }

        loop {
            let message = self.shared.lock(|cell| cell.borrow_mut().recv.pop());
            let Some(message) = message else {
                break;
            };
            self.dispatch(transport, &message)?;
        }

        self.flush(transport)
    }

    /// Dispatches one reassembled message to its consumer.
    ///
    /// Runs outside the critical section; handlers may queue messages.
    /// Addressing events never get here; they are diverted at acceptance.
    fn dispatch<T: Transport>(&self, transport: &mut T, message: &Message) -> Result<(), Error> {
        match message.frame_type {
            FrameType::Event => {
                let handler = self
                    .shared
                    .lock(|cell| cell.borrow().registry.event(message.transaction));
                if let Some(handler) = handler {
                    handler.on_event(&EventFrame {
                        id: message.transaction,
                        sender: message.sender,
                        payload: &message.payload,
                    });
                } else {
                    trace!("no handler for event {}", message.transaction.into_u8());
                }
                Ok(())
            }
            FrameType::Command => {
                let handler = self
                    .shared
                    .lock(|cell| cell.borrow().registry.command(message.transaction));
                let Some(handler) = handler else {
                    warn!("no handler for command {}", message.transaction.into_u8());
                    return Ok(());
                };
                let response = handler.on_command(&CommandFrame {
                    id: message.transaction,
                    sender: message.sender,
                    payload: &message.payload,
                });
                self.queue_response(message.transaction, message.sender, &response)
            }
            // Filtered out on reception.
            FrameType::Response | FrameType::Error => Ok(()),
        }
    }

    fn on_addressing_event<T: Transport, C: ChainPort>(
        &self,
        transport: &mut T,
        chain: &mut C,
        event: AddressingEvent,
        sender: Address,
        lines: LineSample,
    ) -> Result<(), Error> {
        // `lines` is the sample taken when the frame arrived. A `Next` that
        // was broadcast before this node was gated must never confer the
        // token, even if the daisy line has come up since.
        let actions = self.shared.lock(|cell| -> Result<Actions, Error> {
            let mut shared = cell.borrow_mut();
            let was_addressing = shared.machine.state() == NodeState::Addressing;
            let actions = shared.machine.on_event(event, sender, lines)?;
            if !was_addressing && shared.machine.state() == NodeState::Addressing {
                shared.gather.clear();
            }
            Ok(actions)
        })?;
        self.perform_actions(transport, chain, &actions)
    }

    fn perform_actions<T: Transport, C: ChainPort>(
        &self,
        transport: &mut T,
        chain: &mut C,
        actions: &Actions,
    ) -> Result<(), Error> {
        for action in actions {
            match action {
                Action::Emit(event) => self.queue_protocol_event(event.id())?,
                Action::SetDownstreamDaisy(active) => chain.set_downstream_daisy(*active),
                Action::SetFilter(address) => {
                    transport.set_filter(*address).map_err(map_transport_error)?
                }
                Action::Online => self.queue_protocol_event(addressing::EVENT_ONLINE)?,
            }
        }
        Ok(())
    }

    /// Queues a single-frame broadcast event of the addressing protocol.
    fn queue_protocol_event(&self, id: TransactionId) -> Result<(), Error> {
        self.shared.lock(|cell| {
            let mut shared = cell.borrow_mut();
            let header = FrameId {
                frame_type: FrameType::Event,
                first: true,
                last: true,
                counter: SequenceCounter::FIRST,
                transaction: id,
                sender: shared.machine.address(),
                receiver: Address::BROADCAST,
            };
            shared.send.push(Frame {
                id: header.encode(),
                extended: true,
                remote: false,
                data: Data::empty(),
            })
        })
    }

    fn queue_response(
        &self,
        id: TransactionId,
        receiver: Address,
        response: &Response,
    ) -> Result<(), Error> {
        self.shared.lock(|cell| {
            let mut shared = cell.borrow_mut();
            let sender = shared.machine.address();
            queue_scattered(
                &mut shared.send,
                FrameType::Response,
                id,
                sender,
                receiver,
                response.payload(),
            )
        })
    }

    fn queue_message(
        &self,
        frame_type: FrameType,
        id: TransactionId,
        receiver: Address,
        payload: &[u8],
    ) -> Result<(), Error> {
        if payload.len() > MAX_MESSAGE_LENGTH {
            return Err(Error::new(ErrorKind::Range, "payload too long"));
        }
        self.shared.lock(|cell| {
            let mut shared = cell.borrow_mut();
            if shared.machine.state() != NodeState::Ready {
                return Err(Error::new(ErrorKind::Impossible, "node is not ready"));
            }
            let sender = shared.machine.address();
            queue_scattered(&mut shared.send, frame_type, id, sender, receiver, payload)
        })
    }

    /// Hands queued frames to the driver, preserving order.
    ///
    /// On driver backpressure the frame stays queued for the next poll and
    /// the overrun is reported.
    fn flush<T: Transport>(&self, transport: &mut T) -> Result<(), Error> {
        loop {
            let frame = self.shared.lock(|cell| cell.borrow_mut().send.pop());
            let Some(frame) = frame else {
                return Ok(());
            };
            match transport.send(&frame) {
                Ok(()) => {}
                Err(error) => {
                    self.shared
                        .lock(|cell| cell.borrow_mut().send.push_front(frame))?;
                    return Err(map_transport_error(error));
                }
            }
        }
    }
}

fn sample<C: ChainPort>(chain: &C) -> LineSample {
    LineSample {
        upstream_connected: chain.upstream_connected(),
        downstream_connected: chain.downstream_connected(),
        upstream_daisy: chain.upstream_daisy(),
    }
}

fn map_transport_error(error: TransportError) -> Error {
    match error {
        TransportError::QueueFull => Error::new(ErrorKind::Overrun, "transmit channel full"),
        TransportError::ChannelDown => Error::new(ErrorKind::Impossible, "transmit channel down"),
    }
}

/// Queues every segment of one message, all-or-nothing.
fn queue_scattered(
    send: &mut Fifo<Frame, SEND_QUEUE_DEPTH>,
    frame_type: FrameType,
    id: TransactionId,
    sender: Address,
    receiver: Address,
    payload: &[u8],
) -> Result<(), Error> {
    if SEND_QUEUE_DEPTH - send.len() < Scatter::segment_count(payload.len()) {
        return Err(Error::new(
            ErrorKind::Overrun,
            "transmit queue cannot take the message",
        ));
    }
    for frame in Scatter::new(frame_type, id, sender, receiver, payload) {
        unwrap!(send.push(frame));
    }
    Ok(())
}
