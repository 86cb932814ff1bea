//! Daisy-chain addressing state machine
//!
//! Assigns addresses 1..N along the physical chain and determines the bus
//! size, without central coordination. The machine is stepped from the poll
//! loop and fed with received addressing events; it never blocks and never
//! touches hardware itself. Every transition returns a list of [`Action`]s
//! (bus emissions, daisy line writes, filter programming) that the engine
//! performs outside the critical section.
//!
//! The algorithm, address 0 being broadcast:
//!
//! 1. Any node requests addressing by broadcasting `AddressingRequired`.
//!    Nodes already addressing ignore further requests.
//! 2. The node with no upstream neighbor self-assigns address 1 and, when a
//!    successor exists, broadcasts `AddressingStart`.
//! 3. The current token holder gates exactly one successor by activating its
//!    downstream daisy line, then broadcasts `AddressingNext` carrying its
//!    own address in the sender field.
//! 4. An unaddressed node whose upstream daisy line is active takes
//!    `sender address + 1`, broadcasts `AddressingSuccess`, and becomes the
//!    token holder.
//! 5. A token holder with no successor broadcasts `AddressingFinished`; its
//!    own address in the sender field is the final bus size. Every node
//!    records it and transitions to Ready.
//!
//! Mutual exclusion: only the one node gated by its predecessor's daisy line
//! reacts to `AddressingNext`, so a single token travels down the chain and
//! no address is ever assigned twice. The gate is judged by the line level
//! at the moment the frame arrived; a `Next` received before the node was
//! gated stays dead even if the daisy line comes up afterwards.

use crate::core::{Address, Error, ErrorKind, NodeState, TransactionId};

/// `ADDRESSING_START` event id.
pub const EVENT_ADDRESSING_START: TransactionId = TransactionId::new(0x00);
/// `ADDRESSING_SUCCESS` event id.
pub const EVENT_ADDRESSING_SUCCESS: TransactionId = TransactionId::new(0x01);
/// `ADDRESSING_NEXT` event id.
pub const EVENT_ADDRESSING_NEXT: TransactionId = TransactionId::new(0x02);
/// `ADDRESSING_FINISHED` event id.
pub const EVENT_ADDRESSING_FINISHED: TransactionId = TransactionId::new(0x03);
/// `ADDRESSING_REQUIRED` event id.
pub const EVENT_ADDRESSING_REQUIRED: TransactionId = TransactionId::new(0x04);
/// `ONLINE` event id, broadcast once after the first successful addressing.
pub const EVENT_ONLINE: TransactionId = TransactionId::new(0x10);

/// Whether an event id is reserved for the addressing protocol itself.
pub fn is_reserved(id: TransactionId) -> bool {
    AddressingEvent::from_id(id).is_some()
}

/// The addressing events travelling as zero-payload broadcast event frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressingEvent {
    Start,
    Success,
    Next,
    Finished,
    Required,
}

impl AddressingEvent {
    pub fn from_id(id: TransactionId) -> Option<Self> {
        match id {
            EVENT_ADDRESSING_START => Some(Self::Start),
            EVENT_ADDRESSING_SUCCESS => Some(Self::Success),
            EVENT_ADDRESSING_NEXT => Some(Self::Next),
            EVENT_ADDRESSING_FINISHED => Some(Self::Finished),
            EVENT_ADDRESSING_REQUIRED => Some(Self::Required),
            _ => None,
        }
    }

    pub fn id(self) -> TransactionId {
        match self {
            Self::Start => EVENT_ADDRESSING_START,
            Self::Success => EVENT_ADDRESSING_SUCCESS,
            Self::Next => EVENT_ADDRESSING_NEXT,
            Self::Finished => EVENT_ADDRESSING_FINISHED,
            Self::Required => EVENT_ADDRESSING_REQUIRED,
        }
    }
}

/// Snapshot of the chain lines
///
/// [`Machine::step`] gets a sample taken at poll time; [`Machine::on_event`]
/// gets the sample taken when the event frame arrived.
#[derive(Debug, Clone, Copy)]
pub struct LineSample {
    pub upstream_connected: bool,
    pub downstream_connected: bool,
    pub upstream_daisy: bool,
}

/// Side effect requested by a machine transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Broadcast the addressing event with an empty payload.
    Emit(AddressingEvent),
    /// Drive the downstream daisy line.
    SetDownstreamDaisy(bool),
    /// Program the receiver filters for the newly assigned address.
    SetFilter(Address),
    /// Broadcast the one-time `ONLINE` event.
    Online,
}

/// Actions produced by a single machine call, performed in order.
pub type Actions = heapless::Vec<Action, 6>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Not addressing.
    Idle,
    /// Entered addressing; the first poll decides the role.
    Claiming,
    /// Waiting for the predecessor to gate this node and send `Next`.
    WaitingForToken,
    /// Gated the successor; waiting for its `Success`.
    WaitingForSuccess,
    /// Addressed; waiting for `Finished` from the end of the chain.
    WaitingForFinished,
}

/// The per-node addressing state machine
///
/// Owns the node state, the assigned address, and the recorded bus size.
#[derive(Debug)]
pub struct Machine {
    state: NodeState,
    phase: Phase,
    address: Address,
    bus_size: u8,
    online_sent: bool,
    /// Connection sense levels seen by the previous step, for
    /// topology-change detection.
    last_connections: Option<(bool, bool)>,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine {
    pub fn new() -> Self {
        Self {
            state: NodeState::Uninitialized,
            phase: Phase::Idle,
            address: Address::BROADCAST,
            bus_size: 0,
            online_sent: false,
            last_connections: None,
        }
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    /// The assigned node address; broadcast (0) while unaddressed.
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn bus_size(&self) -> u8 {
        self.bus_size
    }

    /// Marks the engine as initializing, before the first addressing run.
    pub fn set_initializing(&mut self) {
        if self.state == NodeState::Uninitialized {
            self.state = NodeState::Initializing;
        }
    }

    /// Enters addressing and broadcasts `AddressingRequired`.
    ///
    /// Idempotent: a node already addressing ignores further requests.
    pub fn request(&mut self) -> Actions {
        let mut actions = Actions::new();
        if self.state == NodeState::Addressing {
            return actions;
        }

        debug!("addressing requested");
        self.state = NodeState::Addressing;
        self.phase = Phase::Claiming;
        self.address = Address::BROADCAST;
        unwrap!(actions.push(Action::SetDownstreamDaisy(false)));
        unwrap!(actions.push(Action::Emit(AddressingEvent::Required)));
        actions
    }

    /// Advances the machine from the poll loop.
    ///
    /// Watches the connection sense lines: a neighbor appearing or vanishing
    /// while the node is ready triggers a fresh addressing run. During
    /// addressing this resolves the node's role once per run: the node
    /// without an upstream neighbor claims address 1 and starts handing out
    /// addresses; everyone else waits to be gated.
    pub fn step(&mut self, lines: LineSample) -> Result<Actions, Error> {
        let connections = (lines.upstream_connected, lines.downstream_connected);
        let changed = self
            .last_connections
            .is_some_and(|previous| previous != connections);
        self.last_connections = Some(connections);
        if changed && self.state == NodeState::Ready {
            info!("connection change detected");
            return Ok(self.request());
        }

        let mut actions = Actions::new();
        if self.state != NodeState::Addressing || self.phase != Phase::Claiming {
            return Ok(actions);
        }

        if lines.upstream_connected {
            self.phase = Phase::WaitingForToken;
            return Ok(actions);
        }

        // No predecessor: this is the first node in the chain.
        self.address = unwrap!(Address::new(1));
        if lines.downstream_connected {
            debug!("claimed address 1, gating successor");
            unwrap!(actions.push(Action::Emit(AddressingEvent::Start)));
            self.gate_successor(&mut actions);
        } else {
            // Only node on the bus.
            self.finish_as_last(&mut actions);
        }
        Ok(actions)
    }

    /// Feeds one received addressing event into the machine.
    pub fn on_event(
        &mut self,
        event: AddressingEvent,
        sender: Address,
        lines: LineSample,
    ) -> Result<Actions, Error> {
        let mut actions = Actions::new();
        match event {
            AddressingEvent::Required => {
                if self.state == NodeState::Ready {
                    return Ok(self.request());
                }
            }

            AddressingEvent::Next => {
                // Only the node gated by its predecessor's daisy line may
                // take the token; this is the mutual exclusion that keeps
                // addresses unique.
                if self.state == NodeState::Addressing
                    && self.address.is_broadcast()
                    && lines.upstream_connected
                    && lines.upstream_daisy
                {
                    self.address = sender.successor().ok_or(Error::new(
                        ErrorKind::Range,
                        "address space exhausted",
                    ))?;
                    debug!("assigned address {}", self.address.into_u8());
                    unwrap!(actions.push(Action::Emit(AddressingEvent::Success)));
                    if lines.downstream_connected {
                        self.gate_successor(&mut actions);
                    } else {
                        // End of the chain: this address is the bus size.
                        self.finish_as_last(&mut actions);
                    }
                }
            }

            AddressingEvent::Success => {
                if self.state == NodeState::Addressing && self.phase == Phase::WaitingForSuccess {
                    self.phase = Phase::WaitingForFinished;
                }
            }

            AddressingEvent::Finished => {
                if self.state == NodeState::Addressing {
                    if self.address.is_broadcast() {
                        // Addressing completed without this node receiving an
                        // address; its segment of the chain must run again.
                        warn!("addressing finished without an address, re-requesting");
                        self.state = NodeState::Ready;
                        return Ok(self.request());
                    }
                    self.bus_size = sender.into_u8();
                    self.become_ready(&mut actions);
                }
            }

            // Informational only.
            AddressingEvent::Start => {}
        }
        Ok(actions)
    }

    fn gate_successor(&mut self, actions: &mut Actions) {
        self.phase = Phase::WaitingForSuccess;
        unwrap!(actions.push(Action::SetDownstreamDaisy(true)));
        unwrap!(actions.push(Action::Emit(AddressingEvent::Next)));
    }

    fn finish_as_last(&mut self, actions: &mut Actions) {
        self.bus_size = self.address.into_u8();
        unwrap!(actions.push(Action::Emit(AddressingEvent::Finished)));
        self.become_ready(actions);
    }

    fn become_ready(&mut self, actions: &mut Actions) {
        self.state = NodeState::Ready;
        self.phase = Phase::Idle;
        unwrap!(actions.push(Action::SetDownstreamDaisy(false)));
        unwrap!(actions.push(Action::SetFilter(self.address)));
        if !self.online_sent {
            self.online_sent = true;
            unwrap!(actions.push(Action::Online));
        }
        info!(
            "addressing finished: address {}, bus size {}",
            self.address.into_u8(),
            self.bus_size
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(upstream: bool, downstream: bool, daisy: bool) -> LineSample {
        LineSample {
            upstream_connected: upstream,
            downstream_connected: downstream,
            upstream_daisy: daisy,
        }
    }

    fn addr(value: u8) -> Address {
        Address::new(value).unwrap()
    }

    #[test]
    fn test_request_is_idempotent() {
        let mut machine = Machine::new();
        machine.set_initializing();
        let actions = machine.request();
        assert!(actions.contains(&Action::Emit(AddressingEvent::Required)));
        assert!(machine.request().is_empty());
        assert_eq!(machine.state(), NodeState::Addressing);
    }

    #[test]
    fn test_lone_node_self_assigns() {
        let mut machine = Machine::new();
        machine.set_initializing();
        machine.request();

        let actions = machine.step(lines(false, false, false)).unwrap();
        assert_eq!(machine.state(), NodeState::Ready);
        assert_eq!(machine.address(), addr(1));
        assert_eq!(machine.bus_size(), 1);
        assert!(actions.contains(&Action::Emit(AddressingEvent::Finished)));
        assert!(actions.contains(&Action::SetFilter(addr(1))));
        assert!(actions.contains(&Action::Online));
        assert!(!actions.contains(&Action::Emit(AddressingEvent::Start)));
        assert!(!actions.contains(&Action::Emit(AddressingEvent::Next)));
    }

    #[test]
    fn test_first_node_gates_successor() {
        let mut machine = Machine::new();
        machine.set_initializing();
        machine.request();

        let actions = machine.step(lines(false, true, false)).unwrap();
        assert_eq!(machine.address(), addr(1));
        assert_eq!(machine.state(), NodeState::Addressing);
        assert_eq!(
            &actions[..],
            &[
                Action::Emit(AddressingEvent::Start),
                Action::SetDownstreamDaisy(true),
                Action::Emit(AddressingEvent::Next),
            ]
        );
    }

    #[test]
    fn test_gated_node_takes_token() {
        let mut machine = Machine::new();
        machine.set_initializing();
        machine.request();
        machine.step(lines(true, false, false)).unwrap();

        // Not gated yet: the event is not for us.
        let actions = machine
            .on_event(AddressingEvent::Next, addr(1), lines(true, false, false))
            .unwrap();
        assert!(actions.is_empty());
        assert!(machine.address().is_broadcast());

        // Gated: take address 2 and finish as the last node.
        let actions = machine
            .on_event(AddressingEvent::Next, addr(1), lines(true, false, true))
            .unwrap();
        assert_eq!(machine.address(), addr(2));
        assert_eq!(machine.bus_size(), 2);
        assert_eq!(machine.state(), NodeState::Ready);
        assert!(actions.contains(&Action::Emit(AddressingEvent::Success)));
        assert!(actions.contains(&Action::Emit(AddressingEvent::Finished)));
    }

    #[test]
    fn test_addressed_node_ignores_next() {
        let mut machine = Machine::new();
        machine.set_initializing();
        machine.request();
        machine.step(lines(false, true, false)).unwrap();
        assert_eq!(machine.address(), addr(1));

        // A later Next for some other hop must not re-address this node.
        let actions = machine
            .on_event(AddressingEvent::Next, addr(2), lines(false, true, true))
            .unwrap();
        assert!(actions.is_empty());
        assert_eq!(machine.address(), addr(1));
    }

    #[test]
    fn test_finished_records_bus_size() {
        let mut machine = Machine::new();
        machine.set_initializing();
        machine.request();
        machine.step(lines(false, true, false)).unwrap();
        machine
            .on_event(AddressingEvent::Success, addr(2), lines(false, true, false))
            .unwrap();

        let actions = machine
            .on_event(AddressingEvent::Finished, addr(5), lines(false, true, false))
            .unwrap();
        assert_eq!(machine.state(), NodeState::Ready);
        assert_eq!(machine.bus_size(), 5);
        assert!(actions.contains(&Action::SetDownstreamDaisy(false)));
    }

    #[test]
    fn test_required_reenters_from_ready() {
        let mut machine = Machine::new();
        machine.set_initializing();
        machine.request();
        machine.step(lines(false, false, false)).unwrap();
        assert_eq!(machine.state(), NodeState::Ready);

        let actions = machine
            .on_event(AddressingEvent::Required, addr(2), lines(false, true, false))
            .unwrap();
        assert_eq!(machine.state(), NodeState::Addressing);
        assert!(machine.address().is_broadcast());
        assert!(actions.contains(&Action::Emit(AddressingEvent::Required)));
    }

    #[test]
    fn test_connection_change_triggers_readdressing() {
        let mut machine = Machine::new();
        machine.set_initializing();
        machine.request();
        machine.step(lines(false, false, false)).unwrap();
        assert_eq!(machine.state(), NodeState::Ready);

        // Same levels: nothing to do.
        assert!(machine.step(lines(false, false, false)).unwrap().is_empty());

        // A successor got plugged in.
        let actions = machine.step(lines(false, true, false)).unwrap();
        assert_eq!(machine.state(), NodeState::Addressing);
        assert!(actions.contains(&Action::Emit(AddressingEvent::Required)));
    }

    #[test]
    fn test_finished_without_address_rerequests() {
        let mut machine = Machine::new();
        machine.set_initializing();
        machine.request();
        machine.step(lines(true, false, false)).unwrap();

        // The run finished while this node was still waiting for the token;
        // its chain segment must be addressed again.
        let actions = machine
            .on_event(AddressingEvent::Finished, addr(3), lines(true, false, false))
            .unwrap();
        assert_eq!(machine.state(), NodeState::Addressing);
        assert!(machine.address().is_broadcast());
        assert!(actions.contains(&Action::Emit(AddressingEvent::Required)));
    }

    #[test]
    fn test_online_sent_only_once() {
        let mut machine = Machine::new();
        machine.set_initializing();
        machine.request();
        let first = machine.step(lines(false, false, false)).unwrap();
        assert!(first.contains(&Action::Online));

        machine.request();
        let second = machine.step(lines(false, false, false)).unwrap();
        assert!(!second.contains(&Action::Online));
    }
}
