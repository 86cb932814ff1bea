//! Simulated chain and bus
//!
//! Models a row of nodes wired point-to-point: each inter-node link carries
//! the connection sense line, the daisy handshake line, and the bus wiring
//! itself. Disconnecting a link therefore splits the bus into independent
//! segments, exactly like unplugging a module does.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use knabbercan::chain::ChainPort;
use knabbercan::core::Address;
use knabbercan::format::FrameId;
use knabbercan::frame::Frame;
use knabbercan::time::{Duration, Instant};
use knabbercan::transport::{Transport, TransportError};
use knabbercan::Node;

pub type TestNode<'h> = Node<'h, CriticalSectionRawMutex>;

pub fn ts(us: u64) -> Instant {
    Instant::MIN + Duration::from_micros(us)
}

#[derive(Debug, Default)]
pub struct Link {
    pub connected: bool,
    /// Level of the daisy line, driven by the upstream side.
    pub daisy: bool,
}

/// Chain lines of one node, wired to its neighbor links.
pub struct SimPort {
    upstream: Option<Rc<RefCell<Link>>>,
    downstream: Option<Rc<RefCell<Link>>>,
}

impl ChainPort for SimPort {
    fn upstream_connected(&self) -> bool {
        self.upstream
            .as_ref()
            .is_some_and(|link| link.borrow().connected)
    }

    fn downstream_connected(&self) -> bool {
        self.downstream
            .as_ref()
            .is_some_and(|link| link.borrow().connected)
    }

    fn upstream_daisy(&self) -> bool {
        self.upstream.as_ref().is_some_and(|link| {
            let link = link.borrow();
            link.connected && link.daisy
        })
    }

    fn set_downstream_daisy(&mut self, active: bool) {
        if let Some(link) = &self.downstream {
            link.borrow_mut().daisy = active;
        }
    }
}

#[derive(Default)]
pub struct BusState {
    pending: VecDeque<(usize, Frame)>,
    /// Everything ever sent, as (sender index, frame).
    pub log: Vec<(usize, Frame)>,
}

/// Transmit side of one node's CAN driver.
pub struct SimTx {
    index: usize,
    bus: Rc<RefCell<BusState>>,
    /// Addresses passed to `set_filter`, in order.
    pub filters: Vec<Address>,
}

impl Transport for SimTx {
    fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let mut bus = self.bus.borrow_mut();
        bus.pending.push_back((self.index, *frame));
        bus.log.push((self.index, *frame));
        Ok(())
    }

    fn set_filter(&mut self, address: Address) -> Result<(), TransportError> {
        self.filters.push(address);
        Ok(())
    }
}

pub struct Harness {
    bus: Rc<RefCell<BusState>>,
    links: Vec<Rc<RefCell<Link>>>,
    pub ports: Vec<SimPort>,
    pub txs: Vec<SimTx>,
}

impl Harness {
    /// A chain of `n` nodes with every link plugged in.
    pub fn new(n: usize) -> Self {
        let bus = Rc::new(RefCell::new(BusState::default()));
        let links: Vec<_> = (0..n.saturating_sub(1))
            .map(|_| {
                Rc::new(RefCell::new(Link {
                    connected: true,
                    daisy: false,
                }))
            })
            .collect();

        let ports = (0..n)
            .map(|i| SimPort {
                upstream: i.checked_sub(1).map(|up| links[up].clone()),
                downstream: links.get(i).cloned(),
            })
            .collect();
        let txs = (0..n)
            .map(|index| SimTx {
                index,
                bus: bus.clone(),
                filters: Vec::new(),
            })
            .collect();

        Self {
            bus,
            links,
            ports,
            txs,
        }
    }

    /// Forces the daisy level of the link between node `index` and
    /// node `index + 1`, as if the upstream side drove it.
    pub fn set_daisy(&self, index: usize, active: bool) {
        self.links[index].borrow_mut().daisy = active;
    }

    /// Plugs or unplugs the link between node `index` and node `index + 1`.
    pub fn set_link(&self, index: usize, connected: bool) {
        let mut link = self.links[index].borrow_mut();
        link.connected = connected;
        if !connected {
            link.daisy = false;
        }
    }

    /// Whether the bus segments of two nodes are joined.
    pub fn reachable(&self, a: usize, b: usize) -> bool {
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        self.links[low..high]
            .iter()
            .all(|link| link.borrow().connected)
    }

    pub fn take_pending(&self) -> Vec<(usize, Frame)> {
        self.bus.borrow_mut().pending.drain(..).collect()
    }

    /// Complete logged frames whose transaction id matches.
    pub fn sent_frames(&self, transaction: u8) -> Vec<(usize, Frame)> {
        self.bus
            .borrow()
            .log
            .iter()
            .filter(|(_, frame)| FrameId::decode(frame.id).transaction.into_u8() == transaction)
            .cloned()
            .collect()
    }

    /// Frames in the log whose transaction id matches, as (sender, header).
    pub fn sent_with_transaction(&self, transaction: u8) -> Vec<(usize, FrameId)> {
        self.bus
            .borrow()
            .log
            .iter()
            .map(|(src, frame)| (*src, FrameId::decode(frame.id)))
            .filter(|(_, id)| id.transaction.into_u8() == transaction)
            .collect()
    }
}

/// Runs `rounds` of poll-then-deliver over all nodes.
///
/// Returns the instant after the last round; a later `settle` call should
/// continue from it.
pub fn settle(
    harness: &mut Harness,
    nodes: &[&TestNode],
    rounds: usize,
    start: Instant,
) -> Instant {
    let mut now = start;
    for _ in 0..rounds {
        for (i, node) in nodes.iter().enumerate() {
            node.poll(&mut harness.txs[i], &mut harness.ports[i], now)
                .unwrap();
        }
        for (src, frame) in harness.take_pending() {
            for (dst, node) in nodes.iter().enumerate() {
                if dst != src && harness.reachable(src, dst) {
                    node.accept_frame(&harness.ports[dst], &frame, now).unwrap();
                }
            }
        }
        now = now + Duration::from_micros(1_000);
    }
    now
}
