//! In-memory transport for tests and local simulations.
//!
//! A [`MemoryTransport`] made with [`MemoryTransport::new`] stands alone: every send
//! succeeds unless told to fail, and inbound traffic is scripted by the test.
//! Endpoints taken from one [`MemoryNetwork`] deliver frames to each other, so a
//! whole swarm can run single-threaded. Sends to ids that are not on the network fail.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use crate::identity::PeerId;
use crate::protocol::PROTOCOL_CHANNEL;
use crate::wire::MAX_FRAME_LEN;
use crate::transport::{
    Credentials, Received, SendMode, Transport, TransportError, TransportEvent,
};

/// One recorded outbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    pub to: PeerId,
    pub bytes: Vec<u8>,
    pub mode: SendMode,
    pub channel: u8,
}

#[derive(Debug)]
struct Inbound {
    channel: u8,
    received: Received,
}

#[derive(Debug, Default)]
struct Hub {
    /// Network hubs only accept sends to registered endpoints.
    closed: bool,
    members: BTreeSet<PeerId>,
    inboxes: HashMap<PeerId, VecDeque<Inbound>>,
    aliases: BTreeMap<String, PeerId>,
}

/// Shared medium for several [`MemoryTransport`] endpoints.
#[derive(Debug, Clone)]
pub struct MemoryNetwork {
    hub: Rc<RefCell<Hub>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self {
            hub: Rc::new(RefCell::new(Hub {
                closed: true,
                ..Hub::default()
            })),
        }
    }

    /// New endpoint that will identify as `id` once initialized.
    pub fn endpoint(&self, id: PeerId) -> MemoryTransport {
        self.hub.borrow_mut().members.insert(id);
        MemoryTransport::on_hub(self.hub.clone(), id, false)
    }

    /// Whether `id` still has undelivered traffic.
    pub fn has_pending(&self, id: PeerId) -> bool {
        self.hub
            .borrow()
            .inboxes
            .get(&id)
            .map(|q| !q.is_empty())
            .unwrap_or(false)
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// Scriptable [`Transport`] that records what the client does with it.
#[derive(Debug)]
pub struct MemoryTransport {
    hub: Rc<RefCell<Hub>>,
    id: PeerId,
    initialized: bool,
    assigned: bool,
    defer_assignment: bool,
    fail_init: bool,
    failing: BTreeSet<PeerId>,
    sent: Vec<SentFrame>,
    disconnected: Vec<PeerId>,
    events: VecDeque<TransportEvent>,
    waits: u32,
    max_frame_len: usize,
}

impl MemoryTransport {
    /// Standalone endpoint, already initialized with local id `id`.
    pub fn new(id: PeerId) -> Self {
        let mut t = Self::on_hub(Rc::new(RefCell::new(Hub::default())), id, true);
        t.assigned = true;
        t
    }

    fn on_hub(hub: Rc<RefCell<Hub>>, id: PeerId, initialized: bool) -> Self {
        Self {
            hub,
            id,
            initialized,
            assigned: false,
            defer_assignment: false,
            fail_init: false,
            failing: BTreeSet::new(),
            sent: Vec::new(),
            disconnected: Vec::new(),
            events: VecDeque::new(),
            waits: 0,
            max_frame_len: MAX_FRAME_LEN,
        }
    }

    /// Keep the local id invalid after `init` until [`assign_local_id`](Self::assign_local_id).
    pub fn with_deferred_id(mut self) -> Self {
        self.defer_assignment = true;
        self.assigned = false;
        self
    }

    /// Refuse frames longer than `len`.
    pub fn with_max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }

    /// Make `init` fail.
    pub fn with_failing_init(mut self) -> Self {
        self.fail_init = true;
        self.initialized = false;
        self.assigned = false;
        self
    }

    /// Hand out the local id now, as the signaling service eventually would.
    pub fn assign_local_id(&mut self) {
        if !self.assigned {
            self.assigned = true;
            self.events.push_back(TransportEvent::PeerAssigned(self.id));
        }
    }

    /// Every later send to `peer` fails.
    pub fn fail_sends_to(&mut self, peer: PeerId) {
        self.failing.insert(peer);
    }

    pub fn restore_sends_to(&mut self, peer: PeerId) {
        self.failing.remove(&peer);
    }

    /// Queue a frame from `from` on the protocol channel.
    pub fn push_inbound(&mut self, from: PeerId, bytes: Vec<u8>) {
        self.push_inbound_on(PROTOCOL_CHANNEL, from, bytes);
    }

    pub fn push_inbound_on(&mut self, channel: u8, from: PeerId, bytes: Vec<u8>) {
        self.enqueue(channel, Received::Frame { from, bytes });
    }

    /// Queue a receive failure attributed to `from`.
    pub fn push_failure(&mut self, from: PeerId) {
        self.enqueue(PROTOCOL_CHANNEL, Received::Failed { from });
    }

    pub fn push_event(&mut self, event: TransportEvent) {
        self.events.push_back(event);
    }

    pub fn sent(&self) -> &[SentFrame] {
        &self.sent
    }

    pub fn clear_sent(&mut self) {
        self.sent.clear();
    }

    /// Peers passed to `disconnect`, in call order.
    pub fn disconnected(&self) -> &[PeerId] {
        &self.disconnected
    }

    pub fn waits(&self) -> u32 {
        self.waits
    }

    fn enqueue(&self, channel: u8, received: Received) {
        self.hub
            .borrow_mut()
            .inboxes
            .entry(self.id)
            .or_default()
            .push_back(Inbound { channel, received });
    }

    fn deliver(&self, to: PeerId, channel: u8, received: Received) {
        self.hub
            .borrow_mut()
            .inboxes
            .entry(to)
            .or_default()
            .push_back(Inbound { channel, received });
    }
}

impl Transport for MemoryTransport {
    fn init(&mut self, _server: &str, _credentials: &Credentials) -> Result<(), TransportError> {
        if self.fail_init {
            return Err(TransportError::Init("memory transport set to fail".into()));
        }
        self.initialized = true;
        self.events.push_back(TransportEvent::Connected);
        if !self.defer_assignment {
            self.assigned = true;
            self.events.push_back(TransportEvent::PeerAssigned(self.id));
        }
        Ok(())
    }

    fn local_peer_id(&self) -> PeerId {
        if self.initialized && self.assigned {
            self.id
        } else {
            PeerId::INVALID
        }
    }

    fn resolve_alias(&mut self, name: &str) -> PeerId {
        self.hub
            .borrow()
            .aliases
            .get(name)
            .copied()
            .unwrap_or(PeerId::INVALID)
    }

    fn register_alias(&mut self, name: &str) -> Result<(), TransportError> {
        let mut hub = self.hub.borrow_mut();
        match hub.aliases.get(name).copied() {
            Some(owner) if owner != self.id => {
                let reason = format!("alias taken by peer {}", owner);
                self.events.push_back(TransportEvent::AliasRegisterFailed {
                    name: name.to_string(),
                    reason: reason.clone(),
                });
                Err(TransportError::Alias(reason))
            }
            _ => {
                hub.aliases.insert(name.to_string(), self.id);
                self.events
                    .push_back(TransportEvent::AliasRegistered(name.to_string()));
                Ok(())
            }
        }
    }

    fn unregister_alias(&mut self, name: Option<&str>) -> Result<(), TransportError> {
        let mut hub = self.hub.borrow_mut();
        let me = self.id;
        match name {
            Some(n) => {
                if hub.aliases.get(n) == Some(&me) {
                    hub.aliases.remove(n);
                    Ok(())
                } else {
                    Err(TransportError::Alias(format!("alias {} is not ours", n)))
                }
            }
            None => {
                hub.aliases.retain(|_, owner| *owner != me);
                Ok(())
            }
        }
    }

    fn lookup_alias(&mut self, name: &str) {
        let peer = self.resolve_alias(name);
        let event = if peer.is_valid() {
            TransportEvent::AliasResolved {
                name: name.to_string(),
                peer,
            }
        } else {
            TransportEvent::AliasNotFound(name.to_string())
        };
        self.events.push_back(event);
    }

    fn send(
        &mut self,
        peer: PeerId,
        bytes: &[u8],
        mode: SendMode,
        channel: u8,
    ) -> Result<usize, TransportError> {
        if !self.initialized {
            return Err(TransportError::NotInitialized);
        }
        if bytes.len() > self.max_frame_len {
            return Err(TransportError::SendFailed {
                peer,
                reason: format!("frame of {} bytes over limit", bytes.len()),
            });
        }
        if self.failing.contains(&peer) {
            return Err(TransportError::SendFailed {
                peer,
                reason: "scripted failure".into(),
            });
        }
        let closed = self.hub.borrow().closed;
        if closed {
            if !self.hub.borrow().members.contains(&peer) {
                self.events.push_back(TransportEvent::PeerNotFound(peer));
                return Err(TransportError::UnknownPeer(peer));
            }
            self.deliver(
                peer,
                channel,
                Received::Frame {
                    from: self.id,
                    bytes: bytes.to_vec(),
                },
            );
        }
        self.sent.push(SentFrame {
            to: peer,
            bytes: bytes.to_vec(),
            mode,
            channel,
        });
        Ok(bytes.len())
    }

    fn peek(&mut self, channel: u8) -> Option<usize> {
        let hub = self.hub.borrow();
        let inbox = hub.inboxes.get(&self.id)?;
        let size = inbox
            .iter()
            .find(|i| i.channel == channel)
            .map(|i| match &i.received {
                Received::Frame { bytes, .. } => bytes.len(),
                _ => 0,
            });
        size
    }

    fn receive(&mut self, channel: u8) -> Received {
        let mut hub = self.hub.borrow_mut();
        let Some(inbox) = hub.inboxes.get_mut(&self.id) else {
            return Received::Empty;
        };
        match inbox.iter().position(|i| i.channel == channel) {
            Some(pos) => inbox
                .remove(pos)
                .map(|i| i.received)
                .unwrap_or(Received::Empty),
            None => Received::Empty,
        }
    }

    fn disconnect(&mut self, peer: PeerId) -> bool {
        self.disconnected.push(peer);
        let closed = self.hub.borrow().closed;
        if closed && self.hub.borrow().members.contains(&peer) {
            // the remote side sees a receive failure from us
            self.deliver(peer, PROTOCOL_CHANNEL, Received::Failed { from: self.id });
            return true;
        }
        !closed
    }

    fn wait(&mut self, _timeout: Duration) -> bool {
        self.waits += 1;
        self.hub
            .borrow()
            .inboxes
            .get(&self.id)
            .map(|q| !q.is_empty())
            .unwrap_or(false)
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        self.events.pop_front()
    }

    fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }
}
