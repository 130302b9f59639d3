//! Client loop: single owner of all protocol state.
//!
//! The loop waits on the transport, drains inbound frames, runs the gossip round and
//! evicts every peer that failed during the iteration. User input reaches it only as
//! [`Command`]s applied between iterations, so nothing here needs a lock.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::command::{Command, PeerTarget};
use crate::gossip::GossipEngine;
use crate::identity::PeerId;
use crate::peers::PeerSet;
use crate::protocol::{DEFAULT_WAIT_TIMEOUT, PROTOCOL_CHANNEL};
use crate::router::{ChatHandler, Dispatch, MessageRouter};
use crate::transport::{Credentials, Received, Transport, TransportError, TransportEvent};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Uninitialized,
    /// Transport is up but has not assigned our peer id yet; the loop only polls.
    AwaitingLocalId,
    Running,
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("transport init failed: {0}")]
    TransportInit(#[source] TransportError),
    #[error("client already started")]
    AlreadyStarted,
}

pub struct ClientLoop<T: Transport, H: ChatHandler> {
    transport: T,
    handler: H,
    state: LoopState,
    local_id: PeerId,
    peers: PeerSet,
    gossip: GossipEngine,
    router: MessageRouter,
    wait_timeout: Duration,
}

impl<T: Transport, H: ChatHandler> ClientLoop<T, H> {
    pub fn new(transport: T, handler: H) -> Self {
        Self {
            transport,
            handler,
            state: LoopState::Uninitialized,
            local_id: PeerId::INVALID,
            peers: PeerSet::new(),
            gossip: GossipEngine::new(),
            router: MessageRouter::new(),
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }

    /// Bound on how long one iteration blocks in `Transport::wait`.
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, LoopState::AwaitingLocalId | LoopState::Running)
    }

    pub fn local_id(&self) -> PeerId {
        self.local_id
    }

    pub fn peers(&self) -> &PeerSet {
        &self.peers
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Bring the transport up. On failure the session never runs.
    pub fn start(&mut self, server: &str, credentials: &Credentials) -> Result<(), ClientError> {
        if self.state != LoopState::Uninitialized {
            return Err(ClientError::AlreadyStarted);
        }
        self.transport
            .init(server, credentials)
            .map_err(ClientError::TransportInit)?;
        info!(server, "transport initialized, waiting for peer id");
        self.state = LoopState::AwaitingLocalId;
        Ok(())
    }

    /// Request shutdown. The current iteration, if any, completes first.
    pub fn stop(&mut self) {
        if self.state != LoopState::Stopped {
            info!("client loop stopping");
        }
        self.state = LoopState::Stopped;
    }

    /// Drive the loop until stopped, applying commands from `next_command` before
    /// every iteration.
    pub fn run(&mut self, mut next_command: impl FnMut() -> Option<Command>) {
        while self.is_running() {
            while let Some(cmd) = next_command() {
                self.handle_command(cmd);
            }
            if !self.is_running() {
                break;
            }
            self.iterate(Instant::now());
        }
    }

    /// One loop iteration at time `now`. Returns the state afterwards.
    pub fn iterate(&mut self, now: Instant) -> LoopState {
        if !self.is_running() {
            return self.state;
        }
        self.transport.wait(self.wait_timeout);

        let mut evictions = BTreeSet::new();
        self.drain_events(&mut evictions);

        if self.state == LoopState::AwaitingLocalId {
            let id = self.transport.local_peer_id();
            if !id.is_valid() {
                self.apply_evictions(evictions);
                return self.state;
            }
            info!(peer = %id, "local peer id assigned");
            self.local_id = id;
            self.peers.set_local(id);
            self.state = LoopState::Running;
        }

        self.drain_inbound(&mut evictions);
        evictions.extend(self.gossip.tick(&mut self.transport, &self.peers, now));
        self.apply_evictions(evictions);
        self.state
    }

    /// Apply one user command on the loop thread.
    pub fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect(target) => {
                if let Some(peer) = self.resolve(&target) {
                    self.peers.note_candidate(peer);
                }
            }
            Command::Disconnect(target) => {
                if let Some(peer) = self.resolve(&target) {
                    self.evict(peer);
                }
            }
            Command::Chat(text) => {
                match self
                    .router
                    .broadcast_chat(&mut self.transport, &self.peers, &text)
                {
                    Ok(failed) => self.apply_evictions(failed),
                    Err(e) => warn!(error = %e, "chat not sent"),
                }
            }
            Command::RegisterAlias(name) => {
                if let Err(e) = self.transport.register_alias(&name) {
                    warn!(alias = %name, error = %e, "alias registration failed");
                }
            }
            Command::UnregisterAlias(name) => {
                if let Err(e) = self.transport.unregister_alias(name.as_deref()) {
                    warn!(error = %e, "alias unregistration failed");
                }
            }
            Command::LookupAlias(name) => self.transport.lookup_alias(&name),
            Command::Quit => self.stop(),
        }
    }

    fn resolve(&mut self, target: &PeerTarget) -> Option<PeerId> {
        let peer = match target {
            PeerTarget::Id(id) => *id,
            PeerTarget::Alias(name) => self.transport.resolve_alias(name),
        };
        if !peer.is_valid() {
            warn!(peer = ?target, "no peer for target");
            return None;
        }
        Some(peer)
    }

    fn drain_events(&mut self, evictions: &mut BTreeSet<PeerId>) {
        while let Some(event) = self.transport.poll_event() {
            match event {
                TransportEvent::Connected => info!("p2p connected"),
                TransportEvent::PeerAssigned(peer) => debug!(peer = %peer, "peer assigned"),
                TransportEvent::PeerRejected(peer) => warn!(peer = %peer, "peer rejected"),
                TransportEvent::PeerNotFound(peer) => warn!(peer = %peer, "peer not found"),
                TransportEvent::PeerDisconnected(peer) => {
                    debug!(peer = %peer, "transport reported disconnect");
                    evictions.insert(peer);
                }
                TransportEvent::AliasResolved { name, peer } => {
                    info!(alias = %name, peer = %peer, "alias resolved")
                }
                TransportEvent::AliasNotFound(name) => warn!(alias = %name, "alias not found"),
                TransportEvent::AliasRegistered(name) => info!(alias = %name, "alias registered"),
                TransportEvent::AliasRegisterFailed { name, reason } => {
                    warn!(alias = %name, reason = %reason, "alias registration error")
                }
            }
        }
    }

    /// Receive until the channel is empty. A failure without a usable sender is
    /// treated like "nothing pending".
    fn drain_inbound(&mut self, evictions: &mut BTreeSet<PeerId>) {
        loop {
            match self.transport.receive(PROTOCOL_CHANNEL) {
                Received::Frame { from, bytes } => {
                    let outcome = self.router.dispatch(
                        &mut self.transport,
                        &mut self.peers,
                        &self.gossip,
                        &mut self.handler,
                        from,
                        &bytes,
                    );
                    if let Dispatch::Evict(peer) = outcome {
                        evictions.insert(peer);
                    }
                }
                Received::Failed { from } if from.is_valid() => {
                    debug!(peer = %from, "receive failed");
                    evictions.insert(from);
                }
                Received::Failed { .. } | Received::Empty => break,
            }
        }
    }

    fn apply_evictions(&mut self, peers: impl IntoIterator<Item = PeerId>) {
        for peer in peers {
            self.evict(peer);
        }
    }

    /// Drop `peer` from the table and tell the transport, if it was known. Unknown
    /// peers are left alone so two sides evicting each other settle after one round.
    fn evict(&mut self, peer: PeerId) {
        if self.peers.evict(peer) {
            info!(peer = %peer, "disconnecting peer");
            self.transport.disconnect(peer);
        }
    }
}
