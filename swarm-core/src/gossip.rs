//! Hello gossip: spreads peer knowledge and completes the pending -> connected handshake.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::identity::PeerId;
use crate::peers::PeerSet;
use crate::protocol::{HelloPeer, Message, GOSSIP_INTERVAL, PROTOCOL_CHANNEL};
use crate::transport::{SendMode, Transport, TransportError};
use crate::wire::{self, FrameEncodeError};

/// Sending a hello failed. Either way the caller should evict the peer.
#[derive(Debug, thiserror::Error)]
pub enum GossipError {
    #[error("failed to encode hello: {0}")]
    Encode(#[from] FrameEncodeError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Drives the periodic hello round. Holds only timing state; the peer table and the
/// transport are lent in by the client loop on every call.
#[derive(Debug)]
pub struct GossipEngine {
    interval: Duration,
    last_gossip: Option<Instant>,
}

impl GossipEngine {
    pub fn new() -> Self {
        Self::with_interval(GOSSIP_INTERVAL)
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            last_gossip: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_gossip(&self) -> Option<Instant> {
        self.last_gossip
    }

    /// Send our known peers to `to`, reliably, on the protocol channel.
    pub fn send_hello<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        peers: &PeerSet,
        to: PeerId,
        as_response: bool,
    ) -> Result<(), GossipError> {
        debug!(peer = %to, response = as_response, "sending hello");
        let msg = Message::PeerHello(HelloPeer {
            peers: peers.snapshot_for_gossip(),
            is_response: as_response,
        });
        let frame = wire::encode_frame(&msg)?;
        transport.send(to, &frame, SendMode::Reliable, PROTOCOL_CHANNEL)?;
        Ok(())
    }

    /// Handle a hello from `sender`: finish its handshake, learn the peers it lists,
    /// and answer once if the hello was unsolicited.
    ///
    /// Returns `Ok(true)` when a reply was sent. An error means the reply could not
    /// be delivered and `sender` should be evicted.
    pub fn on_hello_received<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        peers: &mut PeerSet,
        sender: PeerId,
        hello: &HelloPeer,
    ) -> Result<bool, GossipError> {
        debug!(
            peer = %sender,
            response = hello.is_response,
            listed = hello.peers.len(),
            "received hello"
        );
        peers.mark_connected(sender);
        for &id in &hello.peers {
            peers.note_candidate(id);
        }
        if hello.is_response {
            return Ok(false);
        }
        self.send_hello(transport, peers, sender, true)?;
        Ok(true)
    }

    /// True when a gossip round is due at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_gossip {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    /// Hello every pending peer if the interval elapsed. Connected peers are not
    /// re-helloed. Returns the peers whose hello failed; the round counts as done
    /// even when every send fails.
    pub fn tick<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        peers: &PeerSet,
        now: Instant,
    ) -> Vec<PeerId> {
        if !self.is_due(now) {
            return Vec::new();
        }
        self.last_gossip = Some(now);
        let mut failed = Vec::new();
        for peer in peers.pending_peers() {
            if let Err(e) = self.send_hello(transport, peers, peer, false) {
                warn!(peer = %peer, error = %e, "hello failed");
                failed.push(peer);
            }
        }
        failed
    }
}

impl Default for GossipEngine {
    fn default() -> Self {
        Self::new()
    }
}
