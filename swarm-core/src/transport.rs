//! Transport seam: the peer-to-peer layer the client loop drives.
//!
//! The transport owns peer identity allocation, signaling and raw delivery on named
//! channels. Everything above it (gossip, chat, eviction) lives in this crate and
//! only talks to it through [`Transport`].

use std::time::Duration;

use crate::identity::PeerId;
use crate::wire::MAX_FRAME_LEN;

/// Delivery guarantee requested per send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    Reliable,
    Unreliable,
}

/// What the transport needs to join a swarm.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub token: String,
}

impl Credentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

/// Outcome of one receive call on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// A complete frame from `from`.
    Frame { from: PeerId, bytes: Vec<u8> },
    /// Data unavailable but the sender is known: the link to `from` failed.
    Failed { from: PeerId },
    /// Nothing pending on the channel.
    Empty,
}

impl Received {
    /// Map the classic `(bytes_read, sender)` receive contract. A non-positive read
    /// with an invalid sender means "nothing pending"; with a valid sender it is a
    /// failure for that sender.
    pub fn from_raw(bytes_read: i32, sender: PeerId, buffer: &[u8]) -> Self {
        if bytes_read > 0 {
            let len = (bytes_read as usize).min(buffer.len());
            Received::Frame {
                from: sender,
                bytes: buffer[..len].to_vec(),
            }
        } else if sender.is_valid() {
            Received::Failed { from: sender }
        } else {
            Received::Empty
        }
    }
}

/// Asynchronous notifications from the transport, drained once per loop iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Signaling link is up.
    Connected,
    /// The transport assigned our local identity.
    PeerAssigned(PeerId),
    PeerRejected(PeerId),
    PeerNotFound(PeerId),
    /// The transport saw the link to a peer drop.
    PeerDisconnected(PeerId),
    AliasResolved { name: String, peer: PeerId },
    AliasNotFound(String),
    AliasRegistered(String),
    AliasRegisterFailed { name: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport init failed: {0}")]
    Init(String),
    #[error("transport not initialized")]
    NotInitialized,
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),
    #[error("send to peer {peer} failed: {reason}")]
    SendFailed { peer: PeerId, reason: String },
    #[error("alias error: {0}")]
    Alias(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Peer-to-peer transport driven by the client loop. All calls happen on the loop's
/// thread; implementations need no internal locking for that.
pub trait Transport {
    /// Connect to the signaling side. Failure is fatal to the session.
    fn init(&mut self, server: &str, credentials: &Credentials) -> Result<(), TransportError>;

    /// Our identity, `PeerId::INVALID` until the transport has assigned one.
    fn local_peer_id(&self) -> PeerId;

    /// Peer id standing for `name`, `PeerId::INVALID` if the alias is unknown.
    fn resolve_alias(&mut self, name: &str) -> PeerId;

    fn register_alias(&mut self, name: &str) -> Result<(), TransportError>;

    /// Drop one alias, or every alias of ours when `name` is `None`.
    fn unregister_alias(&mut self, name: Option<&str>) -> Result<(), TransportError>;

    /// Start an alias lookup; the answer arrives as a [`TransportEvent`].
    fn lookup_alias(&mut self, name: &str);

    /// Send one frame. Returns the number of bytes accepted.
    fn send(
        &mut self,
        peer: PeerId,
        bytes: &[u8],
        mode: SendMode,
        channel: u8,
    ) -> Result<usize, TransportError>;

    /// Size of the next pending frame on `channel`, if any.
    fn peek(&mut self, channel: u8) -> Option<usize>;

    fn receive(&mut self, channel: u8) -> Received;

    fn disconnect(&mut self, peer: PeerId) -> bool;

    /// Block until traffic arrives or `timeout` elapses. Returns true if traffic is pending.
    fn wait(&mut self, timeout: Duration) -> bool;

    fn poll_event(&mut self) -> Option<TransportEvent>;

    /// Largest frame `send` accepts. Bigger frames fail for every peer alike.
    fn max_frame_len(&self) -> usize {
        MAX_FRAME_LEN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_receive_mapping() {
        let buf = [1u8, 2, 3, 4];
        assert_eq!(
            Received::from_raw(3, PeerId(5), &buf),
            Received::Frame {
                from: PeerId(5),
                bytes: vec![1, 2, 3]
            }
        );
        assert_eq!(
            Received::from_raw(-1, PeerId(5), &buf),
            Received::Failed { from: PeerId(5) }
        );
        assert_eq!(Received::from_raw(0, PeerId::INVALID, &buf), Received::Empty);
        assert_eq!(Received::from_raw(-1, PeerId::INVALID, &buf), Received::Empty);
    }
}
