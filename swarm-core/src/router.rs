//! Chat fan-out and inbound frame dispatch.

use tracing::{debug, warn};

use crate::gossip::GossipEngine;
use crate::identity::PeerId;
use crate::peers::PeerSet;
use crate::protocol::{Message, PROTOCOL_CHANNEL};
use crate::transport::{SendMode, Transport};
use crate::wire::{self, FrameEncodeError};

/// Application sink for chat lines received from peers.
pub trait ChatHandler {
    fn on_chat(&mut self, from: PeerId, text: &str);
}

impl<F: FnMut(PeerId, &str)> ChatHandler for F {
    fn on_chat(&mut self, from: PeerId, text: &str) {
        self(from, text)
    }
}

/// What `dispatch` did with one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Hello processed; `replied` is set when a handshake reply went out.
    Hello { replied: bool },
    Chat,
    /// Malformed or unknown frame; no state changed.
    Dropped,
    /// The hello was processed but the reply to this peer failed.
    Evict(PeerId),
}

/// Routes frames by discriminant. Keeps only counters.
#[derive(Debug, Default)]
pub struct MessageRouter {
    dropped: u64,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames dropped so far as malformed or unrecognized.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Encode `text` once and send it reliably to every connected peer. A failure to
    /// one peer does not stop delivery to the rest; the failed peers are returned
    /// for eviction. A frame over the transport's limit is refused before any send.
    pub fn broadcast_chat<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        peers: &PeerSet,
        text: &str,
    ) -> Result<Vec<PeerId>, FrameEncodeError> {
        let frame = wire::encode_frame(&Message::chat(text))?;
        if frame.len() > transport.max_frame_len() {
            return Err(FrameEncodeError::TooLarge);
        }
        let mut failed = Vec::new();
        for peer in peers.connected_peers() {
            if let Err(e) = transport.send(peer, &frame, SendMode::Reliable, PROTOCOL_CHANNEL) {
                warn!(peer = %peer, error = %e, "chat delivery failed");
                failed.push(peer);
            }
        }
        Ok(failed)
    }

    /// Decode one inbound frame from `sender` and hand it to gossip or the chat handler.
    pub fn dispatch<T, H>(
        &mut self,
        transport: &mut T,
        peers: &mut PeerSet,
        gossip: &GossipEngine,
        handler: &mut H,
        sender: PeerId,
        bytes: &[u8],
    ) -> Dispatch
    where
        T: Transport + ?Sized,
        H: ChatHandler + ?Sized,
    {
        let msg = match wire::decode_frame(bytes) {
            Ok(msg) => msg,
            Err(e) => {
                self.dropped += 1;
                warn!(peer = %sender, len = bytes.len(), error = %e, "unexpected message dropped");
                return Dispatch::Dropped;
            }
        };
        debug!(peer = %sender, kind = msg.kind(), "dispatching frame");
        match msg {
            Message::PeerHello(hello) => {
                match gossip.on_hello_received(transport, peers, sender, &hello) {
                    Ok(replied) => Dispatch::Hello { replied },
                    Err(e) => {
                        warn!(peer = %sender, error = %e, "hello reply failed");
                        Dispatch::Evict(sender)
                    }
                }
            }
            Message::Chat(chat) => {
                handler.on_chat(sender, &chat.text);
                Dispatch::Chat
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;
    use crate::wire::{decode_frame, encode_frame};

    #[derive(Default)]
    struct Lines(Vec<(PeerId, String)>);

    impl ChatHandler for Lines {
        fn on_chat(&mut self, from: PeerId, text: &str) {
            self.0.push((from, text.to_string()));
        }
    }

    #[test]
    fn broadcast_reaches_connected_only() {
        let mut transport = MemoryTransport::new(PeerId(7));
        let mut peers = PeerSet::with_local(PeerId(7));
        peers.mark_connected(PeerId(1));
        peers.mark_connected(PeerId(2));
        peers.note_candidate(PeerId(3));
        let router = MessageRouter::new();
        let failed = router.broadcast_chat(&mut transport, &peers, "hi all").unwrap();
        assert!(failed.is_empty());
        let targets: Vec<PeerId> = transport.sent().iter().map(|s| s.to).collect();
        assert_eq!(targets, vec![PeerId(1), PeerId(2)]);
        // one encoding, identical bytes on every send
        assert_eq!(transport.sent()[0].bytes, transport.sent()[1].bytes);
    }

    #[test]
    fn chat_over_transport_limit_sends_nothing() {
        let mut transport = MemoryTransport::new(PeerId(7)).with_max_frame_len(64);
        let mut peers = PeerSet::with_local(PeerId(7));
        peers.mark_connected(PeerId(1));
        let router = MessageRouter::new();
        assert!(matches!(
            router.broadcast_chat(&mut transport, &peers, &"x".repeat(100)),
            Err(FrameEncodeError::TooLarge)
        ));
        assert!(transport.sent().is_empty());
        assert!(router.broadcast_chat(&mut transport, &peers, "short").unwrap().is_empty());
        assert_eq!(transport.sent().len(), 1);
    }

    #[test]
    fn broadcast_isolates_failed_peer() {
        let mut transport = MemoryTransport::new(PeerId(7));
        transport.fail_sends_to(PeerId(1));
        let mut peers = PeerSet::with_local(PeerId(7));
        peers.mark_connected(PeerId(1));
        peers.mark_connected(PeerId(2));
        let router = MessageRouter::new();
        let failed = router.broadcast_chat(&mut transport, &peers, "still here").unwrap();
        assert_eq!(failed, vec![PeerId(1)]);
        let delivered: Vec<PeerId> = transport.sent().iter().map(|s| s.to).collect();
        assert_eq!(delivered, vec![PeerId(2)]);
        match decode_frame(&transport.sent()[0].bytes).unwrap() {
            Message::Chat(chat) => assert_eq!(chat.text, "still here"),
            other => panic!("expected Chat, got {:?}", other),
        }
    }

    #[test]
    fn chat_goes_to_handler() {
        let mut transport = MemoryTransport::new(PeerId(7));
        let mut peers = PeerSet::with_local(PeerId(7));
        let gossip = GossipEngine::new();
        let mut router = MessageRouter::new();
        let mut lines = Lines::default();
        let frame = encode_frame(&Message::chat("yo")).unwrap();
        let out = router.dispatch(
            &mut transport,
            &mut peers,
            &gossip,
            &mut lines,
            PeerId(4),
            &frame,
        );
        assert_eq!(out, Dispatch::Chat);
        assert_eq!(lines.0, vec![(PeerId(4), "yo".to_string())]);
        assert!(peers.is_empty(), "chat does not change membership");
    }

    #[test]
    fn hello_goes_to_gossip() {
        let mut transport = MemoryTransport::new(PeerId(7));
        let mut peers = PeerSet::with_local(PeerId(7));
        let gossip = GossipEngine::new();
        let mut router = MessageRouter::new();
        let mut lines = Lines::default();
        let frame = encode_frame(&Message::hello(vec![PeerId(9)], false)).unwrap();
        let out = router.dispatch(
            &mut transport,
            &mut peers,
            &gossip,
            &mut lines,
            PeerId(3),
            &frame,
        );
        assert_eq!(out, Dispatch::Hello { replied: true });
        assert_eq!(peers.connected_peers().collect::<Vec<_>>(), vec![PeerId(3)]);
        assert_eq!(transport.sent().len(), 1);
        assert!(lines.0.is_empty());
    }

    #[test]
    fn hello_reply_failure_asks_for_eviction() {
        let mut transport = MemoryTransport::new(PeerId(7));
        transport.fail_sends_to(PeerId(3));
        let mut peers = PeerSet::with_local(PeerId(7));
        let gossip = GossipEngine::new();
        let mut router = MessageRouter::new();
        let frame = encode_frame(&Message::hello(vec![], false)).unwrap();
        let out = router.dispatch(
            &mut transport,
            &mut peers,
            &gossip,
            &mut |_: PeerId, _: &str| {},
            PeerId(3),
            &frame,
        );
        assert_eq!(out, Dispatch::Evict(PeerId(3)));
    }

    #[test]
    fn garbage_and_unknown_frames_dropped() {
        let mut transport = MemoryTransport::new(PeerId(7));
        let mut peers = PeerSet::with_local(PeerId(7));
        let gossip = GossipEngine::new();
        let mut router = MessageRouter::new();
        let mut lines = Lines::default();
        for frame in [vec![], vec![9u8, 1, 2, 3], vec![1u8, 0xff]] {
            let out = router.dispatch(
                &mut transport,
                &mut peers,
                &gossip,
                &mut lines,
                PeerId(3),
                &frame,
            );
            assert_eq!(out, Dispatch::Dropped);
        }
        assert_eq!(router.dropped(), 3);
        assert!(peers.is_empty());
        assert!(transport.sent().is_empty());
        assert!(lines.0.is_empty());
    }
}
