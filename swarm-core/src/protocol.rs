//! Swarm wire protocol: message types and protocol constants.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::identity::PeerId;

/// Application channel shared by hello and chat frames. The discriminant, not the
/// channel, separates message kinds.
pub const PROTOCOL_CHANNEL: u8 = 52;

/// Minimum spacing between two gossip rounds.
pub const GOSSIP_INTERVAL: Duration = Duration::from_secs(1);

/// Default bound on how long one loop iteration blocks in `Transport::wait`.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(100);

/// Gossip announcement: the sender's pending and connected peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloPeer {
    pub peers: Vec<PeerId>,
    /// Set on the handshake reply so the receiver does not answer again.
    pub is_response: bool,
}

/// Human-readable chat line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub text: String,
}

/// All wire messages. Framing is one discriminant byte plus the bincode body (see wire module).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    PeerHello(HelloPeer),
    Chat(Chat),
}

impl Message {
    pub fn hello(peers: Vec<PeerId>, is_response: bool) -> Self {
        Message::PeerHello(HelloPeer { peers, is_response })
    }

    pub fn chat(text: impl Into<String>) -> Self {
        Message::Chat(Chat { text: text.into() })
    }

    /// Short name for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::PeerHello(_) => "hello",
            Message::Chat(_) => "chat",
        }
    }
}
