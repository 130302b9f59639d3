//! Swarm chat protocol: peer discovery by hello gossip plus best-effort chat fan-out.
//! Host-driven: the host supplies a [`Transport`] and feeds user [`Command`]s; the
//! [`ClientLoop`] owns all protocol state.

pub mod client;
pub mod command;
pub mod gossip;
pub mod identity;
pub mod memory;
pub mod peers;
pub mod protocol;
pub mod router;
pub mod transport;
pub mod wire;

pub use client::{ClientError, ClientLoop, LoopState};
pub use command::{parse_line, Command, CommandError, Input, PeerTarget};
pub use gossip::{GossipEngine, GossipError};
pub use identity::PeerId;
pub use peers::{PeerSet, PeerStatus};
pub use protocol::{Chat, HelloPeer, Message, DEFAULT_WAIT_TIMEOUT, GOSSIP_INTERVAL, PROTOCOL_CHANNEL};
pub use router::{ChatHandler, Dispatch, MessageRouter};
pub use transport::{Credentials, Received, SendMode, Transport, TransportError, TransportEvent};
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError};
