//! UDP transport: one socket, a peer directory, and a static alias table.
//!
//! Every datagram carries the swarm token and the sender's id. Datagrams with a foreign
//! token are dropped; the sender's address is learned from every accepted datagram.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use swarm_core::{
    Credentials, PeerId, Received, SendMode, Transport, TransportError, TransportEvent,
};
use tracing::{debug, info, warn};

/// Largest payload we put in one datagram.
pub const MAX_PAYLOAD: usize = 60 * 1024;

const RECV_BUF_LEN: usize = 64 * 1024;

/// Static part of the transport setup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UdpSettings {
    /// Fixed local id; `None` draws one at random on init.
    pub peer_id: Option<PeerId>,
    pub directory: Vec<(PeerId, SocketAddr)>,
    pub aliases: Vec<(String, PeerId)>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Datagram {
    token: String,
    sender: PeerId,
    kind: DatagramKind,
}

#[derive(Debug, Serialize, Deserialize)]
enum DatagramKind {
    Data { channel: u8, payload: Vec<u8> },
    Bye,
}

/// Queued inbound item. `channel: None` is a link failure, visible on every channel.
struct Inbound {
    channel: Option<u8>,
    item: Received,
}

pub struct UdpTransport {
    socket: Option<UdpSocket>,
    token: String,
    requested_id: Option<PeerId>,
    local: PeerId,
    directory: HashMap<PeerId, SocketAddr>,
    aliases: HashMap<String, PeerId>,
    own_aliases: BTreeSet<String>,
    inbox: VecDeque<Inbound>,
    events: VecDeque<TransportEvent>,
    buf: Vec<u8>,
}

impl UdpTransport {
    pub fn new(settings: UdpSettings) -> Self {
        Self {
            socket: None,
            token: String::new(),
            requested_id: settings.peer_id,
            local: PeerId::INVALID,
            directory: settings.directory.into_iter().collect(),
            aliases: settings.aliases.into_iter().collect(),
            own_aliases: BTreeSet::new(),
            inbox: VecDeque::new(),
            events: VecDeque::new(),
            buf: vec![0u8; RECV_BUF_LEN],
        }
    }

    /// Bound address, once initialized.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Add or replace a directory entry.
    pub fn add_peer(&mut self, peer: PeerId, addr: SocketAddr) {
        if peer.is_valid() {
            self.directory.insert(peer, addr);
        }
    }

    pub fn peer_addr(&self, peer: PeerId) -> Option<SocketAddr> {
        self.directory.get(&peer).copied()
    }

    fn send_datagram(&self, peer: PeerId, kind: DatagramKind) -> Result<usize, TransportError> {
        let socket = self.socket.as_ref().ok_or(TransportError::NotInitialized)?;
        let addr = *self
            .directory
            .get(&peer)
            .ok_or(TransportError::UnknownPeer(peer))?;
        let datagram = Datagram {
            token: self.token.clone(),
            sender: self.local,
            kind,
        };
        let bytes = bincode::serialize(&datagram).map_err(|e| TransportError::SendFailed {
            peer,
            reason: e.to_string(),
        })?;
        socket
            .send_to(&bytes, addr)
            .map_err(|e| TransportError::SendFailed {
                peer,
                reason: e.to_string(),
            })
    }

    fn accept(&mut self, len: usize, from: SocketAddr) {
        let datagram: Datagram = match bincode::deserialize(&self.buf[..len]) {
            Ok(d) => d,
            Err(e) => {
                debug!(%from, error = %e, "dropping malformed datagram");
                return;
            }
        };
        if datagram.token != self.token {
            debug!(%from, "dropping datagram from another swarm");
            return;
        }
        let sender = datagram.sender;
        if !sender.is_valid() || sender == self.local {
            debug!(%from, %sender, "dropping datagram with bad sender");
            return;
        }
        if self.directory.insert(sender, from) != Some(from) {
            debug!(%sender, addr = %from, "learned peer address");
        }
        let inbound = match datagram.kind {
            DatagramKind::Data { channel, payload } => Inbound {
                channel: Some(channel),
                item: Received::Frame {
                    from: sender,
                    bytes: payload,
                },
            },
            DatagramKind::Bye => Inbound {
                channel: None,
                item: Received::Failed { from: sender },
            },
        };
        self.inbox.push_back(inbound);
    }

    /// Read everything already queued on the socket without blocking.
    fn drain_socket(&mut self) {
        let Some(socket) = self.socket.as_ref() else {
            return;
        };
        if let Err(e) = socket.set_nonblocking(true) {
            warn!(error = %e, "set_nonblocking failed");
            return;
        }
        loop {
            let Some(socket) = self.socket.as_ref() else {
                return;
            };
            match socket.recv_from(&mut self.buf) {
                Ok((len, from)) => self.accept(len, from),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                // ICMP port unreachable from an earlier send surfaces here on some platforms
                Err(e) if e.kind() == ErrorKind::ConnectionReset => continue,
                Err(e) => {
                    warn!(error = %e, "udp receive failed");
                    break;
                }
            }
        }
    }

    fn position(&self, channel: u8) -> Option<usize> {
        self.inbox
            .iter()
            .position(|i| i.channel.map_or(true, |c| c == channel))
    }
}

impl Transport for UdpTransport {
    fn init(&mut self, server: &str, credentials: &Credentials) -> Result<(), TransportError> {
        let socket = UdpSocket::bind(server)
            .map_err(|e| TransportError::Init(format!("bind {}: {}", server, e)))?;
        self.local = match self.requested_id {
            Some(id) if id.is_valid() => id,
            _ => PeerId(rand::thread_rng().gen_range(1..=u32::MAX)),
        };
        self.token = credentials.token.clone();
        info!(
            addr = %socket.local_addr().map(|a| a.to_string()).unwrap_or_default(),
            peer = %self.local,
            "udp transport bound"
        );
        self.socket = Some(socket);
        self.events.push_back(TransportEvent::Connected);
        self.events.push_back(TransportEvent::PeerAssigned(self.local));
        Ok(())
    }

    fn local_peer_id(&self) -> PeerId {
        self.local
    }

    fn resolve_alias(&mut self, name: &str) -> PeerId {
        self.aliases
            .get(&name.to_lowercase())
            .copied()
            .unwrap_or(PeerId::INVALID)
    }

    fn register_alias(&mut self, name: &str) -> Result<(), TransportError> {
        if !self.local.is_valid() {
            return Err(TransportError::NotInitialized);
        }
        let name = name.to_lowercase();
        if let Some(&owner) = self.aliases.get(&name) {
            if owner != self.local {
                let reason = format!("alias held by peer {}", owner);
                self.events.push_back(TransportEvent::AliasRegisterFailed {
                    name: name.clone(),
                    reason: reason.clone(),
                });
                return Err(TransportError::Alias(reason));
            }
        }
        self.aliases.insert(name.clone(), self.local);
        self.own_aliases.insert(name.clone());
        self.events.push_back(TransportEvent::AliasRegistered(name));
        Ok(())
    }

    fn unregister_alias(&mut self, name: Option<&str>) -> Result<(), TransportError> {
        match name {
            Some(name) => {
                let name = name.to_lowercase();
                if !self.own_aliases.remove(&name) {
                    return Err(TransportError::Alias(format!("{} is not ours", name)));
                }
                self.aliases.remove(&name);
            }
            None => {
                for name in std::mem::take(&mut self.own_aliases) {
                    self.aliases.remove(&name);
                }
            }
        }
        Ok(())
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
        _mode: SendMode,
        channel: u8,
    ) -> Result<usize, TransportError> {
        if bytes.len() > MAX_PAYLOAD {
            return Err(TransportError::SendFailed {
                peer,
                reason: format!("payload of {} bytes exceeds {}", bytes.len(), MAX_PAYLOAD),
            });
        }
        let result = self.send_datagram(
            peer,
            DatagramKind::Data {
                channel,
                payload: bytes.to_vec(),
            },
        );
        if let Err(TransportError::UnknownPeer(_)) = result {
            self.events.push_back(TransportEvent::PeerNotFound(peer));
        }
        result.map(|_| bytes.len())
    }

    fn peek(&mut self, channel: u8) -> Option<usize> {
        let index = self.position(channel)?;
        match &self.inbox[index].item {
            Received::Frame { bytes, .. } => Some(bytes.len()),
            _ => Some(0),
        }
    }

    fn receive(&mut self, channel: u8) -> Received {
        match self.position(channel).and_then(|i| self.inbox.remove(i)) {
            Some(inbound) => inbound.item,
            None => Received::Empty,
        }
    }

    fn disconnect(&mut self, peer: PeerId) -> bool {
        match self.send_datagram(peer, DatagramKind::Bye) {
            Ok(_) => true,
            Err(e) => {
                debug!(%peer, error = %e, "bye not sent");
                false
            }
        }
    }

    fn wait(&mut self, timeout: Duration) -> bool {
        if !self.inbox.is_empty() {
            self.drain_socket();
            return true;
        }
        let Some(socket) = self.socket.as_ref() else {
            std::thread::sleep(timeout);
            return false;
        };
        // set_read_timeout rejects a zero duration
        let timeout = timeout.max(Duration::from_millis(1));
        let armed = socket
            .set_nonblocking(false)
            .and_then(|_| socket.set_read_timeout(Some(timeout)));
        if let Err(e) = armed {
            warn!(error = %e, "arming udp read timeout failed");
            return false;
        }
        match socket.recv_from(&mut self.buf) {
            Ok((len, from)) => self.accept(len, from),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) if e.kind() == ErrorKind::ConnectionReset => {}
            Err(e) => warn!(error = %e, "udp receive failed"),
        }
        self.drain_socket();
        !self.inbox.is_empty()
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        self.events.pop_front()
    }

    fn max_frame_len(&self) -> usize {
        MAX_PAYLOAD
    }
}
