//! Several clients on one in-memory network: discovery, chat, eviction, rediscovery.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use swarm_core::memory::{MemoryNetwork, MemoryTransport};
use swarm_core::{
    ChatHandler, ClientLoop, Command, Credentials, LoopState, PeerId, PeerStatus, PeerTarget,
};

#[derive(Clone, Default)]
struct Inbox(Rc<RefCell<Vec<(PeerId, String)>>>);

impl ChatHandler for Inbox {
    fn on_chat(&mut self, from: PeerId, text: &str) {
        self.0.borrow_mut().push((from, text.to_string()));
    }
}

impl Inbox {
    fn lines(&self) -> Vec<(PeerId, String)> {
        self.0.borrow().clone()
    }
}

type Client = ClientLoop<MemoryTransport, Inbox>;

struct Swarm {
    clients: Vec<Client>,
    inboxes: Vec<Inbox>,
    now: Instant,
}

impl Swarm {
    fn new(ids: &[u32]) -> Self {
        let net = MemoryNetwork::new();
        let now = Instant::now();
        let mut clients = Vec::new();
        let mut inboxes = Vec::new();
        for &id in ids {
            let inbox = Inbox::default();
            let mut client = ClientLoop::new(net.endpoint(PeerId(id)), inbox.clone())
                .with_wait_timeout(Duration::ZERO);
            client
                .start("memory", &Credentials::new("test-swarm"))
                .unwrap();
            assert_eq!(client.iterate(now), LoopState::Running);
            clients.push(client);
            inboxes.push(inbox);
        }
        Self {
            clients,
            inboxes,
            now,
        }
    }

    /// One iteration of every client, with the gossip interval elapsed.
    fn round(&mut self) {
        self.now += Duration::from_millis(1100);
        for client in &mut self.clients {
            client.iterate(self.now);
        }
    }

    fn status(&self, who: usize, of: u32) -> Option<PeerStatus> {
        self.clients[who].peers().status(PeerId(of))
    }

    fn fully_connected(&self) -> bool {
        self.clients.iter().all(|c| {
            c.peers().pending_len() == 0 && c.peers().connected_len() == self.clients.len() - 1
        })
    }
}

#[test]
fn chain_of_introductions_connects_everyone() {
    let mut swarm = Swarm::new(&[1, 2, 3]);
    // 1 knows 2, 2 knows 3; nobody knows 3 from 1 directly
    swarm.clients[0].handle_command(Command::Connect(PeerTarget::Id(PeerId(2))));
    swarm.clients[1].handle_command(Command::Connect(PeerTarget::Id(PeerId(3))));

    for _ in 0..4 {
        swarm.round();
    }
    assert!(swarm.fully_connected());
    assert_eq!(swarm.status(0, 3), Some(PeerStatus::Connected));
    assert_eq!(swarm.status(2, 1), Some(PeerStatus::Connected));
}

#[test]
fn chat_reaches_every_connected_peer() {
    let mut swarm = Swarm::new(&[1, 2, 3]);
    swarm.clients[0].handle_command(Command::Connect(PeerTarget::Id(PeerId(2))));
    swarm.clients[0].handle_command(Command::Connect(PeerTarget::Id(PeerId(3))));
    for _ in 0..3 {
        swarm.round();
    }
    assert!(swarm.fully_connected());

    swarm.clients[0].handle_command(Command::Chat("hello swarm".into()));
    swarm.round();

    assert!(swarm.inboxes[0].lines().is_empty());
    for inbox in &swarm.inboxes[1..] {
        assert_eq!(inbox.lines(), vec![(PeerId(1), "hello swarm".to_string())]);
    }
}

#[test]
fn alias_lookup_and_connect() {
    let mut swarm = Swarm::new(&[10, 20]);
    swarm.clients[1].handle_command(Command::RegisterAlias("lobby".into()));
    swarm.clients[0].handle_command(Command::Connect(PeerTarget::Alias("lobby".into())));
    assert_eq!(swarm.status(0, 20), Some(PeerStatus::Pending));
    for _ in 0..2 {
        swarm.round();
    }
    assert!(swarm.fully_connected());
}

#[test]
fn unknown_peer_is_evicted_after_failed_hello() {
    let mut swarm = Swarm::new(&[1, 2]);
    swarm.clients[0].handle_command(Command::Connect(PeerTarget::Id(PeerId(99))));
    assert_eq!(swarm.status(0, 99), Some(PeerStatus::Pending));
    swarm.round();
    assert_eq!(swarm.status(0, 99), None);
}

#[test]
fn disconnect_is_mutual_and_reconnect_works() {
    let mut swarm = Swarm::new(&[1, 2]);
    swarm.clients[0].handle_command(Command::Connect(PeerTarget::Id(PeerId(2))));
    for _ in 0..2 {
        swarm.round();
    }
    assert!(swarm.fully_connected());

    swarm.clients[0].handle_command(Command::Disconnect(PeerTarget::Id(PeerId(2))));
    assert_eq!(swarm.status(0, 2), None);
    for _ in 0..2 {
        swarm.round();
    }
    // the remote saw a receive failure from us and dropped us too
    assert_eq!(swarm.status(1, 1), None);
    assert!(swarm.clients.iter().all(|c| c.peers().is_empty()));

    swarm.clients[1].handle_command(Command::Connect(PeerTarget::Id(PeerId(1))));
    for _ in 0..2 {
        swarm.round();
    }
    assert!(swarm.fully_connected());
}

#[test]
fn failed_chat_delivery_evicts_only_that_peer() {
    let mut swarm = Swarm::new(&[1, 2, 3]);
    swarm.clients[0].handle_command(Command::Connect(PeerTarget::Id(PeerId(2))));
    swarm.clients[0].handle_command(Command::Connect(PeerTarget::Id(PeerId(3))));
    for _ in 0..3 {
        swarm.round();
    }
    swarm.clients[0].transport_mut().fail_sends_to(PeerId(2));

    swarm.clients[0].handle_command(Command::Chat("partial".into()));
    swarm.round();

    assert_eq!(swarm.status(0, 2), None);
    assert_eq!(swarm.status(0, 3), Some(PeerStatus::Connected));
    assert!(swarm.inboxes[1].lines().is_empty());
    assert_eq!(
        swarm.inboxes[2].lines(),
        vec![(PeerId(1), "partial".to_string())]
    );
}
