//! Dht node.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4, ToSocketAddrs, UdpSocket};
use std::str::FromStr;
use std::thread;
use std::time::Duration;

use flume::{Receiver, Sender, TryRecvError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::common::{DecodeIdError, Id, Node};
use crate::rpc::{
    to_socket_address, Config, DhtEvent, Info, LookupId, RequestError, Rpc,
};

#[derive(Debug, Clone)]
/// Kademlia Dht node, running its [Rpc] on an actor thread.
pub struct Dht(pub(crate) Sender<ActorMessage>);

#[derive(Debug, Default)]
/// A builder for [Dht]
pub struct DhtBuilder(Config);

impl DhtBuilder {
    /// Set this node's [Id], a random one is generated otherwise.
    pub fn id(&mut self, id: Id) -> &mut Self {
        self.0.id = Some(id);
        self
    }

    /// Set the port to listen on.
    pub fn port(&mut self, port: u16) -> &mut Self {
        self.0.port = Some(port);
        self
    }

    /// Set the Ipv4 address to bind the UDP socket to.
    pub fn bind_address(&mut self, address: Ipv4Addr) -> &mut Self {
        self.0.bind_address = address;
        self
    }

    /// Use an already bound socket, see [Config::socket].
    pub fn socket(&mut self, socket: UdpSocket) -> &mut Self {
        self.0.socket = Some(socket);
        self
    }

    /// Receive datagrams that are not KRPC messages, see [Config::passthrough].
    pub fn passthrough(&mut self, passthrough: Sender<(Vec<u8>, SocketAddrV4)>) -> &mut Self {
        self.0.passthrough = Some(passthrough);
        self
    }

    /// Set bootstrapping nodes, addresses that fail to resolve are ignored.
    pub fn bootstrap<T: ToSocketAddrs>(&mut self, bootstrap: &[T]) -> &mut Self {
        self.0.bootstrap = to_socket_address(bootstrap);
        self
    }

    /// Add more bootstrap nodes to the ones already set.
    pub fn extra_bootstrap<T: ToSocketAddrs>(&mut self, extra_bootstrap: &[T]) -> &mut Self {
        self.0.bootstrap.extend(to_socket_address(extra_bootstrap));
        self
    }

    /// Restore the [Id], port and routing table of a saved node, see [Dht::save].
    pub fn snapshot(&mut self, snapshot: &Snapshot) -> Result<&mut Self, SnapshotError> {
        let id = Id::from_str(&snapshot.id)?;

        let nodes = snapshot
            .nodes
            .iter()
            .map(|node| {
                Ok(Node::new(
                    Id::from_str(&node.id)?,
                    SocketAddrV4::new(node.address, node.port),
                ))
            })
            .collect::<Result<Vec<_>, SnapshotError>>()?;

        self.0.id = Some(id);
        self.0.port = Some(snapshot.port);
        self.0.nodes = nodes;

        Ok(self)
    }

    /// Set the request timeout, see [Config::request_timeout].
    pub fn request_timeout(&mut self, request_timeout: Duration) -> &mut Self {
        self.0.request_timeout = request_timeout;
        self
    }

    /// Set the token timeout, see [Config::token_timeout].
    pub fn token_timeout(&mut self, token_timeout: Duration) -> &mut Self {
        self.0.token_timeout = token_timeout;
        self
    }

    /// Set the peer timeout, see [Config::peer_timeout].
    pub fn peer_timeout(&mut self, peer_timeout: Duration) -> &mut Self {
        self.0.peer_timeout = peer_timeout;
        self
    }

    pub fn announce_interval(&mut self, interval: Duration) -> &mut Self {
        self.0.announce_interval = interval;
        self
    }

    pub fn bucket_renewal_interval(&mut self, interval: Duration) -> &mut Self {
        self.0.bucket_renewal_interval = interval;
        self
    }

    pub fn ping_interval(&mut self, interval: Duration) -> &mut Self {
        self.0.ping_interval = interval;
        self
    }

    pub fn self_refresh_interval(&mut self, interval: Duration) -> &mut Self {
        self.0.self_refresh_interval = interval;
        self
    }

    /// Create a Dht node.
    pub fn build(&mut self) -> Result<Dht, std::io::Error> {
        Dht::new(std::mem::take(&mut self.0))
    }
}

impl Dht {
    /// Create a new Dht node.
    ///
    /// Could return an error if it failed to bind to the specified
    /// port or other io errors while binding the udp socket.
    pub fn new(config: Config) -> Result<Self, std::io::Error> {
        let (sender, receiver) = flume::unbounded();

        let rpc = Rpc::new(config)?;

        let address = rpc.local_addr();
        info!(?address, "Dht listening");

        thread::Builder::new()
            .name("kadpeer-dht".to_string())
            .spawn(move || run(rpc, receiver))?;

        Ok(Dht(sender))
    }

    /// Returns a builder to edit settings before creating a Dht node.
    pub fn builder() -> DhtBuilder {
        DhtBuilder::default()
    }

    // === Getters ===

    /// Information about this node.
    pub fn info(&self) -> Result<Info, DhtWasShutdown> {
        let (sender, receiver) = flume::bounded::<Info>(1);

        self.send(ActorMessage::Info(sender))?;

        receiver.recv().map_err(|_| DhtWasShutdown)
    }

    /// Local UDP Ipv4 socket address that this node is listening on.
    pub fn local_addr(&self) -> Result<SocketAddrV4, DhtWasShutdown> {
        Ok(self.info()?.local_addr())
    }

    /// Subscribe to [DhtEvent]s, starting with [DhtEvent::Listening].
    pub fn events(&self) -> Result<Receiver<DhtEvent>, DhtWasShutdown> {
        let (sender, receiver) = flume::unbounded();

        self.send(ActorMessage::Subscribe(sender))?;

        Ok(receiver)
    }

    // === Public Methods ===

    /// Ping a node, returns its [Id].
    pub fn ping(&self, address: SocketAddrV4) -> Result<Id, PingError> {
        let (sender, receiver) = flume::bounded(1);

        self.send(ActorMessage::Ping(address, sender))?;

        Ok(receiver.recv().map_err(|_| DhtWasShutdown)??)
    }

    /// Add a node with a known [Id] to the routing table directly.
    pub fn connect(&self, node: Node) -> Result<(), DhtWasShutdown> {
        self.send(ActorMessage::Connect(node))
    }

    /// Ping an address, and add it to the routing table if it responds.
    pub fn connect_address(&self, address: SocketAddrV4) -> Result<(), DhtWasShutdown> {
        self.send(ActorMessage::ConnectAddress(address))
    }

    /// Iteratively look up the closest nodes to `target`, returns every node visited.
    pub fn find_node(&self, target: Id) -> Result<Box<[Node]>, DhtWasShutdown> {
        let (sender, receiver) = flume::bounded(1);

        self.send(ActorMessage::FindNode(target, sender))?;

        receiver.recv().map_err(|_| DhtWasShutdown)
    }

    /// Announce this node as a peer on `info_hash` reachable on `port`,
    /// right away and then periodically.
    pub fn advertise(&self, info_hash: Id, port: u16) -> Result<(), DhtWasShutdown> {
        self.send(ActorMessage::Advertise(info_hash, port))
    }

    /// Peers stored locally for `info_hash`, `None` if there is no such infohash.
    pub fn get_peers(&self, info_hash: Id) -> Result<Option<Vec<SocketAddrV4>>, DhtWasShutdown> {
        let (sender, receiver) = flume::bounded(1);

        self.send(ActorMessage::GetPeers(info_hash, sender))?;

        receiver.recv().map_err(|_| DhtWasShutdown)
    }

    /// Save this node's [Id], port and routing table, see [DhtBuilder::snapshot].
    pub fn save(&self) -> Result<Snapshot, DhtWasShutdown> {
        let (sender, receiver) = flume::bounded(1);

        self.send(ActorMessage::Save(sender))?;

        receiver.recv().map_err(|_| DhtWasShutdown)
    }

    /// Stop the node and close its socket, blocks until the socket is closed.
    ///
    /// Lookups and pings still running are dropped, their callers get [DhtWasShutdown].
    pub fn shutdown(&self) {
        let (sender, receiver) = flume::bounded::<()>(1);

        if self.send(ActorMessage::Shutdown(sender)).is_ok() {
            let _ = receiver.recv();
        }
    }

    // === Private Methods ===

    pub(crate) fn send(&self, message: ActorMessage) -> Result<(), DhtWasShutdown> {
        self.0.send(message).map_err(|_| DhtWasShutdown)
    }
}

fn run(mut rpc: Rpc, receiver: Receiver<ActorMessage>) {
    let mut subscribers: Vec<Sender<DhtEvent>> = Vec::new();
    let mut lookup_senders: HashMap<LookupId, Sender<Box<[Node]>>> = HashMap::new();
    let mut ping_senders: HashMap<u16, Sender<Result<Id, RequestError>>> = HashMap::new();

    loop {
        match receiver.try_recv() {
            Ok(actor_message) => match actor_message {
                ActorMessage::Shutdown(sender) => {
                    drop(rpc);
                    let _ = sender.send(());
                    return;
                }
                ActorMessage::Info(sender) => {
                    let _ = sender.send(rpc.info());
                }
                ActorMessage::Subscribe(sender) => {
                    if sender.send(DhtEvent::Listening(rpc.local_addr())).is_ok() {
                        subscribers.push(sender);
                    }
                }
                ActorMessage::Ping(address, sender) => {
                    ping_senders.insert(rpc.ping(address), sender);
                }
                ActorMessage::Connect(node) => {
                    rpc.connect(node);
                }
                ActorMessage::ConnectAddress(address) => {
                    rpc.connect_address(address);
                }
                ActorMessage::FindNode(target, sender) => {
                    lookup_senders.insert(rpc.find_node(target), sender);
                }
                ActorMessage::Advertise(info_hash, port) => {
                    rpc.advertise(info_hash, port);
                }
                ActorMessage::GetPeers(info_hash, sender) => {
                    let _ = sender.send(
                        rpc.routing_table()
                            .get_peers(&info_hash)
                            .map(|peers| peers.addresses()),
                    );
                }
                ActorMessage::Save(sender) => {
                    let _ = sender.send(Snapshot::from(&rpc));
                }
            },
            Err(TryRecvError::Disconnected) => {
                // Every Dht handle was dropped, kill this thread.
                debug!("kadpeer::Dht's actor thread was shutdown after Drop.");
                return;
            }
            Err(TryRecvError::Empty) => {
                // No op
            }
        }

        let report = rpc.tick();

        for event in report.events {
            subscribers.retain(|subscriber| subscriber.send(event.clone()).is_ok());
        }

        for (lookup_id, nodes) in report.done_lookups {
            if let Some(sender) = lookup_senders.remove(&lookup_id) {
                let _ = sender.send(nodes);
            }
        }

        for (transaction_id, result) in report.done_pings {
            if let Some(sender) = ping_senders.remove(&transaction_id) {
                let _ = sender.send(result);
            }
        }
    }
}

#[derive(Debug)]
pub(crate) enum ActorMessage {
    Shutdown(Sender<()>),
    Info(Sender<Info>),
    Subscribe(Sender<DhtEvent>),
    Ping(SocketAddrV4, Sender<Result<Id, RequestError>>),
    Connect(Node),
    ConnectAddress(SocketAddrV4),
    FindNode(Id, Sender<Box<[Node]>>),
    Advertise(Id, u16),
    GetPeers(Id, Sender<Option<Vec<SocketAddrV4>>>),
    Save(Sender<Snapshot>),
}

/// Saved state of a node, restored with [DhtBuilder::snapshot].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Hex encoded [Id] of the node.
    pub id: String,
    /// Port the node was listening on, `0` to listen on any port.
    pub port: u16,
    pub nodes: Vec<SnapshotNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotNode {
    /// Hex encoded [Id].
    pub id: String,
    pub address: Ipv4Addr,
    pub port: u16,
}

impl From<&Rpc> for Snapshot {
    fn from(rpc: &Rpc) -> Self {
        Snapshot {
            id: rpc.id().to_string(),
            port: rpc.local_addr().port(),
            nodes: rpc
                .routing_table()
                .nodes()
                .map(|node| SnapshotNode {
                    id: node.id().to_string(),
                    address: *node.address().ip(),
                    port: node.address().port(),
                })
                .collect(),
        }
    }
}

/// Create a testnet of Dht nodes to run tests against without touching any public network.
#[derive(Debug)]
pub struct Testnet {
    pub bootstrap: Vec<String>,
    pub nodes: Vec<Dht>,
}

impl Testnet {
    /// Create `count` nodes listening on localhost, every node bootstraps from the first one.
    pub fn new(count: usize) -> Result<Testnet, std::io::Error> {
        let mut nodes: Vec<Dht> = vec![];
        let mut bootstrap = vec![];

        for i in 0..count {
            let mut builder = Dht::builder();
            builder.bind_address(Ipv4Addr::LOCALHOST);

            if i == 0 {
                let node = builder.build()?;
                let address = node.local_addr().map_err(std::io::Error::other)?;

                bootstrap.push(address.to_string());
                nodes.push(node);
            } else {
                nodes.push(builder.bootstrap(&bootstrap).build()?);
            }
        }

        Ok(Testnet { bootstrap, nodes })
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("The Dht was shutdown")]
/// The Dht node's actor thread is no longer running.
pub struct DhtWasShutdown;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
/// Failure of [Dht::ping].
pub enum PingError {
    #[error(transparent)]
    Shutdown(#[from] DhtWasShutdown),

    #[error(transparent)]
    Request(#[from] RequestError),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
/// Failure to restore a node from a [Snapshot].
pub enum SnapshotError {
    #[error("Invalid id in snapshot: {0}")]
    InvalidId(#[from] DecodeIdError),
}
