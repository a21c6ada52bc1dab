//! K-RPC implementation, the single threaded state machine of a DHT node.

mod announce;
pub mod config;
mod info;
mod lookup;
mod maintenance;
mod server;
mod socket;

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::common::{
    Admission, ErrorSpecific, Id, Node, RequestSpecific, RequestTypeSpecific, ResponseSpecific,
    RoutingTable, GENERIC_ERROR,
};

use lookup::{Lookup, LookupKind};
use maintenance::Maintenance;
use server::Tokens;
use socket::{Inbound, InflightRequest, KrpcSocket};

pub use config::Config;
pub use info::Info;
pub use lookup::LookupId;
pub use server::DEFAULT_TOKEN_TIMEOUT;
pub use socket::{SendMessageError, DEFAULT_REQUEST_TIMEOUT};

/// Default interval between two announcements of every advertised infohash.
pub const DEFAULT_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(15);
/// Default interval between two lookups of this node's own [Id].
pub const DEFAULT_SELF_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug)]
/// Internal Rpc called in the Dht thread loop, useful to create your own actor setup.
pub struct Rpc {
    socket: KrpcSocket,

    // Routing
    /// Closest nodes to this node, and the peers they own.
    routing_table: RoutingTable,
    maintenance: Maintenance,
    /// Addresses to ping on the first tick.
    bootstrap: Option<Vec<SocketAddrV4>>,
    bootstrapped: bool,

    // Lookups
    lookups: HashMap<LookupId, Lookup>,
    next_lookup_id: u64,

    // Peers
    /// Ips of this node, peers announced on them with this node's port are ignored.
    local_ips: Vec<Ipv4Addr>,
    tokens: Tokens,
    /// Infohashes this node announces itself on, in the order they were advertised.
    advertised: Vec<Id>,
    peer_timeout: Duration,

    report: RpcTickReport,
}

impl Rpc {
    /// Creates a new Rpc. Does not send anything until [Rpc::tick] is called.
    pub fn new(mut config: Config) -> Result<Self, std::io::Error> {
        let id = config.id.unwrap_or_else(Id::random);

        let socket = KrpcSocket::new(&mut config)?;
        let local_ips = announce::local_ips(*socket.local_addr().ip());

        let mut routing_table = RoutingTable::new(id)
            .with_renewal_interval(config.bucket_renewal_interval)
            .with_ping_interval(config.ping_interval);

        for node in config.nodes.drain(..) {
            routing_table.add(node);
        }

        Ok(Rpc {
            socket,

            routing_table,
            maintenance: Maintenance::new(config.announce_interval, config.self_refresh_interval),
            bootstrap: Some(config.bootstrap),
            bootstrapped: false,

            lookups: HashMap::new(),
            next_lookup_id: 0,

            local_ips,
            tokens: Tokens::new(config.token_timeout),
            advertised: Vec::new(),
            peer_timeout: config.peer_timeout,

            report: RpcTickReport::default(),
        })
    }

    // === Getters ===

    /// Returns the node's Id
    pub fn id(&self) -> &Id {
        self.routing_table.id()
    }

    /// Returns the address the server is listening to.
    #[inline]
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.socket.local_addr()
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.routing_table
    }

    /// Infohashes this node announces itself on.
    pub fn advertised(&self) -> &[Id] {
        &self.advertised
    }

    /// Returns a thread safe and lightweight summary of this node's information.
    pub fn info(&self) -> Info {
        Info::from(self)
    }

    // === Public Methods ===

    /// Advances timers, lookups and announcements, and handles at most one inbound message.
    ///
    /// Call in a loop, it blocks for a few milliseconds if there is nothing to receive.
    pub fn tick(&mut self) -> RpcTickReport {
        let now = Instant::now();

        if let Some(bootstrap) = self.bootstrap.take() {
            for address in bootstrap {
                self.ping_with(address, None, PingOrigin::Bootstrap);
            }
        }

        for request in self.socket.expired(now) {
            self.complete(request, Err(RequestError::Timeout));
        }

        self.tokens.expire(now);
        self.expire_peers(now);

        self.renew_buckets(now);
        self.ping_due_nodes(now);

        let decisions = self.maintenance.decisions_at(now);

        if decisions.should_announce {
            self.announce();
        }

        if decisions.should_self_refresh {
            self.start_lookup(*self.id(), LookupKind::SelfRefresh);
        }

        self.handle_inbound();

        std::mem::take(&mut self.report)
    }

    /// Ping a node, the outcome is reported in [RpcTickReport::done_pings]
    /// under the returned transaction id.
    pub fn ping(&mut self, address: SocketAddrV4) -> u16 {
        self.ping_with(address, None, PingOrigin::Caller)
    }

    /// Add a node with a known [Id] to the routing table directly.
    pub fn connect(&mut self, node: Node) -> Admission {
        self.routing_table.add(node)
    }

    /// Ping an address, adding the node to the routing table if it responds.
    pub fn connect_address(&mut self, address: SocketAddrV4) {
        self.ping_with(address, None, PingOrigin::Connect);
    }

    /// Start looking up the closest nodes to `target`, the result is reported in
    /// [RpcTickReport::done_lookups] under the returned [LookupId].
    pub fn find_node(&mut self, target: Id) -> LookupId {
        self.start_lookup(target, LookupKind::Caller)
    }

    // === Private Methods ===

    fn ping_with(&mut self, address: SocketAddrV4, contact: Option<Id>, origin: PingOrigin) -> u16 {
        let request = RequestSpecific {
            requester_id: *self.id(),
            request_type: RequestTypeSpecific::Ping,
        };

        self.socket
            .request(address, request, contact, RequestPurpose::Ping(origin))
    }

    fn handle_inbound(&mut self) {
        let Some(inbound) = self.socket.recv_from() else {
            return;
        };

        match inbound {
            Inbound::Request {
                from,
                transaction_id,
                request,
            } => {
                self.routing_table
                    .add(Node::new(request.requester_id, from));

                self.handle_request(from, transaction_id, request);
            }
            Inbound::Response {
                from,
                transaction_id,
                response,
                request,
            } => {
                self.routing_table
                    .add(Node::new(response.responder_id, from));

                match request {
                    Some(request) => self.complete(request, Ok(response)),
                    None => {
                        debug!(?from, "Response to a request that wasn't sent");

                        self.socket.error(
                            from,
                            transaction_id,
                            ErrorSpecific {
                                code: GENERIC_ERROR,
                                description: "Such t wasn't sent".to_string(),
                            },
                        );
                    }
                }
            }
            Inbound::Error {
                from,
                error,
                request,
            } => {
                debug!(?from, ?error, "RPC Error response");

                self.complete(request, Err(RequestError::Remote(error)));
            }
            Inbound::Invalid {
                from,
                transaction_id,
                author,
                error,
            } => {
                if let Some(author) = author {
                    self.routing_table.add(Node::new(author, from));
                }

                self.socket.error(from, transaction_id, error);
            }
            Inbound::AnnounceWithoutInfoHash {
                from,
                transaction_id,
                author,
                token,
            } => {
                self.routing_table.add(Node::new(author, from));

                let description = if self.tokens.validate(&token, Instant::now()) {
                    "announce_peer without info_hash"
                } else {
                    "token is invalid"
                };

                self.socket
                    .error(from, transaction_id, ErrorSpecific::protocol(description));
            }
        }
    }

    /// Apply the outcome of a request, exactly once per request.
    fn complete(&mut self, request: InflightRequest, result: Result<ResponseSpecific, RequestError>) {
        if let Some(contact) = request.contact {
            self.routing_table.record_outcome(&contact, result.is_ok());
        }

        match request.purpose {
            RequestPurpose::Ping(origin) => {
                self.on_ping_response(request.transaction_id, origin, result)
            }
            RequestPurpose::FindNode(lookup_id) => self.on_lookup_response(lookup_id, result),
            RequestPurpose::AnnounceFindNode => {
                if let Ok(response) = result {
                    self.admit(response.nodes.unwrap_or_default());
                }
            }
            RequestPurpose::Announce(info_hash) => {
                self.on_announce_response(info_hash, request.to, result)
            }
            RequestPurpose::AnnouncePeer(info_hash) => match result {
                Ok(_) => trace!(?info_hash, to = ?request.to, "Announced peer"),
                Err(error) => debug!(?info_hash, to = ?request.to, ?error, "Failed to announce peer"),
            },
        }
    }

    fn on_ping_response(
        &mut self,
        transaction_id: u16,
        origin: PingOrigin,
        result: Result<ResponseSpecific, RequestError>,
    ) {
        match origin {
            PingOrigin::Caller => {
                self.report.done_pings.push((
                    transaction_id,
                    result.map(|response| response.responder_id),
                ));
            }
            PingOrigin::Bootstrap => {
                if result.is_ok() && !self.bootstrapped {
                    self.bootstrapped = true;

                    debug!(id = ?self.id(), "Bootstrapping the routing table");
                    self.start_lookup(*self.id(), LookupKind::Bootstrap);
                }
            }
            PingOrigin::Liveness | PingOrigin::Connect => {}
        }
    }

    /// Add nodes to the routing table, returns the ones that were newly inserted.
    fn admit(&mut self, nodes: Vec<Node>) -> Vec<Node> {
        nodes
            .into_iter()
            .filter(|node| self.routing_table.add(*node) == Admission::Inserted)
            .collect()
    }

    fn renew_buckets(&mut self, now: Instant) {
        let next_lookup_id = &mut self.next_lookup_id;

        let due = self.routing_table.due_renewals(now, || {
            *next_lookup_id += 1;
            LookupId(*next_lookup_id)
        });

        for (lookup_id, target) in due {
            trace!(?target, "Renewing bucket");
            self.start_lookup_with_id(lookup_id, target, LookupKind::Renewal);
        }
    }

    fn ping_due_nodes(&mut self, now: Instant) {
        for node in self.routing_table.due_pings(now) {
            self.ping_with(node.address, Some(node.id), PingOrigin::Liveness);
        }
    }
}

/// Results from a single [Rpc::tick] call.
#[derive(Debug, Clone, Default)]
pub struct RpcTickReport {
    /// Events to deliver to subscribers.
    pub events: Vec<DhtEvent>,
    /// Completed [Rpc::find_node] lookups, with every node visited.
    pub done_lookups: Vec<(LookupId, Box<[Node]>)>,
    /// Completed [Rpc::ping] requests, with the responder's [Id].
    pub done_pings: Vec<(u16, Result<Id, RequestError>)>,
}

/// Notifications emitted by a running node.
#[derive(Debug, Clone, PartialEq)]
pub enum DhtEvent {
    /// The node is listening on this address.
    Listening(SocketAddrV4),
    /// A remote peer announced itself, or was found, on `info_hash`.
    PeerDiscovered {
        info_hash: Id,
        peer: SocketAddrV4,
        /// `true` if this node advertises `info_hash` itself.
        advertised: bool,
    },
    /// A peer wasn't announced again in time and was forgotten.
    PeerExpired { info_hash: Id, peer: SocketAddrV4 },
    Error(DhtError),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
/// Errors reported through [DhtEvent::Error].
pub enum DhtError {
    #[error("Advertised infohash {0} has no peer set")]
    AdvertisementMissing(Id),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
/// Failed outcome of a request.
pub enum RequestError {
    #[error("Request timed out")]
    Timeout,

    #[error("Remote error {}: {}", .0.code, .0.description)]
    Remote(ErrorSpecific),
}

/// What to do once an inflight request is done.
#[derive(Debug, Clone)]
pub(crate) enum RequestPurpose {
    Ping(PingOrigin),
    FindNode(LookupId),
    /// `find_node` to a node that answered `get_peers` without nodes.
    AnnounceFindNode,
    /// `get_peers` sent while announcing an infohash.
    Announce(Id),
    AnnouncePeer(Id),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PingOrigin {
    Liveness,
    Connect,
    Bootstrap,
    Caller,
}

/// Resolve addresses, ignoring the ones that fail to resolve and any Ipv6 address.
pub fn to_socket_address<T: ToSocketAddrs>(addresses: &[T]) -> Vec<SocketAddrV4> {
    addresses
        .iter()
        .flat_map(|s| {
            s.to_socket_addrs().map(|addrs| {
                addrs
                    .filter_map(|addr| match addr {
                        SocketAddr::V4(addr_v4) => Some(addr_v4),
                        _ => None,
                    })
                    .collect::<Box<[_]>>()
            })
        })
        .flatten()
        .collect()
}
