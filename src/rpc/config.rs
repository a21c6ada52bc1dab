use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::time::Duration;

use crate::common::{
    Id, Node, DEFAULT_BUCKET_RENEWAL_INTERVAL, DEFAULT_PEER_TIMEOUT, DEFAULT_PING_INTERVAL,
};

use super::{
    DEFAULT_ANNOUNCE_INTERVAL, DEFAULT_REQUEST_TIMEOUT, DEFAULT_SELF_REFRESH_INTERVAL,
    DEFAULT_TOKEN_TIMEOUT,
};

#[derive(Debug)]
/// Dht Configurations
pub struct Config {
    /// This node's [Id].
    ///
    /// Defaults to None, where a random [Id] is generated.
    pub id: Option<Id>,
    /// Explicit port to listen on.
    ///
    /// Defaults to None, where any free port is used.
    pub port: Option<u16>,
    /// Ipv4 address to bind the UDP socket to.
    ///
    /// Defaults to `0.0.0.0`
    pub bind_address: Ipv4Addr,
    /// An already bound socket to use instead of binding a new one.
    ///
    /// Takes precedence over [Self::port] and [Self::bind_address].
    pub socket: Option<UdpSocket>,
    /// Channel receiving datagrams that are not KRPC messages, alongside their origin.
    ///
    /// Useful when [Self::socket] is shared with another protocol.
    pub passthrough: Option<flume::Sender<(Vec<u8>, SocketAddrV4)>>,
    /// Addresses pinged at start up, the first to respond triggers a lookup of this node's own [Id].
    ///
    /// Defaults to an empty list.
    pub bootstrap: Vec<SocketAddrV4>,
    /// Nodes added to the routing table directly at start up, see [crate::DhtBuilder::snapshot].
    pub nodes: Vec<Node>,
    /// UDP socket request timeout duration.
    ///
    /// The longer this duration is, the longer lookups take until they are deemed "done".
    /// The shorter this duration is, the more responses from busy nodes we miss out on.
    ///
    /// Defaults to [DEFAULT_REQUEST_TIMEOUT]
    pub request_timeout: Duration,
    /// Duration a token issued in a `get_peers` response is accepted by `announce_peer`.
    ///
    /// Defaults to [DEFAULT_TOKEN_TIMEOUT]
    pub token_timeout: Duration,
    /// Duration an announced peer is remembered unless announced again.
    ///
    /// Defaults to [DEFAULT_PEER_TIMEOUT]
    pub peer_timeout: Duration,
    /// Interval between two announcements of every advertised infohash.
    ///
    /// Defaults to [DEFAULT_ANNOUNCE_INTERVAL]
    pub announce_interval: Duration,
    /// Interval between two random lookups in the range of each bucket.
    ///
    /// Defaults to [DEFAULT_BUCKET_RENEWAL_INTERVAL]
    pub bucket_renewal_interval: Duration,
    /// Interval between two liveness pings of each node in the routing table.
    ///
    /// Defaults to [DEFAULT_PING_INTERVAL]
    pub ping_interval: Duration,
    /// Interval between two lookups of this node's own [Id].
    ///
    /// Defaults to [DEFAULT_SELF_REFRESH_INTERVAL]
    pub self_refresh_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            id: None,
            port: None,
            bind_address: Ipv4Addr::UNSPECIFIED,
            socket: None,
            passthrough: None,
            bootstrap: Vec::new(),
            nodes: Vec::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            token_timeout: DEFAULT_TOKEN_TIMEOUT,
            peer_timeout: DEFAULT_PEER_TIMEOUT,
            announce_interval: DEFAULT_ANNOUNCE_INTERVAL,
            bucket_renewal_interval: DEFAULT_BUCKET_RENEWAL_INTERVAL,
            ping_interval: DEFAULT_PING_INTERVAL,
            self_refresh_interval: DEFAULT_SELF_REFRESH_INTERVAL,
        }
    }
}
