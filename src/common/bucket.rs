//! A bucket of the routing table, owning a contiguous range of the [Id] space.

use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::time::{Duration, Instant};

use crate::common::{
    arith, Id, Node, PeerAdmission, PeerSet, MAX_BUCKET_DEPTH, MAX_BUCKET_SIZE_K,
};
use crate::rpc::LookupId;

/// A node is marked bad after this many consecutive failed requests.
pub const MAX_CONSECUTIVE_FAILURES: u8 = 3;

/// Default interval between two random lookups refreshing a bucket's range.
pub const DEFAULT_BUCKET_RENEWAL_INTERVAL: Duration = Duration::from_secs(15 * 60);
/// Default interval between two liveness pings to a node in the routing table.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(15 * 60);

const ONE: [u8; 1] = [1];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Outcome of adding a node to a bucket or the routing table.
pub enum Admission {
    /// The node is new and was inserted.
    Inserted,
    /// The node was already known, nothing changed.
    Existing,
    /// No room for the node.
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// State of a bucket's periodic renewal.
pub enum Renewal {
    /// A lookup of a random [Id] in this bucket's range is due at this instant.
    Due(Instant),
    /// Renewal lookup is running, rearmed once it is done.
    Running(LookupId),
}

#[derive(Debug, Clone)]
/// A node stored in a [Bucket], and its liveness state.
pub struct RemoteNode {
    node: Node,
    first_seen: Instant,
    last_seen: Instant,
    failures: u8,
    good: bool,
    next_ping: Instant,
}

impl RemoteNode {
    pub fn new(node: Node, ping_interval: Duration) -> Self {
        let now = Instant::now();

        RemoteNode {
            node,
            first_seen: now,
            last_seen: now,
            failures: 0,
            good: true,
            next_ping: now + ping_interval,
        }
    }

    // === Getters ===

    pub fn id(&self) -> &Id {
        &self.node.id
    }

    pub fn address(&self) -> SocketAddrV4 {
        self.node.address
    }

    pub fn node(&self) -> Node {
        self.node
    }

    pub fn first_seen(&self) -> Instant {
        self.first_seen
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    pub fn failures(&self) -> u8 {
        self.failures
    }

    /// Bad nodes are still queried, but are the first to be evicted.
    pub fn is_good(&self) -> bool {
        self.good
    }

    pub(crate) fn ping_is_due(&self, now: Instant) -> bool {
        self.next_ping <= now
    }

    // === Public Methods ===

    /// Record a successful request.
    pub fn thank(&mut self) {
        self.failures = 0;
        self.good = true;
        self.last_seen = Instant::now();
    }

    /// Record a failed request.
    pub fn curse(&mut self) {
        self.failures = self.failures.saturating_add(1);

        if self.failures >= MAX_CONSECUTIVE_FAILURES {
            self.good = false;
        }
    }

    pub(crate) fn schedule_ping(&mut self, at: Instant) {
        self.next_ping = at;
    }

    #[cfg(test)]
    pub(crate) fn set_last_seen(&mut self, last_seen: Instant) {
        self.last_seen = last_seen;
    }
}

#[derive(Debug, Clone)]
/// Up to [MAX_BUCKET_SIZE_K] nodes and up to as many infohashes, within `[start, end]`.
pub struct Bucket {
    start: Id,
    end: Id,
    depth: usize,
    /// Nodes in insertion order.
    nodes: Vec<RemoteNode>,
    peers: HashMap<Id, PeerSet>,
    renewal: Renewal,
    /// Every bucket runs one renewal right after it is created, whatever gets added to it meanwhile.
    first_renewal_pending: bool,
    renewal_interval: Duration,
}

impl Bucket {
    /// The bucket covering the whole [Id] space.
    pub fn root(renewal_interval: Duration) -> Self {
        Bucket::new(Id::MIN, Id::MAX, 0, renewal_interval)
    }

    fn new(start: Id, end: Id, depth: usize, renewal_interval: Duration) -> Self {
        Bucket {
            start,
            end,
            depth,
            nodes: Vec::with_capacity(MAX_BUCKET_SIZE_K),
            peers: HashMap::new(),
            renewal: Renewal::Due(Instant::now()),
            first_renewal_pending: true,
            renewal_interval,
        }
    }

    // === Getters ===

    pub fn start(&self) -> &Id {
        &self.start
    }

    /// Inclusive end of this bucket's range.
    pub fn end(&self) -> &Id {
        &self.end
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn nodes(&self) -> &[RemoteNode] {
        &self.nodes
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut [RemoteNode] {
        &mut self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn renewal(&self) -> Renewal {
        self.renewal
    }

    /// Infohashes with peers or advertisements in this bucket.
    pub fn info_hashes(&self) -> impl Iterator<Item = &Id> {
        self.peers.keys()
    }

    // === Public Methods ===

    /// Returns `true` if `start <= id <= end`.
    pub fn contains(&self, id: &Id) -> bool {
        self.start <= *id && *id <= self.end
    }

    pub fn node_mut(&mut self, id: &Id) -> Option<&mut RemoteNode> {
        self.nodes.iter_mut().find(|node| node.id() == id)
    }

    /// Add a node, evicting the bad node seen the longest time ago if the bucket is full.
    pub fn add(&mut self, node: Node, ping_interval: Duration) -> Admission {
        if self.nodes.iter().any(|existing| existing.id() == &node.id) {
            return Admission::Existing;
        }

        if self.nodes.len() >= MAX_BUCKET_SIZE_K {
            let evicted = self
                .nodes
                .iter()
                .enumerate()
                .filter(|(_, node)| !node.is_good())
                .min_by_key(|(_, node)| node.last_seen())
                .map(|(index, _)| index);

            match evicted {
                Some(index) => {
                    let evicted = self.nodes.remove(index);
                    tracing::debug!(id = ?evicted.id(), address = ?evicted.address(), "Evicted bad node");
                }
                None => return Admission::Rejected,
            }
        }

        self.nodes.push(RemoteNode::new(node, ping_interval));
        self.postpone_renewal();

        Admission::Inserted
    }

    pub fn remove(&mut self, id: &Id) -> Option<RemoteNode> {
        let index = self.nodes.iter().position(|node| node.id() == id)?;
        let removed = self.nodes.remove(index);

        self.postpone_renewal();

        Some(removed)
    }

    /// Split this bucket into `[start, mid]` and `[mid + 1, end]`, where `mid = (start + end) / 2`.
    ///
    /// Nodes and peers are copied, with their state, into whichever half contains them.
    /// Both halves are due for renewal immediately.
    ///
    /// Returns `None` if this bucket is already at [MAX_BUCKET_DEPTH].
    pub fn split(&self) -> Option<(Bucket, Bucket)> {
        if self.depth >= MAX_BUCKET_DEPTH {
            return None;
        }

        let mid = Id::from_wide(&arith::shr(&arith::add(&self.start.0, &self.end.0)));
        let after_mid = Id::from_wide(&arith::add(&mid.0, &ONE));

        let mut head = Bucket::new(self.start, mid, self.depth + 1, self.renewal_interval);
        let mut tail = Bucket::new(after_mid, self.end, self.depth + 1, self.renewal_interval);

        for node in &self.nodes {
            if head.contains(node.id()) {
                head.nodes.push(node.clone());
            } else {
                tail.nodes.push(node.clone());
            }
        }

        for (info_hash, peers) in &self.peers {
            if head.contains(info_hash) {
                head.peers.insert(*info_hash, peers.clone());
            } else {
                tail.peers.insert(*info_hash, peers.clone());
            }
        }

        Some((head, tail))
    }

    // === Peers ===

    /// Register this node as a peer announcing `port` on `info_hash`.
    pub fn advertise(&mut self, info_hash: Id, port: u16) {
        self.peers
            .entry(info_hash)
            .and_modify(|peers| peers.set_port(port))
            .or_insert_with(|| PeerSet::advertised(port));
    }

    /// Add or renew a peer on `info_hash`. A non zero `self_port` overrides the advertised port.
    ///
    /// Returns `None` if the infohash is new, and this bucket already tracks
    /// [MAX_BUCKET_SIZE_K] infohashes.
    pub fn add_peer(
        &mut self,
        info_hash: Id,
        address: SocketAddrV4,
        self_port: u16,
        expires_at: Instant,
    ) -> Option<PeerAdmission> {
        if !self.peers.contains_key(&info_hash) && self.peers.len() >= MAX_BUCKET_SIZE_K {
            return None;
        }

        let peers = self.peers.entry(info_hash).or_default();

        if self_port != 0 {
            peers.set_port(self_port);
        }

        Some(peers.add(address, expires_at))
    }

    pub fn get_peers(&self, info_hash: &Id) -> Option<&PeerSet> {
        self.peers.get(info_hash)
    }

    /// Remove expired peers. An infohash is forgotten when its last peer expires,
    /// unless this node advertises a port on it.
    pub fn expire_peers(&mut self, now: Instant) -> Vec<(Id, SocketAddrV4)> {
        let mut expired = Vec::new();

        self.peers.retain(|info_hash, peers| {
            let gone = peers.expire(now);

            if gone.is_empty() {
                return true;
            }

            expired.extend(gone.into_iter().map(|address| (*info_hash, address)));

            !peers.is_removable()
        });

        expired
    }

    // === Renewal ===

    pub(crate) fn renewal_is_due(&self, now: Instant) -> bool {
        matches!(self.renewal, Renewal::Due(at) if at <= now)
    }

    pub(crate) fn start_renewal(&mut self, lookup_id: LookupId) -> Id {
        self.renewal = Renewal::Running(lookup_id);
        self.first_renewal_pending = false;

        Id::from_wide(&arith::random(&self.start.0, &self.end.0))
    }

    /// Rearm the renewal if it is waiting on `lookup_id`, returns `true` if it was.
    pub(crate) fn finish_renewal(&mut self, lookup_id: LookupId, now: Instant) -> bool {
        if self.renewal == Renewal::Running(lookup_id) {
            self.renewal = Renewal::Due(now + self.renewal_interval);
            return true;
        }
        false
    }

    /// An active bucket doesn't need a renewal lookup any time soon.
    fn postpone_renewal(&mut self) {
        if self.first_renewal_pending {
            return;
        }

        if let Renewal::Due(_) = self.renewal {
            self.renewal = Renewal::Due(Instant::now() + self.renewal_interval);
        }
    }
}
