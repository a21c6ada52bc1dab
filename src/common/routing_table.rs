//! Binary tree of buckets, flattened into a sorted vector.

use std::net::SocketAddrV4;
use std::time::{Duration, Instant};

use crate::common::{
    Admission, Bucket, Id, Node, PeerAdmission, PeerSet, RemoteNode,
    DEFAULT_BUCKET_RENEWAL_INTERVAL, DEFAULT_PING_INTERVAL,
};
use crate::rpc::LookupId;

/// K = the default maximum size of a k-bucket.
pub const MAX_BUCKET_SIZE_K: usize = 8;

#[derive(Debug, Clone)]
/// Buckets partitioning the whole [Id] space, sorted by range.
///
/// Only the bucket covering this node's own [Id] ever splits.
pub struct RoutingTable {
    id: Id,
    buckets: Vec<Bucket>,
    ping_interval: Duration,
}

impl RoutingTable {
    /// Create a new [RoutingTable] with a given id.
    pub fn new(id: Id) -> Self {
        RoutingTable {
            id,
            buckets: vec![Bucket::root(DEFAULT_BUCKET_RENEWAL_INTERVAL)],
            ping_interval: DEFAULT_PING_INTERVAL,
        }
    }

    /// Set the interval between random lookups refreshing each bucket.
    ///
    /// Should be set before adding any nodes.
    pub fn with_renewal_interval(mut self, interval: Duration) -> Self {
        self.buckets = vec![Bucket::root(interval)];
        self
    }

    /// Set the interval between liveness pings of each node.
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    // === Getters ===

    /// Returns the [Id] of this node, where the distance is measured from.
    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    /// Returns the number of nodes in this routing table.
    pub fn size(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|bucket| bucket.is_empty())
    }

    /// Every node in the table, in [Id] order of their buckets.
    pub fn nodes(&self) -> impl Iterator<Item = &RemoteNode> {
        self.buckets.iter().flat_map(|bucket| bucket.nodes())
    }

    // === Public Methods ===

    /// Add a node, splitting the bucket covering this node's [Id] as long as needed.
    pub fn add(&mut self, node: Node) -> Admission {
        if node.id == self.id {
            return Admission::Rejected;
        }

        loop {
            let index = self.bucket_index(&node.id);
            let bucket = &mut self.buckets[index];

            match bucket.add(node, self.ping_interval) {
                Admission::Rejected if bucket.contains(&self.id) => match bucket.split() {
                    Some((head, tail)) => {
                        tracing::trace!(depth = head.depth(), "Split bucket");
                        self.buckets[index] = head;
                        self.buckets.insert(index + 1, tail);
                    }
                    None => return Admission::Rejected,
                },
                admission => return admission,
            }
        }
    }

    pub fn remove(&mut self, id: &Id) -> Option<RemoteNode> {
        let index = self.bucket_index(id);
        self.buckets[index].remove(id)
    }

    pub fn get(&self, id: &Id) -> Option<&RemoteNode> {
        self.bucket(id).nodes().iter().find(|node| node.id() == id)
    }

    pub fn node_mut(&mut self, id: &Id) -> Option<&mut RemoteNode> {
        let index = self.bucket_index(id);
        self.buckets[index].node_mut(id)
    }

    /// Thank or curse a node after a request to it succeeded or failed.
    pub fn record_outcome(&mut self, id: &Id, success: bool) {
        if let Some(node) = self.node_mut(id) {
            if success {
                node.thank();
            } else {
                node.curse();
            }
        }
    }

    /// Up to [MAX_BUCKET_SIZE_K] nodes from the bucket covering `target`,
    /// completed from its neighbouring buckets if it has fewer.
    pub fn k_closest(&self, target: &Id) -> Vec<Node> {
        let index = self.bucket_index(target);

        let mut nodes: Vec<Node> = self.buckets[index]
            .nodes()
            .iter()
            .map(|node| node.node())
            .collect();

        if nodes.len() < MAX_BUCKET_SIZE_K {
            let neighbours = [index.checked_sub(1), index.checked_add(1)];

            for bucket in neighbours
                .into_iter()
                .flatten()
                .filter_map(|index| self.buckets.get(index))
            {
                nodes.extend(bucket.nodes().iter().map(|node| node.node()));
            }
        }

        nodes.truncate(MAX_BUCKET_SIZE_K);
        nodes
    }

    // === Peers ===

    pub fn advertise(&mut self, info_hash: Id, port: u16) {
        let index = self.bucket_index(&info_hash);
        self.buckets[index].advertise(info_hash, port);
    }

    /// See [Bucket::add_peer].
    pub fn add_peer(
        &mut self,
        info_hash: Id,
        address: SocketAddrV4,
        self_port: u16,
        expires_at: Instant,
    ) -> Option<PeerAdmission> {
        let index = self.bucket_index(&info_hash);
        self.buckets[index].add_peer(info_hash, address, self_port, expires_at)
    }

    pub fn get_peers(&self, info_hash: &Id) -> Option<&PeerSet> {
        self.bucket(info_hash).get_peers(info_hash)
    }

    /// Remove expired peers from every bucket, returns the removed `(info_hash, peer)` pairs.
    pub fn expire_peers(&mut self, now: Instant) -> Vec<(Id, SocketAddrV4)> {
        self.buckets
            .iter_mut()
            .flat_map(|bucket| bucket.expire_peers(now))
            .collect()
    }

    // === Maintenance ===

    /// Mark every bucket due for renewal as running, and return a random target
    /// in its range for each, alongside the [LookupId] it was assigned.
    pub(crate) fn due_renewals(
        &mut self,
        now: Instant,
        mut next_lookup_id: impl FnMut() -> LookupId,
    ) -> Vec<(LookupId, Id)> {
        self.buckets
            .iter_mut()
            .filter(|bucket| bucket.renewal_is_due(now))
            .map(|bucket| {
                let lookup_id = next_lookup_id();
                (lookup_id, bucket.start_renewal(lookup_id))
            })
            .collect()
    }

    /// Rearm the renewal of the bucket waiting on `lookup_id`, if it still exists.
    pub(crate) fn renewal_done(&mut self, lookup_id: LookupId, now: Instant) {
        for bucket in self.buckets.iter_mut() {
            if bucket.finish_renewal(lookup_id, now) {
                return;
            }
        }
    }

    /// Nodes due for a liveness ping, each rescheduled for the next interval.
    pub(crate) fn due_pings(&mut self, now: Instant) -> Vec<Node> {
        let next_ping = now + self.ping_interval;

        self.buckets
            .iter_mut()
            .flat_map(|bucket| bucket.nodes_mut())
            .filter(|node| node.ping_is_due(now))
            .map(|node| {
                node.schedule_ping(next_ping);
                node.node()
            })
            .collect()
    }

    // === Private Methods ===

    fn bucket_index(&self, id: &Id) -> usize {
        self.buckets
            .partition_point(|bucket| bucket.end() < id)
            .min(self.buckets.len() - 1)
    }

    fn bucket(&self, id: &Id) -> &Bucket {
        &self.buckets[self.bucket_index(id)]
    }
}
