//! Iterative `find_node` lookups.
//!
//! Each round queries every node of the frontier concurrently, and waits for
//! all of them to respond or time out. Nodes newly inserted in the routing table
//! from their responses form the next frontier.

use std::time::Instant;

use tracing::{debug, error, trace};

use crate::common::{
    FindNodeRequestArguments, Id, Node, RequestSpecific, RequestTypeSpecific, ResponseSpecific,
    MAX_BUCKET_SIZE_K,
};

use super::{RequestError, RequestPurpose, Rpc};

/// A lookup stops querying new nodes once it visited this many.
const MAX_LOOKUP_RESULTS: usize = 2 * MAX_BUCKET_SIZE_K;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Identifies a running lookup.
pub struct LookupId(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Who is waiting on a lookup.
pub(crate) enum LookupKind {
    Caller,
    Renewal,
    SelfRefresh,
    Bootstrap,
    Announce,
}

#[derive(Debug)]
pub(crate) struct Lookup {
    target: Id,
    kind: LookupKind,
    /// Every node queried so far, in the order they were queried.
    results: Vec<Node>,
    /// Requests of the current round still inflight.
    pending: usize,
    next_frontier: Vec<Node>,
}

impl Lookup {
    pub fn new(target: Id, kind: LookupKind) -> Self {
        Lookup {
            target,
            kind,
            results: Vec::new(),
            pending: 0,
            next_frontier: Vec::new(),
        }
    }

    pub fn target(&self) -> &Id {
        &self.target
    }

    pub fn results(&self) -> &[Node] {
        &self.results
    }

    /// Start a new round querying `frontier`, returns `None` if the lookup is done instead.
    pub fn advance(&mut self, frontier: Vec<Node>) -> Option<Vec<Node>> {
        if self.results.len() >= MAX_LOOKUP_RESULTS || frontier.is_empty() {
            return None;
        }

        self.results.extend_from_slice(&frontier);
        self.pending = frontier.len();

        Some(frontier)
    }

    /// Record a finished request of the current round, returns `true` if the round is over.
    pub fn on_response(&mut self, inserted: Vec<Node>) -> bool {
        self.pending = self.pending.saturating_sub(1);
        self.next_frontier.extend(inserted);

        self.pending == 0
    }

    pub fn take_frontier(&mut self) -> Vec<Node> {
        std::mem::take(&mut self.next_frontier)
    }
}

impl Rpc {
    pub(crate) fn start_lookup(&mut self, target: Id, kind: LookupKind) -> LookupId {
        self.next_lookup_id += 1;
        let lookup_id = LookupId(self.next_lookup_id);

        self.start_lookup_with_id(lookup_id, target, kind);

        lookup_id
    }

    pub(crate) fn start_lookup_with_id(&mut self, lookup_id: LookupId, target: Id, kind: LookupKind) {
        self.lookups.insert(lookup_id, Lookup::new(target, kind));

        let frontier = self.routing_table.k_closest(&target);
        self.advance_lookup(lookup_id, frontier);
    }

    pub(super) fn on_lookup_response(
        &mut self,
        lookup_id: LookupId,
        result: Result<ResponseSpecific, RequestError>,
    ) {
        let inserted = match result {
            Ok(response) => self.admit(response.nodes.unwrap_or_default()),
            Err(_) => Vec::new(),
        };

        let Some(lookup) = self.lookups.get_mut(&lookup_id) else {
            return;
        };

        if lookup.on_response(inserted) {
            let frontier = lookup.take_frontier();
            self.advance_lookup(lookup_id, frontier);
        }
    }

    fn advance_lookup(&mut self, lookup_id: LookupId, frontier: Vec<Node>) {
        let Some(lookup) = self.lookups.get_mut(&lookup_id) else {
            return;
        };

        let target = *lookup.target();

        match lookup.advance(frontier) {
            Some(frontier) => {
                for node in frontier {
                    let request = RequestSpecific {
                        requester_id: *self.id(),
                        request_type: RequestTypeSpecific::FindNode(FindNodeRequestArguments {
                            target,
                        }),
                    };

                    self.socket.request(
                        node.address,
                        request,
                        Some(node.id),
                        RequestPurpose::FindNode(lookup_id),
                    );
                }
            }
            None => {
                if let Some(lookup) = self.lookups.remove(&lookup_id) {
                    self.finish_lookup(lookup_id, lookup);
                }
            }
        }
    }

    fn finish_lookup(&mut self, lookup_id: LookupId, lookup: Lookup) {
        debug!(
            target = ?lookup.target,
            kind = ?lookup.kind,
            visited = lookup.results.len(),
            "Lookup done"
        );

        match lookup.kind {
            LookupKind::Caller => {
                self.report
                    .done_lookups
                    .push((lookup_id, lookup.results.into_boxed_slice()));
            }
            LookupKind::Renewal => self.routing_table.renewal_done(lookup_id, Instant::now()),
            LookupKind::Bootstrap => {
                let table_size = self.routing_table.size();

                if table_size == 0 {
                    error!("Could not bootstrap the routing table");
                } else {
                    debug!(id = ?self.id(), table_size, "Populated the routing table");
                }
            }
            LookupKind::SelfRefresh => {
                trace!(id = ?self.id(), table_size = self.routing_table.size(), "Refreshed own neighbourhood");
            }
            LookupKind::Announce => {}
        }
    }
}
