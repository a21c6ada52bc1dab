use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::time::{Duration, Instant};

use crate::common::Id;
use crate::rpc::RequestPurpose;

#[derive(Debug, Clone)]
pub(crate) struct InflightRequest {
    pub transaction_id: u16,
    pub to: SocketAddrV4,
    pub sent_at: Instant,
    /// The routing table entry to thank or curse once this request is done.
    pub contact: Option<Id>,
    pub purpose: RequestPurpose,
}

impl InflightRequest {
    /// Same as SocketAddr::eq but ignores the ip if it is unspecified for testing reasons.
    pub fn does_match(&self, from: &SocketAddrV4) -> bool {
        if self.to.port() != from.port() {
            return false;
        }

        if self.to.ip().is_unspecified() {
            return true;
        }

        self.to.ip() == from.ip()
    }
}

#[derive(Debug)]
pub(crate) struct InflightRequests {
    request_timeout: Duration,
    requests: HashMap<u16, InflightRequest>,
}

impl InflightRequests {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            request_timeout,
            requests: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn contains(&self, transaction_id: u16) -> bool {
        self.requests.contains_key(&transaction_id)
    }

    /// A random transaction id that isn't inflight.
    pub fn next_transaction_id(&self) -> u16 {
        loop {
            let transaction_id = rand::random::<u16>();

            if !self.contains(transaction_id) {
                return transaction_id;
            }
        }
    }

    pub fn insert(&mut self, request: InflightRequest) {
        self.requests.insert(request.transaction_id, request);
    }

    /// Remove the request on `transaction_id` if it was sent to `from`.
    pub fn remove(&mut self, transaction_id: u16, from: &SocketAddrV4) -> Option<InflightRequest> {
        if !self.requests.get(&transaction_id)?.does_match(from) {
            return None;
        }

        self.requests.remove(&transaction_id)
    }

    /// Remove and return every request that didn't get a response in time.
    pub fn expired(&mut self, now: Instant) -> Vec<InflightRequest> {
        let timeout = self.request_timeout;
        let mut expired = Vec::new();

        self.requests.retain(|_, request| {
            if now.saturating_duration_since(request.sent_at) >= timeout {
                expired.push(request.clone());
                return false;
            }
            true
        });

        expired
    }
}
