//! Peers announced on an infohash, as stored in a [crate::common::Bucket].

use std::net::SocketAddrV4;
use std::time::{Duration, Instant};

/// Default duration a peer is remembered without being announced again.
pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peer {
    pub address: SocketAddrV4,
    pub expires_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerAdmission {
    /// First time this peer was seen on this infohash.
    Discovered,
    /// Known peer, its expiry was pushed back.
    Renewed,
}

/// Peers of a single infohash, plus the port this node advertises on it, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerSet {
    port: u16,
    peers: Vec<Peer>,
}

impl PeerSet {
    /// A set that only records that this node advertises itself on `port`.
    pub fn advertised(port: u16) -> Self {
        PeerSet {
            port,
            peers: Vec::new(),
        }
    }

    // === Getters ===

    /// The port this node advertises, `0` if it doesn't advertise itself.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn addresses(&self) -> Vec<SocketAddrV4> {
        self.peers.iter().map(|peer| peer.address).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Returns `true` if there is nothing left worth keeping in this set.
    pub fn is_removable(&self) -> bool {
        self.peers.is_empty() && self.port == 0
    }

    // === Public Methods ===

    pub fn set_port(&mut self, port: u16) {
        self.port = port;
    }

    /// Add a new peer or renew an existing one.
    pub fn add(&mut self, address: SocketAddrV4, expires_at: Instant) -> PeerAdmission {
        if let Some(peer) = self.peers.iter_mut().find(|peer| peer.address == address) {
            peer.expires_at = expires_at;

            return PeerAdmission::Renewed;
        }

        self.peers.push(Peer {
            address,
            expires_at,
        });

        PeerAdmission::Discovered
    }

    /// Remove and return all peers that expired by `now`.
    pub fn expire(&mut self, now: Instant) -> Vec<SocketAddrV4> {
        let mut expired = Vec::new();

        self.peers.retain(|peer| {
            if peer.expires_at <= now {
                expired.push(peer.address);
                return false;
            }
            true
        });

        expired
    }
}
