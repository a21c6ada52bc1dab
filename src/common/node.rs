//! Contact information of a remote node.
use std::net::SocketAddrV4;

use crate::common::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// A remote node's [Id] and the address it is reachable on.
pub struct Node {
    pub id: Id,
    pub address: SocketAddrV4,
}

impl Node {
    /// Creates a new Node from an id and socket address.
    pub fn new(id: Id, address: SocketAddrV4) -> Node {
        Node { id, address }
    }

    /// Creates a node with random Id for testing purposes.
    #[cfg(test)]
    pub fn random() -> Node {
        Node {
            id: Id::random(),
            address: SocketAddrV4::new(0.into(), 0),
        }
    }
}
