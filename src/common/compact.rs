//! Compact encoding of peers (ip, port) and nodes (id, ip, port).

use std::net::{Ipv4Addr, SocketAddrV4};

use crate::common::{Id, Node, ID_SIZE};

/// 4 bytes ip address and 2 bytes big-endian port.
pub const COMPACT_PEER_SIZE: usize = 6;
/// 20 bytes [Id] followed by a compact peer.
pub const COMPACT_NODE_SIZE: usize = ID_SIZE + COMPACT_PEER_SIZE;

pub fn peer_to_bytes(peer: &SocketAddrV4) -> [u8; COMPACT_PEER_SIZE] {
    let mut bytes = [0_u8; COMPACT_PEER_SIZE];

    bytes[..4].copy_from_slice(&peer.ip().octets());
    bytes[4..].copy_from_slice(&peer.port().to_be_bytes());

    bytes
}

/// Decode a single compact peer, returns `None` unless `bytes` is exactly 6 bytes.
pub fn bytes_to_peer(bytes: &[u8]) -> Option<SocketAddrV4> {
    if bytes.len() != COMPACT_PEER_SIZE {
        return None;
    }

    let ip = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
    let port = u16::from_be_bytes([bytes[4], bytes[5]]);

    Some(SocketAddrV4::new(ip, port))
}

pub fn peers_to_bytes(peers: &[SocketAddrV4]) -> Vec<u8> {
    peers.iter().flat_map(peer_to_bytes).collect()
}

/// Decode concatenated compact peers, ignoring any trailing partial record.
pub fn bytes_to_peers(bytes: &[u8]) -> Vec<SocketAddrV4> {
    bytes
        .chunks_exact(COMPACT_PEER_SIZE)
        .filter_map(bytes_to_peer)
        .collect()
}

pub fn nodes_to_bytes(nodes: &[Node]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(nodes.len() * COMPACT_NODE_SIZE);

    for node in nodes {
        bytes.extend_from_slice(node.id.as_bytes());
        bytes.extend_from_slice(&peer_to_bytes(&node.address));
    }

    bytes
}

/// Decode concatenated compact nodes, ignoring any trailing partial record.
pub fn bytes_to_nodes(bytes: &[u8]) -> Vec<Node> {
    bytes
        .chunks_exact(COMPACT_NODE_SIZE)
        .filter_map(|chunk| {
            let id = Id::from_bytes(&chunk[..ID_SIZE]).ok()?;
            let address = bytes_to_peer(&chunk[ID_SIZE..])?;

            Some(Node::new(id, address))
        })
        .collect()
}
