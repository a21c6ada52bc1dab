use std::net::SocketAddrV4;

use crate::Id;

use super::Rpc;

/// Information about this node.
#[derive(Debug, Clone)]
pub struct Info {
    id: Id,
    local_addr: SocketAddrV4,
    routing_table_size: usize,
    advertised: Vec<Id>,
}

impl Info {
    /// This Node's [Id]
    pub fn id(&self) -> &Id {
        &self.id
    }
    /// Local UDP Ipv4 socket address that this node is listening on.
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.local_addr
    }
    /// Number of nodes in the routing table.
    pub fn routing_table_size(&self) -> usize {
        self.routing_table_size
    }
    /// Infohashes this node announces itself on.
    pub fn advertised(&self) -> &[Id] {
        &self.advertised
    }
}

impl From<&Rpc> for Info {
    fn from(rpc: &Rpc) -> Self {
        Self {
            id: *rpc.id(),
            local_addr: rpc.local_addr(),
            routing_table_size: rpc.routing_table().size(),
            advertised: rpc.advertised().to_vec(),
        }
    }
}
