//! AsyncDht node.

use std::net::SocketAddrV4;

use crate::{
    common::{Id, Node},
    dht::{ActorMessage, Dht, DhtWasShutdown, PingError, Snapshot},
    rpc::{DhtEvent, Info},
};

impl Dht {
    /// Return an async version of the Dht client.
    pub fn as_async(self) -> AsyncDht {
        AsyncDht(self)
    }
}

#[derive(Debug, Clone)]
/// Async version of the Dht node.
pub struct AsyncDht(Dht);

impl AsyncDht {
    // === Getters ===

    /// Information about this [Dht] node.
    pub async fn info(&self) -> Result<Info, DhtWasShutdown> {
        let (sender, receiver) = flume::bounded::<Info>(1);

        self.0.send(ActorMessage::Info(sender))?;

        receiver.recv_async().await.map_err(|_| DhtWasShutdown)
    }

    /// Subscribe to [DhtEvent]s, starting with [DhtEvent::Listening].
    ///
    /// Use [flume::Receiver::recv_async] or [flume::Receiver::into_stream] to consume them.
    pub fn events(&self) -> Result<flume::Receiver<DhtEvent>, DhtWasShutdown> {
        self.0.events()
    }

    // === Public Methods ===

    /// Shutdown the actor thread loop.
    pub async fn shutdown(&mut self) {
        let (sender, receiver) = flume::bounded::<()>(1);

        let _ = self.0.send(ActorMessage::Shutdown(sender));
        let _ = receiver.recv_async().await;
    }

    /// Ping a node, returns its [Id].
    pub async fn ping(&self, address: SocketAddrV4) -> Result<Id, PingError> {
        let (sender, receiver) = flume::bounded(1);

        self.0.send(ActorMessage::Ping(address, sender))?;

        Ok(receiver.recv_async().await.map_err(|_| DhtWasShutdown)??)
    }

    /// Add a node with a known [Id] to the routing table directly.
    pub fn connect(&self, node: Node) -> Result<(), DhtWasShutdown> {
        self.0.connect(node)
    }

    // === Find nodes ===

    pub async fn find_node(&self, target: Id) -> Result<Box<[Node]>, DhtWasShutdown> {
        let (sender, receiver) = flume::bounded::<Box<[Node]>>(1);

        self.0.send(ActorMessage::FindNode(target, sender))?;

        receiver.recv_async().await.map_err(|_| DhtWasShutdown)
    }

    // === Peers ===

    /// Announce this node as a peer on `info_hash` reachable on `port`,
    /// right away and then periodically.
    pub fn advertise(&self, info_hash: Id, port: u16) -> Result<(), DhtWasShutdown> {
        self.0.advertise(info_hash, port)
    }

    /// Peers stored locally for `info_hash`.
    pub async fn get_peers(
        &self,
        info_hash: Id,
    ) -> Result<Option<Vec<SocketAddrV4>>, DhtWasShutdown> {
        let (sender, receiver) = flume::bounded(1);

        self.0.send(ActorMessage::GetPeers(info_hash, sender))?;

        receiver.recv_async().await.map_err(|_| DhtWasShutdown)
    }

    /// Save this node's [Id], port and routing table.
    pub async fn save(&self) -> Result<Snapshot, DhtWasShutdown> {
        let (sender, receiver) = flume::bounded(1);

        self.0.send(ActorMessage::Save(sender))?;

        receiver.recv_async().await.map_err(|_| DhtWasShutdown)
    }
}

#[cfg(test)]
mod test {
    use std::net::Ipv4Addr;

    use crate::dht::Testnet;

    use super::*;

    #[test]
    fn shutdown() {
        async fn test() {
            let mut a = Dht::builder()
                .bind_address(Ipv4Addr::LOCALHOST)
                .build()
                .unwrap()
                .as_async();

            let b = a.clone();

            a.shutdown().await;

            assert!(b.info().await.is_err());
        }

        futures::executor::block_on(test());
    }

    #[test]
    fn ping() {
        async fn test() {
            let testnet = Testnet::new(2).unwrap();

            let a = testnet.nodes[0].clone().as_async();
            let b = testnet.nodes[1].clone().as_async();

            let b_info = b.info().await.unwrap();

            let id = a.ping(b_info.local_addr()).await.unwrap();

            assert_eq!(&id, b_info.id());
        }

        futures::executor::block_on(test());
    }

    #[test]
    fn advertise_and_get_local_peers() {
        async fn test() {
            let a = Dht::builder()
                .bind_address(Ipv4Addr::LOCALHOST)
                .build()
                .unwrap()
                .as_async();

            let info_hash = Id::random();

            assert_eq!(a.get_peers(info_hash).await.unwrap(), None);

            a.advertise(info_hash, 45555).unwrap();

            assert_eq!(a.get_peers(info_hash).await.unwrap(), Some(vec![]));
            assert_eq!(a.info().await.unwrap().advertised(), &[info_hash]);
        }

        futures::executor::block_on(test());
    }
}
