//! Advertise this node as a peer, and record peers announced by others.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Instant;

use tracing::{debug, error, trace};

use crate::common::{
    AnnouncePeerRequestArguments, FindNodeRequestArguments, GetPeersRequestArguments, Id,
    PeerAdmission, RequestSpecific, RequestTypeSpecific, ResponseSpecific,
};

use super::lookup::LookupKind;
use super::{DhtError, DhtEvent, RequestError, RequestPurpose, Rpc};

impl Rpc {
    /// Announce this node as a peer on `info_hash` reachable on `port`,
    /// right away and then periodically.
    ///
    /// A `port` of `0` keeps tracking peers of `info_hash` without announcing this node.
    pub fn advertise(&mut self, info_hash: Id, port: u16) {
        self.routing_table.advertise(info_hash, port);

        if !self.advertised.contains(&info_hash) {
            self.advertised.push(info_hash);
        }

        self.announce();
    }

    /// Announce every advertised infohash to the closest nodes this node knows.
    pub(super) fn announce(&mut self) {
        for info_hash in self.advertised.clone() {
            if self.routing_table.get_peers(&info_hash).is_none() {
                error!(?info_hash, "Advertised infohash has no peer set");

                self.report
                    .events
                    .push(DhtEvent::Error(DhtError::AdvertisementMissing(info_hash)));
                continue;
            }

            self.start_lookup(info_hash, LookupKind::Announce);

            for node in self.routing_table.k_closest(&info_hash) {
                let request = RequestSpecific {
                    requester_id: *self.id(),
                    request_type: RequestTypeSpecific::GetPeers(GetPeersRequestArguments {
                        info_hash,
                    }),
                };

                self.socket.request(
                    node.address,
                    request,
                    Some(node.id),
                    RequestPurpose::Announce(info_hash),
                );
            }
        }
    }

    pub(super) fn on_announce_response(
        &mut self,
        info_hash: Id,
        from: SocketAddrV4,
        result: Result<ResponseSpecific, RequestError>,
    ) {
        let response = match result {
            Ok(response) => response,
            Err(error) => {
                trace!(?info_hash, ?from, ?error, "get_peers failed");
                return;
            }
        };

        match response.nodes {
            Some(nodes) => {
                self.admit(nodes);
            }
            None => {
                let request = RequestSpecific {
                    requester_id: *self.id(),
                    request_type: RequestTypeSpecific::FindNode(FindNodeRequestArguments {
                        target: info_hash,
                    }),
                };

                self.socket.request(
                    from,
                    request,
                    Some(response.responder_id),
                    RequestPurpose::AnnounceFindNode,
                );
            }
        }

        for peer in response.values.unwrap_or_default() {
            self.add_peer(info_hash, peer);
        }

        let port = self
            .routing_table
            .get_peers(&info_hash)
            .map(|peers| peers.port())
            .unwrap_or(0);

        if let (Some(token), true) = (response.token, port != 0) {
            let request = RequestSpecific {
                requester_id: *self.id(),
                request_type: RequestTypeSpecific::AnnouncePeer(AnnouncePeerRequestArguments {
                    info_hash,
                    token,
                    port: Some(port),
                    implied_port: false,
                }),
            };

            self.socket.request(
                from,
                request,
                Some(response.responder_id),
                RequestPurpose::AnnouncePeer(info_hash),
            );
        }
    }

    /// Record or renew a peer on `info_hash`, ignoring this node's own address.
    pub(super) fn add_peer(&mut self, info_hash: Id, peer: SocketAddrV4) {
        if peer.port() == self.local_addr().port() && self.local_ips.contains(peer.ip()) {
            return;
        }

        let expires_at = Instant::now() + self.peer_timeout;

        match self
            .routing_table
            .add_peer(info_hash, peer, 0, expires_at)
        {
            Some(PeerAdmission::Discovered) => {
                debug!(?info_hash, ?peer, "Discovered peer");

                self.report.events.push(DhtEvent::PeerDiscovered {
                    info_hash,
                    peer,
                    advertised: self.advertised.contains(&info_hash),
                });
            }
            Some(PeerAdmission::Renewed) => {
                trace!(?info_hash, ?peer, "Renewed peer");
            }
            None => {
                debug!(?info_hash, ?peer, "No room for another infohash");
            }
        }
    }

    pub(super) fn expire_peers(&mut self, now: Instant) {
        for (info_hash, peer) in self.routing_table.expire_peers(now) {
            debug!(?info_hash, ?peer, "Peer expired");

            self.report
                .events
                .push(DhtEvent::PeerExpired { info_hash, peer });
        }
    }
}

/// Addresses this node can be reached on, as far as it can tell without asking anyone.
pub(super) fn local_ips(bind_address: Ipv4Addr) -> Vec<Ipv4Addr> {
    if !bind_address.is_unspecified() {
        return vec![bind_address];
    }

    let mut ips = vec![Ipv4Addr::UNSPECIFIED, Ipv4Addr::LOCALHOST];

    // Connecting a UDP socket sends nothing, it only picks the interface of the default route.
    let default_route = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| {
            socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
            socket.local_addr()
        })
        .ok();

    if let Some(SocketAddr::V4(address)) = default_route {
        if !ips.contains(address.ip()) {
            ips.push(*address.ip());
        }
    }

    ips
}

#[cfg(test)]
mod test {
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use crate::common::Node;
    use crate::rpc::{Config, RpcTickReport};

    use super::*;

    fn localhost() -> Rpc {
        Rpc::new(Config {
            bind_address: Ipv4Addr::LOCALHOST,
            announce_interval: Duration::from_millis(100),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn announce_to_neighbour() {
        let mut a = localhost();
        let mut b = localhost();

        a.connect(Node::new(*b.id(), b.local_addr()));

        let info_hash = Id::random();
        a.advertise(info_hash, 45555);

        let deadline = Instant::now() + Duration::from_secs(5);

        let event = loop {
            a.tick();
            let report: RpcTickReport = b.tick();

            if let Some(event) = report.events.into_iter().next() {
                break event;
            }

            assert!(Instant::now() < deadline, "timed out");
        };

        assert_eq!(
            event,
            DhtEvent::PeerDiscovered {
                info_hash,
                peer: SocketAddrV4::new(Ipv4Addr::LOCALHOST, 45555),
                advertised: false,
            }
        );
    }

    #[test]
    fn advertise_without_port() {
        let mut a = localhost();
        let info_hash = Id::random();

        a.advertise(info_hash, 0);

        for _ in 0..3 {
            std::thread::sleep(Duration::from_millis(110));
            assert!(a.tick().events.is_empty());
        }

        assert_eq!(
            a.routing_table().get_peers(&info_hash).map(|peers| peers.port()),
            Some(0)
        );
    }

    fn values_response(responder_id: Id, nodes: Option<Vec<Node>>) -> ResponseSpecific {
        ResponseSpecific {
            nodes,
            values: Some(vec![SocketAddrV4::new(Ipv4Addr::LOCALHOST, 45555)]),
            ..ResponseSpecific::ping(responder_id)
        }
    }

    #[test]
    fn find_node_when_get_peers_has_no_nodes() {
        let mut a = localhost();
        let mut b = localhost();
        let c = Node::new(Id::random(), SocketAddrV4::new(Ipv4Addr::LOCALHOST, 1));

        b.connect(c);

        let info_hash = Id::random();
        a.on_announce_response(info_hash, b.local_addr(), Ok(values_response(*b.id(), None)));

        assert_eq!(a.socket.inflight(), 1);
        assert!(a.routing_table().get_peers(&info_hash).is_some());

        let deadline = Instant::now() + Duration::from_secs(5);

        while a.routing_table().get(&c.id).is_none() {
            a.tick();
            b.tick();

            assert!(Instant::now() < deadline, "timed out");
        }
    }

    #[test]
    fn empty_nodes_are_still_nodes() {
        let mut a = localhost();
        let b = localhost();

        let info_hash = Id::random();
        a.on_announce_response(
            info_hash,
            b.local_addr(),
            Ok(values_response(*b.id(), Some(vec![]))),
        );

        assert_eq!(a.socket.inflight(), 0);
    }

    #[test]
    fn missing_advertisement() {
        let mut a = localhost();
        let info_hash = Id::random();

        a.advertised.push(info_hash);

        let report = a.tick();

        assert_eq!(
            report.events,
            vec![DhtEvent::Error(DhtError::AdvertisementMissing(info_hash))]
        );
    }

    #[test]
    fn ignore_own_address() {
        let mut a = localhost();
        let info_hash = Id::random();

        a.add_peer(info_hash, a.local_addr());

        assert!(a.routing_table().get_peers(&info_hash).is_none());
        assert!(a.tick().events.is_empty());
    }

    #[test]
    fn ignore_own_address_on_every_interface() {
        let mut a = Rpc::new(Config::default()).unwrap();
        let info_hash = Id::random();
        let port = a.local_addr().port();

        assert!(a.local_addr().ip().is_unspecified());

        a.add_peer(info_hash, SocketAddrV4::new(Ipv4Addr::LOCALHOST, port));
        assert!(a.routing_table().get_peers(&info_hash).is_none());

        // Same interface, another port.
        a.add_peer(info_hash, SocketAddrV4::new(Ipv4Addr::LOCALHOST, 45555));
        assert!(a.routing_table().get_peers(&info_hash).is_some());
    }

    #[test]
    fn local_ips_of_a_bound_address() {
        assert_eq!(local_ips(Ipv4Addr::LOCALHOST), vec![Ipv4Addr::LOCALHOST]);
        assert!(local_ips(Ipv4Addr::UNSPECIFIED).contains(&Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn peers_expire() {
        let mut a = Rpc::new(Config {
            bind_address: Ipv4Addr::LOCALHOST,
            peer_timeout: Duration::ZERO,
            ..Default::default()
        })
        .unwrap();

        let info_hash = Id::random();
        let peer = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 45555);

        a.add_peer(info_hash, peer);

        let events = a.tick().events;
        assert_eq!(
            events,
            vec![
                DhtEvent::PeerDiscovered {
                    info_hash,
                    peer,
                    advertised: false
                },
                DhtEvent::PeerExpired { info_hash, peer }
            ]
        );
        assert!(a.routing_table().get_peers(&info_hash).is_none());
    }
}
