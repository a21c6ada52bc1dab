//! Answer inbound requests.

mod tokens;

use std::net::SocketAddrV4;
use std::time::Instant;

use tracing::debug;

use crate::common::{
    AnnouncePeerRequestArguments, ErrorSpecific, FindNodeRequestArguments,
    GetPeersRequestArguments, RequestSpecific, RequestTypeSpecific, ResponseSpecific,
};

use super::Rpc;

pub use tokens::{Tokens, DEFAULT_TOKEN_TIMEOUT};

impl Rpc {
    pub(super) fn handle_request(
        &mut self,
        from: SocketAddrV4,
        transaction_id: Vec<u8>,
        request: RequestSpecific,
    ) {
        let id = *self.id();

        let response = match request.request_type {
            RequestTypeSpecific::Ping => ResponseSpecific::ping(id),
            RequestTypeSpecific::FindNode(FindNodeRequestArguments { target }) => {
                ResponseSpecific {
                    nodes: Some(self.routing_table.k_closest(&target)),
                    ..ResponseSpecific::ping(id)
                }
            }
            RequestTypeSpecific::GetPeers(GetPeersRequestArguments { info_hash }) => {
                let token = self.tokens.issue(Instant::now()).to_vec();

                let values = self
                    .routing_table
                    .get_peers(&info_hash)
                    .filter(|peers| !peers.is_empty())
                    .map(|peers| peers.addresses());

                match values {
                    Some(values) => ResponseSpecific {
                        values: Some(values),
                        token: Some(token),
                        ..ResponseSpecific::ping(id)
                    },
                    None => ResponseSpecific {
                        nodes: Some(self.routing_table.k_closest(&info_hash)),
                        token: Some(token),
                        ..ResponseSpecific::ping(id)
                    },
                }
            }
            RequestTypeSpecific::AnnouncePeer(AnnouncePeerRequestArguments {
                info_hash,
                token,
                port,
                implied_port,
            }) => {
                if !self.tokens.validate(&token, Instant::now()) {
                    debug!(?from, ?info_hash, "announce_peer with invalid token");

                    self.socket.error(
                        from,
                        transaction_id,
                        ErrorSpecific::protocol("token is invalid"),
                    );
                    return;
                }

                let port = match port {
                    Some(port) if !implied_port => port,
                    _ => from.port(),
                };

                self.add_peer(info_hash, SocketAddrV4::new(*from.ip(), port));

                ResponseSpecific::ping(id)
            }
        };

        self.socket.response(from, transaction_id, response);
    }
}
