//! UDP socket layer managing incoming/outgoing requests and responses.

mod inflight_requests;

use std::net::{SocketAddr, SocketAddrV4, UdpSocket};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::common::{
    DecodeError, ErrorSpecific, Id, Message, MessageType, RequestSpecific, ResponseSpecific,
};

use super::config::Config;
use super::RequestPurpose;

pub(crate) use inflight_requests::InflightRequest;
use inflight_requests::InflightRequests;

const VERSION: [u8; 4] = [75, 80, 0, 1]; // "KP" version 01
const MTU: usize = 2048;

/// Default request timeout before abandoning an inflight request to a non-responding node.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(2000); // 2 seconds
/// The maximum duration to backoff checking the [UdpSocket] buffer after it is empty.
pub const MAX_THREAD_BLOCK_DURATION: Duration = Duration::from_millis(10);

/// A UdpSocket wrapper that formats and correlates DHT requests and responses.
#[derive(Debug)]
pub struct KrpcSocket {
    socket: UdpSocket,
    local_addr: SocketAddrV4,
    inflight_requests: InflightRequests,
    passthrough: Option<flume::Sender<(Vec<u8>, SocketAddrV4)>>,
}

/// A decoded inbound datagram, correlated with its request if it is a response.
#[derive(Debug)]
pub(crate) enum Inbound {
    Request {
        from: SocketAddrV4,
        transaction_id: Vec<u8>,
        request: RequestSpecific,
    },
    /// `request` is `None` if no such transaction id was sent to `from`.
    Response {
        from: SocketAddrV4,
        transaction_id: Vec<u8>,
        response: ResponseSpecific,
        request: Option<InflightRequest>,
    },
    Error {
        from: SocketAddrV4,
        error: ErrorSpecific,
        request: InflightRequest,
    },
    /// A KRPC message that should be answered with `error`.
    Invalid {
        from: SocketAddrV4,
        transaction_id: Vec<u8>,
        author: Option<Id>,
        error: ErrorSpecific,
    },
    /// An `announce_peer` without info_hash, its token decides the error to answer with.
    AnnounceWithoutInfoHash {
        from: SocketAddrV4,
        transaction_id: Vec<u8>,
        author: Id,
        token: Vec<u8>,
    },
}

impl KrpcSocket {
    pub(crate) fn new(config: &mut Config) -> Result<Self, std::io::Error> {
        let socket = match config.socket.take() {
            Some(socket) => socket,
            None => UdpSocket::bind(SocketAddrV4::new(
                config.bind_address,
                config.port.unwrap_or(0),
            ))?,
        };

        let local_addr = match socket.local_addr()? {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(_) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    "KrpcSocket does not support Ipv6",
                ))
            }
        };

        socket.set_nonblocking(true)?;

        Ok(Self {
            socket,
            local_addr,
            inflight_requests: InflightRequests::new(config.request_timeout),
            passthrough: config.passthrough.take(),
        })
    }

    #[cfg(test)]
    pub(crate) fn localhost() -> Result<Self, std::io::Error> {
        Self::new(&mut Config {
            bind_address: std::net::Ipv4Addr::LOCALHOST,
            ..Default::default()
        })
    }

    // === Getters ===

    /// Returns the address the server is listening to.
    #[inline]
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.local_addr
    }

    /// Number of requests waiting for a response.
    pub fn inflight(&self) -> usize {
        self.inflight_requests.len()
    }

    // === Public Methods ===

    /// Send a request to the given address and return the transaction_id
    pub(crate) fn request(
        &mut self,
        address: SocketAddrV4,
        request: RequestSpecific,
        contact: Option<Id>,
        purpose: RequestPurpose,
    ) -> u16 {
        let transaction_id = self.inflight_requests.next_transaction_id();

        let message = Message {
            transaction_id: transaction_id.to_be_bytes().to_vec(),
            version: Some(VERSION.to_vec()),
            message_type: MessageType::Request(request),
        };

        self.inflight_requests.insert(InflightRequest {
            transaction_id,
            to: address,
            sent_at: Instant::now(),
            contact,
            purpose,
        });

        // A failed send times out like an unanswered request.
        let _ = self.send(address, message).map_err(|e| {
            debug!(?e, "Error sending request message");
        });

        transaction_id
    }

    /// Send a response to the given address.
    pub fn response(
        &mut self,
        address: SocketAddrV4,
        transaction_id: Vec<u8>,
        response: ResponseSpecific,
    ) {
        let message = Message {
            transaction_id,
            version: Some(VERSION.to_vec()),
            message_type: MessageType::Response(response),
        };

        let _ = self.send(address, message).map_err(|e| {
            debug!(?e, "Error sending response message");
        });
    }

    /// Send an error to the given address.
    pub fn error(&mut self, address: SocketAddrV4, transaction_id: Vec<u8>, error: ErrorSpecific) {
        let message = Message {
            transaction_id,
            version: Some(VERSION.to_vec()),
            message_type: MessageType::Error(error),
        };

        let _ = self.send(address, message).map_err(|e| {
            debug!(?e, "Error sending error message");
        });
    }

    /// Remove and return requests that timed out.
    pub(crate) fn expired(&mut self, now: Instant) -> Vec<InflightRequest> {
        self.inflight_requests.expired(now)
    }

    /// Receives a single krpc message on the socket.
    pub(crate) fn recv_from(&mut self) -> Option<Inbound> {
        let mut buf = [0u8; MTU];

        match self.socket.recv_from(&mut buf) {
            Ok((amt, SocketAddr::V4(from))) => {
                let bytes = &buf[..amt];

                if from.port() == 0 {
                    trace!(
                        context = "socket_validation",
                        message = "Response from port 0"
                    );
                    return None;
                }

                return self.decode(bytes, from);
            }
            Ok((_, SocketAddr::V6(_))) => {
                trace!(
                    context = "socket_validation",
                    message = "Received IPv6 packet"
                );
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(MAX_THREAD_BLOCK_DURATION);
            }
            Err(e) => {
                trace!(
                    context = "socket_error",
                    ?e,
                    "recv_from failed unexpectedly"
                );
            }
        }

        None
    }

    // === Private Methods ===

    fn decode(&mut self, bytes: &[u8], from: SocketAddrV4) -> Option<Inbound> {
        let message = match Message::from_bytes(bytes) {
            Ok(message) => message,
            Err(DecodeError::Malformed(error)) => {
                trace!(
                    context = "socket_error",
                    ?error,
                    ?from,
                    message = ?String::from_utf8_lossy(bytes),
                    "Received invalid Bencode message."
                );

                if let Some(passthrough) = &self.passthrough {
                    let _ = passthrough.send((bytes.to_vec(), from));
                }

                return None;
            }
            Err(DecodeError::Protocol {
                transaction_id,
                author,
                error,
            }) => {
                debug!(?from, ?error, "Invalid KRPC message");

                return Some(Inbound::Invalid {
                    from,
                    transaction_id,
                    author,
                    error,
                });
            }
            Err(DecodeError::AnnounceWithoutInfoHash {
                transaction_id,
                author,
                token,
            }) => {
                debug!(?from, "announce_peer without info_hash");

                return Some(Inbound::AnnounceWithoutInfoHash {
                    from,
                    transaction_id,
                    author,
                    token,
                });
            }
        };

        trace!(
            context = "socket_message_receiving",
            ?message,
            ?from,
            "Received message"
        );

        match message.message_type {
            MessageType::Request(request) => Some(Inbound::Request {
                from,
                transaction_id: message.transaction_id,
                request,
            }),
            MessageType::Response(response) => {
                let request = self.take_inflight(&message.transaction_id, &from);

                Some(Inbound::Response {
                    from,
                    transaction_id: message.transaction_id,
                    response,
                    request,
                })
            }
            MessageType::Error(error) => match self.take_inflight(&message.transaction_id, &from) {
                Some(request) => Some(Inbound::Error {
                    from,
                    error,
                    request,
                }),
                None => {
                    trace!(
                        context = "socket_validation",
                        message = "Unexpected error id"
                    );
                    None
                }
            },
        }
    }

    fn take_inflight(&mut self, transaction_id: &[u8], from: &SocketAddrV4) -> Option<InflightRequest> {
        let transaction_id = u16::from_be_bytes(transaction_id.try_into().ok()?);

        self.inflight_requests.remove(transaction_id, from)
    }

    /// Send a raw dht message
    fn send(&mut self, address: SocketAddrV4, message: Message) -> Result<(), SendMessageError> {
        self.socket.send_to(&message.to_bytes()?, address)?;
        trace!(context = "socket_message_sending", message = ?message);
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
/// Failure to send a KRPC message.
pub enum SendMessageError {
    /// Errors related to encoding DHT messages.
    #[error("Failed to encode packet bytes: {0}")]
    BencodeError(#[from] serde_bencode::Error),

    #[error(transparent)]
    /// Transparent [std::io::Error]
    IO(#[from] std::io::Error),
}

#[cfg(test)]
mod test {
    use std::thread;

    use crate::common::{FindNodeRequestArguments, RequestTypeSpecific, GENERIC_ERROR};
    use crate::rpc::PingOrigin;

    use super::*;

    fn recv(socket: &mut KrpcSocket) -> Inbound {
        loop {
            if let Some(inbound) = socket.recv_from() {
                return inbound;
            }
        }
    }

    #[test]
    fn request_and_response() {
        let mut server = KrpcSocket::localhost().unwrap();
        let server_address = server.local_addr();

        let mut client = KrpcSocket::localhost().unwrap();
        let client_address = client.local_addr();

        let request = RequestSpecific {
            requester_id: Id::random(),
            request_type: RequestTypeSpecific::FindNode(FindNodeRequestArguments {
                target: Id::random(),
            }),
        };

        let tid = client.request(
            server_address,
            request.clone(),
            None,
            RequestPurpose::Ping(PingOrigin::Liveness),
        );
        assert_eq!(client.inflight(), 1);

        let server_thread = thread::spawn(move || match recv(&mut server) {
            Inbound::Request {
                from,
                transaction_id,
                request: received,
            } => {
                assert_eq!(from, client_address);
                assert_eq!(transaction_id, tid.to_be_bytes().to_vec());
                assert_eq!(received, request);

                server.response(from, transaction_id, ResponseSpecific::ping(Id::random()));
            }
            inbound => panic!("unexpected {inbound:?}"),
        });

        server_thread.join().unwrap();

        match recv(&mut client) {
            Inbound::Response { from, request, .. } => {
                assert_eq!(from, server_address);
                assert_eq!(request.unwrap().transaction_id, tid);
            }
            inbound => panic!("unexpected {inbound:?}"),
        }

        assert_eq!(client.inflight(), 0);
    }

    #[test]
    fn unexpected_response() {
        let mut server = KrpcSocket::localhost().unwrap();
        let mut client = KrpcSocket::localhost().unwrap();

        client.response(
            server.local_addr(),
            vec![0, 8],
            ResponseSpecific::ping(Id::random()),
        );

        match recv(&mut server) {
            Inbound::Response { request, .. } => assert!(request.is_none()),
            inbound => panic!("unexpected {inbound:?}"),
        }
    }

    #[test]
    fn drop_unexpected_error() {
        let mut server = KrpcSocket::localhost().unwrap();
        let mut client = KrpcSocket::localhost().unwrap();

        client.error(
            server.local_addr(),
            vec![0, 8],
            ErrorSpecific {
                code: GENERIC_ERROR,
                description: "Such t wasn't sent".to_string(),
            },
        );

        thread::sleep(Duration::from_millis(50));
        assert!(server.recv_from().is_none());
    }

    #[test]
    fn passthrough_malformed_packets() {
        let (tx, rx) = flume::unbounded();

        let mut server = KrpcSocket::new(&mut Config {
            bind_address: std::net::Ipv4Addr::LOCALHOST,
            passthrough: Some(tx),
            ..Default::default()
        })
        .unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client
            .send_to(b"not bencode", server.local_addr())
            .unwrap();

        thread::sleep(Duration::from_millis(50));
        assert!(server.recv_from().is_none());

        let (bytes, from) = rx.try_recv().unwrap();
        assert_eq!(bytes, b"not bencode");
        assert_eq!(SocketAddr::V4(from), client.local_addr().unwrap());
    }

    #[test]
    fn invalid_request() {
        let mut server = KrpcSocket::localhost().unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client
            .send_to(
                b"d1:ad2:id20:aaaaaaaaaaaaaaaaaaaae1:t2:aa1:y1:qe",
                server.local_addr(),
            )
            .unwrap();

        match recv(&mut server) {
            Inbound::Invalid {
                transaction_id,
                author,
                error,
                ..
            } => {
                assert_eq!(transaction_id, b"aa");
                assert_eq!(author, Some(Id([b'a'; 20])));
                assert_eq!(error, ErrorSpecific::protocol("Q is required"));
            }
            inbound => panic!("unexpected {inbound:?}"),
        }
    }
}
