//! Serialize and deserialize KRPC messages.
//!
//! Decoding validates the loosely typed [internal::DHTMessage] field by field,
//! so that every inbound datagram is either a well formed [Message], a packet
//! to drop silently, or a protocol violation to answer with an error reply.

mod internal;

use std::net::SocketAddrV4;

use serde_bencode::value::Value;

use crate::common::{bytes_to_nodes, bytes_to_peers, nodes_to_bytes, peer_to_bytes, Id, Node};

pub const PROTOCOL_ERROR: i32 = 203;
pub const METHOD_UNKNOWN: i32 = 204;
pub const GENERIC_ERROR: i32 = 201;

#[derive(Debug, PartialEq, Clone)]
pub struct Message {
    pub transaction_id: Vec<u8>,

    /// The version of the requester or responder.
    pub version: Option<Vec<u8>>,

    pub message_type: MessageType,
}

#[derive(Debug, PartialEq, Clone)]
pub enum MessageType {
    Request(RequestSpecific),

    Response(ResponseSpecific),

    Error(ErrorSpecific),
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ErrorSpecific {
    pub code: i32,
    pub description: String,
}

impl ErrorSpecific {
    pub fn protocol(description: &str) -> Self {
        ErrorSpecific {
            code: PROTOCOL_ERROR,
            description: description.to_string(),
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct RequestSpecific {
    pub requester_id: Id,
    pub request_type: RequestTypeSpecific,
}

#[derive(Debug, PartialEq, Clone)]
pub enum RequestTypeSpecific {
    Ping,
    FindNode(FindNodeRequestArguments),
    GetPeers(GetPeersRequestArguments),
    AnnouncePeer(AnnouncePeerRequestArguments),
}

impl RequestTypeSpecific {
    fn method(&self) -> &'static str {
        match self {
            RequestTypeSpecific::Ping => "ping",
            RequestTypeSpecific::FindNode(_) => "find_node",
            RequestTypeSpecific::GetPeers(_) => "get_peers",
            RequestTypeSpecific::AnnouncePeer(_) => "announce_peer",
        }
    }
}

// === FIND_NODE ===
#[derive(Debug, PartialEq, Clone)]
pub struct FindNodeRequestArguments {
    pub target: Id,
}

// === Get Peers ===

#[derive(Debug, PartialEq, Clone)]
pub struct GetPeersRequestArguments {
    pub info_hash: Id,
}

// === Announce Peer ===

#[derive(Debug, PartialEq, Clone)]
pub struct AnnouncePeerRequestArguments {
    pub info_hash: Id,
    pub token: Vec<u8>,
    /// Explicit port, the source port of the request is used if missing.
    pub port: Option<u16>,
    /// Use the source port of the request even if an explicit port is present.
    pub implied_port: bool,
}

/// Response values of any method, every method responds with at least the `id`.
#[derive(Debug, PartialEq, Clone)]
pub struct ResponseSpecific {
    pub responder_id: Id,
    pub nodes: Option<Vec<Node>>,
    pub values: Option<Vec<SocketAddrV4>>,
    pub token: Option<Vec<u8>>,
}

impl ResponseSpecific {
    /// A response carrying nothing but the responder's [Id].
    pub fn ping(responder_id: Id) -> Self {
        ResponseSpecific {
            responder_id,
            nodes: None,
            values: None,
            token: None,
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
/// Failure to decode an inbound datagram.
pub enum DecodeError {
    #[error("Malformed packet: {0}")]
    /// Not a KRPC message at all, should be dropped (or passed through) silently.
    Malformed(String),

    #[error("Protocol error {}: {}", .error.code, .error.description)]
    /// A KRPC message missing or carrying invalid fields, should be answered
    /// with `error` on `transaction_id`.
    Protocol {
        transaction_id: Vec<u8>,
        /// The sender's [Id] if it was already validated.
        author: Option<Id>,
        error: ErrorSpecific,
    },

    #[error("announce_peer without info_hash")]
    /// An `announce_peer` carrying a token but no valid info_hash, answered
    /// depending on whether `token` is still valid.
    AnnounceWithoutInfoHash {
        transaction_id: Vec<u8>,
        author: Id,
        token: Vec<u8>,
    },
}

impl Message {
    pub fn from_bytes(bytes: &[u8]) -> Result<Message, DecodeError> {
        let message = internal::DHTMessage::from_bytes(bytes)
            .map_err(|error| DecodeError::Malformed(error.to_string()))?;

        Message::from_serde_message(message)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_bencode::Error> {
        self.clone().into_serde_message().to_bytes()
    }

    /// Return the [Id] of the sender of a request or a response.
    pub fn get_author_id(&self) -> Option<Id> {
        match &self.message_type {
            MessageType::Request(request) => Some(request.requester_id),
            MessageType::Response(response) => Some(response.responder_id),
            MessageType::Error(_) => None,
        }
    }

    fn into_serde_message(self) -> internal::DHTMessage {
        let mut message = internal::DHTMessage {
            t: internal::bytes(self.transaction_id),
            v: self.version.and_then(internal::bytes),
            ..Default::default()
        };

        match self.message_type {
            MessageType::Request(RequestSpecific {
                requester_id,
                request_type,
            }) => {
                message.y = internal::bytes("q");
                message.q = internal::bytes(request_type.method());

                let mut arguments = internal::DHTArguments {
                    id: internal::bytes(requester_id.to_vec()),
                    ..Default::default()
                };

                match request_type {
                    RequestTypeSpecific::Ping => {}
                    RequestTypeSpecific::FindNode(FindNodeRequestArguments { target }) => {
                        arguments.target = internal::bytes(target.to_vec());
                    }
                    RequestTypeSpecific::GetPeers(GetPeersRequestArguments { info_hash }) => {
                        arguments.info_hash = internal::bytes(info_hash.to_vec());
                    }
                    RequestTypeSpecific::AnnouncePeer(AnnouncePeerRequestArguments {
                        info_hash,
                        token,
                        port,
                        implied_port,
                    }) => {
                        arguments.info_hash = internal::bytes(info_hash.to_vec());
                        arguments.token = internal::bytes(token);
                        arguments.port = port.and_then(internal::int);
                        if implied_port {
                            arguments.implied_port = internal::int(1);
                        }
                    }
                }

                message.a = Some(arguments);
            }
            MessageType::Response(ResponseSpecific {
                responder_id,
                nodes,
                values,
                token,
            }) => {
                message.y = internal::bytes("r");
                message.r = Some(internal::DHTArguments {
                    id: internal::bytes(responder_id.to_vec()),
                    nodes: nodes.and_then(|nodes| internal::bytes(nodes_to_bytes(&nodes))),
                    values: values.map(|values| {
                        Value::List(
                            values
                                .iter()
                                .map(|peer| Value::Bytes(peer_to_bytes(peer).to_vec()))
                                .collect(),
                        )
                    }),
                    token: token.and_then(internal::bytes),
                    ..Default::default()
                });
            }
            MessageType::Error(ErrorSpecific { code, description }) => {
                message.y = internal::bytes("e");
                message.e = Some(Value::List(vec![
                    Value::Int(code.into()),
                    Value::Bytes(description.into()),
                ]));
            }
        };

        message
    }

    fn from_serde_message(message: internal::DHTMessage) -> Result<Message, DecodeError> {
        let transaction_id = internal::as_bytes(&message.t).map(|t| t.to_vec());
        let version = internal::as_bytes(&message.v).map(|v| v.to_vec());

        let protocol_error = |author: Option<Id>, description: &str| DecodeError::Protocol {
            transaction_id: transaction_id.clone().unwrap_or_default(),
            author,
            error: ErrorSpecific::protocol(description),
        };

        let y = internal::as_bytes(&message.y);

        // Errors carry no id, they are only ever correlated by their transaction_id.
        if y == Some(b"e".as_slice()) {
            let transaction_id = transaction_id
                .clone()
                .ok_or_else(|| DecodeError::Malformed("Error without t".to_string()))?;

            return Ok(Message {
                transaction_id,
                version,
                message_type: MessageType::Error(decode_error(&message.e)?),
            });
        }

        let author = [&message.a, &message.r]
            .into_iter()
            .flatten()
            .find_map(|arguments| internal::as_bytes(&arguments.id))
            .and_then(|id| Id::from_bytes(id).ok())
            .ok_or_else(|| protocol_error(None, "Id is required"))?;

        let message_type = match y {
            Some(b"q") => {
                let arguments = message
                    .a
                    .as_ref()
                    .ok_or_else(|| protocol_error(Some(author), "A is required"))?;

                let method = internal::as_bytes(&message.q)
                    .ok_or_else(|| protocol_error(Some(author), "Q is required"))?;

                let request_type = match method {
                    b"ping" => RequestTypeSpecific::Ping,
                    b"find_node" => RequestTypeSpecific::FindNode(FindNodeRequestArguments {
                        target: decode_id(&arguments.target)
                            .ok_or_else(|| protocol_error(Some(author), "find_node without target"))?,
                    }),
                    b"get_peers" => RequestTypeSpecific::GetPeers(GetPeersRequestArguments {
                        info_hash: decode_id(&arguments.info_hash).ok_or_else(|| {
                            protocol_error(Some(author), "get_peers without info_hash")
                        })?,
                    }),
                    b"announce_peer" => {
                        let token = internal::as_bytes(&arguments.token)
                            .ok_or_else(|| protocol_error(Some(author), "token is invalid"))?;

                        let info_hash = decode_id(&arguments.info_hash).ok_or_else(|| {
                            DecodeError::AnnounceWithoutInfoHash {
                                transaction_id: transaction_id.clone().unwrap_or_default(),
                                author,
                                token: token.to_vec(),
                            }
                        })?;

                        RequestTypeSpecific::AnnouncePeer(AnnouncePeerRequestArguments {
                            info_hash,
                            token: token.to_vec(),
                            port: internal::as_int(&arguments.port)
                                .and_then(|port| u16::try_from(port).ok()),
                            implied_port: internal::as_int(&arguments.implied_port)
                                .map(|implied_port| implied_port != 0)
                                .unwrap_or(false),
                        })
                    }
                    _ => {
                        return Err(DecodeError::Protocol {
                            transaction_id: transaction_id.clone().unwrap_or_default(),
                            author: Some(author),
                            error: ErrorSpecific {
                                code: METHOD_UNKNOWN,
                                description: "Method Unknown".to_string(),
                            },
                        })
                    }
                };

                MessageType::Request(RequestSpecific {
                    requester_id: author,
                    request_type,
                })
            }
            Some(b"r") => {
                if transaction_id.as_ref().map_or(true, |t| t.is_empty()) {
                    return Err(protocol_error(Some(author), "T is required"));
                }

                let result = message.r.as_ref();

                MessageType::Response(ResponseSpecific {
                    responder_id: author,
                    nodes: result
                        .and_then(|r| internal::as_bytes(&r.nodes))
                        .map(bytes_to_nodes),
                    values: result.and_then(|r| decode_values(&r.values)),
                    token: result
                        .and_then(|r| internal::as_bytes(&r.token))
                        .map(|token| token.to_vec()),
                })
            }
            _ => return Err(protocol_error(None, "Y is required")),
        };

        Ok(Message {
            transaction_id: transaction_id.unwrap_or_default(),
            version,
            message_type,
        })
    }
}

fn decode_id(value: &Option<Value>) -> Option<Id> {
    internal::as_bytes(value).and_then(|bytes| Id::from_bytes(bytes).ok())
}

/// `values` is a list of compact peers, but a single string of concatenated peers
/// is accepted as well.
fn decode_values(value: &Option<Value>) -> Option<Vec<SocketAddrV4>> {
    match value {
        Some(Value::Bytes(bytes)) => Some(bytes_to_peers(bytes)),
        Some(Value::List(list)) => Some(
            list.iter()
                .flat_map(|value| match value {
                    Value::Bytes(bytes) => bytes_to_peers(bytes),
                    _ => vec![],
                })
                .collect(),
        ),
        _ => None,
    }
}

fn decode_error(value: &Option<Value>) -> Result<ErrorSpecific, DecodeError> {
    if let Some(Value::List(list)) = value {
        if let [Value::Int(code), Value::Bytes(description)] = list.as_slice() {
            return Ok(ErrorSpecific {
                code: i32::try_from(*code).unwrap_or(GENERIC_ERROR),
                description: String::from_utf8_lossy(description).to_string(),
            });
        }
    }

    Err(DecodeError::Malformed("Error with e".to_string()))
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use super::*;

    fn round_trip(message: &Message) -> Message {
        Message::from_bytes(&message.to_bytes().unwrap()).unwrap()
    }

    fn protocol_error(bytes: &[u8]) -> (Option<Id>, ErrorSpecific) {
        match Message::from_bytes(bytes) {
            Err(DecodeError::Protocol { author, error, .. }) => (author, error),
            other => panic!("expected protocol error, got {:?}", other),
        }
    }

    #[test]
    fn ping_request() {
        let message = Message {
            transaction_id: vec![1, 2],
            version: Some(vec![75, 80, 0, 1]),
            message_type: MessageType::Request(RequestSpecific {
                requester_id: Id::random(),
                request_type: RequestTypeSpecific::Ping,
            }),
        };

        assert_eq!(round_trip(&message), message);
    }

    #[test]
    fn ping_request_wire_format() {
        let id = Id([b'a'; 20]);
        let message = Message {
            transaction_id: b"aa".to_vec(),
            version: None,
            message_type: MessageType::Request(RequestSpecific {
                requester_id: id,
                request_type: RequestTypeSpecific::Ping,
            }),
        };

        assert_eq!(
            message.to_bytes().unwrap(),
            b"d1:ad2:id20:aaaaaaaaaaaaaaaaaaaae1:q4:ping1:t2:aa1:y1:qe".to_vec()
        );
    }

    #[test]
    fn announce_peer_request() {
        let message = Message {
            transaction_id: vec![1, 2],
            version: None,
            message_type: MessageType::Request(RequestSpecific {
                requester_id: Id::random(),
                request_type: RequestTypeSpecific::AnnouncePeer(AnnouncePeerRequestArguments {
                    info_hash: Id::random(),
                    token: vec![1, 2, 3, 4],
                    port: Some(45555),
                    implied_port: true,
                }),
            }),
        };

        assert_eq!(round_trip(&message), message);
    }

    #[test]
    fn find_node_and_get_peers_requests() {
        for request_type in [
            RequestTypeSpecific::FindNode(FindNodeRequestArguments {
                target: Id::random(),
            }),
            RequestTypeSpecific::GetPeers(GetPeersRequestArguments {
                info_hash: Id::random(),
            }),
        ] {
            let message = Message {
                transaction_id: vec![9, 9],
                version: None,
                message_type: MessageType::Request(RequestSpecific {
                    requester_id: Id::random(),
                    request_type,
                }),
            };

            assert_eq!(round_trip(&message), message);
        }
    }

    #[test]
    fn get_peers_response() {
        let message = Message {
            transaction_id: vec![0, 3],
            version: None,
            message_type: MessageType::Response(ResponseSpecific {
                responder_id: Id::random(),
                nodes: Some(vec![Node::new(
                    Id::random(),
                    "49.50.52.52:5354".parse().unwrap(),
                )]),
                values: Some(vec![
                    "123.123.123.123:123".parse().unwrap(),
                    "127.0.0.1:45555".parse().unwrap(),
                ]),
                token: Some(vec![99, 100, 101, 102]),
            }),
        };

        assert_eq!(round_trip(&message), message);
    }

    #[test]
    fn values_as_single_string() {
        let id = Id::random();
        let mut bytes = b"d1:rd2:id20:".to_vec();
        bytes.extend_from_slice(id.as_bytes());
        bytes.extend_from_slice(b"6:values12:");
        bytes.extend_from_slice(&[127, 0, 0, 1, 0, 80, 10, 0, 0, 1, 0, 81]);
        bytes.extend_from_slice(b"e1:t2:aa1:y1:re");

        let message = Message::from_bytes(&bytes).unwrap();

        match message.message_type {
            MessageType::Response(response) => {
                assert_eq!(response.responder_id, id);
                assert_eq!(
                    response.values,
                    Some(vec![
                        "127.0.0.1:80".parse().unwrap(),
                        "10.0.0.1:81".parse().unwrap()
                    ])
                );
            }
            _ => panic!("expected a response"),
        }
    }

    #[test]
    fn error_message() {
        let message = Message {
            transaction_id: vec![1, 1],
            version: None,
            message_type: MessageType::Error(ErrorSpecific::protocol("token is invalid")),
        };

        assert_eq!(round_trip(&message), message);
    }

    #[test]
    fn malformed_packets() {
        assert!(matches!(
            Message::from_bytes(b"hello"),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            Message::from_bytes(b"li1ei2ee"),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            Message::from_bytes(b"d1:eli201e3:bade1:y1:ee"),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            Message::from_bytes(b"d1:ei201e1:t2:aa1:y1:ee"),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn missing_id() {
        let (author, error) = protocol_error(b"d1:ad6:target3:abce1:q4:ping1:t2:aa1:y1:qe");

        assert_eq!(author, None);
        assert_eq!(error, ErrorSpecific::protocol("Id is required"));

        let (_, error) = protocol_error(b"d1:ad2:id3:abce1:q4:ping1:t2:aa1:y1:qe");
        assert_eq!(error, ErrorSpecific::protocol("Id is required"));
    }

    #[test]
    fn missing_fields() {
        let id = Id([b'a'; 20]);

        let (author, error) = protocol_error(b"d1:ad2:id20:aaaaaaaaaaaaaaaaaaaae1:q4:ping1:t2:aae");
        assert_eq!(author, None);
        assert_eq!(error, ErrorSpecific::protocol("Y is required"));

        let (author, error) = protocol_error(b"d1:ad2:id20:aaaaaaaaaaaaaaaaaaaae1:t2:aa1:y1:qe");
        assert_eq!(author, Some(id));
        assert_eq!(error, ErrorSpecific::protocol("Q is required"));

        let (_, error) = protocol_error(b"d1:rd2:id20:aaaaaaaaaaaaaaaaaaaae1:q4:ping1:t2:aa1:y1:qe");
        assert_eq!(error, ErrorSpecific::protocol("A is required"));

        let (_, error) = protocol_error(b"d1:rd2:id20:aaaaaaaaaaaaaaaaaaaae1:y1:re");
        assert_eq!(error, ErrorSpecific::protocol("T is required"));

        let (_, error) =
            protocol_error(b"d1:ad2:id20:aaaaaaaaaaaaaaaaaaaae1:q9:get_peers1:t2:aa1:y1:qe");
        assert_eq!(error, ErrorSpecific::protocol("get_peers without info_hash"));

        let (_, error) = protocol_error(
            b"d1:ad2:id20:aaaaaaaaaaaaaaaaaaaa9:info_hash20:aaaaaaaaaaaaaaaaaaaae1:q13:announce_peer1:t2:aa1:y1:qe",
        );
        assert_eq!(error, ErrorSpecific::protocol("token is invalid"));
    }

    #[test]
    fn announce_without_info_hash_keeps_token() {
        match Message::from_bytes(
            b"d1:ad2:id20:aaaaaaaaaaaaaaaaaaaa5:token4:abcde1:q13:announce_peer1:t2:aa1:y1:qe",
        ) {
            Err(DecodeError::AnnounceWithoutInfoHash {
                transaction_id,
                author,
                token,
            }) => {
                assert_eq!(transaction_id, b"aa");
                assert_eq!(author, Id([b'a'; 20]));
                assert_eq!(token, b"abcd");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_method() {
        let (author, error) =
            protocol_error(b"d1:ad2:id20:aaaaaaaaaaaaaaaaaaaae1:q3:get1:t2:aa1:y1:qe");

        assert_eq!(author, Some(Id([b'a'; 20])));
        assert_eq!(error.code, METHOD_UNKNOWN);
    }

    #[test]
    fn dictionary_keys_are_sorted() {
        let mut dict = HashMap::new();
        dict.insert(b"c".to_vec(), Value::Int(1));
        dict.insert(b"b".to_vec(), Value::Int(2));
        dict.insert(b"a".to_vec(), Value::Int(3));

        let bytes = serde_bencode::to_bytes(&Value::Dict(dict)).unwrap();

        assert_eq!(bytes, b"d1:ai3e1:bi2e1:ci1ee".to_vec());

        let decoded: Value = serde_bencode::from_bytes(&bytes).unwrap();
        match decoded {
            Value::Dict(dict) => {
                assert_eq!(dict.get(b"a".as_slice()), Some(&Value::Int(3)));
                assert_eq!(dict.get(b"c".as_slice()), Some(&Value::Int(1)));
            }
            _ => panic!("expected a dictionary"),
        }
    }

    #[test]
    fn nested_values() {
        let value = Value::List(vec![
            Value::Int(-42),
            Value::Bytes(b"spam".to_vec()),
            Value::List(vec![Value::Bytes(vec![0, 1, 2])]),
        ]);

        let bytes = serde_bencode::to_bytes(&value).unwrap();

        assert_eq!(bytes, b"li-42e4:spaml3:\x00\x01\x02ee".to_vec());
        assert_eq!(serde_bencode::from_bytes::<Value>(&bytes).unwrap(), value);
    }
}
