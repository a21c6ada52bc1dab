#![doc = include_str!("../README.md")]
//! ## Feature flags
#![doc = document_features::document_features!()]
//!

// Public modules
mod common;

#[cfg(feature = "async")]
pub mod async_dht;
mod dht;
pub mod rpc;

pub use crate::common::{
    arith, messages, Admission, Bucket, Id, Node, Peer, PeerSet, RemoteNode, RoutingTable,
    MAX_BUCKET_SIZE_K,
};
pub use dht::{
    Dht, DhtBuilder, DhtWasShutdown, PingError, Snapshot, SnapshotError, SnapshotNode, Testnet,
};
pub use rpc::{DhtError, DhtEvent, RequestError};

pub mod errors {
    //! Exported errors
    pub use super::common::{DecodeError, DecodeIdError};
    pub use super::dht::{DhtWasShutdown, PingError, SnapshotError};
    pub use super::rpc::{DhtError, RequestError, SendMessageError};
}
