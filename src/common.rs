//! Miscellaneous common structs used throughout the library.

pub mod arith;
mod bucket;
mod compact;
mod id;
pub mod messages;
mod node;
mod peers;
mod routing_table;

pub use bucket::*;
pub use compact::*;
pub use id::*;
pub use messages::*;
pub use node::*;
pub use peers::*;
pub use routing_table::*;
