//! Chain access: JSON-RPC envelope, wire types, and the HTTP client.

pub mod client;
pub mod error;
pub mod rpc;
pub mod types;

pub use client::{ChainClient, HttpChainClient};
pub use error::{RpcError, RpcErrorKind};
pub use types::{BlockTag, Receipt, TxHash, TxParams};
