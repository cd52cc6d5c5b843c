//! Local stand-in for a chain node: the JSON-RPC methods the registrar
//! uses, backed by deterministic in-memory state.

pub mod ledger;
pub mod server;

pub use ledger::{DEFAULT_CHAIN_ID, Ledger, LedgerError};
pub use server::{EmulatorConfig, EmulatorError, EmulatorHandle, serve, spawn};
