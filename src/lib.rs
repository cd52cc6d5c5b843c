//! On-chain registration of an agent's service endpoint.
//!
//! At startup a host agent hands its [`config::RegistrationConfig`] to a
//! [`registry::RegistrationTrigger`], which resolves the signing key
//! ([`identity::custody`]) and runs the registration protocol
//! ([`registry::Registrar`]) in the background against a JSON-RPC node
//! ([`chain::HttpChainClient`]). [`emulator`] provides a local node for
//! development and tests.

pub mod chain;
pub mod config;
pub mod emulator;
pub mod identity;
pub mod registry;
pub mod settings;

pub use config::{ConfigurationError, RegistrationConfig};
pub use registry::{RegistrationError, RegistrationOutcome, RegistrationTask, RegistrationTrigger};
