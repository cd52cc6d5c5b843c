//! Agent identity: signing key custody and the ERC-8004 agent card.
//!
//! # Architecture
//!
//! Each agent has:
//! - A secp256k1 signing key, supplied explicitly or kept in an encrypted
//!   keystore file (see [`custody`])
//! - An agent card (ERC-8004 `RegistrationFile` served as JSON)
//! - An optional on-chain registration of its external URL, keyed by the
//!   wallet address

pub mod agent_card;
pub mod custody;
pub mod keystore;
pub mod wallet;

use alloy::primitives::Address;

use self::custody::{KeyOrigin, ResolvedKey};
use self::wallet::address_hex;

/// Registry a registration lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryRef {
    pub chain_id: u64,
    pub address: Address,
}

impl RegistryRef {
    /// `eip155:{chainId}:{registry}` as used in agent cards.
    pub fn agent_registry(&self) -> String {
        format!("eip155:{}:{}", self.chain_id, address_hex(&self.address))
    }
}

/// Core agent identity, combining wallet address with registration state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIdentity {
    /// Agent display name.
    pub name: String,

    /// Ethereum wallet address.
    pub wallet_address: Address,

    /// Where the signing key came from. The key itself is not kept here.
    pub key_origin: KeyOrigin,

    /// Registry holding this agent's URL, once confirmed.
    pub registry: Option<RegistryRef>,
}

impl AgentIdentity {
    pub fn new(name: impl Into<String>, resolved: &ResolvedKey) -> Self {
        Self {
            name: name.into(),
            wallet_address: resolved.key.address(),
            key_origin: resolved.origin,
            registry: None,
        }
    }

    pub fn with_registration(mut self, chain_id: u64, registry: Address) -> Self {
        self.registry = Some(RegistryRef {
            chain_id,
            address: registry,
        });
        self
    }

    /// Whether this identity has been registered on-chain.
    pub fn is_registered(&self) -> bool {
        self.registry.is_some()
    }
}
