//! Agent card builder for ERC-8004 registration files.
//!
//! The card advertises the agent's external URL and any configured
//! services. Once the URL is confirmed in a registry, the card also lists
//! that registry as `eip155:{chainId}:{registry}`.

use serde::{Deserialize, Serialize};

use crate::config::IdentityConfig;

use super::AgentIdentity;
use super::wallet::address_hex;

/// ERC-8004 agent registration file.
///
/// Schema: <https://eips.ethereum.org/EIPS/eip-8004>
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationFile {
    /// Schema type identifier.
    #[serde(rename = "type")]
    pub schema_type: String,

    pub name: String,

    pub description: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    pub services: Vec<ServiceEntry>,

    pub active: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub registrations: Vec<Registration>,
}

/// A service endpoint in the registration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    /// Service name (e.g., "MCP", "A2A", "web").
    pub name: String,

    pub endpoint: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// On-chain registration reference. This registry keys agents by wallet
/// address, so the address doubles as the agent id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    #[serde(rename = "agentId")]
    pub agent_id: String,

    /// `eip155:{chainId}:{registry}`
    #[serde(rename = "agentRegistry")]
    pub agent_registry: String,
}

/// Schema type constant for ERC-8004 v1 registration files.
pub const REGISTRATION_V1_TYPE: &str = "https://eips.ethereum.org/EIPS/eip-8004#registration-v1";

/// Build an agent card.
///
/// `external_url` is advertised as the `web` service unless a configured
/// service already points at it.
pub fn build_agent_card(
    config: &IdentityConfig,
    agent: &AgentIdentity,
    external_url: Option<&str>,
) -> RegistrationFile {
    let mut services: Vec<ServiceEntry> = Vec::new();
    if let Some(url) = external_url
        && !config.services.iter().any(|s| s.endpoint == url)
    {
        services.push(ServiceEntry {
            name: "web".to_string(),
            endpoint: url.to_string(),
            version: None,
        });
    }
    services.extend(config.services.iter().map(|s| ServiceEntry {
        name: s.name.clone(),
        endpoint: s.endpoint.clone(),
        version: s.version.clone(),
    }));

    let registrations = agent
        .registry
        .iter()
        .map(|registry| Registration {
            agent_id: address_hex(&agent.wallet_address),
            agent_registry: registry.agent_registry(),
        })
        .collect();

    RegistrationFile {
        schema_type: REGISTRATION_V1_TYPE.to_string(),
        name: agent.name.clone(),
        description: config
            .description
            .clone()
            .unwrap_or_else(|| format!("Agent {}", address_hex(&agent.wallet_address))),
        image: config.image_url.clone(),
        services,
        active: true,
        registrations,
    }
}

/// Serialize the agent card to a pretty-printed JSON string.
pub fn agent_card_json(
    config: &IdentityConfig,
    agent: &AgentIdentity,
    external_url: Option<&str>,
) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&build_agent_card(config, agent, external_url))
}

#[cfg(test)]
mod tests {
    use alloy::primitives::Address;

    use super::*;
    use crate::config::ServiceEndpoint;
    use crate::identity::custody::{KeyOrigin, ResolvedKey};
    use crate::identity::wallet::SigningKey;

    fn agent() -> AgentIdentity {
        let resolved = ResolvedKey {
            key: SigningKey::random(),
            origin: KeyOrigin::Explicit,
        };
        AgentIdentity::new("Frack", &resolved)
    }

    fn identity_config() -> IdentityConfig {
        IdentityConfig {
            agent_name: "Frack".to_string(),
            description: Some("Personal AI assistant".to_string()),
            image_url: None,
            services: vec![ServiceEndpoint {
                name: "MCP".to_string(),
                endpoint: "https://frack.example.com/mcp".to_string(),
                version: Some("2025-06-18".to_string()),
            }],
        }
    }

    #[test]
    fn build_minimal_agent_card() {
        let card = build_agent_card(&identity_config(), &agent(), Some("https://frack.example.com/"));
        assert_eq!(card.name, "Frack");
        assert_eq!(card.schema_type, REGISTRATION_V1_TYPE);
        assert_eq!(card.services.len(), 2);
        assert_eq!(card.services[0].name, "web");
        assert!(card.active);
        assert!(card.registrations.is_empty());
    }

    #[test]
    fn external_url_not_duplicated() {
        let card = build_agent_card(&identity_config(), &agent(), Some("https://frack.example.com/mcp"));
        assert_eq!(card.services.len(), 1);
        assert_eq!(card.services[0].name, "MCP");
    }

    #[test]
    fn build_registered_agent_card() {
        let agent = agent().with_registration(1337, Address::new([0x11; 20]));
        let card = build_agent_card(&identity_config(), &agent, None);
        assert_eq!(card.registrations.len(), 1);
        assert_eq!(card.registrations[0].agent_id, address_hex(&agent.wallet_address));
        assert_eq!(
            card.registrations[0].agent_registry,
            format!("eip155:1337:0x{}", "11".repeat(20))
        );
    }

    #[test]
    fn agent_card_json_is_valid() {
        let json = agent_card_json(&IdentityConfig::default(), &agent(), None).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["name"], "Frack");
        assert_eq!(parsed["active"], true);
        assert!(parsed.get("registrations").is_none());
    }
}
