//! User settings persistence.
//!
//! Stores registration preferences in ~/.agent-registrar/settings.json.
//! Settings are loaded with env var > settings.json > default priority;
//! the env layer is applied in [`crate::config`]. Secrets (private key,
//! wallet password) are never read from or written to this file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// User settings persisted to disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// On-chain registration.
    #[serde(default)]
    pub registration: RegistrationSettings,

    /// Agent card metadata.
    #[serde(default)]
    pub identity: IdentitySettings,
}

/// Registration behavior and chain endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationSettings {
    /// Run a registration attempt when the agent starts.
    #[serde(default)]
    pub enable_registration: bool,

    /// Sign but never submit; report a simulated success.
    #[serde(default)]
    pub mock_registration: bool,

    /// Keystore file. None = `./agent_keystore.json`.
    #[serde(default)]
    pub keystore_path: Option<String>,

    /// Public URL published in the registry.
    #[serde(default)]
    pub external_url: Option<String>,

    /// JSON-RPC endpoint of the chain node.
    #[serde(default)]
    pub rpc_url: Option<String>,

    /// Registry contract address (0x-prefixed hex).
    #[serde(default)]
    pub registry_address: Option<String>,

    /// Expected chain id. None = accept whatever the node reports.
    #[serde(default)]
    pub chain_id: Option<u64>,

    /// Overwrite an existing registration that points at a different URL.
    #[serde(default)]
    pub allow_url_update: bool,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_max_poll_attempts() -> u32 {
    30
}

impl Default for RegistrationSettings {
    fn default() -> Self {
        Self {
            enable_registration: false,
            mock_registration: false,
            keystore_path: None,
            external_url: None,
            rpc_url: None,
            registry_address: None,
            chain_id: None,
            allow_url_update: false,
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_attempts: default_max_poll_attempts(),
        }
    }
}

/// Metadata for the ERC-8004 agent card.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySettings {
    /// Agent display name. Falls back to the package name.
    #[serde(default)]
    pub agent_name: Option<String>,

    /// Agent description for the registration file.
    #[serde(default)]
    pub description: Option<String>,

    /// Agent image URL for the registration file.
    #[serde(default)]
    pub image_url: Option<String>,

    /// Extra service endpoints advertised in the agent card. The external
    /// URL is always advertised as `web`.
    #[serde(default)]
    pub services: Vec<ServiceEndpointSettings>,
}

/// A service endpoint in the agent card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpointSettings {
    /// Service name (e.g., "MCP", "A2A", "web").
    pub name: String,
    /// Endpoint URL.
    pub endpoint: String,
    /// Protocol version (optional).
    #[serde(default)]
    pub version: Option<String>,
}

impl Settings {
    /// Get the default settings file path (~/.agent-registrar/settings.json).
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".agent-registrar")
            .join("settings.json")
    }

    /// Load settings from disk, returning default if not found.
    pub fn load() -> Self {
        Self::load_from(&Self::default_path())
    }

    /// Load settings from a specific path.
    ///
    /// A missing file yields defaults silently; an unparseable one yields
    /// defaults with a warning.
    pub fn load_from(path: &Path) -> Self {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str(&data) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Ignoring malformed settings file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}
