//! Effective registration configuration.
//!
//! Each value is taken from the environment first, then the settings file,
//! then a built-in default. Secrets only ever come from the environment.
//! Resolution takes an env lookup function so tests can supply a map
//! instead of mutating the process environment.

use std::path::PathBuf;
use std::time::Duration;

use alloy::primitives::Address;
use secrecy::SecretString;

use crate::chain::client::DEFAULT_RPC_TIMEOUT;
use crate::identity::custody::{CustodyConfig, DEFAULT_KEYSTORE_PATH};
use crate::identity::keystore::KdfParams;
use crate::registry::registrar::{DEFAULT_MAX_TRANSIENT_RETRIES, RegistrarOptions};
use crate::settings::{IdentitySettings, Settings};

pub const ENV_ENABLE_REGISTRATION: &str = "AGENT_ENABLE_REGISTRATION";
pub const ENV_MOCK_REGISTRATION: &str = "AGENT_MOCK_REGISTRATION";
pub const ENV_PRIVATE_KEY: &str = "AGENT_PRIVATE_KEY";
pub const ENV_KEYSTORE_PATH: &str = "AGENT_KEYSTORE_PATH";
pub const ENV_WALLET_PASSWORD: &str = "AGENT_WALLET_PASSWORD";
pub const ENV_EXTERNAL_URL: &str = "AGENT_EXTERNAL_URL";
pub const ENV_RPC_URL: &str = "AGENT_RPC_URL";
pub const ENV_REGISTRY_ADDRESS: &str = "AGENT_REGISTRY_ADDRESS";
pub const ENV_CHAIN_ID: &str = "AGENT_CHAIN_ID";
pub const ENV_ALLOW_URL_UPDATE: &str = "AGENT_ALLOW_URL_UPDATE";
pub const ENV_POLL_INTERVAL_MS: &str = "AGENT_RECEIPT_POLL_INTERVAL_MS";
pub const ENV_POLL_ATTEMPTS: &str = "AGENT_RECEIPT_POLL_ATTEMPTS";

/// A required value is missing or malformed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("{0} is required for registration but not set")]
    Missing(&'static str),

    #[error("{key} has invalid value '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigurationError {
    fn invalid(key: &'static str, value: &str, reason: impl ToString) -> Self {
        ConfigurationError::Invalid {
            key,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Agent card metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityConfig {
    pub agent_name: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub services: Vec<ServiceEndpoint>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub name: String,
    pub endpoint: String,
    pub version: Option<String>,
}

impl IdentityConfig {
    fn from_settings(settings: &IdentitySettings) -> Self {
        Self {
            agent_name: settings
                .agent_name
                .clone()
                .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string()),
            description: settings.description.clone(),
            image_url: settings.image_url.clone(),
            services: settings
                .services
                .iter()
                .map(|s| ServiceEndpoint {
                    name: s.name.clone(),
                    endpoint: s.endpoint.clone(),
                    version: s.version.clone(),
                })
                .collect(),
        }
    }
}

/// Everything one registration attempt needs, resolved once up front.
#[derive(Debug, Clone)]
pub struct RegistrationConfig {
    pub enable_registration: bool,
    pub mock_registration: bool,
    pub private_key: Option<SecretString>,
    pub keystore_path: PathBuf,
    pub wallet_password: Option<SecretString>,
    pub external_url: Option<String>,
    pub rpc_url: Option<String>,
    pub registry_address: Option<String>,
    pub chain_id: Option<u64>,
    pub allow_url_update: bool,
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
    pub rpc_timeout: Duration,
    /// Argon2id cost for newly created keystores.
    pub kdf: KdfParams,
    pub identity: IdentityConfig,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        let reg = crate::settings::RegistrationSettings::default();
        Self {
            enable_registration: reg.enable_registration,
            mock_registration: reg.mock_registration,
            private_key: None,
            keystore_path: PathBuf::from(DEFAULT_KEYSTORE_PATH),
            wallet_password: None,
            external_url: None,
            rpc_url: None,
            registry_address: None,
            chain_id: None,
            allow_url_update: reg.allow_url_update,
            poll_interval: Duration::from_millis(reg.poll_interval_ms),
            max_poll_attempts: reg.max_poll_attempts,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            kdf: KdfParams::default(),
            identity: IdentityConfig::from_settings(&IdentitySettings::default()),
        }
    }
}

impl RegistrationConfig {
    /// Resolve from the process environment and the settings file.
    pub fn from_env(settings: &Settings) -> Result<Self, ConfigurationError> {
        Self::resolve(settings, |key| std::env::var(key).ok())
    }

    /// Resolve with an explicit env lookup.
    ///
    /// Only malformed values fail here. Missing values that registration
    /// needs are reported by [`validate`](Self::validate), so a disabled
    /// registration never errors on an incomplete configuration.
    pub fn resolve<F>(settings: &Settings, env: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let reg = &settings.registration;
        let lookup = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let enable_registration = lookup(ENV_ENABLE_REGISTRATION)
            .map(|v| parse_bool(&v))
            .unwrap_or(reg.enable_registration);
        let mock_registration = lookup(ENV_MOCK_REGISTRATION)
            .map(|v| parse_bool(&v))
            .unwrap_or(reg.mock_registration);
        let allow_url_update = lookup(ENV_ALLOW_URL_UPDATE)
            .map(|v| parse_bool(&v))
            .unwrap_or(reg.allow_url_update);

        let chain_id = match lookup(ENV_CHAIN_ID) {
            Some(v) => Some(parse_number::<u64>(ENV_CHAIN_ID, &v)?),
            None => reg.chain_id,
        };
        let poll_interval_ms = match lookup(ENV_POLL_INTERVAL_MS) {
            Some(v) => parse_number::<u64>(ENV_POLL_INTERVAL_MS, &v)?,
            None => reg.poll_interval_ms,
        };
        let max_poll_attempts = match lookup(ENV_POLL_ATTEMPTS) {
            Some(v) => parse_number::<u32>(ENV_POLL_ATTEMPTS, &v)?,
            None => reg.max_poll_attempts,
        };
        if max_poll_attempts == 0 {
            return Err(ConfigurationError::invalid(
                ENV_POLL_ATTEMPTS,
                "0",
                "at least one receipt poll is required",
            ));
        }

        let keystore_path = lookup(ENV_KEYSTORE_PATH)
            .or_else(|| reg.keystore_path.clone())
            .unwrap_or_else(|| DEFAULT_KEYSTORE_PATH.to_string());

        Ok(Self {
            enable_registration,
            mock_registration,
            // Secrets are passed through untrimmed; a password may end in whitespace.
            private_key: env(ENV_PRIVATE_KEY)
                .filter(|v| !v.trim().is_empty())
                .map(SecretString::from),
            keystore_path: PathBuf::from(keystore_path),
            wallet_password: env(ENV_WALLET_PASSWORD).map(SecretString::from),
            external_url: lookup(ENV_EXTERNAL_URL).or_else(|| reg.external_url.clone()),
            rpc_url: lookup(ENV_RPC_URL).or_else(|| reg.rpc_url.clone()),
            registry_address: lookup(ENV_REGISTRY_ADDRESS).or_else(|| reg.registry_address.clone()),
            chain_id,
            allow_url_update,
            poll_interval: Duration::from_millis(poll_interval_ms),
            max_poll_attempts,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            kdf: KdfParams::default(),
            identity: IdentityConfig::from_settings(&settings.identity),
        })
    }

    /// Check everything a registration attempt needs.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.registrar_options().map(|_| ())
    }

    /// The external URL, validated as an absolute http(s) URL.
    pub fn external_url(&self) -> Result<&str, ConfigurationError> {
        let raw = self
            .external_url
            .as_deref()
            .ok_or(ConfigurationError::Missing(ENV_EXTERNAL_URL))?;
        check_http_url(ENV_EXTERNAL_URL, raw)?;
        Ok(raw)
    }

    /// The RPC endpoint, validated as an absolute http(s) URL.
    pub fn rpc_url(&self) -> Result<&str, ConfigurationError> {
        let raw = self
            .rpc_url
            .as_deref()
            .ok_or(ConfigurationError::Missing(ENV_RPC_URL))?;
        check_http_url(ENV_RPC_URL, raw)?;
        Ok(raw)
    }

    pub fn registry_address(&self) -> Result<Address, ConfigurationError> {
        let raw = self
            .registry_address
            .as_deref()
            .ok_or(ConfigurationError::Missing(ENV_REGISTRY_ADDRESS))?;
        raw.parse::<Address>()
            .map_err(|e| ConfigurationError::invalid(ENV_REGISTRY_ADDRESS, raw, e))
    }

    /// Options for [`crate::registry::Registrar`].
    pub fn registrar_options(&self) -> Result<RegistrarOptions, ConfigurationError> {
        self.rpc_url()?;
        Ok(RegistrarOptions {
            registry: self.registry_address()?,
            external_url: self.external_url()?.to_string(),
            expected_chain_id: self.chain_id,
            mock: self.mock_registration,
            allow_url_update: self.allow_url_update,
            poll_interval: self.poll_interval,
            max_poll_attempts: self.max_poll_attempts,
            max_transient_retries: DEFAULT_MAX_TRANSIENT_RETRIES,
        })
    }

    /// Inputs for key resolution.
    pub fn custody_config(&self) -> CustodyConfig {
        CustodyConfig {
            private_key: self.private_key.clone(),
            keystore_path: self.keystore_path.clone(),
            password: self.wallet_password.clone(),
            kdf: self.kdf,
        }
    }
}

/// `1`, `true`, `yes`, `on` (any case) are true; anything else is false.
pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_number<T>(key: &'static str, value: &str) -> Result<T, ConfigurationError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| ConfigurationError::invalid(key, value, e))
}

fn check_http_url(key: &'static str, raw: &str) -> Result<(), ConfigurationError> {
    let parsed = url::Url::parse(raw).map_err(|e| ConfigurationError::invalid(key, raw, e))?;
    match parsed.scheme() {
        "http" | "https" if parsed.has_host() => Ok(()),
        "http" | "https" => Err(ConfigurationError::invalid(key, raw, "URL has no host")),
        other => Err(ConfigurationError::invalid(
            key,
            raw,
            format!("unsupported scheme '{other}'"),
        )),
    }
}
