//! Key custody: resolve the agent's signing key.
//!
//! Resolution order, first match wins:
//! 1. Explicit private key from configuration (used as-is, never persisted).
//! 2. Existing keystore file, decrypted with the configured password.
//! 3. A freshly generated key, encrypted and written to the keystore path.
//!
//! Only step 3 writes to disk. It runs under an exclusive lock on
//! `<keystore>.lock` and re-checks for the file after the lock is taken, so
//! two agents starting against the same path end up sharing one key.

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use tracing::{debug, info};

use super::keystore::{KdfParams, Keystore, KeystoreError, KeystoreLock};
use super::wallet::{SigningKey, WalletError, address_hex};

/// Default keystore location, relative to the working directory.
pub const DEFAULT_KEYSTORE_PATH: &str = "./agent_keystore.json";

/// Inputs for key resolution.
#[derive(Debug, Clone)]
pub struct CustodyConfig {
    /// Explicit hex private key. Highest priority.
    pub private_key: Option<SecretString>,
    /// Keystore file location.
    pub keystore_path: PathBuf,
    /// Password for reading or creating the keystore.
    pub password: Option<SecretString>,
    /// Argon2id cost for newly created keystores.
    pub kdf: KdfParams,
}

impl Default for CustodyConfig {
    fn default() -> Self {
        Self {
            private_key: None,
            keystore_path: PathBuf::from(DEFAULT_KEYSTORE_PATH),
            password: None,
            kdf: KdfParams::default(),
        }
    }
}

/// Where a resolved key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrigin {
    Explicit,
    Keystore,
    Generated,
}

impl std::fmt::Display for KeyOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyOrigin::Explicit => write!(f, "private key"),
            KeyOrigin::Keystore => write!(f, "keystore"),
            KeyOrigin::Generated => write!(f, "new keystore"),
        }
    }
}

/// A signing key plus its provenance.
#[derive(Debug)]
pub struct ResolvedKey {
    pub key: SigningKey,
    pub origin: KeyOrigin,
}

/// Resolve the signing key per the custody order.
///
/// Blocking: may run Argon2 and touch the filesystem. Call from a blocking
/// context (`spawn_blocking`) when inside an async runtime.
pub fn resolve_key(config: &CustodyConfig) -> Result<ResolvedKey, KeyResolutionError> {
    if let Some(private_key) = &config.private_key {
        use secrecy::ExposeSecret;
        let key = SigningKey::from_hex(private_key.expose_secret())
            .map_err(KeyResolutionError::InvalidPrivateKey)?;
        info!(address = %address_hex(&key.address()), "Loaded wallet from private key");
        return Ok(ResolvedKey {
            key,
            origin: KeyOrigin::Explicit,
        });
    }

    let path = config.keystore_path.as_path();
    let password = config.password.as_ref().ok_or_else(|| {
        KeyResolutionError::Configuration(
            "wallet password is required to read or create a keystore".to_string(),
        )
    })?;

    if path.exists() {
        return load_existing(path, password);
    }

    let _lock = KeystoreLock::acquire(path)?;
    if path.exists() {
        debug!(path = %path.display(), "Keystore appeared while waiting for lock");
        return load_existing(path, password);
    }

    info!("No existing wallet found. Creating new wallet...");
    let key = SigningKey::random();
    let keystore = Keystore::encrypt(&key, password, config.kdf)?;
    match keystore.write_new(path) {
        Ok(()) => {}
        Err(KeystoreError::AlreadyExists(_)) => return load_existing(path, password),
        Err(e) => return Err(e.into()),
    }

    info!(
        address = %address_hex(&key.address()),
        path = %path.display(),
        "Created new wallet"
    );
    Ok(ResolvedKey {
        key,
        origin: KeyOrigin::Generated,
    })
}

fn load_existing(path: &Path, password: &SecretString) -> Result<ResolvedKey, KeyResolutionError> {
    let decryption = |source| KeyResolutionError::Decryption {
        path: path.to_path_buf(),
        source,
    };
    let keystore = Keystore::load(path).map_err(|e| match e {
        e @ KeystoreError::Corrupt(_) => decryption(e),
        other => other.into(),
    })?;
    let key = keystore.decrypt(password).map_err(decryption)?;
    info!(address = %address_hex(&key.address()), path = %path.display(), "Loaded wallet from keystore");
    Ok(ResolvedKey {
        key,
        origin: KeyOrigin::Keystore,
    })
}

/// Key resolution failures. All are fatal to a registration attempt.
#[derive(Debug, thiserror::Error)]
pub enum KeyResolutionError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(#[source] WalletError),
    #[error("failed to decrypt keystore at {path}: {source}")]
    Decryption {
        path: PathBuf,
        #[source]
        source: KeystoreError,
    },
    #[error(transparent)]
    Keystore(#[from] KeystoreError),
}

impl KeyResolutionError {
    /// Wrong password or corrupt keystore.
    pub fn is_decryption(&self) -> bool {
        matches!(self, KeyResolutionError::Decryption { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn config(dir: &Path, password: Option<&str>) -> CustodyConfig {
        CustodyConfig {
            private_key: None,
            keystore_path: dir.join("agent_keystore.json"),
            password: password.map(|p| SecretString::from(p.to_string())),
            kdf: KdfParams::insecure_fast(),
        }
    }

    #[test]
    fn creates_keystore_when_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config(tmp.path(), Some("pw123"));

        let resolved = resolve_key(&cfg).unwrap();
        assert_eq!(resolved.origin, KeyOrigin::Generated);
        assert!(cfg.keystore_path.exists());

        let stored = Keystore::load(&cfg.keystore_path).unwrap();
        assert_eq!(stored.address, address_hex(&resolved.key.address()));
    }

    #[test]
    fn reloads_existing_keystore() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config(tmp.path(), Some("pw123"));

        let first = resolve_key(&cfg).unwrap();
        let second = resolve_key(&cfg).unwrap();
        assert_eq!(second.origin, KeyOrigin::Keystore);
        assert_eq!(first.key.address(), second.key.address());
    }

    #[test]
    fn explicit_key_wins_over_keystore() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = config(tmp.path(), Some("pw123"));
        let from_keystore = resolve_key(&cfg).unwrap();

        cfg.private_key = Some(SecretString::from(DEV_KEY.to_string()));
        let resolved = resolve_key(&cfg).unwrap();

        let expected = SigningKey::from_hex(DEV_KEY).unwrap().address();
        assert_eq!(resolved.origin, KeyOrigin::Explicit);
        assert_eq!(resolved.key.address(), expected);
        assert_ne!(resolved.key.address(), from_keystore.key.address());
    }

    #[test]
    fn explicit_key_needs_no_password_and_writes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = config(tmp.path(), None);
        cfg.private_key = Some(SecretString::from(DEV_KEY.to_string()));

        resolve_key(&cfg).unwrap();
        assert!(!cfg.keystore_path.exists());
    }

    #[test]
    fn invalid_explicit_key_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = config(tmp.path(), Some("pw"));
        cfg.private_key = Some(SecretString::from("0xnothex".to_string()));
        assert!(matches!(
            resolve_key(&cfg),
            Err(KeyResolutionError::InvalidPrivateKey(_))
        ));
    }

    #[test]
    fn wrong_password_is_decryption_error() {
        let tmp = tempfile::tempdir().unwrap();
        resolve_key(&config(tmp.path(), Some("right"))).unwrap();

        let err = resolve_key(&config(tmp.path(), Some("wrong"))).unwrap_err();
        assert!(err.is_decryption(), "got {err}");
    }

    #[test]
    fn corrupt_keystore_is_decryption_error() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config(tmp.path(), Some("pw"));
        std::fs::write(&cfg.keystore_path, b"{\"version\": 1, \"addr").unwrap();

        let err = resolve_key(&cfg).unwrap_err();
        assert!(err.is_decryption(), "got {err}");
    }

    #[test]
    fn missing_password_is_configuration_error() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config(tmp.path(), None);
        assert!(matches!(
            resolve_key(&cfg),
            Err(KeyResolutionError::Configuration(_))
        ));
        assert!(!cfg.keystore_path.exists());
    }

    #[test]
    fn leftover_temp_file_is_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config(tmp.path(), Some("pw"));
        // What a crash between temp write and rename leaves behind.
        std::fs::write(tmp.path().join(".keystore-abc123.tmp"), b"{\"version\":1").unwrap();

        let resolved = resolve_key(&cfg).unwrap();
        assert_eq!(resolved.origin, KeyOrigin::Generated);
        assert_eq!(
            Keystore::load(&cfg.keystore_path).unwrap().address,
            address_hex(&resolved.key.address())
        );
    }

    #[test]
    fn concurrent_resolution_shares_one_key() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = config(tmp.path(), Some("pw"));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cfg = cfg.clone();
                std::thread::spawn(move || resolve_key(&cfg).unwrap().key.address())
            })
            .collect();
        let addresses: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(addresses.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(
            Keystore::load(&cfg.keystore_path).unwrap().address().unwrap(),
            addresses[0]
        );
    }
}
