//! Password-encrypted keystore file holding exactly one signing key.
//!
//! # Format
//!
//! ```json
//! {
//!   "version": 1,
//!   "address": "0x…",
//!   "crypto": {
//!     "cipher": "aes-256-gcm",
//!     "ciphertext": "…",
//!     "cipherparams": { "nonce": "…" },
//!     "kdf": "argon2id",
//!     "kdfparams": { "m_cost": 65536, "t_cost": 3, "p_cost": 4, "dklen": 32, "salt": "…" }
//!   }
//! }
//! ```
//!
//! - Key derivation: Argon2id (memory-hard).
//! - Encryption: AES-256-GCM with the address bound as associated data, so
//!   editing the public `address` field breaks decryption.
//! - The plaintext key never touches disk. Files are written to a temp file
//!   in the target directory and renamed into place.
//!
//! A weak or empty password still produces a valid keystore. Choosing the
//! password is the operator's responsibility.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use alloy::primitives::{Address, hex};
use argon2::{Algorithm, Argon2, Params, Version};
use fs4::FileExt;
use rand::RngCore;
use rand::rngs::OsRng;
use secrecy::zeroize::Zeroizing;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::wallet::{PRIVATE_KEY_LEN, SigningKey, address_hex};

/// Current keystore file format version.
pub const KEYSTORE_VERSION: u32 = 1;

/// Cipher identifier written to the file.
pub const CIPHER_AES_256_GCM: &str = "aes-256-gcm";

/// KDF identifier written to the file.
pub const KDF_ARGON2ID: &str = "argon2id";

/// Salt length for key derivation (16 bytes).
pub const SALT_LEN: usize = 16;

/// Nonce length for AES-GCM (12 bytes).
pub const NONCE_LEN: usize = 12;

/// Derived key length (AES-256).
pub const DERIVED_KEY_LEN: usize = 32;

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub m_cost: u32,
    /// Iterations.
    pub t_cost: u32,
    /// Parallelism.
    pub p_cost: u32,
}

impl KdfParams {
    pub const fn new(m_cost: u32, t_cost: u32, p_cost: u32) -> Self {
        Self {
            m_cost,
            t_cost,
            p_cost,
        }
    }

    /// Minimal parameters for tests. Not for real keys.
    pub const fn insecure_fast() -> Self {
        Self::new(8, 1, 1)
    }
}

impl Default for KdfParams {
    /// 64 MiB, 3 passes, 4 lanes.
    fn default() -> Self {
        Self::new(65_536, 3, 4)
    }
}

/// On-disk keystore document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keystore {
    pub version: u32,
    /// Public address of the enclosed key, readable without the password.
    pub address: String,
    pub crypto: CryptoSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoSection {
    pub cipher: String,
    /// Hex-encoded ciphertext including the GCM tag.
    pub ciphertext: String,
    pub cipherparams: CipherParams,
    pub kdf: String,
    pub kdfparams: StoredKdfParams,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherParams {
    pub nonce: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredKdfParams {
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
    pub dklen: u32,
    pub salt: String,
}

impl Keystore {
    /// Encrypt `key` under `password`.
    pub fn encrypt(
        key: &SigningKey,
        password: &SecretString,
        params: KdfParams,
    ) -> Result<Self, KeystoreError> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut nonce);

        let address = address_hex(&key.address());
        let kek = derive_key(password, &salt, params)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(kek.as_slice()));
        let secret = key.secret_bytes();
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: secret.as_slice(),
                    aad: address.as_bytes(),
                },
            )
            .map_err(|e| KeystoreError::Crypto(format!("encryption failed: {e}")))?;

        Ok(Self {
            version: KEYSTORE_VERSION,
            address,
            crypto: CryptoSection {
                cipher: CIPHER_AES_256_GCM.to_string(),
                ciphertext: hex::encode(ciphertext),
                cipherparams: CipherParams {
                    nonce: hex::encode(nonce),
                },
                kdf: KDF_ARGON2ID.to_string(),
                kdfparams: StoredKdfParams {
                    m_cost: params.m_cost,
                    t_cost: params.t_cost,
                    p_cost: params.p_cost,
                    dklen: DERIVED_KEY_LEN as u32,
                    salt: hex::encode(salt),
                },
            },
        })
    }

    /// Decrypt the enclosed key.
    ///
    /// A wrong password and a tampered file are indistinguishable here; both
    /// fail GCM authentication and return [`KeystoreError::Decryption`].
    pub fn decrypt(&self, password: &SecretString) -> Result<SigningKey, KeystoreError> {
        if self.version != KEYSTORE_VERSION {
            return Err(KeystoreError::Corrupt(format!(
                "unsupported keystore version {}",
                self.version
            )));
        }
        if self.crypto.cipher != CIPHER_AES_256_GCM {
            return Err(KeystoreError::Corrupt(format!(
                "unsupported cipher '{}'",
                self.crypto.cipher
            )));
        }
        if self.crypto.kdf != KDF_ARGON2ID {
            return Err(KeystoreError::Corrupt(format!(
                "unsupported kdf '{}'",
                self.crypto.kdf
            )));
        }
        let kdf = &self.crypto.kdfparams;
        if kdf.dklen as usize != DERIVED_KEY_LEN {
            return Err(KeystoreError::Corrupt(format!(
                "unsupported derived key length {}",
                kdf.dklen
            )));
        }

        let salt = decode_field("salt", &kdf.salt)?;
        let nonce = decode_field("nonce", &self.crypto.cipherparams.nonce)?;
        if nonce.len() != NONCE_LEN {
            return Err(KeystoreError::Corrupt("nonce has wrong length".to_string()));
        }
        let ciphertext = decode_field("ciphertext", &self.crypto.ciphertext)?;

        let params = KdfParams::new(kdf.m_cost, kdf.t_cost, kdf.p_cost);
        let kek = derive_key(password, &salt, params)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(kek.as_slice()));
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(
                    Nonce::from_slice(&nonce),
                    Payload {
                        msg: &ciphertext,
                        aad: self.address.as_bytes(),
                    },
                )
                .map_err(|_| KeystoreError::Decryption)?,
        );

        if plaintext.len() != PRIVATE_KEY_LEN {
            return Err(KeystoreError::Corrupt(format!(
                "decrypted key has length {}, expected {}",
                plaintext.len(),
                PRIVATE_KEY_LEN
            )));
        }
        let mut raw = Zeroizing::new([0u8; PRIVATE_KEY_LEN]);
        raw.copy_from_slice(&plaintext);
        let key = SigningKey::from_bytes(&raw)
            .map_err(|e| KeystoreError::Corrupt(format!("decrypted key is invalid: {e}")))?;

        if address_hex(&key.address()) != self.address.to_lowercase() {
            return Err(KeystoreError::Corrupt(
                "decrypted key does not match stored address".to_string(),
            ));
        }
        Ok(key)
    }

    /// Stored address, parsed.
    pub fn address(&self) -> Result<Address, KeystoreError> {
        self.address
            .parse()
            .map_err(|_| KeystoreError::Corrupt(format!("invalid address '{}'", self.address)))
    }

    /// Read and parse a keystore file.
    pub fn load(path: &Path) -> Result<Self, KeystoreError> {
        let data = std::fs::read_to_string(path).map_err(|source| KeystoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&data)
            .map_err(|e| KeystoreError::Corrupt(format!("{}: {e}", path.display())))
    }

    /// Write to `path` via temp file + rename. Fails with
    /// [`KeystoreError::AlreadyExists`] instead of replacing an existing file.
    pub fn write_new(&self, path: &Path) -> Result<(), KeystoreError> {
        let dir = parent_dir(path);
        std::fs::create_dir_all(&dir).map_err(|source| KeystoreError::Io {
            path: dir.clone(),
            source,
        })?;

        let data = serde_json::to_vec_pretty(self)
            .map_err(|e| KeystoreError::Corrupt(format!("serialize error: {e}")))?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".keystore-")
            .suffix(".tmp")
            .tempfile_in(&dir)
            .map_err(|source| KeystoreError::Io {
                path: dir.clone(),
                source,
            })?;
        let io_err = |source| KeystoreError::Io {
            path: path.to_path_buf(),
            source,
        };
        tmp.write_all(&data).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        restrict_permissions(tmp.as_file());

        tmp.persist_noclobber(path).map_err(|e| {
            if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                KeystoreError::AlreadyExists(path.to_path_buf())
            } else {
                io_err(e.error)
            }
        })?;
        Ok(())
    }
}

/// Exclusive advisory lock on `<keystore>.lock`, released on drop.
///
/// Serializes the check-then-create sequence between processes that share
/// a keystore path.
#[derive(Debug)]
pub struct KeystoreLock {
    file: File,
    path: PathBuf,
}

impl KeystoreLock {
    /// Block until the lock for `keystore_path` is held.
    pub fn acquire(keystore_path: &Path) -> Result<Self, KeystoreError> {
        let path = lock_path(keystore_path);
        let dir = parent_dir(&path);
        std::fs::create_dir_all(&dir).map_err(|source| KeystoreError::Io {
            path: dir.clone(),
            source,
        })?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|source| KeystoreError::Io {
                path: path.clone(),
                source,
            })?;
        file.lock_exclusive().map_err(|source| KeystoreError::Lock {
            path: path.clone(),
            source,
        })?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for KeystoreLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::debug!(path = %self.path.display(), "Failed to release keystore lock: {}", e);
        }
    }
}

fn lock_path(keystore_path: &Path) -> PathBuf {
    let mut name = keystore_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "keystore".into());
    name.push(".lock");
    keystore_path.with_file_name(name)
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn derive_key(
    password: &SecretString,
    salt: &[u8],
    params: KdfParams,
) -> Result<Zeroizing<[u8; DERIVED_KEY_LEN]>, KeystoreError> {
    let params = Params::new(
        params.m_cost,
        params.t_cost,
        params.p_cost,
        Some(DERIVED_KEY_LEN),
    )
    .map_err(|e| KeystoreError::Crypto(format!("invalid Argon2 params: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; DERIVED_KEY_LEN]);
    argon2
        .hash_password_into(password.expose_secret().as_bytes(), salt, key.as_mut_slice())
        .map_err(|e| KeystoreError::Crypto(format!("key derivation failed: {e}")))?;
    Ok(key)
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>, KeystoreError> {
    hex::decode(value).map_err(|_| KeystoreError::Corrupt(format!("{name} is not valid hex")))
}

#[cfg(unix)]
fn restrict_permissions(file: &File) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = file.set_permissions(std::fs::Permissions::from_mode(0o600)) {
        tracing::warn!("Could not restrict keystore permissions: {}", e);
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_file: &File) {}

/// Keystore errors.
#[derive(Debug, thiserror::Error)]
pub enum KeystoreError {
    #[error("failed to decrypt keystore (wrong password or tampered file)")]
    Decryption,
    #[error("keystore is corrupt: {0}")]
    Corrupt(String),
    #[error("keystore already exists at {0}")]
    AlreadyExists(PathBuf),
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("crypto error: {0}")]
    Crypto(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pw(s: &str) -> SecretString {
        SecretString::from(s.to_string())
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let key = SigningKey::random();
        let ks = Keystore::encrypt(&key, &pw("pw123"), KdfParams::insecure_fast()).unwrap();

        assert_eq!(ks.address, address_hex(&key.address()));
        assert_eq!(ks.crypto.cipher, CIPHER_AES_256_GCM);
        assert_eq!(ks.crypto.kdf, KDF_ARGON2ID);

        let restored = ks.decrypt(&pw("pw123")).unwrap();
        assert_eq!(*restored.secret_bytes(), *key.secret_bytes());
    }

    #[test]
    fn wrong_password_fails() {
        let key = SigningKey::random();
        let ks = Keystore::encrypt(&key, &pw("right"), KdfParams::insecure_fast()).unwrap();
        assert!(matches!(
            ks.decrypt(&pw("wrong")),
            Err(KeystoreError::Decryption)
        ));
    }

    #[test]
    fn empty_password_still_produces_keystore() {
        let key = SigningKey::random();
        let ks = Keystore::encrypt(&key, &pw(""), KdfParams::insecure_fast()).unwrap();
        assert_eq!(ks.decrypt(&pw("")).unwrap().address(), key.address());
    }

    #[test]
    fn tampered_address_fails_authentication() {
        let key = SigningKey::random();
        let mut ks = Keystore::encrypt(&key, &pw("pw"), KdfParams::insecure_fast()).unwrap();
        ks.address = address_hex(&SigningKey::random().address());
        assert!(matches!(ks.decrypt(&pw("pw")), Err(KeystoreError::Decryption)));
    }

    #[test]
    fn plaintext_key_not_in_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ks.json");
        let key = SigningKey::random();
        Keystore::encrypt(&key, &pw("pw"), KdfParams::insecure_fast())
            .unwrap()
            .write_new(&path)
            .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(!contents.contains(&hex::encode(key.secret_bytes().as_slice())));
        assert!(contents.contains(&address_hex(&key.address())));
    }

    #[test]
    fn write_new_refuses_to_clobber() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ks.json");
        let first = Keystore::encrypt(&SigningKey::random(), &pw("pw"), KdfParams::insecure_fast())
            .unwrap();
        first.write_new(&path).unwrap();

        let second = Keystore::encrypt(&SigningKey::random(), &pw("pw"), KdfParams::insecure_fast())
            .unwrap();
        assert!(matches!(
            second.write_new(&path),
            Err(KeystoreError::AlreadyExists(_))
        ));
        assert_eq!(Keystore::load(&path).unwrap(), first);
    }

    #[test]
    fn write_leaves_no_temp_files() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ks.json");
        Keystore::encrypt(&SigningKey::random(), &pw("pw"), KdfParams::insecure_fast())
            .unwrap()
            .write_new(&path)
            .unwrap();
        let names: Vec<String> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["ks.json".to_string()]);
    }

    #[test]
    fn truncated_file_never_decrypts() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ks.json");
        let ks = Keystore::encrypt(&SigningKey::random(), &pw("pw"), KdfParams::insecure_fast())
            .unwrap();
        let full = serde_json::to_vec_pretty(&ks).unwrap();

        // Every prefix of the document is what a torn write could leave behind.
        for cut in (0..full.len()).step_by(7) {
            std::fs::write(&path, &full[..cut]).unwrap();
            match Keystore::load(&path) {
                Err(KeystoreError::Corrupt(_)) => {}
                Ok(partial) => panic!("prefix of {cut} bytes parsed as {partial:?}"),
                Err(other) => panic!("unexpected error {other}"),
            }
        }
    }

    #[test]
    fn truncated_ciphertext_is_rejected() {
        let key = SigningKey::random();
        let mut ks = Keystore::encrypt(&key, &pw("pw"), KdfParams::insecure_fast()).unwrap();
        let len = ks.crypto.ciphertext.len();
        ks.crypto.ciphertext.truncate(len - 8);
        assert!(matches!(ks.decrypt(&pw("pw")), Err(KeystoreError::Decryption)));
    }

    #[test]
    fn lock_file_sits_next_to_keystore() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("agent_keystore.json");
        let lock = KeystoreLock::acquire(&path).unwrap();
        assert_eq!(lock.path(), tmp.path().join("agent_keystore.json.lock"));
        assert!(lock.path().exists());
    }
}
