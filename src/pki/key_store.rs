//! Key Store
//!
//! Persistence for the system identity and user certificates. Superseded
//! material is never deleted; it moves under an archive label.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::certificate::Certificate;
use crate::crypto::{bytes_to_hex, hex_to_bytes, EncryptionAlgorithm, KeyPair};
use crate::error::LedgerError;

/// The authority's own key pair and self-signed certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemIdentity {
    pub key_pair: KeyPair,
    pub certificate: Certificate,
}

/// Storage for PKI material.
///
/// User ids double as storage names. `FileKeyStore` accepts only ASCII
/// letters, digits and `-_.@`, without a leading dot, and rejects anything
/// else with `InvalidInput`.
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn load_system_identity(&self) -> Result<Option<SystemIdentity>, LedgerError>;

    /// Archive whatever identity is on file and store `identity` in its place.
    /// Returns the archive label, or `None` when there was nothing to archive.
    async fn rotate_system_identity(
        &self,
        identity: &SystemIdentity,
    ) -> Result<Option<String>, LedgerError>;

    /// Archive the certificate on file for `certificate.subject`, if any, and
    /// store `certificate` in its place as one step. Returns the archive label.
    async fn replace_user_certificate(
        &self,
        certificate: &Certificate,
    ) -> Result<Option<String>, LedgerError>;

    async fn get_user_certificate(&self, user_id: &str) -> Result<Option<Certificate>, LedgerError>;

    /// Archive labels, oldest first.
    async fn list_archives(&self) -> Result<Vec<String>, LedgerError>;
}

/// Archive label for material superseded at `at`.
pub fn archive_label(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%S%.3fZ").to_string()
}

#[derive(Default)]
struct MemoryKeys {
    system: Option<SystemIdentity>,
    users: HashMap<String, Certificate>,
    archives: BTreeMap<String, ArchivedMaterial>,
}

#[derive(Default)]
struct ArchivedMaterial {
    system: Option<SystemIdentity>,
    users: Vec<Certificate>,
}

impl MemoryKeys {
    fn next_label(&self) -> String {
        let base = archive_label(Utc::now());
        let mut label = base.clone();
        let mut suffix = 1;
        while self.archives.contains_key(&label) {
            label = format!("{}-{}", base, suffix);
            suffix += 1;
        }
        label
    }
}

/// Process-local key store.
#[derive(Default)]
pub struct InMemoryKeyStore {
    keys: Mutex<MemoryKeys>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored identity without archiving, for seeding tests.
    pub async fn put_system_identity(&self, identity: SystemIdentity) {
        self.keys.lock().await.system = Some(identity);
    }

    /// Archived system identity under `label`, if any.
    pub async fn archived_system_identity(&self, label: &str) -> Option<SystemIdentity> {
        self.keys
            .lock()
            .await
            .archives
            .get(label)
            .and_then(|archived| archived.system.clone())
    }
}

#[async_trait]
impl KeyStore for InMemoryKeyStore {
    async fn load_system_identity(&self) -> Result<Option<SystemIdentity>, LedgerError> {
        Ok(self.keys.lock().await.system.clone())
    }

    async fn rotate_system_identity(
        &self,
        identity: &SystemIdentity,
    ) -> Result<Option<String>, LedgerError> {
        let mut keys = self.keys.lock().await;
        let label = match keys.system.take() {
            Some(previous) => {
                let label = keys.next_label();
                keys.archives.insert(
                    label.clone(),
                    ArchivedMaterial {
                        system: Some(previous),
                        users: Vec::new(),
                    },
                );
                Some(label)
            }
            None => None,
        };
        keys.system = Some(identity.clone());
        Ok(label)
    }

    async fn replace_user_certificate(
        &self,
        certificate: &Certificate,
    ) -> Result<Option<String>, LedgerError> {
        let mut keys = self.keys.lock().await;
        let label = match keys.users.remove(&certificate.subject) {
            Some(previous) => {
                let label = keys.next_label();
                keys.archives.entry(label.clone()).or_default().users.push(previous);
                Some(label)
            }
            None => None,
        };
        keys.users
            .insert(certificate.subject.clone(), certificate.clone());
        Ok(label)
    }

    async fn get_user_certificate(&self, user_id: &str) -> Result<Option<Certificate>, LedgerError> {
        Ok(self.keys.lock().await.users.get(user_id).cloned())
    }

    async fn list_archives(&self) -> Result<Vec<String>, LedgerError> {
        Ok(self.keys.lock().await.archives.keys().cloned().collect())
    }
}

const SYSTEM_FILE: &str = "system.json";
const USERS_DIR: &str = "users";
const ARCHIVE_DIR: &str = "archive";

/// On-disk form of the system identity. `private_key` is hex of the raw key,
/// or of `nonce || ciphertext` when `encryption` names an algorithm.
#[derive(Serialize, Deserialize)]
struct StoredIdentity {
    algorithm: String,
    public_key: String,
    private_key: String,
    encryption: Option<String>,
    certificate: Certificate,
}

/// Encryption applied to the system private key at rest.
#[derive(Clone)]
pub struct KeyEncryption {
    algorithm: Arc<dyn EncryptionAlgorithm>,
    key: Vec<u8>,
}

impl KeyEncryption {
    pub fn new(algorithm: Arc<dyn EncryptionAlgorithm>, key: Vec<u8>) -> Result<Self, LedgerError> {
        if key.len() != algorithm.key_len() {
            return Err(LedgerError::ConfigError(format!(
                "{} needs a {}-byte key, got {} bytes",
                algorithm.name(),
                algorithm.key_len(),
                key.len()
            )));
        }
        Ok(Self { algorithm, key })
    }
}

/// JSON files under one directory:
///
/// ```text
/// <root>/system.json
/// <root>/users/<user_id>.json
/// <root>/archive/<label>/system.json
/// <root>/archive/<label>/users/<user_id>.json
/// ```
///
/// Every file is written to a temp file in the target directory and renamed
/// into place, so readers never see a partial file.
pub struct FileKeyStore {
    root: PathBuf,
    encryption: Option<KeyEncryption>,
    // Serializes multi-file operations within this process.
    lock: Mutex<()>,
}

impl FileKeyStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let root = root.into();
        fs::create_dir_all(root.join(USERS_DIR))?;
        fs::create_dir_all(root.join(ARCHIVE_DIR))?;
        info!("Opened key store at {}", root.display());
        Ok(Self {
            root,
            encryption: None,
            lock: Mutex::new(()),
        })
    }

    pub fn with_encryption(mut self, encryption: KeyEncryption) -> Self {
        self.encryption = Some(encryption);
        self
    }

    fn user_path(dir: &Path, user_id: &str) -> Result<PathBuf, LedgerError> {
        let valid = !user_id.is_empty()
            && !user_id.starts_with('.')
            && user_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'));
        if !valid {
            return Err(LedgerError::InvalidInput(format!(
                "user id '{}' cannot be used as a key store name",
                user_id
            )));
        }
        Ok(dir.join(USERS_DIR).join(format!("{}.json", user_id)))
    }

    /// Create a fresh archive directory and return its label.
    fn new_archive_dir(&self) -> Result<(String, PathBuf), LedgerError> {
        let base = archive_label(Utc::now());
        let mut label = base.clone();
        let mut suffix = 1;
        loop {
            let dir = self.root.join(ARCHIVE_DIR).join(&label);
            match fs::create_dir(&dir) {
                Ok(()) => {
                    fs::create_dir(dir.join(USERS_DIR))?;
                    return Ok((label, dir));
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    label = format!("{}-{}", base, suffix);
                    suffix += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn encode_identity(&self, identity: &SystemIdentity) -> Result<StoredIdentity, LedgerError> {
        let (private_key, encryption) = match &self.encryption {
            Some(enc) => (
                bytes_to_hex(&enc.algorithm.encrypt(&enc.key, &identity.key_pair.private_key)?),
                Some(enc.algorithm.name().to_string()),
            ),
            None => (bytes_to_hex(&identity.key_pair.private_key), None),
        };
        Ok(StoredIdentity {
            algorithm: identity.key_pair.algorithm.clone(),
            public_key: identity.key_pair.public_key_hex(),
            private_key,
            encryption,
            certificate: identity.certificate.clone(),
        })
    }

    fn decode_identity(&self, stored: StoredIdentity) -> Result<SystemIdentity, LedgerError> {
        let sealed = hex_to_bytes(&stored.private_key)?;
        let private_key = match (&stored.encryption, &self.encryption) {
            (None, _) => sealed,
            (Some(name), Some(enc)) if name.eq_ignore_ascii_case(enc.algorithm.name()) => {
                enc.algorithm.decrypt(&enc.key, &sealed).map_err(|e| {
                    LedgerError::ConfigError(format!(
                        "system key cannot be unsealed with the configured key encryption key: {}",
                        e
                    ))
                })?
            }
            (Some(name), Some(enc)) => {
                return Err(LedgerError::ConfigError(format!(
                    "system key is sealed with {} but the key store is configured for {}",
                    name,
                    enc.algorithm.name()
                )))
            }
            (Some(name), None) => {
                return Err(LedgerError::ConfigError(format!(
                    "system key is sealed with {} but no key encryption key is configured",
                    name
                )))
            }
        };
        Ok(SystemIdentity {
            key_pair: KeyPair {
                algorithm: stored.algorithm,
                public_key: hex_to_bytes(&stored.public_key)?,
                private_key,
            },
            certificate: stored.certificate,
        })
    }
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), LedgerError> {
    let dir = path
        .parent()
        .ok_or_else(|| LedgerError::IoError(format!("{} has no parent directory", path.display())))?;
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(&serde_json::to_vec_pretty(value)?)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| LedgerError::IoError(e.to_string()))?;
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>, LedgerError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl KeyStore for FileKeyStore {
    async fn load_system_identity(&self) -> Result<Option<SystemIdentity>, LedgerError> {
        let _guard = self.lock.lock().await;
        match read_json::<StoredIdentity>(&self.root.join(SYSTEM_FILE))? {
            Some(stored) => Ok(Some(self.decode_identity(stored)?)),
            None => Ok(None),
        }
    }

    async fn rotate_system_identity(
        &self,
        identity: &SystemIdentity,
    ) -> Result<Option<String>, LedgerError> {
        let stored = self.encode_identity(identity)?;
        let _guard = self.lock.lock().await;

        let current = self.root.join(SYSTEM_FILE);
        let label = if current.exists() {
            let (label, dir) = self.new_archive_dir()?;
            fs::rename(&current, dir.join(SYSTEM_FILE))?;
            debug!("Archived system identity under {}", label);
            Some(label)
        } else {
            None
        };

        write_json_atomic(&current, &stored)?;
        Ok(label)
    }

    async fn replace_user_certificate(
        &self,
        certificate: &Certificate,
    ) -> Result<Option<String>, LedgerError> {
        let user_id = certificate.subject.as_str();
        let path = Self::user_path(&self.root, user_id)?;
        let _guard = self.lock.lock().await;

        let label = if path.exists() {
            let (label, dir) = self.new_archive_dir()?;
            fs::rename(&path, Self::user_path(&dir, user_id)?)?;
            debug!("Archived certificate of {} under {}", user_id, label);
            Some(label)
        } else {
            None
        };

        write_json_atomic(&path, certificate)?;
        Ok(label)
    }

    async fn get_user_certificate(&self, user_id: &str) -> Result<Option<Certificate>, LedgerError> {
        let path = Self::user_path(&self.root, user_id)?;
        let _guard = self.lock.lock().await;
        read_json(&path)
    }

    async fn list_archives(&self) -> Result<Vec<String>, LedgerError> {
        let _guard = self.lock.lock().await;
        let mut labels = Vec::new();
        for dir_entry in fs::read_dir(self.root.join(ARCHIVE_DIR))? {
            let dir_entry = dir_entry?;
            if dir_entry.file_type()?.is_dir() {
                labels.push(dir_entry.file_name().to_string_lossy().into_owned());
            }
        }
        labels.sort();
        Ok(labels)
    }
}
