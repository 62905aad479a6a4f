use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::audit::AuditSettings;
use crate::error::LedgerError;
use crate::pki::PkiSettings;

pub const ENV_PREFIX: &str = "SEALED_LEDGER";

/// Defaults for ledgers created without explicit parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerDefaults {
    pub entries_per_page: u64,
    pub hash_algorithm: Option<String>,
    pub signature_algorithm: Option<String>,
}

impl Default for LedgerDefaults {
    fn default() -> Self {
        Self {
            entries_per_page: 100,
            hash_algorithm: None,
            signature_algorithm: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// `sqlite://<path>` for a file database, `sqlite::memory:` for a private
    /// in-process one.
    pub database_url: String,
    pub key_store_path: PathBuf,
    /// Hex key sealing the system private key at rest. Unset stores it in clear.
    pub key_encryption_key: Option<String>,
    pub key_encryption_algorithm: Option<String>,
    pub ledger: LedgerDefaults,
    pub pki: PkiSettings,
    pub audit: AuditSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://sealed-ledger.db".to_string(),
            key_store_path: PathBuf::from("keys"),
            key_encryption_key: None,
            key_encryption_algorithm: None,
            ledger: LedgerDefaults::default(),
            pki: PkiSettings::default(),
            audit: AuditSettings::default(),
        }
    }
}

impl AppConfig {
    /// Built-in defaults, then the optional TOML file, then environment
    /// variables such as `SEALED_LEDGER_DATABASE_URL` or
    /// `SEALED_LEDGER_LEDGER__ENTRIES_PER_PAGE`.
    pub fn load(path: Option<&Path>) -> Result<Self, LedgerError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            if !path.exists() {
                return Err(LedgerError::ConfigError(format!(
                    "Configuration file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(File::from(path));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        info!("Loaded configuration (database {})", config.database_url);
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.database_url.trim().is_empty() {
            return Err(LedgerError::ConfigError("database_url must be set".to_string()));
        }
        if self.ledger.entries_per_page < 1 {
            return Err(LedgerError::ConfigError(
                "ledger.entries_per_page must be at least 1".to_string(),
            ));
        }
        if self.audit.entries_per_page < 1 {
            return Err(LedgerError::ConfigError(
                "audit.entries_per_page must be at least 1".to_string(),
            ));
        }
        if self.pki.certificate_validity_days < 1 {
            return Err(LedgerError::ConfigError(
                "pki.certificate_validity_days must be at least 1".to_string(),
            ));
        }
        if self.pki.system_subject.trim().is_empty() {
            return Err(LedgerError::ConfigError("pki.system_subject must be set".to_string()));
        }
        if self.key_encryption_algorithm.is_some() && self.key_encryption_key.is_none() {
            return Err(LedgerError::ConfigError(
                "key_encryption_algorithm is set but key_encryption_key is not".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_in_memory_database(&self) -> bool {
        self.database_url.contains(":memory:")
    }
}
