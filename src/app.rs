//! Wiring of the ledger components from an [`AppConfig`].

use std::sync::Arc;
use tracing::info;

use crate::audit::AuditBridge;
use crate::config::AppConfig;
use crate::crypto::{hex_to_bytes, AlgorithmRegistry};
use crate::database::{LedgerStore, SqliteLedgerStore};
use crate::error::LedgerError;
use crate::ledger::LedgerEngine;
use crate::pki::{FileKeyStore, KeyEncryption, KeyStore, PkiAuthority};

/// Every long-lived component, built once and shared by `Arc`.
pub struct LedgerApp {
    pub config: AppConfig,
    pub registry: Arc<AlgorithmRegistry>,
    pub store: Arc<dyn LedgerStore>,
    pub engine: Arc<LedgerEngine>,
    pub pki: Arc<PkiAuthority>,
    pub audit: Arc<AuditBridge>,
}

impl LedgerApp {
    pub async fn bootstrap(config: AppConfig) -> Result<Self, LedgerError> {
        config.validate()?;
        let registry = Arc::new(AlgorithmRegistry::with_defaults()?);

        let store: Arc<dyn LedgerStore> = if config.is_in_memory_database() {
            Arc::new(SqliteLedgerStore::in_memory().await?)
        } else {
            Arc::new(SqliteLedgerStore::connect(&config.database_url).await?)
        };
        let key_store = open_key_store(&config, &registry)?;

        Self::assemble(config, registry, store, key_store).await
    }

    /// Build from already constructed stores.
    pub async fn assemble(
        config: AppConfig,
        registry: Arc<AlgorithmRegistry>,
        store: Arc<dyn LedgerStore>,
        key_store: Arc<dyn KeyStore>,
    ) -> Result<Self, LedgerError> {
        let engine = Arc::new(LedgerEngine::new(store.clone(), registry.clone()));
        let pki = Arc::new(
            PkiAuthority::initialize(registry.clone(), key_store, config.pki.clone()).await?,
        );
        let audit = Arc::new(AuditBridge::new(engine.clone(), config.audit.clone()).await?);

        info!(
            "Ledger services ready: hashes {:?}, signatures {:?}",
            registry.hash_names(),
            registry.signature_names()
        );
        Ok(Self {
            config,
            registry,
            store,
            engine,
            pki,
            audit,
        })
    }

    /// Create a ledger with the configured defaults filling in what is not given.
    pub async fn create_ledger(
        &self,
        name: &str,
        entries_per_page: Option<u64>,
        hash_algorithm: Option<&str>,
        signature_algorithm: Option<&str>,
    ) -> Result<crate::ledger::LedgerConfig, LedgerError> {
        let defaults = &self.config.ledger;
        self.engine
            .create_ledger(
                name,
                entries_per_page.unwrap_or(defaults.entries_per_page),
                hash_algorithm.or(defaults.hash_algorithm.as_deref()),
                signature_algorithm.or(defaults.signature_algorithm.as_deref()),
            )
            .await
    }
}

fn open_key_store(
    config: &AppConfig,
    registry: &AlgorithmRegistry,
) -> Result<Arc<dyn KeyStore>, LedgerError> {
    let mut key_store = FileKeyStore::open(&config.key_store_path)?;
    if let Some(key_hex) = &config.key_encryption_key {
        let algorithm = registry.resolve_encryption(config.key_encryption_algorithm.as_deref())?;
        let key = hex_to_bytes(key_hex)
            .map_err(|e| LedgerError::ConfigError(format!("key_encryption_key: {}", e)))?;
        key_store = key_store.with_encryption(KeyEncryption::new(algorithm, key)?);
    }
    Ok(Arc::new(key_store))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> AppConfig {
        AppConfig {
            database_url: "sqlite::memory:".to_string(),
            key_store_path: dir.path().join("keys"),
            ..AppConfig::default()
        }
    }

    #[tokio::test]
    async fn test_bootstrap_creates_audit_ledgers() {
        let dir = TempDir::new().unwrap();
        let app = LedgerApp::bootstrap(config(&dir)).await.unwrap();

        let names: Vec<String> = app
            .engine
            .list_ledgers()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["audit-auth", "audit-files", "audit-rbac"]);
        assert!(dir.path().join("keys").join("system.json").exists());
    }

    #[tokio::test]
    async fn test_create_ledger_uses_configured_defaults() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.ledger.entries_per_page = 3;
        config.ledger.hash_algorithm = Some("sha-512".to_string());
        let app = LedgerApp::bootstrap(config).await.unwrap();

        let ledger = app.create_ledger("L", None, None, Some("ED25519")).await.unwrap();
        assert_eq!(ledger.entries_per_page, 3);
        assert_eq!(ledger.hash_algorithm, "SHA-512");
        assert_eq!(ledger.signature_algorithm, "ED25519");
    }

    #[tokio::test]
    async fn test_bootstrap_rejects_malformed_encryption_key() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.key_encryption_key = Some("xyz".to_string());
        assert!(matches!(
            LedgerApp::bootstrap(config).await,
            Err(LedgerError::ConfigError(_))
        ));
    }
}
