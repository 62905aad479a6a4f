//! Ledger Engine
//!
//! Accepts entries into a ledger's holding area and seals the holding area
//! into a page once it reaches `entries_per_page`. Each ledger has its own
//! lock around append + seal; reads go straight to the store.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::entry::{Entry, EntrySignature, NewEntry};
use super::merkle::{merkle_root, MerkleProof, MerkleTree};
use super::page::{Page, PageSummary, GENESIS_HASH};
use super::LedgerConfig;
use crate::crypto::{hex_to_bytes, AlgorithmRegistry, HashAlgorithm, SignatureAlgorithm};
use crate::database::LedgerStore;
use crate::error::LedgerError;

/// Merkle inclusion proof of one sealed entry, with the page it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryProof {
    pub entry_id: String,
    pub ledger_name: String,
    pub page_number: u64,
    pub hash_algorithm: String,
    pub proof: MerkleProof,
}

/// Outcome of walking a ledger's hash chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReport {
    pub ledger_name: String,
    pub pages_checked: u64,
    pub valid: bool,
    pub failure: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStats {
    pub ledger_name: String,
    pub page_count: u64,
    pub sealed_entry_count: u64,
    pub holding_count: u64,
}

struct HeldEntry {
    id: String,
    hash: String,
}

/// Mutable per-ledger state, guarded by the ledger's mutex.
struct LedgerState {
    config: LedgerConfig,
    hash_algorithm: Arc<dyn HashAlgorithm>,
    holding: Vec<HeldEntry>,
    next_page_number: u64,
    head_hash: String,
}

pub struct LedgerEngine {
    store: Arc<dyn LedgerStore>,
    registry: Arc<AlgorithmRegistry>,
    ledgers: RwLock<HashMap<String, Arc<Mutex<LedgerState>>>>,
}

impl LedgerEngine {
    pub fn new(store: Arc<dyn LedgerStore>, registry: Arc<AlgorithmRegistry>) -> Self {
        Self {
            store,
            registry,
            ledgers: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<AlgorithmRegistry> {
        &self.registry
    }

    /// Create a ledger. `None` algorithms resolve to the registry defaults.
    pub async fn create_ledger(
        &self,
        name: &str,
        entries_per_page: u64,
        hash_algorithm: Option<&str>,
        signature_algorithm: Option<&str>,
    ) -> Result<LedgerConfig, LedgerError> {
        if name.trim().is_empty() {
            return Err(LedgerError::InvalidInput("Ledger name must not be empty".to_string()));
        }
        if entries_per_page < 1 {
            return Err(LedgerError::InvalidInput(format!(
                "entries_per_page must be at least 1, got {}",
                entries_per_page
            )));
        }

        let hash = self.registry.resolve_hash(hash_algorithm)?;
        let signature = self.registry.resolve_signature(signature_algorithm)?;

        if self.ledgers.read().await.contains_key(name) {
            return Err(LedgerError::DuplicateLedger(name.to_string()));
        }

        let config = LedgerConfig {
            name: name.to_string(),
            entries_per_page,
            hash_algorithm: hash.name().to_string(),
            signature_algorithm: signature.name().to_string(),
            created_at: Utc::now(),
        };
        // The store rejects a second config under the same name.
        self.store.save_ledger_config(&config).await?;

        // A concurrent first use may already have loaded the new ledger.
        self.ledgers
            .write()
            .await
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(LedgerState {
                    config: config.clone(),
                    hash_algorithm: hash,
                    holding: Vec::new(),
                    next_page_number: 0,
                    head_hash: GENESIS_HASH.to_string(),
                }))
            });

        info!(
            "Created ledger '{}' ({} entries/page, {}, {})",
            config.name, config.entries_per_page, config.hash_algorithm, config.signature_algorithm
        );
        Ok(config)
    }

    /// Append an entry to the holding area and return its id. Seals a page
    /// in the same call when the holding area becomes full.
    pub async fn create_entry(
        &self,
        ledger_name: &str,
        fields: NewEntry,
    ) -> Result<String, LedgerError> {
        let state = self.ledger_state(ledger_name).await?;
        let mut state = state.lock().await;

        let entry = Entry::create(
            Uuid::new_v4().to_string(),
            ledger_name,
            fields,
            Utc::now(),
            state.hash_algorithm.as_ref(),
        )?;

        if state.holding.len() as u64 + 1 >= state.config.entries_per_page {
            let id = entry.id.clone();
            self.seal(&mut state, entry).await?;
            return Ok(id);
        }

        self.store.save_entry(&entry).await?;
        debug!("Holding entry {} in ledger '{}'", entry.id, ledger_name);
        state.holding.push(HeldEntry {
            id: entry.id.clone(),
            hash: entry.hash.clone(),
        });
        Ok(entry.id)
    }

    /// Seal the holding area plus `closing` into the next page. State is only
    /// advanced after the store has committed the page.
    async fn seal(&self, state: &mut LedgerState, mut closing: Entry) -> Result<(), LedgerError> {
        let number = state.next_page_number;
        let mut leaves: Vec<String> = state.holding.iter().map(|h| h.hash.clone()).collect();
        leaves.push(closing.hash.clone());

        let page = Page::seal(
            &state.config.name,
            number,
            &state.head_hash,
            &leaves,
            state.hash_algorithm.as_ref(),
        )?;
        closing.page_number = Some(number);
        let held_ids: Vec<String> = state.holding.iter().map(|h| h.id.clone()).collect();

        self.store.commit_seal(&page, &closing, &held_ids).await?;

        state.holding.clear();
        state.next_page_number = number + 1;
        state.head_hash = page.hash.clone();

        info!(
            "Sealed page {} of ledger '{}': {} entries, root {}",
            page.number, page.ledger_name, page.entry_count, page.merkle_root
        );
        Ok(())
    }

    /// Attach a signature over the entry's hash. The signature must verify
    /// under `public_key` with the ledger's signature algorithm.
    pub async fn sign_entry(
        &self,
        entry_id: &str,
        signer_id: &str,
        signature: &str,
        public_key: &str,
    ) -> Result<EntrySignature, LedgerError> {
        let entry = self.get_entry(entry_id).await?;
        let config = self.get_ledger_config(&entry.ledger_name).await?;
        let algorithm = self.signature_algorithm(&config)?;

        let signature_bytes = hex_to_bytes(signature)?;
        let public_key_bytes = hex_to_bytes(public_key)?;
        if !algorithm.verify(&public_key_bytes, &entry.signing_payload()?, &signature_bytes) {
            warn!("Rejected signature from {} on entry {}", signer_id, entry_id);
            return Err(LedgerError::InvalidSignature(format!(
                "signature by '{}' does not verify for entry '{}'",
                signer_id, entry_id
            )));
        }

        let record = EntrySignature {
            signer_id: signer_id.to_string(),
            public_key: public_key.to_lowercase(),
            signature: signature.to_lowercase(),
            algorithm: algorithm.name().to_string(),
            signed_at: Utc::now(),
        };
        let appended = record.clone();
        self.update_entry(entry_id, move |entry| entry.signatures.push(appended))
            .await?;

        info!("Entry {} signed by {}", entry_id, signer_id);
        Ok(record)
    }

    pub async fn add_keywords(
        &self,
        entry_id: &str,
        keywords: &[String],
    ) -> Result<Entry, LedgerError> {
        self.update_entry(entry_id, |entry| {
            for keyword in keywords {
                if !entry.keywords.contains(keyword) {
                    entry.keywords.push(keyword.clone());
                }
            }
        })
        .await
    }

    pub async fn remove_keyword(&self, entry_id: &str, keyword: &str) -> Result<Entry, LedgerError> {
        self.update_entry(entry_id, |entry| entry.keywords.retain(|k| k != keyword))
            .await
    }

    pub async fn add_related_entries(
        &self,
        entry_id: &str,
        related_entry_ids: &[String],
    ) -> Result<Entry, LedgerError> {
        self.update_entry(entry_id, |entry| {
            for related in related_entry_ids {
                if related != &entry.id && !entry.related_entry_ids.contains(related) {
                    entry.related_entry_ids.push(related.clone());
                }
            }
        })
        .await
    }

    pub async fn remove_related_entry(
        &self,
        entry_id: &str,
        related_entry_id: &str,
    ) -> Result<Entry, LedgerError> {
        self.update_entry(entry_id, |entry| {
            entry.related_entry_ids.retain(|r| r != related_entry_id)
        })
        .await
    }

    /// Read-modify-write of an entry's metadata under the ledger lock, so it
    /// cannot interleave with a seal rewriting the same entry.
    async fn update_entry<F>(&self, entry_id: &str, mutate: F) -> Result<Entry, LedgerError>
    where
        F: FnOnce(&mut Entry) + Send,
    {
        let ledger_name = self.get_entry(entry_id).await?.ledger_name;
        let state = self.ledger_state(&ledger_name).await?;
        let _guard = state.lock().await;

        let mut entry = self.get_entry(entry_id).await?;
        mutate(&mut entry);
        self.store.save_entry(&entry).await?;
        Ok(entry)
    }

    /// Record an event on behalf of another subsystem.
    pub async fn log_system_event(
        &self,
        ledger_name: &str,
        declaring_system: &str,
        user_id: Option<&str>,
        details: &str,
    ) -> Result<String, LedgerError> {
        let content = format!(
            "[{}] user={} :: {}",
            declaring_system,
            user_id.unwrap_or("-"),
            details
        );
        let mut fields = NewEntry::new(content).sender(declaring_system);
        if let Some(user_id) = user_id {
            fields = fields.recipient(user_id);
        }
        self.create_entry(ledger_name, fields).await
    }

    pub async fn get_entry(&self, entry_id: &str) -> Result<Entry, LedgerError> {
        self.store
            .get_entry(entry_id)
            .await?
            .ok_or_else(|| LedgerError::entry_not_found(entry_id))
    }

    pub async fn get_ledger_config(&self, ledger_name: &str) -> Result<LedgerConfig, LedgerError> {
        self.store
            .get_ledger_config(ledger_name)
            .await?
            .ok_or_else(|| LedgerError::ledger_not_found(ledger_name))
    }

    pub async fn list_ledgers(&self) -> Result<Vec<LedgerConfig>, LedgerError> {
        self.store.list_ledger_configs().await
    }

    /// Entries `user_id` takes part in but has not signed yet.
    pub async fn get_entries_needing_signature(
        &self,
        ledger_name: &str,
        user_id: &str,
    ) -> Result<Vec<Entry>, LedgerError> {
        self.filter_entries(ledger_name, |e| e.involves(user_id) && !e.is_signed_by(user_id))
            .await
    }

    pub async fn get_entries_by_sender(
        &self,
        ledger_name: &str,
        user_id: &str,
    ) -> Result<Vec<Entry>, LedgerError> {
        self.filter_entries(ledger_name, |e| e.senders.iter().any(|s| s == user_id))
            .await
    }

    pub async fn get_entries_by_recipient(
        &self,
        ledger_name: &str,
        user_id: &str,
    ) -> Result<Vec<Entry>, LedgerError> {
        self.filter_entries(ledger_name, |e| e.recipients.iter().any(|r| r == user_id))
            .await
    }

    pub async fn get_entries_by_keyword(
        &self,
        ledger_name: &str,
        keyword: &str,
    ) -> Result<Vec<Entry>, LedgerError> {
        self.filter_entries(ledger_name, |e| e.keywords.iter().any(|k| k == keyword))
            .await
    }

    /// Entries linked from `entry_id`. Links to unknown ids are skipped.
    pub async fn get_related_entries(&self, entry_id: &str) -> Result<Vec<Entry>, LedgerError> {
        let entry = self.get_entry(entry_id).await?;
        let mut related = Vec::with_capacity(entry.related_entry_ids.len());
        for id in &entry.related_entry_ids {
            if let Some(found) = self.store.get_entry(id).await? {
                related.push(found);
            }
        }
        Ok(related)
    }

    async fn filter_entries<P>(&self, ledger_name: &str, predicate: P) -> Result<Vec<Entry>, LedgerError>
    where
        P: Fn(&Entry) -> bool,
    {
        self.get_ledger_config(ledger_name).await?;
        Ok(self
            .store
            .list_entries(ledger_name)
            .await?
            .into_iter()
            .filter(|e| predicate(e))
            .collect())
    }

    pub async fn get_holding_entries(&self, ledger_name: &str) -> Result<Vec<Entry>, LedgerError> {
        self.get_ledger_config(ledger_name).await?;
        self.store.list_holding_entries(ledger_name).await
    }

    pub async fn get_page(&self, ledger_name: &str, number: u64) -> Result<Page, LedgerError> {
        self.store
            .get_page(ledger_name, number)
            .await?
            .ok_or_else(|| LedgerError::page_not_found(ledger_name, number))
    }

    pub async fn get_page_summary(
        &self,
        ledger_name: &str,
        number: u64,
    ) -> Result<PageSummary, LedgerError> {
        Ok(self.get_page(ledger_name, number).await?.summary())
    }

    pub async fn list_pages(&self, ledger_name: &str) -> Result<Vec<Page>, LedgerError> {
        self.get_ledger_config(ledger_name).await?;
        self.store.list_pages(ledger_name).await
    }

    pub async fn ledger_stats(&self, ledger_name: &str) -> Result<LedgerStats, LedgerError> {
        self.get_ledger_config(ledger_name).await?;
        let page_count = self.store.list_pages(ledger_name).await?.len() as u64;
        let entries = self.store.list_entries(ledger_name).await?;
        let holding_count = entries.iter().filter(|e| !e.is_sealed()).count() as u64;

        Ok(LedgerStats {
            ledger_name: ledger_name.to_string(),
            page_count,
            sealed_entry_count: entries.len() as u64 - holding_count,
            holding_count,
        })
    }

    /// Inclusion proof for a sealed entry. Holding entries have no tree yet.
    pub async fn get_merkle_proof(&self, entry_id: &str) -> Result<EntryProof, LedgerError> {
        let entry = self.get_entry(entry_id).await?;
        let page_number = entry.page_number.ok_or_else(|| {
            LedgerError::NotFound(format!("entry '{}' is not sealed into a page yet", entry_id))
        })?;
        let config = self.get_ledger_config(&entry.ledger_name).await?;
        let hash_algorithm = self.hash_algorithm(&config)?;

        let page_entries = self
            .store
            .list_page_entries(&entry.ledger_name, page_number)
            .await?;
        let leaf_index = page_entries
            .iter()
            .position(|e| e.id == entry.id)
            .ok_or_else(|| {
                LedgerError::IoError(format!(
                    "entry '{}' missing from page {} of ledger '{}'",
                    entry_id, page_number, entry.ledger_name
                ))
            })?;
        let leaves: Vec<String> = page_entries.into_iter().map(|e| e.hash).collect();
        let proof = MerkleTree::build(&leaves, hash_algorithm.as_ref())?.proof(leaf_index)?;

        Ok(EntryProof {
            entry_id: entry.id,
            ledger_name: entry.ledger_name,
            page_number,
            hash_algorithm: config.hash_algorithm,
            proof,
        })
    }

    /// Recompute a page's Merkle root and hash from stored data.
    pub async fn validate_page(&self, ledger_name: &str, number: u64) -> Result<bool, LedgerError> {
        let config = self.get_ledger_config(ledger_name).await?;
        let hash_algorithm = self.hash_algorithm(&config)?;
        let page = self.get_page(ledger_name, number).await?;

        match self.check_page(&page, hash_algorithm.as_ref()).await? {
            None => Ok(true),
            Some(reason) => {
                warn!("Page {} of ledger '{}' failed validation: {}", number, ledger_name, reason);
                Ok(false)
            }
        }
    }

    /// `None` when the page is consistent, otherwise the first discrepancy.
    async fn check_page(
        &self,
        page: &Page,
        hash_algorithm: &dyn HashAlgorithm,
    ) -> Result<Option<String>, LedgerError> {
        let entries = self
            .store
            .list_page_entries(&page.ledger_name, page.number)
            .await?;
        if entries.is_empty() || entries.len() as u64 != page.entry_count {
            return Ok(Some(format!(
                "page {} records {} entries but {} are assigned to it",
                page.number,
                page.entry_count,
                entries.len()
            )));
        }

        let leaves: Vec<String> = entries.into_iter().map(|e| e.hash).collect();
        let root = merkle_root(&leaves, hash_algorithm)?;
        if root != page.merkle_root {
            return Ok(Some(format!(
                "page {} merkle root mismatch: stored {}, computed {}",
                page.number, page.merkle_root, root
            )));
        }

        let hash = page.recompute_hash(hash_algorithm);
        if hash != page.hash {
            return Ok(Some(format!(
                "page {} hash mismatch: stored {}, computed {}",
                page.number, page.hash, hash
            )));
        }
        Ok(None)
    }

    pub async fn validate_chain(&self, ledger_name: &str) -> Result<bool, LedgerError> {
        Ok(self.verify_chain_detailed(ledger_name).await?.valid)
    }

    /// Walk every page in order, stopping at the first broken link or page.
    pub async fn verify_chain_detailed(&self, ledger_name: &str) -> Result<ChainReport, LedgerError> {
        let config = self.get_ledger_config(ledger_name).await?;
        let hash_algorithm = self.hash_algorithm(&config)?;
        let pages = self.store.list_pages(ledger_name).await?;

        let mut expected_previous = GENESIS_HASH.to_string();
        let mut failure = None;
        let mut pages_checked = 0;

        for (position, page) in pages.iter().enumerate() {
            pages_checked += 1;
            if page.number != position as u64 {
                failure = Some(format!("expected page {}, found page {}", position, page.number));
                break;
            }
            if page.previous_hash != expected_previous {
                failure = Some(format!(
                    "hash chain broken at page {}: expected previous {}, got {}",
                    page.number, expected_previous, page.previous_hash
                ));
                break;
            }
            if let Some(reason) = self.check_page(page, hash_algorithm.as_ref()).await? {
                failure = Some(reason);
                break;
            }
            expected_previous = page.hash.clone();
        }

        match &failure {
            None => info!("Ledger '{}' chain verified: {} pages", ledger_name, pages_checked),
            Some(reason) => warn!("Ledger '{}' chain verification failed: {}", ledger_name, reason),
        }

        Ok(ChainReport {
            ledger_name: ledger_name.to_string(),
            pages_checked,
            valid: failure.is_none(),
            failure,
        })
    }

    fn hash_algorithm(&self, config: &LedgerConfig) -> Result<Arc<dyn HashAlgorithm>, LedgerError> {
        self.registry.resolve_hash(Some(&config.hash_algorithm))
    }

    fn signature_algorithm(
        &self,
        config: &LedgerConfig,
    ) -> Result<Arc<dyn SignatureAlgorithm>, LedgerError> {
        self.registry.resolve_signature(Some(&config.signature_algorithm))
    }

    /// Cached state for `name`, loaded from the store on first use.
    async fn ledger_state(&self, name: &str) -> Result<Arc<Mutex<LedgerState>>, LedgerError> {
        if let Some(state) = self.ledgers.read().await.get(name) {
            return Ok(state.clone());
        }

        // Load outside the map lock so other ledgers are not stalled. When two
        // callers race, the first insert wins and the other load is dropped.
        let loaded = self.load_state(name).await?;
        let state = self
            .ledgers
            .write()
            .await
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(loaded)))
            .clone();
        Ok(state)
    }

    async fn load_state(&self, name: &str) -> Result<LedgerState, LedgerError> {
        let config = self.get_ledger_config(name).await?;
        let hash_algorithm = self.hash_algorithm(&config)?;
        let holding: Vec<HeldEntry> = self
            .store
            .list_holding_entries(name)
            .await?
            .into_iter()
            .map(|e| HeldEntry { id: e.id, hash: e.hash })
            .collect();
        let last_page = self.store.list_pages(name).await?.pop();

        let (next_page_number, head_hash) = match last_page {
            Some(page) => (page.number + 1, page.hash),
            None => (0, GENESIS_HASH.to_string()),
        };

        debug!(
            "Loaded ledger '{}': {} holding, next page {}",
            name,
            holding.len(),
            next_page_number
        );
        Ok(LedgerState {
            config,
            hash_algorithm,
            holding,
            next_page_number,
            head_hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::bytes_to_hex;
    use crate::database::InMemoryLedgerStore;
    use crate::ledger::verify_merkle_proof;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn engine() -> LedgerEngine {
        LedgerEngine::new(
            Arc::new(InMemoryLedgerStore::new()),
            Arc::new(AlgorithmRegistry::with_defaults().unwrap()),
        )
    }

    /// In-memory store whose next `commit_seal` fails once armed.
    #[derive(Default)]
    struct FailingSealStore {
        inner: InMemoryLedgerStore,
        fail_next_seal: AtomicBool,
    }

    #[async_trait]
    impl LedgerStore for FailingSealStore {
        async fn save_ledger_config(&self, config: &LedgerConfig) -> Result<(), LedgerError> {
            self.inner.save_ledger_config(config).await
        }

        async fn get_ledger_config(&self, name: &str) -> Result<Option<LedgerConfig>, LedgerError> {
            self.inner.get_ledger_config(name).await
        }

        async fn list_ledger_configs(&self) -> Result<Vec<LedgerConfig>, LedgerError> {
            self.inner.list_ledger_configs().await
        }

        async fn save_page(&self, page: &Page) -> Result<(), LedgerError> {
            self.inner.save_page(page).await
        }

        async fn get_page(&self, ledger_name: &str, number: u64) -> Result<Option<Page>, LedgerError> {
            self.inner.get_page(ledger_name, number).await
        }

        async fn list_pages(&self, ledger_name: &str) -> Result<Vec<Page>, LedgerError> {
            self.inner.list_pages(ledger_name).await
        }

        async fn save_entry(&self, entry: &Entry) -> Result<(), LedgerError> {
            self.inner.save_entry(entry).await
        }

        async fn get_entry(&self, id: &str) -> Result<Option<Entry>, LedgerError> {
            self.inner.get_entry(id).await
        }

        async fn list_entries(&self, ledger_name: &str) -> Result<Vec<Entry>, LedgerError> {
            self.inner.list_entries(ledger_name).await
        }

        async fn commit_seal(
            &self,
            page: &Page,
            new_entry: &Entry,
            held_entry_ids: &[String],
        ) -> Result<(), LedgerError> {
            if self.fail_next_seal.swap(false, Ordering::SeqCst) {
                return Err(LedgerError::IoError("disk full".to_string()));
            }
            self.inner.commit_seal(page, new_entry, held_entry_ids).await
        }
    }

    #[tokio::test]
    async fn test_create_ledger_and_duplicate() {
        let engine = engine();
        let config = engine.create_ledger("L", 2, None, None).await.unwrap();
        assert_eq!(config.hash_algorithm, "SHA-256");
        assert_eq!(config.signature_algorithm, "SECP256K1");

        assert!(matches!(
            engine.create_ledger("L", 3, None, None).await,
            Err(LedgerError::DuplicateLedger(_))
        ));
    }

    #[tokio::test]
    async fn test_create_ledger_rejects_bad_input() {
        let engine = engine();
        assert!(matches!(
            engine.create_ledger("L", 0, None, None).await,
            Err(LedgerError::InvalidInput(_))
        ));
        assert!(matches!(
            engine.create_ledger("L", 1, Some("MD5"), None).await,
            Err(LedgerError::UnsupportedAlgorithm(_))
        ));
        assert!(engine.list_ledgers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_entry_missing_ledger() {
        let engine = engine();
        assert!(matches!(
            engine.create_entry("nope", NewEntry::new("x")).await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_seal_threshold() {
        let engine = engine();
        engine.create_ledger("L", 3, None, None).await.unwrap();

        for i in 0..3 {
            engine.create_entry("L", NewEntry::new(format!("e{}", i))).await.unwrap();
        }
        let page = engine.get_page("L", 0).await.unwrap();
        assert_eq!(page.entry_count, 3);
        assert_eq!(page.previous_hash, GENESIS_HASH);
        assert!(engine.get_holding_entries("L").await.unwrap().is_empty());

        engine.create_entry("L", NewEntry::new("e3")).await.unwrap();
        assert_eq!(engine.get_holding_entries("L").await.unwrap().len(), 1);
        assert!(matches!(engine.get_page("L", 1).await, Err(LedgerError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_failed_seal_leaves_holding_area_intact() {
        let store = Arc::new(FailingSealStore::default());
        let engine = LedgerEngine::new(
            store.clone(),
            Arc::new(AlgorithmRegistry::with_defaults().unwrap()),
        );
        engine.create_ledger("L", 3, None, None).await.unwrap();

        let first = engine.create_entry("L", NewEntry::new("a")).await.unwrap();
        let second = engine.create_entry("L", NewEntry::new("b")).await.unwrap();

        store.fail_next_seal.store(true, Ordering::SeqCst);
        assert!(matches!(
            engine.create_entry("L", NewEntry::new("c")).await,
            Err(LedgerError::IoError(_))
        ));

        let holding: Vec<String> = engine
            .get_holding_entries("L")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(holding, vec![first.clone(), second.clone()]);
        assert!(engine.list_pages("L").await.unwrap().is_empty());
        {
            let state = engine.ledger_state("L").await.unwrap();
            let state = state.lock().await;
            assert_eq!(state.next_page_number, 0);
            assert_eq!(state.holding.len(), 2);
            assert_eq!(state.head_hash, GENESIS_HASH);
        }

        let third = engine.create_entry("L", NewEntry::new("d")).await.unwrap();
        let page = engine.get_page("L", 0).await.unwrap();
        assert_eq!(page.entry_count, 3);
        for id in [&first, &second, &third] {
            assert_eq!(engine.get_entry(id).await.unwrap().page_number, Some(0));
        }
        assert!(engine.get_holding_entries("L").await.unwrap().is_empty());
        assert_eq!(engine.list_ledgers().await.unwrap().len(), 1);
        assert!(engine.validate_chain("L").await.unwrap());
    }

    #[tokio::test]
    async fn test_single_entry_pages_chain() {
        let engine = engine();
        engine.create_ledger("L", 1, Some("BLAKE3"), None).await.unwrap();

        let first = engine.create_entry("L", NewEntry::new("a")).await.unwrap();
        engine.create_entry("L", NewEntry::new("b")).await.unwrap();

        let page0 = engine.get_page("L", 0).await.unwrap();
        let page1 = engine.get_page("L", 1).await.unwrap();
        assert_eq!(page1.previous_hash, page0.hash);

        let entry = engine.get_entry(&first).await.unwrap();
        assert_eq!(page0.merkle_root, entry.hash);

        let proof = engine.get_merkle_proof(&first).await.unwrap();
        assert!(proof.proof.siblings.is_empty());
        assert!(engine.validate_chain("L").await.unwrap());
    }

    #[tokio::test]
    async fn test_merkle_proof_requires_sealed_entry() {
        let engine = engine();
        engine.create_ledger("L", 5, None, None).await.unwrap();
        let id = engine.create_entry("L", NewEntry::new("pending")).await.unwrap();
        assert!(matches!(
            engine.get_merkle_proof(&id).await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_proofs_fold_to_page_root() {
        let engine = engine();
        engine.create_ledger("L", 5, None, None).await.unwrap();
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(engine.create_entry("L", NewEntry::new(format!("e{}", i))).await.unwrap());
        }
        let page = engine.get_page("L", 0).await.unwrap();
        let hash = engine.registry().resolve_hash(Some("SHA-256")).unwrap();

        for id in &ids {
            let entry = engine.get_entry(id).await.unwrap();
            let proof = engine.get_merkle_proof(id).await.unwrap();
            assert_eq!(proof.proof.leaf_hash, entry.hash);
            assert_eq!(proof.proof.compute_root(hash.as_ref()), page.merkle_root);
            assert!(verify_merkle_proof(hash.as_ref(), &proof.proof));
        }
    }

    #[tokio::test]
    async fn test_sign_entry_before_and_after_seal() {
        let engine = engine();
        engine.create_ledger("L", 2, None, None).await.unwrap();
        let scheme = engine.registry().resolve_signature(None).unwrap();
        let keys = scheme.generate_keypair().unwrap();

        let id = engine
            .create_entry("L", NewEntry::new("contract").sender("alice").recipient("bob"))
            .await
            .unwrap();
        let entry = engine.get_entry(&id).await.unwrap();
        let sig = scheme.sign(&keys.private_key, &entry.signing_payload().unwrap()).unwrap();

        engine
            .sign_entry(&id, "alice", &bytes_to_hex(&sig), &keys.public_key_hex())
            .await
            .unwrap();

        let pending = engine.get_entries_needing_signature("L", "bob").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert!(engine.get_entries_needing_signature("L", "alice").await.unwrap().is_empty());

        // Seal, then sign as bob.
        engine.create_entry("L", NewEntry::new("filler")).await.unwrap();
        let bob = scheme.generate_keypair().unwrap();
        let bob_sig = scheme.sign(&bob.private_key, &entry.signing_payload().unwrap()).unwrap();
        engine
            .sign_entry(&id, "bob", &bytes_to_hex(&bob_sig), &bob.public_key_hex())
            .await
            .unwrap();

        let signed = engine.get_entry(&id).await.unwrap();
        assert_eq!(signed.signatures.len(), 2);
        assert_eq!(signed.hash, entry.hash);
        assert_eq!(signed.page_number, Some(0));
        assert!(engine.validate_chain("L").await.unwrap());
    }

    #[tokio::test]
    async fn test_sign_entry_rejects_wrong_key() {
        let engine = engine();
        engine.create_ledger("L", 10, None, None).await.unwrap();
        let scheme = engine.registry().resolve_signature(None).unwrap();
        let signer = scheme.generate_keypair().unwrap();
        let other = scheme.generate_keypair().unwrap();

        let id = engine.create_entry("L", NewEntry::new("x")).await.unwrap();
        let entry = engine.get_entry(&id).await.unwrap();
        let sig = scheme.sign(&signer.private_key, &entry.signing_payload().unwrap()).unwrap();

        assert!(matches!(
            engine
                .sign_entry(&id, "alice", &bytes_to_hex(&sig), &other.public_key_hex())
                .await,
            Err(LedgerError::InvalidSignature(_))
        ));
        assert!(matches!(
            engine.sign_entry(&id, "alice", "zz", &other.public_key_hex()).await,
            Err(LedgerError::InvalidInput(_))
        ));
        assert!(engine.get_entry(&id).await.unwrap().signatures.is_empty());
    }

    #[tokio::test]
    async fn test_metadata_edits_keep_hash_and_chain() {
        let engine = engine();
        engine.create_ledger("L", 1, None, None).await.unwrap();
        let a = engine.create_entry("L", NewEntry::new("a").keyword("k1")).await.unwrap();
        let b = engine.create_entry("L", NewEntry::new("b")).await.unwrap();
        let original = engine.get_entry(&a).await.unwrap();

        engine
            .add_keywords(&a, &["k2".to_string(), "k1".to_string()])
            .await
            .unwrap();
        engine.add_related_entries(&a, &[b.clone()]).await.unwrap();
        let edited = engine.remove_keyword(&a, "k1").await.unwrap();

        assert_eq!(edited.keywords, vec!["k2".to_string()]);
        assert_eq!(edited.hash, original.hash);
        assert_eq!(engine.get_entries_by_keyword("L", "k2").await.unwrap().len(), 1);
        assert_eq!(engine.get_related_entries(&a).await.unwrap()[0].id, b);

        let unlinked = engine.remove_related_entry(&a, &b).await.unwrap();
        assert!(unlinked.related_entry_ids.is_empty());
        assert!(engine.validate_chain("L").await.unwrap());
    }

    #[tokio::test]
    async fn test_log_system_event() {
        let engine = engine();
        engine.create_ledger("audit", 10, None, None).await.unwrap();

        let with_user = engine
            .log_system_event("audit", "files", Some("alice"), "uploaded report.pdf")
            .await
            .unwrap();
        let without_user = engine
            .log_system_event("audit", "scheduler", None, "nightly run")
            .await
            .unwrap();

        let entry = engine.get_entry(&with_user).await.unwrap();
        assert_eq!(entry.senders, vec!["files".to_string()]);
        assert_eq!(entry.recipients, vec!["alice".to_string()]);
        assert!(entry.content.contains("uploaded report.pdf"));

        let entry = engine.get_entry(&without_user).await.unwrap();
        assert!(entry.recipients.is_empty());
        assert_eq!(engine.get_entries_by_sender("audit", "files").await.unwrap().len(), 1);
        assert_eq!(engine.get_entries_by_recipient("audit", "alice").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_state_reloads_from_store() {
        let store: Arc<dyn LedgerStore> = Arc::new(InMemoryLedgerStore::new());
        let registry = Arc::new(AlgorithmRegistry::with_defaults().unwrap());

        let first = LedgerEngine::new(store.clone(), registry.clone());
        first.create_ledger("L", 2, None, None).await.unwrap();
        for i in 0..3 {
            first.create_entry("L", NewEntry::new(format!("e{}", i))).await.unwrap();
        }

        let second = LedgerEngine::new(store, registry);
        second.create_entry("L", NewEntry::new("e3")).await.unwrap();

        let page1 = second.get_page("L", 1).await.unwrap();
        assert_eq!(page1.entry_count, 2);
        assert_eq!(page1.previous_hash, second.get_page("L", 0).await.unwrap().hash);
        assert!(second.validate_chain("L").await.unwrap());

        let stats = second.ledger_stats("L").await.unwrap();
        assert_eq!(stats.page_count, 2);
        assert_eq!(stats.sealed_entry_count, 4);
        assert_eq!(stats.holding_count, 0);
    }
}
