use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::LedgerStore;
use crate::error::LedgerError;
use crate::ledger::{Entry, LedgerConfig, Page};

#[derive(Default)]
struct MemoryState {
    configs: BTreeMap<String, LedgerConfig>,
    pages: HashMap<String, BTreeMap<u64, Page>>,
    entries: HashMap<String, Entry>,
    /// Entry ids per ledger in insertion order.
    entry_order: HashMap<String, Vec<String>>,
}

impl MemoryState {
    fn upsert_entry(&mut self, entry: &Entry) {
        if !self.entries.contains_key(&entry.id) {
            self.entry_order
                .entry(entry.ledger_name.clone())
                .or_default()
                .push(entry.id.clone());
        }
        self.entries.insert(entry.id.clone(), entry.clone());
    }

    fn ordered_entries(&self, ledger_name: &str) -> Vec<Entry> {
        self.entry_order
            .get(ledger_name)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.entries.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Process-local store; one lock over everything makes every call atomic.
#[derive(Default)]
pub struct InMemoryLedgerStore {
    state: RwLock<MemoryState>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn save_ledger_config(&self, config: &LedgerConfig) -> Result<(), LedgerError> {
        let mut state = self.state.write().await;
        if state.configs.contains_key(&config.name) {
            return Err(LedgerError::DuplicateLedger(config.name.clone()));
        }
        state.configs.insert(config.name.clone(), config.clone());
        Ok(())
    }

    async fn get_ledger_config(&self, name: &str) -> Result<Option<LedgerConfig>, LedgerError> {
        Ok(self.state.read().await.configs.get(name).cloned())
    }

    async fn list_ledger_configs(&self) -> Result<Vec<LedgerConfig>, LedgerError> {
        Ok(self.state.read().await.configs.values().cloned().collect())
    }

    async fn save_page(&self, page: &Page) -> Result<(), LedgerError> {
        let mut state = self.state.write().await;
        let pages = state.pages.entry(page.ledger_name.clone()).or_default();
        if pages.contains_key(&page.number) {
            return Err(LedgerError::IoError(format!(
                "page {} of ledger '{}' already exists",
                page.number, page.ledger_name
            )));
        }
        pages.insert(page.number, page.clone());
        Ok(())
    }

    async fn get_page(&self, ledger_name: &str, number: u64) -> Result<Option<Page>, LedgerError> {
        Ok(self
            .state
            .read()
            .await
            .pages
            .get(ledger_name)
            .and_then(|pages| pages.get(&number))
            .cloned())
    }

    async fn list_pages(&self, ledger_name: &str) -> Result<Vec<Page>, LedgerError> {
        Ok(self
            .state
            .read()
            .await
            .pages
            .get(ledger_name)
            .map(|pages| pages.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn save_entry(&self, entry: &Entry) -> Result<(), LedgerError> {
        self.state.write().await.upsert_entry(entry);
        Ok(())
    }

    async fn get_entry(&self, id: &str) -> Result<Option<Entry>, LedgerError> {
        Ok(self.state.read().await.entries.get(id).cloned())
    }

    async fn list_entries(&self, ledger_name: &str) -> Result<Vec<Entry>, LedgerError> {
        Ok(self.state.read().await.ordered_entries(ledger_name))
    }

    async fn commit_seal(
        &self,
        page: &Page,
        new_entry: &Entry,
        held_entry_ids: &[String],
    ) -> Result<(), LedgerError> {
        let mut state = self.state.write().await;

        // Validate everything before the first mutation.
        let page_taken = state
            .pages
            .get(&page.ledger_name)
            .is_some_and(|pages| pages.contains_key(&page.number));
        if page_taken {
            return Err(LedgerError::IoError(format!(
                "page {} of ledger '{}' already exists",
                page.number, page.ledger_name
            )));
        }
        for id in held_entry_ids {
            match state.entries.get(id) {
                Some(entry) if entry.page_number.is_none() => {}
                Some(_) => {
                    return Err(LedgerError::IoError(format!("entry '{}' is already sealed", id)))
                }
                None => return Err(LedgerError::entry_not_found(id)),
            }
        }

        for id in held_entry_ids {
            if let Some(entry) = state.entries.get_mut(id) {
                entry.page_number = Some(page.number);
            }
        }
        state.upsert_entry(new_entry);
        state
            .pages
            .entry(page.ledger_name.clone())
            .or_default()
            .insert(page.number, page.clone());
        Ok(())
    }
}
