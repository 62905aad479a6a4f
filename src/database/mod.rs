//! Ledger storage
//!
//! [`LedgerStore`] is the durable home of ledger configs, pages and entries.
//! A write is visible to every read issued after the call returns.

pub mod memory;
pub mod schema;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::LedgerError;
use crate::ledger::{Entry, LedgerConfig, Page};

pub use memory::InMemoryLedgerStore;
pub use sqlite::SqliteLedgerStore;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert a new config. Fails with `DuplicateLedger` if the name is taken.
    async fn save_ledger_config(&self, config: &LedgerConfig) -> Result<(), LedgerError>;

    async fn get_ledger_config(&self, name: &str) -> Result<Option<LedgerConfig>, LedgerError>;

    async fn list_ledger_configs(&self) -> Result<Vec<LedgerConfig>, LedgerError>;

    /// Insert a page record. Sealed pages are immutable, so a second save of
    /// the same number fails and leaves the stored page untouched.
    async fn save_page(&self, page: &Page) -> Result<(), LedgerError>;

    async fn get_page(&self, ledger_name: &str, number: u64) -> Result<Option<Page>, LedgerError>;

    /// Pages in ascending number order.
    async fn list_pages(&self, ledger_name: &str) -> Result<Vec<Page>, LedgerError>;

    /// Insert or overwrite an entry. An overwritten entry keeps its original
    /// insertion position.
    async fn save_entry(&self, entry: &Entry) -> Result<(), LedgerError>;

    async fn get_entry(&self, id: &str) -> Result<Option<Entry>, LedgerError>;

    /// Entries of a ledger in insertion order.
    async fn list_entries(&self, ledger_name: &str) -> Result<Vec<Entry>, LedgerError>;

    async fn list_holding_entries(&self, ledger_name: &str) -> Result<Vec<Entry>, LedgerError> {
        Ok(self
            .list_entries(ledger_name)
            .await?
            .into_iter()
            .filter(|entry| entry.page_number.is_none())
            .collect())
    }

    async fn list_sealed_entries(&self, ledger_name: &str) -> Result<Vec<Entry>, LedgerError> {
        Ok(self
            .list_entries(ledger_name)
            .await?
            .into_iter()
            .filter(|entry| entry.page_number.is_some())
            .collect())
    }

    /// Entries sealed into one page, in insertion order.
    async fn list_page_entries(
        &self,
        ledger_name: &str,
        number: u64,
    ) -> Result<Vec<Entry>, LedgerError> {
        Ok(self
            .list_entries(ledger_name)
            .await?
            .into_iter()
            .filter(|entry| entry.page_number == Some(number))
            .collect())
    }

    /// Atomically store `new_entry`, insert `page`, and assign `page.number`
    /// to every entry in `held_entry_ids`. Either all of it becomes visible
    /// or none of it does.
    async fn commit_seal(
        &self,
        page: &Page,
        new_entry: &Entry,
        held_entry_ids: &[String],
    ) -> Result<(), LedgerError>;
}
