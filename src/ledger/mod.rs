//! Ledger
//!
//! Append-only ledgers whose entries are sealed into hash-chained pages with
//! a Merkle root per page.

pub mod engine;
pub mod entry;
pub mod merkle;
pub mod page;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use engine::{ChainReport, EntryProof, LedgerEngine, LedgerStats};
pub use entry::{Entry, EntrySignature, NewEntry};
pub use merkle::{verify_merkle_proof, MerkleProof, MerkleTree, ProofStep, SiblingSide};
pub use page::{Page, PageSummary, GENESIS_HASH};

/// Per-ledger settings, fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub name: String,
    pub entries_per_page: u64,
    pub hash_algorithm: String,
    pub signature_algorithm: String,
    pub created_at: DateTime<Utc>,
}
