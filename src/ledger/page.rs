use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use super::merkle::merkle_root;
use crate::crypto::HashAlgorithm;
use crate::error::LedgerError;

/// `previous_hash` of page 0.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// A sealed, hash-chained batch of entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub ledger_name: String,
    pub number: u64,
    pub timestamp: DateTime<Utc>,
    pub previous_hash: String,
    pub entry_count: u64,
    pub merkle_root: String,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSummary {
    pub number: u64,
    pub timestamp: DateTime<Utc>,
    pub entry_count: u64,
}

impl Page {
    /// Seal `entry_hashes` (in insertion order) into page `number`.
    pub fn seal(
        ledger_name: &str,
        number: u64,
        previous_hash: &str,
        entry_hashes: &[String],
        hash_algorithm: &dyn HashAlgorithm,
    ) -> Result<Self, LedgerError> {
        let merkle_root = merkle_root(entry_hashes, hash_algorithm)?;
        let entry_count = entry_hashes.len() as u64;
        let hash = Self::compute_hash(hash_algorithm, previous_hash, &merkle_root, number, entry_count);

        Ok(Self {
            ledger_name: ledger_name.to_string(),
            number,
            timestamp: Utc::now().trunc_subsecs(3),
            previous_hash: previous_hash.to_string(),
            entry_count,
            merkle_root,
            hash,
        })
    }

    /// `H(previous_hash || merkle_root || number || entry_count)`.
    pub fn compute_hash(
        hash_algorithm: &dyn HashAlgorithm,
        previous_hash: &str,
        merkle_root: &str,
        number: u64,
        entry_count: u64,
    ) -> String {
        let canonical = format!("{}{}{}{}", previous_hash, merkle_root, number, entry_count);
        hash_algorithm.hash_hex(canonical.as_bytes())
    }

    /// Recompute this page's hash from its stored fields.
    pub fn recompute_hash(&self, hash_algorithm: &dyn HashAlgorithm) -> String {
        Self::compute_hash(
            hash_algorithm,
            &self.previous_hash,
            &self.merkle_root,
            self.number,
            self.entry_count,
        )
    }

    pub fn summary(&self) -> PageSummary {
        PageSummary {
            number: self.number,
            timestamp: self.timestamp,
            entry_count: self.entry_count,
        }
    }
}
