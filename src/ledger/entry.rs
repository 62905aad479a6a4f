//! Ledger Entry
//!
//! Defines ledger entries and the canonical form their hash is computed over.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::{hex_to_bytes, HashAlgorithm};
use crate::error::LedgerError;

/// Caller-supplied fields of a new entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewEntry {
    pub content: String,
    pub senders: Vec<String>,
    pub recipients: Vec<String>,
    pub related_entry_ids: Vec<String>,
    pub keywords: Vec<String>,
}

impl NewEntry {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn sender(mut self, user_id: impl Into<String>) -> Self {
        self.senders.push(user_id.into());
        self
    }

    pub fn recipient(mut self, user_id: impl Into<String>) -> Self {
        self.recipients.push(user_id.into());
        self
    }

    pub fn related(mut self, entry_id: impl Into<String>) -> Self {
        self.related_entry_ids.push(entry_id.into());
        self
    }

    pub fn keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keywords.push(keyword.into());
        self
    }
}

/// A verified signature attached to an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySignature {
    pub signer_id: String,
    pub public_key: String,
    pub signature: String,
    pub algorithm: String,
    pub signed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    pub ledger_name: String,
    pub timestamp: DateTime<Utc>,
    pub content: String,
    pub senders: Vec<String>,
    pub recipients: Vec<String>,
    pub related_entry_ids: Vec<String>,
    pub keywords: Vec<String>,
    pub signatures: Vec<EntrySignature>,
    /// `None` while the entry sits in the holding area.
    pub page_number: Option<u64>,
    pub hash: String,
}

/// Hash input. Field order here is part of the hash format.
#[derive(Serialize)]
struct CanonicalEntry<'a> {
    id: &'a str,
    timestamp: String,
    content: &'a str,
    senders: &'a [String],
    recipients: &'a [String],
    related_entry_ids: &'a [String],
    keywords: &'a [String],
}

impl Entry {
    /// Build a holding entry and compute its hash.
    pub fn create(
        id: String,
        ledger_name: &str,
        fields: NewEntry,
        timestamp: DateTime<Utc>,
        hash_algorithm: &dyn HashAlgorithm,
    ) -> Result<Self, LedgerError> {
        let mut entry = Self {
            id,
            ledger_name: ledger_name.to_string(),
            timestamp: timestamp.trunc_subsecs(3),
            content: fields.content,
            senders: fields.senders,
            recipients: fields.recipients,
            related_entry_ids: fields.related_entry_ids,
            keywords: fields.keywords,
            signatures: Vec::new(),
            page_number: None,
            hash: String::new(),
        };
        entry.hash = hash_algorithm.hash_hex(&entry.canonical_bytes()?);
        Ok(entry)
    }

    /// Canonical JSON of the identity fields as they currently stand.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, LedgerError> {
        let canonical = CanonicalEntry {
            id: &self.id,
            timestamp: self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            content: &self.content,
            senders: &self.senders,
            recipients: &self.recipients,
            related_entry_ids: &self.related_entry_ids,
            keywords: &self.keywords,
        };
        Ok(serde_json::to_vec(&canonical)?)
    }

    /// Bytes a participant signs: the raw digest behind `hash`.
    pub fn signing_payload(&self) -> Result<Vec<u8>, LedgerError> {
        hex_to_bytes(&self.hash)
    }

    pub fn is_sealed(&self) -> bool {
        self.page_number.is_some()
    }

    pub fn involves(&self, user_id: &str) -> bool {
        self.senders.iter().any(|s| s == user_id) || self.recipients.iter().any(|r| r == user_id)
    }

    pub fn is_signed_by(&self, user_id: &str) -> bool {
        self.signatures.iter().any(|s| s.signer_id == user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hashing::{Sha256Hash, Sha512Hash};

    fn sample(hash: &dyn HashAlgorithm) -> Entry {
        Entry::create(
            "entry-1".to_string(),
            "L",
            NewEntry::new("hello").sender("alice").recipient("bob").keyword("greeting"),
            Utc::now(),
            hash,
        )
        .unwrap()
    }

    #[test]
    fn test_entry_creation() {
        let entry = sample(&Sha256Hash);
        assert_eq!(entry.ledger_name, "L");
        assert!(!entry.is_sealed());
        assert!(entry.involves("alice"));
        assert!(entry.involves("bob"));
        assert!(!entry.involves("carol"));
        assert_eq!(entry.hash.len(), 64);
    }

    #[test]
    fn test_hash_is_deterministic() {
        let entry = sample(&Sha256Hash);
        let recomputed = Sha256Hash.hash_hex(&entry.canonical_bytes().unwrap());
        assert_eq!(entry.hash, recomputed);
    }

    #[test]
    fn test_hash_width_follows_algorithm() {
        assert_eq!(sample(&Sha512Hash).hash.len(), 128);
    }

    #[test]
    fn test_metadata_edits_do_not_touch_stored_hash() {
        let mut entry = sample(&Sha256Hash);
        let original = entry.hash.clone();
        entry.keywords.push("extra".to_string());
        entry.related_entry_ids.push("entry-0".to_string());
        assert_eq!(entry.hash, original);
    }

    #[test]
    fn test_timestamp_truncated_to_millis() {
        let entry = sample(&Sha256Hash);
        assert_eq!(entry.timestamp.timestamp_subsec_nanos() % 1_000_000, 0);
    }

    #[test]
    fn test_signing_payload_is_raw_digest() {
        let entry = sample(&Sha256Hash);
        assert_eq!(entry.signing_payload().unwrap().len(), 32);
    }
}
