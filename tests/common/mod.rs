//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use sealed_ledger::crypto::{bytes_to_hex, AlgorithmRegistry, KeyPair, SignatureAlgorithm};
use sealed_ledger::database::{InMemoryLedgerStore, SqliteLedgerStore};
use sealed_ledger::ledger::{Entry, LedgerEngine};
use sealed_ledger::pki::{InMemoryKeyStore, PkiAuthority, PkiSettings};
use std::sync::Arc;

pub fn registry() -> Arc<AlgorithmRegistry> {
    Arc::new(AlgorithmRegistry::with_defaults().expect("default registry"))
}

/// Engine over a fresh in-memory store.
pub fn memory_engine() -> Arc<LedgerEngine> {
    Arc::new(LedgerEngine::new(Arc::new(InMemoryLedgerStore::new()), registry()))
}

/// Engine over a private SQLite database, with the store handle for
/// out-of-band edits.
pub async fn sqlite_engine() -> (Arc<LedgerEngine>, Arc<SqliteLedgerStore>) {
    let store = Arc::new(
        SqliteLedgerStore::in_memory()
            .await
            .expect("Failed to create test database"),
    );
    let engine = Arc::new(LedgerEngine::new(store.clone(), registry()));
    (engine, store)
}

/// Hex signature over the entry's hash.
pub fn sign_hash(scheme: &dyn SignatureAlgorithm, keys: &KeyPair, entry: &Entry) -> String {
    let payload = entry.signing_payload().expect("entry hash is hex");
    bytes_to_hex(&scheme.sign(&keys.private_key, &payload).expect("signing"))
}

pub async fn test_authority() -> (PkiAuthority, Arc<InMemoryKeyStore>) {
    let key_store = Arc::new(InMemoryKeyStore::new());
    let authority = PkiAuthority::initialize(registry(), key_store.clone(), PkiSettings::default())
        .await
        .expect("authority");
    (authority, key_store)
}
