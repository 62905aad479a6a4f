// Database schema definitions for the SQLite ledger store.
// Statements are idempotent and applied in order on connect.

pub const LEDGERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS ledgers (
    name TEXT PRIMARY KEY,
    entries_per_page INTEGER NOT NULL CHECK (entries_per_page >= 1),
    hash_algorithm TEXT NOT NULL,
    signature_algorithm TEXT NOT NULL,
    created_at TEXT NOT NULL
)
"#;

pub const PAGES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS pages (
    ledger_name TEXT NOT NULL REFERENCES ledgers(name),
    number INTEGER NOT NULL,
    timestamp TEXT NOT NULL,
    previous_hash TEXT NOT NULL,
    entry_count INTEGER NOT NULL,
    merkle_root TEXT NOT NULL,
    hash TEXT NOT NULL,
    PRIMARY KEY (ledger_name, number)
)
"#;

// `seq` records insertion order, which is the Merkle leaf order.
pub const ENTRIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS entries (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    ledger_name TEXT NOT NULL REFERENCES ledgers(name),
    timestamp TEXT NOT NULL,
    content TEXT NOT NULL,
    senders TEXT NOT NULL,
    recipients TEXT NOT NULL,
    related_entry_ids TEXT NOT NULL,
    keywords TEXT NOT NULL,
    signatures TEXT NOT NULL,
    page_number INTEGER,
    hash TEXT NOT NULL
)
"#;

pub const ENTRIES_LEDGER_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_entries_ledger_page ON entries (ledger_name, page_number)";

pub const SCHEMA: &[&str] = &[
    LEDGERS_TABLE,
    PAGES_TABLE,
    ENTRIES_TABLE,
    ENTRIES_LEDGER_INDEX,
];
