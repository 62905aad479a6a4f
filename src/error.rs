use thiserror::Error;

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::IoError(format!("JSON serialization error: {}", err))
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        Self::DatabaseError(format!("Database error: {}", err))
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl From<config::ConfigError> for LedgerError {
    fn from(err: config::ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Ledger already exists: {0}")]
    DuplicateLedger(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Signature verification failed: {0}")]
    InvalidSignature(String),

    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O failure: {0}")]
    IoError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Cryptographic error: {0}")]
    CryptoError(String),
}

impl LedgerError {
    pub fn ledger_not_found(name: &str) -> Self {
        Self::NotFound(format!("ledger '{}'", name))
    }

    pub fn entry_not_found(id: &str) -> Self {
        Self::NotFound(format!("entry '{}'", id))
    }

    pub fn page_not_found(ledger_name: &str, number: u64) -> Self {
        Self::NotFound(format!("page {} of ledger '{}'", number, ledger_name))
    }
}
