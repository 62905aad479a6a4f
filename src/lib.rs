pub mod app;
pub mod audit;
pub mod config;
pub mod crypto;
pub mod database;
pub mod error;
pub mod ledger;
pub mod pki;

pub use error::LedgerError;
