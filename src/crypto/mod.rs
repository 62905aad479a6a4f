//! Cryptographic primitives
//!
//! Pluggable hash, signature and symmetric encryption implementations,
//! resolved by name through [`AlgorithmRegistry`].

pub mod encoding;
pub mod encryption;
pub mod hashing;
pub mod registry;
pub mod signatures;

pub use encoding::{bytes_to_hex, hex_to_bytes};
pub use encryption::EncryptionAlgorithm;
pub use hashing::HashAlgorithm;
pub use registry::AlgorithmRegistry;
pub use signatures::{KeyPair, SignatureAlgorithm};
