//! Public key infrastructure: system identity, user certificates and their
//! persistence.

pub mod authority;
pub mod certificate;
pub mod key_store;

pub use authority::{PkiAuthority, PkiSettings};
pub use certificate::{Certificate, CertificateRequest};
pub use key_store::{FileKeyStore, InMemoryKeyStore, KeyEncryption, KeyStore, SystemIdentity};
