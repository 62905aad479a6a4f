//! Algorithm Registry
//!
//! Resolves hash, signature and encryption implementations by name. The
//! registry is assembled once at process start from the compiled-in table
//! below and shared read-only afterwards.

use std::sync::Arc;
use tracing::debug;

use super::encryption::{Aes256GcmEncryption, ChaCha20Poly1305Encryption, EncryptionAlgorithm};
use super::hashing::{Blake3Hash, HashAlgorithm, Sha256Hash, Sha512Hash};
use super::signatures::{Ed25519Signature, Secp256k1Signature, SignatureAlgorithm};
use crate::error::LedgerError;

type HashCtor = fn() -> Arc<dyn HashAlgorithm>;
type SignatureCtor = fn() -> Arc<dyn SignatureAlgorithm>;
type EncryptionCtor = fn() -> Arc<dyn EncryptionAlgorithm>;

fn sha256() -> Arc<dyn HashAlgorithm> {
    Arc::new(Sha256Hash)
}

fn sha512() -> Arc<dyn HashAlgorithm> {
    Arc::new(Sha512Hash)
}

fn blake3() -> Arc<dyn HashAlgorithm> {
    Arc::new(Blake3Hash)
}

fn secp256k1() -> Arc<dyn SignatureAlgorithm> {
    Arc::new(Secp256k1Signature::new())
}

fn ed25519() -> Arc<dyn SignatureAlgorithm> {
    Arc::new(Ed25519Signature)
}

fn aes_256_gcm() -> Arc<dyn EncryptionAlgorithm> {
    Arc::new(Aes256GcmEncryption)
}

fn chacha20_poly1305() -> Arc<dyn EncryptionAlgorithm> {
    Arc::new(ChaCha20Poly1305Encryption)
}

/// Default hash implementations. The first entry is the default.
const DEFAULT_HASHES: &[HashCtor] = &[sha256, sha512, blake3];

/// Default signature implementations. The first entry is the default.
const DEFAULT_SIGNATURES: &[SignatureCtor] = &[secp256k1, ed25519];

/// Default encryption implementations. The first entry is the default.
const DEFAULT_ENCRYPTIONS: &[EncryptionCtor] = &[aes_256_gcm, chacha20_poly1305];

pub struct AlgorithmRegistry {
    hashes: Vec<Arc<dyn HashAlgorithm>>,
    signatures: Vec<Arc<dyn SignatureAlgorithm>>,
    encryptions: Vec<Arc<dyn EncryptionAlgorithm>>,
}

impl AlgorithmRegistry {
    /// Registry populated from the compiled-in default table.
    pub fn with_defaults() -> Result<Self, LedgerError> {
        let mut builder = Self::builder();
        for ctor in DEFAULT_HASHES {
            builder = builder.hash(ctor());
        }
        for ctor in DEFAULT_SIGNATURES {
            builder = builder.signature(ctor());
        }
        for ctor in DEFAULT_ENCRYPTIONS {
            builder = builder.encryption(ctor());
        }
        builder.build()
    }

    pub fn builder() -> AlgorithmRegistryBuilder {
        AlgorithmRegistryBuilder::default()
    }

    pub fn resolve_hash(&self, name: Option<&str>) -> Result<Arc<dyn HashAlgorithm>, LedgerError> {
        resolve(&self.hashes, name, |a| a.name(), "hash")
    }

    pub fn resolve_signature(
        &self,
        name: Option<&str>,
    ) -> Result<Arc<dyn SignatureAlgorithm>, LedgerError> {
        resolve(&self.signatures, name, |a| a.name(), "signature")
    }

    pub fn resolve_encryption(
        &self,
        name: Option<&str>,
    ) -> Result<Arc<dyn EncryptionAlgorithm>, LedgerError> {
        resolve(&self.encryptions, name, |a| a.name(), "encryption")
    }

    pub fn hash_names(&self) -> Vec<&'static str> {
        self.hashes.iter().map(|a| a.name()).collect()
    }

    pub fn signature_names(&self) -> Vec<&'static str> {
        self.signatures.iter().map(|a| a.name()).collect()
    }

    pub fn encryption_names(&self) -> Vec<&'static str> {
        self.encryptions.iter().map(|a| a.name()).collect()
    }
}

fn resolve<T: ?Sized>(
    registered: &[Arc<T>],
    name: Option<&str>,
    name_of: impl Fn(&T) -> &'static str,
    capability: &str,
) -> Result<Arc<T>, LedgerError> {
    let found = match name {
        None => registered.first(),
        Some(wanted) => registered
            .iter()
            .find(|algo| name_of(algo.as_ref()).eq_ignore_ascii_case(wanted.trim())),
    };

    found.cloned().ok_or_else(|| {
        LedgerError::UnsupportedAlgorithm(format!(
            "no {} algorithm named '{}'",
            capability,
            name.unwrap_or("<default>")
        ))
    })
}

#[derive(Default)]
pub struct AlgorithmRegistryBuilder {
    hashes: Vec<Arc<dyn HashAlgorithm>>,
    signatures: Vec<Arc<dyn SignatureAlgorithm>>,
    encryptions: Vec<Arc<dyn EncryptionAlgorithm>>,
}

impl AlgorithmRegistryBuilder {
    pub fn hash(mut self, algo: Arc<dyn HashAlgorithm>) -> Self {
        self.hashes.push(algo);
        self
    }

    pub fn signature(mut self, algo: Arc<dyn SignatureAlgorithm>) -> Self {
        self.signatures.push(algo);
        self
    }

    pub fn encryption(mut self, algo: Arc<dyn EncryptionAlgorithm>) -> Self {
        self.encryptions.push(algo);
        self
    }

    /// Every capability needs at least one implementation, and names must be
    /// unique within a capability.
    pub fn build(self) -> Result<AlgorithmRegistry, LedgerError> {
        check_capability("hash", &self.hashes.iter().map(|a| a.name()).collect::<Vec<_>>())?;
        check_capability(
            "signature",
            &self.signatures.iter().map(|a| a.name()).collect::<Vec<_>>(),
        )?;
        check_capability(
            "encryption",
            &self.encryptions.iter().map(|a| a.name()).collect::<Vec<_>>(),
        )?;

        let registry = AlgorithmRegistry {
            hashes: self.hashes,
            signatures: self.signatures,
            encryptions: self.encryptions,
        };
        debug!(
            hashes = ?registry.hash_names(),
            signatures = ?registry.signature_names(),
            encryptions = ?registry.encryption_names(),
            "Algorithm registry built"
        );
        Ok(registry)
    }
}

fn check_capability(capability: &str, names: &[&'static str]) -> Result<(), LedgerError> {
    if names.is_empty() {
        return Err(LedgerError::UnsupportedAlgorithm(format!(
            "no {} implementation registered",
            capability
        )));
    }
    for (i, name) in names.iter().enumerate() {
        if names[..i].iter().any(|other| other.eq_ignore_ascii_case(name)) {
            return Err(LedgerError::ConfigError(format!(
                "{} algorithm '{}' registered twice",
                capability, name
            )));
        }
    }
    Ok(())
}
