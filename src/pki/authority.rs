//! PKI Authority
//!
//! Owns the system identity (key pair + self-signed certificate) and issues
//! user certificates signed with it. Invalid or missing identity material is
//! archived and regenerated at startup.

use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::certificate::{Certificate, CertificateRequest};
use super::key_store::{KeyStore, SystemIdentity};
use crate::crypto::{hex_to_bytes, AlgorithmRegistry, KeyPair, SignatureAlgorithm};
use crate::error::LedgerError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PkiSettings {
    /// Subject and issuer of the system certificate.
    pub system_subject: String,
    /// Signature algorithm of the system key; `None` uses the registry default.
    pub signature_algorithm: Option<String>,
    pub certificate_validity_days: i64,
}

impl Default for PkiSettings {
    fn default() -> Self {
        Self {
            system_subject: "sealed-ledger-system".to_string(),
            signature_algorithm: None,
            certificate_validity_days: 365,
        }
    }
}

pub struct PkiAuthority {
    registry: Arc<AlgorithmRegistry>,
    key_store: Arc<dyn KeyStore>,
    settings: PkiSettings,
    scheme: Arc<dyn SignatureAlgorithm>,
    identity: RwLock<SystemIdentity>,
}

impl PkiAuthority {
    /// Load the system identity, replacing it when it fails any check.
    pub async fn initialize(
        registry: Arc<AlgorithmRegistry>,
        key_store: Arc<dyn KeyStore>,
        settings: PkiSettings,
    ) -> Result<Self, LedgerError> {
        let scheme = registry.resolve_signature(settings.signature_algorithm.as_deref())?;

        let problem = match key_store.load_system_identity().await {
            Ok(Some(identity)) => match check_system_identity(&identity, scheme.as_ref(), &settings) {
                Ok(()) => {
                    info!(
                        "Loaded system identity {} ({})",
                        identity.certificate.serial_number, scheme.name()
                    );
                    return Ok(Self {
                        registry,
                        key_store,
                        settings,
                        scheme,
                        identity: RwLock::new(identity),
                    });
                }
                Err(reason) => reason,
            },
            Ok(None) => "no system identity on file".to_string(),
            Err(e @ LedgerError::ConfigError(_)) => return Err(e),
            Err(e) => format!("stored system identity is unreadable: {}", e),
        };

        let identity = generate_identity(scheme.as_ref(), &settings)?;
        let archived = key_store.rotate_system_identity(&identity).await?;
        warn!(
            "Regenerated system identity {} ({}); previous material archived as {}",
            identity.certificate.serial_number,
            problem,
            archived.as_deref().unwrap_or("<none>")
        );

        Ok(Self {
            registry,
            key_store,
            settings,
            scheme,
            identity: RwLock::new(identity),
        })
    }

    pub async fn get_system_key_pair(&self) -> KeyPair {
        self.identity.read().await.key_pair.clone()
    }

    pub async fn get_system_certificate(&self) -> Certificate {
        self.identity.read().await.certificate.clone()
    }

    /// Archive the current identity and replace it with a fresh one.
    /// Certificates issued under the old key stop verifying.
    pub async fn reissue_system_identity(&self, reason: &str) -> Result<Certificate, LedgerError> {
        let fresh = generate_identity(self.scheme.as_ref(), &self.settings)?;

        let mut identity = self.identity.write().await;
        let archived = self.key_store.rotate_system_identity(&fresh).await?;
        *identity = fresh;

        warn!(
            "Reissued system identity {} ({}); previous material archived as {}",
            identity.certificate.serial_number,
            reason,
            archived.as_deref().unwrap_or("<none>")
        );
        Ok(identity.certificate.clone())
    }

    /// Issue a certificate for a key of the authority's own signature algorithm.
    pub async fn associate_public_key_to_user(
        &self,
        user_id: &str,
        public_key: &str,
    ) -> Result<Certificate, LedgerError> {
        self.associate_public_key_with_algorithm(user_id, public_key, None)
            .await
    }

    /// Issue, persist and return a certificate binding `public_key` to
    /// `user_id`. A certificate already on file is archived first.
    pub async fn associate_public_key_with_algorithm(
        &self,
        user_id: &str,
        public_key: &str,
        key_algorithm: Option<&str>,
    ) -> Result<Certificate, LedgerError> {
        if user_id.trim().is_empty() {
            return Err(LedgerError::InvalidInput("User id must not be empty".to_string()));
        }
        let key_scheme = match key_algorithm {
            Some(name) => self.registry.resolve_signature(Some(name))?,
            None => self.scheme.clone(),
        };
        let key_bytes = hex_to_bytes(public_key)?;
        if !key_scheme.is_valid_public_key(&key_bytes) {
            return Err(LedgerError::InvalidInput(format!(
                "not a valid {} public key",
                key_scheme.name()
            )));
        }

        let certificate = {
            let identity = self.identity.read().await;
            let request = CertificateRequest {
                subject: user_id,
                public_key: &key_bytes,
                key_algorithm: key_scheme.name(),
                validity_days: self.settings.certificate_validity_days,
            };
            Certificate::issue(
                request,
                &identity.certificate.subject,
                &identity.key_pair,
                self.scheme.as_ref(),
                Utc::now(),
            )?
        };

        if let Some(label) = self.key_store.replace_user_certificate(&certificate).await? {
            info!("Archived previous certificate of {} as {}", user_id, label);
        }

        info!(
            "Issued certificate {} for {} ({})",
            certificate.serial_number, user_id, certificate.key_algorithm
        );
        Ok(certificate)
    }

    pub async fn get_user_certificate(&self, user_id: &str) -> Result<Option<Certificate>, LedgerError> {
        self.key_store.get_user_certificate(user_id).await
    }

    /// True when `certificate` was issued to `user_id` by this authority, is
    /// within its validity window, and is the certificate on file.
    pub async fn verify_certificate(&self, user_id: &str, certificate: &Certificate) -> bool {
        if certificate.subject != user_id {
            return false;
        }

        let issuer_ok = {
            let identity = self.identity.read().await;
            certificate.issuer == identity.certificate.subject
                && certificate.verify_signature(self.scheme.as_ref(), &identity.key_pair.public_key)
        };
        if !issuer_ok || !certificate.is_current(Utc::now()) {
            return false;
        }

        match self.key_store.get_user_certificate(user_id).await {
            Ok(Some(on_file)) => &on_file == certificate,
            Ok(None) => false,
            Err(e) => {
                warn!("Could not read certificate of {} from key store: {}", user_id, e);
                false
            }
        }
    }
}

fn generate_identity(
    scheme: &dyn SignatureAlgorithm,
    settings: &PkiSettings,
) -> Result<SystemIdentity, LedgerError> {
    let key_pair = scheme.generate_keypair()?;
    let certificate = Certificate::self_signed(
        &settings.system_subject,
        &key_pair,
        scheme,
        settings.certificate_validity_days,
        Utc::now(),
    )?;
    Ok(SystemIdentity {
        key_pair,
        certificate,
    })
}

/// Reason the stored identity cannot be used, if any.
fn check_system_identity(
    identity: &SystemIdentity,
    scheme: &dyn SignatureAlgorithm,
    settings: &PkiSettings,
) -> Result<(), String> {
    let certificate = &identity.certificate;
    let key_pair = &identity.key_pair;

    if certificate.subject != settings.system_subject || certificate.issuer != settings.system_subject {
        return Err(format!(
            "certificate names {} / {}, expected {}",
            certificate.subject, certificate.issuer, settings.system_subject
        ));
    }
    for algorithm in [
        &key_pair.algorithm,
        &certificate.key_algorithm,
        &certificate.signature_algorithm,
    ] {
        if !algorithm.eq_ignore_ascii_case(scheme.name()) {
            return Err(format!("stored algorithm {} does not match {}", algorithm, scheme.name()));
        }
    }
    if !certificate.is_current(Utc::now()) {
        return Err(format!(
            "certificate valid {} to {}",
            certificate.not_before, certificate.not_after
        ));
    }
    match scheme.public_key_from_private(&key_pair.private_key) {
        Ok(derived) if derived == key_pair.public_key => {}
        Ok(_) => return Err("private key does not match public key".to_string()),
        Err(e) => return Err(format!("private key unusable: {}", e)),
    }
    if certificate.public_key_bytes().ok().as_ref() != Some(&key_pair.public_key) {
        return Err("certificate is for a different key".to_string());
    }
    if !certificate.verify_signature(scheme, &key_pair.public_key) {
        return Err("self-signature does not verify".to_string());
    }

    let mut challenge = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut challenge);
    let probe = scheme
        .sign(&key_pair.private_key, &challenge)
        .map(|signature| scheme.verify(&key_pair.public_key, &challenge, &signature));
    match probe {
        Ok(true) => Ok(()),
        Ok(false) => Err("sign/verify probe failed".to_string()),
        Err(e) => Err(format!("sign/verify probe failed: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::bytes_to_hex;
    use crate::pki::InMemoryKeyStore;
    use chrono::Duration;

    async fn authority(store: Arc<InMemoryKeyStore>) -> PkiAuthority {
        PkiAuthority::initialize(
            Arc::new(AlgorithmRegistry::with_defaults().unwrap()),
            store,
            PkiSettings::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_initialize_generates_then_reuses() {
        let store = Arc::new(InMemoryKeyStore::new());
        let first = authority(store.clone()).await;
        let cert = first.get_system_certificate().await;
        assert!(store.list_archives().await.unwrap().is_empty());

        let second = authority(store.clone()).await;
        assert_eq!(second.get_system_certificate().await, cert);
        assert!(store.list_archives().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expired_identity_is_archived_and_replaced() {
        let store = Arc::new(InMemoryKeyStore::new());
        let registry = AlgorithmRegistry::with_defaults().unwrap();
        let scheme = registry.resolve_signature(None).unwrap();
        let key_pair = scheme.generate_keypair().unwrap();
        let expired = SystemIdentity {
            certificate: Certificate::self_signed(
                "sealed-ledger-system",
                &key_pair,
                scheme.as_ref(),
                1,
                Utc::now() - Duration::days(10),
            )
            .unwrap(),
            key_pair,
        };
        store.put_system_identity(expired.clone()).await;

        let authority = authority(store.clone()).await;
        assert_ne!(authority.get_system_certificate().await, expired.certificate);

        let archives = store.list_archives().await.unwrap();
        assert_eq!(archives.len(), 1);
        assert_eq!(store.archived_system_identity(&archives[0]).await, Some(expired));
    }

    #[tokio::test]
    async fn test_mismatched_private_key_triggers_regeneration() {
        let store = Arc::new(InMemoryKeyStore::new());
        let original = authority(store.clone()).await;
        let mut broken = SystemIdentity {
            key_pair: original.get_system_key_pair().await,
            certificate: original.get_system_certificate().await,
        };
        let registry = AlgorithmRegistry::with_defaults().unwrap();
        broken.key_pair.private_key = registry
            .resolve_signature(None)
            .unwrap()
            .generate_keypair()
            .unwrap()
            .private_key;
        store.put_system_identity(broken).await;

        let reloaded = authority(store.clone()).await;
        assert_ne!(
            reloaded.get_system_certificate().await,
            original.get_system_certificate().await
        );
        assert_eq!(store.list_archives().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_issue_and_verify_user_certificate() {
        let store = Arc::new(InMemoryKeyStore::new());
        let authority = authority(store).await;
        let scheme = authority.scheme.clone();
        let alice = scheme.generate_keypair().unwrap();

        let cert = authority
            .associate_public_key_to_user("alice", &alice.public_key_hex())
            .await
            .unwrap();
        assert_eq!(cert.issuer, "sealed-ledger-system");
        assert!(authority.verify_certificate("alice", &cert).await);
        assert!(!authority.verify_certificate("bob", &cert).await);
        assert_eq!(authority.get_user_certificate("alice").await.unwrap(), Some(cert.clone()));

        let mut substituted = cert.clone();
        substituted.public_key = scheme.generate_keypair().unwrap().public_key_hex();
        assert!(!authority.verify_certificate("alice", &substituted).await);
    }

    #[tokio::test]
    async fn test_reassociation_archives_and_supersedes() {
        let store = Arc::new(InMemoryKeyStore::new());
        let authority = authority(store.clone()).await;
        let scheme = authority.scheme.clone();

        let old = authority
            .associate_public_key_to_user("alice", &scheme.generate_keypair().unwrap().public_key_hex())
            .await
            .unwrap();
        let new = authority
            .associate_public_key_to_user("alice", &scheme.generate_keypair().unwrap().public_key_hex())
            .await
            .unwrap();

        assert!(!authority.verify_certificate("alice", &old).await);
        assert!(authority.verify_certificate("alice", &new).await);
        assert_eq!(store.list_archives().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_invalid_keys() {
        let authority = authority(Arc::new(InMemoryKeyStore::new())).await;
        assert!(matches!(
            authority.associate_public_key_to_user("alice", "abcd").await,
            Err(LedgerError::InvalidInput(_))
        ));
        assert!(matches!(
            authority.associate_public_key_to_user("alice", "not hex").await,
            Err(LedgerError::InvalidInput(_))
        ));

        let ed_key = authority
            .registry
            .resolve_signature(Some("ED25519"))
            .unwrap()
            .generate_keypair()
            .unwrap();
        let cert = authority
            .associate_public_key_with_algorithm("carol", &bytes_to_hex(&ed_key.public_key), Some("ED25519"))
            .await
            .unwrap();
        assert_eq!(cert.key_algorithm, "ED25519");
        assert!(authority.verify_certificate("carol", &cert).await);
    }

    #[tokio::test]
    async fn test_reissue_invalidates_user_certificates() {
        let store = Arc::new(InMemoryKeyStore::new());
        let authority = authority(store.clone()).await;
        let key = authority.scheme.generate_keypair().unwrap();
        let cert = authority
            .associate_public_key_to_user("alice", &key.public_key_hex())
            .await
            .unwrap();

        let before = authority.get_system_certificate().await;
        let after = authority.reissue_system_identity("operator request").await.unwrap();
        assert_ne!(before.serial_number, after.serial_number);
        assert_eq!(authority.get_system_certificate().await, after);
        assert!(!authority.verify_certificate("alice", &cert).await);
        assert_eq!(store.list_archives().await.unwrap().len(), 1);
    }
}
