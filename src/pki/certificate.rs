use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::{bytes_to_hex, hex_to_bytes, KeyPair, SignatureAlgorithm};
use crate::error::LedgerError;

/// Binds a subject to a public key under the issuer's signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub serial_number: String,
    pub subject: String,
    pub issuer: String,
    pub public_key: String,
    pub key_algorithm: String,
    pub signature_algorithm: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub signature: String,
}

/// Fields of a certificate that has not been signed yet.
pub struct CertificateRequest<'a> {
    pub subject: &'a str,
    pub public_key: &'a [u8],
    pub key_algorithm: &'a str,
    pub validity_days: i64,
}

impl Certificate {
    /// Sign `request` as `issuer` with `issuer_key`, valid from `now`.
    pub fn issue(
        request: CertificateRequest<'_>,
        issuer: &str,
        issuer_key: &KeyPair,
        scheme: &dyn SignatureAlgorithm,
        now: DateTime<Utc>,
    ) -> Result<Self, LedgerError> {
        if request.validity_days < 1 {
            return Err(LedgerError::InvalidInput(format!(
                "certificate validity must be at least one day, got {}",
                request.validity_days
            )));
        }
        let not_before = now.trunc_subsecs(3);
        let not_after = Duration::try_days(request.validity_days)
            .and_then(|validity| not_before.checked_add_signed(validity))
            .ok_or_else(|| {
                LedgerError::InvalidInput(format!(
                    "certificate validity of {} days is out of range",
                    request.validity_days
                ))
            })?;
        let mut certificate = Self {
            serial_number: Uuid::new_v4().simple().to_string(),
            subject: request.subject.to_string(),
            issuer: issuer.to_string(),
            public_key: bytes_to_hex(request.public_key),
            key_algorithm: request.key_algorithm.to_string(),
            signature_algorithm: scheme.name().to_string(),
            not_before,
            not_after,
            signature: String::new(),
        };
        let signature = scheme.sign(&issuer_key.private_key, certificate.signed_payload().as_bytes())?;
        certificate.signature = bytes_to_hex(&signature);
        Ok(certificate)
    }

    /// Self-signed certificate for `key_pair`.
    pub fn self_signed(
        subject: &str,
        key_pair: &KeyPair,
        scheme: &dyn SignatureAlgorithm,
        validity_days: i64,
        now: DateTime<Utc>,
    ) -> Result<Self, LedgerError> {
        let request = CertificateRequest {
            subject,
            public_key: &key_pair.public_key,
            key_algorithm: scheme.name(),
            validity_days,
        };
        Self::issue(request, subject, key_pair, scheme, now)
    }

    /// Canonical `field:value|...` text covering every field but `signature`.
    pub fn signed_payload(&self) -> String {
        [
            ("serial_number", self.serial_number.clone()),
            ("subject", self.subject.clone()),
            ("issuer", self.issuer.clone()),
            ("public_key", self.public_key.clone()),
            ("key_algorithm", self.key_algorithm.clone()),
            ("signature_algorithm", self.signature_algorithm.clone()),
            ("not_before", self.not_before.to_rfc3339_opts(SecondsFormat::Millis, true)),
            ("not_after", self.not_after.to_rfc3339_opts(SecondsFormat::Millis, true)),
        ]
        .iter()
        .map(|(field, value)| format!("{}:{}", field, value))
        .collect::<Vec<_>>()
        .join("|")
    }

    /// Check the signature against the issuer's public key.
    pub fn verify_signature(&self, scheme: &dyn SignatureAlgorithm, issuer_public_key: &[u8]) -> bool {
        if !self.signature_algorithm.eq_ignore_ascii_case(scheme.name()) {
            return false;
        }
        match hex_to_bytes(&self.signature) {
            Ok(signature) => scheme.verify(issuer_public_key, self.signed_payload().as_bytes(), &signature),
            Err(_) => false,
        }
    }

    pub fn is_current(&self, at: DateTime<Utc>) -> bool {
        self.not_before <= at && at <= self.not_after
    }

    pub fn public_key_bytes(&self) -> Result<Vec<u8>, LedgerError> {
        hex_to_bytes(&self.public_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::AlgorithmRegistry;

    #[test]
    fn test_self_signed_round_trip() {
        let registry = AlgorithmRegistry::with_defaults().unwrap();
        let scheme = registry.resolve_signature(None).unwrap();
        let keys = scheme.generate_keypair().unwrap();

        let cert = Certificate::self_signed("system", &keys, scheme.as_ref(), 30, Utc::now()).unwrap();
        assert_eq!(cert.subject, cert.issuer);
        assert!(cert.verify_signature(scheme.as_ref(), &keys.public_key));
        assert!(cert.is_current(Utc::now()));
        assert!(!cert.is_current(Utc::now() + Duration::days(31)));
    }

    #[test]
    fn test_payload_covers_fields() {
        let registry = AlgorithmRegistry::with_defaults().unwrap();
        let scheme = registry.resolve_signature(Some("ed25519")).unwrap();
        let keys = scheme.generate_keypair().unwrap();
        let cert = Certificate::self_signed("system", &keys, scheme.as_ref(), 1, Utc::now()).unwrap();

        let payload = cert.signed_payload();
        assert!(payload.starts_with("serial_number:"));
        assert!(payload.contains("|subject:system|issuer:system|"));
        assert!(!payload.contains(&cert.signature));

        let mut tampered = cert.clone();
        tampered.subject = "mallory".to_string();
        assert!(!tampered.verify_signature(scheme.as_ref(), &keys.public_key));

        let mut extended = cert;
        extended.not_after = extended.not_after + Duration::days(365);
        assert!(!extended.verify_signature(scheme.as_ref(), &keys.public_key));
    }

    #[test]
    fn test_rejects_zero_validity() {
        let registry = AlgorithmRegistry::with_defaults().unwrap();
        let scheme = registry.resolve_signature(None).unwrap();
        let keys = scheme.generate_keypair().unwrap();
        assert!(matches!(
            Certificate::self_signed("system", &keys, scheme.as_ref(), 0, Utc::now()),
            Err(LedgerError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_cross_scheme_signature_rejected() {
        let registry = AlgorithmRegistry::with_defaults().unwrap();
        let secp = registry.resolve_signature(Some("SECP256K1")).unwrap();
        let ed = registry.resolve_signature(Some("ED25519")).unwrap();
        let keys = secp.generate_keypair().unwrap();
        let cert = Certificate::self_signed("system", &keys, secp.as_ref(), 1, Utc::now()).unwrap();
        assert!(!cert.verify_signature(ed.as_ref(), &keys.public_key));
    }
}
