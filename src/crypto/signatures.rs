use ed25519_dalek::{Signer, Verifier};
use rand::rngs::OsRng;
use secp256k1::{ecdsa, Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};
use std::fmt;

use super::encoding::bytes_to_hex;
use crate::error::LedgerError;

/// Raw key material for one signature scheme.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub algorithm: String,
    pub public_key: Vec<u8>,
    pub private_key: Vec<u8>,
}

impl KeyPair {
    pub fn public_key_hex(&self) -> String {
        bytes_to_hex(&self.public_key)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("algorithm", &self.algorithm)
            .field("public_key", &self.public_key_hex())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// A named signature scheme.
///
/// `verify` never fails: key or signature bytes that do not parse for this
/// scheme, including material produced by a different scheme, simply do not
/// verify.
pub trait SignatureAlgorithm: Send + Sync {
    fn name(&self) -> &'static str;

    fn generate_keypair(&self) -> Result<KeyPair, LedgerError>;

    fn public_key_from_private(&self, private_key: &[u8]) -> Result<Vec<u8>, LedgerError>;

    fn sign(&self, private_key: &[u8], message: &[u8]) -> Result<Vec<u8>, LedgerError>;

    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool;

    /// Whether `public_key` is a well-formed key for this scheme.
    fn is_valid_public_key(&self, public_key: &[u8]) -> bool;
}

/// ECDSA over secp256k1. Messages are SHA-256 prehashed, keys are
/// compressed SEC1 (33 bytes) and signatures are DER encoded.
pub struct Secp256k1Signature {
    secp: Secp256k1<secp256k1::All>,
}

impl Secp256k1Signature {
    pub fn new() -> Self {
        Self {
            secp: Secp256k1::new(),
        }
    }

    fn message_digest(message: &[u8]) -> Result<Message, LedgerError> {
        let message_hash = Sha256::digest(message);
        Message::from_digest_slice(&message_hash)
            .map_err(|e| LedgerError::CryptoError(format!("Invalid message hash: {}", e)))
    }

    fn secret_key(private_key: &[u8]) -> Result<SecretKey, LedgerError> {
        SecretKey::from_slice(private_key)
            .map_err(|e| LedgerError::CryptoError(format!("Invalid secp256k1 private key: {}", e)))
    }
}

impl Default for Secp256k1Signature {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureAlgorithm for Secp256k1Signature {
    fn name(&self) -> &'static str {
        "SECP256K1"
    }

    fn generate_keypair(&self) -> Result<KeyPair, LedgerError> {
        use secp256k1::rand::rngs::OsRng;
        let mut rng = OsRng;
        let secret_key = SecretKey::new(&mut rng);
        let public_key = PublicKey::from_secret_key(&self.secp, &secret_key);
        Ok(KeyPair {
            algorithm: self.name().to_string(),
            public_key: public_key.serialize().to_vec(),
            private_key: secret_key.secret_bytes().to_vec(),
        })
    }

    fn public_key_from_private(&self, private_key: &[u8]) -> Result<Vec<u8>, LedgerError> {
        let secret_key = Self::secret_key(private_key)?;
        Ok(PublicKey::from_secret_key(&self.secp, &secret_key)
            .serialize()
            .to_vec())
    }

    fn sign(&self, private_key: &[u8], message: &[u8]) -> Result<Vec<u8>, LedgerError> {
        let secret_key = Self::secret_key(private_key)?;
        let digest = Self::message_digest(message)?;
        Ok(self
            .secp
            .sign_ecdsa(&digest, &secret_key)
            .serialize_der()
            .to_vec())
    }

    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
        let Ok(public_key) = PublicKey::from_slice(public_key) else {
            return false;
        };
        let Ok(signature) = ecdsa::Signature::from_der(signature) else {
            return false;
        };
        let Ok(digest) = Self::message_digest(message) else {
            return false;
        };
        self.secp.verify_ecdsa(&digest, &signature, &public_key).is_ok()
    }

    fn is_valid_public_key(&self, public_key: &[u8]) -> bool {
        PublicKey::from_slice(public_key).is_ok()
    }
}

/// Ed25519 with 32-byte keys and 64-byte signatures.
pub struct Ed25519Signature;

impl Ed25519Signature {
    fn signing_key(private_key: &[u8]) -> Result<ed25519_dalek::SigningKey, LedgerError> {
        let bytes: [u8; 32] = private_key.try_into().map_err(|_| {
            LedgerError::CryptoError(format!(
                "Invalid ed25519 private key length: {}",
                private_key.len()
            ))
        })?;
        Ok(ed25519_dalek::SigningKey::from_bytes(&bytes))
    }

    fn verifying_key(public_key: &[u8]) -> Option<ed25519_dalek::VerifyingKey> {
        let bytes: [u8; 32] = public_key.try_into().ok()?;
        ed25519_dalek::VerifyingKey::from_bytes(&bytes).ok()
    }
}

impl SignatureAlgorithm for Ed25519Signature {
    fn name(&self) -> &'static str {
        "ED25519"
    }

    fn generate_keypair(&self) -> Result<KeyPair, LedgerError> {
        let signing_key = ed25519_dalek::SigningKey::generate(&mut OsRng);
        Ok(KeyPair {
            algorithm: self.name().to_string(),
            public_key: signing_key.verifying_key().to_bytes().to_vec(),
            private_key: signing_key.to_bytes().to_vec(),
        })
    }

    fn public_key_from_private(&self, private_key: &[u8]) -> Result<Vec<u8>, LedgerError> {
        Ok(Self::signing_key(private_key)?
            .verifying_key()
            .to_bytes()
            .to_vec())
    }

    fn sign(&self, private_key: &[u8], message: &[u8]) -> Result<Vec<u8>, LedgerError> {
        let signing_key = Self::signing_key(private_key)?;
        Ok(signing_key.sign(message).to_bytes().to_vec())
    }

    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
        let Some(verifying_key) = Self::verifying_key(public_key) else {
            return false;
        };
        let Ok(signature) = ed25519_dalek::Signature::from_slice(signature) else {
            return false;
        };
        verifying_key.verify(message, &signature).is_ok()
    }

    fn is_valid_public_key(&self, public_key: &[u8]) -> bool {
        Self::verifying_key(public_key).is_some()
    }
}
