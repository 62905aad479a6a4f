use aes_gcm::aead::{Aead, AeadCore, KeyInit};
use aes_gcm::Aes256Gcm;
use chacha20poly1305::ChaCha20Poly1305;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::LedgerError;

/// Nonce width shared by both AEAD constructions (96 bits).
pub const AEAD_NONCE_SIZE: usize = 12;

/// A named symmetric AEAD. Ciphertexts are laid out as `nonce || sealed`.
pub trait EncryptionAlgorithm: Send + Sync {
    fn name(&self) -> &'static str;

    fn key_len(&self) -> usize;

    fn generate_key(&self) -> Vec<u8> {
        let mut key = vec![0u8; self.key_len()];
        OsRng.fill_bytes(&mut key);
        key
    }

    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, LedgerError>;

    fn decrypt(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, LedgerError>;
}

fn split_nonce(data: &[u8]) -> Result<(&[u8], &[u8]), LedgerError> {
    if data.len() < AEAD_NONCE_SIZE {
        return Err(LedgerError::CryptoError(format!(
            "Ciphertext too short: {} bytes",
            data.len()
        )));
    }
    Ok(data.split_at(AEAD_NONCE_SIZE))
}

pub struct Aes256GcmEncryption;

impl Aes256GcmEncryption {
    fn cipher(key: &[u8]) -> Result<Aes256Gcm, LedgerError> {
        Aes256Gcm::new_from_slice(key)
            .map_err(|_| LedgerError::CryptoError(format!("Invalid AES-256 key length: {}", key.len())))
    }
}

impl EncryptionAlgorithm for Aes256GcmEncryption {
    fn name(&self) -> &'static str {
        "AES-256-GCM"
    }

    fn key_len(&self) -> usize {
        32
    }

    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, LedgerError> {
        let cipher = Self::cipher(key)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| LedgerError::CryptoError(format!("Encryption failed: {}", e)))?;

        let mut out = nonce.to_vec();
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn decrypt(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, LedgerError> {
        let cipher = Self::cipher(key)?;
        let (nonce, sealed) = split_nonce(data)?;
        cipher
            .decrypt(aes_gcm::Nonce::from_slice(nonce), sealed)
            .map_err(|e| LedgerError::CryptoError(format!("Decryption failed: {}", e)))
    }
}

pub struct ChaCha20Poly1305Encryption;

impl ChaCha20Poly1305Encryption {
    fn cipher(key: &[u8]) -> Result<ChaCha20Poly1305, LedgerError> {
        ChaCha20Poly1305::new_from_slice(key).map_err(|_| {
            LedgerError::CryptoError(format!("Invalid ChaCha20 key length: {}", key.len()))
        })
    }
}

impl EncryptionAlgorithm for ChaCha20Poly1305Encryption {
    fn name(&self) -> &'static str {
        "CHACHA20-POLY1305"
    }

    fn key_len(&self) -> usize {
        32
    }

    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, LedgerError> {
        let cipher = Self::cipher(key)?;
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let sealed = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| LedgerError::CryptoError(format!("Encryption failed: {}", e)))?;

        let mut out = nonce.to_vec();
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn decrypt(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, LedgerError> {
        let cipher = Self::cipher(key)?;
        let (nonce, sealed) = split_nonce(data)?;
        cipher
            .decrypt(chacha20poly1305::Nonce::from_slice(nonce), sealed)
            .map_err(|e| LedgerError::CryptoError(format!("Decryption failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_then_decrypt() {
        for algo in [&Aes256GcmEncryption as &dyn EncryptionAlgorithm, &ChaCha20Poly1305Encryption] {
            let key = algo.generate_key();
            let sealed = algo.encrypt(&key, b"private key material").unwrap();
            assert_ne!(&sealed[AEAD_NONCE_SIZE..], b"private key material");
            assert_eq!(algo.decrypt(&key, &sealed).unwrap(), b"private key material");
        }
    }

    #[test]
    fn test_wrong_key_fails() {
        let algo = Aes256GcmEncryption;
        let sealed = algo.encrypt(&algo.generate_key(), b"secret").unwrap();
        assert!(algo.decrypt(&algo.generate_key(), &sealed).is_err());
    }

    #[test]
    fn test_truncated_ciphertext_fails() {
        let algo = ChaCha20Poly1305Encryption;
        let key = algo.generate_key();
        assert!(algo.decrypt(&key, &[0u8; 4]).is_err());
    }

    #[test]
    fn test_bad_key_length() {
        assert!(Aes256GcmEncryption.encrypt(&[1, 2, 3], b"x").is_err());
    }
}
