use sha2::{Digest, Sha256, Sha512};

use super::encoding::bytes_to_hex;

/// A named digest function.
pub trait HashAlgorithm: Send + Sync {
    fn name(&self) -> &'static str;

    /// Digest width in bytes.
    fn digest_len(&self) -> usize;

    fn digest(&self, data: &[u8]) -> Vec<u8>;

    /// Digest rendered as lowercase hex.
    fn hash_hex(&self, data: &[u8]) -> String {
        bytes_to_hex(&self.digest(data))
    }
}

pub struct Sha256Hash;

impl HashAlgorithm for Sha256Hash {
    fn name(&self) -> &'static str {
        "SHA-256"
    }

    fn digest_len(&self) -> usize {
        32
    }

    fn digest(&self, data: &[u8]) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hasher.finalize().to_vec()
    }
}

pub struct Sha512Hash;

impl HashAlgorithm for Sha512Hash {
    fn name(&self) -> &'static str {
        "SHA-512"
    }

    fn digest_len(&self) -> usize {
        64
    }

    fn digest(&self, data: &[u8]) -> Vec<u8> {
        let mut hasher = Sha512::new();
        hasher.update(data);
        hasher.finalize().to_vec()
    }
}

pub struct Blake3Hash;

impl HashAlgorithm for Blake3Hash {
    fn name(&self) -> &'static str {
        "BLAKE3"
    }

    fn digest_len(&self) -> usize {
        32
    }

    fn digest(&self, data: &[u8]) -> Vec<u8> {
        blake3::hash(data).as_bytes().to_vec()
    }
}
