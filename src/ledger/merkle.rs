//! Merkle Tree for Ledger Pages
//!
//! Builds the per-page Merkle tree over entry hashes and produces inclusion
//! proofs. Leaves keep insertion order. Each internal node is
//! `H(left || right)` over the hex renderings of its children; a level with an
//! odd node count pairs its last node with itself.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crypto::HashAlgorithm;
use crate::error::LedgerError;

/// Which side of the running hash a proof sibling sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiblingSide {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub hash: String,
    pub side: SiblingSide,
}

/// Inclusion proof for one leaf, siblings ordered bottom-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf_hash: String,
    pub leaf_index: usize,
    pub siblings: Vec<ProofStep>,
    pub root_hash: String,
}

impl MerkleProof {
    /// Fold the siblings into the leaf hash.
    pub fn compute_root(&self, hash_algorithm: &dyn HashAlgorithm) -> String {
        self.siblings
            .iter()
            .fold(self.leaf_hash.clone(), |current, step| match step.side {
                SiblingSide::Right => combine(hash_algorithm, &current, &step.hash),
                SiblingSide::Left => combine(hash_algorithm, &step.hash, &current),
            })
    }
}

/// Check that `proof` folds to its claimed root.
pub fn verify_merkle_proof(hash_algorithm: &dyn HashAlgorithm, proof: &MerkleProof) -> bool {
    proof.compute_root(hash_algorithm) == proof.root_hash
}

/// Hash of an internal node.
pub fn combine(hash_algorithm: &dyn HashAlgorithm, left: &str, right: &str) -> String {
    let combined = format!("{}{}", left, right);
    hash_algorithm.hash_hex(combined.as_bytes())
}

/// All levels of the tree, leaves first, root level last.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    levels: Vec<Vec<String>>,
}

impl MerkleTree {
    pub fn build(
        leaves: &[String],
        hash_algorithm: &dyn HashAlgorithm,
    ) -> Result<Self, LedgerError> {
        if leaves.is_empty() {
            return Err(LedgerError::InvalidInput(
                "Cannot build Merkle tree from empty entries".to_string(),
            ));
        }

        let mut levels = vec![leaves.to_vec()];
        while let Some(level) = levels.last().filter(|level| level.len() > 1) {
            let next_level: Vec<String> = level
                .chunks(2)
                .map(|pair| {
                    let left = &pair[0];
                    let right = pair.get(1).unwrap_or(left);
                    combine(hash_algorithm, left, right)
                })
                .collect();
            levels.push(next_level);
        }

        let tree = Self { levels };
        debug!("Merkle tree over {} leaves, root {}", leaves.len(), tree.root());
        Ok(tree)
    }

    pub fn root(&self) -> &str {
        // build() guarantees at least one level holding at least one node
        &self.levels[self.levels.len() - 1][0]
    }

    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    pub fn proof(&self, leaf_index: usize) -> Result<MerkleProof, LedgerError> {
        if leaf_index >= self.leaf_count() {
            return Err(LedgerError::InvalidInput(format!(
                "Leaf index {} out of range for {} leaves",
                leaf_index,
                self.leaf_count()
            )));
        }

        let mut siblings = Vec::with_capacity(self.levels.len().saturating_sub(1));
        let mut index = leaf_index;
        for level in &self.levels[..self.levels.len() - 1] {
            let step = if index % 2 == 0 {
                ProofStep {
                    hash: level.get(index + 1).unwrap_or(&level[index]).clone(),
                    side: SiblingSide::Right,
                }
            } else {
                ProofStep {
                    hash: level[index - 1].clone(),
                    side: SiblingSide::Left,
                }
            };
            siblings.push(step);
            index /= 2;
        }

        Ok(MerkleProof {
            leaf_hash: self.levels[0][leaf_index].clone(),
            leaf_index,
            siblings,
            root_hash: self.root().to_string(),
        })
    }
}

/// Merkle root over `leaves`.
pub fn merkle_root(
    leaves: &[String],
    hash_algorithm: &dyn HashAlgorithm,
) -> Result<String, LedgerError> {
    Ok(MerkleTree::build(leaves, hash_algorithm)?.root().to_string())
}
