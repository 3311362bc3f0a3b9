//! Incremental Merkle tree of deposits.
//!
//! The tree mirrors the one maintained by the deposit contract. Roots are computed from the
//! contract's `branch` of left siblings in constant space. Leaves are kept so that proofs can be
//! constructed for any deposit in the tree.

use anyhow::{ensure, Result};
use hashing::ZERO_HASHES;
use ssz::{ContiguousVector, SszHash as _};
use thiserror::Error;
use types::phase0::{
    consts::{DepositProofLength, DEPOSIT_CONTRACT_TREE_DEPTH},
    containers::{Deposit, DepositData},
    primitives::{DepositIndex, H256},
};

const MAX_DEPOSITS: DepositIndex = 1 << DEPOSIT_CONTRACT_TREE_DEPTH;

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct DepositTree {
    branch: [H256; DEPOSIT_CONTRACT_TREE_DEPTH],
    leaves: Vec<H256>,
    pub deposit_count: DepositIndex,
}

impl Default for DepositTree {
    fn default() -> Self {
        Self {
            branch: [H256::zero(); DEPOSIT_CONTRACT_TREE_DEPTH],
            leaves: vec![],
            deposit_count: 0,
        }
    }
}

impl DepositTree {
    pub fn push(&mut self, index: DepositIndex, data: DepositData) -> Result<()> {
        ensure!(index < MAX_DEPOSITS, Error::Full { index });

        ensure!(
            index == self.deposit_count,
            Error::UnexpectedIndex {
                expected: self.deposit_count,
                actual: index,
            },
        );

        let leaf = data.hash_tree_root();
        let mut node = leaf;

        self.deposit_count += 1;

        // Same as `deposit` in the deposit contract.
        let mut size = self.deposit_count;

        for sibling in &mut self.branch {
            if size % 2 == 1 {
                *sibling = node;
                break;
            }

            node = hashing::hash_256_256(*sibling, node);
            size /= 2;
        }

        self.leaves.push(leaf);

        Ok(())
    }

    pub fn push_and_compute_root(
        &mut self,
        index: DepositIndex,
        data: DepositData,
    ) -> Result<H256> {
        self.push(index, data)?;
        Ok(self.root())
    }

    /// Root of the tree with the deposit count mixed in, as stored in `Eth1Data.deposit_root`.
    #[must_use]
    pub fn root(&self) -> H256 {
        let mut node = H256::zero();
        let mut size = self.deposit_count;

        for (sibling, zero_hash) in self.branch.iter().zip(ZERO_HASHES.iter()) {
            if size % 2 == 1 {
                node = hashing::hash_256_256(*sibling, node);
            } else {
                node = hashing::hash_256_256(node, *zero_hash);
            }

            size /= 2;
        }

        ssz::mix_in_length(node, self.leaves.len())
    }

    /// Constructs a proof of the deposit at `index` against the current root.
    ///
    /// The last node of the proof is the mixed in deposit count.
    pub fn proof(&self, index: DepositIndex) -> Result<ContiguousVector<H256, DepositProofLength>> {
        let position = usize::try_from(index)?;

        ensure!(
            position < self.leaves.len(),
            Error::MissingDeposit {
                index,
                deposit_count: self.deposit_count,
            },
        );

        let mut proof = Vec::with_capacity(DEPOSIT_CONTRACT_TREE_DEPTH + 1);
        let mut layer = self.leaves.clone();
        let mut position = position;

        for zero_hash in ZERO_HASHES.iter().take(DEPOSIT_CONTRACT_TREE_DEPTH) {
            let sibling = layer.get(position ^ 1).copied().unwrap_or(*zero_hash);

            proof.push(sibling);

            if layer.len() % 2 == 1 {
                layer.push(*zero_hash);
            }

            layer = layer
                .chunks_exact(2)
                .map(|pair| hashing::hash_256_256(pair[0], pair[1]))
                .collect();

            position /= 2;
        }

        let mut length_chunk = H256::zero();
        length_chunk[..size_of::<DepositIndex>()].copy_from_slice(&self.deposit_count.to_le_bytes());
        proof.push(length_chunk);

        ContiguousVector::try_from(proof).map_err(Into::into)
    }

    /// Wraps `data` into a [`Deposit`] with a proof against the current root.
    pub fn deposit(&self, index: DepositIndex, data: DepositData) -> Result<Deposit> {
        let proof = self.proof(index)?;
        Ok(Deposit { proof, data })
    }
}

#[derive(Debug, Error)]
enum Error {
    #[error("attempted to add deposit with index {index} to full deposit tree")]
    Full { index: DepositIndex },
    #[error("expected deposit with index {expected}, received deposit with index {actual}")]
    UnexpectedIndex {
        expected: DepositIndex,
        actual: DepositIndex,
    },
    #[error("deposit {index} is not in tree with {deposit_count} deposits")]
    MissingDeposit {
        index: DepositIndex,
        deposit_count: DepositIndex,
    },
}
