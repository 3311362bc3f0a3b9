use core::{marker::PhantomData, ops::Index};

use bitvec::{boxed::BitBox, order::Lsb0, vec::BitVec};
use derivative::Derivative;
use ethereum_types::H256;
use typenum::Unsigned;

use crate::{merkle, porcelain::SszHash};

const BITS_PER_CHUNK: usize = merkle::BYTES_PER_CHUNK * 8;

/// SSZ `Bitvector[N]`.
#[derive(Derivative)]
#[derivative(
    Clone(bound = ""),
    PartialEq(bound = ""),
    Eq(bound = ""),
    Hash(bound = ""),
    Debug(bound = "")
)]
pub struct BitVector<N> {
    bits: BitBox<u8, Lsb0>,
    #[derivative(Debug = "ignore")]
    phantom: PhantomData<N>,
}

impl<N: Unsigned> Default for BitVector<N> {
    fn default() -> Self {
        Self {
            bits: BitVec::repeat(false, N::USIZE).into_boxed_bitslice(),
            phantom: PhantomData,
        }
    }
}

// Indices could be checked statically, but that would only add useless boilerplate.
impl<N> Index<usize> for BitVector<N> {
    type Output = bool;

    fn index(&self, index: usize) -> &Self::Output {
        if self.bits[index] {
            &true
        } else {
            &false
        }
    }
}

impl<N: Unsigned> SszHash for BitVector<N> {
    fn hash_tree_root(&self) -> H256 {
        let depth = merkle::depth_for_chunks(N::USIZE.div_ceil(BITS_PER_CHUNK));
        merkle::merkleize_bytes(self.bits.as_raw_slice(), depth)
    }
}

impl<N: Unsigned> BitVector<N> {
    pub fn set(&mut self, index: usize, value: bool) {
        self.bits.set(index, value);
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<bool> {
        self.bits.get(index).map(|bit| *bit)
    }

    #[must_use]
    pub fn any(&self) -> bool {
        self.bits.any()
    }

    /// Returns `true` if all bits in `indices` are set.
    #[must_use]
    pub fn all_in(&self, indices: core::ops::Range<usize>) -> bool {
        self.bits[indices].all()
    }

    /// Moves every bit to the next higher index, dropping the last one and clearing the first.
    pub fn shift_up_by_1(&mut self) {
        self.bits.shift_right(1);
    }

    #[must_use]
    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        self.bits.iter().by_vals()
    }
}
