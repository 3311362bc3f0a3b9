use core::{marker::PhantomData, ops::Deref};

use bitvec::{boxed::BitBox, order::Lsb0, slice::BitSlice, vec::BitVec};
use derivative::Derivative;
use ethereum_types::H256;
use typenum::Unsigned;

use crate::{error::ReadError, merkle, porcelain::SszHash};

const BITS_PER_CHUNK: usize = merkle::BYTES_PER_CHUNK * 8;

/// SSZ `Bitlist[N]`.
///
/// Bits past the length are always zero. Only in-bounds bits can be modified through the slice.
#[derive(Derivative)]
#[derivative(
    Clone(bound = ""),
    PartialEq(bound = ""),
    Eq(bound = ""),
    Hash(bound = ""),
    Default(bound = ""),
    Debug(bound = "")
)]
pub struct BitList<N> {
    bits: BitBox<u8, Lsb0>,
    #[derivative(Debug = "ignore")]
    phantom: PhantomData<N>,
}

impl<N> Deref for BitList<N> {
    type Target = BitSlice<u8, Lsb0>;

    fn deref(&self) -> &Self::Target {
        &self.bits
    }
}

impl<N: Unsigned> SszHash for BitList<N> {
    fn hash_tree_root(&self) -> H256 {
        let depth = merkle::depth_for_chunks(N::USIZE.div_ceil(BITS_PER_CHUNK));
        let root = merkle::merkleize_bytes(self.bits.as_raw_slice(), depth);
        merkle::mix_in_length(root, self.len())
    }
}

impl<N: Unsigned> BitList<N> {
    /// Creates a list of `length` zero bits.
    ///
    /// # Panics
    ///
    /// Panics if `length` exceeds `N`. Lengths passed in come from committee sizes, which are
    /// bounded by the validator registry and cannot exceed the limit.
    #[must_use]
    pub fn with_length(length: usize) -> Self {
        assert!(length <= N::USIZE);
        Self::new_unchecked(BitVec::repeat(false, length))
    }

    pub fn try_from_bits(bits: impl IntoIterator<Item = bool>) -> Result<Self, ReadError> {
        let bits = BitVec::<u8, Lsb0>::from_iter(bits);
        let maximum = N::USIZE;
        let actual = bits.len();

        if actual > maximum {
            return Err(ReadError::BitListTooLong { maximum, actual });
        }

        Ok(Self::new_unchecked(bits))
    }

    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn set(&mut self, index: usize, value: bool) {
        self.bits.set(index, value);
    }

    fn new_unchecked(mut bits: BitVec<u8, Lsb0>) -> Self {
        bits.set_uninitialized(false);

        Self {
            bits: bits.into_boxed_bitslice(),
            phantom: PhantomData,
        }
    }
}
