use core::{
    fmt::Debug,
    hash::Hash,
    marker::PhantomData,
    ops::{Deref, DerefMut},
};

use derivative::Derivative;
use ethereum_types::H256;
use typenum::Unsigned;

use crate::{
    contiguous_list::usize_index, error::IndexError, error::ReadError, merkle,
    porcelain::SszHash,
};

/// SSZ `Vector[T, N]`.
#[derive(Derivative)]
#[derivative(
    Clone(bound = "T: Clone"),
    PartialEq(bound = "T: PartialEq"),
    Eq(bound = "T: Eq"),
    Hash(bound = "T: Hash"),
    Debug(bound = "T: Debug", transparent = "true")
)]
pub struct ContiguousVector<T, N> {
    elements: Box<[T]>,
    #[derivative(Debug = "ignore")]
    phantom: PhantomData<N>,
}

impl<T: Default, N: Unsigned> Default for ContiguousVector<T, N> {
    fn default() -> Self {
        Self::new_unchecked(core::iter::repeat_with(T::default).take(N::USIZE).collect())
    }
}

impl<T, N> Deref for ContiguousVector<T, N> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        &self.elements
    }
}

impl<T, N> DerefMut for ContiguousVector<T, N> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.elements
    }
}

impl<T, N: Unsigned> TryFrom<Vec<T>> for ContiguousVector<T, N> {
    type Error = ReadError;

    fn try_from(elements: Vec<T>) -> Result<Self, Self::Error> {
        let expected = N::USIZE;
        let actual = elements.len();

        if actual != expected {
            return Err(ReadError::VectorSizeMismatch { expected, actual });
        }

        Ok(Self::new_unchecked(elements.into_boxed_slice()))
    }
}

impl<'vector, T, N> IntoIterator for &'vector ContiguousVector<T, N> {
    type Item = &'vector T;
    type IntoIter = <&'vector [T] as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: SszHash, N: Unsigned> SszHash for ContiguousVector<T, N> {
    fn hash_tree_root(&self) -> H256 {
        let depth = merkle::depth_for_chunks(merkle::chunk_count::<T>(N::USIZE));

        if T::PACKING_FACTOR == 1 {
            merkle::merkleize_chunks(self.iter().map(SszHash::hash_tree_root), depth)
        } else {
            merkle::merkleize_packed(self, depth)
        }
    }
}

impl<T, N: Unsigned> ContiguousVector<T, N> {
    #[must_use]
    pub fn repeat_element(element: T) -> Self
    where
        T: Clone,
    {
        Self::new_unchecked(vec![element; N::USIZE].into_boxed_slice())
    }

    pub fn try_from_iter(elements: impl IntoIterator<Item = T>) -> Result<Self, ReadError> {
        Vec::from_iter(elements).try_into()
    }

    pub fn get(&self, index: u64) -> Result<&T, IndexError> {
        let index = usize_index(index)?;

        self.elements.get(index).ok_or(IndexError::OutOfBounds {
            length: N::USIZE,
            index,
        })
    }

    /// Accesses the element at `index` modulo the length of the vector.
    ///
    /// This is how all circular buffers in `BeaconState` are indexed.
    #[must_use]
    pub fn mod_index(&self, index: u64) -> &T {
        &self.elements[Self::reduce(index)]
    }

    pub fn mod_index_mut(&mut self, index: u64) -> &mut T {
        &mut self.elements[Self::reduce(index)]
    }

    #[expect(
        clippy::cast_possible_truncation,
        reason = "the remainder is less than N, which fits in usize"
    )]
    const fn reduce(index: u64) -> usize {
        (index % N::U64) as usize
    }

    const fn new_unchecked(elements: Box<[T]>) -> Self {
        Self {
            elements,
            phantom: PhantomData,
        }
    }
}
