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
    error::{IndexError, PushError, ReadError},
    merkle,
    porcelain::SszHash,
};

/// SSZ `List[T, N]`.
///
/// Dereferences to a slice so that elements can be modified in place but the length can only be
/// changed through methods that enforce the limit.
#[derive(Derivative)]
#[derivative(
    Clone(bound = "T: Clone"),
    PartialEq(bound = "T: PartialEq"),
    Eq(bound = "T: Eq"),
    Hash(bound = "T: Hash"),
    Default(bound = ""),
    Debug(bound = "T: Debug", transparent = "true")
)]
pub struct ContiguousList<T, N> {
    elements: Vec<T>,
    #[derivative(Debug = "ignore")]
    phantom: PhantomData<N>,
}

impl<T, N> Deref for ContiguousList<T, N> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        self.elements.as_slice()
    }
}

impl<T, N> DerefMut for ContiguousList<T, N> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.elements.as_mut_slice()
    }
}

impl<T, N: Unsigned> TryFrom<Vec<T>> for ContiguousList<T, N> {
    type Error = ReadError;

    fn try_from(elements: Vec<T>) -> Result<Self, Self::Error> {
        Self::validate_length(elements.len())?;
        Ok(Self::new_unchecked(elements))
    }
}

impl<T, N> IntoIterator for ContiguousList<T, N> {
    type Item = T;
    type IntoIter = <Vec<T> as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.into_iter()
    }
}

impl<'list, T, N> IntoIterator for &'list ContiguousList<T, N> {
    type Item = &'list T;
    type IntoIter = <&'list [T] as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: SszHash, N: Unsigned> SszHash for ContiguousList<T, N> {
    fn hash_tree_root(&self) -> H256 {
        let depth = merkle::depth_for_chunks(merkle::chunk_count::<T>(N::USIZE));

        let root = if T::PACKING_FACTOR == 1 {
            merkle::merkleize_chunks(self.iter().map(SszHash::hash_tree_root), depth)
        } else {
            merkle::merkleize_packed(self, depth)
        };

        merkle::mix_in_length(root, self.len())
    }
}

impl<T, N: Unsigned> ContiguousList<T, N> {
    pub fn try_from_iter(elements: impl IntoIterator<Item = T>) -> Result<Self, ReadError> {
        Vec::from_iter(elements).try_into()
    }

    pub fn push(&mut self, element: T) -> Result<(), PushError> {
        if self.elements.len() >= N::USIZE {
            return Err(PushError::ListFull);
        }

        self.elements.push(element);

        Ok(())
    }

    pub fn get(&self, index: u64) -> Result<&T, IndexError> {
        let length = self.len();
        let index = usize_index(index)?;

        self.elements
            .get(index)
            .ok_or(IndexError::OutOfBounds { length, index })
    }

    pub fn get_mut(&mut self, index: u64) -> Result<&mut T, IndexError> {
        let length = self.len();
        let index = usize_index(index)?;

        self.elements
            .get_mut(index)
            .ok_or(IndexError::OutOfBounds { length, index })
    }

    #[must_use]
    pub fn len_u64(&self) -> u64 {
        self.elements.len() as u64
    }

    pub fn clear(&mut self) {
        self.elements.clear();
    }

    const fn new_unchecked(elements: Vec<T>) -> Self {
        Self {
            elements,
            phantom: PhantomData,
        }
    }

    const fn validate_length(actual: usize) -> Result<(), ReadError> {
        let maximum = N::USIZE;

        if actual > maximum {
            return Err(ReadError::ListTooLong { maximum, actual });
        }

        Ok(())
    }
}

pub fn usize_index(index: u64) -> Result<usize, IndexError> {
    index
        .try_into()
        .map_err(|_| IndexError::DoesNotFitInUsize { index })
}
