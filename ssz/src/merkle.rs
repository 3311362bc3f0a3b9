// Trees are built bottom-up one layer at a time. Missing leaves on the right are filled in with
// roots of empty subtrees from `hashing::ZERO_HASHES`, so the cost depends on the number of
// actual chunks rather than on the limit of the collection.

use ethereum_types::H256;
use hashing::ZERO_HASHES;

use crate::porcelain::SszHash;

pub const BYTES_PER_CHUNK: usize = 32;

/// Depth of the smallest tree with at least `chunk_count` leaves.
#[must_use]
pub const fn depth_for_chunks(chunk_count: usize) -> usize {
    chunk_count.next_power_of_two().trailing_zeros() as usize
}

/// Number of chunks needed to hold `element_count` values of type `T`.
#[must_use]
pub const fn chunk_count<T: SszHash>(element_count: usize) -> usize {
    element_count.div_ceil(T::PACKING_FACTOR)
}

#[must_use]
pub fn merkleize_chunks(chunks: impl IntoIterator<Item = H256>, depth: usize) -> H256 {
    let mut layer = chunks.into_iter().collect::<Vec<_>>();

    assert!(
        layer.len() <= 1 << depth,
        "{} chunks do not fit in a tree of depth {depth}",
        layer.len(),
    );

    if layer.is_empty() {
        return ZERO_HASHES[depth];
    }

    for height in 0..depth {
        if layer.len() % 2 == 1 {
            layer.push(ZERO_HASHES[height]);
        }

        layer = layer
            .chunks_exact(2)
            .map(|pair| hashing::hash_256_256(pair[0], pair[1]))
            .collect();
    }

    layer[0]
}

#[must_use]
pub fn merkleize_bytes(bytes: impl AsRef<[u8]>, depth: usize) -> H256 {
    let chunks = bytes.as_ref().chunks(BYTES_PER_CHUNK).map(|partial_chunk| {
        let mut chunk = H256::zero();
        chunk[..partial_chunk.len()].copy_from_slice(partial_chunk);
        chunk
    });

    merkleize_chunks(chunks, depth)
}

#[must_use]
pub fn merkleize_packed<T: SszHash>(values: &[T], depth: usize) -> H256 {
    let size = BYTES_PER_CHUNK / T::PACKING_FACTOR;

    let chunks = values.chunks(T::PACKING_FACTOR).map(|pack| {
        let mut chunk = H256::zero();

        chunk
            .as_bytes_mut()
            .chunks_exact_mut(size)
            .zip(pack)
            .for_each(|(destination, value)| value.write_packed(destination));

        chunk
    });

    merkleize_chunks(chunks, depth)
}

#[must_use]
pub fn mix_in_length(root: H256, length: usize) -> H256 {
    let mut length_chunk = H256::zero();
    let length = u64::try_from(length).expect("collection lengths should fit in u64");
    length_chunk[..size_of::<u64>()].copy_from_slice(&length.to_le_bytes());
    hashing::hash_256_256(root, length_chunk)
}
