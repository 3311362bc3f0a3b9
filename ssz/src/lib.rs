//! Merkleization of consensus containers.
//!
//! Only `hash_tree_root` is implemented. Encoding and decoding are left to storage and networking.

// These are re-exported primarily to make `ssz_derive` work without additional dependencies.
pub use ethereum_types::{H256, H32};
pub use hashing;
pub use ssz_derive::Ssz;

pub use crate::{
    bit_list::BitList,
    bit_vector::BitVector,
    contiguous_list::ContiguousList,
    contiguous_vector::ContiguousVector,
    error::{IndexError, PushError, ReadError},
    merkle::{
        chunk_count, depth_for_chunks, merkleize_bytes, merkleize_chunks, merkleize_packed,
        mix_in_length, BYTES_PER_CHUNK,
    },
    porcelain::SszHash,
};

mod basic;
mod bit_list;
mod bit_vector;
mod contiguous_list;
mod contiguous_vector;
mod error;
mod merkle;
mod porcelain;
