//! SHA-256 with fixed-width inputs.
//!
//! Each function is named after the bit widths of its inputs in the order they are concatenated.
//! Integers are encoded in little-endian byte order.

use ethereum_types::H256;
use once_cell::sync::Lazy;
use sha2::{Digest as _, Sha256};

/// Deepest tree that can be merkleized with [`ZERO_HASHES`].
///
/// Validator and balance lists in `BeaconState` have a limit of 2⁴⁰ and need the deepest trees.
pub const MAX_ZERO_HASH_DEPTH: usize = 40;

/// Roots of Merkle trees of all heights whose leaves are all zero.
pub static ZERO_HASHES: Lazy<[H256; MAX_ZERO_HASH_DEPTH + 1]> = Lazy::new(|| {
    let mut zero_hashes = [H256::zero(); MAX_ZERO_HASH_DEPTH + 1];

    for height in 1..=MAX_ZERO_HASH_DEPTH {
        let lower = zero_hashes[height - 1];
        zero_hashes[height] = hash_256_256(lower, lower);
    }

    zero_hashes
});

#[inline]
#[must_use]
pub fn hash_bytes(bytes: impl AsRef<[u8]>) -> H256 {
    finish(Sha256::new().chain_update(bytes))
}

#[inline]
#[must_use]
pub fn hash_64(value: u64) -> H256 {
    hash_bytes(value.to_le_bytes())
}

#[inline]
#[must_use]
pub fn hash_256(bytes: H256) -> H256 {
    hash_bytes(bytes)
}

#[inline]
#[must_use]
pub fn hash_256_8(a: H256, b: u8) -> H256 {
    finish(Sha256::new().chain_update(a).chain_update([b]))
}

#[inline]
#[must_use]
pub fn hash_256_8_32(a: H256, b: u8, c: u32) -> H256 {
    finish(
        Sha256::new()
            .chain_update(a)
            .chain_update([b])
            .chain_update(c.to_le_bytes()),
    )
}

#[inline]
#[must_use]
pub fn hash_256_64(a: H256, b: u64) -> H256 {
    finish(Sha256::new().chain_update(a).chain_update(b.to_le_bytes()))
}

#[inline]
#[must_use]
pub fn hash_32_64_256(a: [u8; 4], b: u64, c: H256) -> H256 {
    finish(
        Sha256::new()
            .chain_update(a)
            .chain_update(b.to_le_bytes())
            .chain_update(c),
    )
}

#[inline]
#[must_use]
pub fn hash_256_256(left: H256, right: H256) -> H256 {
    finish(Sha256::new().chain_update(left).chain_update(right))
}

// This function is only ever called with `SignatureBytes`,
// but that can't be the type of the parameter due to a circular dependency.
#[inline]
#[must_use]
pub fn hash_768(bytes: impl AsRef<[u8; 96]>) -> H256 {
    hash_bytes(bytes.as_ref())
}

fn finish(hasher: Sha256) -> H256 {
    H256(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;
    use itertools::Itertools as _;

    use super::*;

    #[test]
    fn higher_zero_hashes_are_calculated_from_lower_ones() {
        for (lower, higher) in ZERO_HASHES.iter().copied().tuple_windows() {
            assert_eq!(hash_256_256(lower, lower), higher);
        }
    }

    #[test]
    fn zero_hashes_match_known_values() {
        assert_eq!(ZERO_HASHES[0], H256::zero());
        assert_eq!(
            ZERO_HASHES[1],
            H256(hex!(
                "f5a5fd42d16a20302798ef6ed309979b43003d2320d9f0e8ea9831a92759fb4b"
            )),
        );
        assert_eq!(
            ZERO_HASHES[32],
            H256(hex!(
                "c6f67e02e6e4e1bdefb994c6098953f34636ba2b6ca20a4721d2b26a886722ff"
            )),
        );
    }

    #[test]
    fn fixed_width_helpers_agree_with_plain_hashing() {
        let root = H256::repeat_byte(0xab);

        let mut bytes = root.as_bytes().to_vec();
        bytes.push(7);
        bytes.extend_from_slice(&3_u32.to_le_bytes());

        assert_eq!(hash_256_8_32(root, 7, 3), hash_bytes(bytes));
        assert_eq!(hash_64(1), hash_bytes(1_u64.to_le_bytes()));
    }
}
