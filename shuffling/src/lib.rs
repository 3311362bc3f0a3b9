//! Swap-or-not shuffling.
//!
//! Each round is an involution that swaps every index with its mirror around a pivot depending on
//! a bit of a hash. [`shuffle_single`] follows one index forward through all rounds.
//! [`shuffle_slice`] permutes a whole slice at once by applying the rounds in reverse order, which
//! makes `slice[i]` end up holding the element originally at `shuffle_single(i)`.

use core::num::NonZeroU64;

use bit_field::BitArray as _;
use types::{phase0::primitives::H256, preset::Preset};

const BITS_PER_HASH: u64 = H256::len_bytes() as u64 * 8;

pub fn shuffle_slice<P: Preset, T>(slice: &mut [T], seed: H256) {
    let Some(index_count) = NonZeroU64::new(slice.len() as u64) else {
        return;
    };

    for round in (0..P::SHUFFLE_ROUND_COUNT).rev() {
        let pivot = compute_pivot(seed, round, index_count);
        let mut sources = SourceCache::new(seed, round);

        for index in 0..index_count.get() {
            let flip = (pivot + index_count.get() - index) % index_count;

            // Every pair is visited twice. Only swap on the visit from the lower index.
            if index >= flip {
                continue;
            }

            if sources.bit(flip) {
                slice.swap(usize_from(index), usize_from(flip));
            }
        }
    }
}

/// Computes the position that the element at `index` is moved to.
///
/// # Panics
///
/// Panics if `index` is not less than `index_count`.
#[must_use]
pub fn shuffle_single<P: Preset>(mut index: u64, index_count: NonZeroU64, seed: H256) -> u64 {
    assert!(index < index_count.get());

    for round in 0..P::SHUFFLE_ROUND_COUNT {
        let pivot = compute_pivot(seed, round, index_count);
        let flip = (pivot + index_count.get() - index) % index_count;
        let position = index.max(flip);

        if SourceCache::new(seed, round).bit(position) {
            index = flip;
        }
    }

    index
}

fn compute_pivot(seed: H256, round: u8, index_count: NonZeroU64) -> u64 {
    let hash = hashing::hash_256_8(seed, round);
    let mut bytes = [0; size_of::<u64>()];
    bytes.copy_from_slice(&hash[..size_of::<u64>()]);
    u64::from_le_bytes(bytes) % index_count
}

// Consecutive positions mostly fall into the same 256 bit window, so the last source is kept.
struct SourceCache {
    seed: H256,
    round: u8,
    window: Option<(u64, H256)>,
}

impl SourceCache {
    const fn new(seed: H256, round: u8) -> Self {
        Self {
            seed,
            round,
            window: None,
        }
    }

    fn bit(&mut self, position: u64) -> bool {
        let window = position / BITS_PER_HASH;

        let source = match self.window {
            Some((cached_window, source)) if cached_window == window => source,
            _ => {
                // Truncate to match `compute_shuffled_index` in `consensus-specs`.
                #[expect(clippy::cast_possible_truncation)]
                let source = hashing::hash_256_8_32(self.seed, self.round, window as u32);
                self.window = Some((window, source));
                source
            }
        };

        source
            .as_bytes()
            .get_bit(usize_from(position % BITS_PER_HASH))
    }
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "indices come from slice lengths, which fit in usize"
)]
const fn usize_from(index: u64) -> usize {
    index as usize
}

#[cfg(test)]
mod tests {
    use itertools::Itertools as _;
    use test_case::test_case;
    use types::preset::{Mainnet, Minimal};

    use super::*;

    #[test]
    fn shuffle_single_matches_reference_values() {
        let seed = H256::repeat_byte(1);
        let count = NonZeroU64::new(10).expect("10 is nonzero");

        let mapping = (0..10)
            .map(|index| shuffle_single::<Minimal>(index, count, seed))
            .collect_vec();

        assert_eq!(mapping, [1, 3, 6, 9, 0, 8, 2, 5, 4, 7]);
    }

    #[test]
    fn shuffle_single_matches_reference_values_across_windows() {
        let seed = H256::repeat_byte(2);
        let count = NonZeroU64::new(300).expect("300 is nonzero");

        let mapping = (0..300)
            .step_by(50)
            .map(|index| shuffle_single::<Minimal>(index, count, seed))
            .collect_vec();

        assert_eq!(mapping, [133, 235, 124, 69, 106, 56]);
    }

    #[test_case(0)]
    #[test_case(1)]
    #[test_case(2)]
    #[test_case(33)]
    #[test_case(300)]
    #[test_case(777)]
    fn shuffle_slice_agrees_with_shuffle_single(count: u64) {
        let seed = H256::repeat_byte(0x42);
        let mut shuffled = (0..count).collect_vec();

        shuffle_slice::<Minimal, _>(&mut shuffled, seed);

        let expected = NonZeroU64::new(count).map_or_else(Vec::new, |index_count| {
            (0..count)
                .map(|index| shuffle_single::<Minimal>(index, index_count, seed))
                .collect_vec()
        });

        assert_eq!(shuffled, expected);
    }

    #[test]
    fn shuffle_slice_is_a_permutation() {
        let mut shuffled = (0..1000_u64).collect_vec();

        shuffle_slice::<Mainnet, _>(&mut shuffled, H256::repeat_byte(7));

        assert_ne!(shuffled, (0..1000).collect_vec());
        assert_eq!(shuffled.iter().copied().sorted().collect_vec(), (0..1000).collect_vec());
    }
}
