use core::num::NonZeroU64;
use std::sync::Arc;

use anyhow::{ensure, Result};
use arithmetic::NonZeroExt as _;
use helper_functions::{accessors, misc};
use typenum::Unsigned as _;
use types::{
    phase0::{
        beacon_state::BeaconState,
        consts::DOMAIN_BEACON_ATTESTER,
        primitives::{CommitteeIndex, Epoch, Slot, ValidatorIndex, H256},
    },
    preset::Preset,
};

use crate::error::Error;

/// Committee assignments of one epoch.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct EpochShuffling {
    epoch: Epoch,
    seed: H256,
    // In registry order.
    active_indices: Arc<[ValidatorIndex]>,
    // `shuffled[i]` is `active_indices[compute_shuffled_index(i)]`.
    shuffled: Arc<[ValidatorIndex]>,
    committees_per_slot: NonZeroU64,
}

impl EpochShuffling {
    #[must_use]
    pub fn compute<P: Preset>(state: &BeaconState<P>, epoch: Epoch) -> Self {
        let seed = accessors::get_seed(state, epoch, DOMAIN_BEACON_ATTESTER);

        let active_indices = accessors::active_validator_indices(state, epoch).collect::<Arc<[_]>>();

        let mut shuffled = active_indices.to_vec();
        shuffling::shuffle_slice::<P, _>(&mut shuffled, seed);

        let committees_per_slot =
            misc::committee_count_from_active_validator_count::<P>(active_indices.len() as u64);

        Self {
            epoch,
            seed,
            active_indices,
            shuffled: shuffled.into(),
            committees_per_slot,
        }
    }

    #[must_use]
    pub const fn epoch(&self) -> Epoch {
        self.epoch
    }

    #[must_use]
    pub const fn seed(&self) -> H256 {
        self.seed
    }

    #[must_use]
    pub fn active_indices(&self) -> &[ValidatorIndex] {
        &self.active_indices
    }

    #[must_use]
    pub fn shuffled(&self) -> &[ValidatorIndex] {
        &self.shuffled
    }

    #[must_use]
    pub const fn committees_per_slot(&self) -> u64 {
        self.committees_per_slot.get()
    }

    #[must_use]
    pub fn committee_count<P: Preset>(&self) -> u64 {
        self.committees_per_slot.get() * P::SlotsPerEpoch::U64
    }

    pub fn committee<P: Preset>(
        &self,
        slot: Slot,
        committee_index: CommitteeIndex,
    ) -> Result<&[ValidatorIndex]> {
        ensure!(
            misc::compute_epoch_at_slot::<P>(slot) == self.epoch,
            Error::OutOfRange {
                slot,
                epoch: self.epoch,
            },
        );

        ensure!(
            committee_index < self.committees_per_slot.get(),
            Error::CommitteeIndexOutOfRange {
                index: committee_index,
                committees_per_slot: self.committees_per_slot.get(),
            },
        );

        let index_in_epoch = misc::slots_since_epoch_start::<P>(slot)
            * self.committees_per_slot.get()
            + committee_index;

        let count = self
            .committees_per_slot
            .saturating_mul(P::SlotsPerEpoch::non_zero());

        let range =
            misc::compute_committee_range(self.shuffled.len() as u64, index_in_epoch, count);

        Ok(&self.shuffled[range])
    }

    /// Iterates over `(slot, committee_index, committee)` for every committee in the epoch.
    pub fn committees<P: Preset>(
        &self,
    ) -> impl Iterator<Item = (Slot, CommitteeIndex, &[ValidatorIndex])> + '_ {
        let start_slot = misc::compute_start_slot_at_epoch::<P>(self.epoch);

        (start_slot..start_slot + P::SlotsPerEpoch::U64).flat_map(move |slot| {
            (0..self.committees_per_slot.get()).filter_map(move |committee_index| {
                self.committee::<P>(slot, committee_index)
                    .ok()
                    .map(|committee| (slot, committee_index, committee))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use itertools::Itertools as _;
    use types::preset::Minimal;

    use crate::test_utils;

    use super::*;

    #[test]
    fn committees_partition_active_validators() -> Result<()> {
        let state = test_utils::genesis_state::<Minimal>(64)?;
        let shuffling = EpochShuffling::compute(&state, 0);

        assert_eq!(shuffling.committees_per_slot(), 2);

        let members = shuffling
            .committees::<Minimal>()
            .flat_map(|(_, _, committee)| committee.iter().copied())
            .sorted()
            .collect_vec();

        assert_eq!(members, (0..64).collect_vec());

        Ok(())
    }

    #[test]
    fn shuffled_list_agrees_with_single_index_shuffle() -> Result<()> {
        let state = test_utils::genesis_state::<Minimal>(20)?;
        let shuffling = EpochShuffling::compute(&state, 1);
        let index_count = NonZeroU64::new(20).expect("20 is nonzero");

        for (position, validator_index) in shuffling.shuffled().iter().enumerate() {
            let source = misc::compute_shuffled_index::<Minimal>(
                position as u64,
                index_count,
                shuffling.seed(),
            );

            assert_eq!(*validator_index, shuffling.active_indices()[source as usize]);
        }

        Ok(())
    }

    #[test]
    fn committee_lookup_is_limited_to_its_epoch() -> Result<()> {
        let state = test_utils::genesis_state::<Minimal>(64)?;
        let shuffling = EpochShuffling::compute(&state, 0);

        assert!(shuffling.committee::<Minimal>(7, 1).is_ok());
        assert!(shuffling.committee::<Minimal>(8, 0).is_err());
        assert!(shuffling.committee::<Minimal>(0, 2).is_err());

        Ok(())
    }
}
