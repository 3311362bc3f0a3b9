use core::marker::PhantomData;
use std::sync::Arc;

use anyhow::{ensure, Result};
use helper_functions::{accessors, misc};
use log::debug;
use typenum::Unsigned as _;
use types::{
    config::Config,
    phase0::{
        beacon_state::BeaconState,
        consts::{DOMAIN_BEACON_PROPOSER, GENESIS_EPOCH},
        primitives::{CommitteeIndex, Epoch, Gwei, PublicKeyBytes, Slot, ValidatorIndex},
    },
    preset::Preset,
};

use crate::{epoch_shuffling::EpochShuffling, error::Error};

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CommitteeAssignment {
    pub committee: Vec<ValidatorIndex>,
    pub committee_index: CommitteeIndex,
    pub slot: Slot,
}

/// Shufflings, proposers and totals for the epoch of the state it was derived from.
///
/// Cloning is cheap. Shufflings are shared and `pubkey2index` is a persistent map.
#[derive(Clone, Debug)]
pub struct EpochContext<P: Preset> {
    epoch: Epoch,
    pubkey2index: im::HashMap<PublicKeyBytes, ValidatorIndex>,
    previous_shuffling: Arc<EpochShuffling>,
    current_shuffling: Arc<EpochShuffling>,
    next_shuffling: Arc<EpochShuffling>,
    proposers: Arc<[ValidatorIndex]>,
    total_active_balance: Gwei,
    churn_limit: u64,
    phantom: PhantomData<P>,
}

impl<P: Preset> EpochContext<P> {
    /// Derives everything from scratch.
    pub fn load(config: &Config, state: &BeaconState<P>) -> Result<Self> {
        let epoch = accessors::get_current_epoch(state);

        let current_shuffling = Arc::new(EpochShuffling::compute(state, epoch));

        let previous_shuffling = if epoch == GENESIS_EPOCH {
            current_shuffling.clone()
        } else {
            Arc::new(EpochShuffling::compute(state, epoch - 1))
        };

        let next_shuffling = Arc::new(EpochShuffling::compute(state, epoch + 1));

        let mut epoch_context = Self {
            epoch,
            pubkey2index: im::HashMap::new(),
            previous_shuffling,
            current_shuffling,
            next_shuffling,
            proposers: Arc::new([]),
            total_active_balance: 0,
            churn_limit: 0,
            phantom: PhantomData,
        };

        epoch_context.sync_pubkeys(state);
        epoch_context.refresh_current_epoch(config, state)?;

        debug!(
            "loaded epoch context for epoch {epoch} \
             (validators: {}, active validators: {})",
            epoch_context.pubkey2index.len(),
            epoch_context.current_shuffling.active_indices().len(),
        );

        Ok(epoch_context)
    }

    /// Moves the context into the epoch `state` has just entered.
    ///
    /// Must be called once after the slot of `state` crosses an epoch boundary.
    pub fn rotate(&mut self, config: &Config, state: &BeaconState<P>) -> Result<()> {
        let state_epoch = accessors::get_current_epoch(state);

        ensure!(
            state_epoch == self.epoch + 1,
            Error::RotationMismatch {
                context_epoch: self.epoch,
                state_epoch,
            },
        );

        self.epoch = state_epoch;
        self.previous_shuffling = core::mem::replace(
            &mut self.current_shuffling,
            self.next_shuffling.clone(),
        );
        self.next_shuffling = Arc::new(EpochShuffling::compute(state, state_epoch + 1));

        self.sync_pubkeys(state);
        self.refresh_current_epoch(config, state)?;

        debug!(
            "rotated epoch context to epoch {state_epoch} \
             (active validators: {}, total active balance: {}, churn limit: {})",
            self.current_shuffling.active_indices().len(),
            self.total_active_balance,
            self.churn_limit,
        );

        Ok(())
    }

    /// Adds validators appended to the registry since the last call.
    ///
    /// Existing entries are never removed or changed.
    pub fn sync_pubkeys(&mut self, state: &BeaconState<P>) {
        let synced = self.pubkey2index.len();

        for (validator, index) in state.validators.iter().zip(0..).skip(synced) {
            self.pubkey2index.entry(validator.pubkey).or_insert(index);
        }
    }

    #[must_use]
    pub fn pubkey_index(&self, pubkey: &PublicKeyBytes) -> Option<ValidatorIndex> {
        self.pubkey2index.get(pubkey).copied()
    }

    #[must_use]
    pub fn synced_validator_count(&self) -> usize {
        self.pubkey2index.len()
    }

    #[must_use]
    pub const fn epoch(&self) -> Epoch {
        self.epoch
    }

    #[must_use]
    pub const fn total_active_balance(&self) -> Gwei {
        self.total_active_balance
    }

    #[must_use]
    pub const fn churn_limit(&self) -> u64 {
        self.churn_limit
    }

    #[must_use]
    pub fn proposers(&self) -> &[ValidatorIndex] {
        &self.proposers
    }

    #[must_use]
    pub fn previous_shuffling(&self) -> &EpochShuffling {
        &self.previous_shuffling
    }

    #[must_use]
    pub fn current_shuffling(&self) -> &EpochShuffling {
        &self.current_shuffling
    }

    #[must_use]
    pub fn next_shuffling(&self) -> &EpochShuffling {
        &self.next_shuffling
    }

    pub fn shuffling_at_epoch(&self, epoch: Epoch) -> Result<&EpochShuffling> {
        if epoch == self.epoch {
            return Ok(&self.current_shuffling);
        }

        if epoch == self.epoch + 1 {
            return Ok(&self.next_shuffling);
        }

        if epoch + 1 == self.epoch {
            return Ok(&self.previous_shuffling);
        }

        Err(Error::EpochOutOfRange {
            epoch,
            current_epoch: self.epoch,
        }
        .into())
    }

    pub fn get_beacon_proposer(&self, slot: Slot) -> Result<ValidatorIndex> {
        let start_slot = misc::compute_start_slot_at_epoch::<P>(self.epoch);

        slot.checked_sub(start_slot)
            .and_then(|offset| usize::try_from(offset).ok())
            .and_then(|offset| self.proposers.get(offset))
            .copied()
            .ok_or_else(|| {
                Error::OutOfRange {
                    slot,
                    epoch: self.epoch,
                }
                .into()
            })
    }

    pub fn get_beacon_committee(
        &self,
        slot: Slot,
        committee_index: CommitteeIndex,
    ) -> Result<&[ValidatorIndex]> {
        self.shuffling_at_epoch(misc::compute_epoch_at_slot::<P>(slot))?
            .committee::<P>(slot, committee_index)
    }

    pub fn get_committee_count_at_slot(&self, slot: Slot) -> Result<u64> {
        self.shuffling_at_epoch(misc::compute_epoch_at_slot::<P>(slot))
            .map(EpochShuffling::committees_per_slot)
    }

    /// Finds the committee validator `validator_index` is assigned to in `epoch`.
    ///
    /// `epoch` must be the current or the next one.
    pub fn get_committee_assignment(
        &self,
        epoch: Epoch,
        validator_index: ValidatorIndex,
    ) -> Result<Option<CommitteeAssignment>> {
        ensure!(
            epoch == self.epoch || epoch == self.epoch + 1,
            Error::EpochOutOfRange {
                epoch,
                current_epoch: self.epoch,
            },
        );

        let assignment = self
            .shuffling_at_epoch(epoch)?
            .committees::<P>()
            .find(|(_, _, committee)| committee.contains(&validator_index))
            .map(|(slot, committee_index, committee)| CommitteeAssignment {
                committee: committee.to_vec(),
                committee_index,
                slot,
            });

        Ok(assignment)
    }

    fn refresh_current_epoch(&mut self, config: &Config, state: &BeaconState<P>) -> Result<()> {
        let active_indices = self.current_shuffling.active_indices();

        self.total_active_balance =
            accessors::get_total_balance(state, active_indices.iter().copied())?;

        self.churn_limit =
            accessors::get_validator_churn_limit(config, active_indices.len() as u64);

        self.proposers = compute_proposers(state, &self.current_shuffling)?;

        Ok(())
    }
}

fn compute_proposers<P: Preset>(
    state: &BeaconState<P>,
    shuffling: &EpochShuffling,
) -> Result<Arc<[ValidatorIndex]>> {
    let epoch = shuffling.epoch();
    let epoch_seed = accessors::get_seed(state, epoch, DOMAIN_BEACON_PROPOSER);
    let start_slot = misc::compute_start_slot_at_epoch::<P>(epoch);

    (start_slot..start_slot + P::SlotsPerEpoch::U64)
        .map(|slot| {
            let seed = hashing::hash_256_64(epoch_seed, slot);
            misc::compute_proposer_index(state, shuffling.active_indices(), seed)
        })
        .collect()
}
