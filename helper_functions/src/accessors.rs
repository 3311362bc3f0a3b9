use anyhow::{ensure, Result};
use arithmetic::U64Ext as _;
use itertools::Itertools as _;
use ssz::{BitList, ContiguousList};
use tap::Pipe as _;
use typenum::Unsigned as _;
use types::{
    config::Config,
    phase0::{
        beacon_state::BeaconState,
        consts::BASE_REWARDS_PER_EPOCH,
        containers::{Attestation, IndexedAttestation},
        primitives::{Domain, DomainType, Epoch, Gwei, Slot, ValidatorIndex, H256},
    },
    preset::Preset,
};

use crate::{
    error::Error,
    misc::{compute_domain, compute_epoch_at_slot, compute_start_slot_at_epoch},
    predicates::is_active_validator,
};

#[must_use]
pub fn get_current_epoch<P: Preset>(state: &BeaconState<P>) -> Epoch {
    compute_epoch_at_slot::<P>(state.slot)
}

// > Return the previous epoch (unless the current epoch is ``GENESIS_EPOCH``).
#[must_use]
pub fn get_previous_epoch<P: Preset>(state: &BeaconState<P>) -> Epoch {
    get_current_epoch(state).saturating_sub(1)
}

#[must_use]
pub fn get_next_epoch<P: Preset>(state: &BeaconState<P>) -> Epoch {
    get_current_epoch(state) + 1
}

pub fn get_block_root<P: Preset>(state: &BeaconState<P>, epoch: Epoch) -> Result<H256> {
    get_block_root_at_slot(state, compute_start_slot_at_epoch::<P>(epoch))
}

pub fn get_block_root_at_slot<P: Preset>(state: &BeaconState<P>, slot: Slot) -> Result<H256> {
    ensure!(
        slot < state.slot && state.slot <= slot + P::SlotsPerHistoricalRoot::U64,
        Error::SlotOutOfRange,
    );

    Ok(*state.block_roots.mod_index(slot))
}

#[must_use]
pub fn get_randao_mix<P: Preset>(state: &BeaconState<P>, epoch: Epoch) -> H256 {
    *state.randao_mixes.mod_index(epoch)
}

#[must_use]
pub fn get_seed<P: Preset>(
    state: &BeaconState<P>,
    epoch: Epoch,
    domain_type: DomainType,
) -> H256 {
    let mix = get_randao_mix(
        state,
        epoch + P::EpochsPerHistoricalVector::U64 - P::MIN_SEED_LOOKAHEAD - 1,
    );

    hashing::hash_32_64_256(domain_type.to_fixed_bytes(), epoch, mix)
}

pub fn active_validator_indices<P: Preset>(
    state: &BeaconState<P>,
    epoch: Epoch,
) -> impl Iterator<Item = ValidatorIndex> + '_ {
    state
        .validators
        .iter()
        .zip(0..)
        .filter(move |(validator, _)| is_active_validator(validator, epoch))
        .map(|(_, index)| index)
}

#[must_use]
pub fn get_active_validator_count<P: Preset>(state: &BeaconState<P>, epoch: Epoch) -> u64 {
    active_validator_indices(state, epoch).count() as u64
}

#[must_use]
pub fn get_validator_churn_limit(config: &Config, active_validator_count: u64) -> u64 {
    (active_validator_count / config.churn_limit_quotient).max(config.min_per_epoch_churn_limit)
}

// > Return the combined effective balance of the ``indices``.
// > ``EFFECTIVE_BALANCE_INCREMENT`` Gwei minimum to avoid divisions by zero.
pub fn get_total_balance<P: Preset>(
    state: &BeaconState<P>,
    indices: impl IntoIterator<Item = ValidatorIndex>,
) -> Result<Gwei> {
    indices
        .into_iter()
        .map(|index| {
            state
                .validators
                .get(index)
                .map(|validator| validator.effective_balance)
        })
        .process_results(|balances| balances.sum::<Gwei>())?
        .max(P::EFFECTIVE_BALANCE_INCREMENT.get())
        .pipe(Ok)
}

#[must_use]
pub fn get_total_active_balance<P: Preset>(state: &BeaconState<P>) -> Gwei {
    let epoch = get_current_epoch(state);

    state
        .validators
        .iter()
        .filter(|validator| is_active_validator(validator, epoch))
        .map(|validator| validator.effective_balance)
        .sum::<Gwei>()
        .max(P::EFFECTIVE_BALANCE_INCREMENT.get())
}

/// Base reward of a validator given the square root of the total active balance.
///
/// The square root is passed in because it is the same for every validator in an epoch.
#[must_use]
pub fn get_base_reward<P: Preset>(
    effective_balance: Gwei,
    total_active_balance_sqrt: u64,
) -> Gwei {
    effective_balance * P::BASE_REWARD_FACTOR / total_active_balance_sqrt / BASE_REWARDS_PER_EPOCH
}

#[must_use]
pub fn total_active_balance_sqrt(total_active_balance: Gwei) -> u64 {
    total_active_balance.integer_sqrt()
}

#[must_use]
pub fn get_domain<P: Preset>(
    config: &Config,
    state: &BeaconState<P>,
    domain_type: DomainType,
    epoch: Option<Epoch>,
) -> Domain {
    let epoch = epoch.unwrap_or_else(|| get_current_epoch(state));

    let fork_version = if epoch < state.fork.epoch {
        state.fork.previous_version
    } else {
        state.fork.current_version
    };

    compute_domain(
        config,
        domain_type,
        Some(fork_version),
        Some(state.genesis_validators_root),
    )
}

/// Selects the members of `committee` whose bits are set in `aggregation_bits`.
pub fn get_attesting_indices<'all, P: Preset>(
    committee: &'all [ValidatorIndex],
    aggregation_bits: &'all BitList<P::MaxValidatorsPerCommittee>,
) -> Result<impl Iterator<Item = ValidatorIndex> + 'all> {
    ensure!(
        committee.len() == aggregation_bits.len(),
        Error::CommitteeLengthMismatch {
            aggregation_bitlist_length: aggregation_bits.len(),
            committee_length: committee.len(),
        },
    );

    aggregation_bits
        .iter()
        .by_vals()
        .zip(committee.iter().copied())
        .filter_map(|(present, validator_index)| present.then_some(validator_index))
        .pipe(Ok)
}

pub fn get_indexed_attestation<P: Preset>(
    committee: &[ValidatorIndex],
    attestation: &Attestation<P>,
) -> Result<IndexedAttestation<P>> {
    let mut attesting_indices = get_attesting_indices::<P>(committee, &attestation.aggregation_bits)?
        .pipe(ContiguousList::try_from_iter)?;

    attesting_indices.sort_unstable();

    Ok(IndexedAttestation {
        attesting_indices,
        data: attestation.data,
        signature: attestation.signature,
    })
}

#[must_use]
pub fn get_finality_delay<P: Preset>(state: &BeaconState<P>) -> u64 {
    get_previous_epoch(state) - state.finalized_checkpoint.epoch
}

#[must_use]
pub fn is_in_inactivity_leak<P: Preset>(state: &BeaconState<P>) -> bool {
    get_finality_delay(state) > P::MIN_EPOCHS_TO_INACTIVITY_PENALTY
}
