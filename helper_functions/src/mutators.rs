use core::cmp::Ordering;

use anyhow::Result;
use typenum::Unsigned as _;
use types::{
    config::Config,
    phase0::{
        beacon_state::BeaconState,
        consts::FAR_FUTURE_EPOCH,
        primitives::{Gwei, ValidatorIndex},
    },
    preset::Preset,
};

use crate::{accessors::get_current_epoch, error::Error, misc::compute_activation_exit_epoch};

pub fn balance<P: Preset>(
    state: &mut BeaconState<P>,
    validator_index: ValidatorIndex,
) -> Result<&mut Gwei> {
    state
        .balances
        .get_mut(validator_index)
        .map_err(Into::into)
}

/// Adds `delta` to the balance of validator `validator_index`.
///
/// Overflow is reported rather than wrapped. No valid chain can reach it.
pub fn increase_balance<P: Preset>(
    state: &mut BeaconState<P>,
    validator_index: ValidatorIndex,
    delta: Gwei,
) -> Result<()> {
    let balance = balance(state, validator_index)?;

    *balance = balance
        .checked_add(delta)
        .ok_or(Error::BalanceOverflow {
            index: validator_index,
        })?;

    Ok(())
}

// > Decrease the validator balance at index ``index`` by ``delta``, with underflow protection.
pub fn decrease_balance<P: Preset>(
    state: &mut BeaconState<P>,
    validator_index: ValidatorIndex,
    delta: Gwei,
) -> Result<()> {
    let balance = balance(state, validator_index)?;
    *balance = balance.saturating_sub(delta);
    Ok(())
}

/// Sets the exit and withdrawable epochs of validator `validator_index` if it has not exited yet.
///
/// `churn_limit` is the churn limit of the current epoch. Callers cache it.
pub fn initiate_validator_exit<P: Preset>(
    config: &Config,
    state: &mut BeaconState<P>,
    validator_index: ValidatorIndex,
    churn_limit: u64,
) -> Result<()> {
    // > Return if validator already initiated exit
    if state.validators.get(validator_index)?.exit_epoch != FAR_FUTURE_EPOCH {
        return Ok(());
    }

    // > Compute exit queue epoch
    let mut exit_queue_epoch = compute_activation_exit_epoch::<P>(get_current_epoch(state));
    let mut exit_queue_churn = 0;

    for validator in &state.validators {
        let exit_epoch = validator.exit_epoch;

        if exit_epoch == FAR_FUTURE_EPOCH {
            continue;
        }

        match exit_epoch.cmp(&exit_queue_epoch) {
            Ordering::Less => {}
            Ordering::Equal => exit_queue_churn += 1,
            Ordering::Greater => {
                exit_queue_epoch = exit_epoch;
                exit_queue_churn = 1;
            }
        }
    }

    if exit_queue_churn >= churn_limit {
        exit_queue_epoch += 1;
    }

    // > Set validator exit epoch and withdrawable epoch
    let validator = state.validators.get_mut(validator_index)?;

    validator.exit_epoch = exit_queue_epoch;

    validator.withdrawable_epoch = exit_queue_epoch
        .checked_add(config.min_validator_withdrawability_delay)
        .ok_or(Error::EpochOverflow)?;

    Ok(())
}

/// Penalty and rewards applied by [`slash_validator`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SlashingOutcome {
    pub penalty: Gwei,
    pub proposer_reward: Gwei,
    pub whistleblower_reward: Gwei,
}

// > Slash the validator with index ``slashed_index``.
pub fn slash_validator<P: Preset>(
    config: &Config,
    state: &mut BeaconState<P>,
    slashed_index: ValidatorIndex,
    whistleblower_index: Option<ValidatorIndex>,
    proposer_index: ValidatorIndex,
    churn_limit: u64,
) -> Result<SlashingOutcome> {
    initiate_validator_exit(config, state, slashed_index, churn_limit)?;

    let epoch = get_current_epoch(state);
    let validator = state.validators.get_mut(slashed_index)?;
    let effective_balance = validator.effective_balance;
    let penalty = effective_balance / P::MIN_SLASHING_PENALTY_QUOTIENT;

    validator.slashed = true;
    validator.withdrawable_epoch = validator
        .withdrawable_epoch
        .max(epoch + P::EpochsPerSlashingsVector::U64);

    *state.slashings.mod_index_mut(epoch) += effective_balance;

    decrease_balance(state, slashed_index, penalty)?;

    // > Apply proposer and whistleblower rewards
    let whistleblower_index = whistleblower_index.unwrap_or(proposer_index);
    let whistleblower_reward = effective_balance / P::WHISTLEBLOWER_REWARD_QUOTIENT;
    let proposer_reward = whistleblower_reward / P::PROPOSER_REWARD_QUOTIENT;
    let remaining_reward = whistleblower_reward - proposer_reward;

    increase_balance(state, proposer_index, proposer_reward)?;
    increase_balance(state, whistleblower_index, remaining_reward)?;

    Ok(SlashingOutcome {
        penalty,
        proposer_reward,
        whistleblower_reward: remaining_reward,
    })
}
