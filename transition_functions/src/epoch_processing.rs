use anyhow::Result;
use arithmetic::{NonZeroExt as _, U64Ext as _};
use epoch_context::EpochContext;
use helper_functions::{
    accessors::{
        get_block_root, get_current_epoch, get_next_epoch, get_previous_epoch, get_randao_mix,
    },
    misc::compute_activation_exit_epoch,
    mutators::{decrease_balance, increase_balance, initiate_validator_exit},
    predicates::is_eligible_for_activation,
};
use itertools::Itertools as _;
use log::{debug, info};
use ssz::{BitVector, ContiguousList, SszHash as _};
use typenum::Unsigned as _;
use types::{
    config::Config,
    phase0::{
        beacon_state::BeaconState,
        consts::{JustificationBitsLength, FAR_FUTURE_EPOCH, GENESIS_EPOCH},
        containers::{Checkpoint, HistoricalBatch},
        primitives::{Epoch, Gwei, ValidatorIndex},
    },
    preset::Preset,
};

use crate::epoch_intermediates::{self, EpochProcess, Statistics};

/// Summary of one epoch transition.
#[derive(Clone, Debug)]
pub struct EpochReport {
    /// The epoch that ended.
    pub epoch: Epoch,
    pub justification_bits: BitVector<JustificationBitsLength>,
    pub current_justified_checkpoint: Checkpoint,
    pub finalized_checkpoint: Checkpoint,
    pub registry_updates: RegistryUpdates,
    pub slashing_penalties: Vec<(ValidatorIndex, Gwei)>,
}

#[derive(Clone, Default, Debug)]
pub struct RegistryUpdates {
    pub activated: Vec<ValidatorIndex>,
    pub ejected: Vec<ValidatorIndex>,
}

/// Runs the six stages of the epoch transition in order.
///
/// `state` must be in the last slot of `epoch_context.epoch()`.
pub fn process_epoch<P: Preset>(
    config: &Config,
    state: &mut BeaconState<P>,
    epoch_context: &EpochContext<P>,
) -> Result<EpochReport> {
    let epoch_process = EpochProcess::new(config, state, epoch_context)?;

    process_justification_and_finalization(state, epoch_process.statistics)?;
    process_rewards_and_penalties(state, &epoch_process)?;

    let registry_updates =
        process_registry_updates(config, state, &epoch_process, epoch_context.churn_limit())?;

    let slashing_penalties = process_slashings(state, &epoch_process)?;

    process_final_updates(state)?;
    process_fork_changed(config, state);

    let report = EpochReport {
        epoch: epoch_process.current_epoch,
        justification_bits: state.justification_bits.clone(),
        current_justified_checkpoint: state.current_justified_checkpoint,
        finalized_checkpoint: state.finalized_checkpoint,
        registry_updates,
        slashing_penalties,
    };

    debug!(
        "processed epoch {} (justification bits: {}, justified epoch: {}, finalized epoch: {}, \
         activations: {}, ejections: {}, slashing penalties: {})",
        report.epoch,
        report
            .justification_bits
            .iter()
            .map(|bit| if bit { '1' } else { '0' })
            .collect::<String>(),
        report.current_justified_checkpoint.epoch,
        report.finalized_checkpoint.epoch,
        report.registry_updates.activated.len(),
        report.registry_updates.ejected.len(),
        report.slashing_penalties.len(),
    );

    Ok(report)
}

pub fn process_justification_and_finalization<P: Preset>(
    state: &mut BeaconState<P>,
    statistics: Statistics,
) -> Result<()> {
    if !should_process_justification_and_finalization(state) {
        return Ok(());
    }

    weigh_justification_and_finalization(
        state,
        statistics.current_epoch_active_balance,
        statistics.previous_epoch_target_attesting_balance,
        statistics.current_epoch_target_attesting_balance,
    )
}

pub fn weigh_justification_and_finalization<P: Preset>(
    state: &mut BeaconState<P>,
    total_active_balance: Gwei,
    previous_epoch_target_balance: Gwei,
    current_epoch_target_balance: Gwei,
) -> Result<()> {
    let previous_epoch = get_previous_epoch(state);
    let current_epoch = get_current_epoch(state);
    let old_previous_justified_checkpoint = state.previous_justified_checkpoint;
    let old_current_justified_checkpoint = state.current_justified_checkpoint;

    // > Process justifications
    state.previous_justified_checkpoint = state.current_justified_checkpoint;
    state.justification_bits.shift_up_by_1();

    for (epoch, bit, target_balance) in [
        (previous_epoch, 1, previous_epoch_target_balance),
        (current_epoch, 0, current_epoch_target_balance),
    ] {
        if target_balance * 3 >= total_active_balance * 2 {
            state.current_justified_checkpoint = Checkpoint {
                epoch,
                root: get_block_root(state, epoch)?,
            };

            state.justification_bits.set(bit, true);
        }
    }

    // > Process finalizations
    let bits = &state.justification_bits;
    let mut finalized_checkpoint = state.finalized_checkpoint;

    // > The 2nd/3rd/4th most recent epochs are justified, the 2nd using the 4th as source
    if bits.all_in(1..4) && old_previous_justified_checkpoint.epoch + 3 == current_epoch {
        finalized_checkpoint = old_previous_justified_checkpoint;
    }

    // > The 2nd/3rd most recent epochs are justified, the 2nd using the 3rd as source
    if bits.all_in(1..3) && old_previous_justified_checkpoint.epoch + 2 == current_epoch {
        finalized_checkpoint = old_previous_justified_checkpoint;
    }

    // > The 1st/2nd/3rd most recent epochs are justified, the 1st using the 3rd as source
    if bits.all_in(0..3) && old_current_justified_checkpoint.epoch + 2 == current_epoch {
        finalized_checkpoint = old_current_justified_checkpoint;
    }

    // > The 1st/2nd most recent epochs are justified, the 1st using the 2nd as source
    if bits.all_in(0..2) && old_current_justified_checkpoint.epoch + 1 == current_epoch {
        finalized_checkpoint = old_current_justified_checkpoint;
    }

    state.finalized_checkpoint = finalized_checkpoint;

    Ok(())
}

pub fn process_rewards_and_penalties<P: Preset>(
    state: &mut BeaconState<P>,
    epoch_process: &EpochProcess,
) -> Result<()> {
    if !should_process_rewards_and_penalties(state) {
        return Ok(());
    }

    // All deltas are computed before any balance changes.
    let deltas = epoch_intermediates::epoch_deltas(state, epoch_process)?;

    for (validator_index, deltas) in (0..).zip(deltas) {
        increase_balance(state, validator_index, deltas.reward)?;
        decrease_balance(state, validator_index, deltas.penalty)?;
    }

    Ok(())
}

pub fn process_registry_updates<P: Preset>(
    config: &Config,
    state: &mut BeaconState<P>,
    epoch_process: &EpochProcess,
    churn_limit: u64,
) -> Result<RegistryUpdates> {
    let current_epoch = get_current_epoch(state);
    let next_epoch = get_next_epoch(state);

    // > Process activation eligibility and ejections
    for validator_index in epoch_process.eligible_for_activation_queue.iter().copied() {
        state
            .validators
            .get_mut(validator_index)?
            .activation_eligibility_epoch = next_epoch;
    }

    let mut ejected = vec![];

    for validator_index in epoch_process.ejections.iter().copied() {
        // Validators that are already exiting keep their exit epoch.
        if state.validators.get(validator_index)?.exit_epoch == FAR_FUTURE_EPOCH {
            initiate_validator_exit(config, state, validator_index, churn_limit)?;
            ejected.push(validator_index);
        }
    }

    // > Queue validators eligible for activation and not yet dequeued for activation
    let mut activation_queue = vec![];

    for candidate in epoch_process.activation_queue_candidates.iter().copied() {
        let (validator_index, _) = candidate;

        if is_eligible_for_activation(state, state.validators.get(validator_index)?) {
            activation_queue.push(candidate);
        }
    }

    let activated = activation_queue
        .into_iter()
        // > Order by the sequence of activation_eligibility_epoch setting and then index
        .sorted_unstable_by_key(|(validator_index, activation_eligibility_epoch)| {
            (*activation_eligibility_epoch, *validator_index)
        })
        .map(|(validator_index, _)| validator_index)
        // > Dequeued validators for activation up to churn limit
        .take(churn_limit.try_into()?)
        .collect_vec();

    let activation_epoch = compute_activation_exit_epoch::<P>(current_epoch);

    for validator_index in activated.iter().copied() {
        state.validators.get_mut(validator_index)?.activation_epoch = activation_epoch;
    }

    Ok(RegistryUpdates { activated, ejected })
}

pub fn process_slashings<P: Preset>(
    state: &mut BeaconState<P>,
    epoch_process: &EpochProcess,
) -> Result<Vec<(ValidatorIndex, Gwei)>> {
    let epoch = get_current_epoch(state);
    let total_balance = epoch_process.statistics.current_epoch_active_balance;
    let increment = P::EFFECTIVE_BALANCE_INCREMENT;

    let adjusted_total_slashing_balance = state
        .slashings
        .iter()
        .sum::<Gwei>()
        .saturating_mul(P::PROPORTIONAL_SLASHING_MULTIPLIER)
        .min(total_balance);

    let withdrawable_epoch = epoch + P::EpochsPerSlashingsVector::U64 / 2;
    let mut penalties = vec![];

    for validator_index in epoch_process.slashed.iter().copied() {
        let validator = state.validators.get(validator_index)?;

        if validator.withdrawable_epoch != withdrawable_epoch {
            continue;
        }

        // > Factored out from penalty numerator to avoid uint64 overflow
        let penalty_numerator = validator.effective_balance / increment
            * adjusted_total_slashing_balance;
        let penalty = penalty_numerator / total_balance * increment.get();

        decrease_balance(state, validator_index, penalty)?;
        penalties.push((validator_index, penalty));
    }

    Ok(penalties)
}

pub fn process_final_updates<P: Preset>(state: &mut BeaconState<P>) -> Result<()> {
    let current_epoch = get_current_epoch(state);
    let next_epoch = get_next_epoch(state);

    // > Reset eth1 data votes
    if next_epoch.is_divisible_by(P::EpochsPerEth1VotingPeriod::non_zero()) {
        state.eth1_data_votes.clear();
    }

    process_effective_balance_updates(state);

    // > Reset slashings
    *state.slashings.mod_index_mut(next_epoch) = 0;

    // > Set randao mix
    *state.randao_mixes.mod_index_mut(next_epoch) = get_randao_mix(state, current_epoch);

    // > Set historical root accumulator
    if next_epoch.is_divisible_by(P::EpochsPerHistoricalRoot::non_zero()) {
        let historical_batch = HistoricalBatch::<P> {
            block_roots: state.block_roots.clone(),
            state_roots: state.state_roots.clone(),
        };

        state
            .historical_roots
            .push(historical_batch.hash_tree_root())?;
    }

    // > Rotate current/previous epoch attestations
    state.previous_epoch_attestations = core::mem::replace(
        &mut state.current_epoch_attestations,
        ContiguousList::default(),
    );

    Ok(())
}

pub fn process_effective_balance_updates<P: Preset>(state: &mut BeaconState<P>) {
    let hysteresis_increment = P::EFFECTIVE_BALANCE_INCREMENT.get() / P::HYSTERESIS_QUOTIENT;
    let downward_threshold = hysteresis_increment * P::HYSTERESIS_DOWNWARD_MULTIPLIER;
    let upward_threshold = hysteresis_increment * P::HYSTERESIS_UPWARD_MULTIPLIER;

    let BeaconState {
        validators,
        balances,
        ..
    } = state;

    // > Update effective balances with hysteresis
    for (validator, balance) in validators.iter_mut().zip(balances.iter().copied()) {
        let below = balance + downward_threshold < validator.effective_balance;
        let above = validator.effective_balance + upward_threshold < balance;

        if below || above {
            validator.effective_balance = balance
                .prev_multiple_of(P::EFFECTIVE_BALANCE_INCREMENT)
                .min(P::MAX_EFFECTIVE_BALANCE);
        }
    }
}

/// Switches `state.fork` to the fork scheduled for the epoch about to start, if any.
pub fn process_fork_changed<P: Preset>(config: &Config, state: &mut BeaconState<P>) {
    let next_epoch = get_next_epoch(state);

    if let Some(scheduled_fork) = config.fork_at_epoch(next_epoch) {
        info!(
            "switching to fork version {:?} at epoch {next_epoch}",
            scheduled_fork.current_version,
        );

        state.fork = scheduled_fork.into();
    }
}

fn should_process_justification_and_finalization<P: Preset>(state: &BeaconState<P>) -> bool {
    // > Initial FFG checkpoint values have a `0x00` stub for `root`.
    // > Skip FFG updates in the first two epochs to avoid
    // > corner cases that might result in modifying this stub.
    GENESIS_EPOCH + 1 < get_current_epoch(state)
}

fn should_process_rewards_and_penalties<P: Preset>(state: &BeaconState<P>) -> bool {
    // Rewards at the end of epoch 1 would be for epoch 0, whose checkpoints are stubs.
    GENESIS_EPOCH + 1 < get_current_epoch(state)
}

#[cfg(test)]
mod tests {
    use helper_functions::misc::compute_start_slot_at_epoch;
    use test_case::test_case;
    use types::{
        config::ScheduledFork,
        phase0::{
            consts::FAR_FUTURE_EPOCH,
            containers::Fork,
            primitives::{H256, H32},
        },
        preset::Minimal,
    };

    use crate::test_utils;

    use super::*;

    const INCREMENT: Gwei = Minimal::EFFECTIVE_BALANCE_INCREMENT.get();

    fn last_slot_of(epoch: Epoch) -> u64 {
        compute_start_slot_at_epoch::<Minimal>(epoch + 1) - 1
    }

    fn empty_process(state: &BeaconState<Minimal>) -> EpochProcess {
        EpochProcess {
            current_epoch: get_current_epoch(state),
            previous_epoch: get_previous_epoch(state),
            statistics: Statistics {
                current_epoch_active_balance: state
                    .validators
                    .iter()
                    .map(|validator| validator.effective_balance)
                    .sum::<Gwei>()
                    .max(INCREMENT),
                ..Statistics::default()
            },
            summaries: vec![],
            performance: vec![],
            eligible_for_activation_queue: vec![],
            activation_queue_candidates: vec![],
            ejections: vec![],
            slashed: vec![],
        }
    }

    #[test]
    fn activation_queue_is_ordered_by_eligibility_epoch_then_index() -> Result<()> {
        let config = Config::minimal();
        let mut state = test_utils::genesis_state::<Minimal>(16)?;

        state.slot = last_slot_of(7);
        state.finalized_checkpoint.epoch = 6;

        for index in [3, 10] {
            let validator = state.validators.get_mut(index)?;
            validator.activation_eligibility_epoch = 5;
            validator.activation_epoch = FAR_FUTURE_EPOCH;
        }

        let epoch_process = EpochProcess {
            activation_queue_candidates: vec![(10, 5), (3, 5)],
            ..empty_process(&state)
        };

        let updates = process_registry_updates(&config, &mut state, &epoch_process, 1)?;

        assert_eq!(updates.activated, [3]);
        assert_eq!(
            state.validators.get(3)?.activation_epoch,
            compute_activation_exit_epoch::<Minimal>(7),
        );
        assert_eq!(state.validators.get(10)?.activation_epoch, FAR_FUTURE_EPOCH);

        Ok(())
    }

    #[test]
    fn activation_waits_for_finality() -> Result<()> {
        let config = Config::minimal();
        let mut state = test_utils::genesis_state::<Minimal>(16)?;

        state.slot = last_slot_of(7);
        state.finalized_checkpoint.epoch = 4;

        let epoch_process = EpochProcess {
            activation_queue_candidates: vec![(2, 5), (4, 3)],
            ..empty_process(&state)
        };

        let updates = process_registry_updates(&config, &mut state, &epoch_process, 4)?;

        assert_eq!(updates.activated, [4]);

        Ok(())
    }

    #[test]
    fn ejected_validators_join_exit_queue() -> Result<()> {
        let config = Config::minimal();
        let mut state = test_utils::genesis_state::<Minimal>(16)?;

        state.slot = last_slot_of(2);
        state.validators.get_mut(5)?.effective_balance = config.ejection_balance;

        let epoch_process = EpochProcess::new(
            &config,
            &state,
            &epoch_context::EpochContext::load(&config, &state)?,
        )?;

        assert_eq!(epoch_process.ejections, [5]);

        let updates = process_registry_updates(&config, &mut state, &epoch_process, 4)?;

        assert_eq!(updates.ejected, [5]);
        assert_eq!(
            state.validators.get(5)?.exit_epoch,
            compute_activation_exit_epoch::<Minimal>(2),
        );

        Ok(())
    }

    #[test]
    fn validators_already_exiting_are_not_ejected_again() -> Result<()> {
        let config = Config::minimal();
        let mut state = test_utils::genesis_state::<Minimal>(16)?;

        state.slot = last_slot_of(2);

        let exiting = state.validators.get_mut(5)?;
        exiting.effective_balance = config.ejection_balance;
        exiting.exit_epoch = 10;
        exiting.withdrawable_epoch = 10 + config.min_validator_withdrawability_delay;

        state.validators.get_mut(6)?.effective_balance = config.ejection_balance;

        let epoch_process = EpochProcess::new(
            &config,
            &state,
            &epoch_context::EpochContext::load(&config, &state)?,
        )?;

        assert_eq!(epoch_process.ejections, [5, 6]);

        let updates = process_registry_updates(&config, &mut state, &epoch_process, 4)?;

        assert_eq!(updates.ejected, [6]);
        assert_eq!(state.validators.get(5)?.exit_epoch, 10);
        assert_eq!(
            state.validators.get(6)?.exit_epoch,
            compute_activation_exit_epoch::<Minimal>(2),
        );

        Ok(())
    }

    #[test]
    fn two_consecutive_justified_epochs_finalize_the_older_one() -> Result<()> {
        let mut state = test_utils::genesis_state::<Minimal>(16)?;
        let justified = Checkpoint {
            epoch: 3,
            root: H256::repeat_byte(3),
        };

        state.slot = last_slot_of(4);
        state.current_justified_checkpoint = justified;
        state.justification_bits.set(0, true);

        weigh_justification_and_finalization(&mut state, 100, 0, 67)?;

        assert_eq!(state.finalized_checkpoint, justified);
        assert_eq!(state.previous_justified_checkpoint, justified);
        assert_eq!(state.current_justified_checkpoint.epoch, 4);
        assert_eq!(state.justification_bits.iter().collect_vec(), [true, true, false, false]);

        Ok(())
    }

    #[test]
    fn insufficient_participation_justifies_nothing() -> Result<()> {
        let mut state = test_utils::genesis_state::<Minimal>(16)?;

        state.slot = last_slot_of(4);
        state.justification_bits.set(0, true);

        weigh_justification_and_finalization(&mut state, 100, 66, 66)?;

        assert_eq!(state.current_justified_checkpoint, Checkpoint::default());
        assert_eq!(state.finalized_checkpoint, Checkpoint::default());
        assert_eq!(state.justification_bits.iter().collect_vec(), [false, true, false, false]);

        Ok(())
    }

    #[test_case(0; "genesis epoch")]
    #[test_case(1; "epoch after genesis")]
    fn early_epochs_skip_justification_and_rewards(epoch: Epoch) -> Result<()> {
        let mut state = test_utils::genesis_state::<Minimal>(16)?;

        state.slot = last_slot_of(epoch);

        let balances = state.balances.clone();
        let statistics = Statistics {
            current_epoch_active_balance: 16 * Minimal::MAX_EFFECTIVE_BALANCE,
            previous_epoch_target_attesting_balance: 16 * Minimal::MAX_EFFECTIVE_BALANCE,
            current_epoch_target_attesting_balance: 16 * Minimal::MAX_EFFECTIVE_BALANCE,
            ..Statistics::default()
        };

        process_justification_and_finalization(&mut state, statistics)?;
        let epoch_process = empty_process(&state);
        process_rewards_and_penalties(&mut state, &epoch_process)?;

        assert!(!state.justification_bits.any());
        assert_eq!(state.balances, balances);

        Ok(())
    }

    #[test]
    fn slashing_penalty_grows_with_total_slashed_and_never_underflows() -> Result<()> {
        let mut state = test_utils::genesis_state::<Minimal>(64)?;
        let epoch = 10;
        let withdrawable_epoch = epoch + <Minimal as Preset>::EpochsPerSlashingsVector::U64 / 2;

        state.slot = last_slot_of(epoch);

        for index in [0, 1] {
            let validator = state.validators.get_mut(index)?;
            validator.slashed = true;
            validator.withdrawable_epoch = withdrawable_epoch;
        }

        *state.balances.get_mut(1)? = INCREMENT / 2;

        let epoch_process = EpochProcess {
            slashed: vec![0, 1],
            ..empty_process(&state)
        };

        let mut previous_penalty = 0;

        for slashed_validators in [1, 2, 8, 32, 64] {
            let mut state = state.clone();

            *state.slashings.mod_index_mut(epoch) =
                slashed_validators * Minimal::MAX_EFFECTIVE_BALANCE;

            let penalties = process_slashings(&mut state, &epoch_process)?;
            let (_, penalty) = penalties[0];
            let (_, poor_validator_penalty) = penalties[1];

            assert!(penalty >= previous_penalty);
            assert_eq!(
                *state.balances.get(1)?,
                (INCREMENT / 2).saturating_sub(poor_validator_penalty),
            );

            previous_penalty = penalty;
        }

        assert_eq!(previous_penalty, Minimal::MAX_EFFECTIVE_BALANCE);

        Ok(())
    }

    #[test_case(32_000_000_000, 32_000_000_000, 32_000_000_000; "unchanged")]
    #[test_case(32_000_000_000, 31_800_000_000, 32_000_000_000; "small drop is ignored")]
    #[test_case(32_000_000_000, 31_700_000_000, 31_000_000_000; "large drop")]
    #[test_case(31_000_000_000, 32_200_000_000, 31_000_000_000; "small rise is ignored")]
    #[test_case(31_000_000_000, 32_300_000_000, 32_000_000_000; "large rise")]
    #[test_case(31_000_000_000, 40_000_000_000, 32_000_000_000; "capped at maximum")]
    fn effective_balance_moves_with_hysteresis(
        effective_balance: Gwei,
        balance: Gwei,
        expected: Gwei,
    ) -> Result<()> {
        let mut state = test_utils::genesis_state::<Minimal>(1)?;

        state.validators.get_mut(0)?.effective_balance = effective_balance;
        *state.balances.get_mut(0)? = balance;

        process_effective_balance_updates(&mut state);

        assert_eq!(state.validators.get(0)?.effective_balance, expected);

        Ok(())
    }

    #[test]
    fn final_updates_rotate_attestations_and_mixes() -> Result<()> {
        let mut state = test_utils::genesis_state::<Minimal>(4)?;

        state.slot = last_slot_of(3);
        *state.randao_mixes.mod_index_mut(3) = H256::repeat_byte(7);
        *state.slashings.mod_index_mut(4) = 99;

        process_final_updates(&mut state)?;

        assert_eq!(*state.randao_mixes.mod_index(4), H256::repeat_byte(7));
        assert_eq!(*state.slashings.mod_index(4), 0);
        assert!(state.previous_epoch_attestations.is_empty());
        assert!(state.current_epoch_attestations.is_empty());

        Ok(())
    }

    #[test]
    fn fork_changes_at_scheduled_epoch() -> Result<()> {
        let config = Config {
            fork_schedule: vec![ScheduledFork {
                epoch: 3,
                previous_version: H32::zero(),
                current_version: H32([1, 0, 0, 0]),
            }],
            ..Config::minimal()
        };

        let mut state = test_utils::genesis_state::<Minimal>(4)?;

        state.slot = last_slot_of(1);
        process_fork_changed(&config, &mut state);
        assert_eq!(state.fork, Fork::default());

        state.slot = last_slot_of(2);
        process_fork_changed(&config, &mut state);
        assert_eq!(
            state.fork,
            Fork {
                previous_version: H32::zero(),
                current_version: H32([1, 0, 0, 0]),
                epoch: 3,
            },
        );

        Ok(())
    }
}
