use core::num::NonZeroU64;

use anyhow::Result;
use epoch_context::EpochContext;
use helper_functions::{
    accessors::{
        get_attesting_indices, get_base_reward, get_block_root, get_block_root_at_slot,
        get_current_epoch, get_finality_delay, get_previous_epoch, is_in_inactivity_leak,
        total_active_balance_sqrt,
    },
    predicates::{is_active_validator, is_eligible_for_activation_queue, is_eligible_for_penalties},
};
use itertools::izip;
#[cfg(target_arch = "x86_64")]
use static_assertions::assert_eq_size;
use types::{
    config::Config,
    phase0::{
        beacon_state::BeaconState,
        consts::{BASE_REWARDS_PER_EPOCH, FAR_FUTURE_EPOCH},
        containers::{PendingAttestation, Validator},
        primitives::{Epoch, Gwei, ValidatorIndex},
    },
    preset::Preset,
};

/// The parts of a `Validator` that epoch processing reads after registry updates start.
#[derive(Clone, Copy, Default, Debug)]
pub struct ValidatorSummary {
    pub effective_balance: Gwei,
    pub withdrawable_epoch: Epoch,
    pub slashed: bool,
    pub active_in_current_epoch: bool,
    pub eligible_for_penalties: bool,
}

#[cfg(target_arch = "x86_64")]
assert_eq_size!(ValidatorSummary, [u64; 3]);

#[expect(clippy::struct_field_names)]
#[derive(Clone, Copy, Default, Debug)]
pub struct Statistics {
    pub previous_epoch_source_attesting_balance: Gwei,
    pub previous_epoch_target_attesting_balance: Gwei,
    pub previous_epoch_head_attesting_balance: Gwei,
    pub current_epoch_active_balance: Gwei,
    pub current_epoch_target_attesting_balance: Gwei,
}

impl Statistics {
    fn clamp_balances<P: Preset>(&mut self) {
        for balance in [
            &mut self.previous_epoch_source_attesting_balance,
            &mut self.previous_epoch_target_attesting_balance,
            &mut self.previous_epoch_head_attesting_balance,
            &mut self.current_epoch_active_balance,
            &mut self.current_epoch_target_attesting_balance,
        ] {
            *balance = (*balance).max(P::EFFECTIVE_BALANCE_INCREMENT.get());
        }
    }
}

#[derive(Clone, Copy, Default, Debug)]
pub struct Performance {
    previous_epoch_match: Match,
    previous_epoch_fastest_inclusion: Option<Inclusion>,
    current_epoch_matching_target: bool,
}

impl Performance {
    #[must_use]
    pub fn previous_epoch_matching_source(self) -> bool {
        Match::Source <= self.previous_epoch_match
    }

    #[must_use]
    pub fn previous_epoch_matching_target(self) -> bool {
        Match::Target <= self.previous_epoch_match
    }

    #[must_use]
    pub fn previous_epoch_matching_head(self) -> bool {
        Match::Head <= self.previous_epoch_match
    }

    #[must_use]
    pub const fn previous_epoch_fastest_inclusion(self) -> Option<Inclusion> {
        self.previous_epoch_fastest_inclusion
    }

    #[must_use]
    pub const fn current_epoch_matching_target(self) -> bool {
        self.current_epoch_matching_target
    }
}

// As suggested by `clippy::struct_excessive_bools`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Debug)]
enum Match {
    #[default]
    None,
    Source,
    Target,
    Head,
}

#[derive(Clone, Copy, Debug)]
pub struct Inclusion {
    pub delay: NonZeroU64,
    pub proposer_index: ValidatorIndex,
}

#[derive(Clone, Copy, Default, Debug)]
pub struct EpochDeltas {
    pub reward: Gwei,
    pub penalty: Gwei,
}

/// Data shared by the stages of one epoch transition.
///
/// Built from the state as it stands at the last slot of the epoch.
pub struct EpochProcess {
    pub current_epoch: Epoch,
    pub previous_epoch: Epoch,
    pub statistics: Statistics,
    pub summaries: Vec<ValidatorSummary>,
    pub performance: Vec<Performance>,
    pub eligible_for_activation_queue: Vec<ValidatorIndex>,
    // Validators that have been placed in the activation queue but not activated yet.
    // Whether their placement is finalized is decided in `process_registry_updates`.
    pub activation_queue_candidates: Vec<(ValidatorIndex, Epoch)>,
    // Active validators at or below the ejection balance, including ones already exiting.
    pub ejections: Vec<ValidatorIndex>,
    pub slashed: Vec<ValidatorIndex>,
}

impl EpochProcess {
    pub fn new<P: Preset>(
        config: &Config,
        state: &BeaconState<P>,
        epoch_context: &EpochContext<P>,
    ) -> Result<Self> {
        let current_epoch = get_current_epoch(state);
        let previous_epoch = get_previous_epoch(state);
        let validator_count = state.validators.len();

        let mut statistics = Statistics::default();
        let mut summaries = Vec::with_capacity(validator_count);
        let mut eligible_for_activation_queue = vec![];
        let mut activation_queue_candidates = vec![];
        let mut ejections = vec![];
        let mut slashed = vec![];

        for (validator, validator_index) in state.validators.iter().zip(0..) {
            let Validator {
                effective_balance,
                slashed: validator_slashed,
                withdrawable_epoch,
                activation_eligibility_epoch,
                activation_epoch,
                ..
            } = *validator;

            let active_in_current_epoch = is_active_validator(validator, current_epoch);

            if active_in_current_epoch {
                statistics.current_epoch_active_balance += effective_balance;

                if effective_balance <= config.ejection_balance {
                    ejections.push(validator_index);
                }
            }

            if is_eligible_for_activation_queue::<P>(validator) {
                eligible_for_activation_queue.push(validator_index);
            }

            if activation_eligibility_epoch != FAR_FUTURE_EPOCH
                && activation_epoch == FAR_FUTURE_EPOCH
            {
                activation_queue_candidates.push((validator_index, activation_eligibility_epoch));
            }

            if validator_slashed {
                slashed.push(validator_index);
            }

            summaries.push(ValidatorSummary {
                effective_balance,
                withdrawable_epoch,
                slashed: validator_slashed,
                active_in_current_epoch,
                eligible_for_penalties: is_eligible_for_penalties(validator, previous_epoch),
            });
        }

        let mut performance = vec![Performance::default(); validator_count];

        // `get_block_root` only fails in the first slot of an epoch.
        // Epoch processing runs in the last one.
        let expected_target = get_block_root(state, previous_epoch)?;

        for attestation in &state.previous_epoch_attestations {
            let expected_head = get_block_root_at_slot(state, attestation.data.slot)?;
            let target = attestation.data.target.root == expected_target;
            let head = attestation.data.beacon_block_root == expected_head;
            let inclusion = inclusion(attestation)?;

            for validator_index in attesting_indices(epoch_context, attestation)? {
                let index = usize::try_from(validator_index)?;
                let summary = summaries[index];

                if summary.slashed {
                    continue;
                }

                accumulate_previous_epoch_attestation(
                    &mut statistics,
                    &mut performance[index],
                    inclusion,
                    target,
                    head,
                    summary.effective_balance,
                );
            }
        }

        let expected_target = get_block_root(state, current_epoch)?;

        for attestation in &state.current_epoch_attestations {
            if attestation.data.target.root != expected_target {
                continue;
            }

            for validator_index in attesting_indices(epoch_context, attestation)? {
                let index = usize::try_from(validator_index)?;
                let summary = summaries[index];

                if summary.slashed || performance[index].current_epoch_matching_target {
                    continue;
                }

                statistics.current_epoch_target_attesting_balance += summary.effective_balance;
                performance[index].current_epoch_matching_target = true;
            }
        }

        statistics.clamp_balances::<P>();

        Ok(Self {
            current_epoch,
            previous_epoch,
            statistics,
            summaries,
            performance,
            eligible_for_activation_queue,
            activation_queue_candidates,
            ejections,
            slashed,
        })
    }
}

fn attesting_indices<'context, P: Preset>(
    epoch_context: &'context EpochContext<P>,
    attestation: &'context PendingAttestation<P>,
) -> Result<impl Iterator<Item = ValidatorIndex> + 'context> {
    let committee =
        epoch_context.get_beacon_committee(attestation.data.slot, attestation.data.index)?;

    get_attesting_indices::<P>(committee, &attestation.aggregation_bits)
}

fn inclusion<P: Preset>(attestation: &PendingAttestation<P>) -> Result<Inclusion> {
    Ok(Inclusion {
        delay: attestation.inclusion_delay.try_into()?,
        proposer_index: attestation.proposer_index,
    })
}

fn accumulate_previous_epoch_attestation(
    statistics: &mut Statistics,
    performance: &mut Performance,
    inclusion: Inclusion,
    target: bool,
    head: bool,
    effective_balance: Gwei,
) {
    if !performance.previous_epoch_matching_source() {
        statistics.previous_epoch_source_attesting_balance += effective_balance;
        performance.previous_epoch_match = Match::Source;
    }

    if !performance.previous_epoch_matching_target() && target {
        statistics.previous_epoch_target_attesting_balance += effective_balance;
        performance.previous_epoch_match = Match::Target;
    }

    if !performance.previous_epoch_matching_head() && target && head {
        statistics.previous_epoch_head_attesting_balance += effective_balance;
        performance.previous_epoch_match = Match::Head;
    }

    let current = performance
        .previous_epoch_fastest_inclusion
        .get_or_insert(inclusion);

    if inclusion.delay < current.delay {
        *current = inclusion;
    }
}

/// Computes rewards and penalties for the previous epoch without applying them.
pub fn epoch_deltas<P: Preset>(
    state: &BeaconState<P>,
    epoch_process: &EpochProcess,
) -> Result<Vec<EpochDeltas>> {
    let statistics = epoch_process.statistics;
    let finality_delay = get_finality_delay(state);
    let in_inactivity_leak = is_in_inactivity_leak(state);
    let total_active_balance = statistics.current_epoch_active_balance;
    let total_active_balance_sqrt = total_active_balance_sqrt(total_active_balance);
    let increment = P::EFFECTIVE_BALANCE_INCREMENT;

    let mut deltas = vec![EpochDeltas::default(); epoch_process.summaries.len()];

    for (index, summary, performance) in izip!(
        0..,
        &epoch_process.summaries,
        epoch_process.performance.iter().copied(),
    ) {
        let base_reward = get_base_reward::<P>(summary.effective_balance, total_active_balance_sqrt);
        let proposer_reward = base_reward / P::PROPOSER_REWARD_QUOTIENT;

        let component_reward = |attesting_balance: Gwei| {
            if in_inactivity_leak {
                // > Since full base reward will be canceled out by inactivity penalty deltas,
                // > optimal participation receives full base reward compensation here.
                base_reward
            } else {
                // > Factored out from balance totals to avoid uint64 overflow
                base_reward * (attesting_balance / increment) / (total_active_balance / increment)
            }
        };

        if summary.eligible_for_penalties {
            let deltas = &mut deltas[index];

            let components = [
                (
                    performance.previous_epoch_matching_source(),
                    statistics.previous_epoch_source_attesting_balance,
                ),
                (
                    performance.previous_epoch_matching_target(),
                    statistics.previous_epoch_target_attesting_balance,
                ),
                (
                    performance.previous_epoch_matching_head(),
                    statistics.previous_epoch_head_attesting_balance,
                ),
            ];

            for (matching, attesting_balance) in components {
                if matching {
                    deltas.reward += component_reward(attesting_balance);
                } else {
                    deltas.penalty += base_reward;
                }
            }

            if in_inactivity_leak {
                // > If validator is performing optimally this cancels all rewards for a neutral
                // > balance
                deltas.penalty += BASE_REWARDS_PER_EPOCH.get() * base_reward - proposer_reward;

                if !performance.previous_epoch_matching_target() {
                    deltas.penalty +=
                        summary.effective_balance * finality_delay / P::INACTIVITY_PENALTY_QUOTIENT;
                }
            }
        }

        if let Some(Inclusion {
            delay,
            proposer_index,
        }) = performance.previous_epoch_fastest_inclusion()
        {
            let max_attester_reward = base_reward - proposer_reward;

            deltas[usize::try_from(proposer_index)?].reward += proposer_reward;
            deltas[index].reward += max_attester_reward / delay;
        }
    }

    Ok(deltas)
}

#[cfg(test)]
mod tests {
    use types::preset::Minimal;

    use crate::test_utils::{self, full_participation};

    use super::*;

    #[test]
    fn statistics_without_attestations() -> Result<()> {
        let config = Config::minimal();
        let state_context = test_utils::state_context_at_slot(&config, 64, 15)?;

        let epoch_process =
            EpochProcess::new(&config, state_context.state(), state_context.epoch_context())?;

        let increment = Minimal::EFFECTIVE_BALANCE_INCREMENT.get();

        assert_eq!(epoch_process.current_epoch, 1);
        assert_eq!(epoch_process.previous_epoch, 0);
        assert_eq!(
            epoch_process.statistics.current_epoch_active_balance,
            64 * Minimal::MAX_EFFECTIVE_BALANCE,
        );
        assert_eq!(
            epoch_process.statistics.previous_epoch_target_attesting_balance,
            increment,
        );
        assert!(epoch_process.ejections.is_empty());
        assert!(epoch_process.slashed.is_empty());

        Ok(())
    }

    #[test]
    fn previous_epoch_attestations_count_once_per_validator() -> Result<()> {
        let config = Config::minimal();
        let mut state_context = test_utils::state_context_at_slot(&config, 64, 15)?;

        let attestations = full_participation(&state_context, 1, 0, 1)?
            .into_iter()
            .chain(full_participation(&state_context, 1, 0, 2)?)
            .collect::<Vec<_>>();

        state_context.parts_mut().0.previous_epoch_attestations = attestations.try_into()?;

        let epoch_process =
            EpochProcess::new(&config, state_context.state(), state_context.epoch_context())?;

        let attesters = epoch_process
            .performance
            .iter()
            .filter(|performance| performance.previous_epoch_matching_head())
            .count() as u64;

        assert_eq!(
            epoch_process.statistics.previous_epoch_head_attesting_balance,
            attesters * Minimal::MAX_EFFECTIVE_BALANCE,
        );

        for performance in &epoch_process.performance {
            if let Some(inclusion) = performance.previous_epoch_fastest_inclusion() {
                assert_eq!(inclusion.delay.get(), 1);
            }
        }

        Ok(())
    }

    #[test]
    fn attesters_are_rewarded_and_absentees_penalized() -> Result<()> {
        let config = Config::minimal();
        let mut state_context = test_utils::state_context_at_slot(&config, 64, 23)?;

        // Epoch 1 attestations are previous epoch attestations at the end of epoch 2.
        let attestations = full_participation(&state_context, 9, 1, 1)?;
        let attesters = attestations
            .iter()
            .map(|attestation| attestation.aggregation_bits.len())
            .sum::<usize>();

        state_context.parts_mut().0.previous_epoch_attestations = attestations.try_into()?;

        let epoch_process =
            EpochProcess::new(&config, state_context.state(), state_context.epoch_context())?;
        let deltas = epoch_deltas(state_context.state(), &epoch_process)?;

        let rewarded = deltas.iter().filter(|deltas| deltas.penalty == 0).count();
        let penalized = deltas.iter().filter(|deltas| deltas.penalty > 0).count();

        assert!(attesters > 0);
        assert_eq!(rewarded, attesters);
        assert_eq!(penalized, 64 - attesters);

        // Validator 0 is recorded as the proposer of every attestation.
        let total_active_balance = 64 * Minimal::MAX_EFFECTIVE_BALANCE;
        let base_reward = get_base_reward::<Minimal>(
            Minimal::MAX_EFFECTIVE_BALANCE,
            total_active_balance_sqrt(total_active_balance),
        );
        let proposer_reward = base_reward / Minimal::PROPOSER_REWARD_QUOTIENT;

        assert!(deltas[0].reward >= attesters as u64 * proposer_reward);

        Ok(())
    }

    fn base_reward(epoch_process: &EpochProcess) -> Gwei {
        get_base_reward::<Minimal>(
            Minimal::MAX_EFFECTIVE_BALANCE,
            total_active_balance_sqrt(epoch_process.statistics.current_epoch_active_balance),
        )
    }

    #[test]
    fn inactivity_penalties_grow_with_finality_delay() -> Result<()> {
        let config = Config::minimal();
        let mut previous_penalty = 0;

        for (slot, finality_delay) in [(55, 5), (79, 8), (159, 18)] {
            let state_context = test_utils::state_context_at_slot(&config, 64, slot)?;
            let state = state_context.state();

            assert_eq!(get_finality_delay(state), finality_delay);
            assert!(is_in_inactivity_leak(state));

            let epoch_process = EpochProcess::new(&config, state, state_context.epoch_context())?;
            let deltas = epoch_deltas(state, &epoch_process)?;

            let base_reward = base_reward(&epoch_process);
            let proposer_reward = base_reward / Minimal::PROPOSER_REWARD_QUOTIENT;
            let inactivity_penalty = Minimal::MAX_EFFECTIVE_BALANCE * finality_delay
                / Minimal::INACTIVITY_PENALTY_QUOTIENT;

            // Missed source, target and head, then the leak penalties on top.
            let expected_penalty = 3 * base_reward
                + BASE_REWARDS_PER_EPOCH.get() * base_reward
                - proposer_reward
                + inactivity_penalty;

            for validator_deltas in &deltas {
                assert_eq!(validator_deltas.reward, 0);
                assert_eq!(validator_deltas.penalty, expected_penalty);
            }

            assert!(expected_penalty > previous_penalty);

            previous_penalty = expected_penalty;
        }

        Ok(())
    }

    #[test]
    fn optimal_attesters_break_even_during_inactivity_leak() -> Result<()> {
        let config = Config::minimal();
        let mut state_context = test_utils::state_context_at_slot(&config, 64, 55)?;
        let mut attestations = vec![];

        // Every slot of epoch 5, included in the next slot.
        for slot in 40..48 {
            attestations.extend(full_participation(&state_context, slot, 5, 1)?);
        }

        state_context.parts_mut().0.previous_epoch_attestations = attestations.try_into()?;

        let state = state_context.state();

        assert!(is_in_inactivity_leak(state));

        let epoch_process = EpochProcess::new(&config, state, state_context.epoch_context())?;
        let deltas = epoch_deltas(state, &epoch_process)?;
        let proposer_reward = base_reward(&epoch_process) / Minimal::PROPOSER_REWARD_QUOTIENT;

        assert!(epoch_process
            .performance
            .iter()
            .all(|performance| performance.previous_epoch_matching_head()));

        for validator_deltas in &deltas[1..] {
            assert!(validator_deltas.reward > 0);
            assert_eq!(validator_deltas.reward, validator_deltas.penalty);
        }

        // Validator 0 is recorded as the proposer that included all 64 attesters.
        assert_eq!(deltas[0].reward - deltas[0].penalty, 64 * proposer_reward);

        Ok(())
    }
}
