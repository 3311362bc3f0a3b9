use anyhow::{ensure, Result};
use epoch_context::StateContext;
use helper_functions::misc::is_epoch_start;
use log::debug;
use ssz::SszHash as _;
use types::{
    config::Config,
    phase0::{beacon_state::BeaconState, containers::BeaconBlock, primitives::Slot},
    preset::Preset,
};

use crate::{
    epoch_processing::{self, EpochReport},
    error::Error,
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ProcessSlots {
    Always,
    IfNeeded,
    Never,
}

impl ProcessSlots {
    #[must_use]
    pub fn should_process<P: Preset>(self, state: &BeaconState<P>, block: &BeaconBlock<P>) -> bool {
        match self {
            Self::Always => true,
            // The test for equality is intentional. Blocks attempting to rewind the state are
            // rejected early by `process_slots` rather than later by the state root check.
            Self::IfNeeded => state.slot != block.slot,
            Self::Never => false,
        }
    }
}

/// Advances `state_context` to `slot`, running the epoch transition at every boundary crossed.
///
/// Returns one report per epoch transition. Fails if `slot` is not after the current slot.
pub fn process_slots<P: Preset>(
    config: &Config,
    state_context: &mut StateContext<P>,
    slot: Slot,
) -> Result<Vec<EpochReport>> {
    let current = state_context.slot();

    ensure!(
        current < slot,
        Error::SlotNotLater {
            current,
            target: slot,
        },
    );

    let (state, epoch_context) = state_context.parts_mut();
    let mut reports = vec![];

    while state.slot < slot {
        process_slot(state);

        // > Process epoch on the start slot of the next epoch
        if is_epoch_start::<P>(state.slot + 1) {
            let report = epoch_processing::process_epoch(config, state, epoch_context)
                .map_err(|source| Error::ConsensusInvariantViolation { source })?;

            reports.push(report);
        }

        state.slot += 1;

        if is_epoch_start::<P>(state.slot) {
            epoch_context
                .rotate(config, state)
                .map_err(|source| Error::ConsensusInvariantViolation { source })?;
        }
    }

    debug!(
        "advanced state from slot {current} to slot {slot} ({} epoch transitions)",
        reports.len(),
    );

    Ok(reports)
}

pub fn process_slot<P: Preset>(state: &mut BeaconState<P>) {
    let slot = state.slot;

    // > Cache state root
    let previous_state_root = state.hash_tree_root();
    *state.state_roots.mod_index_mut(slot) = previous_state_root;

    // > Cache latest block header state root
    if state.latest_block_header.state_root.is_zero() {
        state.latest_block_header.state_root = previous_state_root;
    }

    // > Cache block root
    let previous_block_root = state.latest_block_header.hash_tree_root();
    *state.block_roots.mod_index_mut(slot) = previous_block_root;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use helper_functions::misc::compute_start_slot_at_epoch;
    use itertools::Itertools as _;
    use test_case::test_case;
    use typenum::Unsigned as _;
    use types::{phase0::primitives::H256, preset::Minimal};

    use crate::{
        error::{classify, ErrorKind},
        test_utils::{self, full_participation},
    };

    use super::*;

    const SLOTS_PER_EPOCH: u64 = <Minimal as Preset>::SlotsPerEpoch::U64;

    #[test_case(0, 0; "same slot at genesis")]
    #[test_case(5, 5; "same slot")]
    #[test_case(5, 3; "earlier slot")]
    fn target_not_after_current_slot_is_invalid_transition(
        current: Slot,
        target: Slot,
    ) -> Result<()> {
        let config = Config::minimal();
        let mut state_context = test_utils::state_context_at_slot(&config, 16, current)?;
        let original = state_context.clone();

        let error = process_slots(&config, &mut state_context, target)
            .expect_err("target slot is not later than current slot");

        assert_eq!(classify(&error), ErrorKind::InvalidTransition);
        assert!(Arc::ptr_eq(state_context.state(), original.state()));

        Ok(())
    }

    #[test]
    fn one_epoch_from_genesis_runs_one_epoch_transition() -> Result<()> {
        let config = Config::minimal();
        let state = test_utils::genesis_state::<Minimal>(64)?;
        let mut state_context = StateContext::load(&config, Arc::new(state))?;

        let reports = process_slots(&config, &mut state_context, SLOTS_PER_EPOCH)?;

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].epoch, 0);
        assert!(!state_context.state().justification_bits[0]);
        assert_eq!(state_context.slot(), SLOTS_PER_EPOCH);
        assert_eq!(state_context.epoch_context().epoch(), 1);

        Ok(())
    }

    #[test]
    fn attestations_justify_and_finalize_later_epochs() -> Result<()> {
        let config = Config::minimal();
        let mut state_context = test_utils::state_context_at_slot(&config, 64, 23)?;

        for epoch in [2, 3] {
            let first_slot = compute_start_slot_at_epoch::<Minimal>(epoch);
            let last_slot = first_slot + SLOTS_PER_EPOCH - 1;
            let mut attestations = vec![];

            // The root of the last slot is not known until the slot is processed.
            for slot in first_slot..last_slot {
                attestations.extend(full_participation(&state_context, slot, epoch, 1)?);
            }

            state_context.parts_mut().0.current_epoch_attestations = attestations.try_into()?;

            let reports = process_slots(&config, &mut state_context, last_slot + 1)?;

            assert_eq!(reports.len(), 1);
            assert_eq!(reports[0].epoch, epoch);
            assert_eq!(reports[0].current_justified_checkpoint.epoch, epoch);

            if epoch < 3 {
                let next_last_slot = last_slot + SLOTS_PER_EPOCH;
                process_slots(&config, &mut state_context, next_last_slot)?;
            }
        }

        let state = state_context.state();

        assert_eq!(
            state.justification_bits.iter().collect_vec(),
            [true, true, false, false],
        );
        assert_eq!(state.current_justified_checkpoint.epoch, 3);
        assert_eq!(state.finalized_checkpoint.epoch, 2);

        Ok(())
    }

    #[test_case(16)]
    #[test_case(64)]
    fn stepwise_advancement_matches_single_advancement(validator_count: u64) -> Result<()> {
        let config = Config::minimal();
        let target = compute_start_slot_at_epoch::<Minimal>(3) + 2;
        let genesis = test_utils::state_context_at_slot(&config, validator_count, 0)?;

        let mut at_once = genesis.clone();
        let reports = process_slots(&config, &mut at_once, target)?;

        let mut stepwise = genesis;
        let mut stepwise_reports = vec![];

        for slot in [1, 7, 8, 9, 20, target] {
            stepwise_reports.extend(process_slots(&config, &mut stepwise, slot)?);
        }

        assert_eq!(at_once.state(), stepwise.state());
        assert_eq!(at_once.epoch_context().epoch(), stepwise.epoch_context().epoch());
        assert_eq!(
            at_once.epoch_context().proposers(),
            stepwise.epoch_context().proposers(),
        );
        assert_eq!(
            reports.iter().map(|report| report.epoch).collect_vec(),
            stepwise_reports.iter().map(|report| report.epoch).collect_vec(),
        );

        Ok(())
    }

    #[test]
    fn process_slot_caches_roots() -> Result<()> {
        let mut state = test_utils::genesis_state::<Minimal>(4)?;
        let state_root = state.hash_tree_root();

        process_slot(&mut state);

        assert_eq!(*state.state_roots.mod_index(0), state_root);
        assert_eq!(state.latest_block_header.state_root, state_root);
        assert_eq!(
            *state.block_roots.mod_index(0),
            state.latest_block_header.hash_tree_root(),
        );
        assert_ne!(*state.block_roots.mod_index(0), H256::zero());

        Ok(())
    }

    #[test]
    fn should_process_compares_slots() -> Result<()> {
        let state = test_utils::genesis_state::<Minimal>(4)?;

        let block = BeaconBlock {
            slot: 1,
            ..BeaconBlock::default()
        };

        assert!(ProcessSlots::Always.should_process(&state, &block));
        assert!(ProcessSlots::IfNeeded.should_process(&state, &block));
        assert!(!ProcessSlots::Never.should_process(&state, &block));
        assert!(!ProcessSlots::IfNeeded.should_process(&state, &BeaconBlock::default()));

        Ok(())
    }
}
