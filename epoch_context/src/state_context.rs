use std::sync::Arc;

use anyhow::Result;
use std_ext::ArcExt as _;
use types::{
    config::Config,
    phase0::{beacon_state::BeaconState, primitives::Slot},
    preset::Preset,
};

use crate::epoch_context::EpochContext;

/// A state paired with the epoch context derived from it.
///
/// Both halves are shared. The only way to obtain one is [`StateContext::load`],
/// and the only way to change one is [`StateContext::parts_mut`], which hands
/// out both halves together and copies a half only if another `StateContext`
/// still refers to it.
#[derive(Clone, Debug)]
pub struct StateContext<P: Preset> {
    state: Arc<BeaconState<P>>,
    epoch_context: Arc<EpochContext<P>>,
}

impl<P: Preset> StateContext<P> {
    pub fn load(config: &Config, state: Arc<BeaconState<P>>) -> Result<Self> {
        let epoch_context = Arc::new(EpochContext::load(config, &state)?);

        Ok(Self {
            state,
            epoch_context,
        })
    }

    #[must_use]
    pub const fn state(&self) -> &Arc<BeaconState<P>> {
        &self.state
    }

    #[must_use]
    pub const fn epoch_context(&self) -> &Arc<EpochContext<P>> {
        &self.epoch_context
    }

    #[must_use]
    pub fn slot(&self) -> Slot {
        self.state.slot
    }

    pub fn parts_mut(&mut self) -> (&mut BeaconState<P>, &mut EpochContext<P>) {
        (self.state.make_mut(), self.epoch_context.make_mut())
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;
    use types::preset::Minimal;

    use crate::test_utils;

    use super::*;

    #[test]
    fn mutation_does_not_leak_into_clones() -> Result<()> {
        let config = Config::minimal();
        let state = test_utils::genesis_state::<Minimal>(16)?;
        let original = StateContext::load(&config, Arc::new(state))?;
        let mut copy = original.clone();

        copy.parts_mut().0.slot = 5;

        assert_eq!(original.slot(), 0);
        assert_eq!(copy.slot(), 5);
        assert!(!Arc::ptr_eq(original.state(), copy.state()));

        Ok(())
    }

    #[test]
    fn clones_share_both_halves() -> Result<()> {
        let config = Config::minimal();
        let state = test_utils::genesis_state::<Minimal>(16)?;
        let original = StateContext::load(&config, Arc::new(state))?;
        let copy = original.clone();

        assert!(Arc::ptr_eq(original.state(), copy.state()));
        assert!(Arc::ptr_eq(original.epoch_context(), copy.epoch_context()));

        Ok(())
    }

    #[test_case(16; "small registry")]
    #[test_case(64; "two committees per slot")]
    fn parts_mut_rotates_in_place(validator_count: u64) -> Result<()> {
        let config = Config::minimal();
        let state = test_utils::genesis_state::<Minimal>(validator_count)?;
        let mut state_context = StateContext::load(&config, Arc::new(state))?;

        let (state, epoch_context) = state_context.parts_mut();

        state.slot = 8;
        epoch_context.rotate(&config, state)?;

        assert_eq!(state_context.epoch_context().epoch(), 1);
        assert_eq!(state_context.slot(), 8);

        Ok(())
    }
}
