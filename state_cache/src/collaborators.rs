use std::sync::Arc;

use anyhow::Result;
use epoch_context::StateContext;
use helper_functions::verifier::Verifier;
use transition_functions::{ProcessSlots, StateRootPolicy};
use types::{
    config::Config,
    phase0::{
        beacon_state::BeaconState,
        containers::{Checkpoint, SignedBeaconBlock},
        primitives::{Slot, H256},
    },
    preset::Preset,
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BlockSummary {
    pub slot: Slot,
    pub parent_root: H256,
}

/// Queries answered by fork choice.
pub trait ForkChoice: Send + Sync {
    fn head(&self) -> H256;

    /// Returns `None` for blocks fork choice does not know about.
    fn block_summary(&self, block_root: H256) -> Option<BlockSummary>;

    fn finalized_checkpoint(&self) -> Checkpoint;
}

/// Durable lookups used when the cache does not contain an ancestor.
pub trait Storage<P: Preset>: Send + Sync {
    fn block(&self, block_root: H256) -> Result<Option<Arc<SignedBeaconBlock<P>>>>;

    /// Returns the post-state of the block with root `block_root` if it was persisted.
    fn state(&self, block_root: H256) -> Result<Option<Arc<BeaconState<P>>>>;
}

/// Replays blocks and empty slots on top of a cached state.
pub trait BlockReplayer<P: Preset>: Send + Sync {
    fn apply_block(
        &self,
        config: &Config,
        state_context: &StateContext<P>,
        block: &SignedBeaconBlock<P>,
    ) -> Result<StateContext<P>>;

    fn process_slots(
        &self,
        config: &Config,
        state_context: &mut StateContext<P>,
        slot: Slot,
    ) -> Result<()>;
}

/// Replays blocks with [`transition_functions::state_transition`].
///
/// Blocks are replayed only after they have been imported, so their state roots are trusted.
/// Usually `V` is [`DepositOnlyVerifier`](helper_functions::verifier::DepositOnlyVerifier).
#[derive(Clone, Copy, Default, Debug)]
pub struct TransitionReplayer<V> {
    verifier: V,
}

impl<V> TransitionReplayer<V> {
    pub const fn new(verifier: V) -> Self {
        Self { verifier }
    }
}

impl<P: Preset, V: Verifier + Clone + Send + Sync> BlockReplayer<P> for TransitionReplayer<V> {
    fn apply_block(
        &self,
        config: &Config,
        state_context: &StateContext<P>,
        block: &SignedBeaconBlock<P>,
    ) -> Result<StateContext<P>> {
        transition_functions::state_transition(
            config,
            state_context,
            block,
            ProcessSlots::IfNeeded,
            StateRootPolicy::Trust,
            self.verifier.clone(),
        )
    }

    fn process_slots(
        &self,
        config: &Config,
        state_context: &mut StateContext<P>,
        slot: Slot,
    ) -> Result<()> {
        transition_functions::process_slots(config, state_context, slot)?;
        Ok(())
    }
}
