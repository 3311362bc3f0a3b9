use anyhow::{ensure, Result};
use epoch_context::StateContext;
use helper_functions::verifier::{NullVerifier, Verifier};
use ssz::SszHash as _;
use types::{
    config::Config,
    phase0::{
        beacon_state::BeaconState,
        containers::{BeaconBlock, SignedBeaconBlock},
        primitives::H256,
    },
    preset::Preset,
};

use crate::{
    block_processing,
    error::{Error, Operation, ResultExt as _},
    slot_processing::{self, ProcessSlots},
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StateRootPolicy {
    Verify,
    Trust,
}

impl StateRootPolicy {
    pub fn verify<P: Preset>(self, state: &BeaconState<P>, block: &BeaconBlock<P>) -> Result<()> {
        match self {
            Self::Verify => {
                let computed = state.hash_tree_root();
                let in_block = block.state_root;

                ensure!(
                    computed == in_block,
                    Error::StateRootMismatch { computed, in_block },
                );
            }
            Self::Trust => {}
        }

        Ok(())
    }
}

/// Applies `signed_block` to a private copy of `state_context`.
///
/// `state_context` itself is never modified. The new pair is returned only if every step succeeds.
pub fn state_transition<P: Preset, V: Verifier + Sync>(
    config: &Config,
    state_context: &StateContext<P>,
    signed_block: &SignedBeaconBlock<P>,
    process_slots: ProcessSlots,
    state_root_policy: StateRootPolicy,
    mut verifier: V,
) -> Result<StateContext<P>> {
    let block = &signed_block.message;
    let mut post_state_context = state_context.clone();

    // > Process slots (including those with no blocks) since block
    if process_slots.should_process(post_state_context.state(), block) {
        slot_processing::process_slots(config, &mut post_state_context, block.slot)?;
    }

    let (state, epoch_context) = post_state_context.parts_mut();

    verifier.reserve(block_processing::count_required_signatures(block));

    // > Verify signature
    block_processing::verify_block_signature(
        config,
        state,
        epoch_context,
        block,
        signed_block.signature,
        &mut verifier,
    )
    .in_operation(Operation::BlockSignature)?;

    // > Process block
    block_processing::custom_process_block(config, state, epoch_context, block, &mut verifier)?;

    // Batched signatures and the state root are independent of each other.
    // Hashing a large state takes about as long as verifying a block's worth of signatures.
    let state = &*state;

    let (signature_result, state_root_result) = rayon::join(
        || verifier.finish(),
        // > Verify state root
        || state_root_policy.verify(state, block),
    );

    signature_result?;
    state_root_result?;

    Ok(post_state_context)
}

/// Computes the state root a block proposer should put in `block`.
///
/// Signatures are not checked. The block may have any state root.
pub fn compute_new_state_root<P: Preset>(
    config: &Config,
    pre_state_context: &StateContext<P>,
    block: &BeaconBlock<P>,
) -> Result<H256> {
    let mut state_context = pre_state_context.clone();

    if ProcessSlots::IfNeeded.should_process(state_context.state(), block) {
        slot_processing::process_slots(config, &mut state_context, block.slot)?;
    }

    let (state, epoch_context) = state_context.parts_mut();

    block_processing::process_block(config, state, epoch_context, block, NullVerifier)?;

    Ok(state.hash_tree_root())
}
