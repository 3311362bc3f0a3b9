use std::{collections::HashMap, sync::Arc};

use anyhow::{ensure, Result};
use epoch_context::StateContext;
use helper_functions::verifier::NullVerifier;
use log::debug;
use ssz::SszHash as _;
use state_cache::{BlockSummary, ForkChoice, Storage};
use std_ext::ArcExt as _;
use transition_functions::{ProcessSlots, StateRootPolicy};
use types::{
    config::Config,
    phase0::{
        beacon_state::BeaconState,
        containers::{BeaconBlock, BeaconBlockBody, Checkpoint, SignedBeaconBlock},
        primitives::{SignatureBytes, Slot, H256},
    },
    preset::Preset,
};

/// A linear chain of empty blocks held in memory.
///
/// Only the genesis state is stored. Every other state has to be regenerated.
pub struct MemoryChain<P: Preset> {
    blocks: HashMap<H256, Arc<SignedBeaconBlock<P>>>,
    genesis_root: H256,
    genesis_state: Arc<BeaconState<P>>,
    head: H256,
    finalized_checkpoint: Checkpoint,
}

impl<P: Preset> MemoryChain<P> {
    pub fn build(
        config: &Config,
        genesis_state: BeaconState<P>,
        block_slots: impl IntoIterator<Item = Slot>,
    ) -> Result<Self> {
        let genesis_block = genesis::beacon_block(&genesis_state);
        let genesis_root = genesis_block.message.hash_tree_root();
        let genesis_state = Arc::new(genesis_state);

        let mut chain = Self {
            blocks: HashMap::from([(genesis_root, Arc::new(genesis_block))]),
            genesis_root,
            genesis_state: genesis_state.clone_arc(),
            head: genesis_root,
            finalized_checkpoint: Checkpoint {
                epoch: 0,
                root: genesis_root,
            },
        };

        let mut state_context = StateContext::load(config, genesis_state)?;

        for slot in block_slots {
            state_context = chain.push_empty_block(config, &state_context, slot)?;
        }

        chain.finalized_checkpoint = state_context.state().finalized_checkpoint;

        if chain.finalized_checkpoint.root.is_zero() {
            chain.finalized_checkpoint.root = genesis_root;
        }

        Ok(chain)
    }

    #[must_use]
    pub const fn head_root(&self) -> H256 {
        self.head
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    fn push_empty_block(
        &mut self,
        config: &Config,
        parent: &StateContext<P>,
        slot: Slot,
    ) -> Result<StateContext<P>> {
        ensure!(
            parent.slot() < slot,
            "blocks must be in increasing slot order (parent slot: {}, block slot: {slot})",
            parent.slot(),
        );

        let mut advanced = parent.clone();

        transition_functions::process_slots(config, &mut advanced, slot)?;

        let mut block = BeaconBlock {
            slot,
            proposer_index: advanced.epoch_context().get_beacon_proposer(slot)?,
            parent_root: self.head,
            state_root: H256::zero(),
            body: BeaconBlockBody {
                eth1_data: advanced.state().eth1_data,
                ..BeaconBlockBody::default()
            },
        };

        block.state_root = transition_functions::compute_new_state_root(config, parent, &block)?;

        let signed_block = block.with_signature(SignatureBytes::zero());

        let post_state = transition_functions::state_transition(
            config,
            parent,
            &signed_block,
            ProcessSlots::IfNeeded,
            StateRootPolicy::Verify,
            NullVerifier,
        )?;

        let block_root = signed_block.message.hash_tree_root();

        debug!("built block {block_root:?} at slot {slot}");

        self.blocks.insert(block_root, Arc::new(signed_block));
        self.head = block_root;

        Ok(post_state)
    }
}

impl<P: Preset> ForkChoice for MemoryChain<P> {
    fn head(&self) -> H256 {
        self.head
    }

    fn block_summary(&self, block_root: H256) -> Option<BlockSummary> {
        self.blocks.get(&block_root).map(|block| BlockSummary {
            slot: block.message.slot,
            parent_root: block.message.parent_root,
        })
    }

    fn finalized_checkpoint(&self) -> Checkpoint {
        self.finalized_checkpoint
    }
}

impl<P: Preset> Storage<P> for MemoryChain<P> {
    fn block(&self, block_root: H256) -> Result<Option<Arc<SignedBeaconBlock<P>>>> {
        Ok(self.blocks.get(&block_root).cloned())
    }

    fn state(&self, block_root: H256) -> Result<Option<Arc<BeaconState<P>>>> {
        Ok((block_root == self.genesis_root).then(|| self.genesis_state.clone_arc()))
    }
}
