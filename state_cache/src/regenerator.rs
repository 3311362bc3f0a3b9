use std::sync::Arc;

use anyhow::Result;
use epoch_context::StateContext;
use helper_functions::misc::compute_start_slot_at_epoch;
use log::{debug, info, warn};
use std_ext::ArcExt as _;
use tokio_util::sync::CancellationToken;
use types::{
    config::Config,
    phase0::{
        containers::{BeaconBlock, Checkpoint, SignedBeaconBlock},
        primitives::{Slot, H256},
    },
    preset::Preset,
};

use crate::{
    collaborators::{BlockReplayer, ForkChoice, Storage},
    error::Error,
    job_queue::{JobQueue, RegenKey},
    regen_config::RegenConfig,
    state_cache::StateCache,
};

/// Produces the state of any known block at any later slot.
///
/// Requests are served from the cache when possible. Otherwise the nearest cached or stored
/// ancestor state is advanced through the intervening blocks and empty slots on a blocking
/// thread. Concurrent requests for the same block and slot share one replay.
pub struct Regenerator<P: Preset> {
    replay: Arc<Replay<P>>,
    queue: JobQueue<P>,
}

struct Replay<P: Preset> {
    config: Arc<Config>,
    cache: Arc<StateCache<P>>,
    fork_choice: Arc<dyn ForkChoice>,
    storage: Arc<dyn Storage<P>>,
    replayer: Arc<dyn BlockReplayer<P>>,
}

impl<P: Preset> Regenerator<P> {
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        regen_config: RegenConfig,
        fork_choice: Arc<dyn ForkChoice>,
        storage: Arc<dyn Storage<P>>,
        replayer: Arc<dyn BlockReplayer<P>>,
    ) -> Self {
        let RegenConfig {
            max_states,
            queue_size,
            lock_timeout,
        } = regen_config;

        Self {
            replay: Arc::new(Replay {
                config,
                cache: Arc::new(StateCache::new(max_states, lock_timeout)),
                fork_choice,
                storage,
                replayer,
            }),
            queue: JobQueue::new(queue_size),
        }
    }

    /// Returns the state of `block_root` at `target_slot`, or at the block's own slot if `None`.
    pub async fn get_state(
        &self,
        block_root: H256,
        target_slot: Option<Slot>,
    ) -> Result<StateContext<P>, Error> {
        let block_slot = self.replay.block_slot(block_root)?;
        let slot = target_slot.unwrap_or(block_slot);

        if slot < block_slot {
            return Err(Error::SlotBeforeBlock {
                block_root,
                block_slot,
                target_slot: slot,
            });
        }

        if let Ok(Some(state_context)) = self.replay.cache.get_exact(block_root, slot) {
            debug!("state of block {block_root:?} at slot {slot} found in cache");
            return Ok(state_context);
        }

        let key = RegenKey { block_root, slot };
        let replay = self.replay.clone_arc();

        let job = self.queue.submit(key, move |cancellation_token| async move {
            tokio::task::spawn_blocking(move || replay.regenerate(key, &cancellation_token))
                .await
                .unwrap_or_else(|error| Err(Error::transition(error.into())))
        })?;

        job.await
    }

    pub async fn get_block_slot_state(
        &self,
        block_root: H256,
        slot: Slot,
    ) -> Result<StateContext<P>, Error> {
        self.get_state(block_root, Some(slot)).await
    }

    /// Returns the state `block` should be applied to.
    pub async fn get_pre_state(&self, block: &BeaconBlock<P>) -> Result<StateContext<P>, Error> {
        self.get_state(block.parent_root, Some(block.slot)).await
    }

    /// Returns the state of `checkpoint.root` at the first slot of `checkpoint.epoch`.
    pub async fn get_checkpoint_state(
        &self,
        checkpoint: Checkpoint,
    ) -> Result<StateContext<P>, Error> {
        let slot = compute_start_slot_at_epoch::<P>(checkpoint.epoch);
        self.get_state(checkpoint.root, Some(slot)).await
    }

    pub async fn get_head_state(&self) -> Result<StateContext<P>, Error> {
        self.get_state(self.replay.fork_choice.head(), None).await
    }

    /// Publishes the post-state of a newly imported block.
    pub fn insert_state(&self, block_root: H256, state_context: StateContext<P>) -> Result<()> {
        self.replay.cache.insert(block_root, state_context)
    }

    /// Drops cached states that can no longer be requested after `finalized` became final.
    ///
    /// States of blocks that do not descend from `finalized` are removed, as are states of any
    /// block before the finalized block's slot. Returns the number of states removed.
    pub fn on_finalized(&self, finalized: Checkpoint) -> Result<usize> {
        let Replay {
            cache, fork_choice, ..
        } = &*self.replay;

        let finalized_slot = self.replay.block_slot(finalized.root)?;

        let obsolete_roots = cache
            .roots()?
            .into_iter()
            .filter(|block_root| {
                !descends_from(fork_choice.as_ref(), *block_root, finalized.root, finalized_slot)
            })
            .collect::<Vec<_>>();

        cache.prune(&obsolete_roots, finalized_slot)
    }

    /// Rejects every waiter on the regeneration of `block_root` at `slot`.
    pub fn cancel(&self, block_root: H256, slot: Slot) -> bool {
        self.queue.cancel(RegenKey { block_root, slot })
    }

    /// Rejects every regeneration in progress and every future request with [`Error::Aborted`].
    pub fn shutdown(&self) {
        info!("shutting down state regeneration");
        self.queue.abort();
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.queue.len()
    }

    pub fn cached_state_count(&self) -> Result<usize> {
        self.replay.cache.len()
    }
}

impl<P: Preset> Replay<P> {
    fn block_slot(&self, block_root: H256) -> Result<Slot, Error> {
        if let Some(summary) = self.fork_choice.block_summary(block_root) {
            return Ok(summary.slot);
        }

        self.storage
            .block(block_root)
            .map_err(Error::storage)?
            .map(|block| block.message.slot)
            .ok_or(Error::UnknownAncestor { block_root })
    }

    fn regenerate(
        &self,
        key: RegenKey,
        cancellation_token: &CancellationToken,
    ) -> Result<StateContext<P>, Error> {
        let RegenKey { block_root, slot } = key;

        // Blocks to replay, newest first.
        let mut blocks: Vec<(H256, Arc<SignedBeaconBlock<P>>)> = vec![];
        let mut current_root = block_root;
        let mut latest_usable_slot = slot;
        let mut published = vec![];

        let mut state_context = loop {
            ensure_not_cancelled(cancellation_token)?;

            let cached = self
                .cache
                .before_or_at_slot(current_root, latest_usable_slot)
                .unwrap_or_default();

            if let Some(state_context) = cached {
                break state_context;
            }

            if let Some(state) = self.storage.state(current_root).map_err(Error::storage)? {
                let state_context =
                    StateContext::load(&self.config, state).map_err(Error::transition)?;

                published.push((current_root, state_context.clone()));

                break state_context;
            }

            let block = self
                .storage
                .block(current_root)
                .map_err(Error::storage)?
                .ok_or(Error::UnknownAncestor { block_root })?;

            latest_usable_slot = block.message.slot;
            let parent_root = block.message.parent_root;
            blocks.push((current_root, block));
            current_root = parent_root;
        };

        let mut pinned_roots = blocks.iter().map(|(root, _)| *root).collect::<Vec<_>>();
        pinned_roots.push(current_root);

        // Replay holds its own references, so it can proceed unpinned.
        let _pin_guard = match self.cache.pin(pinned_roots) {
            Ok(guard) => Some(guard),
            Err(error) => {
                warn!("replaying state of block {block_root:?} without pinning ancestors: {error}");
                None
            }
        };

        let base_slot = state_context.slot();
        let block_count = blocks.len();

        for (block_root, block) in blocks.into_iter().rev() {
            ensure_not_cancelled(cancellation_token)?;

            state_context = self
                .replayer
                .apply_block(&self.config, &state_context, &block)
                .map_err(Error::transition)?;

            published.push((block_root, state_context.clone()));
        }

        while state_context.slot() < slot {
            ensure_not_cancelled(cancellation_token)?;

            let next_slot = state_context.slot() + 1;

            self.replayer
                .process_slots(&self.config, &mut state_context, next_slot)
                .map_err(Error::transition)?;
        }

        ensure_not_cancelled(cancellation_token)?;

        published.push((block_root, state_context.clone()));

        for (block_root, state_context) in published {
            if let Err(error) = self.cache.insert(block_root, state_context) {
                warn!("could not cache state of block {block_root:?}: {error}");
            }
        }

        info!(
            "regenerated state of block {block_root:?} at slot {slot} \
             from state at slot {base_slot} ({block_count} blocks replayed)",
        );

        Ok(state_context)
    }
}

fn descends_from(
    fork_choice: &dyn ForkChoice,
    mut block_root: H256,
    ancestor_root: H256,
    ancestor_slot: Slot,
) -> bool {
    loop {
        if block_root == ancestor_root {
            return true;
        }

        let Some(summary) = fork_choice.block_summary(block_root) else {
            return false;
        };

        if summary.slot <= ancestor_slot {
            return false;
        }

        block_root = summary.parent_root;
    }
}

fn ensure_not_cancelled(cancellation_token: &CancellationToken) -> Result<(), Error> {
    if cancellation_token.is_cancelled() {
        return Err(Error::Aborted);
    }

    Ok(())
}
