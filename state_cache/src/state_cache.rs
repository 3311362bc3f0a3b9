use core::time::Duration;
use std::{collections::HashMap, sync::Arc};

use anyhow::{anyhow, Result};
use epoch_context::StateContext;
use im::OrdMap;
use log::{debug, info, warn};
use lru::LruCache;
use parking_lot::{Mutex, MutexGuard};
use std_ext::ArcExt as _;
use tap::Pipe as _;
use thiserror::Error;
use types::{
    phase0::primitives::{Slot, H256},
    preset::Preset,
};

type StateMap<P> = OrdMap<Slot, StateContext<P>>;

#[derive(Debug, Error)]
enum CacheLockError {
    #[error("could not obtain state cache lock in {} ms", timeout.as_millis())]
    CacheLockTimeout { timeout: Duration },
}

struct Entries<P: Preset> {
    // Ordered from most to least recently used block root.
    maps: LruCache<H256, StateMap<P>>,
    pins: HashMap<H256, usize>,
    state_count: usize,
}

/// States keyed by block root and slot.
///
/// The state of a block at slot `s` is the post-state of the block advanced through empty slots
/// up to `s`. Roots referenced by a [`PinGuard`] are never evicted or pruned.
pub struct StateCache<P: Preset> {
    entries: Mutex<Entries<P>>,
    max_states: usize,
    try_lock_timeout: Duration,
}

impl<P: Preset> StateCache<P> {
    #[must_use]
    pub fn new(max_states: usize, try_lock_timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(Entries {
                maps: LruCache::unbounded(),
                pins: HashMap::new(),
                state_count: 0,
            }),
            max_states,
            try_lock_timeout,
        }
    }

    pub fn get_exact(&self, block_root: H256, slot: Slot) -> Result<Option<StateContext<P>>> {
        self.try_lock()?
            .maps
            .get(&block_root)
            .and_then(|state_map| state_map.get(&slot))
            .cloned()
            .pipe(Ok)
    }

    /// Returns the latest state of `block_root` at or before `slot`.
    pub fn before_or_at_slot(
        &self,
        block_root: H256,
        slot: Slot,
    ) -> Result<Option<StateContext<P>>> {
        self.try_lock()?
            .maps
            .get(&block_root)
            .and_then(|state_map| state_map.get_prev(&slot))
            .map(|(_, state_context)| state_context.clone())
            .pipe(Ok)
    }

    pub fn insert(&self, block_root: H256, state_context: StateContext<P>) -> Result<()> {
        let mut entries = self.try_lock()?;
        let slot = state_context.slot();

        let state_map = entries
            .maps
            .get_or_insert_mut(block_root, StateMap::default);

        if state_map.insert(slot, state_context).is_none() {
            entries.state_count += 1;
        }

        self.evict(&mut entries);

        Ok(())
    }

    pub fn len(&self) -> Result<usize> {
        self.try_lock()?.state_count.pipe(Ok)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn roots(&self) -> Result<Vec<H256>> {
        self.try_lock()?
            .maps
            .iter()
            .map(|(block_root, _)| *block_root)
            .collect::<Vec<_>>()
            .pipe(Ok)
    }

    /// Removes every state of the roots in `obsolete_roots` and every state before
    /// `first_kept_slot`. Pinned roots are left untouched.
    ///
    /// Returns the number of states removed.
    pub fn prune(&self, obsolete_roots: &[H256], first_kept_slot: Slot) -> Result<usize> {
        let mut entries = self.try_lock()?;
        let Entries {
            maps,
            pins,
            state_count,
        } = &mut *entries;

        let before = *state_count;

        for block_root in obsolete_roots {
            if pins.contains_key(block_root) {
                continue;
            }

            if let Some(state_map) = maps.pop(block_root) {
                *state_count -= state_map.len();
            }
        }

        let mut emptied = vec![];

        for (block_root, state_map) in maps.iter_mut() {
            if pins.contains_key(block_root) {
                continue;
            }

            let (pruned, kept_at_slot, retained) = state_map.split_lookup(&first_kept_slot);

            *state_count -= pruned.len();
            *state_map = match kept_at_slot {
                Some(state_context) => retained.update(first_kept_slot, state_context),
                None => retained,
            };

            if state_map.is_empty() {
                emptied.push(*block_root);
            }
        }

        for block_root in emptied {
            maps.pop(&block_root);
        }

        let removed = before - *state_count;

        info!("pruned {removed} states from state cache ({state_count} remaining)");

        Ok(removed)
    }

    /// Protects the states of `block_roots` from eviction and pruning until the guard is dropped.
    pub fn pin(self: &Arc<Self>, block_roots: Vec<H256>) -> Result<PinGuard<P>> {
        let mut entries = self.try_lock()?;

        for block_root in &block_roots {
            *entries.pins.entry(*block_root).or_default() += 1;
        }

        Ok(PinGuard {
            cache: self.clone_arc(),
            block_roots,
        })
    }

    fn evict(&self, entries: &mut Entries<P>) {
        let Entries {
            maps,
            pins,
            state_count,
        } = entries;

        while *state_count > self.max_states {
            let Some(block_root) = maps
                .iter()
                .rev()
                .map(|(block_root, _)| *block_root)
                .find(|block_root| !pins.contains_key(block_root))
            else {
                debug!("state cache holds {state_count} states but all of them are pinned");
                return;
            };

            let Some(state_map) = maps.peek_mut(&block_root) else {
                return;
            };

            // Evict the oldest state of the least recently used root.
            let oldest_slot = state_map.get_min().map(|(slot, _)| *slot);

            if let Some(slot) = oldest_slot {
                state_map.remove(&slot);
                debug!("evicted state of block {block_root:?} at slot {slot}");
            }

            if state_map.is_empty() {
                maps.pop(&block_root);
            }

            *state_count -= 1;
        }
    }

    #[cfg(test)]
    pub(crate) fn hold_lock(&self) -> impl Sized + '_ {
        self.entries.lock()
    }

    fn try_lock(&self) -> Result<MutexGuard<Entries<P>>> {
        let timeout = self.try_lock_timeout;

        self.entries.try_lock_for(timeout).ok_or_else(|| {
            let error = CacheLockError::CacheLockTimeout { timeout };

            warn!("{error:?}");

            anyhow!(error)
        })
    }
}

pub struct PinGuard<P: Preset> {
    cache: Arc<StateCache<P>>,
    block_roots: Vec<H256>,
}

impl<P: Preset> Drop for PinGuard<P> {
    fn drop(&mut self) {
        let mut entries = self.cache.entries.lock();

        for block_root in &self.block_roots {
            if let Some(count) = entries.pins.get_mut(block_root) {
                *count -= 1;

                if *count == 0 {
                    entries.pins.remove(block_root);
                }
            }
        }

        self.cache.evict(&mut entries);
    }
}
