use std::sync::Arc;

use thiserror::Error;
use types::phase0::primitives::{Slot, H256};

/// Failure of a regeneration request.
///
/// Every waiter on a shared computation receives a clone of the same error.
#[derive(Clone, Debug, Error)]
pub enum Error {
    #[error("no cached or stored ancestor of block {block_root:?} could be found")]
    UnknownAncestor { block_root: H256 },
    #[error("state of block {block_root:?} at slot {block_slot} cannot be rewound to slot {target_slot}")]
    SlotBeforeBlock {
        block_root: H256,
        block_slot: Slot,
        target_slot: Slot,
    },
    #[error("too many regenerations in progress ({queue_size} distinct targets)")]
    Throttled { queue_size: usize },
    #[error("regeneration was aborted")]
    Aborted,
    #[error("replay failed: {0:#}")]
    Transition(Arc<anyhow::Error>),
    #[error("storage failed: {0:#}")]
    Storage(Arc<anyhow::Error>),
}

impl Error {
    pub(crate) fn transition(error: anyhow::Error) -> Self {
        Self::Transition(Arc::new(error))
    }

    pub(crate) fn storage(error: anyhow::Error) -> Self {
        Self::Storage(Arc::new(error))
    }

    /// Returns the underlying transition error.
    ///
    /// Use [`transition_functions::classify`] on it to tell invalid blocks from invariant
    /// violations.
    #[must_use]
    pub fn transition_error(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Transition(error) => Some(&**error),
            _ => None,
        }
    }
}
