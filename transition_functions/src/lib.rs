//! Phase 0 state transition over [`StateContext`](epoch_context::StateContext)s.
//!
//! Slot processing runs the epoch transition before incrementing the slot into a new epoch
//! and rotates the epoch context right after. Block processing always works on a private copy.

pub use crate::{
    block_processing::{count_required_signatures, process_block},
    epoch_processing::{process_epoch, EpochReport, RegistryUpdates},
    error::{classify, Error, ErrorKind, Operation, ResultExt},
    slot_processing::{process_slot, process_slots, ProcessSlots},
    state_transition::{compute_new_state_root, state_transition, StateRootPolicy},
};

pub mod block_processing;
pub mod epoch_intermediates;
pub mod epoch_processing;

mod error;
mod slot_processing;
mod state_transition;

#[cfg(test)]
mod test_utils;
