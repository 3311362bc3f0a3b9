//! Data derived from a `BeaconState` that is expensive to recompute.
//!
//! An [`EpochContext`] is only valid for the state it was derived from.
//! [`StateContext`] keeps the two together so that they cannot be separated by accident.

pub use crate::{
    epoch_context::{CommitteeAssignment, EpochContext},
    epoch_shuffling::EpochShuffling,
    error::Error,
    state_context::StateContext,
};

mod epoch_context;
mod epoch_shuffling;
mod error;
mod state_context;

#[cfg(test)]
mod test_utils;
