//! State regeneration on top of a bounded cache of [`StateContext`](epoch_context::StateContext)s.
//!
//! [`Regenerator`] answers requests for the state of a block at a slot. Concurrent requests for
//! the same state share one computation, and the number of distinct computations in flight is
//! bounded by [`RegenConfig::queue_size`].

pub use crate::{
    collaborators::{BlockReplayer, BlockSummary, ForkChoice, Storage, TransitionReplayer},
    error::Error,
    job_queue::{JobQueue, RegenKey},
    regen_config::RegenConfig,
    regenerator::Regenerator,
    state_cache::{PinGuard, StateCache},
};

mod collaborators;
mod error;
mod job_queue;
mod regen_config;
mod regenerator;
mod state_cache;
