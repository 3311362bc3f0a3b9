use core::num::NonZeroU64;

use clap::{Args, Subcommand};
use types::{phase0::primitives::Slot, preset::PresetName};

#[derive(Clone, Copy, Args)]
#[cfg_attr(test, derive(PartialEq, Eq, Debug))]
pub struct ChainOptions {
    /// Preset and default configuration to use
    #[clap(long, default_value_t = PresetName::Minimal)]
    pub preset: PresetName,

    /// Number of validators in the quick start genesis state
    #[clap(long, default_value = "64")]
    pub validators: NonZeroU64,
}

#[derive(Clone, Subcommand)]
#[cfg_attr(test, derive(PartialEq, Eq, Debug))]
pub enum Command {
    /// Advance a quick start genesis state through empty slots
    /// (example: transition_tool slots --to 64)
    Slots {
        #[clap(flatten)]
        chain: ChainOptions,

        /// Slot to advance to
        #[clap(long, value_name = "SLOT")]
        to: Slot,
    },

    /// Build a chain of empty blocks and regenerate states from its genesis state
    /// (example: transition_tool regen --blocks 20 --target 40)
    Regen {
        #[clap(flatten)]
        chain: ChainOptions,

        /// Number of blocks to build, one per slot starting at slot 1
        #[clap(long, default_value = "16")]
        blocks: u64,

        /// Slot to regenerate the head state at (defaults to the head block's slot)
        #[clap(long, value_name = "SLOT")]
        target: Option<Slot>,

        /// Number of identical requests to issue at once
        #[clap(long, default_value = "4")]
        concurrency: usize,

        /// Maximum number of states to keep in the cache
        #[clap(long, default_value = "96")]
        max_states: usize,

        /// Maximum number of distinct regenerations in progress at once
        #[clap(long, default_value = "256")]
        queue_size: usize,
    },
}
