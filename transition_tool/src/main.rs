//! Command line driver for the state transition and state regeneration crates.

use core::{future::Future, num::NonZeroU64};
use std::{process::ExitCode, sync::Arc};

use anyhow::{ensure, Result};
use clap::{Error as ClapError, Parser};
use epoch_context::StateContext;
use helper_functions::verifier::NullVerifier;
use log::{error, info};
use ssz::SszHash as _;
use state_cache::{ForkChoice as _, RegenConfig, Regenerator, TransitionReplayer};
use std_ext::ArcExt as _;
use tokio::runtime::Builder;
use types::{
    config::Config,
    phase0::primitives::Slot,
    preset::{Mainnet, Minimal, Preset, PresetName},
};

use crate::{
    commands::{ChainOptions, Command},
    memory_chain::MemoryChain,
};

mod commands;
mod memory_chain;

#[derive(Parser)]
#[clap(verbatim_doc_comment)]
struct TransitionToolArgs {
    #[clap(subcommand)]
    command: Command,
}

fn main() -> ExitCode {
    if let Err(error) = try_main() {
        error.downcast_ref().map(ClapError::exit);
        error!("{error:?}");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn try_main() -> Result<()> {
    binary_utils::initialize_logger(module_path!(), false)?;
    binary_utils::initialize_rayon()?;

    match TransitionToolArgs::try_parse()?.command {
        Command::Slots { chain, to } => match chain.preset {
            PresetName::Mainnet => advance_slots::<Mainnet>(chain, to),
            PresetName::Minimal => advance_slots::<Minimal>(chain, to),
        },
        Command::Regen {
            chain,
            blocks,
            target,
            concurrency,
            max_states,
            queue_size,
        } => {
            let regen_config = RegenConfig {
                max_states,
                queue_size,
                ..RegenConfig::default()
            };

            match chain.preset {
                PresetName::Mainnet => block_on(regenerate::<Mainnet>(
                    chain,
                    blocks,
                    target,
                    concurrency,
                    regen_config,
                )),
                PresetName::Minimal => block_on(regenerate::<Minimal>(
                    chain,
                    blocks,
                    target,
                    concurrency,
                    regen_config,
                )),
            }
        }
    }
}

fn block_on(future: impl Future<Output = Result<()>>) -> Result<()> {
    Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(future)
}

fn quick_start<P: Preset>(config: &Config, validators: NonZeroU64) -> Result<StateContext<P>> {
    let (genesis_state, _) = interop::quick_start_beacon_state::<P>(config, 0, validators)?;
    StateContext::load(config, Arc::new(genesis_state))
}

fn advance_slots<P: Preset>(chain: ChainOptions, target: Slot) -> Result<()> {
    let config = chain.preset.default_config();
    let mut state_context = quick_start::<P>(&config, chain.validators)?;

    info!(
        "advancing {} preset state with {} validators to slot {target}",
        chain.preset, chain.validators,
    );

    let reports = transition_functions::process_slots(&config, &mut state_context, target)?;

    for report in reports {
        info!(
            "epoch {} ended (justified: {:?}, finalized: {:?}, activated: {}, ejected: {}, slashed: {})",
            report.epoch,
            report.current_justified_checkpoint,
            report.finalized_checkpoint,
            report.registry_updates.activated.len(),
            report.registry_updates.ejected.len(),
            report.slashing_penalties.len(),
        );
    }

    info!(
        "state at slot {} has root {:?}",
        state_context.slot(),
        state_context.state().hash_tree_root(),
    );

    Ok(())
}

async fn regenerate<P: Preset>(
    chain: ChainOptions,
    blocks: u64,
    target: Option<Slot>,
    concurrency: usize,
    regen_config: RegenConfig,
) -> Result<()> {
    ensure!(concurrency > 0, "at least one request must be issued");

    let config = Arc::new(chain.preset.default_config());
    let genesis_state = quick_start::<P>(&config, chain.validators)?;

    let memory_chain = Arc::new(MemoryChain::build(
        &config,
        (**genesis_state.state()).clone(),
        1..=blocks,
    )?);

    info!("built chain of {} blocks", memory_chain.len());

    let regenerator = Arc::new(Regenerator::new(
        config.clone_arc(),
        regen_config,
        memory_chain.clone_arc(),
        memory_chain.clone_arc(),
        Arc::new(TransitionReplayer::new(NullVerifier)),
    ));

    let head_root = memory_chain.head_root();

    let requests = (0..concurrency)
        .map(|_| {
            let regenerator = regenerator.clone_arc();
            tokio::spawn(async move { regenerator.get_state(head_root, target).await })
        })
        .collect::<Vec<_>>();

    let mut roots = vec![];

    for request in requests {
        let state_context = request.await??;
        roots.push(state_context.state().hash_tree_root());
    }

    ensure!(
        roots
            .windows(2)
            .all(|pair| matches!(pair, [first, second] if first == second)),
        "concurrent requests for the same state produced different states",
    );

    info!(
        "regenerated head state {:?} ({} requests, {} states cached)",
        roots.first(),
        concurrency,
        regenerator.cached_state_count()?,
    );

    let finalized_checkpoint = memory_chain.finalized_checkpoint();
    let pruned = regenerator.on_finalized(finalized_checkpoint)?;

    info!("pruned {pruned} states after finalization of {finalized_checkpoint:?}");

    regenerator.shutdown();

    Ok(())
}
