use std::sync::Arc;

use anyhow::Result;
use epoch_context::StateContext;
use helper_functions::{
    accessors::{get_block_root, get_block_root_at_slot},
    verifier::SignatureBackend,
};
use ssz::{BitList, SszHash as _};
use types::{
    config::Config,
    phase0::{
        beacon_state::BeaconState,
        consts::{FAR_FUTURE_EPOCH, GENESIS_EPOCH},
        containers::{
            AttestationData, BeaconBlock, BeaconBlockBody, BeaconBlockHeader, Checkpoint,
            PendingAttestation, Validator,
        },
        primitives::{Epoch, PublicKeyBytes, SignatureBytes, Slot, H256},
    },
    preset::{Minimal, Preset},
};

use crate::{slot_processing, state_transition};

// Treats a signature as valid if it starts with the signed message.
pub struct EchoBackend;

impl SignatureBackend for EchoBackend {
    fn verify(&self, _public_key: PublicKeyBytes, message: H256, signature: SignatureBytes) -> bool {
        signature[..H256::len_bytes()] == message[..]
    }

    fn fast_aggregate_verify(
        &self,
        public_keys: &[PublicKeyBytes],
        message: H256,
        signature: SignatureBytes,
    ) -> bool {
        !public_keys.is_empty() && signature[..H256::len_bytes()] == message[..]
    }
}

pub fn genesis_state<P: Preset>(validator_count: u64) -> Result<BeaconState<P>> {
    let validators = (0..validator_count)
        .map(|index| {
            let mut pubkey = PublicKeyBytes::zero();
            pubkey[..8].copy_from_slice(&index.to_le_bytes());

            Validator {
                pubkey,
                effective_balance: P::MAX_EFFECTIVE_BALANCE,
                activation_eligibility_epoch: GENESIS_EPOCH,
                activation_epoch: GENESIS_EPOCH,
                exit_epoch: FAR_FUTURE_EPOCH,
                withdrawable_epoch: FAR_FUTURE_EPOCH,
                ..Validator::default()
            }
        })
        .collect::<Vec<_>>();

    let balances = vec![P::MAX_EFFECTIVE_BALANCE; validators.len()];

    let mut state = BeaconState {
        latest_block_header: BeaconBlockHeader {
            body_root: BeaconBlockBody::<P>::default().hash_tree_root(),
            ..BeaconBlockHeader::default()
        },
        validators: validators.try_into()?,
        balances: balances.try_into()?,
        eth1_deposit_index: validator_count,
        ..BeaconState::default()
    };

    state.eth1_data.deposit_count = validator_count;

    Ok(state)
}

pub fn state_context_at_slot(
    config: &Config,
    validator_count: u64,
    slot: Slot,
) -> Result<StateContext<Minimal>> {
    let state = genesis_state::<Minimal>(validator_count)?;
    let state_context = StateContext::load(config, Arc::new(state))?;
    advance(config, state_context, slot)
}

pub fn advance(
    config: &Config,
    mut state_context: StateContext<Minimal>,
    slot: Slot,
) -> Result<StateContext<Minimal>> {
    if state_context.slot() < slot {
        slot_processing::process_slots(config, &mut state_context, slot)?;
    }

    Ok(state_context)
}

/// Builds a block with no operations on top of `state_context`, with the correct state root.
pub fn empty_block(
    config: &Config,
    state_context: &StateContext<Minimal>,
    slot: Slot,
) -> Result<BeaconBlock<Minimal>> {
    let advanced = advance(config, state_context.clone(), slot)?;

    let mut block = BeaconBlock {
        slot,
        proposer_index: advanced.epoch_context().get_beacon_proposer(slot)?,
        parent_root: advanced.state().latest_block_header.hash_tree_root(),
        state_root: H256::zero(),
        body: BeaconBlockBody {
            eth1_data: advanced.state().eth1_data,
            ..BeaconBlockBody::default()
        },
    };

    block.state_root = state_transition::compute_new_state_root(config, &advanced, &block)?;

    Ok(block)
}

/// Attestations by every member of every committee at `slot`, all matching source, target and
/// head. Validator 0 is recorded as the proposer that included them.
pub fn full_participation(
    state_context: &StateContext<Minimal>,
    slot: Slot,
    target_epoch: Epoch,
    inclusion_delay: u64,
) -> Result<Vec<PendingAttestation<Minimal>>> {
    let epoch_context = state_context.epoch_context();
    let state = state_context.state();

    (0..epoch_context.get_committee_count_at_slot(slot)?)
        .map(|index| {
            let committee = epoch_context.get_beacon_committee(slot, index)?;
            let mut aggregation_bits = BitList::with_length(committee.len());

            for position in 0..committee.len() {
                aggregation_bits.set(position, true);
            }

            Ok(PendingAttestation {
                aggregation_bits,
                data: AttestationData {
                    slot,
                    index,
                    beacon_block_root: get_block_root_at_slot(state, slot)?,
                    source: Checkpoint::default(),
                    target: Checkpoint {
                        epoch: target_epoch,
                        root: get_block_root(state, target_epoch)?,
                    },
                },
                inclusion_delay,
                proposer_index: 0,
            })
        })
        .collect()
}
