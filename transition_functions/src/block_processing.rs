use anyhow::{ensure, Result};
use epoch_context::EpochContext;
use helper_functions::{
    accessors::{get_current_epoch, get_indexed_attestation, get_previous_epoch, get_randao_mix},
    misc::compute_epoch_at_slot,
    mutators::{increase_balance, initiate_validator_exit, slash_validator},
    predicates::{
        is_active_validator, is_slashable_attestation_data, is_slashable_validator,
        is_valid_merkle_branch, validate_indexed_attestation,
    },
    signing::{RandaoEpoch, SignForAllForks as _, SignForSingleFork as _},
    verifier::Verifier,
};
use itertools::{EitherOrBoth, Itertools as _};
use log::debug;
use ssz::SszHash as _;
use typenum::Unsigned as _;
use types::{
    config::Config,
    phase0::{
        beacon_state::BeaconState,
        consts::FAR_FUTURE_EPOCH,
        containers::{
            Attestation, AttesterSlashing, BeaconBlock, BeaconBlockBody, BeaconBlockHeader,
            Deposit, DepositData, DepositMessage, Eth1Data, PendingAttestation, ProposerSlashing,
            SignedVoluntaryExit, Validator,
        },
        primitives::{SignatureBytes, ValidatorIndex, H256},
    },
    preset::Preset,
};

use crate::error::{Error, Operation, ResultExt as _};

/// Applies `block` to `state`, which must already be at `block.slot`.
///
/// `epoch_context` must be the context of `state`. It is updated when deposits add validators.
/// The block signature itself is not checked here.
pub fn process_block<P: Preset>(
    config: &Config,
    state: &mut BeaconState<P>,
    epoch_context: &mut EpochContext<P>,
    block: &BeaconBlock<P>,
    mut verifier: impl Verifier,
) -> Result<()> {
    verifier.reserve(count_required_signatures(block));
    custom_process_block(config, state, epoch_context, block, &mut verifier)?;
    verifier.finish()
}

/// Like [`process_block`] but leaves batched signatures in `verifier` unchecked.
pub fn custom_process_block<P: Preset>(
    config: &Config,
    state: &mut BeaconState<P>,
    epoch_context: &mut EpochContext<P>,
    block: &BeaconBlock<P>,
    mut verifier: impl Verifier,
) -> Result<()> {
    process_block_header(state, epoch_context, block).in_operation(Operation::BlockHeader)?;

    process_randao(config, state, epoch_context, &block.body, &mut verifier)
        .in_operation(Operation::Randao)?;

    process_eth1_data(state, block.body.eth1_data).in_operation(Operation::Eth1Data)?;

    process_operations(config, state, epoch_context, &block.body, verifier)
}

#[must_use]
pub fn count_required_signatures<P: Preset>(block: &BeaconBlock<P>) -> usize {
    let body = &block.body;

    1 + 2 * body.proposer_slashings.len()
        + 2 * body.attester_slashings.len()
        + body.attestations.len()
        + body.voluntary_exits.len()
}

pub fn process_block_header<P: Preset>(
    state: &mut BeaconState<P>,
    epoch_context: &EpochContext<P>,
    block: &BeaconBlock<P>,
) -> Result<()> {
    // > Verify that the slots match
    ensure!(
        block.slot == state.slot,
        Error::SlotMismatch {
            state_slot: state.slot,
            block_slot: block.slot,
        },
    );

    // > Verify that the block is newer than latest block header
    ensure!(
        block.slot > state.latest_block_header.slot,
        Error::BlockNotNewerThanLatestBlockHeader {
            block_slot: block.slot,
            block_header_slot: state.latest_block_header.slot,
        },
    );

    // > Verify that proposer index is the correct index
    let computed = epoch_context.get_beacon_proposer(state.slot)?;
    let in_block = block.proposer_index;

    ensure!(
        computed == in_block,
        Error::ProposerIndexMismatch { computed, in_block },
    );

    // > Verify that the parent matches
    let computed = state.latest_block_header.hash_tree_root();
    let in_block = block.parent_root;

    ensure!(
        computed == in_block,
        Error::ParentRootMismatch { computed, in_block },
    );

    // > Cache current block as the new latest block
    state.latest_block_header = BeaconBlockHeader {
        slot: block.slot,
        proposer_index: block.proposer_index,
        parent_root: block.parent_root,
        // > Overwritten in the next process_slot call
        state_root: H256::zero(),
        body_root: block.body.hash_tree_root(),
    };

    // > Verify proposer is not slashed
    let index = block.proposer_index;

    ensure!(
        !state.validators.get(index)?.slashed,
        Error::ProposerSlashed { index },
    );

    Ok(())
}

pub fn process_randao<P: Preset>(
    config: &Config,
    state: &mut BeaconState<P>,
    epoch_context: &EpochContext<P>,
    body: &BeaconBlockBody<P>,
    verifier: impl Verifier,
) -> Result<()> {
    let epoch = get_current_epoch(state);
    let proposer_index = epoch_context.get_beacon_proposer(state.slot)?;
    let public_key = state.validators.get(proposer_index)?.pubkey;

    // > Verify RANDAO reveal
    RandaoEpoch::from(epoch).verify(config, state, body.randao_reveal, public_key, verifier)?;

    // > Mix in RANDAO reveal
    let mix = get_randao_mix(state, epoch) ^ hashing::hash_768(body.randao_reveal);
    *state.randao_mixes.mod_index_mut(epoch) = mix;

    Ok(())
}

pub fn process_eth1_data<P: Preset>(state: &mut BeaconState<P>, eth1_data: Eth1Data) -> Result<()> {
    state.eth1_data_votes.push(eth1_data)?;

    let vote_count = state
        .eth1_data_votes
        .iter()
        .filter(|vote| **vote == eth1_data)
        .count();

    if vote_count * 2 > P::SlotsPerEth1VotingPeriod::USIZE {
        state.eth1_data = eth1_data;
    }

    Ok(())
}

fn process_operations<P: Preset, V: Verifier>(
    config: &Config,
    state: &mut BeaconState<P>,
    epoch_context: &mut EpochContext<P>,
    body: &BeaconBlockBody<P>,
    mut verifier: V,
) -> Result<()> {
    // > Verify that outstanding deposits are processed up to the maximum number of deposits
    let computed = P::MaxDeposits::U64.min(
        state
            .eth1_data
            .deposit_count
            .saturating_sub(state.eth1_deposit_index),
    );
    let in_block = body.deposits.len_u64();

    ensure!(
        computed == in_block,
        Error::DepositCountMismatch { computed, in_block },
    );

    for proposer_slashing in body.proposer_slashings.iter().copied() {
        process_proposer_slashing(config, state, epoch_context, proposer_slashing, &mut verifier)
            .in_operation(Operation::ProposerSlashing)?;
    }

    for attester_slashing in &body.attester_slashings {
        process_attester_slashing(config, state, epoch_context, attester_slashing, &mut verifier)
            .in_operation(Operation::AttesterSlashing)?;
    }

    for attestation in &body.attestations {
        process_attestation(config, state, epoch_context, attestation, &mut verifier)
            .in_operation(Operation::Attestation)?;
    }

    for deposit in &body.deposits {
        process_deposit(config, state, epoch_context, deposit, &verifier)
            .in_operation(Operation::Deposit)?;
    }

    for voluntary_exit in body.voluntary_exits.iter().copied() {
        process_voluntary_exit(config, state, epoch_context, voluntary_exit, &mut verifier)
            .in_operation(Operation::VoluntaryExit)?;
    }

    Ok(())
}

pub fn process_proposer_slashing<P: Preset>(
    config: &Config,
    state: &mut BeaconState<P>,
    epoch_context: &EpochContext<P>,
    proposer_slashing: ProposerSlashing,
    mut verifier: impl Verifier,
) -> Result<()> {
    let header_1 = proposer_slashing.signed_header_1.message;
    let header_2 = proposer_slashing.signed_header_2.message;

    // > Verify header slots match
    ensure!(
        header_1.slot == header_2.slot,
        Error::ProposerSlashingSlotMismatch {
            slot_1: header_1.slot,
            slot_2: header_2.slot,
        },
    );

    // > Verify header proposer indices match
    ensure!(
        header_1.proposer_index == header_2.proposer_index,
        Error::ProposerSlashingProposerMismatch {
            proposer_index_1: header_1.proposer_index,
            proposer_index_2: header_2.proposer_index,
        },
    );

    // > Verify the headers are different
    ensure!(
        header_1 != header_2,
        Error::ProposerSlashingHeadersIdentical { header: header_1 },
    );

    // > Verify the proposer is slashable
    let index = header_1.proposer_index;
    let proposer = state.validators.get(index)?;

    ensure!(
        is_slashable_validator(proposer, get_current_epoch(state)),
        Error::ProposerNotSlashable { index },
    );

    let public_key = proposer.pubkey;

    // > Verify signatures
    for signed_header in [
        proposer_slashing.signed_header_1,
        proposer_slashing.signed_header_2,
    ] {
        signed_header
            .message
            .verify(config, state, signed_header.signature, public_key, &mut verifier)?;
    }

    let block_proposer_index = epoch_context.get_beacon_proposer(state.slot)?;

    slash_validator(
        config,
        state,
        index,
        None,
        block_proposer_index,
        epoch_context.churn_limit(),
    )?;

    Ok(())
}

pub fn process_attester_slashing<P: Preset>(
    config: &Config,
    state: &mut BeaconState<P>,
    epoch_context: &EpochContext<P>,
    attester_slashing: &AttesterSlashing<P>,
    mut verifier: impl Verifier,
) -> Result<()> {
    let attestation_1 = &attester_slashing.attestation_1;
    let attestation_2 = &attester_slashing.attestation_2;

    let data_1 = attestation_1.data;
    let data_2 = attestation_2.data;

    ensure!(
        is_slashable_attestation_data(data_1, data_2),
        Error::AttestationDataNotSlashable { data_1, data_2 },
    );

    validate_indexed_attestation(config, state, attestation_1, &mut verifier)?;
    validate_indexed_attestation(config, state, attestation_2, &mut verifier)?;

    let current_epoch = get_current_epoch(state);

    // Both lists are sorted, which `validate_indexed_attestation` checks.
    let slashable_indices = attestation_1
        .attesting_indices
        .iter()
        .merge_join_by(attestation_2.attesting_indices.iter(), Ord::cmp)
        .filter_map(|either_or_both| match either_or_both {
            EitherOrBoth::Both(index, _) => Some(*index),
            EitherOrBoth::Left(_) | EitherOrBoth::Right(_) => None,
        })
        .map(|index| {
            let slashable = is_slashable_validator(state.validators.get(index)?, current_epoch);
            Ok(slashable.then_some(index))
        })
        .filter_map(Result::transpose)
        .collect::<Result<Vec<_>>>()?;

    ensure!(!slashable_indices.is_empty(), Error::NoAttestersSlashed);

    let block_proposer_index = epoch_context.get_beacon_proposer(state.slot)?;

    for index in slashable_indices {
        slash_validator(
            config,
            state,
            index,
            None,
            block_proposer_index,
            epoch_context.churn_limit(),
        )?;
    }

    Ok(())
}

pub fn process_attestation<P: Preset>(
    config: &Config,
    state: &mut BeaconState<P>,
    epoch_context: &EpochContext<P>,
    attestation: &Attestation<P>,
    verifier: impl Verifier,
) -> Result<()> {
    let data = attestation.data;
    let current_epoch = get_current_epoch(state);
    let previous_epoch = get_previous_epoch(state);

    ensure!(
        data.target.epoch == previous_epoch || data.target.epoch == current_epoch,
        Error::AttestationTargetNotRecent {
            target_epoch: data.target.epoch,
            current_epoch,
        },
    );

    ensure!(
        data.target.epoch == compute_epoch_at_slot::<P>(data.slot),
        Error::AttestationTargetsWrongEpoch {
            target_epoch: data.target.epoch,
            slot: data.slot,
        },
    );

    let low_slot = data.slot + P::MIN_ATTESTATION_INCLUSION_DELAY.get();
    let high_slot = data.slot + P::SlotsPerEpoch::U64;

    ensure!(
        (low_slot..=high_slot).contains(&state.slot),
        Error::AttestationOutsideInclusionRange {
            state_slot: state.slot,
            attestation_slot: data.slot,
        },
    );

    let committees_per_slot = epoch_context.get_committee_count_at_slot(data.slot)?;

    ensure!(
        data.index < committees_per_slot,
        Error::AttestationCommitteeIndexOutOfRange {
            index: data.index,
            committees_per_slot,
        },
    );

    let in_state = if data.target.epoch == current_epoch {
        state.current_justified_checkpoint
    } else {
        state.previous_justified_checkpoint
    };

    ensure!(
        data.source == in_state,
        Error::AttestationSourceMismatch {
            in_state,
            in_block: data.source,
        },
    );

    // > Verify signature
    let committee = epoch_context.get_beacon_committee(data.slot, data.index)?;
    let indexed_attestation = get_indexed_attestation(committee, attestation)?;

    validate_indexed_attestation(config, state, &indexed_attestation, verifier)?;

    let pending_attestation = PendingAttestation {
        aggregation_bits: attestation.aggregation_bits.clone(),
        data,
        inclusion_delay: state.slot - data.slot,
        proposer_index: epoch_context.get_beacon_proposer(state.slot)?,
    };

    if data.target.epoch == current_epoch {
        state.current_epoch_attestations.push(pending_attestation)?;
    } else {
        state.previous_epoch_attestations.push(pending_attestation)?;
    }

    Ok(())
}

pub fn process_deposit<P: Preset>(
    config: &Config,
    state: &mut BeaconState<P>,
    epoch_context: &mut EpochContext<P>,
    deposit: &Deposit,
    verifier: &impl Verifier,
) -> Result<()> {
    let deposit_index = state.eth1_deposit_index;

    // > Verify the Merkle branch
    ensure!(
        is_valid_merkle_branch(
            deposit.data.hash_tree_root(),
            deposit.proof.iter().copied(),
            deposit_index,
            state.eth1_data.deposit_root,
        ),
        Error::DepositProofInvalid { deposit_index },
    );

    // > Deposits must be processed in order
    state.eth1_deposit_index += 1;

    let known_index = epoch_context.pubkey_index(&deposit.data.pubkey);

    if process_deposit_data(config, state, known_index, deposit.data, verifier)?.is_some()
        && known_index.is_none()
    {
        epoch_context.sync_pubkeys(state);
    }

    Ok(())
}

/// Adds a validator or increases the balance of an existing one.
///
/// `known_index` is the index of the validator with the deposit's public key, if there is one.
/// Deposits from unknown keys with an invalid proof of possession are consumed without effect.
/// Returns the index of the validator whose balance changed.
pub fn process_deposit_data<P: Preset>(
    config: &Config,
    state: &mut BeaconState<P>,
    known_index: Option<ValidatorIndex>,
    data: DepositData,
    verifier: &impl Verifier,
) -> Result<Option<ValidatorIndex>> {
    let DepositData {
        pubkey,
        withdrawal_credentials,
        amount,
        signature,
    } = data;

    if let Some(validator_index) = known_index {
        // > Increase balance by deposit amount
        increase_balance(state, validator_index, amount)?;
        return Ok(Some(validator_index));
    }

    // > Verify the deposit signature (proof of possession) which is not checked by the deposit
    // > contract
    let signing_root = DepositMessage::from(data).signing_root(config);

    if !verifier.is_valid_proof_of_possession(signing_root, signature, pubkey) {
        debug!("skipping deposit from {pubkey:?} with invalid proof of possession");
        return Ok(None);
    }

    // > Add validator and balance entries
    let increment = P::EFFECTIVE_BALANCE_INCREMENT.get();
    let validator_index = state.validators.len().try_into()?;

    state.validators.push(Validator {
        pubkey,
        withdrawal_credentials,
        effective_balance: (amount - amount % increment).min(P::MAX_EFFECTIVE_BALANCE),
        slashed: false,
        activation_eligibility_epoch: FAR_FUTURE_EPOCH,
        activation_epoch: FAR_FUTURE_EPOCH,
        exit_epoch: FAR_FUTURE_EPOCH,
        withdrawable_epoch: FAR_FUTURE_EPOCH,
    })?;

    state.balances.push(amount)?;

    Ok(Some(validator_index))
}

pub fn process_voluntary_exit<P: Preset>(
    config: &Config,
    state: &mut BeaconState<P>,
    epoch_context: &EpochContext<P>,
    signed_voluntary_exit: SignedVoluntaryExit,
    verifier: impl Verifier,
) -> Result<()> {
    let voluntary_exit = signed_voluntary_exit.message;
    let index = voluntary_exit.validator_index;
    let validator = state.validators.get(index)?;
    let current_epoch = get_current_epoch(state);

    // > Verify the validator is active
    ensure!(
        is_active_validator(validator, current_epoch),
        Error::ValidatorNotActive {
            index,
            current_epoch,
        },
    );

    // > Verify exit has not been initiated
    ensure!(
        validator.exit_epoch == FAR_FUTURE_EPOCH,
        Error::ValidatorAlreadyExited {
            index,
            exit_epoch: validator.exit_epoch,
        },
    );

    // > Exits must specify an epoch when they become valid; they are not valid before then
    ensure!(
        current_epoch >= voluntary_exit.epoch,
        Error::VoluntaryExitNotYetValid {
            epoch: voluntary_exit.epoch,
            current_epoch,
        },
    );

    // > Verify the validator has been active long enough
    ensure!(
        current_epoch >= validator.activation_epoch + config.shard_committee_period,
        Error::ValidatorHasNotBeenActiveLongEnough {
            index,
            activation_epoch: validator.activation_epoch,
            current_epoch,
        },
    );

    // > Verify signature
    voluntary_exit.verify(
        config,
        state,
        signed_voluntary_exit.signature,
        validator.pubkey,
        verifier,
    )?;

    // > Initiate exit
    initiate_validator_exit(config, state, index, epoch_context.churn_limit())
}

/// Checks the proposer signature of `block` against `state`, which must be at `block.slot`.
pub fn verify_block_signature<P: Preset>(
    config: &Config,
    state: &BeaconState<P>,
    epoch_context: &EpochContext<P>,
    block: &BeaconBlock<P>,
    signature: SignatureBytes,
    verifier: impl Verifier,
) -> Result<()> {
    let proposer_index = epoch_context.get_beacon_proposer(block.slot)?;
    let public_key = state.validators.get(proposer_index)?.pubkey;

    block.verify(config, state, signature, public_key, verifier)
}
