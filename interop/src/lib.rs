//! Deterministic genesis states for local testing.
//!
//! Validators have synthetic public keys derived from their indices. No key material exists, so
//! states built here must be used with verifiers that do not check signatures.

use core::num::NonZeroU64;

use anyhow::Result;
use deposit_tree::DepositTree;
use genesis::Incremental;
use helper_functions::verifier::NullVerifier;
use ssz::SszHash as _;
use types::{
    config::Config,
    phase0::{
        beacon_state::BeaconState,
        consts::BLS_WITHDRAWAL_PREFIX,
        containers::DepositData,
        primitives::{PublicKeyBytes, SignatureBytes, UnixSeconds, ValidatorIndex, H256},
    },
    preset::Preset,
};

/// <https://github.com/ethereum/eth2.0-pm/tree/b7c76e7a9d036ce73ca6aa0b7065db92f7728f41/interop/mocked_start#create-genesis-state>
const QUICK_START_ETH1_BLOCK_HASH: H256 = H256([0x42; 32]);

/// <https://github.com/ethereum/eth2.0-pm/tree/b7c76e7a9d036ce73ca6aa0b7065db92f7728f41/interop/mocked_start#create-genesis-state>
///
/// This is defined in the standard but effectively never used because the genesis time derived from
/// this is replaced by the one passed in as a parameter.
const QUICK_START_ETH1_BLOCK_TIMESTAMP: UnixSeconds = 1 << 40;

/// <https://github.com/ethereum/eth2.0-pm/tree/b7c76e7a9d036ce73ca6aa0b7065db92f7728f41/interop/mocked_start#quick-start-genesis>
pub fn quick_start_beacon_state<P: Preset>(
    config: &Config,
    genesis_time: UnixSeconds,
    validator_count: NonZeroU64,
) -> Result<(BeaconState<P>, DepositTree)> {
    let mut incremental = Incremental::<P, _>::new(config, NullVerifier);

    incremental.set_eth1_timestamp(QUICK_START_ETH1_BLOCK_TIMESTAMP);

    for index in 0..validator_count.get() {
        incremental.add_deposit_data(quick_start_deposit_data::<P>(index), index)?;
    }

    // > Clients must not run is_valid_genesis_state as this state is already considered valid.
    // > Specifically, we do not check nor care about MIN_GENESIS_TIME in these coordinated starts.

    let (mut genesis_state, deposit_tree) = incremental.finish(QUICK_START_ETH1_BLOCK_HASH)?;

    genesis_state.genesis_time = genesis_time;

    Ok((genesis_state, deposit_tree))
}

/// Derives a public key from `validator_index`.
///
/// The result is not a valid curve point. It only has to be unique per index.
#[must_use]
pub fn public_key(validator_index: ValidatorIndex) -> PublicKeyBytes {
    let high = hashing::hash_256(validator_index.hash_tree_root());
    let low = hashing::hash_256(high);

    let mut public_key = PublicKeyBytes::zero();
    let (left, right) = public_key.as_bytes_mut().split_at_mut(H256::len_bytes());
    left.copy_from_slice(high.as_bytes());
    right.copy_from_slice(&low[..right.len()]);
    public_key
}

/// <https://github.com/ethereum/eth2.0-pm/tree/b7c76e7a9d036ce73ca6aa0b7065db92f7728f41/interop/mocked_start#generate-deposits>
///
/// The signature is left empty.
#[must_use]
pub fn quick_start_deposit_data<P: Preset>(validator_index: ValidatorIndex) -> DepositData {
    let pubkey = public_key(validator_index);

    let mut withdrawal_credentials = hashing::hash_bytes(pubkey);
    withdrawal_credentials[..BLS_WITHDRAWAL_PREFIX.len()].copy_from_slice(BLS_WITHDRAWAL_PREFIX);

    DepositData {
        pubkey,
        withdrawal_credentials,
        amount: P::MAX_EFFECTIVE_BALANCE,
        signature: SignatureBytes::zero(),
    }
}
