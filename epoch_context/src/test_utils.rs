use anyhow::Result;
use types::{
    phase0::{
        beacon_state::BeaconState,
        consts::{FAR_FUTURE_EPOCH, GENESIS_EPOCH},
        containers::Validator,
        primitives::PublicKeyBytes,
    },
    preset::Preset,
};

pub fn validator<P: Preset>(index: u64) -> Validator {
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
}

pub fn genesis_state<P: Preset>(validator_count: u64) -> Result<BeaconState<P>> {
    let validators = (0..validator_count).map(validator::<P>).collect::<Vec<_>>();
    let balances = vec![P::MAX_EFFECTIVE_BALANCE; validators.len()];

    Ok(BeaconState {
        validators: validators.try_into()?,
        balances: balances.try_into()?,
        ..BeaconState::default()
    })
}
