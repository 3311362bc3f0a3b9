use core::num::NonZeroU64;
use std::collections::HashMap;

use anyhow::{ensure, Result};
use arithmetic::U64Ext as _;
use deposit_tree::DepositTree;
use helper_functions::{accessors, verifier::Verifier};
use ssz::{ContiguousVector, SszHash as _};
use thiserror::Error;
use transition_functions::block_processing;
use types::{
    config::Config,
    phase0::{
        beacon_state::BeaconState,
        consts::{GENESIS_EPOCH, GENESIS_SLOT},
        containers::{
            BeaconBlock, BeaconBlockBody, BeaconBlockHeader, DepositData, SignedBeaconBlock,
        },
        primitives::{
            DepositIndex, ExecutionBlockHash, PublicKeyBytes, SignatureBytes, UnixSeconds,
            ValidatorIndex,
        },
    },
    preset::Preset,
};

pub struct Incremental<'config, P: Preset, V> {
    config: &'config Config,
    beacon_state: BeaconState<P>,
    deposit_tree: DepositTree,
    pubkey_to_index: HashMap<PublicKeyBytes, ValidatorIndex>,
    verifier: V,
}

impl<'config, P: Preset, V: Verifier> Incremental<'config, P, V> {
    /// <https://github.com/ethereum/consensus-specs/blob/v1.0.0/specs/phase0/beacon-chain.md#genesis>
    #[must_use]
    pub fn new(config: &'config Config, verifier: V) -> Self {
        let latest_block_header = BeaconBlockHeader {
            slot: GENESIS_SLOT,
            body_root: BeaconBlockBody::<P>::default().hash_tree_root(),
            ..BeaconBlockHeader::default()
        };

        let beacon_state = BeaconState {
            slot: GENESIS_SLOT,
            fork: config.genesis_fork(),
            latest_block_header,
            ..BeaconState::default()
        };

        Self {
            config,
            beacon_state,
            deposit_tree: DepositTree::default(),
            pubkey_to_index: HashMap::new(),
            verifier,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_genesis_state(self.config, &self.beacon_state)
    }

    pub fn set_eth1_timestamp(&mut self, eth1_timestamp: UnixSeconds) {
        self.beacon_state.genesis_time = eth1_timestamp + self.config.genesis_delay;
    }

    pub fn add_deposit_data(
        &mut self,
        data: DepositData,
        deposit_index: DepositIndex,
    ) -> Result<()> {
        let eth1_data = &mut self.beacon_state.eth1_data;

        eth1_data.deposit_root = self
            .deposit_tree
            .push_and_compute_root(deposit_index, data)?;

        eth1_data.deposit_count = self.deposit_tree.deposit_count;

        // Deposits come straight from the tree, so their proofs are not checked.
        self.beacon_state.eth1_deposit_index += 1;

        let known_index = self.pubkey_to_index.get(&data.pubkey).copied();

        let Some(validator_index) = block_processing::process_deposit_data(
            self.config,
            &mut self.beacon_state,
            known_index,
            data,
            &self.verifier,
        )?
        else {
            return Ok(());
        };

        self.pubkey_to_index.insert(data.pubkey, validator_index);

        // > Process activations
        let balance = *self.beacon_state.balances.get(validator_index)?;
        let validator = self.beacon_state.validators.get_mut(validator_index)?;

        validator.effective_balance = balance
            .prev_multiple_of(P::EFFECTIVE_BALANCE_INCREMENT)
            .min(P::MAX_EFFECTIVE_BALANCE);

        if validator.effective_balance == P::MAX_EFFECTIVE_BALANCE {
            validator.activation_eligibility_epoch = GENESIS_EPOCH;
            validator.activation_epoch = GENESIS_EPOCH;
        }

        Ok(())
    }

    pub fn finish(self, eth1_block_hash: ExecutionBlockHash) -> Result<(BeaconState<P>, DepositTree)> {
        let Self {
            mut beacon_state,
            deposit_tree,
            ..
        } = self;

        beacon_state.eth1_data.block_hash = eth1_block_hash;

        // > Seed RANDAO with Eth1 entropy
        beacon_state.randao_mixes = ContiguousVector::repeat_element(eth1_block_hash);

        // > Set genesis validators root for domain separation and chain versioning
        beacon_state.genesis_validators_root = beacon_state.validators.hash_tree_root();

        Ok((beacon_state, deposit_tree))
    }
}

#[derive(Debug, Error)]
enum GenesisTriggerError {
    #[error("too early ({actual_genesis_time} < {minimum_genesis_time})")]
    TooEarly {
        minimum_genesis_time: UnixSeconds,
        actual_genesis_time: UnixSeconds,
    },
    #[error("not enough active validators ({actual_validator_count} < {minimum_validator_count})")]
    NotEnoughActiveValidators {
        minimum_validator_count: NonZeroU64,
        actual_validator_count: u64,
    },
}

/// <https://github.com/ethereum/consensus-specs/blob/v1.0.0/specs/phase0/beacon-chain.md#genesis-block>
///
/// `BeaconBlock.body.eth1_data` is left empty rather than set to the state's.
#[must_use]
pub fn beacon_block<P: Preset>(genesis_state: &BeaconState<P>) -> SignedBeaconBlock<P> {
    BeaconBlock {
        state_root: genesis_state.hash_tree_root(),
        ..BeaconBlock::default()
    }
    .with_signature(SignatureBytes::zero())
}

/// <https://github.com/ethereum/consensus-specs/blob/v1.0.0/specs/phase0/beacon-chain.md#genesis-state>
fn validate_genesis_state<P: Preset>(config: &Config, state: &BeaconState<P>) -> Result<()> {
    let minimum_genesis_time = config.min_genesis_time;
    let actual_genesis_time = state.genesis_time;

    ensure!(
        minimum_genesis_time <= actual_genesis_time,
        GenesisTriggerError::TooEarly {
            minimum_genesis_time,
            actual_genesis_time,
        },
    );

    let minimum_validator_count = config.min_genesis_active_validator_count;
    let actual_validator_count = accessors::get_active_validator_count(state, GENESIS_EPOCH);

    ensure!(
        minimum_validator_count.get() <= actual_validator_count,
        GenesisTriggerError::NotEnoughActiveValidators {
            minimum_validator_count,
            actual_validator_count,
        },
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use helper_functions::{predicates::is_valid_merkle_branch, verifier::NullVerifier};
    use test_case::test_case;
    use transition_functions::process_slot;
    use types::{phase0::primitives::H256, preset::Minimal};

    use super::*;

    fn deposit_data(byte: u8, amount: u64) -> DepositData {
        DepositData {
            pubkey: PublicKeyBytes::repeat_byte(byte),
            withdrawal_credentials: H256::repeat_byte(byte),
            amount,
            signature: SignatureBytes::zero(),
        }
    }

    fn incremental_with(
        config: &Config,
        deposits: impl IntoIterator<Item = DepositData>,
    ) -> Result<Incremental<'_, Minimal, NullVerifier>> {
        let mut incremental = Incremental::new(config, NullVerifier);

        for (data, index) in deposits.into_iter().zip(0..) {
            incremental.add_deposit_data(data, index)?;
        }

        Ok(incremental)
    }

    #[test]
    fn top_up_to_maximum_balance_activates_validator() -> Result<()> {
        let config = Config::minimal();
        let half = Minimal::MAX_EFFECTIVE_BALANCE / 2;
        let incremental = incremental_with(&config, [deposit_data(1, half), deposit_data(1, half)])?;

        let (state, _) = incremental.finish(H256::repeat_byte(0x42))?;

        assert_eq!(state.validators.len(), 1);
        assert_eq!(state.validators[0].activation_epoch, GENESIS_EPOCH);
        assert_eq!(state.eth1_deposit_index, 2);
        assert_eq!(accessors::get_active_validator_count(&state, GENESIS_EPOCH), 1);

        Ok(())
    }

    #[test]
    fn partial_deposit_does_not_activate_validator() -> Result<()> {
        let config = Config::minimal();
        let incremental =
            incremental_with(&config, [deposit_data(1, Minimal::MAX_EFFECTIVE_BALANCE - 1)])?;

        let (state, _) = incremental.finish(H256::zero())?;

        assert_eq!(state.validators.len(), 1);
        assert_eq!(accessors::get_active_validator_count(&state, GENESIS_EPOCH), 0);

        Ok(())
    }

    #[test]
    fn finish_seeds_randao_and_validators_root() -> Result<()> {
        let config = Config::minimal();
        let eth1_block_hash = H256::repeat_byte(0x42);
        let deposits = (0..4).map(|byte| deposit_data(byte, Minimal::MAX_EFFECTIVE_BALANCE));

        let (state, deposit_tree) = incremental_with(&config, deposits)?.finish(eth1_block_hash)?;

        assert!(state.randao_mixes.iter().all(|mix| *mix == eth1_block_hash));
        assert_eq!(state.eth1_data.block_hash, eth1_block_hash);
        assert_eq!(state.genesis_validators_root, state.validators.hash_tree_root());
        assert_eq!(state.eth1_data.deposit_root, deposit_tree.root());
        assert_eq!(state.eth1_data.deposit_count, 4);

        let deposit = deposit_tree.deposit(2, deposit_data(2, Minimal::MAX_EFFECTIVE_BALANCE))?;

        assert!(is_valid_merkle_branch(
            deposit.data.hash_tree_root(),
            deposit.proof.iter().copied(),
            2,
            state.eth1_data.deposit_root,
        ));

        Ok(())
    }

    #[test_case(0, 64 => false; "too early")]
    #[test_case(1_578_009_600, 63 => false; "not enough validators")]
    #[test_case(1_578_009_600, 64 => true; "valid")]
    fn genesis_trigger(eth1_timestamp: UnixSeconds, validator_count: u8) -> bool {
        let config = Config::minimal();
        let deposits =
            (0..validator_count).map(|byte| deposit_data(byte, Minimal::MAX_EFFECTIVE_BALANCE));

        let Ok(mut incremental) = incremental_with(&config, deposits) else {
            return false;
        };

        incremental.set_eth1_timestamp(eth1_timestamp);
        incremental.validate().is_ok()
    }

    #[test]
    fn genesis_block_matches_first_cached_header() -> Result<()> {
        let config = Config::minimal();
        let deposits = (0..8).map(|byte| deposit_data(byte, Minimal::MAX_EFFECTIVE_BALANCE));
        let (mut state, _) = incremental_with(&config, deposits)?.finish(H256::zero())?;

        let block = beacon_block(&state);

        process_slot(&mut state);

        assert_eq!(
            block.message.hash_tree_root(),
            state.latest_block_header.hash_tree_root(),
        );

        Ok(())
    }
}
