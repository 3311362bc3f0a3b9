use core::num::NonZeroU64;

use anyhow::Result;
use arithmetic::{NonZeroExt as _, U64Ext as _};
use ssz::SszHash;
use typenum::Unsigned as _;
use types::{
    config::Config,
    phase0::{
        beacon_state::BeaconState,
        containers::{ForkData, SigningData},
        primitives::{Domain, DomainType, Epoch, Slot, ValidatorIndex, Version, H256},
    },
    preset::Preset,
};

use crate::error::Error;

const MAX_RANDOM_BYTE: u64 = 2_u64.pow(8) - 1;

#[must_use]
pub fn compute_epoch_at_slot<P: Preset>(slot: Slot) -> Epoch {
    slot.div_typenum::<P::SlotsPerEpoch>()
}

#[must_use]
pub fn compute_start_slot_at_epoch<P: Preset>(epoch: Epoch) -> Slot {
    epoch * P::SlotsPerEpoch::U64
}

#[must_use]
pub fn is_epoch_start<P: Preset>(slot: Slot) -> bool {
    slot.is_divisible_by(P::SlotsPerEpoch::non_zero())
}

#[must_use]
pub fn slots_since_epoch_start<P: Preset>(slot: Slot) -> u64 {
    slot.mod_typenum::<P::SlotsPerEpoch>()
}

#[must_use]
pub const fn compute_activation_exit_epoch<P: Preset>(epoch: Epoch) -> Epoch {
    epoch + 1 + P::MAX_SEED_LOOKAHEAD
}

#[must_use]
pub fn compute_fork_data_root(current_version: Version, genesis_validators_root: H256) -> H256 {
    ForkData {
        current_version,
        genesis_validators_root,
    }
    .hash_tree_root()
}

/// [`compute_domain`](https://github.com/ethereum/consensus-specs/blob/v1.0.0/specs/phase0/beacon-chain.md#compute_domain)
///
/// Defaults to the genesis fork version and a zero validators root, which is what deposits use.
#[must_use]
pub fn compute_domain(
    config: &Config,
    domain_type: DomainType,
    fork_version: Option<Version>,
    genesis_validators_root: Option<H256>,
) -> Domain {
    let fork_version = fork_version.unwrap_or(config.genesis_fork_version);
    let genesis_validators_root = genesis_validators_root.unwrap_or_default();
    let fork_data_root = compute_fork_data_root(fork_version, genesis_validators_root);

    let mut domain = Domain::zero();
    domain[..DomainType::len_bytes()].copy_from_slice(domain_type.as_bytes());
    domain[DomainType::len_bytes()..]
        .copy_from_slice(&fork_data_root[..H256::len_bytes() - DomainType::len_bytes()]);
    domain
}

#[must_use]
pub fn compute_signing_root(ssz_object: &(impl SszHash + ?Sized), domain: Domain) -> H256 {
    SigningData {
        object_root: ssz_object.hash_tree_root(),
        domain,
    }
    .hash_tree_root()
}

/// Number of committees in every slot of an epoch with `active_validator_count` active validators.
#[must_use]
pub fn committee_count_from_active_validator_count<P: Preset>(
    active_validator_count: u64,
) -> NonZeroU64 {
    let count = (active_validator_count / P::SlotsPerEpoch::U64 / P::TARGET_COMMITTEE_SIZE)
        .min(P::MAX_COMMITTEES_PER_SLOT.get());

    NonZeroU64::new(count).unwrap_or(NonZeroU64::MIN)
}

/// Range of positions in a shuffled list of `index_count` elements occupied by committee `index`.
#[must_use]
pub fn compute_committee_range(
    index_count: u64,
    index: u64,
    count: NonZeroU64,
) -> core::ops::Range<usize> {
    let start = index_count * index / count;
    let end = index_count * (index + 1) / count;

    usize_from(start)..usize_from(end)
}

#[must_use]
pub fn compute_shuffled_index<P: Preset>(
    index: u64,
    index_count: NonZeroU64,
    seed: H256,
) -> u64 {
    shuffling::shuffle_single::<P>(index, index_count, seed)
}

/// [`compute_proposer_index`](https://github.com/ethereum/consensus-specs/blob/v1.0.0/specs/phase0/beacon-chain.md#compute_proposer_index)
///
/// `indices` must be the active validator indices in registry order.
pub fn compute_proposer_index<P: Preset>(
    state: &BeaconState<P>,
    indices: &[ValidatorIndex],
    seed: H256,
) -> Result<ValidatorIndex> {
    let total = NonZeroU64::new(indices.len() as u64).ok_or(Error::NoActiveValidators)?;

    (0..u64::MAX)
        .map(|attempt| -> Result<_> {
            let shuffled_index = compute_shuffled_index::<P>(attempt % total, total, seed);
            let candidate_index = indices[usize_from(shuffled_index)];

            let random_bytes = hashing::hash_256_64(seed, attempt / 32);
            let random_byte = u64::from(random_bytes[usize_from(attempt % 32)]);

            let effective_balance = state.validators.get(candidate_index)?.effective_balance;
            let selected =
                effective_balance * MAX_RANDOM_BYTE >= P::MAX_EFFECTIVE_BALANCE * random_byte;

            Ok(selected.then_some(candidate_index))
        })
        .find_map(Result::transpose)
        .ok_or(Error::FailedToSelectProposer)?
}

#[expect(clippy::cast_possible_truncation, reason = "indices fit in memory")]
const fn usize_from(value: u64) -> usize {
    value as usize
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;
    use test_case::test_case;
    use types::{
        phase0::{consts::DOMAIN_DEPOSIT, containers::Validator},
        preset::{Mainnet, Minimal},
    };

    use super::*;

    #[test_case(0 => 0)]
    #[test_case(7 => 0)]
    #[test_case(8 => 1)]
    #[test_case(17 => 2)]
    fn epoch_at_slot_minimal(slot: Slot) -> Epoch {
        compute_epoch_at_slot::<Minimal>(slot)
    }

    #[test]
    fn start_slot_and_epoch_start_agree() {
        let start = compute_start_slot_at_epoch::<Mainnet>(3);

        assert_eq!(start, 96);
        assert!(is_epoch_start::<Mainnet>(start));
        assert!(!is_epoch_start::<Mainnet>(start + 1));
        assert_eq!(slots_since_epoch_start::<Mainnet>(start + 5), 5);
    }

    #[test]
    fn activation_exit_epoch_is_delayed_by_seed_lookahead() {
        assert_eq!(compute_activation_exit_epoch::<Mainnet>(10), 15);
    }

    // Domain used to sign mainnet deposits.
    #[test]
    fn deposit_domain_matches_mainnet() {
        let domain = compute_domain(&Config::mainnet(), DOMAIN_DEPOSIT, None, None);

        assert_eq!(
            domain,
            H256(hex!(
                "03000000f5a5fd42d16a20302798ef6ed309979b43003d2320d9f0e8ea9831a9"
            )),
        );
    }

    #[test_case(0 => 1)]
    #[test_case(64 => 2; "two committees of minimal target size")]
    #[test_case(1_000_000 => 4; "capped at maximum")]
    fn committee_count_minimal(active_validator_count: u64) -> u64 {
        committee_count_from_active_validator_count::<Minimal>(active_validator_count).get()
    }

    #[test]
    fn committee_ranges_cover_all_indices() {
        let count = NonZeroU64::new(3).expect("3 is nonzero");

        let ranges = (0..3)
            .map(|index| compute_committee_range(10, index, count))
            .collect::<Vec<_>>();

        assert_eq!(ranges, [0..3, 3..6, 6..10]);
    }

    #[test]
    fn proposer_is_always_selected_when_balances_are_maximal() -> Result<()> {
        let validator = Validator {
            effective_balance: Minimal::MAX_EFFECTIVE_BALANCE,
            ..Validator::default()
        };

        let state = BeaconState::<Minimal> {
            validators: vec![validator; 16].try_into()?,
            ..BeaconState::default()
        };

        let indices = (0..16).collect::<Vec<_>>();
        let seed = H256::repeat_byte(1);
        let proposer_index = compute_proposer_index(&state, &indices, seed)?;

        let expected = compute_shuffled_index::<Minimal>(0, NonZeroU64::new(16).expect("16"), seed);

        assert_eq!(proposer_index, expected);

        Ok(())
    }

    #[test]
    fn proposer_selection_fails_without_validators() {
        let state = BeaconState::<Minimal>::default();
        assert!(compute_proposer_index(&state, &[], H256::zero()).is_err());
    }
}
