use anyhow::{ensure, Result};
use bit_field::BitField as _;
use itertools::Itertools as _;
use types::{
    config::Config,
    phase0::{
        beacon_state::BeaconState,
        consts::FAR_FUTURE_EPOCH,
        containers::{AttestationData, IndexedAttestation, Validator},
        primitives::{Epoch, H256},
    },
    preset::Preset,
};

use crate::{
    error::{Error, SignatureKind},
    signing::SignForSingleFork as _,
    verifier::Verifier,
};

#[must_use]
pub const fn is_active_validator(validator: &Validator, epoch: Epoch) -> bool {
    validator.activation_epoch <= epoch && epoch < validator.exit_epoch
}

// > Check if ``validator`` is eligible to be placed into the activation queue.
#[must_use]
pub const fn is_eligible_for_activation_queue<P: Preset>(validator: &Validator) -> bool {
    validator.activation_eligibility_epoch == FAR_FUTURE_EPOCH
        && validator.effective_balance == P::MAX_EFFECTIVE_BALANCE
}

// > Check if ``validator`` is eligible for activation.
#[must_use]
pub const fn is_eligible_for_activation<P: Preset>(
    state: &BeaconState<P>,
    validator: &Validator,
) -> bool {
    // > Placement in queue is finalized
    validator.activation_eligibility_epoch <= state.finalized_checkpoint.epoch
        // > Has not yet been activated
        && validator.activation_epoch == FAR_FUTURE_EPOCH
}

#[must_use]
pub const fn is_slashable_validator(validator: &Validator, epoch: Epoch) -> bool {
    !validator.slashed
        && validator.activation_epoch <= epoch
        && epoch < validator.withdrawable_epoch
}

#[must_use]
pub const fn is_eligible_for_penalties(validator: &Validator, previous_epoch: Epoch) -> bool {
    is_active_validator(validator, previous_epoch)
        || (validator.slashed && previous_epoch + 1 < validator.withdrawable_epoch)
}

#[must_use]
pub fn is_slashable_attestation_data(data_1: AttestationData, data_2: AttestationData) -> bool {
    // > Double vote
    let double = data_1 != data_2 && data_1.target.epoch == data_2.target.epoch;

    // > Surround vote
    let surround =
        data_1.source.epoch < data_2.source.epoch && data_2.target.epoch < data_1.target.epoch;

    double || surround
}

/// [`is_valid_merkle_branch`](https://github.com/ethereum/consensus-specs/blob/v1.0.0/specs/phase0/beacon-chain.md#is_valid_merkle_branch)
///
/// The depth is the length of `branch`.
#[must_use]
pub fn is_valid_merkle_branch(
    leaf: H256,
    branch: impl IntoIterator<Item = H256>,
    index: u64,
    root: H256,
) -> bool {
    let mut hash = leaf;

    for (height, node) in branch.into_iter().enumerate() {
        if index.get_bit(height) {
            hash = hashing::hash_256_256(node, hash);
        } else {
            hash = hashing::hash_256_256(hash, node);
        }
    }

    hash == root
}

pub fn validate_indexed_attestation<P: Preset>(
    config: &Config,
    state: &BeaconState<P>,
    indexed_attestation: &IndexedAttestation<P>,
    mut verifier: impl Verifier,
) -> Result<()> {
    let indices = &indexed_attestation.attesting_indices;

    ensure!(!indices.is_empty(), Error::AttestationHasNoAttestingIndices);

    // > Verify indices are sorted and unique
    ensure!(
        indices.iter().tuple_windows().all(|(a, b)| a < b),
        Error::AttestingIndicesNotSortedAndUnique,
    );

    // Indices are checked even if signatures are not, otherwise invalid ones could be processed.
    let public_keys = indices
        .iter()
        .map(|index| Ok(state.validators.get(*index)?.pubkey))
        .collect::<Result<Vec<_>>>()?;

    // > Verify aggregate signature
    verifier.verify_aggregate(
        indexed_attestation.data.signing_root(config, state),
        indexed_attestation.signature,
        public_keys,
        SignatureKind::Attestation,
    )
}

#[cfg(test)]
mod tests {
    use ssz::ContiguousList;
    use test_case::test_case;
    use types::{phase0::containers::Checkpoint, preset::Minimal};

    use crate::verifier::NullVerifier;

    use super::*;

    fn data(source_epoch: Epoch, target_epoch: Epoch, root_byte: u8) -> AttestationData {
        AttestationData {
            beacon_block_root: H256::repeat_byte(root_byte),
            source: Checkpoint {
                epoch: source_epoch,
                root: H256::zero(),
            },
            target: Checkpoint {
                epoch: target_epoch,
                root: H256::zero(),
            },
            ..AttestationData::default()
        }
    }

    #[test_case(data(0, 2, 0), data(0, 2, 1) => true; "double vote")]
    #[test_case(data(0, 3, 0), data(1, 2, 0) => true; "surround vote")]
    #[test_case(data(1, 2, 0), data(0, 3, 0) => false; "surrounded vote")]
    #[test_case(data(0, 2, 0), data(0, 2, 0) => false; "identical votes")]
    #[test_case(data(0, 2, 0), data(1, 3, 0) => false; "consecutive votes")]
    fn slashable_attestation_data(data_1: AttestationData, data_2: AttestationData) -> bool {
        is_slashable_attestation_data(data_1, data_2)
    }

    #[test]
    fn activation_queue_requires_maximum_balance() {
        let validator = Validator {
            activation_eligibility_epoch: FAR_FUTURE_EPOCH,
            effective_balance: Minimal::MAX_EFFECTIVE_BALANCE,
            ..Validator::default()
        };

        let underfunded = Validator {
            effective_balance: Minimal::MAX_EFFECTIVE_BALANCE - 1,
            ..validator
        };

        assert!(is_eligible_for_activation_queue::<Minimal>(&validator));
        assert!(!is_eligible_for_activation_queue::<Minimal>(&underfunded));
    }

    #[test]
    fn activation_requires_finalized_eligibility() {
        let state = BeaconState::<Minimal> {
            finalized_checkpoint: Checkpoint {
                epoch: 3,
                root: H256::zero(),
            },
            ..BeaconState::default()
        };

        let validator = Validator {
            activation_eligibility_epoch: 3,
            activation_epoch: FAR_FUTURE_EPOCH,
            ..Validator::default()
        };

        let too_recent = Validator {
            activation_eligibility_epoch: 4,
            ..validator
        };

        assert!(is_eligible_for_activation(&state, &validator));
        assert!(!is_eligible_for_activation(&state, &too_recent));
    }

    #[test]
    fn merkle_branch_of_two_leaves() {
        let left = H256::repeat_byte(1);
        let right = H256::repeat_byte(2);
        let root = hashing::hash_256_256(left, right);

        assert!(is_valid_merkle_branch(left, [right], 0, root));
        assert!(is_valid_merkle_branch(right, [left], 1, root));
        assert!(!is_valid_merkle_branch(left, [right], 1, root));
    }

    #[test]
    fn indexed_attestation_indices_must_be_sorted_and_unique() -> Result<()> {
        let config = Config::minimal();

        let state = BeaconState::<Minimal> {
            validators: vec![Validator::default(); 4].try_into()?,
            ..BeaconState::default()
        };

        let attestation = |indices: Vec<u64>| -> Result<IndexedAttestation<Minimal>> {
            Ok(IndexedAttestation {
                attesting_indices: ContiguousList::try_from(indices)?,
                ..IndexedAttestation::default()
            })
        };

        validate_indexed_attestation(&config, &state, &attestation(vec![0, 2])?, NullVerifier)?;

        for indices in [vec![], vec![2, 0], vec![1, 1], vec![3, 4]] {
            assert!(
                validate_indexed_attestation(&config, &state, &attestation(indices)?, NullVerifier)
                    .is_err(),
            );
        }

        Ok(())
    }
}
