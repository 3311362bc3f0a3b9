use helper_functions::error::SignatureKind;
use parse_display::Display;
use thiserror::Error;
use types::phase0::{
    containers::{AttestationData, BeaconBlockHeader, Checkpoint},
    primitives::{CommitteeIndex, DepositIndex, Epoch, Slot, ValidatorIndex, H256},
};

/// Parts of a block, in the order they are processed.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
#[display(style = "snake_case")]
pub enum Operation {
    BlockHeader,
    BlockSignature,
    Randao,
    Eth1Data,
    ProposerSlashing,
    AttesterSlashing,
    Attestation,
    Deposit,
    VoluntaryExit,
    StateRoot,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("attestation data is not slashable (data_1: {data_1:?}, data_2: {data_2:?})")]
    AttestationDataNotSlashable {
        data_1: AttestationData,
        data_2: AttestationData,
    },
    #[error(
        "attestation committee index {index} is out of range \
         (committees per slot: {committees_per_slot})"
    )]
    AttestationCommitteeIndexOutOfRange {
        index: CommitteeIndex,
        committees_per_slot: u64,
    },
    #[error(
        "attestation in slot {attestation_slot} is outside \
         inclusion range for state at slot {state_slot}"
    )]
    AttestationOutsideInclusionRange {
        state_slot: Slot,
        attestation_slot: Slot,
    },
    #[error(
        "attestation source does not match justified checkpoint \
         (in_state: {in_state:?}, in_block: {in_block:?})"
    )]
    AttestationSourceMismatch {
        in_state: Checkpoint,
        in_block: Checkpoint,
    },
    #[error(
        "attestation target epoch {target_epoch} is neither \
         the current nor the previous epoch (current: {current_epoch})"
    )]
    AttestationTargetNotRecent {
        target_epoch: Epoch,
        current_epoch: Epoch,
    },
    #[error("attestation target epoch {target_epoch} does not contain slot {slot}")]
    AttestationTargetsWrongEpoch { target_epoch: Epoch, slot: Slot },
    #[error("block is not newer than latest block header ({block_slot} <= {block_header_slot})")]
    BlockNotNewerThanLatestBlockHeader {
        block_slot: Slot,
        block_header_slot: Slot,
    },
    #[error("consensus invariant violated: {source}")]
    ConsensusInvariantViolation { source: anyhow::Error },
    #[error("deposit count is incorrect (computed: {computed}, in_block: {in_block})")]
    DepositCountMismatch { computed: u64, in_block: u64 },
    #[error("proof of deposit {deposit_index} is invalid")]
    DepositProofInvalid { deposit_index: DepositIndex },
    #[error("invalid {operation}: {source}")]
    InvalidOperation {
        operation: Operation,
        source: anyhow::Error,
    },
    #[error("no attesters slashed")]
    NoAttestersSlashed,
    #[error("block parent root ({in_block:?}) does not match latest block header ({computed:?})")]
    ParentRootMismatch { computed: H256, in_block: H256 },
    #[error("proposer index is incorrect (in_block: {in_block}, computed: {computed})")]
    ProposerIndexMismatch {
        computed: ValidatorIndex,
        in_block: ValidatorIndex,
    },
    #[error("proposer (validator {index}) is not slashable")]
    ProposerNotSlashable { index: ValidatorIndex },
    #[error("proposer (validator {index}) is slashed")]
    ProposerSlashed { index: ValidatorIndex },
    #[error("block headers in proposer slashing are identical: {header:?}")]
    ProposerSlashingHeadersIdentical { header: BeaconBlockHeader },
    #[error(
        "proposer indices in proposer slashing do not match \
         ({proposer_index_1} != {proposer_index_2})"
    )]
    ProposerSlashingProposerMismatch {
        proposer_index_1: ValidatorIndex,
        proposer_index_2: ValidatorIndex,
    },
    #[error("slots in proposer slashing do not match ({slot_1} != {slot_2})")]
    ProposerSlashingSlotMismatch { slot_1: Slot, slot_2: Slot },
    #[error("block slot ({block_slot}) does not match state slot ({state_slot})")]
    SlotMismatch { state_slot: Slot, block_slot: Slot },
    #[error("target slot ({target}) is not later than current slot ({current})")]
    SlotNotLater { current: Slot, target: Slot },
    #[error("state root in block ({in_block:?}) does not match state ({computed:?})")]
    StateRootMismatch { computed: H256, in_block: H256 },
    #[error("validator {index} exited in epoch {exit_epoch}")]
    ValidatorAlreadyExited {
        index: ValidatorIndex,
        exit_epoch: Epoch,
    },
    #[error(
        "validator {index} has not been active long enough \
         (activation_epoch: {activation_epoch}, current_epoch: {current_epoch})"
    )]
    ValidatorHasNotBeenActiveLongEnough {
        index: ValidatorIndex,
        activation_epoch: Epoch,
        current_epoch: Epoch,
    },
    #[error("validator {index} is not active in epoch {current_epoch}")]
    ValidatorNotActive {
        index: ValidatorIndex,
        current_epoch: Epoch,
    },
    #[error("voluntary exit is not valid yet (epoch: {epoch}, current_epoch: {current_epoch})")]
    VoluntaryExitNotYetValid { epoch: Epoch, current_epoch: Epoch },
}

impl From<SignatureKind> for Operation {
    fn from(signature_kind: SignatureKind) -> Self {
        match signature_kind {
            SignatureKind::Attestation => Self::Attestation,
            SignatureKind::Block | SignatureKind::Multi => Self::BlockSignature,
            SignatureKind::Deposit => Self::Deposit,
            SignatureKind::Randao => Self::Randao,
            SignatureKind::VoluntaryExit => Self::VoluntaryExit,
        }
    }
}

impl Error {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        let operation = match self {
            Self::SlotNotLater { .. } => return ErrorKind::InvalidTransition,
            Self::ConsensusInvariantViolation { .. } => {
                return ErrorKind::ConsensusInvariantViolation
            }
            Self::InvalidOperation { operation, .. } => *operation,
            Self::SlotMismatch { .. }
            | Self::BlockNotNewerThanLatestBlockHeader { .. }
            | Self::ProposerIndexMismatch { .. }
            | Self::ParentRootMismatch { .. }
            | Self::ProposerSlashed { .. } => Operation::BlockHeader,
            Self::ProposerNotSlashable { .. }
            | Self::ProposerSlashingHeadersIdentical { .. }
            | Self::ProposerSlashingProposerMismatch { .. }
            | Self::ProposerSlashingSlotMismatch { .. } => Operation::ProposerSlashing,
            Self::AttestationDataNotSlashable { .. } | Self::NoAttestersSlashed => {
                Operation::AttesterSlashing
            }
            Self::AttestationCommitteeIndexOutOfRange { .. }
            | Self::AttestationOutsideInclusionRange { .. }
            | Self::AttestationSourceMismatch { .. }
            | Self::AttestationTargetNotRecent { .. }
            | Self::AttestationTargetsWrongEpoch { .. } => Operation::Attestation,
            Self::DepositCountMismatch { .. } | Self::DepositProofInvalid { .. } => {
                Operation::Deposit
            }
            Self::ValidatorAlreadyExited { .. }
            | Self::ValidatorHasNotBeenActiveLongEnough { .. }
            | Self::ValidatorNotActive { .. }
            | Self::VoluntaryExitNotYetValid { .. } => Operation::VoluntaryExit,
            Self::StateRootMismatch { .. } => Operation::StateRoot,
        };

        ErrorKind::InvalidBlock(operation)
    }
}

/// Coarse classification of transition failures.
///
/// Callers decide what to do with a failure based on this alone.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
pub enum ErrorKind {
    /// The target slot is not after the current one.
    #[display("invalid transition")]
    InvalidTransition,
    /// The block is invalid. Nothing was published.
    #[display("invalid block ({0})")]
    InvalidBlock(Operation),
    /// A bug or a divergence. The branch that produced it cannot be trusted.
    #[display("consensus invariant violation")]
    ConsensusInvariantViolation,
}

/// Classifies any error returned by this crate.
///
/// Invariant violations anywhere in the chain take precedence.
/// Errors that are not recognized are treated as invariant violations,
/// since every expected failure of a block is raised as a typed [`Error`].
#[must_use]
pub fn classify(error: &anyhow::Error) -> ErrorKind {
    let invariant_violated = error.chain().any(|cause| {
        cause
            .downcast_ref::<helper_functions::error::Error>()
            .is_some_and(helper_functions::error::Error::is_invariant_violation)
            || matches!(
                cause.downcast_ref(),
                Some(Error::ConsensusInvariantViolation { .. }),
            )
    });

    if invariant_violated {
        return ErrorKind::ConsensusInvariantViolation;
    }

    if let Some(error) = error.chain().find_map(|cause| cause.downcast_ref::<Error>()) {
        return error.kind();
    }

    // Signatures verified in a batch fail outside of any operation.
    error
        .chain()
        .find_map(|cause| match cause.downcast_ref() {
            Some(helper_functions::error::Error::SignatureInvalid(signature_kind)) => {
                Some(ErrorKind::InvalidBlock(Operation::from(*signature_kind)))
            }
            _ => None,
        })
        .unwrap_or(ErrorKind::ConsensusInvariantViolation)
}

pub trait ResultExt<T> {
    /// Attributes a failure to `operation` unless it already is a typed block error.
    fn in_operation(self, operation: Operation) -> anyhow::Result<T>;
}

impl<T> ResultExt<T> for anyhow::Result<T> {
    fn in_operation(self, operation: Operation) -> Self {
        self.map_err(|source| {
            if source.downcast_ref::<Error>().is_some() {
                source
            } else {
                Error::InvalidOperation { operation, source }.into()
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use ssz::IndexError;
    use test_case::test_case;

    use super::*;

    #[test]
    fn slot_not_later_is_invalid_transition() {
        let error = anyhow::Error::from(Error::SlotNotLater {
            current: 5,
            target: 5,
        });

        assert_eq!(classify(&error), ErrorKind::InvalidTransition);
    }

    #[test_case(Operation::Attestation)]
    #[test_case(Operation::Deposit)]
    #[test_case(Operation::VoluntaryExit)]
    fn untyped_errors_in_operations_are_invalid_blocks(operation: Operation) {
        let result: anyhow::Result<()> = Err(IndexError::OutOfBounds {
            index: 7,
            length: 3,
        }
        .into());

        let error = result
            .in_operation(operation)
            .expect_err("the result is an error");

        assert_eq!(classify(&error), ErrorKind::InvalidBlock(operation));
    }

    #[test]
    fn typed_errors_keep_their_operation() {
        let result: anyhow::Result<()> = Err(Error::NoAttestersSlashed.into());

        let error = result
            .in_operation(Operation::Attestation)
            .expect_err("the result is an error");

        assert_eq!(
            classify(&error),
            ErrorKind::InvalidBlock(Operation::AttesterSlashing),
        );
    }

    #[test]
    fn balance_overflow_inside_block_is_invariant_violation() {
        let result: anyhow::Result<()> =
            Err(helper_functions::error::Error::BalanceOverflow { index: 1 }.into());

        let error = result
            .in_operation(Operation::ProposerSlashing)
            .expect_err("the result is an error");

        assert_eq!(classify(&error), ErrorKind::ConsensusInvariantViolation);
    }

    #[test]
    fn deferred_signature_failures_are_invalid_blocks() {
        let error = anyhow::Error::from(helper_functions::error::Error::SignatureInvalid(
            SignatureKind::Randao,
        ));

        assert_eq!(classify(&error), ErrorKind::InvalidBlock(Operation::Randao));
    }

    #[test]
    fn unknown_errors_are_invariant_violations() {
        assert_eq!(
            classify(&anyhow!("something unexpected")),
            ErrorKind::ConsensusInvariantViolation,
        );
    }

    #[test]
    fn operations_are_displayed_in_snake_case() {
        assert_eq!(Operation::VoluntaryExit.to_string(), "voluntary_exit");
        assert_eq!(
            ErrorKind::InvalidBlock(Operation::BlockHeader).to_string(),
            "invalid block (block_header)",
        );
    }
}
