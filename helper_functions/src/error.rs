use parse_display::Display;
use thiserror::Error;
use types::phase0::primitives::ValidatorIndex;

#[derive(Debug, Error)]
pub enum Error {
    #[error("attestation has no attesting indices")]
    AttestationHasNoAttestingIndices,
    #[error("attesting indices are not sorted and unique")]
    AttestingIndicesNotSortedAndUnique,
    #[error("balance of validator {index} overflowed")]
    BalanceOverflow { index: ValidatorIndex },
    #[error(
        "aggregation bitlist length {aggregation_bitlist_length} \
         does not match committee length {committee_length}"
    )]
    CommitteeLengthMismatch {
        aggregation_bitlist_length: usize,
        committee_length: usize,
    },
    #[error("epoch number overflowed")]
    EpochOverflow,
    #[error("failed to select proposer")]
    FailedToSelectProposer,
    #[error("no validators are active")]
    NoActiveValidators,
    #[error("{0} is invalid")]
    SignatureInvalid(SignatureKind),
    #[error("slot is out of range")]
    SlotOutOfRange,
}

impl Error {
    /// Returns `true` for failures that no well-formed block can cause.
    ///
    /// These indicate a bug or corrupted state rather than an invalid message.
    #[must_use]
    pub const fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::BalanceOverflow { .. }
                | Self::EpochOverflow
                | Self::FailedToSelectProposer
                | Self::NoActiveValidators,
        )
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
pub enum SignatureKind {
    #[display("attestation signature")]
    Attestation,
    #[display("block signature")]
    Block,
    #[display("deposit signature")]
    Deposit,
    #[display("collection of multiple signatures")]
    Multi,
    #[display("RANDAO reveal")]
    Randao,
    #[display("voluntary exit signature")]
    VoluntaryExit,
}
