use thiserror::Error;
use types::phase0::primitives::{CommitteeIndex, Epoch, Slot};

#[derive(Debug, Error)]
pub enum Error {
    #[error("committee index {index} is out of range (committees per slot: {committees_per_slot})")]
    CommitteeIndexOutOfRange {
        index: CommitteeIndex,
        committees_per_slot: u64,
    },
    #[error("no shuffling is cached for epoch {epoch} (current epoch: {current_epoch})")]
    EpochOutOfRange { epoch: Epoch, current_epoch: Epoch },
    #[error("slot {slot} is not in cached epoch {epoch}")]
    OutOfRange { slot: Slot, epoch: Epoch },
    #[error("epoch context for epoch {context_epoch} cannot be rotated to state in epoch {state_epoch}")]
    RotationMismatch {
        context_epoch: Epoch,
        state_epoch: Epoch,
    },
}
