use ssz::SszHash as _;

use crate::{
    phase0::{
        containers::{
            BeaconBlock, BeaconBlockHeader, DepositData, DepositMessage, SignedBeaconBlock,
            SignedBeaconBlockHeader,
        },
        primitives::SignatureBytes,
    },
    preset::Preset,
};

impl<P: Preset> BeaconBlock<P> {
    #[must_use]
    pub const fn with_signature(self, signature: SignatureBytes) -> SignedBeaconBlock<P> {
        SignedBeaconBlock {
            message: self,
            signature,
        }
    }

    #[must_use]
    pub fn to_header(&self) -> BeaconBlockHeader {
        let Self {
            slot,
            proposer_index,
            parent_root,
            state_root,
            ref body,
        } = *self;

        BeaconBlockHeader {
            slot,
            proposer_index,
            parent_root,
            state_root,
            body_root: body.hash_tree_root(),
        }
    }
}

impl BeaconBlockHeader {
    #[inline]
    #[must_use]
    pub const fn with_signature(self, signature: SignatureBytes) -> SignedBeaconBlockHeader {
        SignedBeaconBlockHeader {
            message: self,
            signature,
        }
    }
}

impl From<DepositData> for DepositMessage {
    #[inline]
    fn from(deposit_data: DepositData) -> Self {
        let DepositData {
            pubkey,
            withdrawal_credentials,
            amount,
            ..
        } = deposit_data;

        Self {
            pubkey,
            withdrawal_credentials,
            amount,
        }
    }
}

#[cfg(test)]
mod tests {
    use ssz::SszHash as _;

    use crate::preset::Minimal;

    use super::*;

    #[test]
    fn block_and_its_header_have_the_same_root() {
        let block = BeaconBlock::<Minimal> {
            slot: 3,
            proposer_index: 7,
            ..BeaconBlock::default()
        };

        assert_eq!(block.hash_tree_root(), block.to_header().hash_tree_root());
    }
}
