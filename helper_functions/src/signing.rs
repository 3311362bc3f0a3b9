use anyhow::Result;
use ssz::SszHash;
use types::{
    config::Config,
    phase0::{
        beacon_state::BeaconState,
        consts::{
            DOMAIN_BEACON_ATTESTER, DOMAIN_BEACON_PROPOSER, DOMAIN_DEPOSIT, DOMAIN_RANDAO,
            DOMAIN_VOLUNTARY_EXIT,
        },
        containers::{
            AttestationData, BeaconBlock, BeaconBlockHeader, DepositMessage, VoluntaryExit,
        },
        primitives::{DomainType, Epoch, PublicKeyBytes, SignatureBytes, H256},
    },
    preset::Preset,
};

use crate::{accessors, error::SignatureKind, misc, verifier::Verifier};

// This wrapper is needed to differentiate between `Epoch` and `Slot`.
// They are aliased to the same type and thus cannot have different trait implementations.
#[derive(Clone, Copy, Debug)]
pub struct RandaoEpoch(pub Epoch);

impl From<Epoch> for RandaoEpoch {
    fn from(epoch: Epoch) -> Self {
        Self(epoch)
    }
}

impl SszHash for RandaoEpoch {
    fn hash_tree_root(&self) -> H256 {
        self.0.hash_tree_root()
    }
}

/// Messages signed with a domain that does not depend on the state.
pub trait SignForAllForks: SszHash {
    const DOMAIN_TYPE: DomainType;
    const SIGNATURE_KIND: SignatureKind;

    fn signing_root(&self, config: &Config) -> H256 {
        let domain = misc::compute_domain(config, Self::DOMAIN_TYPE, None, None);
        misc::compute_signing_root(self, domain)
    }
}

/// Messages signed with a domain derived from the fork in the state.
pub trait SignForSingleFork<P: Preset>: SszHash {
    const DOMAIN_TYPE: DomainType;
    const SIGNATURE_KIND: SignatureKind;

    fn epoch(&self) -> Epoch;

    fn signing_root(&self, config: &Config, state: &BeaconState<P>) -> H256 {
        let domain = accessors::get_domain(config, state, Self::DOMAIN_TYPE, Some(self.epoch()));
        misc::compute_signing_root(self, domain)
    }

    fn verify<V: Verifier>(
        &self,
        config: &Config,
        state: &BeaconState<P>,
        signature: SignatureBytes,
        public_key: PublicKeyBytes,
        mut verifier: V,
    ) -> Result<()> {
        if V::IS_NULL {
            return Ok(());
        }

        verifier.verify_singular(
            self.signing_root(config, state),
            signature,
            public_key,
            Self::SIGNATURE_KIND,
        )
    }
}

impl SignForAllForks for DepositMessage {
    const DOMAIN_TYPE: DomainType = DOMAIN_DEPOSIT;
    const SIGNATURE_KIND: SignatureKind = SignatureKind::Deposit;
}

impl<P: Preset> SignForSingleFork<P> for AttestationData {
    const DOMAIN_TYPE: DomainType = DOMAIN_BEACON_ATTESTER;
    const SIGNATURE_KIND: SignatureKind = SignatureKind::Attestation;

    fn epoch(&self) -> Epoch {
        self.target.epoch
    }
}

impl<P: Preset> SignForSingleFork<P> for BeaconBlock<P> {
    const DOMAIN_TYPE: DomainType = DOMAIN_BEACON_PROPOSER;
    const SIGNATURE_KIND: SignatureKind = SignatureKind::Block;

    fn epoch(&self) -> Epoch {
        misc::compute_epoch_at_slot::<P>(self.slot)
    }
}

impl<P: Preset> SignForSingleFork<P> for BeaconBlockHeader {
    const DOMAIN_TYPE: DomainType = DOMAIN_BEACON_PROPOSER;
    const SIGNATURE_KIND: SignatureKind = SignatureKind::Block;

    fn epoch(&self) -> Epoch {
        misc::compute_epoch_at_slot::<P>(self.slot)
    }
}

impl<P: Preset> SignForSingleFork<P> for RandaoEpoch {
    const DOMAIN_TYPE: DomainType = DOMAIN_RANDAO;
    const SIGNATURE_KIND: SignatureKind = SignatureKind::Randao;

    fn epoch(&self) -> Epoch {
        self.0
    }
}

impl<P: Preset> SignForSingleFork<P> for VoluntaryExit {
    const DOMAIN_TYPE: DomainType = DOMAIN_VOLUNTARY_EXIT;
    const SIGNATURE_KIND: SignatureKind = SignatureKind::VoluntaryExit;

    fn epoch(&self) -> Epoch {
        self.epoch
    }
}

#[cfg(test)]
mod tests {
    use types::preset::Minimal;

    use super::*;

    #[test]
    fn block_and_header_share_signing_root() {
        let config = Config::minimal();
        let state = BeaconState::<Minimal>::default();

        let block = BeaconBlock::<Minimal> {
            slot: 3,
            proposer_index: 2,
            ..BeaconBlock::default()
        };

        assert_eq!(
            block.signing_root(&config, &state),
            block.to_header().signing_root(&config, &state),
        );
    }

    #[test]
    fn randao_epoch_is_signed_with_randao_domain() {
        let config = Config::minimal();
        let state = BeaconState::<Minimal>::default();
        let epoch = RandaoEpoch::from(5);

        let domain = accessors::get_domain(&config, &state, DOMAIN_RANDAO, Some(5));

        assert_eq!(
            SignForSingleFork::<Minimal>::signing_root(&epoch, &config, &state),
            misc::compute_signing_root(&5_u64, domain),
        );
    }

    #[test]
    fn deposit_signing_root_ignores_state() {
        let message = DepositMessage {
            pubkey: PublicKeyBytes::repeat_byte(1),
            withdrawal_credentials: H256::zero(),
            amount: 32_000_000_000,
        };

        let domain = misc::compute_domain(&Config::mainnet(), DOMAIN_DEPOSIT, None, None);

        assert_eq!(
            message.signing_root(&Config::mainnet()),
            misc::compute_signing_root(&message, domain),
        );
    }
}
