//! Collections used in `BeaconState`.
//!
//! All of them are contiguous. States are shared through `Arc` and copied on write, so the cost of
//! a copy is paid once per transition rather than once per modified field.

use ssz::{ContiguousList, ContiguousVector};

use crate::{
    phase0::{
        containers::{Eth1Data, PendingAttestation, Validator},
        primitives::{Gwei, H256},
    },
    preset::Preset,
};

pub type RecentRoots<P> = ContiguousVector<H256, <P as Preset>::SlotsPerHistoricalRoot>;

pub type HistoricalRoots<P> = ContiguousList<H256, <P as Preset>::HistoricalRootsLimit>;

pub type Eth1DataVotes<P> = ContiguousList<Eth1Data, <P as Preset>::SlotsPerEth1VotingPeriod>;

pub type Validators<P> = ContiguousList<Validator, <P as Preset>::ValidatorRegistryLimit>;

pub type Balances<P> = ContiguousList<Gwei, <P as Preset>::ValidatorRegistryLimit>;

pub type RandaoMixes<P> = ContiguousVector<H256, <P as Preset>::EpochsPerHistoricalVector>;

pub type Slashings<P> = ContiguousVector<Gwei, <P as Preset>::EpochsPerSlashingsVector>;

pub type Attestations<P> =
    ContiguousList<PendingAttestation<P>, <P as Preset>::MaxAttestationsPerEpoch>;
