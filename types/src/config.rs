use core::num::NonZeroU64;
use std::{borrow::Cow, io::Read};

use hex_literal::hex;
use nonzero_ext::nonzero;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    phase0::{
        consts::GENESIS_EPOCH,
        containers::Fork,
        primitives::{Epoch, Gwei, UnixSeconds, Version, H32},
    },
    preset::PresetName,
};

/// Configuration variables customizable at runtime.
///
/// See [configurations in `consensus-specs`](https://github.com/ethereum/consensus-specs/tree/v1.0.0/configs).
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
#[serde(default, rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Config {
    // Meta
    pub config_name: Cow<'static, str>,
    pub preset_base: PresetName,

    // Genesis
    #[serde(with = "serde_utils::string_or_native")]
    pub genesis_delay: u64,
    pub genesis_fork_version: Version,
    #[serde(with = "serde_utils::string_or_native")]
    pub min_genesis_active_validator_count: NonZeroU64,
    #[serde(with = "serde_utils::string_or_native")]
    pub min_genesis_time: UnixSeconds,

    // Forking
    pub fork_schedule: Vec<ScheduledFork>,

    // Time parameters
    #[serde(with = "serde_utils::string_or_native")]
    pub min_validator_withdrawability_delay: u64,
    #[serde(with = "serde_utils::string_or_native")]
    pub seconds_per_slot: NonZeroU64,
    #[serde(with = "serde_utils::string_or_native")]
    pub shard_committee_period: u64,

    // Validator cycle
    #[serde(with = "serde_utils::string_or_native")]
    pub churn_limit_quotient: NonZeroU64,
    #[serde(with = "serde_utils::string_or_native")]
    pub ejection_balance: Gwei,
    #[serde(with = "serde_utils::string_or_native")]
    pub min_per_epoch_churn_limit: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Meta
            //
            // Use `default` as the default `config_name` and override it in `Config::mainnet`.
            // This way custom network data will be kept separate from mainnet data if a user
            // forgets to specify a custom `CONFIG_NAME`.
            config_name: Cow::Borrowed("default"),
            preset_base: PresetName::Mainnet,

            // Genesis
            genesis_delay: 604_800,
            genesis_fork_version: H32(hex!("00000000")),
            min_genesis_active_validator_count: nonzero!(1_u64 << 14),
            min_genesis_time: 0,

            // Forking
            fork_schedule: vec![],

            // Time parameters
            min_validator_withdrawability_delay: 256,
            seconds_per_slot: nonzero!(12_u64),
            shard_committee_period: 256,

            // Validator cycle
            churn_limit_quotient: nonzero!(1_u64 << 16),
            ejection_balance: 16_000_000_000,
            min_per_epoch_churn_limit: 4,
        }
    }
}

/// A fork version change scheduled at an epoch boundary.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ScheduledFork {
    #[serde(with = "serde_utils::string_or_native")]
    pub epoch: Epoch,
    pub previous_version: Version,
    pub current_version: Version,
}

impl From<ScheduledFork> for Fork {
    fn from(scheduled_fork: ScheduledFork) -> Self {
        let ScheduledFork {
            epoch,
            previous_version,
            current_version,
        } = scheduled_fork;

        Self {
            previous_version,
            current_version,
            epoch,
        }
    }
}

impl Config {
    /// [Mainnet configuration](https://github.com/ethereum/consensus-specs/blob/v1.0.0/configs/mainnet/phase0.yaml).
    #[must_use]
    pub fn mainnet() -> Self {
        Self {
            config_name: Cow::Borrowed("mainnet"),
            min_genesis_time: 1_606_824_000,
            ..Self::default()
        }
    }

    /// [Minimal configuration](https://github.com/ethereum/consensus-specs/blob/v1.0.0/configs/minimal/phase0.yaml).
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            // Meta
            config_name: Cow::Borrowed("minimal"),
            preset_base: PresetName::Minimal,

            // Genesis
            genesis_delay: 300,
            genesis_fork_version: H32(hex!("00000001")),
            min_genesis_active_validator_count: nonzero!(64_u64),
            min_genesis_time: 1_578_009_600,

            // Time parameters
            seconds_per_slot: nonzero!(6_u64),
            shard_committee_period: 64,

            // Validator cycle
            churn_limit_quotient: nonzero!(32_u64),
            min_per_epoch_churn_limit: 4,

            ..Self::default()
        }
    }

    pub fn from_yaml(reader: impl Read) -> Result<Self, Error> {
        let config = serde_yaml::from_reader::<_, Self>(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.config_name.is_empty() {
            return Err(Error::NameEmpty);
        }

        // See <https://github.com/ethereum/consensus-specs/blob/v1.1.0/configs/mainnet.yaml#L10>.
        for character in self.config_name.chars() {
            if !matches!(character, 'a'..='z' | '0'..='9' | '-') {
                return Err(Error::NameContainsIllegalCharacters);
            }
        }

        let mut current_version = self.genesis_fork_version;
        let mut previous_epoch = GENESIS_EPOCH;

        for scheduled_fork in &self.fork_schedule {
            let ScheduledFork {
                epoch,
                previous_version,
                current_version: next_version,
            } = *scheduled_fork;

            if epoch <= previous_epoch {
                return Err(Error::ForkEpochsNotIncreasing { epoch });
            }

            if previous_version != current_version {
                return Err(Error::ForkVersionsNotChained {
                    epoch,
                    expected: current_version,
                    actual: previous_version,
                });
            }

            current_version = next_version;
            previous_epoch = epoch;
        }

        Ok(())
    }

    /// The `Fork` stored in genesis states.
    #[must_use]
    pub const fn genesis_fork(&self) -> Fork {
        Fork {
            previous_version: self.genesis_fork_version,
            current_version: self.genesis_fork_version,
            epoch: GENESIS_EPOCH,
        }
    }

    #[must_use]
    pub fn fork_at_epoch(&self, epoch: Epoch) -> Option<ScheduledFork> {
        self.fork_schedule
            .iter()
            .copied()
            .find(|scheduled_fork| scheduled_fork.epoch == epoch)
    }

    #[must_use]
    pub fn version_at_epoch(&self, epoch: Epoch) -> Version {
        self.fork_schedule
            .iter()
            .take_while(|scheduled_fork| scheduled_fork.epoch <= epoch)
            .last()
            .map_or(self.genesis_fork_version, |scheduled_fork| {
                scheduled_fork.current_version
            })
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration name is empty")]
    NameEmpty,
    #[error("configuration name contains illegal characters")]
    NameContainsIllegalCharacters,
    #[error("fork scheduled at epoch {epoch} is not after the previous one")]
    ForkEpochsNotIncreasing { epoch: Epoch },
    #[error(
        "fork scheduled at epoch {epoch} upgrades from {actual:?} but the version before it is {expected:?}"
    )]
    ForkVersionsNotChained {
        epoch: Epoch,
        expected: Version,
        actual: Version,
    },
    #[error("failed to parse configuration")]
    Yaml(#[from] serde_yaml::Error),
}
