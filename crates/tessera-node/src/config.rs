// crates/tessera-node/src/config.rs
//
// Deployment configuration for a Tessera network.
// Loaded from a TOML file or populated with standard defaults.
//
// TOML integers stop at i64, which cannot hold token amounts in base units,
// so amount fields accept either an integer or a decimal string:
//
//   minimum_allowed_locked = "15000000000000000000000"
//   base_penalty = 300

use std::fs;

use serde::{Deserialize, Serialize};

use tessera_core::crypto::hash_bytes;
use tessera_core::error::TesseraError;
use tessera_core::identity::Address;
use tessera_core::types::Timestamp;
use tessera_economics::params::{EconomicsParams, SlashingParams, StandardInputs};
use tessera_escrow::worklock::BidEscrowParams;

/// Serde adapter for `u128` amounts stored as integer or string.
mod amount {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Int(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Int(v) => Ok(v as u128),
            Repr::Text(s) => s
                .replace('_', "")
                .parse::<u128>()
                .map_err(|e| serde::de::Error::custom(format!("invalid amount {:?}: {}", s, e))),
        }
    }

    /// Same as the parent adapter for optional amounts.
    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(value: &Option<u128>, serializer: S) -> Result<S::Ok, S::Error> {
            match value {
                Some(v) => super::serialize(v, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u128>, D::Error> {
            #[derive(Deserialize)]
            struct Wrapper(#[serde(with = "super")] u128);
            Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|w| w.0))
        }
    }
}

/// Top-level network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Timestamp at which period 0 begins.
    #[serde(default)]
    pub genesis: Timestamp,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub economics: EconomicsConfig,

    #[serde(default)]
    pub slashing: SlashingConfig,

    #[serde(default)]
    pub bid_escrow: BidEscrowConfig,

    #[serde(default)]
    pub governance: GovernanceConfig,
}

/// `[economics]`: the standard derivation inputs plus optional overrides of
/// the derived constants. Overrides are in token base units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EconomicsConfig {
    #[serde(default = "default_initial_supply_tokens")]
    pub initial_supply_tokens: u64,
    #[serde(default = "default_initial_inflation")]
    pub initial_inflation: f64,
    #[serde(default = "default_halving_delay")]
    pub halving_delay: f64,
    #[serde(default = "default_reward_saturation")]
    pub reward_saturation: f64,
    #[serde(default = "default_small_stake_multiplier")]
    pub small_stake_multiplier: f64,
    #[serde(default = "default_hours_per_period")]
    pub hours_per_period: u64,
    #[serde(default = "default_minimum_locked_periods")]
    pub minimum_locked_periods: u32,
    #[serde(default = "default_minimum_allowed_locked_tokens")]
    pub minimum_allowed_locked_tokens: u64,
    #[serde(default = "default_maximum_allowed_locked_tokens")]
    pub maximum_allowed_locked_tokens: u64,
    #[serde(default = "default_minimum_worker_periods")]
    pub minimum_worker_periods: u32,

    #[serde(default, with = "amount::option", skip_serializing_if = "Option::is_none")]
    pub total_supply: Option<u128>,
    #[serde(default, with = "amount::option", skip_serializing_if = "Option::is_none")]
    pub initial_supply: Option<u128>,
    /// k1 override.
    #[serde(default, with = "amount::option", skip_serializing_if = "Option::is_none")]
    pub locked_periods_coefficient: Option<u128>,
    /// k2 override.
    #[serde(default, with = "amount::option", skip_serializing_if = "Option::is_none")]
    pub staking_coefficient: Option<u128>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_rewarded_periods: Option<u32>,
    #[serde(default, with = "amount::option", skip_serializing_if = "Option::is_none")]
    pub minimum_allowed_locked: Option<u128>,
    #[serde(default, with = "amount::option", skip_serializing_if = "Option::is_none")]
    pub maximum_allowed_locked: Option<u128>,
}

fn default_initial_supply_tokens() -> u64 {
    StandardInputs::default().initial_supply_tokens
}

fn default_initial_inflation() -> f64 {
    StandardInputs::default().initial_inflation
}

fn default_halving_delay() -> f64 {
    StandardInputs::default().halving_delay
}

fn default_reward_saturation() -> f64 {
    StandardInputs::default().reward_saturation
}

fn default_small_stake_multiplier() -> f64 {
    StandardInputs::default().small_stake_multiplier
}

fn default_hours_per_period() -> u64 {
    StandardInputs::default().hours_per_period
}

fn default_minimum_locked_periods() -> u32 {
    StandardInputs::default().minimum_locked_periods
}

fn default_minimum_allowed_locked_tokens() -> u64 {
    StandardInputs::default().minimum_allowed_locked_tokens
}

fn default_maximum_allowed_locked_tokens() -> u64 {
    StandardInputs::default().maximum_allowed_locked_tokens
}

fn default_minimum_worker_periods() -> u32 {
    StandardInputs::default().minimum_worker_periods
}

impl Default for EconomicsConfig {
    fn default() -> Self {
        Self {
            initial_supply_tokens: default_initial_supply_tokens(),
            initial_inflation: default_initial_inflation(),
            halving_delay: default_halving_delay(),
            reward_saturation: default_reward_saturation(),
            small_stake_multiplier: default_small_stake_multiplier(),
            hours_per_period: default_hours_per_period(),
            minimum_locked_periods: default_minimum_locked_periods(),
            minimum_allowed_locked_tokens: default_minimum_allowed_locked_tokens(),
            maximum_allowed_locked_tokens: default_maximum_allowed_locked_tokens(),
            minimum_worker_periods: default_minimum_worker_periods(),
            total_supply: None,
            initial_supply: None,
            locked_periods_coefficient: None,
            staking_coefficient: None,
            maximum_rewarded_periods: None,
            minimum_allowed_locked: None,
            maximum_allowed_locked: None,
        }
    }
}

impl EconomicsConfig {
    /// Derive the deployment constants and apply any overrides.
    ///
    /// # Errors
    /// Returns `TesseraError::Config` when the inputs cannot be derived.
    pub fn to_params(&self) -> Result<EconomicsParams, TesseraError> {
        let inputs = StandardInputs {
            initial_supply_tokens: self.initial_supply_tokens,
            initial_inflation: self.initial_inflation,
            halving_delay: self.halving_delay,
            reward_saturation: self.reward_saturation,
            small_stake_multiplier: self.small_stake_multiplier,
            hours_per_period: self.hours_per_period,
            minimum_locked_periods: self.minimum_locked_periods,
            minimum_allowed_locked_tokens: self.minimum_allowed_locked_tokens,
            maximum_allowed_locked_tokens: self.maximum_allowed_locked_tokens,
            minimum_worker_periods: self.minimum_worker_periods,
        };
        let mut params = EconomicsParams::derive(&inputs)?;
        if let Some(v) = self.total_supply {
            params.total_supply = v;
        }
        if let Some(v) = self.initial_supply {
            params.initial_supply = v;
        }
        if let Some(v) = self.locked_periods_coefficient {
            params.locked_periods_coefficient = v;
        }
        if let Some(v) = self.staking_coefficient {
            params.staking_coefficient = v;
        }
        if let Some(v) = self.maximum_rewarded_periods {
            params.maximum_rewarded_periods = v;
        }
        if let Some(v) = self.minimum_allowed_locked {
            params.minimum_allowed_locked = v;
        }
        if let Some(v) = self.maximum_allowed_locked {
            params.maximum_allowed_locked = v;
        }
        Ok(params)
    }
}

/// `[slashing]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlashingConfig {
    #[serde(default = "default_base_penalty", with = "amount")]
    pub base_penalty: u128,
    #[serde(default, with = "amount")]
    pub penalty_history_coefficient: u128,
    #[serde(default = "default_percentage_penalty_coefficient", with = "amount")]
    pub percentage_penalty_coefficient: u128,
    #[serde(default = "default_reward_coefficient", with = "amount")]
    pub reward_coefficient: u128,
}

fn default_base_penalty() -> u128 {
    SlashingParams::default().base_penalty
}

fn default_percentage_penalty_coefficient() -> u128 {
    SlashingParams::default().percentage_penalty_coefficient
}

fn default_reward_coefficient() -> u128 {
    SlashingParams::default().reward_coefficient
}

impl Default for SlashingConfig {
    fn default() -> Self {
        let params = SlashingParams::default();
        Self {
            base_penalty: params.base_penalty,
            penalty_history_coefficient: params.penalty_history_coefficient,
            percentage_penalty_coefficient: params.percentage_penalty_coefficient,
            reward_coefficient: params.reward_coefficient,
        }
    }
}

impl SlashingConfig {
    pub fn to_params(&self) -> SlashingParams {
        SlashingParams {
            base_penalty: self.base_penalty,
            penalty_history_coefficient: self.penalty_history_coefficient,
            percentage_penalty_coefficient: self.percentage_penalty_coefficient,
            reward_coefficient: self.reward_coefficient,
        }
    }
}

/// `[bid_escrow]`. Bidding is open from `start_bid` until `end_bid`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidEscrowConfig {
    #[serde(default)]
    pub start_bid: Timestamp,
    #[serde(default = "default_end_bid")]
    pub end_bid: Timestamp,
    #[serde(default = "default_boosting_refund", with = "amount")]
    pub boosting_refund: u128,
    #[serde(default = "default_staking_periods")]
    pub staking_periods: u32,
}

fn default_end_bid() -> Timestamp {
    7 * 24 * 3_600
}

fn default_boosting_refund() -> u128 {
    50
}

fn default_staking_periods() -> u32 {
    default_minimum_locked_periods()
}

impl Default for BidEscrowConfig {
    fn default() -> Self {
        Self {
            start_bid: 0,
            end_bid: default_end_bid(),
            boosting_refund: default_boosting_refund(),
            staking_periods: default_staking_periods(),
        }
    }
}

impl BidEscrowConfig {
    pub fn to_params(&self) -> BidEscrowParams {
        BidEscrowParams {
            start_bid: self.start_bid,
            end_bid: self.end_bid,
            boosting_refund: self.boosting_refund,
            staking_periods: self.staking_periods,
        }
    }
}

/// `[governance]`: governor owners and the initial upgrade commitments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GovernanceConfig {
    #[serde(default)]
    pub owners: Vec<Address>,
    #[serde(default = "default_required")]
    pub required: usize,
    /// Hex sha256 of the first upgrade secret for each dispatcher. When
    /// unset, the hash of `"<component>-genesis"` is committed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staking_secret_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_secret_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjudicator_secret_hash: Option<String>,
}

fn default_required() -> usize {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Decode a configured secret hash, or derive the genesis one.
fn commitment(configured: &Option<String>, component: &str) -> Result<[u8; 32], TesseraError> {
    match configured {
        Some(text) => {
            let bytes = hex::decode(text.trim_start_matches("0x"))?;
            bytes.try_into().map_err(|_| {
                TesseraError::Config(format!("{} secret hash must be 32 bytes", component))
            })
        }
        None => Ok(hash_bytes(format!("{}-genesis", component).as_bytes())),
    }
}

impl GovernanceConfig {
    pub fn staking_commitment(&self) -> Result<[u8; 32], TesseraError> {
        commitment(&self.staking_secret_hash, "staking")
    }

    pub fn policy_commitment(&self) -> Result<[u8; 32], TesseraError> {
        commitment(&self.policy_secret_hash, "policy")
    }

    pub fn adjudicator_commitment(&self) -> Result<[u8; 32], TesseraError> {
        commitment(&self.adjudicator_secret_hash, "adjudicator")
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            genesis: 0,
            log_level: default_log_level(),
            economics: EconomicsConfig::default(),
            slashing: SlashingConfig::default(),
            bid_escrow: BidEscrowConfig::default(),
            governance: GovernanceConfig {
                required: default_required(),
                ..GovernanceConfig::default()
            },
        }
    }
}

impl NetworkConfig {
    /// Load configuration from a TOML file at the given path.
    ///
    /// # Errors
    /// Returns `TesseraError::Config` if the file cannot be read or parsed.
    pub fn load(path: &str) -> Result<Self, TesseraError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| TesseraError::Config(format!("cannot read {}: {}", path, e)))?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self, TesseraError> {
        toml::from_str(contents).map_err(|e| TesseraError::Config(e.to_string()))
    }

    /// Render as TOML, for writing a fresh config file.
    pub fn to_toml(&self) -> Result<String, TesseraError> {
        toml::to_string_pretty(self).map_err(|e| TesseraError::Config(e.to_string()))
    }

    /// Check cross-field consistency.
    ///
    /// # Errors
    /// Returns `TesseraError::Config` describing the first problem found.
    pub fn validate(&self) -> Result<(), TesseraError> {
        let params = self.economics.to_params()?;
        params.validate()?;
        if self.bid_escrow.end_bid <= self.bid_escrow.start_bid {
            return Err(TesseraError::Config(format!(
                "bidding window [{}, {}) is empty",
                self.bid_escrow.start_bid, self.bid_escrow.end_bid
            )));
        }
        if self.bid_escrow.staking_periods < params.minimum_locked_periods {
            return Err(TesseraError::Config(format!(
                "claimed stake lock of {} periods is below the minimum of {}",
                self.bid_escrow.staking_periods, params.minimum_locked_periods
            )));
        }
        if self.governance.owners.is_empty() {
            return Err(TesseraError::Config(
                "governance needs at least one owner".to_string(),
            ));
        }
        self.governance.staking_commitment()?;
        self.governance.policy_commitment()?;
        self.governance.adjudicator_commitment()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_toml() {
        let config = NetworkConfig::from_toml("").unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.economics.to_params().unwrap(), EconomicsParams::standard());
        assert_eq!(config.slashing.to_params(), SlashingParams::default());
        assert_eq!(config.governance.required, 1);
        // No owners configured.
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_amounts_as_integer_or_string() {
        let text = r#"
            genesis = 1000

            [economics]
            hours_per_period = 1
            minimum_locked_periods = 6
            total_supply = "2_000_000_000"
            initial_supply = 1000000000
            staking_coefficient = 80000000
            locked_periods_coefficient = 4
            maximum_rewarded_periods = 4
            minimum_allowed_locked = 100
            maximum_allowed_locked = "2000"

            [slashing]
            base_penalty = 300
            penalty_history_coefficient = "10"
            percentage_penalty_coefficient = 2
            reward_coefficient = 2

            [bid_escrow]
            start_bid = 1000
            end_bid = 4600
            boosting_refund = 100
            staking_periods = 6

            [governance]
            owners = ["0x0000000000000000000000000000000000000001"]
        "#;
        let config = NetworkConfig::from_toml(text).unwrap();
        let params = config.economics.to_params().unwrap();
        assert_eq!(params.total_supply, 2_000_000_000);
        assert_eq!(params.initial_supply, 1_000_000_000);
        assert_eq!(params.staking_coefficient, 80_000_000);
        assert_eq!(params.maximum_allowed_locked, 2_000);
        assert_eq!(config.slashing.penalty_history_coefficient, 10);
        assert_eq!(config.bid_escrow.to_params().staking_periods, 6);
        assert_eq!(config.genesis, 1000);
        config.validate().unwrap();
    }

    #[test]
    fn test_round_trip_through_toml() {
        let mut config = NetworkConfig::default();
        config.governance.owners = vec![Address::from_label("owner")];
        config.economics.total_supply = Some(u128::MAX);
        let text = config.to_toml().unwrap();
        let back = NetworkConfig::from_toml(&text).unwrap();
        assert_eq!(back.economics.total_supply, Some(u128::MAX));
        assert_eq!(back.governance.owners, config.governance.owners);
    }

    #[test]
    fn test_secret_hash_commitments() {
        let mut governance = GovernanceConfig::default();
        assert_eq!(
            governance.staking_commitment().unwrap(),
            hash_bytes(b"staking-genesis")
        );
        governance.policy_secret_hash = Some(format!("0x{}", hex::encode([7u8; 32])));
        assert_eq!(governance.policy_commitment().unwrap(), [7u8; 32]);
        governance.adjudicator_secret_hash = Some("abcd".to_string());
        assert!(governance.adjudicator_commitment().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_bidding_window() {
        let mut config = NetworkConfig::default();
        config.governance.owners = vec![Address::from_label("owner")];
        config.bid_escrow.end_bid = config.bid_escrow.start_bid;
        assert!(matches!(config.validate(), Err(TesseraError::Config(_))));
    }
}
