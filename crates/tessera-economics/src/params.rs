// crates/tessera-economics/src/params.rs
//
// Economic and slashing parameters fixed at deployment.
//
// The reward curve has two coefficients:
//   k1 (locked_periods_coefficient): weight of the lock-duration bonus
//   k2 (staking_coefficient):        overall reward rate denominator
//
// Standard deployments derive both, plus the total supply, from a small set
// of human-level inputs: initial supply, initial inflation rate, halving
// delay, reward saturation, and the small-stake multiplier. The derivation
// treats issuance as an exponential decay whose integral must reach the
// total supply, which gives
//
//   total_supply = initial_supply * (1 + inflation * halving_delay / ln 2)
//
// evaluated exactly in integers, so the supply carries all 18 decimals.
//   k1 = reward_saturation * 365
//   k2 = 365^2 * reward_saturation * halving_delay / ln 2 / (1 - small_stake_multiplier)

use serde::{Deserialize, Serialize};

use tessera_core::error::TesseraError;
use tessera_core::math::mul_float_ratio;
use tessera_core::types::Tokens;

use crate::token::UNITS_PER_TOKEN;

/// Days in a year used by the derivation.
const DAYS_PER_YEAR: f64 = 365.0;

/// Deployment constants of the Stake Ledger and Issuer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EconomicsParams {
    /// Upper bound of the token supply; rewards are paid until it is reached.
    pub total_supply: Tokens,
    /// Tokens in circulation before staking rewards begin.
    pub initial_supply: Tokens,
    /// k1: constant added to the capped lock duration in the reward formula.
    pub locked_periods_coefficient: u128,
    /// k2: reward formula denominator.
    pub staking_coefficient: u128,
    /// Cap on the lock duration that earns a bonus.
    pub maximum_rewarded_periods: u32,
    /// Period length.
    pub hours_per_period: u64,
    /// Shortest allowed lock, in periods.
    pub minimum_locked_periods: u32,
    /// Smallest amount a sub-stake may hold.
    pub minimum_allowed_locked: Tokens,
    /// Largest amount a single staker may have locked.
    pub maximum_allowed_locked: Tokens,
    /// Periods a worker binding must age before it can be changed.
    pub minimum_worker_periods: u32,
}

/// Human-level inputs for a standard deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardInputs {
    /// Initial supply in whole tokens.
    pub initial_supply_tokens: u64,
    /// Annual inflation at genesis (1.0 = 100%).
    pub initial_inflation: f64,
    /// Years until the inflation rate halves.
    pub halving_delay: f64,
    /// Years of lock after which the duration bonus stops growing.
    pub reward_saturation: f64,
    /// Reward multiplier of a minimal-duration stake relative to a saturated one.
    pub small_stake_multiplier: f64,
    pub hours_per_period: u64,
    pub minimum_locked_periods: u32,
    /// Smallest sub-stake in whole tokens.
    pub minimum_allowed_locked_tokens: u64,
    /// Largest staker lock in whole tokens.
    pub maximum_allowed_locked_tokens: u64,
    pub minimum_worker_periods: u32,
}

impl Default for StandardInputs {
    fn default() -> Self {
        Self {
            initial_supply_tokens: 1_000_000_000,
            initial_inflation: 1.0,
            halving_delay: 2.0,
            reward_saturation: 1.0,
            small_stake_multiplier: 0.5,
            hours_per_period: 24,
            minimum_locked_periods: 30,
            minimum_allowed_locked_tokens: 15_000,
            maximum_allowed_locked_tokens: 4_000_000,
            minimum_worker_periods: 2,
        }
    }
}

impl EconomicsParams {
    /// Standard deployment economics.
    ///
    /// These are the values `derive` produces for `StandardInputs::default()`.
    pub fn standard() -> Self {
        Self {
            total_supply: 3_885_390_081_777_926_911_255_691_439,
            initial_supply: 1_000_000_000 * UNITS_PER_TOKEN,
            locked_periods_coefficient: 365,
            staking_coefficient: 768_812,
            maximum_rewarded_periods: 365,
            hours_per_period: 24,
            minimum_locked_periods: 30,
            minimum_allowed_locked: 15_000 * UNITS_PER_TOKEN,
            maximum_allowed_locked: 4_000_000 * UNITS_PER_TOKEN,
            minimum_worker_periods: 2,
        }
    }

    /// Derive deployment constants from human-level inputs.
    ///
    /// The reward supply is `initial * inflation * halving_delay / ln 2`,
    /// computed exactly over the binary values of the float inputs and
    /// rounded half up to a base unit.
    ///
    /// # Errors
    /// Returns `TesseraError::Config` if an input is negative or not finite,
    /// or the derived supply does not fit in u128.
    pub fn derive(inputs: &StandardInputs) -> Result<Self, TesseraError> {
        let ln2 = std::f64::consts::LN_2;
        let k1 = inputs.reward_saturation * DAYS_PER_YEAR;
        let k2 = DAYS_PER_YEAR * DAYS_PER_YEAR * inputs.reward_saturation * inputs.halving_delay
            / ln2
            / (1.0 - inputs.small_stake_multiplier);
        if !k1.is_finite() || !k2.is_finite() || k1 < 0.0 || k2 < 0.0 {
            return Err(TesseraError::Config(format!(
                "reward coefficients k1={} k2={} are not usable",
                k1, k2
            )));
        }

        let initial_supply = inputs.initial_supply_tokens as u128 * UNITS_PER_TOKEN;
        let growth = inputs.initial_inflation * inputs.halving_delay;
        let total_supply = mul_float_ratio(initial_supply, growth, ln2)
            .and_then(|reward| reward.checked_add(initial_supply))
            .ok_or_else(|| {
                TesseraError::Config(format!(
                    "supply growth {} over {} initial tokens is out of range",
                    growth, inputs.initial_supply_tokens
                ))
            })?;

        Ok(Self {
            total_supply,
            initial_supply,
            locked_periods_coefficient: k1 as u128,
            staking_coefficient: k2 as u128,
            maximum_rewarded_periods: k1 as u32,
            hours_per_period: inputs.hours_per_period,
            minimum_locked_periods: inputs.minimum_locked_periods,
            minimum_allowed_locked: inputs.minimum_allowed_locked_tokens as u128 * UNITS_PER_TOKEN,
            maximum_allowed_locked: inputs.maximum_allowed_locked_tokens as u128 * UNITS_PER_TOKEN,
            minimum_worker_periods: inputs.minimum_worker_periods,
        })
    }

    /// The tuple a deployment is parameterized with: hours per period, k2,
    /// k1, rewarded-period cap, minimum lock, and the allowed lock range.
    pub fn deployment_parameters(&self) -> (u64, u128, u128, u32, u32, Tokens, Tokens) {
        (
            self.hours_per_period,
            self.staking_coefficient,
            self.locked_periods_coefficient,
            self.maximum_rewarded_periods,
            self.minimum_locked_periods,
            self.minimum_allowed_locked,
            self.maximum_allowed_locked,
        )
    }

    /// Tokens reserved for staking rewards: `total_supply - initial_supply`.
    pub fn reward_supply(&self) -> Tokens {
        self.total_supply.saturating_sub(self.initial_supply)
    }

    /// Check internal consistency.
    ///
    /// # Errors
    /// Returns `TesseraError::Config` describing the first violated bound.
    pub fn validate(&self) -> Result<(), TesseraError> {
        if self.initial_supply > self.total_supply {
            return Err(TesseraError::Config(format!(
                "initial supply {} exceeds total supply {}",
                self.initial_supply, self.total_supply
            )));
        }
        if self.staking_coefficient == 0 {
            return Err(TesseraError::Config(
                "staking coefficient (k2) must be positive".to_string(),
            ));
        }
        if self.minimum_locked_periods == 0 || self.hours_per_period == 0 {
            return Err(TesseraError::Config(
                "period length and minimum lock must be positive".to_string(),
            ));
        }
        if self.minimum_allowed_locked == 0
            || self.minimum_allowed_locked > self.maximum_allowed_locked
        {
            return Err(TesseraError::Config(format!(
                "allowed lock range [{}, {}] is empty",
                self.minimum_allowed_locked, self.maximum_allowed_locked
            )));
        }
        Ok(())
    }
}

impl Default for EconomicsParams {
    fn default() -> Self {
        Self::standard()
    }
}

/// Deployment constants of the Slashing Evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashingParams {
    /// Penalty for a first offense.
    pub base_penalty: Tokens,
    /// Added to the penalty once per prior offense of the same staker.
    pub penalty_history_coefficient: Tokens,
    /// Penalty never exceeds `stake / percentage_penalty_coefficient`.
    pub percentage_penalty_coefficient: u128,
    /// Investigator receives `penalty / reward_coefficient`.
    pub reward_coefficient: u128,
}

impl Default for SlashingParams {
    fn default() -> Self {
        Self {
            base_penalty: 2 * UNITS_PER_TOKEN,
            penalty_history_coefficient: 0,
            percentage_penalty_coefficient: 100_000,
            reward_coefficient: 2,
        }
    }
}
