// crates/tessera-economics/src/issuer.rs
//
// Reward issuance for the Stake Ledger.
//
// Per sub-stake and per minted period:
//
//   reward = (total_supply - supply_snapshot) * locked * (k1 + min(periods, cap))
//            / (total_locked * k2)
//
// evaluated as a single truncating division over the full product. The
// snapshot is the issued supply as it stood at the first mint of the current
// period, so every staker minting in the same period sees the same remaining
// supply regardless of who minted first. A non-zero formula result that
// truncates to zero is paid as one base unit while any reserve remains, and
// no single reward may exceed the reserve.

use serde::{Deserialize, Serialize};

use tessera_core::error::TesseraError;
use tessera_core::math::mul_div;
use tessera_core::types::{Period, Tokens};

use crate::params::EconomicsParams;

/// Supply bookkeeping for reward minting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issuer {
    /// Hard cap on issued tokens.
    pub total_supply: Tokens,
    /// Issued supply at the start of `minting_period`.
    pub supply_snapshot: Tokens,
    /// Issued supply right now.
    pub issued: Tokens,
    /// Period in which `supply_snapshot` was taken.
    pub minting_period: Period,
    /// Whether the reward reserve has been funded.
    pub initialized: bool,
}

impl Issuer {
    /// Create an unfunded issuer. Every token counts as issued until
    /// `initialize` sets the reserve.
    pub fn new(total_supply: Tokens) -> Self {
        Self {
            total_supply,
            supply_snapshot: total_supply,
            issued: total_supply,
            minting_period: 0,
            initialized: false,
        }
    }

    /// Fund the reward reserve with `reward_supply` tokens.
    ///
    /// # Errors
    /// Returns `TesseraError::WrongPhase` if already initialized, or
    /// `TesseraError::InvalidAmount` if the reserve exceeds the total supply.
    pub fn initialize(&mut self, reward_supply: Tokens) -> Result<(), TesseraError> {
        if self.initialized {
            return Err(TesseraError::WrongPhase(
                "reward reserve is already initialized".to_string(),
            ));
        }
        if reward_supply > self.total_supply {
            return Err(TesseraError::InvalidAmount(format!(
                "reward supply {} exceeds total supply {}",
                reward_supply, self.total_supply
            )));
        }
        self.issued = self.total_supply - reward_supply;
        self.supply_snapshot = self.issued;
        self.initialized = true;
        Ok(())
    }

    /// Tokens still available for rewards.
    pub fn reserved_reward(&self) -> Tokens {
        self.total_supply.saturating_sub(self.issued)
    }

    /// Mint the reward for one sub-stake in one period.
    ///
    /// # Arguments
    /// - `params`: deployment coefficients (k1, k2, rewarded-period cap).
    /// - `current_period`: period in which minting happens (drives the snapshot).
    /// - `locked`: the sub-stake's locked amount.
    /// - `total_locked`: network-wide locked total for the minted period.
    /// - `locked_periods`: periods the sub-stake remains locked after the minted period.
    ///
    /// # Returns
    /// The minted amount, already added to `issued`.
    pub fn mint(
        &mut self,
        params: &EconomicsParams,
        current_period: Period,
        locked: Tokens,
        total_locked: Tokens,
        locked_periods: u32,
    ) -> Tokens {
        if self.issued >= self.total_supply || locked == 0 || total_locked == 0 {
            return 0;
        }
        if current_period > self.minting_period {
            self.supply_snapshot = self.issued;
            self.minting_period = current_period;
        }

        let remaining = self.total_supply.saturating_sub(self.supply_snapshot);
        let max_reward = self.reserved_reward();
        let periods = locked_periods.min(params.maximum_rewarded_periods) as u128;
        let weight = params.locked_periods_coefficient + periods;

        let amount = match (
            locked.checked_mul(weight),
            total_locked.checked_mul(params.staking_coefficient),
        ) {
            (Some(numerator), Some(denominator)) => {
                mul_div(remaining, numerator, denominator).unwrap_or(max_reward)
            }
            _ => max_reward,
        };

        let amount = if amount == 0 { 1 } else { amount.min(max_reward) };
        self.issued += amount;
        amount
    }

    /// Return `amount` tokens to the reward reserve.
    pub fn unmint(&mut self, amount: Tokens) {
        self.issued = self.issued.saturating_sub(amount);
        self.supply_snapshot = self.supply_snapshot.saturating_sub(amount);
    }
}
