// crates/tessera-escrow/src/worklock.rs
//
// Bid Escrow: auctions a fixed token pool for ether, turns each bidder's
// share into stake, and returns the ether as the bidder's stake completes
// work.
//
// Lifecycle:
//   BeforeBidding  tokens may be added to the pool
//   Bidding        bids accumulate ether and may be cancelled
//   Ended          bidders claim their share; unclaimed leftovers are
//                  burned into the staking reward reserve
//
// A bidder's share is always `deposit * pool / total_eth`. After a claim, a
// tenth of it is locked in the Stake Ledger with work measurement on, and
// the bidder can pull back ether in proportion to the work done:
//
//   refund = work * eth_at_claim * boosting_refund / (work_quota * SLOWING_REFUND)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use tessera_core::error::TesseraError;
use tessera_core::identity::Address;
use tessera_core::math::{mul_div, mul_div_ceil};
use tessera_core::types::{Period, Timestamp, Tokens, Wei};
use tessera_economics::staking::{StakeLedger, StakingState};
use tessera_economics::token::Balances;

/// Fixed divisor of the refund rate; `boosting_refund` is expressed against it.
pub const SLOWING_REFUND: u128 = 100;

/// Part of a claimed allocation that is left unlocked, in tenths.
const FREE_TENTHS: u128 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BidPhase {
    BeforeBidding,
    Bidding,
    Ended,
}

impl std::fmt::Display for BidPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BidPhase::BeforeBidding => write!(f, "before bidding"),
            BidPhase::Bidding => write!(f, "bidding"),
            BidPhase::Ended => write!(f, "ended"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidRecord {
    /// Ether still held for this bidder.
    pub deposited_eth: Wei,
    pub claimed: bool,
    /// Completed work already converted into refunds.
    pub completed_work_baseline: Tokens,
    /// Work that releases the whole claim-time deposit.
    pub work_quota: Tokens,
    pub eth_at_claim: Wei,
}

/// Auction settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidEscrowParams {
    pub start_bid: Timestamp,
    pub end_bid: Timestamp,
    /// Refund speed relative to `SLOWING_REFUND`.
    pub boosting_refund: u128,
    /// Lock duration of claimed stake.
    pub staking_periods: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidEscrowState {
    /// Tokens offered in the auction.
    pub token_supply: Tokens,
    pub total_eth: Wei,
    pub claimed_tokens: Tokens,
    pub burned_tokens: Tokens,
    pub bids: BTreeMap<Address, BidRecord>,
}

impl BidEscrowState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bid_of(&self, bidder: &Address) -> Option<&BidRecord> {
        self.bids.get(bidder)
    }

    /// Share of the pool that `eth` buys at the current totals.
    pub fn eth_to_tokens(&self, eth: Wei) -> Tokens {
        mul_div(eth, self.token_supply, self.total_eth).unwrap_or(0)
    }

    /// Tokens no bid is entitled to and that have not been burned yet.
    pub fn unclaimed_surplus(&self) -> Tokens {
        let entitled: Tokens = self
            .bids
            .values()
            .filter(|b| !b.claimed)
            .map(|b| self.eth_to_tokens(b.deposited_eth))
            .sum();
        self.token_supply
            .saturating_sub(self.claimed_tokens)
            .saturating_sub(entitled)
            .saturating_sub(self.burned_tokens)
    }
}

/// Tokens credited to a bidder by `claim`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimOutcome {
    pub tokens: Tokens,
    pub free: Tokens,
    pub locked: Tokens,
    pub first_locked_period: Period,
}

/// Ether returned by `refund`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundOutcome {
    pub refund: Wei,
    pub remaining_deposit: Wei,
    /// Whether work measurement was switched off because the deposit ran out.
    pub exhausted: bool,
}

/// Bid Escrow logic. Its address holds the token pool and the bid ether.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidEscrow {
    pub address: Address,
    pub params: BidEscrowParams,
}

impl BidEscrow {
    pub fn new(address: Address, params: BidEscrowParams) -> Self {
        Self { address, params }
    }

    pub fn phase(&self, now: Timestamp) -> BidPhase {
        if now < self.params.start_bid {
            BidPhase::BeforeBidding
        } else if now < self.params.end_bid {
            BidPhase::Bidding
        } else {
            BidPhase::Ended
        }
    }

    fn require_phase(&self, now: Timestamp, expected: BidPhase) -> Result<(), TesseraError> {
        let phase = self.phase(now);
        if phase != expected {
            return Err(TesseraError::WrongPhase(format!(
                "auction is {}, expected {}",
                phase, expected
            )));
        }
        Ok(())
    }

    /// Add `amount` tokens from `funder` to the auction pool.
    pub fn token_deposit(
        &self,
        state: &mut BidEscrowState,
        tokens: &mut Balances,
        now: Timestamp,
        funder: &Address,
        amount: Tokens,
    ) -> Result<(), TesseraError> {
        if self.phase(now) == BidPhase::Ended {
            return Err(TesseraError::WrongPhase(
                "the auction has ended".to_string(),
            ));
        }
        if amount == 0 {
            return Err(TesseraError::InvalidAmount(
                "token deposit must be positive".to_string(),
            ));
        }
        tokens.transfer(funder, &self.address, amount)?;
        state.token_supply += amount;
        tracing::info!("Auction pool funded with {} tokens by {}", amount, funder.short());
        Ok(())
    }

    /// Place or raise a bid. Returns the bidder's total deposit.
    pub fn bid(
        &self,
        state: &mut BidEscrowState,
        ether: &mut Balances,
        now: Timestamp,
        bidder: &Address,
        value: Wei,
    ) -> Result<Wei, TesseraError> {
        self.require_phase(now, BidPhase::Bidding)?;
        if value == 0 {
            return Err(TesseraError::NoPayment);
        }
        ether.transfer(bidder, &self.address, value)?;
        let record = state.bids.entry(*bidder).or_default();
        record.deposited_eth += value;
        state.total_eth += value;
        let deposited = record.deposited_eth;
        tracing::info!("Bid: {} deposited {} wei (total {})", bidder.short(), value, deposited);
        Ok(deposited)
    }

    /// Withdraw a bid entirely. Returns the ether sent back.
    pub fn cancel_bid(
        &self,
        state: &mut BidEscrowState,
        ether: &mut Balances,
        now: Timestamp,
        bidder: &Address,
    ) -> Result<Wei, TesseraError> {
        self.require_phase(now, BidPhase::Bidding)?;
        let record = state.bids.remove(bidder).ok_or_else(|| no_bid(bidder))?;
        state.total_eth -= record.deposited_eth;
        ether.transfer(&self.address, bidder, record.deposited_eth)?;
        tracing::info!("Bid cancelled: {} took back {} wei", bidder.short(), record.deposited_eth);
        Ok(record.deposited_eth)
    }

    /// Convert the bidder's allocation into stake.
    ///
    /// # Errors
    /// `WrongPhase` before the auction ends, `NoBid` without a bid or with a
    /// zero allocation, `AlreadyClaimed` on a second claim.
    #[allow(clippy::too_many_arguments)]
    pub fn claim(
        &self,
        state: &mut BidEscrowState,
        tokens: &mut Balances,
        ledger: &StakeLedger,
        staking: &mut StakingState,
        now: Timestamp,
        current: Period,
        bidder: &Address,
    ) -> Result<ClaimOutcome, TesseraError> {
        self.require_phase(now, BidPhase::Ended)?;
        let record = state.bids.get(bidder).ok_or_else(|| no_bid(bidder))?;
        if record.claimed {
            return Err(TesseraError::AlreadyClaimed(bidder.to_string()));
        }
        let allocation = state.eth_to_tokens(record.deposited_eth);
        if allocation == 0 {
            return Err(no_bid(bidder));
        }
        let free = allocation * FREE_TENTHS / 10;
        let locked = allocation - free;

        ledger.deposit_from_bid_escrow(
            staking,
            tokens,
            current,
            &self.address,
            bidder,
            free,
            locked,
            self.params.staking_periods,
        )?;
        let baseline = ledger.set_work_measurement(staking, &self.address, bidder, true)?;

        let record = state.bids.get_mut(bidder).ok_or_else(|| no_bid(bidder))?;
        record.claimed = true;
        record.completed_work_baseline = baseline;
        record.work_quota = locked;
        record.eth_at_claim = record.deposited_eth;
        state.claimed_tokens += allocation;

        tracing::info!(
            "Claim: {} received {} tokens ({} locked for {} periods)",
            bidder.short(),
            allocation,
            locked,
            self.params.staking_periods
        );
        Ok(ClaimOutcome {
            tokens: allocation,
            free,
            locked,
            first_locked_period: current + 1,
        })
    }

    /// Return ether in proportion to work completed since the last refund.
    ///
    /// # Errors
    /// `NoBid` if the bidder has not claimed, `NothingToRefund` if the
    /// deposit is spent or no new work was done.
    pub fn refund(
        &self,
        state: &mut BidEscrowState,
        ether: &mut Balances,
        ledger: &StakeLedger,
        staking: &mut StakingState,
        bidder: &Address,
    ) -> Result<RefundOutcome, TesseraError> {
        let record = state
            .bids
            .get(bidder)
            .filter(|r| r.claimed)
            .ok_or_else(|| no_bid(bidder))?;
        if record.deposited_eth == 0 {
            return Err(TesseraError::NothingToRefund(format!(
                "{} has no deposit left",
                bidder
            )));
        }
        let completed = staking.completed_work(bidder);
        let work = completed.saturating_sub(record.completed_work_baseline);
        let refund = self
            .work_to_eth(record, work)
            .min(record.deposited_eth);
        if refund == 0 {
            return Err(TesseraError::NothingToRefund(format!(
                "{} has no new work to refund",
                bidder
            )));
        }
        let spent_work = self.eth_to_work(record, refund);

        let record = state.bids.get_mut(bidder).ok_or_else(|| no_bid(bidder))?;
        record.deposited_eth -= refund;
        record.completed_work_baseline += spent_work;
        let remaining_deposit = record.deposited_eth;
        let exhausted = remaining_deposit == 0;
        if exhausted {
            ledger.set_work_measurement(staking, &self.address, bidder, false)?;
        }
        ether.transfer(&self.address, bidder, refund)?;

        tracing::info!(
            "Refund: {} received {} wei for {} work ({} wei left)",
            bidder.short(),
            refund,
            work,
            remaining_deposit
        );
        Ok(RefundOutcome {
            refund,
            remaining_deposit,
            exhausted,
        })
    }

    /// Burn the pool tokens no bidder is entitled to into the reward
    /// reserve. Returns the amount burned; later calls return 0.
    pub fn burn_unclaimed(
        &self,
        state: &mut BidEscrowState,
        tokens: &mut Balances,
        ledger: &StakeLedger,
        staking: &mut StakingState,
        now: Timestamp,
    ) -> Result<Tokens, TesseraError> {
        self.require_phase(now, BidPhase::Ended)?;
        let amount = state.unclaimed_surplus();
        if amount == 0 {
            return Ok(0);
        }
        ledger.burn_into_reserve(staking, tokens, &self.address, amount)?;
        state.burned_tokens += amount;
        tracing::info!("Burned {} unclaimed auction tokens into the reward reserve", amount);
        Ok(amount)
    }

    /// Work the bidder still has to complete to release the whole remaining
    /// deposit.
    pub fn remaining_work(&self, state: &BidEscrowState, staking: &StakingState, bidder: &Address) -> Tokens {
        let Some(record) = state.bids.get(bidder).filter(|r| r.claimed) else {
            return 0;
        };
        let needed = self.eth_to_work(record, record.deposited_eth);
        let done = staking
            .completed_work(bidder)
            .saturating_sub(record.completed_work_baseline);
        needed.saturating_sub(done)
    }

    fn work_to_eth(&self, record: &BidRecord, work: Tokens) -> Wei {
        let Some(denominator) = record.work_quota.checked_mul(SLOWING_REFUND) else {
            return 0;
        };
        record
            .eth_at_claim
            .checked_mul(self.params.boosting_refund)
            .and_then(|numerator| mul_div(work, numerator, denominator))
            .unwrap_or(0)
    }

    fn eth_to_work(&self, record: &BidRecord, eth: Wei) -> Tokens {
        let Some(denominator) = record.eth_at_claim.checked_mul(self.params.boosting_refund) else {
            return 0;
        };
        record
            .work_quota
            .checked_mul(SLOWING_REFUND)
            .and_then(|numerator| mul_div_ceil(eth, numerator, denominator))
            .unwrap_or(0)
    }
}

fn no_bid(bidder: &Address) -> TesseraError {
    TesseraError::NoBid(bidder.to_string())
}
