// crates/tessera-economics/src/staking.rs
//
// Stake Ledger: staker balances, sub-stakes, per-period locked totals,
// reward minting, work measurement, and slashing.
//
// Storage (`StakingState`) and logic (`StakeLedger`) are separate types so
// the logic can be swapped behind an upgrade dispatcher while the storage
// stays put.
//
// Period accounting:
//   - A deposit made in period c locks tokens for [c+1, c+N].
//   - Confirming activity in period c commits the staker to period c+1.
//     While wind-down is off, every sub-stake active in c+1 is pushed one
//     period further, so a confirming staker's lock never runs out.
//   - Rewards for a committed period are minted once that period has fully
//     elapsed, using the frozen network total of that period.
//   - `period_totals[p]` equals the sum of sub-stakes covering p for every
//     period that has not yet elapsed. Elapsed totals are reward
//     denominators and are never edited.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use tessera_core::error::TesseraError;
use tessera_core::identity::Address;
use tessera_core::traits::{NodeActivity, Upgradeable};
use tessera_core::types::{Downtime, Period, Tokens};

use crate::issuer::Issuer;
use crate::params::EconomicsParams;
use crate::token::Balances;

/// Storage schema written by this ledger version.
pub const LEDGER_SCHEMA_VERSION: u32 = 1;

/// One contiguous, amount-and-duration-bounded part of a staker's lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubStake {
    /// First period in which the tokens are locked.
    pub first_period: Period,
    /// Last locked period, inclusive.
    pub last_period: Period,
    /// Locked amount.
    pub locked: Tokens,
}

impl SubStake {
    pub fn covers(&self, period: Period) -> bool {
        self.locked > 0 && self.first_period <= period && period <= self.last_period
    }
}

/// Everything the ledger knows about one staker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakerInfo {
    /// All tokens held in escrow for this staker, locked and free.
    pub value: Tokens,
    /// Minted reward not yet withdrawn.
    pub reward: Tokens,
    /// Reward minted while work measurement was on.
    pub completed_work: Tokens,
    pub restake_disabled: bool,
    /// `set_restake` is refused before this period.
    pub lock_restake_until: Period,
    pub wind_down: bool,
    pub measure_work: bool,
    pub worker: Option<Address>,
    /// Period in which the current worker was bonded.
    pub worker_start_period: Period,
    /// Committed periods whose reward has not been minted yet.
    pub pending_periods: BTreeSet<Period>,
    /// Latest period the staker committed to.
    pub last_active_period: Option<Period>,
    pub past_downtime: Vec<Downtime>,
    pub sub_stakes: Vec<SubStake>,
}

impl StakerInfo {
    /// Tokens locked in `period` across all sub-stakes.
    pub fn locked_in(&self, period: Period) -> Tokens {
        self.sub_stakes
            .iter()
            .filter(|s| s.covers(period))
            .map(|s| s.locked)
            .sum()
    }

    /// Tokens that may be withdrawn or re-locked in `current`: the value
    /// above the stricter of this and next period's lock.
    pub fn free_balance(&self, current: Period) -> Tokens {
        let locked = self.locked_in(current).max(self.locked_in(current + 1));
        self.value.saturating_sub(locked)
    }
}

/// Persistent storage of the Stake Ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakingState {
    pub schema_version: u32,
    /// Token account holding every staker's escrowed value and the reserve.
    pub escrow_account: Address,
    pub issuer: Issuer,
    pub stakers: BTreeMap<Address, StakerInfo>,
    /// Worker address to the staker it confirms for.
    pub workers: BTreeMap<Address, Address>,
    pub period_totals: BTreeMap<Period, Tokens>,
    /// The only address allowed to call `slash_staker`.
    pub adjudicator: Address,
    /// The only address allowed to deposit on behalf of bidders.
    pub bid_escrow: Address,
}

impl StakingState {
    pub fn new(
        escrow_account: Address,
        total_supply: Tokens,
        adjudicator: Address,
        bid_escrow: Address,
    ) -> Self {
        Self {
            schema_version: 0,
            escrow_account,
            issuer: Issuer::new(total_supply),
            stakers: BTreeMap::new(),
            workers: BTreeMap::new(),
            period_totals: BTreeMap::new(),
            adjudicator,
            bid_escrow,
        }
    }

    pub fn staker(&self, staker: &Address) -> Option<&StakerInfo> {
        self.stakers.get(staker)
    }

    /// Tokens `staker` has locked in `period`.
    pub fn locked_tokens(&self, staker: &Address, period: Period) -> Tokens {
        self.stakers.get(staker).map(|i| i.locked_in(period)).unwrap_or(0)
    }

    /// All tokens held for `staker`.
    pub fn all_tokens(&self, staker: &Address) -> Tokens {
        self.stakers.get(staker).map(|i| i.value).unwrap_or(0)
    }

    pub fn completed_work(&self, staker: &Address) -> Tokens {
        self.stakers.get(staker).map(|i| i.completed_work).unwrap_or(0)
    }

    pub fn sub_stakes(&self, staker: &Address) -> &[SubStake] {
        self.stakers
            .get(staker)
            .map(|i| i.sub_stakes.as_slice())
            .unwrap_or(&[])
    }

    /// Network-wide locked total for `period`.
    pub fn period_total(&self, period: Period) -> Tokens {
        self.period_totals.get(&period).copied().unwrap_or(0)
    }

    pub fn reserved_reward(&self) -> Tokens {
        self.issuer.reserved_reward()
    }

    pub fn staker_from_worker(&self, worker: &Address) -> Option<Address> {
        self.workers.get(worker).copied()
    }

    /// Resolve the staker on whose behalf `caller` acts: the staker bonded
    /// to `caller` as a worker, or `caller` itself if it is a staker.
    ///
    /// # Errors
    /// Returns `TesseraError::NotFound` if `caller` is neither.
    pub fn resolve_staker(&self, caller: &Address) -> Result<Address, TesseraError> {
        if let Some(staker) = self.workers.get(caller) {
            return Ok(*staker);
        }
        if self.stakers.contains_key(caller) {
            return Ok(*caller);
        }
        Err(TesseraError::NotFound(format!(
            "{} is neither a staker nor a bonded worker",
            caller
        )))
    }

    /// Read-only activity view for other components.
    pub fn view(&self) -> LedgerView<'_> {
        LedgerView { state: self }
    }

    /// Recompute locked totals from sub-stakes for every period from `from`
    /// onward and compare with the incrementally maintained map.
    ///
    /// # Errors
    /// Returns `TesseraError::InvalidState` naming the first mismatched period.
    pub fn verify_period_totals(&self, from: Period) -> Result<(), TesseraError> {
        let mut expected: BTreeMap<Period, Tokens> = BTreeMap::new();
        for info in self.stakers.values() {
            for sub in info.sub_stakes.iter().filter(|s| s.locked > 0) {
                for period in sub.first_period.max(from)..=sub.last_period {
                    *expected.entry(period).or_insert(0) += sub.locked;
                }
            }
        }
        let actual: BTreeMap<Period, Tokens> = self
            .period_totals
            .range(from..)
            .filter(|(_, v)| **v > 0)
            .map(|(k, v)| (*k, *v))
            .collect();
        if expected == actual {
            return Ok(());
        }
        let mismatch = expected
            .keys()
            .chain(actual.keys())
            .copied()
            .find(|p| expected.get(p) != actual.get(p))
            .unwrap_or(from);
        Err(TesseraError::InvalidState(format!(
            "period {} total is {} but sub-stakes sum to {}",
            mismatch,
            actual.get(&mismatch).copied().unwrap_or(0),
            expected.get(&mismatch).copied().unwrap_or(0)
        )))
    }
}

/// Borrowed view of ledger storage implementing `NodeActivity`.
pub struct LedgerView<'a> {
    state: &'a StakingState,
}

impl NodeActivity for LedgerView<'_> {
    fn is_registered(&self, node: &Address) -> bool {
        self.state.stakers.contains_key(node)
    }

    fn past_downtime(&self, node: &Address) -> Vec<Downtime> {
        self.state
            .stakers
            .get(node)
            .map(|i| i.past_downtime.clone())
            .unwrap_or_default()
    }

    fn last_active_period(&self, node: &Address) -> Option<Period> {
        self.state.stakers.get(node).and_then(|i| i.last_active_period)
    }
}

/// Result of minting a staker's pending periods.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintOutcome {
    pub staker: Address,
    /// Periods whose reward was minted, ascending.
    pub periods: Vec<Period>,
    pub reward: Tokens,
}

/// Result of an activity confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmOutcome {
    pub staker: Address,
    /// The newly committed period, or `None` if it was already committed.
    pub committed_period: Option<Period>,
    /// Rewards minted as part of the confirmation.
    pub minted: MintOutcome,
}

/// Result of a slash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashOutcome {
    pub staker: Address,
    /// Penalty actually taken after clamping to the staker's value.
    pub penalty: Tokens,
    pub rewardee: Address,
    pub reward: Tokens,
}

/// Stake Ledger logic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeLedger {
    /// Address identifying this logic version.
    pub address: Address,
    pub version: u32,
    pub params: EconomicsParams,
}

impl StakeLedger {
    pub fn new(address: Address, params: EconomicsParams) -> Self {
        Self {
            address,
            version: LEDGER_SCHEMA_VERSION,
            params,
        }
    }

    /// Same logic declaring a different storage schema version.
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Fund the reward reserve from `funder`'s tokens.
    ///
    /// # Errors
    /// Returns `TesseraError::WrongPhase` if already initialized, or
    /// `TesseraError::InsufficientBalance` if `funder` cannot pay.
    pub fn initialize(
        &self,
        state: &mut StakingState,
        tokens: &mut Balances,
        funder: &Address,
        reward_supply: Tokens,
    ) -> Result<(), TesseraError> {
        state.issuer.initialize(reward_supply)?;
        tokens.transfer(funder, &state.escrow_account, reward_supply)?;
        tracing::info!("Reward reserve initialized with {} tokens", reward_supply);
        Ok(())
    }

    /// Deposit `amount` tokens from the staker's wallet and lock them for
    /// `periods` periods starting next period.
    ///
    /// # Errors
    /// - `WrongPhase` before the reward reserve is initialized.
    /// - `InvalidDuration` if `periods` is below the minimum lock.
    /// - `InvalidAmount` if `amount` is below the minimum sub-stake or would
    ///   push next period's lock over the maximum.
    /// - `InsufficientBalance` if the wallet cannot cover `amount`.
    pub fn deposit(
        &self,
        state: &mut StakingState,
        tokens: &mut Balances,
        current: Period,
        staker: &Address,
        amount: Tokens,
        periods: u32,
    ) -> Result<SubStake, TesseraError> {
        if !state.issuer.initialized {
            return Err(TesseraError::WrongPhase(
                "stake ledger is not initialized".to_string(),
            ));
        }
        let sub = self.new_lock(current, amount, periods)?;
        let locked_next = state.locked_tokens(staker, current + 1);
        self.check_max_lock(locked_next, amount)?;

        tokens.transfer(staker, &state.escrow_account, amount)?;
        let info = state.stakers.entry(*staker).or_default();
        info.value += amount;
        push_sub_stake(info, &mut state.period_totals, sub, false);

        tracing::info!(
            "Deposit: {} locked {} tokens for periods {}..={}",
            staker.short(),
            amount,
            sub.first_period,
            sub.last_period
        );
        Ok(sub)
    }

    /// Lock already-deposited free tokens for `periods` periods. Merges into
    /// the latest sub-stake when it spans exactly the same range.
    ///
    /// # Errors
    /// - `NothingToLock` if the free balance is zero or below `amount`.
    /// - `InvalidAmount` / `InvalidDuration` as for `deposit`.
    pub fn lock(
        &self,
        state: &mut StakingState,
        current: Period,
        staker: &Address,
        amount: Tokens,
        periods: u32,
    ) -> Result<SubStake, TesseraError> {
        let free = state
            .stakers
            .get(staker)
            .map(|i| i.free_balance(current))
            .unwrap_or(0);
        if free == 0 || amount > free {
            return Err(TesseraError::NothingToLock(format!(
                "{} has {} free tokens, {} requested",
                staker, free, amount
            )));
        }
        let sub = self.new_lock(current, amount, periods)?;
        self.check_max_lock(state.locked_tokens(staker, current + 1), amount)?;

        let info = state
            .stakers
            .get_mut(staker)
            .ok_or_else(|| not_a_staker(staker))?;
        push_sub_stake(info, &mut state.period_totals, sub, true);
        tracing::info!("Lock: {} locked {} free tokens", staker.short(), amount);
        Ok(sub)
    }

    /// Split sub-stake `index`: it keeps its end and loses `amount`, and a
    /// new sub-stake with the same start, `amount` locked, and an end
    /// `extra_periods` later is appended.
    ///
    /// # Errors
    /// - `NotFound` for an unknown staker or index.
    /// - `InvalidDuration` if `extra_periods` is zero or the sub-stake is not
    ///   active next period.
    /// - `InsufficientStake` if `amount` exceeds the sub-stake.
    /// - `InvalidAmount` if either half would be below the minimum sub-stake.
    pub fn divide_stake(
        &self,
        state: &mut StakingState,
        current: Period,
        staker: &Address,
        index: usize,
        amount: Tokens,
        extra_periods: u32,
    ) -> Result<SubStake, TesseraError> {
        let info = state
            .stakers
            .get_mut(staker)
            .ok_or_else(|| not_a_staker(staker))?;
        let sub = *info.sub_stakes.get(index).ok_or_else(|| {
            TesseraError::NotFound(format!("{} has no sub-stake {}", staker, index))
        })?;

        if extra_periods == 0 {
            return Err(TesseraError::InvalidDuration(
                "divided stake must extend by at least one period".to_string(),
            ));
        }
        if sub.locked == 0 || sub.last_period <= current {
            return Err(TesseraError::InvalidDuration(format!(
                "sub-stake {} is not active in the next period",
                index
            )));
        }
        if amount > sub.locked {
            return Err(TesseraError::InsufficientStake(format!(
                "cannot divide {} out of sub-stake holding {}",
                amount, sub.locked
            )));
        }
        let min = self.params.minimum_allowed_locked;
        if amount < min || sub.locked - amount < min {
            return Err(TesseraError::InvalidAmount(format!(
                "both parts of a divided stake must hold at least {}",
                min
            )));
        }
        let new_last = sub
            .last_period
            .checked_add(extra_periods)
            .ok_or_else(|| TesseraError::InvalidDuration("period overflow".to_string()))?;

        info.sub_stakes[index].locked -= amount;
        let divided = SubStake {
            first_period: sub.first_period,
            last_period: new_last,
            locked: amount,
        };
        info.sub_stakes.push(divided);
        // The covered range [first, old_last] keeps its sum; only the tail grows.
        add_to_totals(
            &mut state.period_totals,
            sub.last_period + 1,
            new_last,
            amount,
        );

        tracing::info!(
            "Divide: {} split {} off sub-stake {} until period {}",
            staker.short(),
            amount,
            index,
            new_last
        );
        Ok(divided)
    }

    /// Extend sub-stake `index` by `extra_periods`.
    ///
    /// # Errors
    /// - `NotFound` for an unknown staker or index.
    /// - `InvalidDuration` if `extra_periods` is zero or the sub-stake is not
    ///   active next period.
    /// - `DurationTooShort` if the remaining lock would still be below the
    ///   minimum lock duration.
    pub fn prolong_stake(
        &self,
        state: &mut StakingState,
        current: Period,
        staker: &Address,
        index: usize,
        extra_periods: u32,
    ) -> Result<SubStake, TesseraError> {
        let info = state
            .stakers
            .get_mut(staker)
            .ok_or_else(|| not_a_staker(staker))?;
        let sub = info.sub_stakes.get_mut(index).ok_or_else(|| {
            TesseraError::NotFound(format!("{} has no sub-stake {}", staker, index))
        })?;

        if extra_periods == 0 {
            return Err(TesseraError::InvalidDuration(
                "prolong requires at least one period".to_string(),
            ));
        }
        if sub.locked == 0 || sub.last_period <= current {
            return Err(TesseraError::InvalidDuration(format!(
                "sub-stake {} is not active in the next period",
                index
            )));
        }
        let remaining = (sub.last_period - current) as u64 + extra_periods as u64;
        if remaining < self.params.minimum_locked_periods as u64 {
            return Err(TesseraError::DurationTooShort(format!(
                "prolonged lock of {} periods is below the minimum of {}",
                remaining, self.params.minimum_locked_periods
            )));
        }
        let new_last = sub
            .last_period
            .checked_add(extra_periods)
            .ok_or_else(|| TesseraError::InvalidDuration("period overflow".to_string()))?;

        add_to_totals(
            &mut state.period_totals,
            sub.last_period + 1,
            new_last,
            sub.locked,
        );
        sub.last_period = new_last;
        Ok(*sub)
    }

    /// Bond `worker` as the address that confirms activity for `staker`.
    ///
    /// # Errors
    /// - `NotFound` if `staker` has never deposited.
    /// - `InvalidState` if `worker` is another staker or bonded elsewhere.
    /// - `WrongPhase` if the current binding is younger than the minimum.
    pub fn bond_worker(
        &self,
        state: &mut StakingState,
        current: Period,
        staker: &Address,
        worker: &Address,
    ) -> Result<(), TesseraError> {
        if worker != staker && state.stakers.contains_key(worker) {
            return Err(TesseraError::InvalidState(format!(
                "{} is a staker and cannot be a worker",
                worker
            )));
        }
        if let Some(owner) = state.workers.get(worker) {
            if owner != staker {
                return Err(TesseraError::InvalidState(format!(
                    "{} is already bonded to {}",
                    worker, owner
                )));
            }
        }
        let info = state
            .stakers
            .get_mut(staker)
            .ok_or_else(|| not_a_staker(staker))?;
        if info.worker == Some(*worker) {
            return Ok(());
        }
        if let Some(previous) = info.worker {
            let ready_at = info.worker_start_period + self.params.minimum_worker_periods;
            if current < ready_at {
                return Err(TesseraError::WrongPhase(format!(
                    "worker can be changed from period {}",
                    ready_at
                )));
            }
            state.workers.remove(&previous);
        }
        info.worker = Some(*worker);
        info.worker_start_period = current;
        state.workers.insert(*worker, *staker);
        tracing::info!("Worker {} bonded to {}", worker.short(), staker.short());
        Ok(())
    }

    /// Commit the caller's staker to the next period, minting any elapsed
    /// committed periods first. A second call in the same period is a no-op.
    ///
    /// # Errors
    /// - `NotFound` if `caller` is neither a staker nor a bonded worker.
    /// - `InsufficientStake` if nothing is locked for the next period.
    pub fn confirm_activity(
        &self,
        state: &mut StakingState,
        current: Period,
        caller: &Address,
    ) -> Result<ConfirmOutcome, TesseraError> {
        let staker = state.resolve_staker(caller)?;
        let minted = self.mint(state, current, &staker)?;
        let next = current + 1;

        let info = state
            .stakers
            .get_mut(&staker)
            .ok_or_else(|| not_a_staker(&staker))?;
        if info.pending_periods.contains(&next) {
            return Ok(ConfirmOutcome {
                staker,
                committed_period: None,
                minted,
            });
        }
        if info.locked_in(next) == 0 {
            return Err(TesseraError::InsufficientStake(format!(
                "{} has nothing locked for period {}",
                staker, next
            )));
        }

        if let Some(last) = info.last_active_period {
            if last < current {
                info.past_downtime.push(Downtime {
                    start_period: last + 1,
                    end_period: current,
                });
            }
        }

        if !info.wind_down {
            for sub in info.sub_stakes.iter_mut().filter(|s| s.covers(next)) {
                sub.last_period += 1;
                add_to_totals(
                    &mut state.period_totals,
                    sub.last_period,
                    sub.last_period,
                    sub.locked,
                );
            }
        }

        info.pending_periods.insert(next);
        info.last_active_period = Some(next);
        tracing::info!("Activity confirmed: {} for period {}", staker.short(), next);
        Ok(ConfirmOutcome {
            staker,
            committed_period: Some(next),
            minted,
        })
    }

    /// Mint rewards for every committed period that has fully elapsed.
    ///
    /// # Errors
    /// Returns `TesseraError::NotFound` for an unknown staker.
    pub fn mint(
        &self,
        state: &mut StakingState,
        current: Period,
        staker: &Address,
    ) -> Result<MintOutcome, TesseraError> {
        let info = state
            .stakers
            .get_mut(staker)
            .ok_or_else(|| not_a_staker(staker))?;
        let due: Vec<Period> = info.pending_periods.range(..current).copied().collect();
        let restake = !info.restake_disabled;
        let mut outcome = MintOutcome {
            staker: *staker,
            periods: Vec::with_capacity(due.len()),
            reward: 0,
        };

        // Every due period is priced on the locks as they stood before this
        // call; re-staked rewards join the sub-stakes once all are minted.
        let locks: Vec<SubStake> = info.sub_stakes.clone();
        let mut restaked: Vec<Tokens> = vec![0; locks.len()];

        for period in due {
            info.pending_periods.remove(&period);
            let total_locked = state.period_totals.get(&period).copied().unwrap_or(0);
            let mut period_reward: Tokens = 0;

            if total_locked > 0 {
                for (index, sub) in locks.iter().enumerate().filter(|(_, s)| s.covers(period)) {
                    let reward = state.issuer.mint(
                        &self.params,
                        current,
                        sub.locked,
                        total_locked,
                        sub.last_period - period,
                    );
                    period_reward += reward;
                    if restake && sub.last_period >= current {
                        restaked[index] += reward;
                    }
                }
            }

            tracing::debug!(
                "Minted {} tokens for {} in period {} (total locked {})",
                period_reward,
                staker.short(),
                period,
                total_locked
            );
            info.value += period_reward;
            info.reward += period_reward;
            if info.measure_work {
                info.completed_work += period_reward;
            }
            outcome.reward += period_reward;
            outcome.periods.push(period);
        }

        for (index, amount) in restaked.into_iter().enumerate() {
            if amount == 0 {
                continue;
            }
            let sub = &mut info.sub_stakes[index];
            sub.locked += amount;
            add_to_totals(
                &mut state.period_totals,
                sub.first_period.max(current),
                sub.last_period,
                amount,
            );
        }

        prune_sub_stakes(info, current);
        if !outcome.periods.is_empty() {
            tracing::info!(
                "Mint: {} received {} tokens for {} period(s)",
                staker.short(),
                outcome.reward,
                outcome.periods.len()
            );
        }
        Ok(outcome)
    }

    /// Withdraw free tokens back to the staker's wallet.
    ///
    /// # Errors
    /// - `InvalidAmount` for a zero amount.
    /// - `InsufficientFreeBalance` if `amount` exceeds the value above the
    ///   stricter of the current and next period's lock.
    pub fn withdraw(
        &self,
        state: &mut StakingState,
        tokens: &mut Balances,
        current: Period,
        staker: &Address,
        amount: Tokens,
    ) -> Result<(), TesseraError> {
        if amount == 0 {
            return Err(TesseraError::InvalidAmount(
                "withdrawal amount must be positive".to_string(),
            ));
        }
        let free = state
            .stakers
            .get(staker)
            .map(|i| i.free_balance(current))
            .unwrap_or(0);
        if amount > free {
            return Err(TesseraError::InsufficientFreeBalance(format!(
                "{} has {} free tokens, {} requested",
                staker, free, amount
            )));
        }
        let info = state
            .stakers
            .get_mut(staker)
            .ok_or_else(|| not_a_staker(staker))?;
        info.value -= amount;
        info.reward = info.reward.saturating_sub(amount);
        tokens.transfer(&state.escrow_account, staker, amount)?;
        tracing::info!("Withdraw: {} took {} tokens", staker.short(), amount);
        Ok(())
    }

    /// Enable or disable re-staking of minted rewards.
    ///
    /// # Errors
    /// Returns `TesseraError::ReStakeLocked` while a re-stake lock is active.
    pub fn set_restake(
        &self,
        state: &mut StakingState,
        current: Period,
        staker: &Address,
        enabled: bool,
    ) -> Result<(), TesseraError> {
        let info = state
            .stakers
            .get_mut(staker)
            .ok_or_else(|| not_a_staker(staker))?;
        if current < info.lock_restake_until {
            return Err(TesseraError::ReStakeLocked(format!(
                "re-stake is pinned until period {}",
                info.lock_restake_until
            )));
        }
        info.restake_disabled = !enabled;
        Ok(())
    }

    /// Turn re-staking on and pin it until `until_period`.
    pub fn lock_restake(
        &self,
        state: &mut StakingState,
        current: Period,
        staker: &Address,
        until_period: Period,
    ) -> Result<(), TesseraError> {
        if until_period <= current {
            return Err(TesseraError::InvalidDuration(format!(
                "re-stake lock period {} is not in the future",
                until_period
            )));
        }
        let info = state
            .stakers
            .get_mut(staker)
            .ok_or_else(|| not_a_staker(staker))?;
        info.restake_disabled = false;
        info.lock_restake_until = until_period;
        Ok(())
    }

    pub fn set_wind_down(
        &self,
        state: &mut StakingState,
        staker: &Address,
        enabled: bool,
    ) -> Result<(), TesseraError> {
        let info = state
            .stakers
            .get_mut(staker)
            .ok_or_else(|| not_a_staker(staker))?;
        info.wind_down = enabled;
        Ok(())
    }

    /// Take `penalty` from a staker on behalf of the Slashing Evaluator and
    /// pay `reward` of it to `rewardee`.
    ///
    /// The penalty comes out of free tokens first. Only when the remaining
    /// value no longer covers the current or next period's lock are
    /// sub-stakes cut, shortest-lived first, clamped at zero. The part of the
    /// penalty not paid out returns to the reward reserve.
    ///
    /// # Errors
    /// - `Unauthorized` for any caller other than the registered evaluator.
    /// - `NotFound` for an unknown staker.
    ///
    /// A zero penalty, or a staker with nothing left, changes nothing.
    #[allow(clippy::too_many_arguments)]
    pub fn slash_staker(
        &self,
        state: &mut StakingState,
        tokens: &mut Balances,
        current: Period,
        caller: &Address,
        staker: &Address,
        penalty: Tokens,
        rewardee: &Address,
        reward: Tokens,
    ) -> Result<SlashOutcome, TesseraError> {
        if *caller != state.adjudicator {
            return Err(TesseraError::Unauthorized(format!(
                "{} is not the slashing evaluator",
                caller
            )));
        }
        let info = state
            .stakers
            .get_mut(staker)
            .ok_or_else(|| not_a_staker(staker))?;

        let penalty = penalty.min(info.value);
        let reward = reward.min(penalty);
        if penalty == 0 {
            return Ok(SlashOutcome {
                staker: *staker,
                penalty: 0,
                rewardee: *rewardee,
                reward: 0,
            });
        }
        info.value -= penalty;

        for period in [current, current + 1] {
            let locked = info.locked_in(period);
            if info.value < locked {
                decrease_sub_stakes(
                    info,
                    &mut state.period_totals,
                    locked - info.value,
                    period,
                    current,
                );
            }
        }

        state.issuer.unmint(penalty - reward);
        tokens.transfer(&state.escrow_account, rewardee, reward)?;
        tracing::info!(
            "Slash: {} lost {} tokens, {} paid to {}",
            staker.short(),
            penalty,
            reward,
            rewardee.short()
        );
        Ok(SlashOutcome {
            staker: *staker,
            penalty,
            rewardee: *rewardee,
            reward,
        })
    }

    /// Credit tokens claimed in the Bid Escrow: `free` stays unlocked and
    /// `locked` is locked for `periods` periods from next period.
    ///
    /// # Errors
    /// - `Unauthorized` for any caller other than the registered Bid Escrow.
    /// - `InvalidAmount` for a zero total, `InvalidDuration` for zero periods.
    #[allow(clippy::too_many_arguments)]
    pub fn deposit_from_bid_escrow(
        &self,
        state: &mut StakingState,
        tokens: &mut Balances,
        current: Period,
        caller: &Address,
        staker: &Address,
        free: Tokens,
        locked: Tokens,
        periods: u32,
    ) -> Result<(), TesseraError> {
        if *caller != state.bid_escrow {
            return Err(TesseraError::Unauthorized(format!(
                "{} is not the bid escrow",
                caller
            )));
        }
        let total = free + locked;
        if total == 0 {
            return Err(TesseraError::InvalidAmount(
                "nothing to deposit".to_string(),
            ));
        }
        if periods == 0 {
            return Err(TesseraError::InvalidDuration(
                "claimed stake must be locked for at least one period".to_string(),
            ));
        }
        tokens.transfer(caller, &state.escrow_account, total)?;
        let info = state.stakers.entry(*staker).or_default();
        info.value += total;
        if locked > 0 {
            let sub = SubStake {
                first_period: current + 1,
                last_period: current + periods,
                locked,
            };
            push_sub_stake(info, &mut state.period_totals, sub, false);
        }
        Ok(())
    }

    /// Switch work measurement for `staker`, returning the current
    /// completed-work counter as the caller's baseline.
    pub fn set_work_measurement(
        &self,
        state: &mut StakingState,
        caller: &Address,
        staker: &Address,
        enabled: bool,
    ) -> Result<Tokens, TesseraError> {
        if *caller != state.bid_escrow {
            return Err(TesseraError::Unauthorized(format!(
                "{} is not the bid escrow",
                caller
            )));
        }
        let info = state
            .stakers
            .get_mut(staker)
            .ok_or_else(|| not_a_staker(staker))?;
        info.measure_work = enabled;
        Ok(info.completed_work)
    }

    /// Move `amount` unclaimed auction tokens into the reward reserve.
    pub fn burn_into_reserve(
        &self,
        state: &mut StakingState,
        tokens: &mut Balances,
        caller: &Address,
        amount: Tokens,
    ) -> Result<(), TesseraError> {
        if *caller != state.bid_escrow {
            return Err(TesseraError::Unauthorized(format!(
                "{} is not the bid escrow",
                caller
            )));
        }
        tokens.transfer(caller, &state.escrow_account, amount)?;
        state.issuer.unmint(amount);
        Ok(())
    }

    fn new_lock(&self, current: Period, amount: Tokens, periods: u32) -> Result<SubStake, TesseraError> {
        if periods < self.params.minimum_locked_periods {
            return Err(TesseraError::InvalidDuration(format!(
                "lock of {} periods is below the minimum of {}",
                periods, self.params.minimum_locked_periods
            )));
        }
        if amount < self.params.minimum_allowed_locked {
            return Err(TesseraError::InvalidAmount(format!(
                "{} is below the minimum lock of {}",
                amount, self.params.minimum_allowed_locked
            )));
        }
        let last_period = current
            .checked_add(periods)
            .ok_or_else(|| TesseraError::InvalidDuration("period overflow".to_string()))?;
        Ok(SubStake {
            first_period: current + 1,
            last_period,
            locked: amount,
        })
    }

    fn check_max_lock(&self, locked_next: Tokens, amount: Tokens) -> Result<(), TesseraError> {
        if locked_next.saturating_add(amount) > self.params.maximum_allowed_locked {
            return Err(TesseraError::InvalidAmount(format!(
                "lock of {} on top of {} exceeds the maximum of {}",
                amount, locked_next, self.params.maximum_allowed_locked
            )));
        }
        Ok(())
    }
}

impl Upgradeable for StakeLedger {
    type State = StakingState;

    fn target(&self) -> Address {
        self.address
    }

    fn schema_version(&self) -> u32 {
        self.version
    }

    fn verify_state(&self, state: &StakingState) -> Result<(), TesseraError> {
        if state.schema_version > self.version {
            return Err(TesseraError::IncompatibleTarget(format!(
                "ledger storage is schema {} but target {} writes schema {}",
                state.schema_version, self.address, self.version
            )));
        }
        if state.issuer.total_supply != self.params.total_supply {
            return Err(TesseraError::IncompatibleTarget(format!(
                "target {} expects total supply {} but storage holds {}",
                self.address, self.params.total_supply, state.issuer.total_supply
            )));
        }
        Ok(())
    }

    fn finish_upgrade(&self, state: &mut StakingState) {
        state.schema_version = self.version;
    }
}

fn not_a_staker(staker: &Address) -> TesseraError {
    TesseraError::NotFound(format!("{} is not a staker", staker))
}

fn add_to_totals(totals: &mut BTreeMap<Period, Tokens>, from: Period, to: Period, amount: Tokens) {
    if amount == 0 {
        return;
    }
    for period in from..=to {
        *totals.entry(period).or_insert(0) += amount;
    }
}

fn sub_from_totals(totals: &mut BTreeMap<Period, Tokens>, from: Period, to: Period, amount: Tokens) {
    if amount == 0 {
        return;
    }
    for period in from..=to {
        let emptied = match totals.get_mut(&period) {
            Some(total) => {
                *total = total.saturating_sub(amount);
                *total == 0
            }
            None => false,
        };
        if emptied {
            totals.remove(&period);
        }
    }
}

/// Append `sub` (or merge it into the latest sub-stake with the same range)
/// and account for it in the period totals.
fn push_sub_stake(
    info: &mut StakerInfo,
    totals: &mut BTreeMap<Period, Tokens>,
    sub: SubStake,
    merge: bool,
) {
    add_to_totals(totals, sub.first_period, sub.last_period, sub.locked);
    if merge {
        if let Some(latest) = info.sub_stakes.last_mut() {
            if latest.first_period == sub.first_period && latest.last_period == sub.last_period {
                latest.locked += sub.locked;
                return;
            }
        }
    }
    info.sub_stakes.push(sub);
}

/// Cut `excess` from the sub-stakes active in `period`, shortest-lived first.
fn decrease_sub_stakes(
    info: &mut StakerInfo,
    totals: &mut BTreeMap<Period, Tokens>,
    mut excess: Tokens,
    period: Period,
    current: Period,
) {
    let mut order: Vec<usize> = (0..info.sub_stakes.len())
        .filter(|i| info.sub_stakes[*i].covers(period))
        .collect();
    order.sort_by_key(|i| (info.sub_stakes[*i].last_period, *i));

    for index in order {
        if excess == 0 {
            break;
        }
        let sub = &mut info.sub_stakes[index];
        let cut = excess.min(sub.locked);
        sub.locked -= cut;
        sub_from_totals(totals, sub.first_period.max(current), sub.last_period, cut);
        excess -= cut;
    }
}

/// Drop trailing sub-stakes that are empty or ended before `current` and are
/// not needed to mint a pending period. Earlier entries stay where they are,
/// so a sub-stake index never changes once handed out.
fn prune_sub_stakes(info: &mut StakerInfo, current: Period) {
    while let Some(last) = info.sub_stakes.last() {
        let needed = last.locked > 0
            && (last.last_period >= current
                || info.pending_periods.iter().any(|p| last.covers(*p)));
        if needed {
            break;
        }
        info.sub_stakes.pop();
    }
}
