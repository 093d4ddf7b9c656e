// crates/tessera-escrow/src/policy.rs
//
// Policy Escrow: prepaid, time-bounded service payments from a sponsor to a
// set of staked nodes.
//
// A policy pays `rate` per node per period for [start_period, end_period).
// The ether sits in the escrow account and reaches a node only through its
// fee schedule: creating a policy adds `rate` to the node's fee rate from the
// start period and removes it at the end period, and the node accrues its
// fee rate for each period it actually served (minted). Periods a node did
// not serve are returned to the sponsor by `refund`, and periods that have
// not started yet are returned when the policy or an arrangement is revoked.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use tessera_core::clock::PeriodClock;
use tessera_core::crypto::Signature;
use tessera_core::error::TesseraError;
use tessera_core::identity::{Address, PolicyId};
use tessera_core::traits::{NodeActivity, Upgradeable};
use tessera_core::types::{Period, Timestamp, Wei};
use tessera_economics::token::Balances;

/// Storage schema written by this escrow version.
pub const POLICY_SCHEMA_VERSION: u32 = 1;

/// One node's share of a policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Arrangement {
    pub node: Address,
    /// First period not yet settled with the sponsor.
    pub last_refunded_period: Period,
    pub disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub id: PolicyId,
    pub sponsor: Address,
    /// Distinct owner, if any. `None` means the sponsor owns the policy.
    pub owner: Option<Address>,
    /// Payment per node per period.
    pub rate: Wei,
    pub start_timestamp: Timestamp,
    pub end_timestamp: Timestamp,
    pub start_period: Period,
    /// First period after the policy, exclusive.
    pub end_period: Period,
    pub disabled: bool,
    pub arrangements: Vec<Arrangement>,
}

impl Policy {
    /// Address allowed to revoke and refund.
    pub fn owner(&self) -> Address {
        self.owner.unwrap_or(self.sponsor)
    }

    /// Total value escrowed at creation.
    pub fn value(&self) -> Wei {
        self.rate
            * self.arrangements.len() as u128
            * (self.end_period - self.start_period) as u128
    }

    pub fn active_arrangements(&self) -> usize {
        self.arrangements.iter().filter(|a| !a.disabled).count()
    }

    pub fn arrangement(&self, node: &Address) -> Option<&Arrangement> {
        self.arrangements.iter().find(|a| a.node == *node)
    }
}

/// Fee bookkeeping for one registered node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFeeInfo {
    /// Accrued, withdrawable fee.
    pub fee: Wei,
    /// Fee earned per served period as of `previous_fee_period`.
    pub fee_rate: Wei,
    /// Last period whose fee has been settled. `None` for unregistered nodes.
    pub previous_fee_period: Option<Period>,
    /// Scheduled fee rate changes, applied when their period is settled.
    pub fee_delta: BTreeMap<Period, i128>,
    /// Lowest per-period rate the node accepts.
    pub min_fee_rate: Wei,
}

impl NodeFeeInfo {
    pub fn is_registered(&self) -> bool {
        self.previous_fee_period.is_some()
    }

    fn schedule(&mut self, period: Period, delta: i128) {
        let entry = self.fee_delta.entry(period).or_insert(0);
        *entry += delta;
        if *entry == 0 {
            self.fee_delta.remove(&period);
        }
    }
}

/// Persistent storage of the Policy Escrow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyState {
    pub schema_version: u32,
    /// Ether account holding every policy's escrowed value.
    pub escrow_account: Address,
    pub policies: BTreeMap<PolicyId, Policy>,
    pub nodes: BTreeMap<Address, NodeFeeInfo>,
}

impl PolicyState {
    pub fn new(escrow_account: Address) -> Self {
        Self {
            schema_version: 0,
            escrow_account,
            policies: BTreeMap::new(),
            nodes: BTreeMap::new(),
        }
    }

    pub fn policy(&self, id: &PolicyId) -> Option<&Policy> {
        self.policies.get(id)
    }

    pub fn node(&self, node: &Address) -> Option<&NodeFeeInfo> {
        self.nodes.get(node)
    }

    /// Withdrawable fee of `node`.
    pub fn fee_of(&self, node: &Address) -> Wei {
        self.nodes.get(node).map(|n| n.fee).unwrap_or(0)
    }
}

/// Result of a revocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokeOutcome {
    pub id: PolicyId,
    /// Nodes whose arrangements were revoked by this call.
    pub nodes: Vec<Address>,
    /// Ether returned to the sponsor.
    pub refund: Wei,
    /// Whether the whole policy is now disabled.
    pub policy_disabled: bool,
}

/// Downtime settlement of one arrangement.
struct Settlement {
    refund: Wei,
    next_unrefunded: Period,
}

/// Policy Escrow logic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyEscrow {
    pub address: Address,
    pub version: u32,
    pub clock: PeriodClock,
}

impl PolicyEscrow {
    pub fn new(address: Address, clock: PeriodClock) -> Self {
        Self {
            address,
            version: POLICY_SCHEMA_VERSION,
            clock,
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Message a policy owner signs to authorize `revoke_signed`. The zero
    /// node address stands for the whole policy.
    pub fn revoke_message(id: &PolicyId, node: &Address) -> Vec<u8> {
        let mut message = Vec::with_capacity(36);
        message.extend_from_slice(id.as_bytes());
        message.extend_from_slice(node.as_bytes());
        message
    }

    /// Register `node` so policies may include it. Fees are settled from
    /// the period after `period`. Registering twice is a no-op.
    pub fn register_node(&self, state: &mut PolicyState, node: &Address, period: Period) {
        let info = state.nodes.entry(*node).or_default();
        if info.previous_fee_period.is_none() {
            info.previous_fee_period = Some(period);
            tracing::debug!("Node {} registered for fees from period {}", node.short(), period + 1);
        }
    }

    /// Set the lowest per-period rate `node` accepts in new policies.
    pub fn set_min_fee_rate(
        &self,
        state: &mut PolicyState,
        node: &Address,
        rate: Wei,
    ) -> Result<(), TesseraError> {
        let info = state
            .nodes
            .get_mut(node)
            .filter(|n| n.is_registered())
            .ok_or_else(|| TesseraError::UnregisteredNode(node.to_string()))?;
        info.min_fee_rate = rate;
        Ok(())
    }

    /// Create a policy paying `value` across `nodes` until `end_timestamp`.
    ///
    /// # Arguments
    /// - `now`: current time; the policy starts in the period containing it.
    /// - `owner`: distinct owner, or the sponsor / zero address for none.
    ///
    /// # Errors
    /// `DuplicateId`, `NoPayment`, `PastDeadline`, `InvalidAmount` (no
    /// nodes), `DuplicateId` (repeated node), `UnregisteredNode`,
    /// `NonIntegralRate`, `RateBelowMinimum`, and `InsufficientBalance`, in
    /// that order of precedence.
    #[allow(clippy::too_many_arguments)]
    pub fn create_policy(
        &self,
        state: &mut PolicyState,
        ether: &mut Balances,
        now: Timestamp,
        sponsor: &Address,
        id: PolicyId,
        owner: Option<Address>,
        end_timestamp: Timestamp,
        nodes: &[Address],
        value: Wei,
    ) -> Result<Policy, TesseraError> {
        if state.policies.contains_key(&id) {
            return Err(TesseraError::DuplicateId(format!("policy {} already exists", id)));
        }
        if value == 0 {
            return Err(TesseraError::NoPayment);
        }
        if end_timestamp <= now {
            return Err(TesseraError::PastDeadline(format!(
                "end {} is not after now {}",
                end_timestamp, now
            )));
        }
        if nodes.is_empty() {
            return Err(TesseraError::InvalidAmount(
                "a policy needs at least one node".to_string(),
            ));
        }
        for (i, node) in nodes.iter().enumerate() {
            if nodes[..i].contains(node) {
                return Err(TesseraError::DuplicateId(format!(
                    "node {} listed twice",
                    node
                )));
            }
            if !state.nodes.get(node).is_some_and(|n| n.is_registered()) {
                return Err(TesseraError::UnregisteredNode(node.to_string()));
            }
        }

        let current = self.clock.period_at(now);
        let end_period = self.clock.period_at(end_timestamp) + 1;
        let periods = (end_period - current) as u128;
        let slots = nodes.len() as u128 * periods;
        let rate = value / slots;
        if rate == 0 || rate * slots != value {
            return Err(TesseraError::NonIntegralRate(format!(
                "{} does not split evenly over {} node-periods",
                value, slots
            )));
        }
        for node in nodes {
            let min = state.nodes.get(node).map(|n| n.min_fee_rate).unwrap_or(0);
            if rate < min {
                return Err(TesseraError::RateBelowMinimum(format!(
                    "rate {} is below {}'s minimum of {}",
                    rate, node, min
                )));
            }
        }

        ether.transfer(sponsor, &state.escrow_account, value)?;

        for node in nodes {
            if let Some(info) = state.nodes.get_mut(node) {
                let settled = info.previous_fee_period.unwrap_or(0);
                info.schedule(current.max(settled + 1), rate as i128);
                info.schedule(end_period, -(rate as i128));
            }
        }

        let owner = owner.filter(|o| !o.is_zero() && o != sponsor);
        let policy = Policy {
            id,
            sponsor: *sponsor,
            owner,
            rate,
            start_timestamp: now,
            end_timestamp,
            start_period: current,
            end_period,
            disabled: false,
            arrangements: nodes
                .iter()
                .map(|node| Arrangement {
                    node: *node,
                    last_refunded_period: current,
                    disabled: false,
                })
                .collect(),
        };
        state.policies.insert(id, policy.clone());

        tracing::info!(
            "Policy {} created by {}: {} nodes at {} wei per period until period {}",
            id,
            sponsor.short(),
            nodes.len(),
            rate,
            end_period
        );
        Ok(policy)
    }

    /// Revoke every active arrangement of a policy.
    ///
    /// # Errors
    /// `NotFound`, `Unauthorized` (caller is not the owner), `AlreadyRevoked`.
    pub fn revoke_policy(
        &self,
        state: &mut PolicyState,
        ether: &mut Balances,
        activity: &dyn NodeActivity,
        now: Timestamp,
        caller: &Address,
        id: &PolicyId,
    ) -> Result<RevokeOutcome, TesseraError> {
        self.revoke(state, ether, activity, now, caller, id, None)
    }

    /// Revoke a single node's arrangement.
    ///
    /// # Errors
    /// `NotFound` (policy or node), `Unauthorized`, `AlreadyRevoked`.
    #[allow(clippy::too_many_arguments)]
    pub fn revoke_arrangement(
        &self,
        state: &mut PolicyState,
        ether: &mut Balances,
        activity: &dyn NodeActivity,
        now: Timestamp,
        caller: &Address,
        id: &PolicyId,
        node: &Address,
    ) -> Result<RevokeOutcome, TesseraError> {
        self.revoke(state, ether, activity, now, caller, id, Some(node))
    }

    /// Revoke on the owner's behalf using their signature over
    /// `revoke_message(id, node)`. Anyone may relay it.
    ///
    /// # Errors
    /// `NotFound`, `BadSignature`, then as for the direct revocations.
    #[allow(clippy::too_many_arguments)]
    pub fn revoke_signed(
        &self,
        state: &mut PolicyState,
        ether: &mut Balances,
        activity: &dyn NodeActivity,
        now: Timestamp,
        relayer: &Address,
        id: &PolicyId,
        node: &Address,
        signature: &Signature,
    ) -> Result<RevokeOutcome, TesseraError> {
        let owner = state
            .policies
            .get(id)
            .map(|p| p.owner())
            .ok_or_else(|| unknown_policy(id))?;
        let message = Self::revoke_message(id, node);
        let valid = signature.signer() == owner && matches!(signature.verify(&message), Ok(true));
        if !valid {
            return Err(TesseraError::BadSignature(format!(
                "revocation of {} relayed by {} is not signed by the owner",
                id, relayer
            )));
        }
        let target = if node.is_zero() { None } else { Some(node) };
        self.revoke(state, ether, activity, now, &owner, id, target)
    }

    /// Return the value of unserved periods to the sponsor without revoking.
    /// Arrangements settled through their last period become inactive.
    ///
    /// # Errors
    /// `NotFound` or `Unauthorized`.
    pub fn refund(
        &self,
        state: &mut PolicyState,
        ether: &mut Balances,
        activity: &dyn NodeActivity,
        now: Timestamp,
        caller: &Address,
        id: &PolicyId,
    ) -> Result<Wei, TesseraError> {
        let current = self.clock.period_at(now);
        let policy = state.policies.get_mut(id).ok_or_else(|| unknown_policy(id))?;
        if *caller != policy.owner() {
            return Err(TesseraError::Unauthorized(format!(
                "{} does not own policy {}",
                caller, id
            )));
        }
        if policy.disabled {
            return Ok(0);
        }

        let mut total: Wei = 0;
        let (rate, start, end) = (policy.rate, policy.start_period, policy.end_period);
        for arrangement in policy.arrangements.iter_mut().filter(|a| !a.disabled) {
            let settlement = settle_downtime(rate, start, end, arrangement, activity, current);
            total += settlement.refund;
            arrangement.last_refunded_period = settlement.next_unrefunded;
            if arrangement.last_refunded_period >= end {
                arrangement.disabled = true;
            }
        }
        if policy.active_arrangements() == 0 {
            policy.disabled = true;
        }
        let sponsor = policy.sponsor;

        if total > 0 {
            ether.transfer(&state.escrow_account, &sponsor, total)?;
            tracing::info!("Policy {} refunded {} wei to {}", id, total, sponsor.short());
        }
        Ok(total)
    }

    /// Ether the owner would get back from `refund` now, for one node or,
    /// with `None`, for every active arrangement.
    pub fn calculate_refund_value(
        &self,
        state: &PolicyState,
        activity: &dyn NodeActivity,
        now: Timestamp,
        id: &PolicyId,
        node: Option<&Address>,
    ) -> Result<Wei, TesseraError> {
        let current = self.clock.period_at(now);
        let policy = state.policies.get(id).ok_or_else(|| unknown_policy(id))?;
        if policy.disabled {
            return Ok(0);
        }
        let mut total = 0;
        for arrangement in policy
            .arrangements
            .iter()
            .filter(|a| !a.disabled && node.map_or(true, |n| a.node == *n))
        {
            total += settle_downtime(
                policy.rate,
                policy.start_period,
                policy.end_period,
                arrangement,
                activity,
                current,
            )
            .refund;
        }
        Ok(total)
    }

    /// Settle `node`'s fee through `period`: apply scheduled rate changes
    /// and accrue one period at the resulting rate. Called for every period
    /// the node is paid a staking reward for.
    pub fn update_fee(&self, state: &mut PolicyState, node: &Address, period: Period) -> Wei {
        let Some(info) = state.nodes.get_mut(node) else {
            return 0;
        };
        let Some(previous) = info.previous_fee_period else {
            return 0;
        };
        if period <= previous {
            return 0;
        }
        let due: Vec<Period> = info
            .fee_delta
            .range(previous + 1..=period)
            .map(|(p, _)| *p)
            .collect();
        for p in due {
            if let Some(delta) = info.fee_delta.remove(&p) {
                let rate = info.fee_rate as i128 + delta;
                info.fee_rate = rate.max(0) as Wei;
            }
        }
        info.previous_fee_period = Some(period);
        info.fee += info.fee_rate;
        info.fee_rate
    }

    /// Pay out `node`'s accrued fee. Returns the amount paid.
    pub fn withdraw(
        &self,
        state: &mut PolicyState,
        ether: &mut Balances,
        node: &Address,
    ) -> Result<Wei, TesseraError> {
        let amount = state.fee_of(node);
        if amount == 0 {
            return Ok(0);
        }
        ether.transfer(&state.escrow_account, node, amount)?;
        if let Some(info) = state.nodes.get_mut(node) {
            info.fee = 0;
        }
        tracing::info!("Node {} withdrew {} wei in fees", node.short(), amount);
        Ok(amount)
    }

    #[allow(clippy::too_many_arguments)]
    fn revoke(
        &self,
        state: &mut PolicyState,
        ether: &mut Balances,
        activity: &dyn NodeActivity,
        now: Timestamp,
        caller: &Address,
        id: &PolicyId,
        node: Option<&Address>,
    ) -> Result<RevokeOutcome, TesseraError> {
        let current = self.clock.period_at(now);
        let policy = state.policies.get_mut(id).ok_or_else(|| unknown_policy(id))?;
        if *caller != policy.owner() {
            return Err(TesseraError::Unauthorized(format!(
                "{} does not own policy {}",
                caller, id
            )));
        }
        if policy.disabled {
            return Err(TesseraError::AlreadyRevoked(format!("policy {}", id)));
        }
        if let Some(node) = node {
            let arrangement = policy.arrangement(node).ok_or_else(|| {
                TesseraError::NotFound(format!("policy {} has no arrangement with {}", id, node))
            })?;
            if arrangement.disabled {
                return Err(TesseraError::AlreadyRevoked(format!(
                    "arrangement of {} in policy {}",
                    node, id
                )));
            }
        }

        let (rate, start, end) = (policy.rate, policy.start_period, policy.end_period);
        let mut refund: Wei = 0;
        let mut revoked = Vec::new();
        for arrangement in policy
            .arrangements
            .iter_mut()
            .filter(|a| !a.disabled && node.map_or(true, |n| a.node == *n))
        {
            let settlement = settle_downtime(rate, start, end, arrangement, activity, current);
            refund += settlement.refund;
            let first_unstarted = settlement.next_unrefunded;
            if first_unstarted < end {
                refund += rate * (end - first_unstarted) as u128;
                if let Some(info) = state.nodes.get_mut(&arrangement.node) {
                    let settled = info.previous_fee_period.unwrap_or(0);
                    info.schedule(first_unstarted.max(settled + 1), -(rate as i128));
                    info.schedule(end, rate as i128);
                }
            }
            arrangement.last_refunded_period = end;
            arrangement.disabled = true;
            revoked.push(arrangement.node);
        }
        if policy.active_arrangements() == 0 {
            policy.disabled = true;
        }
        let policy_disabled = policy.disabled;
        let sponsor = policy.sponsor;

        ether.transfer(&state.escrow_account, &sponsor, refund)?;
        tracing::info!(
            "Policy {} revoked for {} node(s), {} wei returned to {}",
            id,
            revoked.len(),
            refund,
            sponsor.short()
        );
        Ok(RevokeOutcome {
            id: *id,
            nodes: revoked,
            refund,
            policy_disabled,
        })
    }
}

impl Upgradeable for PolicyEscrow {
    type State = PolicyState;

    fn target(&self) -> Address {
        self.address
    }

    fn schema_version(&self) -> u32 {
        self.version
    }

    fn verify_state(&self, state: &PolicyState) -> Result<(), TesseraError> {
        if state.schema_version > self.version {
            return Err(TesseraError::IncompatibleTarget(format!(
                "policy storage is schema {} but target {} writes schema {}",
                state.schema_version, self.address, self.version
            )));
        }
        Ok(())
    }

    fn finish_upgrade(&self, state: &mut PolicyState) {
        state.schema_version = self.version;
    }
}

fn unknown_policy(id: &PolicyId) -> TesseraError {
    TesseraError::NotFound(format!("policy {}", id))
}

/// Value of the started-but-unserved periods of `arrangement` in
/// `[max(start, last_refunded), min(current, end - 1)]`.
///
/// A period is unserved if it falls in a recorded downtime or after the
/// node's last confirmed period.
fn settle_downtime(
    rate: Wei,
    start: Period,
    end: Period,
    arrangement: &Arrangement,
    activity: &dyn NodeActivity,
    current: Period,
) -> Settlement {
    let from = start.max(arrangement.last_refunded_period);
    let to = current.min(end.saturating_sub(1));
    if end == 0 || from > to {
        return Settlement {
            refund: 0,
            next_unrefunded: arrangement.last_refunded_period.max(from),
        };
    }

    let mut missed: u32 = activity
        .past_downtime(&arrangement.node)
        .iter()
        .map(|d| d.overlap(from, to))
        .sum();
    missed += match activity.last_active_period(&arrangement.node) {
        Some(last) if last >= to => 0,
        Some(last) => to - from.max(last + 1) + 1,
        None => to - from + 1,
    };

    Settlement {
        refund: rate * missed as u128,
        next_unrefunded: to + 1,
    }
}
