// crates/tessera-node/src/network.rs
//
// The Network facade: one serialized state machine wiring the Stake Ledger,
// Slashing Evaluator, Policy Escrow, Bid Escrow, the three upgrade
// dispatchers, and the governor.
//
// Every mutating call runs inside `transact`, which snapshots the whole
// state, applies the operation, and either appends the emitted events or
// restores the snapshot. Time is read once per call from the injected
// `TimeSource`; components never see a caller-supplied timestamp.
//
// Component accounts:
//   staking dispatcher      holds staked tokens and the reward reserve
//   policy dispatcher       holds policy ether
//   adjudicator dispatcher  the only caller allowed to slash
//   bid escrow              holds the auction pool and bid ether
//   governor                owns the dispatchers and funds the reserve
//   distributor             holds the initial circulating supply

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use tessera_core::clock::PeriodClock;
use tessera_core::crypto::Signature;
use tessera_core::error::TesseraError;
use tessera_core::identity::{Address, PolicyId};
use tessera_core::traits::{EvidenceOracle, NodeActivity, TimeSource, Upgradeable};
use tessera_core::types::{Evidence, Period, Timestamp, Tokens, Wei};
use tessera_economics::slashing::{Adjudicator, AdjudicatorState};
use tessera_economics::staking::{
    MintOutcome, SlashOutcome, StakeLedger, StakingState, SubStake,
};
use tessera_economics::token::Balances;
use tessera_escrow::policy::{Policy, PolicyEscrow, PolicyState, RevokeOutcome};
use tessera_escrow::worklock::{
    BidEscrow, BidEscrowState, BidPhase, ClaimOutcome, RefundOutcome,
};
use tessera_governance::dispatcher::Dispatcher;
use tessera_governance::multisig::{GovernanceCall, MultiSig};

use crate::config::NetworkConfig;
use crate::events::{EventRecord, NetworkEvent};

/// Component behind an upgrade dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Component {
    Staking,
    Policy,
    Adjudicator,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Staking => write!(f, "staking"),
            Component::Policy => write!(f, "policy"),
            Component::Adjudicator => write!(f, "adjudicator"),
        }
    }
}

impl FromStr for Component {
    type Err = TesseraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "staking" => Ok(Component::Staking),
            "policy" => Ok(Component::Policy),
            "adjudicator" => Ok(Component::Adjudicator),
            other => Err(TesseraError::NotFound(format!("unknown component {:?}", other))),
        }
    }
}

/// Logic versions available as upgrade targets, keyed by their address.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployedLogic {
    pub staking: BTreeMap<Address, StakeLedger>,
    pub policy: BTreeMap<Address, PolicyEscrow>,
    pub adjudicator: BTreeMap<Address, Adjudicator>,
}

/// Everything that persists between operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkState {
    pub clock: PeriodClock,
    pub tokens: Balances,
    pub ether: Balances,
    pub staking: Dispatcher<StakeLedger>,
    pub policy: Dispatcher<PolicyEscrow>,
    pub adjudicator: Dispatcher<Adjudicator>,
    pub bid_escrow: BidEscrow,
    pub bids: BidEscrowState,
    pub governor: MultiSig,
    pub distributor: Address,
    pub deployed: DeployedLogic,
    pub events: Vec<EventRecord>,
}

impl NetworkState {
    /// Write the state as pretty JSON.
    pub fn save(&self, path: &str) -> Result<(), TesseraError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .map_err(|e| TesseraError::Serialization(format!("cannot write {}: {}", path, e)))
    }

    /// Read state written by `save`.
    pub fn load(path: &str) -> Result<Self, TesseraError> {
        let json = fs::read_to_string(path)
            .map_err(|e| TesseraError::Serialization(format!("cannot read {}: {}", path, e)))?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Evidence oracle returning the same verdict for everything.
#[derive(Debug, Clone, Copy)]
pub struct FixedVerdict(pub bool);

impl EvidenceOracle for FixedVerdict {
    fn proves_misbehavior(&self, _evidence: &Evidence) -> Result<bool, TesseraError> {
        Ok(self.0)
    }
}

/// The instant an operation runs at.
#[derive(Debug, Clone, Copy)]
struct Moment {
    now: Timestamp,
    current: Period,
}

/// Run `op` against `state`, committing its events on success and restoring
/// the pre-operation snapshot on failure.
fn transact<T, F>(state: &mut NetworkState, at: Moment, op: F) -> Result<T, TesseraError>
where
    F: FnOnce(&mut NetworkState) -> Result<(T, Vec<NetworkEvent>), TesseraError>,
{
    let snapshot = state.clone();
    match op(state) {
        Ok((output, events)) => {
            state.events.extend(events.into_iter().map(|event| EventRecord {
                timestamp: at.now,
                period: at.current,
                event,
            }));
            Ok(output)
        }
        Err(e) => {
            *state = snapshot;
            tracing::debug!("Operation rolled back in period {}: {}", at.current, e);
            Err(e)
        }
    }
}

/// Accrue policy fees for every period a mint settled.
fn settle_fees(state: &mut NetworkState, minted: &MintOutcome) -> Wei {
    let (escrow, policies) = state.policy.split_mut();
    minted
        .periods
        .iter()
        .map(|period| escrow.update_fee(policies, &minted.staker, *period))
        .sum()
}

fn minted_event(minted: &MintOutcome, fees: Wei) -> Option<NetworkEvent> {
    if minted.periods.is_empty() {
        return None;
    }
    Some(NetworkEvent::Minted {
        staker: minted.staker,
        periods: minted.periods.clone(),
        reward: minted.reward,
        fees,
    })
}

fn register_fee_node(state: &mut NetworkState, node: &Address, current: Period) {
    let (escrow, policies) = state.policy.split_mut();
    escrow.register_node(policies, node, current.saturating_sub(1));
}

/// Apply an upgrade-family call to one dispatcher on behalf of `caller`.
fn route_dispatcher_call<L: Upgradeable>(
    dispatcher: &mut Dispatcher<L>,
    deployed: &BTreeMap<Address, L>,
    caller: &Address,
    call: &GovernanceCall,
) -> Result<Vec<NetworkEvent>, TesseraError> {
    match call {
        GovernanceCall::Upgrade {
            target,
            secret,
            next_secret_hash,
        } => {
            let logic = deployed.get(target).cloned().ok_or_else(|| {
                TesseraError::NotFound(format!("no logic deployed at {}", target))
            })?;
            dispatcher.upgrade(caller, logic, secret, *next_secret_hash)?;
            Ok(vec![NetworkEvent::Upgraded {
                dispatcher: dispatcher.address,
                target: *target,
            }])
        }
        GovernanceCall::Rollback {
            secret,
            next_secret_hash,
        } => {
            dispatcher.rollback(caller, secret, *next_secret_hash)?;
            Ok(vec![NetworkEvent::RolledBack {
                dispatcher: dispatcher.address,
                target: dispatcher.target().target(),
            }])
        }
        GovernanceCall::TransferOwnership { new_owner } => {
            dispatcher.transfer_ownership(caller, *new_owner)?;
            Ok(vec![NetworkEvent::OwnershipTransferred {
                dispatcher: dispatcher.address,
                new_owner: *new_owner,
            }])
        }
        other => Err(TesseraError::InvalidState(format!(
            "{} cannot be sent to dispatcher {}",
            other.name(),
            dispatcher.address
        ))),
    }
}

/// Deliver `call` to the component at `destination` as `caller`.
fn route_call(
    state: &mut NetworkState,
    caller: &Address,
    destination: &Address,
    call: &GovernanceCall,
) -> Result<Vec<NetworkEvent>, TesseraError> {
    if *destination == state.staking.address {
        if let GovernanceCall::InitializeStaking { reward_supply } = call {
            if *caller != state.staking.owner() {
                return Err(TesseraError::Unauthorized(format!(
                    "{} does not own the staking dispatcher",
                    caller
                )));
            }
            let (ledger, staking) = state.staking.split_mut();
            ledger.initialize(staking, &mut state.tokens, caller, *reward_supply)?;
            return Ok(vec![NetworkEvent::StakingInitialized {
                reward_supply: *reward_supply,
            }]);
        }
        return route_dispatcher_call(&mut state.staking, &state.deployed.staking, caller, call);
    }
    if *destination == state.policy.address {
        return route_dispatcher_call(&mut state.policy, &state.deployed.policy, caller, call);
    }
    if *destination == state.adjudicator.address {
        return route_dispatcher_call(
            &mut state.adjudicator,
            &state.deployed.adjudicator,
            caller,
            call,
        );
    }
    Err(TesseraError::NotFound(format!(
        "no component at {}",
        destination
    )))
}

fn deploy<L: Upgradeable>(registry: &mut BTreeMap<Address, L>, logic: L) -> Result<Address, TesseraError> {
    let address = logic.target();
    if registry.contains_key(&address) {
        return Err(TesseraError::DuplicateId(format!(
            "logic already deployed at {}",
            address
        )));
    }
    registry.insert(address, logic);
    Ok(address)
}

/// The Tessera staking network.
pub struct Network {
    state: NetworkState,
    time: Box<dyn TimeSource>,
    oracle: Box<dyn EvidenceOracle>,
}

impl Network {
    /// Deploy a fresh network from `config`.
    ///
    /// The governor receives the reward supply and the distributor the
    /// initial supply; staking stays closed until the governor executes
    /// `InitializeStaking`.
    ///
    /// # Errors
    /// Returns `TesseraError::Config` for an inconsistent configuration.
    pub fn new(
        config: &NetworkConfig,
        time: Box<dyn TimeSource>,
        oracle: Box<dyn EvidenceOracle>,
    ) -> Result<Self, TesseraError> {
        config.validate()?;
        let params = config.economics.to_params()?;
        let clock = PeriodClock::new(config.genesis, params.hours_per_period);

        let staking_address = Address::from_label("tessera/staking");
        let policy_address = Address::from_label("tessera/policy");
        let adjudicator_address = Address::from_label("tessera/adjudicator");
        let bid_escrow_address = Address::from_label("tessera/bid-escrow");
        let governor_address = Address::from_label("tessera/governor");
        let distributor = Address::from_label("tessera/distributor");

        let governor = MultiSig::new(
            governor_address,
            config.governance.owners.clone(),
            config.governance.required,
        )?;

        let mut tokens = Balances::new("token");
        tokens.issue(&governor_address, params.reward_supply());
        tokens.issue(&distributor, params.initial_supply);

        let ledger = StakeLedger::new(Address::from_label("tessera/stake-ledger/v1"), params.clone());
        let escrow = PolicyEscrow::new(Address::from_label("tessera/policy-escrow/v1"), clock);
        let adjudicator = Adjudicator::new(
            Address::from_label("tessera/adjudicator/v1"),
            config.slashing.to_params(),
        );

        let mut deployed = DeployedLogic::default();
        deploy(&mut deployed.staking, ledger.clone())?;
        deploy(&mut deployed.policy, escrow.clone())?;
        deploy(&mut deployed.adjudicator, adjudicator.clone())?;

        let staking = Dispatcher::new(
            staking_address,
            governor_address,
            ledger,
            StakingState::new(
                staking_address,
                params.total_supply,
                adjudicator_address,
                bid_escrow_address,
            ),
            config.governance.staking_commitment()?,
        )?;
        let policy = Dispatcher::new(
            policy_address,
            governor_address,
            escrow,
            PolicyState::new(policy_address),
            config.governance.policy_commitment()?,
        )?;
        let adjudicator = Dispatcher::new(
            adjudicator_address,
            governor_address,
            adjudicator,
            AdjudicatorState::new(),
            config.governance.adjudicator_commitment()?,
        )?;

        let state = NetworkState {
            clock,
            tokens,
            ether: Balances::new("wei"),
            staking,
            policy,
            adjudicator,
            bid_escrow: BidEscrow::new(bid_escrow_address, config.bid_escrow.to_params()),
            bids: BidEscrowState::new(),
            governor,
            distributor,
            deployed,
            events: Vec::new(),
        };
        tracing::info!(
            "Network deployed: genesis {}, {}h periods, {}-of-{} governor",
            config.genesis,
            params.hours_per_period,
            config.governance.required,
            config.governance.owners.len()
        );
        Ok(Self::from_state(state, time, oracle))
    }

    /// Resume a network from persisted state.
    pub fn from_state(
        state: NetworkState,
        time: Box<dyn TimeSource>,
        oracle: Box<dyn EvidenceOracle>,
    ) -> Self {
        Self {
            state,
            time,
            oracle,
        }
    }

    pub fn state(&self) -> &NetworkState {
        &self.state
    }

    pub fn into_state(self) -> NetworkState {
        self.state
    }

    pub fn events(&self) -> &[EventRecord] {
        &self.state.events
    }

    pub fn now(&self) -> Timestamp {
        self.time.now()
    }

    pub fn current_period(&self) -> Period {
        self.state.clock.period_at(self.time.now())
    }

    fn moment(&self) -> Moment {
        let now = self.time.now();
        Moment {
            now,
            current: self.state.clock.period_at(now),
        }
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    pub fn staking(&self) -> &StakingState {
        self.state.staking.storage()
    }

    pub fn policies(&self) -> &PolicyState {
        self.state.policy.storage()
    }

    pub fn adjudications(&self) -> &AdjudicatorState {
        self.state.adjudicator.storage()
    }

    pub fn bids(&self) -> &BidEscrowState {
        &self.state.bids
    }

    pub fn governor(&self) -> &MultiSig {
        &self.state.governor
    }

    pub fn token_balance(&self, account: &Address) -> Tokens {
        self.state.tokens.balance_of(account)
    }

    pub fn ether_balance(&self, account: &Address) -> Wei {
        self.state.ether.balance_of(account)
    }

    pub fn bid_phase(&self) -> BidPhase {
        self.state.bid_escrow.phase(self.time.now())
    }

    /// Address of the dispatcher fronting `component`.
    pub fn component_address(&self, component: Component) -> Address {
        match component {
            Component::Staking => self.state.staking.address,
            Component::Policy => self.state.policy.address,
            Component::Adjudicator => self.state.adjudicator.address,
        }
    }

    /// Refund owed for a policy (or one of its arrangements) right now.
    pub fn calculate_refund_value(&self, id: &PolicyId, node: Option<&Address>) -> Result<Wei, TesseraError> {
        let (escrow, policies) = (self.state.policy.target(), self.state.policy.storage());
        let view = self.state.staking.storage().view();
        escrow.calculate_refund_value(policies, &view, self.time.now(), id, node)
    }

    /// Work `bidder` still has to complete to release their whole deposit.
    pub fn remaining_work(&self, bidder: &Address) -> Tokens {
        self.state
            .bid_escrow
            .remaining_work(&self.state.bids, self.state.staking.storage(), bidder)
    }

    // -----------------------------------------------------------------------
    // Funding
    // -----------------------------------------------------------------------

    /// Hand out circulating tokens from the distributor.
    pub fn fund_tokens(&mut self, to: &Address, amount: Tokens) -> Result<(), TesseraError> {
        let at = self.moment();
        transact(&mut self.state, at, |s| {
            if amount == 0 {
                return Err(TesseraError::InvalidAmount("nothing to fund".to_string()));
            }
            let distributor = s.distributor;
            s.tokens.transfer(&distributor, to, amount)?;
            tracing::info!("Funded {} with {} tokens", to.short(), amount);
            Ok((
                (),
                vec![NetworkEvent::Funded {
                    account: *to,
                    amount,
                    asset: "token".to_string(),
                }],
            ))
        })
    }

    /// Credit ether, which enters from outside the system.
    pub fn fund_ether(&mut self, to: &Address, amount: Wei) -> Result<(), TesseraError> {
        let at = self.moment();
        transact(&mut self.state, at, |s| {
            if amount == 0 {
                return Err(TesseraError::InvalidAmount("nothing to fund".to_string()));
            }
            s.ether.issue(to, amount);
            tracing::info!("Funded {} with {} wei", to.short(), amount);
            Ok((
                (),
                vec![NetworkEvent::Funded {
                    account: *to,
                    amount,
                    asset: "wei".to_string(),
                }],
            ))
        })
    }

    // -----------------------------------------------------------------------
    // Stake Ledger
    // -----------------------------------------------------------------------

    /// Deposit and lock `amount` for `periods` periods from next period.
    pub fn deposit(&mut self, staker: &Address, amount: Tokens, periods: u32) -> Result<SubStake, TesseraError> {
        let at = self.moment();
        transact(&mut self.state, at, |s| {
            let (ledger, staking) = s.staking.split_mut();
            let sub = ledger.deposit(staking, &mut s.tokens, at.current, staker, amount, periods)?;
            register_fee_node(s, staker, at.current);
            Ok((
                sub,
                vec![NetworkEvent::Deposited {
                    staker: *staker,
                    amount,
                    first_period: sub.first_period,
                    last_period: sub.last_period,
                }],
            ))
        })
    }

    pub fn lock(&mut self, staker: &Address, amount: Tokens, periods: u32) -> Result<SubStake, TesseraError> {
        let at = self.moment();
        transact(&mut self.state, at, |s| {
            let (ledger, staking) = s.staking.split_mut();
            let sub = ledger.lock(staking, at.current, staker, amount, periods)?;
            Ok((
                sub,
                vec![NetworkEvent::Locked {
                    staker: *staker,
                    amount,
                    first_period: sub.first_period,
                    last_period: sub.last_period,
                }],
            ))
        })
    }

    pub fn divide_stake(
        &mut self,
        staker: &Address,
        index: usize,
        amount: Tokens,
        extra_periods: u32,
    ) -> Result<SubStake, TesseraError> {
        let at = self.moment();
        transact(&mut self.state, at, |s| {
            let (ledger, staking) = s.staking.split_mut();
            let sub = ledger.divide_stake(staking, at.current, staker, index, amount, extra_periods)?;
            Ok((
                sub,
                vec![NetworkEvent::StakeDivided {
                    staker: *staker,
                    index,
                    amount,
                    last_period: sub.last_period,
                }],
            ))
        })
    }

    pub fn prolong_stake(&mut self, staker: &Address, index: usize, extra_periods: u32) -> Result<SubStake, TesseraError> {
        let at = self.moment();
        transact(&mut self.state, at, |s| {
            let (ledger, staking) = s.staking.split_mut();
            let sub = ledger.prolong_stake(staking, at.current, staker, index, extra_periods)?;
            Ok((
                sub,
                vec![NetworkEvent::StakeProlonged {
                    staker: *staker,
                    index,
                    last_period: sub.last_period,
                }],
            ))
        })
    }

    pub fn bond_worker(&mut self, staker: &Address, worker: &Address) -> Result<(), TesseraError> {
        let at = self.moment();
        transact(&mut self.state, at, |s| {
            let (ledger, staking) = s.staking.split_mut();
            ledger.bond_worker(staking, at.current, staker, worker)?;
            Ok((
                (),
                vec![NetworkEvent::WorkerBonded {
                    staker: *staker,
                    worker: *worker,
                }],
            ))
        })
    }

    /// Confirm activity for next period, as a bonded worker or the staker.
    /// Returns the committed period, or `None` if it was already committed.
    pub fn confirm_activity(&mut self, caller: &Address) -> Result<Option<Period>, TesseraError> {
        let at = self.moment();
        transact(&mut self.state, at, |s| {
            let (ledger, staking) = s.staking.split_mut();
            let outcome = ledger.confirm_activity(staking, at.current, caller)?;
            let fees = settle_fees(s, &outcome.minted);
            let mut events: Vec<NetworkEvent> = minted_event(&outcome.minted, fees).into_iter().collect();
            if let Some(period) = outcome.committed_period {
                events.push(NetworkEvent::ActivityConfirmed {
                    staker: outcome.staker,
                    period,
                });
            }
            Ok((outcome.committed_period, events))
        })
    }

    /// Mint rewards for every confirmed period that has elapsed.
    pub fn mint(&mut self, staker: &Address) -> Result<MintOutcome, TesseraError> {
        let at = self.moment();
        transact(&mut self.state, at, |s| {
            let (ledger, staking) = s.staking.split_mut();
            let minted = ledger.mint(staking, at.current, staker)?;
            let fees = settle_fees(s, &minted);
            let events = minted_event(&minted, fees).into_iter().collect();
            Ok((minted, events))
        })
    }

    pub fn withdraw(&mut self, staker: &Address, amount: Tokens) -> Result<(), TesseraError> {
        let at = self.moment();
        transact(&mut self.state, at, |s| {
            let (ledger, staking) = s.staking.split_mut();
            ledger.withdraw(staking, &mut s.tokens, at.current, staker, amount)?;
            Ok((
                (),
                vec![NetworkEvent::Withdrawn {
                    staker: *staker,
                    amount,
                }],
            ))
        })
    }

    pub fn set_restake(&mut self, staker: &Address, enabled: bool) -> Result<(), TesseraError> {
        let at = self.moment();
        transact(&mut self.state, at, |s| {
            let (ledger, staking) = s.staking.split_mut();
            ledger.set_restake(staking, at.current, staker, enabled)?;
            Ok((
                (),
                vec![NetworkEvent::RestakeSet {
                    staker: *staker,
                    enabled,
                }],
            ))
        })
    }

    pub fn lock_restake(&mut self, staker: &Address, until_period: Period) -> Result<(), TesseraError> {
        let at = self.moment();
        transact(&mut self.state, at, |s| {
            let (ledger, staking) = s.staking.split_mut();
            ledger.lock_restake(staking, at.current, staker, until_period)?;
            Ok((
                (),
                vec![NetworkEvent::RestakeLocked {
                    staker: *staker,
                    until_period,
                }],
            ))
        })
    }

    pub fn set_wind_down(&mut self, staker: &Address, enabled: bool) -> Result<(), TesseraError> {
        let at = self.moment();
        transact(&mut self.state, at, |s| {
            let (ledger, staking) = s.staking.split_mut();
            ledger.set_wind_down(staking, staker, enabled)?;
            Ok((
                (),
                vec![NetworkEvent::WindDownSet {
                    staker: *staker,
                    enabled,
                }],
            ))
        })
    }

    // -----------------------------------------------------------------------
    // Slashing Evaluator
    // -----------------------------------------------------------------------

    /// Judge `evidence` and, if it holds, slash the offending staker and
    /// reward `investigator`.
    pub fn evaluate(&mut self, investigator: &Address, evidence: &Evidence) -> Result<SlashOutcome, TesseraError> {
        let at = self.moment();
        let oracle = &*self.oracle;
        transact(&mut self.state, at, |s| {
            let order = {
                let (adjudicator, records) = s.adjudicator.split_mut();
                adjudicator.evaluate(records, s.staking.storage(), oracle, investigator, evidence)?
            };
            let slasher = s.adjudicator.address;
            let (ledger, staking) = s.staking.split_mut();
            let outcome = ledger.slash_staker(
                staking,
                &mut s.tokens,
                at.current,
                &slasher,
                &order.staker,
                order.penalty,
                &order.investigator,
                order.reward,
            )?;
            let event = NetworkEvent::Slashed {
                staker: outcome.staker,
                penalty: outcome.penalty,
                investigator: outcome.rewardee,
                reward: outcome.reward,
            };
            Ok((outcome, vec![event]))
        })
    }

    // -----------------------------------------------------------------------
    // Policy Escrow
    // -----------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn create_policy(
        &mut self,
        sponsor: &Address,
        id: PolicyId,
        owner: Option<Address>,
        end_timestamp: Timestamp,
        nodes: &[Address],
        value: Wei,
    ) -> Result<Policy, TesseraError> {
        let at = self.moment();
        transact(&mut self.state, at, |s| {
            let (escrow, policies) = s.policy.split_mut();
            let policy = escrow.create_policy(
                policies,
                &mut s.ether,
                at.now,
                sponsor,
                id,
                owner,
                end_timestamp,
                nodes,
                value,
            )?;
            let event = NetworkEvent::PolicyCreated {
                id,
                sponsor: *sponsor,
                rate: policy.rate,
                nodes: nodes.len(),
                end_period: policy.end_period,
            };
            Ok((policy, vec![event]))
        })
    }

    fn revoke_with<F>(&mut self, revoke: F) -> Result<RevokeOutcome, TesseraError>
    where
        F: FnOnce(&PolicyEscrow, &mut PolicyState, &mut Balances, &dyn NodeActivity, Timestamp) -> Result<RevokeOutcome, TesseraError>,
    {
        let at = self.moment();
        transact(&mut self.state, at, |s| {
            let view = s.staking.storage().view();
            let (escrow, policies) = s.policy.split_mut();
            let outcome = revoke(escrow, policies, &mut s.ether, &view, at.now)?;
            let event = NetworkEvent::PolicyRevoked {
                id: outcome.id,
                nodes: outcome.nodes.clone(),
                refund: outcome.refund,
            };
            Ok((outcome, vec![event]))
        })
    }

    /// Revoke every active arrangement of a policy. Owner only.
    pub fn revoke_policy(&mut self, caller: &Address, id: &PolicyId) -> Result<RevokeOutcome, TesseraError> {
        self.revoke_with(|escrow, policies, ether, view, now| {
            escrow.revoke_policy(policies, ether, view, now, caller, id)
        })
    }

    /// Revoke one node's arrangement. Owner only.
    pub fn revoke_arrangement(
        &mut self,
        caller: &Address,
        id: &PolicyId,
        node: &Address,
    ) -> Result<RevokeOutcome, TesseraError> {
        self.revoke_with(|escrow, policies, ether, view, now| {
            escrow.revoke_arrangement(policies, ether, view, now, caller, id, node)
        })
    }

    /// Revoke on the owner's behalf with their signature over `id || node`.
    pub fn revoke_signed(
        &mut self,
        relayer: &Address,
        id: &PolicyId,
        node: &Address,
        signature: &Signature,
    ) -> Result<RevokeOutcome, TesseraError> {
        self.revoke_with(|escrow, policies, ether, view, now| {
            escrow.revoke_signed(policies, ether, view, now, relayer, id, node, signature)
        })
    }

    /// Return downtime value to the sponsor without revoking. Owner only.
    pub fn refund_policy(&mut self, caller: &Address, id: &PolicyId) -> Result<Wei, TesseraError> {
        let at = self.moment();
        transact(&mut self.state, at, |s| {
            let view = s.staking.storage().view();
            let (escrow, policies) = s.policy.split_mut();
            let refund = escrow.refund(policies, &mut s.ether, &view, at.now, caller, id)?;
            let events = if refund > 0 {
                vec![NetworkEvent::PolicyRefunded { id: *id, refund }]
            } else {
                Vec::new()
            };
            Ok((refund, events))
        })
    }

    /// Pay out a node's accrued fees.
    pub fn withdraw_fees(&mut self, node: &Address) -> Result<Wei, TesseraError> {
        let at = self.moment();
        transact(&mut self.state, at, |s| {
            let (escrow, policies) = s.policy.split_mut();
            let amount = escrow.withdraw(policies, &mut s.ether, node)?;
            let events = if amount > 0 {
                vec![NetworkEvent::FeeWithdrawn {
                    node: *node,
                    amount,
                }]
            } else {
                Vec::new()
            };
            Ok((amount, events))
        })
    }

    pub fn set_min_fee_rate(&mut self, node: &Address, rate: Wei) -> Result<(), TesseraError> {
        let at = self.moment();
        transact(&mut self.state, at, |s| {
            let (escrow, policies) = s.policy.split_mut();
            escrow.set_min_fee_rate(policies, node, rate)?;
            Ok(((), vec![NetworkEvent::MinFeeRateSet { node: *node, rate }]))
        })
    }

    // -----------------------------------------------------------------------
    // Bid Escrow
    // -----------------------------------------------------------------------

    /// Add tokens to the auction pool.
    pub fn fund_auction(&mut self, funder: &Address, amount: Tokens) -> Result<(), TesseraError> {
        let at = self.moment();
        transact(&mut self.state, at, |s| {
            s.bid_escrow
                .token_deposit(&mut s.bids, &mut s.tokens, at.now, funder, amount)?;
            Ok((
                (),
                vec![NetworkEvent::AuctionFunded {
                    funder: *funder,
                    amount,
                }],
            ))
        })
    }

    /// Place or raise a bid. Returns the bidder's total deposit.
    pub fn bid(&mut self, bidder: &Address, value: Wei) -> Result<Wei, TesseraError> {
        let at = self.moment();
        transact(&mut self.state, at, |s| {
            let total = s.bid_escrow.bid(&mut s.bids, &mut s.ether, at.now, bidder, value)?;
            Ok((
                total,
                vec![NetworkEvent::BidPlaced {
                    bidder: *bidder,
                    value,
                    total,
                }],
            ))
        })
    }

    pub fn cancel_bid(&mut self, bidder: &Address) -> Result<Wei, TesseraError> {
        let at = self.moment();
        transact(&mut self.state, at, |s| {
            let value = s.bid_escrow.cancel_bid(&mut s.bids, &mut s.ether, at.now, bidder)?;
            Ok((
                value,
                vec![NetworkEvent::BidCancelled {
                    bidder: *bidder,
                    value,
                }],
            ))
        })
    }

    /// Turn a bid into stake once bidding has ended.
    pub fn claim(&mut self, bidder: &Address) -> Result<ClaimOutcome, TesseraError> {
        let at = self.moment();
        transact(&mut self.state, at, |s| {
            let (ledger, staking) = s.staking.split_mut();
            let outcome = s.bid_escrow.claim(
                &mut s.bids,
                &mut s.tokens,
                ledger,
                staking,
                at.now,
                at.current,
                bidder,
            )?;
            register_fee_node(s, bidder, at.current);
            Ok((
                outcome,
                vec![NetworkEvent::BidClaimed {
                    bidder: *bidder,
                    tokens: outcome.tokens,
                    locked: outcome.locked,
                }],
            ))
        })
    }

    /// Return bid ether in proportion to work completed.
    pub fn refund_bid(&mut self, bidder: &Address) -> Result<RefundOutcome, TesseraError> {
        let at = self.moment();
        transact(&mut self.state, at, |s| {
            let (ledger, staking) = s.staking.split_mut();
            let outcome = s
                .bid_escrow
                .refund(&mut s.bids, &mut s.ether, ledger, staking, bidder)?;
            Ok((
                outcome,
                vec![NetworkEvent::BidRefunded {
                    bidder: *bidder,
                    refund: outcome.refund,
                    remaining: outcome.remaining_deposit,
                }],
            ))
        })
    }

    /// Burn pool tokens no bid is entitled to into the reward reserve.
    pub fn burn_unclaimed(&mut self) -> Result<Tokens, TesseraError> {
        let at = self.moment();
        transact(&mut self.state, at, |s| {
            let (ledger, staking) = s.staking.split_mut();
            let amount = s
                .bid_escrow
                .burn_unclaimed(&mut s.bids, &mut s.tokens, ledger, staking, at.now)?;
            let events = if amount > 0 {
                vec![NetworkEvent::UnclaimedBurned { amount }]
            } else {
                Vec::new()
            };
            Ok((amount, events))
        })
    }

    // -----------------------------------------------------------------------
    // Governance
    // -----------------------------------------------------------------------

    pub fn deploy_staking_logic(&mut self, logic: StakeLedger) -> Result<Address, TesseraError> {
        let at = self.moment();
        transact(&mut self.state, at, |s| {
            let target = deploy(&mut s.deployed.staking, logic)?;
            Ok((target, vec![deployed_event(Component::Staking, target)]))
        })
    }

    pub fn deploy_policy_logic(&mut self, logic: PolicyEscrow) -> Result<Address, TesseraError> {
        let at = self.moment();
        transact(&mut self.state, at, |s| {
            let target = deploy(&mut s.deployed.policy, logic)?;
            Ok((target, vec![deployed_event(Component::Policy, target)]))
        })
    }

    pub fn deploy_adjudicator_logic(&mut self, logic: Adjudicator) -> Result<Address, TesseraError> {
        let at = self.moment();
        transact(&mut self.state, at, |s| {
            let target = deploy(&mut s.deployed.adjudicator, logic)?;
            Ok((target, vec![deployed_event(Component::Adjudicator, target)]))
        })
    }

    /// Execute a governance call authorized by the governor's owners.
    ///
    /// `destination` is a dispatcher address, or the governor's own address
    /// for owner management.
    ///
    /// # Errors
    /// Signature errors from `MultiSig::authorize`, then whatever the
    /// forwarded call returns. Nothing changes and the nonce stays put if
    /// either fails.
    pub fn govern(
        &mut self,
        signatures: &[Signature],
        destination: &Address,
        call: &GovernanceCall,
    ) -> Result<(), TesseraError> {
        let at = self.moment();
        transact(&mut self.state, at, |s| {
            let mut governor = s.governor.clone();
            let mut events = governor.execute(signatures, destination, call, |gov| {
                let me = gov.address;
                if *destination == me {
                    gov.apply_owner_call(&me, call)?;
                    return Ok(vec![NetworkEvent::GovernorChanged {
                        owners: gov.owners().len(),
                        required: gov.required(),
                    }]);
                }
                route_call(s, &me, destination, call)
            })?;
            events.push(NetworkEvent::GovernanceExecuted {
                call: call.name().to_string(),
                destination: *destination,
                nonce: governor.nonce(),
            });
            s.governor = governor;
            Ok(((), events))
        })
    }

    /// Send an upgrade-family call to a dispatcher directly, as its owner.
    /// Only useful once ownership has been transferred away from the
    /// governor.
    pub fn owner_call(
        &mut self,
        caller: &Address,
        component: Component,
        call: &GovernanceCall,
    ) -> Result<(), TesseraError> {
        let at = self.moment();
        let destination = self.component_address(component);
        transact(&mut self.state, at, |s| {
            let events = route_call(s, caller, &destination, call)?;
            Ok(((), events))
        })
    }
}

fn deployed_event(component: Component, target: Address) -> NetworkEvent {
    NetworkEvent::LogicDeployed {
        component: component.to_string(),
        target,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::clock::ManualClock;
    use tessera_core::crypto::Keypair;

    fn config(owner: Address) -> NetworkConfig {
        let mut config = NetworkConfig::default();
        config.economics.hours_per_period = 1;
        config.economics.minimum_locked_periods = 6;
        config.economics.total_supply = Some(2_000_000_000);
        config.economics.initial_supply = Some(1_000_000_000);
        config.economics.minimum_allowed_locked = Some(100);
        config.economics.maximum_allowed_locked = Some(2_000);
        config.bid_escrow.staking_periods = 6;
        config.governance.owners = vec![owner];
        config
    }

    fn network() -> (Network, Keypair, ManualClock) {
        let owner = Keypair::from_seed(&[1u8; 32]);
        let clock = ManualClock::new(0);
        let network = Network::new(
            &config(owner.address()),
            Box::new(clock.clone()),
            Box::new(FixedVerdict(true)),
        )
        .unwrap();
        (network, owner, clock)
    }

    #[test]
    fn test_genesis_balances() {
        let (network, _, _) = network();
        let governor = network.governor().address;
        assert_eq!(network.token_balance(&governor), 1_000_000_000);
        assert_eq!(network.token_balance(&network.state().distributor), 1_000_000_000);
        assert_eq!(network.current_period(), 0);
        assert!(network.events().is_empty());
    }

    #[test]
    fn test_failed_operation_restores_state() {
        let (mut network, _, _) = network();
        let staker = Address::from_label("staker");
        network.fund_tokens(&staker, 1_000).unwrap();
        let before = network.events().len();
        // Staking has not been initialized yet.
        let err = network.deposit(&staker, 500, 6).unwrap_err();
        assert!(matches!(err, TesseraError::WrongPhase(_)));
        assert_eq!(network.events().len(), before);
        assert_eq!(network.token_balance(&staker), 1_000);
        assert!(network.staking().staker(&staker).is_none());
    }

    #[test]
    fn test_initialize_through_governor() {
        let (mut network, owner, _) = network();
        let call = GovernanceCall::InitializeStaking {
            reward_supply: 1_000_000_000,
        };
        let staking = network.component_address(Component::Staking);
        let signature = network.governor().sign(&owner, &staking, &call).unwrap();
        network.govern(&[signature.clone()], &staking, &call).unwrap();
        assert_eq!(network.staking().reserved_reward(), 1_000_000_000);
        assert_eq!(network.governor().nonce(), 1);

        // Replaying the signature fails and leaves the nonce alone.
        assert!(matches!(
            network.govern(&[signature], &staking, &call),
            Err(TesseraError::BadSignature(_))
        ));
        assert_eq!(network.governor().nonce(), 1);
    }

    #[test]
    fn test_owner_call_requires_dispatcher_owner() {
        let (mut network, owner, _) = network();
        let call = GovernanceCall::TransferOwnership {
            new_owner: owner.address(),
        };
        assert!(matches!(
            network.owner_call(&owner.address(), Component::Policy, &call),
            Err(TesseraError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_component_names_parse() {
        for component in [Component::Staking, Component::Policy, Component::Adjudicator] {
            assert_eq!(component.to_string().parse::<Component>().unwrap(), component);
        }
        assert!("ledger".parse::<Component>().is_err());
    }
}
