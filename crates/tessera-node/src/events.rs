// crates/tessera-node/src/events.rs
//
// Records appended to the network's event log by committed operations.
//
// A failed operation appends nothing; the log is the authoritative history
// of state transitions and is persisted with the rest of the network state.

use std::fmt;

use serde::{Deserialize, Serialize};

use tessera_core::identity::{Address, PolicyId};
use tessera_core::types::{Period, Timestamp, Tokens, Wei};

/// A committed state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkEvent {
    /// Tokens or ether credited to an account by the operator.
    Funded {
        account: Address,
        amount: u128,
        asset: String,
    },
    StakingInitialized {
        reward_supply: Tokens,
    },
    Deposited {
        staker: Address,
        amount: Tokens,
        first_period: Period,
        last_period: Period,
    },
    Locked {
        staker: Address,
        amount: Tokens,
        first_period: Period,
        last_period: Period,
    },
    StakeDivided {
        staker: Address,
        index: usize,
        amount: Tokens,
        last_period: Period,
    },
    StakeProlonged {
        staker: Address,
        index: usize,
        last_period: Period,
    },
    WorkerBonded {
        staker: Address,
        worker: Address,
    },
    ActivityConfirmed {
        staker: Address,
        period: Period,
    },
    Minted {
        staker: Address,
        periods: Vec<Period>,
        reward: Tokens,
        fees: Wei,
    },
    Withdrawn {
        staker: Address,
        amount: Tokens,
    },
    RestakeSet {
        staker: Address,
        enabled: bool,
    },
    RestakeLocked {
        staker: Address,
        until_period: Period,
    },
    WindDownSet {
        staker: Address,
        enabled: bool,
    },
    Slashed {
        staker: Address,
        penalty: Tokens,
        investigator: Address,
        reward: Tokens,
    },
    PolicyCreated {
        id: PolicyId,
        sponsor: Address,
        rate: Wei,
        nodes: usize,
        end_period: Period,
    },
    PolicyRevoked {
        id: PolicyId,
        nodes: Vec<Address>,
        refund: Wei,
    },
    PolicyRefunded {
        id: PolicyId,
        refund: Wei,
    },
    FeeWithdrawn {
        node: Address,
        amount: Wei,
    },
    MinFeeRateSet {
        node: Address,
        rate: Wei,
    },
    AuctionFunded {
        funder: Address,
        amount: Tokens,
    },
    BidPlaced {
        bidder: Address,
        value: Wei,
        total: Wei,
    },
    BidCancelled {
        bidder: Address,
        value: Wei,
    },
    BidClaimed {
        bidder: Address,
        tokens: Tokens,
        locked: Tokens,
    },
    BidRefunded {
        bidder: Address,
        refund: Wei,
        remaining: Wei,
    },
    UnclaimedBurned {
        amount: Tokens,
    },
    LogicDeployed {
        component: String,
        target: Address,
    },
    Upgraded {
        dispatcher: Address,
        target: Address,
    },
    RolledBack {
        dispatcher: Address,
        target: Address,
    },
    OwnershipTransferred {
        dispatcher: Address,
        new_owner: Address,
    },
    GovernorChanged {
        owners: usize,
        required: usize,
    },
    GovernanceExecuted {
        call: String,
        destination: Address,
        nonce: u64,
    },
}

impl NetworkEvent {
    /// Short kind name for tables.
    pub fn kind(&self) -> &'static str {
        match self {
            NetworkEvent::Funded { .. } => "funded",
            NetworkEvent::StakingInitialized { .. } => "staking-initialized",
            NetworkEvent::Deposited { .. } => "deposited",
            NetworkEvent::Locked { .. } => "locked",
            NetworkEvent::StakeDivided { .. } => "stake-divided",
            NetworkEvent::StakeProlonged { .. } => "stake-prolonged",
            NetworkEvent::WorkerBonded { .. } => "worker-bonded",
            NetworkEvent::ActivityConfirmed { .. } => "activity-confirmed",
            NetworkEvent::Minted { .. } => "minted",
            NetworkEvent::Withdrawn { .. } => "withdrawn",
            NetworkEvent::RestakeSet { .. } => "restake-set",
            NetworkEvent::RestakeLocked { .. } => "restake-locked",
            NetworkEvent::WindDownSet { .. } => "wind-down-set",
            NetworkEvent::Slashed { .. } => "slashed",
            NetworkEvent::PolicyCreated { .. } => "policy-created",
            NetworkEvent::PolicyRevoked { .. } => "policy-revoked",
            NetworkEvent::PolicyRefunded { .. } => "policy-refunded",
            NetworkEvent::FeeWithdrawn { .. } => "fee-withdrawn",
            NetworkEvent::MinFeeRateSet { .. } => "min-fee-rate-set",
            NetworkEvent::AuctionFunded { .. } => "auction-funded",
            NetworkEvent::BidPlaced { .. } => "bid-placed",
            NetworkEvent::BidCancelled { .. } => "bid-cancelled",
            NetworkEvent::BidClaimed { .. } => "bid-claimed",
            NetworkEvent::BidRefunded { .. } => "bid-refunded",
            NetworkEvent::UnclaimedBurned { .. } => "unclaimed-burned",
            NetworkEvent::LogicDeployed { .. } => "logic-deployed",
            NetworkEvent::Upgraded { .. } => "upgraded",
            NetworkEvent::RolledBack { .. } => "rolled-back",
            NetworkEvent::OwnershipTransferred { .. } => "ownership-transferred",
            NetworkEvent::GovernorChanged { .. } => "governor-changed",
            NetworkEvent::GovernanceExecuted { .. } => "governance-executed",
        }
    }
}

impl fmt::Display for NetworkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkEvent::Deposited {
                staker,
                amount,
                first_period,
                last_period,
            } => write!(
                f,
                "{} deposited {} for periods {}..={}",
                staker.short(),
                amount,
                first_period,
                last_period
            ),
            NetworkEvent::Minted {
                staker,
                periods,
                reward,
                ..
            } => write!(
                f,
                "{} minted {} over {} period(s)",
                staker.short(),
                reward,
                periods.len()
            ),
            NetworkEvent::Slashed {
                staker, penalty, ..
            } => write!(f, "{} slashed by {}", staker.short(), penalty),
            NetworkEvent::PolicyCreated { id, rate, .. } => {
                write!(f, "policy {} created at rate {}", id, rate)
            }
            NetworkEvent::PolicyRevoked { id, refund, .. } => {
                write!(f, "policy {} revoked, {} refunded", id, refund)
            }
            other => write!(f, "{}", other.kind()),
        }
    }
}

/// An event together with when it was committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: Timestamp,
    pub period: Period,
    pub event: NetworkEvent,
}
