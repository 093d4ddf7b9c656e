// crates/tessera-node/tests/network_scenarios.rs
//
// End-to-end scenarios against the `Network` facade: staking and minting,
// slashing, policy payments, the token auction, upgrades, and governance.
//
// Every scenario runs on a small deployment (1-hour periods, a 2e9 supply)
// driven by a ManualClock, and checks the period-totals invariant after the
// operations that touch locks.

use tessera_core::clock::ManualClock;
use tessera_core::crypto::{Keypair, Signature};
use tessera_core::error::TesseraError;
use tessera_core::identity::{Address, PolicyId};
use tessera_core::types::Evidence;
use tessera_economics::staking::StakeLedger;
use tessera_escrow::policy::PolicyEscrow;
use tessera_escrow::worklock::BidPhase;
use tessera_governance::dispatcher::{secret_hash, AuditOutcome};
use tessera_governance::multisig::GovernanceCall;
use tessera_node::{Component, FixedVerdict, Network, NetworkConfig, NetworkEvent, NetworkState};

const HOUR: u64 = 3_600;
const RESERVE: u128 = 1_000_000_000;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn owner_keys() -> Vec<Keypair> {
    (1..=5u8).map(|i| Keypair::from_seed(&[i; 32])).collect()
}

fn test_config(keys: &[Keypair]) -> NetworkConfig {
    let text = r#"
        genesis = 0

        [economics]
        hours_per_period = 1
        minimum_locked_periods = 6
        minimum_worker_periods = 2
        total_supply = "2000000000"
        initial_supply = 1000000000
        locked_periods_coefficient = 4
        staking_coefficient = 80000000
        maximum_rewarded_periods = 4
        minimum_allowed_locked = 100
        maximum_allowed_locked = 2000

        [slashing]
        base_penalty = 300
        penalty_history_coefficient = 10
        percentage_penalty_coefficient = 2
        reward_coefficient = 2

        [bid_escrow]
        start_bid = 0
        end_bid = 36000
        boosting_refund = 100
        staking_periods = 6

        [governance]
        required = 2
    "#;
    let mut config = NetworkConfig::from_toml(text).unwrap();
    config.governance.owners = keys.iter().map(|k| k.address()).collect();
    config
}

/// Sign `call` for `destination` with the first two owners.
fn sign_two(network: &Network, keys: &[Keypair], destination: &Address, call: &GovernanceCall) -> Vec<Signature> {
    keys[..2]
        .iter()
        .map(|k| network.governor().sign(k, destination, call).unwrap())
        .collect()
}

fn govern(network: &mut Network, keys: &[Keypair], destination: &Address, call: GovernanceCall) -> Result<(), TesseraError> {
    let signatures = sign_two(network, keys, destination, &call);
    network.govern(&signatures, destination, &call)
}

/// A deployed network with the reward reserve funded.
fn setup() -> (Network, ManualClock, Vec<Keypair>) {
    let keys = owner_keys();
    let clock = ManualClock::new(0);
    let mut network = Network::new(
        &test_config(&keys),
        Box::new(clock.clone()),
        Box::new(FixedVerdict(true)),
    )
    .unwrap();
    let staking = network.component_address(Component::Staking);
    govern(
        &mut network,
        &keys,
        &staking,
        GovernanceCall::InitializeStaking {
            reward_supply: RESERVE,
        },
    )
    .unwrap();
    (network, clock, keys)
}

fn funded_staker(network: &mut Network, label: &str, tokens: u128) -> Address {
    let staker = Address::from_label(label);
    network.fund_tokens(&staker, tokens).unwrap();
    staker
}

fn assert_period_totals(network: &Network) {
    network
        .staking()
        .verify_period_totals(network.current_period())
        .unwrap();
}

fn next_period(clock: &ManualClock) {
    clock.advance_hours(1);
}

// ---------------------------------------------------------------------------
// Staking
// ---------------------------------------------------------------------------

#[test]
fn test_minting_scenario() {
    let (mut network, clock, _) = setup();
    let staker = funded_staker(&mut network, "staker", 1_000);

    network.deposit(&staker, 1_000, 10).unwrap();
    assert_period_totals(&network);

    for _ in 0..10 {
        network.confirm_activity(&staker).unwrap();
        assert_period_totals(&network);
        next_period(&clock);
    }
    next_period(&clock);
    // Periods 9 and 10 were committed but not yet minted.
    let last = network.mint(&staker).unwrap();
    assert_eq!(last.periods, vec![9, 10]);
    assert_period_totals(&network);

    let minted: u128 = network
        .events()
        .iter()
        .filter_map(|r| match &r.event {
            NetworkEvent::Minted { reward, .. } => Some(*reward),
            _ => None,
        })
        .sum();
    assert!(minted > 0);
    assert!(minted <= RESERVE);
    assert_eq!(network.staking().all_tokens(&staker), 1_000 + minted);
    assert_eq!(network.staking().reserved_reward(), RESERVE - minted);

    // Re-stake is on by default, so the reward stays locked.
    let current = network.current_period();
    assert!(network.staking().locked_tokens(&staker, current) > 1_000);
}

#[test]
fn test_confirmation_is_idempotent_within_a_period() {
    let (mut network, _, _) = setup();
    let staker = funded_staker(&mut network, "staker", 500);
    network.deposit(&staker, 500, 6).unwrap();

    assert_eq!(network.confirm_activity(&staker).unwrap(), Some(1));
    let events = network.events().len();
    assert_eq!(network.confirm_activity(&staker).unwrap(), None);
    assert_eq!(network.events().len(), events);
}

#[test]
fn test_worker_confirms_for_staker() {
    let (mut network, _, _) = setup();
    let staker = funded_staker(&mut network, "staker", 500);
    let worker = Address::from_label("worker");
    network.deposit(&staker, 500, 6).unwrap();
    network.bond_worker(&staker, &worker).unwrap();

    assert_eq!(network.confirm_activity(&worker).unwrap(), Some(1));
    assert_eq!(network.staking().staker_from_worker(&worker), Some(staker));
    assert!(matches!(
        network.confirm_activity(&Address::from_label("stranger")),
        Err(TesseraError::NotFound(_))
    ));
}

#[test]
fn test_divide_round_trip() {
    let (mut network, _, _) = setup();
    let staker = funded_staker(&mut network, "staker", 1_000);
    network.deposit(&staker, 1_000, 10).unwrap();

    let added = network.divide_stake(&staker, 0, 400, 2).unwrap();
    assert_eq!(added.locked, 400);
    assert_eq!(added.last_period, 12);
    let subs = network.staking().sub_stakes(&staker).to_vec();
    assert_eq!(subs.len(), 2);
    assert_eq!(subs[0].locked, 600);

    for period in 1..=10 {
        assert_eq!(network.staking().locked_tokens(&staker, period), 1_000);
    }
    assert_eq!(network.staking().locked_tokens(&staker, 11), 400);
    assert_eq!(network.staking().locked_tokens(&staker, 13), 0);
    assert_period_totals(&network);

    // The remaining half would drop below the minimum lock.
    assert!(matches!(
        network.divide_stake(&staker, 0, 550, 1),
        Err(TesseraError::InvalidAmount(_))
    ));
    assert_period_totals(&network);
}

#[test]
fn test_deposit_bounds() {
    let (mut network, _, _) = setup();
    let staker = funded_staker(&mut network, "staker", 3_000);
    assert!(matches!(
        network.deposit(&staker, 99, 6),
        Err(TesseraError::InvalidAmount(_))
    ));
    assert!(matches!(
        network.deposit(&staker, 100, 5),
        Err(TesseraError::InvalidDuration(_))
    ));
    network.deposit(&staker, 1_500, 6).unwrap();
    assert!(matches!(
        network.deposit(&staker, 501, 6),
        Err(TesseraError::InvalidAmount(_))
    ));
    assert_eq!(network.token_balance(&staker), 1_500);
}

#[test]
fn test_failed_withdraw_changes_nothing() {
    let (mut network, _, _) = setup();
    let staker = funded_staker(&mut network, "staker", 1_000);
    network.deposit(&staker, 1_000, 6).unwrap();

    let events = network.events().len();
    let escrow = network.component_address(Component::Staking);
    let held = network.token_balance(&escrow);
    assert!(matches!(
        network.withdraw(&staker, 1),
        Err(TesseraError::InsufficientFreeBalance(_))
    ));
    assert_eq!(network.events().len(), events);
    assert_eq!(network.token_balance(&escrow), held);
    assert_eq!(network.token_balance(&staker), 0);
}

#[test]
fn test_restake_lock() {
    let (mut network, _, _) = setup();
    let staker = funded_staker(&mut network, "staker", 500);
    network.deposit(&staker, 500, 6).unwrap();

    network.lock_restake(&staker, 3).unwrap();
    assert!(matches!(
        network.set_restake(&staker, false),
        Err(TesseraError::ReStakeLocked(_))
    ));
    assert!(matches!(
        network.lock_restake(&staker, 0),
        Err(TesseraError::InvalidDuration(_))
    ));
}

#[test]
fn test_wind_down_stops_rolling_lock() {
    let (mut network, clock, _) = setup();
    let staker = funded_staker(&mut network, "staker", 500);
    network.deposit(&staker, 500, 6).unwrap();
    network.set_wind_down(&staker, true).unwrap();

    for _ in 0..3 {
        network.confirm_activity(&staker).unwrap();
        next_period(&clock);
    }
    assert_eq!(network.staking().sub_stakes(&staker)[0].last_period, 6);
    assert_period_totals(&network);
}

// ---------------------------------------------------------------------------
// Slashing
// ---------------------------------------------------------------------------

#[test]
fn test_slashing_penalties_grow() {
    let (mut network, _, _) = setup();
    let staker = funded_staker(&mut network, "staker", 2_000);
    let worker = Address::from_label("worker");
    let investigator = Address::from_label("investigator");
    network.deposit(&staker, 2_000, 6).unwrap();
    network.bond_worker(&staker, &worker).unwrap();

    let evidence = |tag: &[u8]| Evidence {
        offender: worker,
        payload: tag.to_vec(),
    };
    let first = network.evaluate(&investigator, &evidence(b"first")).unwrap();
    let second = network.evaluate(&investigator, &evidence(b"second")).unwrap();
    assert_eq!(first.penalty, 300);
    assert_eq!(second.penalty, 310);
    assert_eq!(first.reward + second.reward, 150 + 155);

    assert_eq!(network.staking().all_tokens(&staker), 2_000 - 610);
    assert_eq!(network.token_balance(&investigator), 305);
    assert_eq!(network.staking().reserved_reward(), RESERVE + 305);
    let current = network.current_period();
    for period in [current, current + 1] {
        assert!(network.staking().locked_tokens(&staker, period) <= 1_390);
    }
    assert_period_totals(&network);

    let events = network.events().len();
    assert!(matches!(
        network.evaluate(&investigator, &evidence(b"first")),
        Err(TesseraError::AlreadyEvaluated(_))
    ));
    assert_eq!(network.events().len(), events);
    assert_eq!(network.adjudications().offenses(&staker), 2);
}

#[test]
fn test_rejected_evidence_changes_nothing() {
    let keys = owner_keys();
    let clock = ManualClock::new(0);
    let mut network = Network::new(
        &test_config(&keys),
        Box::new(clock),
        Box::new(FixedVerdict(false)),
    )
    .unwrap();
    let evidence = Evidence {
        offender: Address::from_label("anyone"),
        payload: b"junk".to_vec(),
    };
    assert!(matches!(
        network.evaluate(&Address::from_label("investigator"), &evidence),
        Err(TesseraError::InvalidEvidence(_))
    ));
    assert!(network.adjudications().evaluated.is_empty());
}

// ---------------------------------------------------------------------------
// Policy Escrow
// ---------------------------------------------------------------------------

/// Two staked nodes, a sponsor with 600 wei, and the clock at period 1.
fn policy_setup(confirm: bool) -> (Network, ManualClock, [Address; 2], Keypair) {
    let (mut network, clock, _) = setup();
    let nodes = [
        funded_staker(&mut network, "node-a", 500),
        funded_staker(&mut network, "node-b", 500),
    ];
    for node in &nodes {
        network.deposit(node, 500, 10).unwrap();
        if confirm {
            network.confirm_activity(node).unwrap();
        }
    }
    let sponsor = Keypair::from_seed(&[9u8; 32]);
    network.fund_ether(&sponsor.address(), 600).unwrap();
    next_period(&clock);
    (network, clock, nodes, sponsor)
}

/// Create a 600 wei policy over periods 1..4 for both nodes.
fn create_policy(network: &mut Network, nodes: &[Address], sponsor: &Address) -> PolicyId {
    let id = PolicyId::generate();
    let end = 4 * HOUR - 1;
    let policy = network
        .create_policy(sponsor, id, None, end, nodes, 600)
        .unwrap();
    assert_eq!(policy.end_period, 4);
    assert_eq!(policy.rate, 100);
    assert_eq!(policy.value(), 600);
    id
}

#[test]
fn test_policy_escrow_holds_exact_value() {
    let (mut network, _, nodes, sponsor) = policy_setup(true);
    let id = create_policy(&mut network, &nodes, &sponsor.address());
    let escrow = network.component_address(Component::Policy);
    assert_eq!(network.ether_balance(&escrow), 600);
    assert_eq!(network.ether_balance(&sponsor.address()), 0);
    assert!(network.policies().policy(&id).is_some());
}

#[test]
fn test_immediate_revoke_after_confirmation() {
    let (mut network, _, nodes, sponsor) = policy_setup(true);
    let id = create_policy(&mut network, &nodes, &sponsor.address());

    let outcome = network.revoke_policy(&sponsor.address(), &id).unwrap();
    assert_eq!(outcome.refund, 600 - 2 * 100);
    assert!(outcome.policy_disabled);
    assert_eq!(network.ether_balance(&sponsor.address()), 400);

    // Double revoke fails and moves nothing.
    let events = network.events().len();
    assert!(matches!(
        network.revoke_policy(&sponsor.address(), &id),
        Err(TesseraError::AlreadyRevoked(_))
    ));
    assert_eq!(network.ether_balance(&sponsor.address()), 400);
    assert_eq!(network.events().len(), events);
}

#[test]
fn test_immediate_revoke_without_confirmation() {
    let (mut network, _, nodes, sponsor) = policy_setup(false);
    let id = create_policy(&mut network, &nodes, &sponsor.address());

    let outcome = network.revoke_policy(&sponsor.address(), &id).unwrap();
    assert_eq!(outcome.refund, 600);
    assert_eq!(network.ether_balance(&sponsor.address()), 600);
}

#[test]
fn test_revoke_requires_owner() {
    let (mut network, _, nodes, sponsor) = policy_setup(true);
    let id = create_policy(&mut network, &nodes, &sponsor.address());
    assert!(matches!(
        network.revoke_policy(&nodes[0], &id),
        Err(TesseraError::Unauthorized(_))
    ));
    assert!(matches!(
        network.revoke_arrangement(&sponsor.address(), &id, &Address::from_label("nobody")),
        Err(TesseraError::NotFound(_))
    ));
}

#[test]
fn test_signed_revoke_of_one_arrangement() {
    let (mut network, _, nodes, sponsor) = policy_setup(true);
    let id = create_policy(&mut network, &nodes, &sponsor.address());
    let relayer = Address::from_label("relayer");

    let forged = Keypair::from_seed(&[42u8; 32]).sign(&PolicyEscrow::revoke_message(&id, &nodes[0]));
    assert!(matches!(
        network.revoke_signed(&relayer, &id, &nodes[0], &forged),
        Err(TesseraError::BadSignature(_))
    ));

    let signature = sponsor.sign(&PolicyEscrow::revoke_message(&id, &nodes[0]));
    let outcome = network.revoke_signed(&relayer, &id, &nodes[0], &signature).unwrap();
    assert_eq!(outcome.nodes, vec![nodes[0]]);
    assert_eq!(outcome.refund, 200);
    assert!(!outcome.policy_disabled);
    assert_eq!(network.ether_balance(&relayer), 0);
}

#[test]
fn test_fees_accrue_through_minting() {
    let (mut network, clock, nodes, sponsor) = policy_setup(true);
    create_policy(&mut network, &nodes, &sponsor.address());

    // Confirm periods 2..=5 and mint through period 4.
    for _ in 0..5 {
        for node in &nodes {
            network.confirm_activity(node).unwrap();
        }
        next_period(&clock);
    }
    for node in &nodes {
        network.mint(node).unwrap();
        assert_eq!(network.withdraw_fees(node).unwrap(), 300);
        assert_eq!(network.withdraw_fees(node).unwrap(), 0);
    }
    let escrow = network.component_address(Component::Policy);
    assert_eq!(network.ether_balance(&escrow), 0);
    assert_eq!(network.ether_balance(&nodes[0]), 300);
}

#[test]
fn test_downtime_refund() {
    let (mut network, clock, nodes, sponsor) = policy_setup(true);
    let id = create_policy(&mut network, &nodes, &sponsor.address());

    // Node A keeps confirming, node B goes quiet after period 1.
    for _ in 0..2 {
        network.confirm_activity(&nodes[0]).unwrap();
        next_period(&clock);
    }
    // Period 3: B missed periods 2 and 3.
    let owed = network.calculate_refund_value(&id, Some(&nodes[1])).unwrap();
    assert_eq!(owed, 200);
    assert_eq!(network.calculate_refund_value(&id, Some(&nodes[0])).unwrap(), 0);

    let refund = network.refund_policy(&sponsor.address(), &id).unwrap();
    assert_eq!(refund, 200);
    assert_eq!(network.ether_balance(&sponsor.address()), 200);
    assert_eq!(network.refund_policy(&sponsor.address(), &id).unwrap(), 0);
}

#[test]
fn test_policy_creation_errors() {
    let (mut network, _, nodes, sponsor) = policy_setup(true);
    let sponsor = sponsor.address();
    let end = 4 * HOUR - 1;
    assert!(matches!(
        network.create_policy(&sponsor, PolicyId::generate(), None, end, &nodes, 0),
        Err(TesseraError::NoPayment)
    ));
    assert!(matches!(
        network.create_policy(&sponsor, PolicyId::generate(), None, HOUR, &nodes, 600),
        Err(TesseraError::PastDeadline(_))
    ));
    assert!(matches!(
        network.create_policy(&sponsor, PolicyId::generate(), None, end, &nodes, 601),
        Err(TesseraError::NonIntegralRate(_))
    ));
    let stranger = [Address::from_label("stranger")];
    assert!(matches!(
        network.create_policy(&sponsor, PolicyId::generate(), None, end, &stranger, 300),
        Err(TesseraError::UnregisteredNode(_))
    ));
    network.set_min_fee_rate(&nodes[0], 101).unwrap();
    assert!(matches!(
        network.create_policy(&sponsor, PolicyId::generate(), None, end, &nodes, 600),
        Err(TesseraError::RateBelowMinimum(_))
    ));
    assert_eq!(network.ether_balance(&sponsor), 600);
}

// ---------------------------------------------------------------------------
// Bid Escrow
// ---------------------------------------------------------------------------

fn auction_setup() -> (Network, ManualClock, Address, Address) {
    let (mut network, clock, _) = setup();
    let funder = funded_staker(&mut network, "funder", 1_980);
    network.fund_auction(&funder, 1_980).unwrap();
    let first = Address::from_label("bidder-1");
    let second = Address::from_label("bidder-2");
    network.fund_ether(&first, 18).unwrap();
    network.fund_ether(&second, 1).unwrap();
    (network, clock, first, second)
}

#[test]
fn test_bid_allocation() {
    let (mut network, _, first, second) = auction_setup();
    assert_eq!(network.bid_phase(), BidPhase::Bidding);

    network.bid(&first, 18).unwrap();
    assert_eq!(network.bids().eth_to_tokens(18), 1_980);
    network.bid(&second, 1).unwrap();
    assert_eq!(network.bids().eth_to_tokens(18), 18 * 1_980 / 19);

    network.cancel_bid(&second).unwrap();
    assert_eq!(network.ether_balance(&second), 1);
    assert_eq!(network.bids().eth_to_tokens(18), 1_980);
    assert!(matches!(network.cancel_bid(&second), Err(TesseraError::NoBid(_))));
}

#[test]
fn test_claim_refund_and_burn() {
    let (mut network, clock, first, second) = auction_setup();
    network.bid(&first, 18).unwrap();
    network.bid(&second, 1).unwrap();
    assert!(matches!(network.claim(&first), Err(TesseraError::WrongPhase(_))));

    clock.set(10 * HOUR);
    assert_eq!(network.bid_phase(), BidPhase::Ended);
    let claim = network.claim(&first).unwrap();
    assert_eq!(claim.tokens, 1_875);
    assert_eq!(claim.free + claim.locked, 1_875);
    assert_eq!(claim.free, 1_875 * 9 / 10);
    assert!(matches!(network.claim(&first), Err(TesseraError::AlreadyClaimed(_))));
    assert_period_totals(&network);

    // Pool minus the claim minus the second bidder's 104.
    assert_eq!(network.burn_unclaimed().unwrap(), 1);
    assert_eq!(network.burn_unclaimed().unwrap(), 0);

    assert!(matches!(
        network.refund_bid(&first),
        Err(TesseraError::NothingToRefund(_))
    ));

    // Work the stake until the whole deposit has come back.
    let mut refunded = 0;
    let mut first_refund = None;
    for _ in 0..10 {
        network.confirm_activity(&first).unwrap();
        next_period(&clock);
        let work = network.staking().completed_work(&first);
        match network.refund_bid(&first) {
            Ok(outcome) => {
                if first_refund.is_none() {
                    assert_eq!(outcome.refund, work * 18 / claim.locked);
                    assert!(outcome.refund < 18);
                    first_refund = Some(outcome.refund);
                }
                refunded += outcome.refund;
                if outcome.exhausted {
                    break;
                }
            }
            Err(TesseraError::NothingToRefund(_)) => {}
            Err(e) => panic!("unexpected refund error: {}", e),
        }
    }
    assert!(first_refund.is_some());
    assert_eq!(refunded, 18);
    assert_eq!(network.ether_balance(&first), 18);
    assert!(!network.staking().staker(&first).unwrap().measure_work);
    assert_eq!(network.remaining_work(&first), 0);
    assert_period_totals(&network);
}

// ---------------------------------------------------------------------------
// Upgrades and governance
// ---------------------------------------------------------------------------

#[test]
fn test_upgrade_and_rollback() {
    let (mut network, _, keys) = setup();
    let staker = funded_staker(&mut network, "staker", 500);
    network.deposit(&staker, 500, 6).unwrap();

    let params = network.state().staking.target().params.clone();
    let v1 = network.state().staking.target().address;
    let v2 = network
        .deploy_staking_logic(StakeLedger::new(Address::from_label("stake-ledger/v2"), params.clone()).with_version(2))
        .unwrap();
    let staking = network.component_address(Component::Staking);

    govern(
        &mut network,
        &keys,
        &staking,
        GovernanceCall::Upgrade {
            target: v2,
            secret: b"staking-genesis".to_vec(),
            next_secret_hash: secret_hash(b"second"),
        },
    )
    .unwrap();
    assert_eq!(network.state().staking.target().address, v2);
    assert_eq!(network.staking().schema_version, 2);
    assert_eq!(network.staking().all_tokens(&staker), 500);
    assert_eq!(
        network.state().staking.audit_log().last().map(|r| r.outcome),
        Some(AuditOutcome::Upgraded)
    );

    govern(
        &mut network,
        &keys,
        &staking,
        GovernanceCall::Rollback {
            secret: b"second".to_vec(),
            next_secret_hash: secret_hash(b"third"),
        },
    )
    .unwrap();
    assert_eq!(network.state().staking.target().address, v1);
    assert_eq!(network.staking().schema_version, 1);
    assert!(network.state().staking.previous().is_none());

    // The revealed secret is spent.
    let nonce = network.governor().nonce();
    assert!(matches!(
        govern(
            &mut network,
            &keys,
            &staking,
            GovernanceCall::Upgrade {
                target: v2,
                secret: b"second".to_vec(),
                next_secret_hash: secret_hash(b"fourth"),
            },
        ),
        Err(TesseraError::BadSecret(_))
    ));
    assert_eq!(network.governor().nonce(), nonce);
}

#[test]
fn test_upgrade_rejects_older_schema() {
    let (mut network, _, keys) = setup();
    let params = network.state().staking.target().params.clone();
    let v2 = network
        .deploy_staking_logic(StakeLedger::new(Address::from_label("stake-ledger/v2"), params.clone()).with_version(2))
        .unwrap();
    let legacy = network
        .deploy_staking_logic(StakeLedger::new(Address::from_label("stake-ledger/legacy"), params))
        .unwrap();
    let staking = network.component_address(Component::Staking);
    govern(
        &mut network,
        &keys,
        &staking,
        GovernanceCall::Upgrade {
            target: v2,
            secret: b"staking-genesis".to_vec(),
            next_secret_hash: secret_hash(b"second"),
        },
    )
    .unwrap();

    assert!(matches!(
        govern(
            &mut network,
            &keys,
            &staking,
            GovernanceCall::Upgrade {
                target: legacy,
                secret: b"second".to_vec(),
                next_secret_hash: secret_hash(b"third"),
            },
        ),
        Err(TesseraError::IncompatibleTarget(_))
    ));
    assert!(matches!(
        govern(
            &mut network,
            &keys,
            &staking,
            GovernanceCall::Upgrade {
                target: Address::from_label("never-deployed"),
                secret: b"second".to_vec(),
                next_secret_hash: secret_hash(b"third"),
            },
        ),
        Err(TesseraError::NotFound(_))
    ));
    assert_eq!(network.state().staking.target().address, v2);
}

#[test]
fn test_policy_dispatcher_upgrade_keeps_policies() {
    let (mut network, _, nodes, sponsor) = policy_setup(true);
    let id = create_policy(&mut network, &nodes, &sponsor.address());
    let keys = owner_keys();
    let clock = network.state().policy.target().clock;
    let v2 = network
        .deploy_policy_logic(PolicyEscrow::new(Address::from_label("policy-escrow/v2"), clock).with_version(2))
        .unwrap();
    let policy = network.component_address(Component::Policy);
    govern(
        &mut network,
        &keys,
        &policy,
        GovernanceCall::Upgrade {
            target: v2,
            secret: b"policy-genesis".to_vec(),
            next_secret_hash: secret_hash(b"next"),
        },
    )
    .unwrap();
    assert!(network.policies().policy(&id).is_some());
    assert_eq!(network.revoke_policy(&sponsor.address(), &id).unwrap().refund, 400);
}

#[test]
fn test_two_of_five_replay() {
    let (mut network, _, keys) = setup();
    let staking = network.component_address(Component::Staking);
    let call = GovernanceCall::TransferOwnership {
        new_owner: keys[4].address(),
    };
    let signatures = sign_two(&network, &keys, &staking, &call);
    network.govern(&signatures, &staking, &call).unwrap();
    assert_eq!(network.state().staking.owner(), keys[4].address());

    let nonce = network.governor().nonce();
    assert!(matches!(
        network.govern(&signatures, &staking, &call),
        Err(TesseraError::BadSignature(_))
    ));
    assert_eq!(network.governor().nonce(), nonce);

    // The new owner can now act on the dispatcher directly.
    let governor = network.governor().address;
    network
        .owner_call(
            &keys[4].address(),
            Component::Staking,
            &GovernanceCall::TransferOwnership { new_owner: governor },
        )
        .unwrap();
    assert_eq!(network.state().staking.owner(), governor);
}

#[test]
fn test_quorum_and_owner_management() {
    let (mut network, _, keys) = setup();
    let me = network.governor().address;
    let call = GovernanceCall::ChangeRequirement { required: 3 };
    let one = vec![network.governor().sign(&keys[0], &me, &call).unwrap()];
    assert!(matches!(
        network.govern(&one, &me, &call),
        Err(TesseraError::QuorumNotMet(_))
    ));

    govern(&mut network, &keys, &me, call).unwrap();
    assert_eq!(network.governor().required(), 3);

    // Two signatures no longer suffice.
    let staking = network.component_address(Component::Staking);
    assert!(matches!(
        govern(
            &mut network,
            &keys,
            &staking,
            GovernanceCall::TransferOwnership { new_owner: me },
        ),
        Err(TesseraError::QuorumNotMet(_))
    ));
    assert!(network
        .events()
        .iter()
        .any(|r| matches!(r.event, NetworkEvent::GovernorChanged { required: 3, .. })));
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[test]
fn test_state_survives_save_and_load() {
    let (mut network, clock, _) = setup();
    let staker = funded_staker(&mut network, "staker", 1_000);
    network.deposit(&staker, 1_000, 6).unwrap();
    network.confirm_activity(&staker).unwrap();

    let path = std::env::temp_dir().join(format!("tessera_state_{}.json", PolicyId::generate()));
    let path = path.to_string_lossy().to_string();
    network.state().save(&path).unwrap();

    let state = NetworkState::load(&path).unwrap();
    let mut restored = Network::from_state(state, Box::new(clock.clone()), Box::new(FixedVerdict(true)));
    assert_eq!(restored.events(), network.events());
    assert_eq!(restored.staking(), network.staking());
    assert_eq!(restored.token_balance(&staker), network.token_balance(&staker));

    next_period(&clock);
    next_period(&clock);
    assert_eq!(restored.mint(&staker).unwrap().periods, vec![1]);
    let _ = std::fs::remove_file(&path);
}
