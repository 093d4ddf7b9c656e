// crates/tessera-cli/src/commands/policy.rs
//
// `tessera policy ...`: Policy Escrow commands. Sponsors and owners act as
// `--from`; nodes withdraw their fees the same way.

use std::error::Error;

use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use tessera_core::identity::{Address, PolicyId};
use tessera_core::types::{Period, Timestamp, Wei};
use tessera_escrow::policy::{Policy, RevokeOutcome};

use crate::output::{emit, emit_fields, Field, OutputFormat};
use crate::session::{caller, Session};

/// Policy subcommands.
#[derive(Debug, Subcommand)]
pub enum PolicyCmd {
    /// Pay `value` wei for a policy served by `--node` addresses.
    Create {
        /// Policy id (generated when omitted).
        #[arg(long)]
        id: Option<PolicyId>,
        /// Owner allowed to revoke, if not the sponsor.
        #[arg(long)]
        owner: Option<Address>,
        /// Serving nodes (repeat the flag).
        #[arg(long = "node", required = true)]
        nodes: Vec<Address>,
        /// Total payment in wei.
        #[arg(long)]
        value: Wei,
        /// Number of periods to cover, starting with the current one.
        #[arg(long, conflicts_with = "end")]
        periods: Option<u32>,
        /// End timestamp; the policy covers the period containing it.
        #[arg(long)]
        end: Option<Timestamp>,
    },
    /// Revoke a policy, or one node's arrangement with `--node`.
    Revoke {
        #[arg(long)]
        id: PolicyId,
        #[arg(long)]
        node: Option<Address>,
    },
    /// Reclaim payment for periods nodes failed to serve.
    Refund {
        #[arg(long)]
        id: PolicyId,
    },
    /// Withdraw accrued fees as a node.
    Withdraw,
    /// Set the minimum per-period rate this node accepts.
    MinRate {
        #[arg(long)]
        rate: Wei,
    },
    /// Show a policy and its arrangements.
    Info {
        #[arg(long)]
        id: PolicyId,
    },
}

#[derive(Debug, Serialize, Tabled)]
struct ArrangementRow {
    node: Address,
    last_refunded_period: Period,
    disabled: bool,
    refundable: Wei,
}

fn policy_fields(policy: &Policy) -> Vec<Field> {
    vec![
        Field::new("id", policy.id),
        Field::new("sponsor", policy.sponsor),
        Field::new("owner", policy.owner()),
        Field::new("rate", policy.rate),
        Field::new("periods", format!("{}..{}", policy.start_period, policy.end_period)),
        Field::new("nodes", policy.arrangements.len()),
        Field::new("value", policy.value()),
        Field::new("disabled", policy.disabled),
    ]
}

fn revoke_fields(outcome: &RevokeOutcome) -> Vec<Field> {
    let nodes: Vec<String> = outcome.nodes.iter().map(|n| n.short()).collect();
    vec![
        Field::new("policy", outcome.id),
        Field::new("revoked", nodes.join(", ")),
        Field::new("refund", outcome.refund),
        Field::new("policy disabled", outcome.policy_disabled),
    ]
}

/// Run the policy subcommand.
pub fn run(
    session: &mut Session,
    cmd: &PolicyCmd,
    from: Option<Address>,
    format: OutputFormat,
) -> Result<(), Box<dyn Error>> {
    if let PolicyCmd::Info { id } = cmd {
        return info(session, id, format);
    }

    let me = caller(from)?;
    let network = &mut session.network;
    match cmd {
        PolicyCmd::Create {
            id,
            owner,
            nodes,
            value,
            periods,
            end,
        } => {
            let end_timestamp = match (periods, end) {
                (_, Some(end)) => *end,
                (Some(periods), None) => {
                    let clock = network.state().clock;
                    let last = network.current_period() + periods.saturating_sub(1);
                    clock.start_of(last + 1).saturating_sub(1)
                }
                (None, None) => return Err("give either --periods or --end".into()),
            };
            let id = id.unwrap_or_else(PolicyId::generate);
            let policy = network.create_policy(&me, id, *owner, end_timestamp, nodes, *value)?;
            emit_fields(format, &policy_fields(&policy), &policy);
        }
        PolicyCmd::Revoke { id, node } => {
            let outcome = match node {
                Some(node) => network.revoke_arrangement(&me, id, node)?,
                None => network.revoke_policy(&me, id)?,
            };
            emit_fields(format, &revoke_fields(&outcome), &outcome);
        }
        PolicyCmd::Refund { id } => {
            let refund = network.refund_policy(&me, id)?;
            let fields = vec![Field::new("policy", id), Field::new("refund", refund)];
            emit_fields(format, &fields, &fields);
        }
        PolicyCmd::Withdraw => {
            let amount = network.withdraw_fees(&me)?;
            let fields = vec![
                Field::new("node", me),
                Field::new("withdrawn", amount),
                Field::new("ether", network.ether_balance(&me)),
            ];
            emit_fields(format, &fields, &fields);
        }
        PolicyCmd::MinRate { rate } => {
            network.set_min_fee_rate(&me, *rate)?;
            let fields = vec![Field::new("node", me), Field::new("min rate", rate)];
            emit_fields(format, &fields, &fields);
        }
        PolicyCmd::Info { .. } => {}
    }
    Ok(())
}

fn info(session: &Session, id: &PolicyId, format: OutputFormat) -> Result<(), Box<dyn Error>> {
    let network = &session.network;
    let policy = network
        .policies()
        .policy(id)
        .ok_or_else(|| format!("no policy {}", id))?;

    let mut fields = policy_fields(policy);
    fields.push(Field::new("refundable now", network.calculate_refund_value(id, None)?));
    match format {
        OutputFormat::Json => emit(format, &fields, policy),
        OutputFormat::Table => {
            emit(format, &fields, policy);
            let rows = policy
                .arrangements
                .iter()
                .map(|a| -> Result<ArrangementRow, Box<dyn Error>> {
                    Ok(ArrangementRow {
                        node: a.node,
                        last_refunded_period: a.last_refunded_period,
                        disabled: a.disabled,
                        refundable: network.calculate_refund_value(id, Some(&a.node))?,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            emit(format, &rows, &rows);
        }
    }
    Ok(())
}
