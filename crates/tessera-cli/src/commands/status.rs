// crates/tessera-cli/src/commands/status.rs
//
// `tessera status`: clock, reserves, governance and the tail of the event
// log.

use std::error::Error;

use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use tessera_node::{Component, EventRecord};

use crate::output::{emit, Field, OutputFormat};
use crate::session::Session;

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// How many recent events to list.
    #[arg(long, default_value_t = 10)]
    pub events: usize,
}

#[derive(Debug, Serialize, Tabled)]
struct EventRow {
    timestamp: u64,
    period: u32,
    kind: String,
    detail: String,
}

impl From<&EventRecord> for EventRow {
    fn from(record: &EventRecord) -> Self {
        Self {
            timestamp: record.timestamp,
            period: record.period,
            kind: record.event.kind().to_string(),
            detail: record.event.to_string(),
        }
    }
}

#[derive(Serialize)]
struct StatusReport<'a> {
    fields: &'a [Field],
    events: &'a [EventRecord],
}

/// Run the status command.
pub fn run(session: &Session, args: &StatusArgs, format: OutputFormat) -> Result<(), Box<dyn Error>> {
    let network = &session.network;
    let state = network.state();
    let staking = network.staking();
    let governor = network.governor();
    let period = network.current_period();

    let fields = vec![
        Field::new("now", network.now()),
        Field::new("period", period),
        Field::new("period starts", state.clock.start_of(period)),
        Field::new("hours per period", state.clock.seconds_per_period / 3_600),
        Field::new("staking open", staking.issuer.initialized),
        Field::new("reward reserve", staking.reserved_reward()),
        Field::new("locked next period", staking.period_total(period + 1)),
        Field::new("stakers", staking.stakers.len()),
        Field::new("policies", network.policies().policies.len()),
        Field::new("auction", network.bid_phase()),
        Field::new("auction pool", network.bids().token_supply),
        Field::new(
            "governor",
            format!(
                "{} ({} of {}, nonce {})",
                governor.address,
                governor.required(),
                governor.owners().len(),
                governor.nonce()
            ),
        ),
        Field::new("staking target", state.staking.target().address),
        Field::new("policy target", state.policy.target().address),
        Field::new("adjudicator target", state.adjudicator.target().address),
        Field::new("staking dispatcher", network.component_address(Component::Staking)),
        Field::new("events", network.events().len()),
    ];

    let skip = network.events().len().saturating_sub(args.events);
    let recent = &network.events()[skip..];
    match format {
        OutputFormat::Json => {
            let report = StatusReport {
                fields: &fields,
                events: recent,
            };
            emit(format, &fields, &report);
        }
        OutputFormat::Table => {
            emit(format, &fields, &fields);
            if !recent.is_empty() {
                let rows: Vec<EventRow> = recent.iter().map(EventRow::from).collect();
                emit(format, &rows, &rows);
            }
        }
    }
    Ok(())
}
