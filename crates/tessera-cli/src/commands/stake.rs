// crates/tessera-cli/src/commands/stake.rs
//
// `tessera stake ...`: Stake Ledger commands, acting as `--from`.

use std::error::Error;

use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use tessera_core::identity::Address;
use tessera_core::types::{Period, Tokens};
use tessera_economics::staking::SubStake;

use super::Toggle;
use crate::output::{emit, emit_fields, Field, OutputFormat};
use crate::session::{caller, Session};

/// Staking subcommands.
#[derive(Debug, Subcommand)]
pub enum StakeCmd {
    /// Deposit tokens and lock them from next period.
    Deposit {
        #[arg(long)]
        amount: Tokens,
        /// Lock duration in periods.
        #[arg(long)]
        periods: u32,
    },
    /// Lock already-deposited free tokens.
    Lock {
        #[arg(long)]
        amount: Tokens,
        #[arg(long)]
        periods: u32,
    },
    /// Split a sub-stake; the new part ends `extra-periods` later.
    Divide {
        #[arg(long)]
        index: usize,
        #[arg(long)]
        amount: Tokens,
        #[arg(long)]
        extra_periods: u32,
    },
    /// Extend a sub-stake.
    Prolong {
        #[arg(long)]
        index: usize,
        #[arg(long)]
        extra_periods: u32,
    },
    /// Bond a worker address that confirms activity for the staker.
    BondWorker {
        #[arg(long)]
        worker: Address,
    },
    /// Confirm activity for next period (as the staker or its worker).
    Confirm,
    /// Mint rewards for elapsed confirmed periods.
    Mint,
    /// Withdraw free tokens.
    Withdraw {
        #[arg(long)]
        amount: Tokens,
    },
    /// Turn re-staking of rewards on or off, optionally pinning it on.
    Restake {
        #[arg(value_enum)]
        mode: Toggle,
        /// Keep re-staking on until this period.
        #[arg(long)]
        lock_until: Option<Period>,
    },
    /// Stop sub-stakes from rolling forward on each confirmation.
    WindDown {
        #[arg(value_enum)]
        mode: Toggle,
    },
    /// Show a staker's balances and sub-stakes.
    Info {
        /// Staker to show (defaults to --from).
        #[arg(long)]
        staker: Option<Address>,
    },
}

#[derive(Debug, Serialize, Tabled)]
struct SubStakeRow {
    index: usize,
    first_period: Period,
    last_period: Period,
    locked: Tokens,
}

fn sub_stake_fields(sub: &SubStake) -> Vec<Field> {
    vec![
        Field::new("first period", sub.first_period),
        Field::new("last period", sub.last_period),
        Field::new("locked", sub.locked),
    ]
}

/// Run the stake subcommand.
pub fn run(
    session: &mut Session,
    cmd: &StakeCmd,
    from: Option<Address>,
    format: OutputFormat,
) -> Result<(), Box<dyn Error>> {
    if let StakeCmd::Info { staker } = cmd {
        let staker = match staker {
            Some(s) => *s,
            None => caller(from)?,
        };
        return info(session, &staker, format);
    }

    let me = caller(from)?;
    let network = &mut session.network;
    match cmd {
        StakeCmd::Deposit { amount, periods } => {
            let sub = network.deposit(&me, *amount, *periods)?;
            emit_fields(format, &sub_stake_fields(&sub), &sub);
        }
        StakeCmd::Lock { amount, periods } => {
            let sub = network.lock(&me, *amount, *periods)?;
            emit_fields(format, &sub_stake_fields(&sub), &sub);
        }
        StakeCmd::Divide {
            index,
            amount,
            extra_periods,
        } => {
            let sub = network.divide_stake(&me, *index, *amount, *extra_periods)?;
            emit_fields(format, &sub_stake_fields(&sub), &sub);
        }
        StakeCmd::Prolong {
            index,
            extra_periods,
        } => {
            let sub = network.prolong_stake(&me, *index, *extra_periods)?;
            emit_fields(format, &sub_stake_fields(&sub), &sub);
        }
        StakeCmd::BondWorker { worker } => {
            network.bond_worker(&me, worker)?;
            let fields = vec![Field::new("staker", me), Field::new("worker", worker)];
            emit_fields(format, &fields, &fields);
        }
        StakeCmd::Confirm => {
            let committed = network.confirm_activity(&me)?;
            let fields = vec![Field::new(
                "committed period",
                committed.map_or_else(|| "already confirmed".to_string(), |p| p.to_string()),
            )];
            emit_fields(format, &fields, &committed);
        }
        StakeCmd::Mint => {
            let minted = network.mint(&me)?;
            let fields = vec![
                Field::new("periods", format!("{:?}", minted.periods)),
                Field::new("reward", minted.reward),
            ];
            emit_fields(format, &fields, &minted);
        }
        StakeCmd::Withdraw { amount } => {
            network.withdraw(&me, *amount)?;
            let fields = vec![
                Field::new("withdrawn", amount),
                Field::new("wallet", network.token_balance(&me)),
            ];
            emit_fields(format, &fields, &fields);
        }
        StakeCmd::Restake { mode, lock_until } => {
            match (mode, lock_until) {
                (Toggle::On, Some(until)) => network.lock_restake(&me, *until)?,
                (Toggle::Off, Some(_)) => {
                    return Err("--lock-until only applies when turning re-stake on".into())
                }
                (mode, None) => network.set_restake(&me, mode.enabled())?,
            }
            let fields = vec![
                Field::new("restake", mode.enabled()),
                Field::new(
                    "locked until",
                    lock_until.map_or_else(|| "-".to_string(), |p| p.to_string()),
                ),
            ];
            emit_fields(format, &fields, &fields);
        }
        StakeCmd::WindDown { mode } => {
            network.set_wind_down(&me, mode.enabled())?;
            let fields = vec![Field::new("wind down", mode.enabled())];
            emit_fields(format, &fields, &fields);
        }
        StakeCmd::Info { .. } => {}
    }
    Ok(())
}

fn info(session: &Session, staker: &Address, format: OutputFormat) -> Result<(), Box<dyn Error>> {
    let network = &session.network;
    let ledger = network.staking();
    let info = ledger
        .staker(staker)
        .ok_or_else(|| format!("{} has never staked", staker))?;
    let current = network.current_period();

    let fields = vec![
        Field::new("staker", staker),
        Field::new("value", info.value),
        Field::new("locked now", info.locked_in(current)),
        Field::new("locked next", info.locked_in(current + 1)),
        Field::new("free", info.free_balance(current)),
        Field::new("rewards", info.reward),
        Field::new("completed work", info.completed_work),
        Field::new("restake", !info.restake_disabled),
        Field::new("restake pinned until", info.lock_restake_until),
        Field::new("wind down", info.wind_down),
        Field::new(
            "worker",
            info.worker.map_or_else(|| "-".to_string(), |w| w.to_string()),
        ),
        Field::new(
            "last active",
            info.last_active_period
                .map_or_else(|| "-".to_string(), |p| p.to_string()),
        ),
        Field::new("pending periods", info.pending_periods.len()),
        Field::new("wallet", network.token_balance(staker)),
        Field::new("fees owed", network.policies().fee_of(staker)),
    ];
    match format {
        OutputFormat::Json => emit(format, &fields, info),
        OutputFormat::Table => {
            emit(format, &fields, info);
            let rows: Vec<SubStakeRow> = info
                .sub_stakes
                .iter()
                .enumerate()
                .map(|(index, sub)| SubStakeRow {
                    index,
                    first_period: sub.first_period,
                    last_period: sub.last_period,
                    locked: sub.locked,
                })
                .collect();
            if !rows.is_empty() {
                emit(format, &rows, &rows);
            }
        }
    }
    Ok(())
}
