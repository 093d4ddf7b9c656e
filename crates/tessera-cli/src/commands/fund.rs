// crates/tessera-cli/src/commands/fund.rs
//
// `tessera fund ...`: hand out tokens from the distributor and mint test
// ether, so local accounts have something to stake and pay with.

use std::error::Error;

use clap::Subcommand;

use tessera_core::identity::Address;

use crate::output::{emit_fields, Field, OutputFormat};
use crate::session::Session;

#[derive(Debug, Subcommand)]
pub enum FundCmd {
    /// Transfer tokens from the distributor.
    Tokens {
        #[arg(long)]
        to: Address,
        #[arg(long)]
        amount: u128,
    },
    /// Credit ether.
    Ether {
        #[arg(long)]
        to: Address,
        #[arg(long)]
        amount: u128,
    },
}

/// Run the fund subcommand.
pub fn run(session: &mut Session, cmd: &FundCmd, format: OutputFormat) -> Result<(), Box<dyn Error>> {
    let network = &mut session.network;
    let fields = match cmd {
        FundCmd::Tokens { to, amount } => {
            network.fund_tokens(to, *amount)?;
            vec![
                Field::new("account", to),
                Field::new("tokens", network.token_balance(to)),
                Field::new(
                    "distributor left",
                    network.token_balance(&network.state().distributor),
                ),
            ]
        }
        FundCmd::Ether { to, amount } => {
            network.fund_ether(to, *amount)?;
            vec![
                Field::new("account", to),
                Field::new("ether", network.ether_balance(to)),
            ]
        }
    };
    emit_fields(format, &fields, &fields);
    Ok(())
}
