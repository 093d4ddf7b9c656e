// crates/tessera-cli/src/commands/bid.rs
//
// `tessera bid ...`: Bid Escrow commands, acting as `--from`.

use std::error::Error;

use clap::Subcommand;

use tessera_core::identity::Address;
use tessera_core::types::{Tokens, Wei};

use crate::output::{emit_fields, Field, OutputFormat};
use crate::session::{caller, Session};

/// Bid Escrow subcommands.
#[derive(Debug, Subcommand)]
pub enum BidCmd {
    /// Add tokens to the auction pool.
    DepositTokens {
        #[arg(long)]
        amount: Tokens,
    },
    /// Place or raise a bid.
    Bid {
        #[arg(long)]
        value: Wei,
    },
    /// Withdraw the whole bid while bidding is open.
    Cancel,
    /// Turn the bid into stake after bidding ends.
    Claim,
    /// Take back ether earned by completed work.
    Refund,
    /// Burn unclaimable pool tokens into the reward reserve.
    Burn,
    /// Show the auction and a bidder's position.
    Info {
        /// Bidder to show (defaults to --from).
        #[arg(long)]
        bidder: Option<Address>,
    },
}

/// Run the bid subcommand.
pub fn run(
    session: &mut Session,
    cmd: &BidCmd,
    from: Option<Address>,
    format: OutputFormat,
) -> Result<(), Box<dyn Error>> {
    let network = &mut session.network;
    match cmd {
        BidCmd::DepositTokens { amount } => {
            let me = caller(from)?;
            network.fund_auction(&me, *amount)?;
            let fields = vec![
                Field::new("deposited", amount),
                Field::new("pool", network.bids().token_supply),
            ];
            emit_fields(format, &fields, &fields);
        }
        BidCmd::Bid { value } => {
            let me = caller(from)?;
            let total = network.bid(&me, *value)?;
            let fields = vec![
                Field::new("bid", total),
                Field::new("current allocation", network.bids().eth_to_tokens(total)),
            ];
            emit_fields(format, &fields, &fields);
        }
        BidCmd::Cancel => {
            let me = caller(from)?;
            let value = network.cancel_bid(&me)?;
            let fields = vec![Field::new("returned", value)];
            emit_fields(format, &fields, &fields);
        }
        BidCmd::Claim => {
            let me = caller(from)?;
            let outcome = network.claim(&me)?;
            let fields = vec![
                Field::new("tokens", outcome.tokens),
                Field::new("free", outcome.free),
                Field::new("locked", outcome.locked),
                Field::new("locked from period", outcome.first_locked_period),
            ];
            emit_fields(format, &fields, &outcome);
        }
        BidCmd::Refund => {
            let me = caller(from)?;
            let outcome = network.refund_bid(&me)?;
            let fields = vec![
                Field::new("refund", outcome.refund),
                Field::new("remaining deposit", outcome.remaining_deposit),
                Field::new("exhausted", outcome.exhausted),
            ];
            emit_fields(format, &fields, &outcome);
        }
        BidCmd::Burn => {
            let burned = network.burn_unclaimed()?;
            let fields = vec![
                Field::new("burned", burned),
                Field::new("reward reserve", network.staking().reserved_reward()),
            ];
            emit_fields(format, &fields, &fields);
        }
        BidCmd::Info { bidder } => {
            let bids = network.bids();
            let mut fields = vec![
                Field::new("phase", network.bid_phase()),
                Field::new("pool", bids.token_supply),
                Field::new("total bids", bids.total_eth),
                Field::new("claimed", bids.claimed_tokens),
                Field::new("burned", bids.burned_tokens),
                Field::new("bidders", bids.bids.len()),
            ];
            let who = bidder.or(from);
            if let Some(who) = who {
                match bids.bid_of(&who) {
                    Some(record) => {
                        fields.push(Field::new("bidder", who));
                        fields.push(Field::new("deposit", record.deposited_eth));
                        fields.push(Field::new("claimed by bidder", record.claimed));
                        if record.claimed {
                            fields.push(Field::new("work quota", record.work_quota));
                            fields.push(Field::new("remaining work", network.remaining_work(&who)));
                        } else {
                            fields.push(Field::new(
                                "allocation",
                                bids.eth_to_tokens(record.deposited_eth),
                            ));
                        }
                    }
                    None => fields.push(Field::new("bidder", format!("{} (no bid)", who))),
                }
            }
            emit_fields(format, &fields, &fields);
        }
    }
    Ok(())
}
