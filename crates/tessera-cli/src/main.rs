// crates/tessera-cli/src/main.rs
//
// CLI entrypoint for driving a Tessera network from the shell.
//
// Each invocation loads the persisted network, runs one command against it
// and writes the state back. A failed command leaves the state file as it
// was.

mod commands;
mod output;
mod session;

use clap::{Parser, Subcommand};
use commands::advance::AdvanceArgs;
use commands::bid::BidCmd;
use commands::fund::FundCmd;
use commands::init::InitArgs;
use commands::policy::PolicyCmd;
use commands::stake::StakeCmd;
use commands::status::StatusArgs;
use output::OutputFormat;
use session::Session;
use tessera_core::identity::Address;
use tessera_node::NetworkConfig;

/// Tessera CLI: staking, policy payments and the token auction on a local
/// network.
#[derive(Parser, Debug)]
#[command(
    name = "tessera",
    version = "0.1.0",
    about = "Drive a local Tessera staking network: stake, pay for policies, bid for tokens"
)]
struct Cli {
    /// Network configuration (TOML).
    #[arg(long, global = true, default_value = "tessera.toml")]
    config: String,

    /// Persisted network state (JSON).
    #[arg(long, global = true, default_value = "tessera-state.json")]
    state: String,

    /// Governance owner keys written by `init`.
    #[arg(long, global = true, default_value = "tessera-keys.json")]
    keys: String,

    /// Address the command acts as.
    #[arg(long, global = true)]
    from: Option<Address>,

    /// Print JSON instead of tables.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Write a config and owner keys, deploy the network and open staking.
    Init(InitArgs),

    /// Show the clock, reserves, governance and recent events.
    Status(StatusArgs),

    /// Move the network clock forward.
    Advance(AdvanceArgs),

    /// Stake Ledger: deposits, locks, activity and rewards.
    #[command(subcommand)]
    Stake(StakeCmd),

    /// Policy Escrow: pay nodes for a policy, revoke and refund it.
    #[command(subcommand)]
    Policy(PolicyCmd),

    /// Bid Escrow: the ether-for-stake token auction.
    #[command(subcommand)]
    Bid(BidCmd),

    /// Credit tokens from the distributor or mint test ether.
    #[command(subcommand)]
    Fund(FundCmd),
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG wins, then the configured level.
    let level = NetworkConfig::load(&cli.config)
        .map(|c| c.log_level)
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let format = OutputFormat::from_flag(cli.json);

    if let Commands::Init(args) = &cli.command {
        return commands::init::run(&cli.config, &cli.state, &cli.keys, args, format);
    }

    let mut session = Session::open(&cli.config, &cli.state)?;
    match &cli.command {
        Commands::Init(_) => {}
        Commands::Status(args) => commands::status::run(&session, args, format)?,
        Commands::Advance(args) => commands::advance::run(&session, args, format)?,
        Commands::Stake(cmd) => commands::stake::run(&mut session, cmd, cli.from, format)?,
        Commands::Policy(cmd) => commands::policy::run(&mut session, cmd, cli.from, format)?,
        Commands::Bid(cmd) => commands::bid::run(&mut session, cmd, cli.from, format)?,
        Commands::Fund(cmd) => commands::fund::run(&mut session, cmd, format)?,
    }
    session.save()
}
