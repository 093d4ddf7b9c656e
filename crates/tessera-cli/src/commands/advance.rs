// crates/tessera-cli/src/commands/advance.rs
//
// `tessera advance`: move the session clock forward.

use std::error::Error;

use clap::Args;

use crate::output::{emit_fields, Field, OutputFormat};
use crate::session::Session;

#[derive(Debug, Args)]
pub struct AdvanceArgs {
    /// Whole periods to skip.
    #[arg(long, default_value_t = 1)]
    pub periods: u64,

    /// Extra seconds on top of the periods.
    #[arg(long, default_value_t = 0)]
    pub seconds: u64,
}

/// Run the advance command.
pub fn run(session: &Session, args: &AdvanceArgs, format: OutputFormat) -> Result<(), Box<dyn Error>> {
    let clock = session.network.state().clock;
    let seconds = args
        .periods
        .checked_mul(clock.seconds_per_period)
        .and_then(|s| s.checked_add(args.seconds))
        .ok_or("advance overflows the clock")?;
    let before = session.network.current_period();
    session.advance(seconds);
    let after = session.network.current_period();
    tracing::info!("Clock advanced {}s: period {} -> {}", seconds, before, after);

    let fields = vec![
        Field::new("now", session.now()),
        Field::new("period", after),
        Field::new("auction", session.network.bid_phase()),
    ];
    emit_fields(format, &fields, &fields);
    Ok(())
}
