// crates/tessera-cli/src/commands/mod.rs
//
// Command module declarations for the Tessera CLI.

pub mod advance;
pub mod bid;
pub mod fund;
pub mod init;
pub mod policy;
pub mod stake;
pub mod status;

use clap::ValueEnum;

/// `on` / `off` switch argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

impl Toggle {
    pub fn enabled(self) -> bool {
        self == Toggle::On
    }
}
