// crates/tessera-node/src/lib.rs
//
// tessera-node: the `Network` facade that runs every Tessera component as a
// single serialized state machine, plus its TOML configuration and event log.

pub mod config;
pub mod events;
pub mod network;

// Re-export key types for ergonomic access from downstream crates.
pub use config::{BidEscrowConfig, EconomicsConfig, GovernanceConfig, NetworkConfig, SlashingConfig};
pub use events::{EventRecord, NetworkEvent};
pub use network::{Component, DeployedLogic, FixedVerdict, Network, NetworkState};
