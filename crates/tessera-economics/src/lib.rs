// crates/tessera-economics/src/lib.rs
//
// tessera-economics: token balances, reward issuance, the Stake Ledger, and
// the Slashing Evaluator for the Tessera staking core.
//
// Token amounts are u128 base units; 1 token = 10^18 units. Logic types
// (`StakeLedger`, `Adjudicator`) hold only deployment constants and operate
// on separate state types so they can be swapped behind a dispatcher.

pub mod issuer;
pub mod params;
pub mod slashing;
pub mod staking;
pub mod token;

// Re-export key types for ergonomic access from downstream crates.
pub use issuer::Issuer;
pub use params::{EconomicsParams, SlashingParams, StandardInputs};
pub use slashing::{Adjudicator, AdjudicatorState, SlashOrder, ADJUDICATOR_SCHEMA_VERSION};
pub use staking::{
    ConfirmOutcome, LedgerView, MintOutcome, SlashOutcome, StakeLedger, StakerInfo, StakingState,
    SubStake, LEDGER_SCHEMA_VERSION,
};
pub use token::{format_units, Balances, UNITS_PER_TOKEN};
