// crates/tessera-governance/src/lib.rs
//
// tessera-governance: how the Tessera staking core changes itself.
//
// - `dispatcher`: keeps a component's storage stable while its logic is
//   swapped under a commit/reveal secret.
// - `multisig`: the N-of-M owner gate that signs those swaps and the other
//   privileged calls.

pub mod dispatcher;
pub mod multisig;

// Re-export key types for ergonomic access from downstream crates.
pub use dispatcher::{secret_hash, AuditOutcome, AuditRecord, Dispatcher};
pub use multisig::{GovernanceCall, MultiSig};
