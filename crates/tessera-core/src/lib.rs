// crates/tessera-core/src/lib.rs
//
// tessera-core: Core types, error taxonomy, period clock, and crypto
// primitives for the Tessera staking core.
//
// This is the leaf crate that all other crates in the workspace depend on.

pub mod clock;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod math;
pub mod traits;
pub mod types;

// Re-export key types for ergonomic access from downstream crates.
// Usage: `use tessera_core::Address;`

// Identity types
pub use identity::{Address, PolicyId};

// Scalars and shared records
pub use types::{Downtime, Evidence, Period, Timestamp, Tokens, Wei};

// Time
pub use clock::{ManualClock, PeriodClock, SystemClock};

// Crypto
pub use crypto::{Keypair, Signature};

// Error type
pub use error::TesseraError;

// Traits
pub use traits::{EvidenceOracle, NodeActivity, TimeSource, Upgradeable};
