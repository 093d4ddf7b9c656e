// crates/tessera-core/src/traits.rs
//
// Seams to external collaborators: the time source, the evidence oracle,
// and the read-only view of node activity the Policy Escrow consults.

use crate::error::TesseraError;
use crate::identity::Address;
use crate::types::{Downtime, Evidence, Period, Timestamp};

/// Source of the current wall-clock time.
///
/// Implemented by `SystemClock` and `ManualClock`.
pub trait TimeSource: Send + Sync {
    /// Current unix timestamp in seconds.
    fn now(&self) -> Timestamp;
}

/// External judge of misbehavior evidence.
///
/// Implemented by the node software's re-encryption verifier; the core only
/// needs a boolean verdict.
pub trait EvidenceOracle: Send + Sync {
    /// Returns `true` if `evidence` proves the offender misbehaved.
    fn proves_misbehavior(&self, evidence: &Evidence) -> Result<bool, TesseraError>;
}

/// Read-only view of a node's participation history.
///
/// Implemented by the Stake Ledger's `LedgerView`.
pub trait NodeActivity {
    /// Whether the node has ever deposited stake.
    fn is_registered(&self, node: &Address) -> bool;

    /// Recorded gaps in the node's activity confirmations.
    fn past_downtime(&self, node: &Address) -> Vec<Downtime>;

    /// Latest period the node has confirmed activity for, if any.
    fn last_active_period(&self, node: &Address) -> Option<Period>;
}

/// Logic that can be installed behind an upgrade dispatcher.
///
/// The dispatcher owns `State` and swaps implementations of this trait
/// without touching it. Implemented by the Stake Ledger, Policy Escrow, and
/// Slashing Evaluator logic types.
pub trait Upgradeable: Clone {
    /// Storage this logic reads and writes.
    type State;

    /// Address identifying this logic version.
    fn target(&self) -> Address;

    /// Storage schema this logic writes.
    fn schema_version(&self) -> u32;

    /// Migration precondition: can this logic operate on `state`?
    ///
    /// # Errors
    /// Returns `TesseraError::IncompatibleTarget` if the storage was written
    /// by a newer schema or fails this version's consistency checks.
    fn verify_state(&self, state: &Self::State) -> Result<(), TesseraError>;

    /// Finalize storage after this logic becomes the active target.
    fn finish_upgrade(&self, state: &mut Self::State);
}
