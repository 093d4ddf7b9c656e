// crates/tessera-core/src/types.rs
//
// Scalar aliases and small records shared between components.

use serde::{Deserialize, Serialize};

use crate::identity::Address;

/// Index of a fixed-length time bucket. Period 0 starts at genesis.
pub type Period = u32;

/// Token amount in base units.
pub type Tokens = u128;

/// Ether amount in wei.
pub type Wei = u128;

/// Unix timestamp in seconds.
pub type Timestamp = u64;

/// An inclusive range of periods in which a staker did not confirm activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Downtime {
    pub start_period: Period,
    pub end_period: Period,
}

impl Downtime {
    /// Number of periods of this downtime that fall inside `[from, to]`.
    pub fn overlap(&self, from: Period, to: Period) -> u32 {
        let start = self.start_period.max(from);
        let end = self.end_period.min(to);
        if start > end {
            0
        } else {
            end - start + 1
        }
    }
}

/// Evidence that a worker produced an incorrect re-encryption.
///
/// The payload is opaque to the core; only the oracle interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    /// Worker (or staker) address that signed the faulty output.
    pub offender: Address,
    /// Serialized capsule, fragment, and proof material.
    pub payload: Vec<u8>,
}
