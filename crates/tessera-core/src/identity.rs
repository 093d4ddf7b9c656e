// crates/tessera-core/src/identity.rs
//
// Account and policy identifiers.
//
// An Address is a 20-byte account key. Human accounts derive it from an
// ed25519 public key; component accounts (escrows, dispatchers, the governor)
// derive it from a fixed label so they are stable across restarts.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::crypto::hash_bytes;
use crate::error::TesseraError;

/// A 20-byte account identifier, displayed as `0x`-prefixed hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// The zero address, used as "no account".
    pub const ZERO: Address = Address([0u8; 20]);

    /// Derive an address from an ed25519 public key: the last 20 bytes of
    /// `sha256(public_key)`.
    pub fn from_public_key(public_key: &[u8; 32]) -> Self {
        let digest = hash_bytes(public_key);
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest[12..]);
        Address(out)
    }

    /// Derive a deterministic address from a label such as `"staking-escrow"`.
    pub fn from_label(label: &str) -> Self {
        let digest = hash_bytes(label.as_bytes());
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest[..20]);
        Address(out)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Short form for log lines: first four bytes.
    pub fn short(&self) -> String {
        format!("0x{}", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = TesseraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(trimmed)?;
        let array: [u8; 20] = bytes.as_slice().try_into().map_err(|_| {
            TesseraError::Serialization(format!(
                "address must be 20 bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Address(array))
    }
}

// Addresses are used as JSON map keys, so they serialize as strings.
impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Unique identifier of a policy in the Policy Escrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PolicyId(pub Uuid);

impl PolicyId {
    /// Generate a fresh time-ordered policy id.
    pub fn generate() -> Self {
        PolicyId(Uuid::now_v7())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        PolicyId(Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PolicyId {
    type Err = TesseraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(PolicyId)
            .map_err(|e| TesseraError::Serialization(format!("invalid policy id: {}", e)))
    }
}
