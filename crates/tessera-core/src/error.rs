// crates/tessera-core/src/error.rs
//
// Error taxonomy shared by every Tessera component. Each variant is a failure
// category surfaced synchronously to the caller; the payload carries context.

use thiserror::Error;

/// Protocol-wide error types for the Tessera staking core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TesseraError {
    /// Wrong caller for a privileged operation.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Amount outside the configured bounds.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Period count outside the configured bounds.
    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    /// No free, previously deposited balance to lock.
    #[error("Nothing to lock: {0}")]
    NothingToLock(String),

    /// Sub-stake or lock too small for the requested operation.
    #[error("Insufficient stake: {0}")]
    InsufficientStake(String),

    /// Resulting lock would be shorter than the minimum lock duration.
    #[error("Duration too short: {0}")]
    DurationTooShort(String),

    /// Withdrawal exceeds the unlocked part of a stake.
    #[error("Insufficient free balance: {0}")]
    InsufficientFreeBalance(String),

    /// A token or ether account cannot cover a transfer.
    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    /// Re-stake flag is pinned until a future period.
    #[error("Re-stake locked: {0}")]
    ReStakeLocked(String),

    /// Misbehavior evidence has already been evaluated.
    #[error("Already evaluated: {0}")]
    AlreadyEvaluated(String),

    /// The evidence oracle rejected the submitted evidence.
    #[error("Invalid evidence: {0}")]
    InvalidEvidence(String),

    /// Identifier already in use.
    #[error("Duplicate id: {0}")]
    DuplicateId(String),

    /// Node is not known to the stake ledger.
    #[error("Unregistered node: {0}")]
    UnregisteredNode(String),

    /// Zero value attached to a paid operation.
    #[error("No payment attached")]
    NoPayment,

    /// Deadline is not in the future.
    #[error("Past deadline: {0}")]
    PastDeadline(String),

    /// Per-node rate below the node's configured floor.
    #[error("Rate below minimum: {0}")]
    RateBelowMinimum(String),

    /// Payment does not divide evenly across nodes and periods.
    #[error("Non-integral rate: {0}")]
    NonIntegralRate(String),

    /// Policy or arrangement already disabled.
    #[error("Already revoked: {0}")]
    AlreadyRevoked(String),

    /// Signature does not verify against the expected signer.
    #[error("Bad signature: {0}")]
    BadSignature(String),

    /// State-machine precondition violated.
    #[error("Wrong phase: {0}")]
    WrongPhase(String),

    /// Bid allocation already claimed.
    #[error("Already claimed: {0}")]
    AlreadyClaimed(String),

    /// Caller has no bid on record.
    #[error("No bid: {0}")]
    NoBid(String),

    /// No newly completed work to refund.
    #[error("Nothing to refund: {0}")]
    NothingToRefund(String),

    /// Revealed upgrade secret does not match the committed hash.
    #[error("Bad secret: {0}")]
    BadSecret(String),

    /// Upgrade target rejected the live storage.
    #[error("Incompatible target: {0}")]
    IncompatibleTarget(String),

    /// Too few signatures for the governor's quorum.
    #[error("Quorum not met: {0}")]
    QuorumNotMet(String),

    /// The same owner signed more than once.
    #[error("Duplicate signer: {0}")]
    DuplicateSigner(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid state transition.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Cryptographic error (key parsing, signature encoding).
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration could not be loaded or is inconsistent.
    #[error("Config error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for TesseraError {
    fn from(e: serde_json::Error) -> Self {
        TesseraError::Serialization(e.to_string())
    }
}

impl From<ed25519_dalek::SignatureError> for TesseraError {
    fn from(e: ed25519_dalek::SignatureError) -> Self {
        TesseraError::Crypto(e.to_string())
    }
}

impl From<hex::FromHexError> for TesseraError {
    fn from(e: hex::FromHexError) -> Self {
        TesseraError::Serialization(format!("invalid hex: {}", e))
    }
}
