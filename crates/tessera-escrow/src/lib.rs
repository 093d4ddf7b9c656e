// crates/tessera-escrow/src/lib.rs
//
// tessera-escrow: the two ether-holding components of the Tessera staking
// core.
//
// - `policy`: prepaid per-period payments from sponsors to staked nodes,
//   with revocation and downtime refunds.
// - `worklock`: a token auction whose proceeds are returned to bidders as
//   their claimed stake completes work.

pub mod policy;
pub mod worklock;

// Re-export key types for ergonomic access from downstream crates.
pub use policy::{
    Arrangement, NodeFeeInfo, Policy, PolicyEscrow, PolicyState, RevokeOutcome,
    POLICY_SCHEMA_VERSION,
};
pub use worklock::{
    BidEscrow, BidEscrowParams, BidEscrowState, BidPhase, BidRecord, ClaimOutcome, RefundOutcome,
    SLOWING_REFUND,
};
