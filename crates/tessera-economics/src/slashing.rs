// crates/tessera-economics/src/slashing.rs
//
// Slashing Evaluator.
//
// Evidence of misbehavior is judged once per incident. The incident key is
// sha256(offender || payload), so resubmitting the same evidence, by anyone,
// fails with AlreadyEvaluated. Whether the evidence actually proves anything
// is decided by an injected EvidenceOracle.
//
// The penalty grows with the staker's offense history:
//
//   penalty = base_penalty + penalty_history_coefficient * prior_offenses
//
// capped at value / percentage_penalty_coefficient, and the investigator
// receives penalty / reward_coefficient of it.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use tessera_core::crypto::hash_parts;
use tessera_core::error::TesseraError;
use tessera_core::identity::Address;
use tessera_core::traits::{EvidenceOracle, Upgradeable};
use tessera_core::types::{Evidence, Tokens};

use crate::params::SlashingParams;
use crate::staking::StakingState;

/// Storage schema written by this evaluator version.
pub const ADJUDICATOR_SCHEMA_VERSION: u32 = 1;

/// Persistent storage of the Slashing Evaluator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjudicatorState {
    pub schema_version: u32,
    /// Keys of incidents already evaluated.
    pub evaluated: BTreeSet<[u8; 32]>,
    /// Offense count per staker.
    pub penalty_history: BTreeMap<Address, u32>,
}

impl AdjudicatorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_evaluated(&self, incident: &[u8; 32]) -> bool {
        self.evaluated.contains(incident)
    }

    pub fn offenses(&self, staker: &Address) -> u32 {
        self.penalty_history.get(staker).copied().unwrap_or(0)
    }
}

/// What the evaluator decided; the caller hands it to `StakeLedger::slash_staker`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashOrder {
    pub incident: [u8; 32],
    pub staker: Address,
    pub penalty: Tokens,
    pub investigator: Address,
    pub reward: Tokens,
}

/// Slashing Evaluator logic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjudicator {
    /// Address identifying this logic version.
    pub address: Address,
    pub version: u32,
    pub params: SlashingParams,
}

impl Adjudicator {
    pub fn new(address: Address, params: SlashingParams) -> Self {
        Self {
            address,
            version: ADJUDICATOR_SCHEMA_VERSION,
            params,
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Key identifying an incident.
    pub fn incident_hash(evidence: &Evidence) -> [u8; 32] {
        hash_parts(&[evidence.offender.as_bytes(), &evidence.payload])
    }

    /// Penalty for `staker` holding `value`, given its offense history.
    pub fn penalty_for(&self, state: &AdjudicatorState, staker: &Address, value: Tokens) -> Tokens {
        let prior = state.offenses(staker) as u128;
        let penalty = self
            .params
            .base_penalty
            .saturating_add(self.params.penalty_history_coefficient.saturating_mul(prior));
        match value.checked_div(self.params.percentage_penalty_coefficient) {
            Some(cap) => penalty.min(cap),
            None => penalty,
        }
    }

    /// Judge `evidence` submitted by `investigator` and record the incident.
    ///
    /// The offender may be a bonded worker or a staker; the penalty falls on
    /// the staker either way. The returned order must be executed against the
    /// Stake Ledger in the same transaction.
    ///
    /// # Errors
    /// - `AlreadyEvaluated` if this incident was judged before.
    /// - `InvalidEvidence` if the oracle rejects the evidence.
    /// - `NotFound` if the offender maps to no staker.
    ///
    /// A staker with nothing left is still judged: the penalty clamps to
    /// zero and the offense counts toward later penalties.
    pub fn evaluate(
        &self,
        state: &mut AdjudicatorState,
        ledger: &StakingState,
        oracle: &dyn EvidenceOracle,
        investigator: &Address,
        evidence: &Evidence,
    ) -> Result<SlashOrder, TesseraError> {
        let incident = Self::incident_hash(evidence);
        if state.is_evaluated(&incident) {
            return Err(TesseraError::AlreadyEvaluated(hex::encode(incident)));
        }
        if !oracle.proves_misbehavior(evidence)? {
            return Err(TesseraError::InvalidEvidence(format!(
                "evidence against {} does not prove misbehavior",
                evidence.offender
            )));
        }

        let staker = ledger
            .staker_from_worker(&evidence.offender)
            .or_else(|| {
                ledger
                    .staker(&evidence.offender)
                    .map(|_| evidence.offender)
            })
            .ok_or_else(|| {
                TesseraError::NotFound(format!("{} is not a staker or worker", evidence.offender))
            })?;
        let value = ledger.all_tokens(&staker);
        let penalty = self.penalty_for(state, &staker, value);
        let reward = penalty
            .checked_div(self.params.reward_coefficient)
            .unwrap_or(0);

        state.evaluated.insert(incident);
        *state.penalty_history.entry(staker).or_insert(0) += 1;

        tracing::info!(
            "Incident {} evaluated: {} penalized {} tokens",
            hex::encode(&incident[..4]),
            staker.short(),
            penalty
        );
        Ok(SlashOrder {
            incident,
            staker,
            penalty,
            investigator: *investigator,
            reward,
        })
    }
}

impl Upgradeable for Adjudicator {
    type State = AdjudicatorState;

    fn target(&self) -> Address {
        self.address
    }

    fn schema_version(&self) -> u32 {
        self.version
    }

    fn verify_state(&self, state: &AdjudicatorState) -> Result<(), TesseraError> {
        if state.schema_version > self.version {
            return Err(TesseraError::IncompatibleTarget(format!(
                "adjudicator storage is schema {} but target {} writes schema {}",
                state.schema_version, self.address, self.version
            )));
        }
        Ok(())
    }

    fn finish_upgrade(&self, state: &mut AdjudicatorState) {
        state.schema_version = self.version;
    }
}
