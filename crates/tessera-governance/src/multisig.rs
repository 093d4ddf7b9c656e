// crates/tessera-governance/src/multisig.rs
//
// Multi-Owner Governor: forwards a governance call only when `required`
// distinct owners have signed it.
//
// Owners sign the transaction hash
//
//   sha256(destination || 0u128 || serde_json(payload) || nonce)
//
// where the zero is the (always empty) value transferred with the call. The
// nonce advances after each successful call, so a signature set can never
// be replayed.

use serde::{Deserialize, Serialize};

use tessera_core::crypto::{hash_parts, Keypair, Signature};
use tessera_core::error::TesseraError;
use tessera_core::identity::Address;
use tessera_core::types::Tokens;

/// A call the governor can forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GovernanceCall {
    /// Swap the destination dispatcher to the deployed logic at `target`.
    Upgrade {
        target: Address,
        secret: Vec<u8>,
        next_secret_hash: [u8; 32],
    },
    /// Restore the destination dispatcher's previous logic.
    Rollback {
        secret: Vec<u8>,
        next_secret_hash: [u8; 32],
    },
    TransferOwnership { new_owner: Address },
    /// Fund the staking reward reserve from the governor's tokens.
    InitializeStaking { reward_supply: Tokens },
    AddOwner { owner: Address },
    RemoveOwner { owner: Address },
    ChangeRequirement { required: usize },
}

impl GovernanceCall {
    /// Short name for logs and tables.
    pub fn name(&self) -> &'static str {
        match self {
            GovernanceCall::Upgrade { .. } => "upgrade",
            GovernanceCall::Rollback { .. } => "rollback",
            GovernanceCall::TransferOwnership { .. } => "transfer-ownership",
            GovernanceCall::InitializeStaking { .. } => "initialize-staking",
            GovernanceCall::AddOwner { .. } => "add-owner",
            GovernanceCall::RemoveOwner { .. } => "remove-owner",
            GovernanceCall::ChangeRequirement { .. } => "change-requirement",
        }
    }

    /// Whether the call manages the governor's own owner set.
    pub fn is_owner_management(&self) -> bool {
        matches!(
            self,
            GovernanceCall::AddOwner { .. }
                | GovernanceCall::RemoveOwner { .. }
                | GovernanceCall::ChangeRequirement { .. }
        )
    }
}

/// N-of-M signature gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiSig {
    pub address: Address,
    owners: Vec<Address>,
    required: usize,
    nonce: u64,
}

impl MultiSig {
    /// Create a governor with the given owners and threshold.
    ///
    /// # Errors
    /// Returns `TesseraError::Config` for an empty, duplicated, or zero
    /// owner list, or a threshold outside `1..=owners`.
    pub fn new(address: Address, owners: Vec<Address>, required: usize) -> Result<Self, TesseraError> {
        for (i, owner) in owners.iter().enumerate() {
            if owner.is_zero() || owners[..i].contains(owner) {
                return Err(TesseraError::Config(format!(
                    "invalid or repeated governor owner {}",
                    owner
                )));
            }
        }
        if required == 0 || required > owners.len() {
            return Err(TesseraError::Config(format!(
                "requirement {} is outside 1..={}",
                required,
                owners.len()
            )));
        }
        Ok(Self {
            address,
            owners,
            required,
            nonce: 0,
        })
    }

    pub fn owners(&self) -> &[Address] {
        &self.owners
    }

    pub fn required(&self) -> usize {
        self.required
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn is_owner(&self, account: &Address) -> bool {
        self.owners.contains(account)
    }

    /// Hash owners sign to approve `payload` at `destination` under `nonce`.
    pub fn transaction_hash(
        &self,
        destination: &Address,
        payload: &GovernanceCall,
        nonce: u64,
    ) -> Result<[u8; 32], TesseraError> {
        let data = serde_json::to_vec(payload)?;
        Ok(hash_parts(&[
            destination.as_bytes(),
            &0u128.to_be_bytes(),
            &data,
            &nonce.to_be_bytes(),
        ]))
    }

    /// Sign the hash of `payload` at the current nonce.
    pub fn sign(
        &self,
        keypair: &Keypair,
        destination: &Address,
        payload: &GovernanceCall,
    ) -> Result<Signature, TesseraError> {
        let hash = self.transaction_hash(destination, payload, self.nonce)?;
        Ok(keypair.sign(&hash))
    }

    /// Check a signature set against `payload` at the current nonce.
    ///
    /// # Errors
    /// - `QuorumNotMet` if fewer than `required` signatures are presented.
    /// - `BadSignature` if any signature does not cover this hash.
    /// - `Unauthorized` if a signer is not an owner.
    /// - `DuplicateSigner` if an owner signed twice.
    pub fn authorize(
        &self,
        signatures: &[Signature],
        destination: &Address,
        payload: &GovernanceCall,
    ) -> Result<[u8; 32], TesseraError> {
        let result = self.check_signatures(signatures, destination, payload);
        if let Err(e) = &result {
            tracing::warn!("Rejected governance call {}: {}", payload.name(), e);
        }
        result
    }

    fn check_signatures(
        &self,
        signatures: &[Signature],
        destination: &Address,
        payload: &GovernanceCall,
    ) -> Result<[u8; 32], TesseraError> {
        if signatures.len() < self.required {
            return Err(TesseraError::QuorumNotMet(format!(
                "{} of {} required signatures",
                signatures.len(),
                self.required
            )));
        }
        let hash = self.transaction_hash(destination, payload, self.nonce)?;
        let mut signers: Vec<Address> = Vec::with_capacity(signatures.len());
        for signature in signatures {
            if !matches!(signature.verify(&hash), Ok(true)) {
                return Err(TesseraError::BadSignature(format!(
                    "signature by {} does not cover nonce {}",
                    signature.signer(),
                    self.nonce
                )));
            }
            let signer = signature.signer();
            if !self.is_owner(&signer) {
                return Err(TesseraError::Unauthorized(format!(
                    "{} is not a governor owner",
                    signer
                )));
            }
            if signers.contains(&signer) {
                return Err(TesseraError::DuplicateSigner(signer.to_string()));
            }
            signers.push(signer);
        }
        Ok(hash)
    }

    /// Authorize `payload`, run `forward`, and advance the nonce if it
    /// succeeds. `forward` receives the governor itself so owner-management
    /// calls can be applied through `apply_owner_call`.
    pub fn execute<T, F>(
        &mut self,
        signatures: &[Signature],
        destination: &Address,
        payload: &GovernanceCall,
        forward: F,
    ) -> Result<T, TesseraError>
    where
        F: FnOnce(&mut MultiSig) -> Result<T, TesseraError>,
    {
        self.authorize(signatures, destination, payload)?;
        let output = forward(self)?;
        self.nonce += 1;
        tracing::info!(
            "Governance call {} executed on {} (nonce now {})",
            payload.name(),
            destination.short(),
            self.nonce
        );
        Ok(output)
    }

    /// Apply an owner-management call. Only the governor's own address may
    /// invoke this, which in practice means through `execute`.
    ///
    /// # Errors
    /// `Unauthorized` for any other caller; `InvalidState` if the change
    /// would break `1 <= required <= owners`; `NotFound` when removing a
    /// non-owner; `InvalidState` for a call that is not owner management.
    pub fn apply_owner_call(&mut self, caller: &Address, call: &GovernanceCall) -> Result<(), TesseraError> {
        if *caller != self.address {
            return Err(TesseraError::Unauthorized(format!(
                "{} is not the governor",
                caller
            )));
        }
        match call {
            GovernanceCall::AddOwner { owner } => {
                if owner.is_zero() || self.is_owner(owner) {
                    return Err(TesseraError::InvalidState(format!(
                        "{} cannot be added as an owner",
                        owner
                    )));
                }
                self.owners.push(*owner);
            }
            GovernanceCall::RemoveOwner { owner } => {
                let index = self
                    .owners
                    .iter()
                    .position(|o| o == owner)
                    .ok_or_else(|| TesseraError::NotFound(format!("{} is not an owner", owner)))?;
                if self.owners.len() - 1 < self.required {
                    return Err(TesseraError::InvalidState(format!(
                        "removing {} would leave fewer owners than the requirement {}",
                        owner, self.required
                    )));
                }
                self.owners.remove(index);
            }
            GovernanceCall::ChangeRequirement { required } => {
                if *required == 0 || *required > self.owners.len() {
                    return Err(TesseraError::InvalidState(format!(
                        "requirement {} is outside 1..={}",
                        required,
                        self.owners.len()
                    )));
                }
                self.required = *required;
            }
            other => {
                return Err(TesseraError::InvalidState(format!(
                    "{} is not an owner-management call",
                    other.name()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> Vec<Keypair> {
        (1..=5u8).map(|i| Keypair::from_seed(&[i; 32])).collect()
    }

    fn governor(keys: &[Keypair], required: usize) -> MultiSig {
        MultiSig::new(
            Address::from_label("governor"),
            keys.iter().map(|k| k.address()).collect(),
            required,
        )
        .unwrap()
    }

    fn call() -> GovernanceCall {
        GovernanceCall::InitializeStaking {
            reward_supply: 1_000,
        }
    }

    fn destination() -> Address {
        Address::from_label("staking-dispatcher")
    }

    #[test]
    fn test_new_validates_threshold() {
        let keys = keys();
        let owners: Vec<Address> = keys.iter().map(|k| k.address()).collect();
        assert!(MultiSig::new(Address::from_label("g"), owners.clone(), 0).is_err());
        assert!(MultiSig::new(Address::from_label("g"), owners.clone(), 6).is_err());
        let mut repeated = owners.clone();
        repeated.push(owners[0]);
        assert!(MultiSig::new(Address::from_label("g"), repeated, 2).is_err());
    }

    #[test]
    fn test_two_of_five_executes_once() {
        let keys = keys();
        let mut gov = governor(&keys, 2);
        let sigs = vec![
            gov.sign(&keys[0], &destination(), &call()).unwrap(),
            gov.sign(&keys[3], &destination(), &call()).unwrap(),
        ];

        let out = gov
            .execute(&sigs, &destination(), &call(), |_| Ok(42))
            .unwrap();
        assert_eq!(out, 42);
        assert_eq!(gov.nonce(), 1);

        // Replay under the advanced nonce.
        let err = gov
            .execute(&sigs, &destination(), &call(), |_| Ok(42))
            .unwrap_err();
        assert!(matches!(err, TesseraError::BadSignature(_)));
        assert_eq!(gov.nonce(), 1);
    }

    #[test]
    fn test_signature_rejections() {
        let keys = keys();
        let mut gov = governor(&keys, 2);
        let one = vec![gov.sign(&keys[0], &destination(), &call()).unwrap()];
        assert!(matches!(
            gov.execute(&one, &destination(), &call(), |_| Ok(())),
            Err(TesseraError::QuorumNotMet(_))
        ));

        let twice = vec![
            gov.sign(&keys[0], &destination(), &call()).unwrap(),
            gov.sign(&keys[0], &destination(), &call()).unwrap(),
        ];
        assert!(matches!(
            gov.execute(&twice, &destination(), &call(), |_| Ok(())),
            Err(TesseraError::DuplicateSigner(_))
        ));

        let outsider = Keypair::from_seed(&[42u8; 32]);
        let foreign = vec![
            gov.sign(&keys[0], &destination(), &call()).unwrap(),
            gov.sign(&outsider, &destination(), &call()).unwrap(),
        ];
        assert!(matches!(
            gov.execute(&foreign, &destination(), &call(), |_| Ok(())),
            Err(TesseraError::Unauthorized(_))
        ));

        // Signed for another destination.
        let elsewhere = vec![
            gov.sign(&keys[0], &Address::from_label("other"), &call()).unwrap(),
            gov.sign(&keys[1], &Address::from_label("other"), &call()).unwrap(),
        ];
        assert!(matches!(
            gov.execute(&elsewhere, &destination(), &call(), |_| Ok(())),
            Err(TesseraError::BadSignature(_))
        ));
        assert_eq!(gov.nonce(), 0);
    }

    #[test]
    fn test_failed_forward_keeps_nonce() {
        let keys = keys();
        let mut gov = governor(&keys, 2);
        let sigs = vec![
            gov.sign(&keys[0], &destination(), &call()).unwrap(),
            gov.sign(&keys[1], &destination(), &call()).unwrap(),
        ];
        let result: Result<(), TesseraError> = gov.execute(&sigs, &destination(), &call(), |_| {
            Err(TesseraError::WrongPhase("already initialized".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(gov.nonce(), 0);
        // The same signatures still work once the call can succeed.
        assert!(gov.execute(&sigs, &destination(), &call(), |_| Ok(())).is_ok());
    }

    #[test]
    fn test_owner_management_through_execute() {
        let keys = keys();
        let mut gov = governor(&keys, 2);
        let newcomer = Address::from_label("newcomer");
        let add = GovernanceCall::AddOwner { owner: newcomer };
        let me = gov.address;
        let sigs = vec![
            gov.sign(&keys[0], &me, &add).unwrap(),
            gov.sign(&keys[1], &me, &add).unwrap(),
        ];
        gov.execute(&sigs, &me, &add, |g| g.apply_owner_call(&me, &add))
            .unwrap();
        assert!(gov.is_owner(&newcomer));
        assert_eq!(gov.owners().len(), 6);

        let change = GovernanceCall::ChangeRequirement { required: 7 };
        let sigs = vec![
            gov.sign(&keys[0], &me, &change).unwrap(),
            gov.sign(&keys[1], &me, &change).unwrap(),
        ];
        assert!(matches!(
            gov.execute(&sigs, &me, &change, |g| g.apply_owner_call(&me, &change)),
            Err(TesseraError::InvalidState(_))
        ));

        // Direct calls from an owner are refused.
        assert!(matches!(
            gov.apply_owner_call(&keys[0].address(), &GovernanceCall::ChangeRequirement { required: 1 }),
            Err(TesseraError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_remove_owner_keeps_quorum_reachable() {
        let keys: Vec<Keypair> = keys().into_iter().take(2).collect();
        let mut gov = governor(&keys, 2);
        let me = gov.address;
        let remove = GovernanceCall::RemoveOwner {
            owner: keys[1].address(),
        };
        assert!(matches!(
            gov.apply_owner_call(&me, &remove),
            Err(TesseraError::InvalidState(_))
        ));
        gov.apply_owner_call(&me, &GovernanceCall::ChangeRequirement { required: 1 })
            .unwrap();
        gov.apply_owner_call(&me, &remove).unwrap();
        assert_eq!(gov.owners(), &[keys[0].address()]);
    }
}
