// crates/tessera-governance/src/dispatcher.rs
//
// Upgrade Proxy: owns a component's storage and the logic currently
// operating on it, and swaps that logic under a commit/reveal secret.
//
// Every upgrade or rollback must reveal the preimage of the stored secret
// hash and commit a fresh hash for the next one, so a leaked or replayed
// call cannot be used twice. The candidate logic must accept the existing
// storage (`Upgradeable::verify_state`) before it becomes active, and it
// finalizes the storage (`finish_upgrade`) once it is.

use std::fmt;
use std::mem;

use serde::{Deserialize, Serialize};

use tessera_core::crypto::hash_bytes;
use tessera_core::error::TesseraError;
use tessera_core::identity::Address;
use tessera_core::traits::Upgradeable;

/// Hash to commit for a future upgrade secret.
pub fn secret_hash(secret: &[u8]) -> [u8; 32] {
    hash_bytes(secret)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditOutcome {
    StateVerified,
    UpgradeFinished,
    Upgraded,
    RolledBack,
    OwnershipTransferred,
}

/// One entry of a dispatcher's audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Logic target (or new owner) the entry is about.
    pub subject: Address,
    /// Caller that triggered it.
    pub actor: Address,
    pub outcome: AuditOutcome,
}

/// Persistent storage plus the logic currently bound to it.
#[derive(Serialize, Deserialize)]
#[serde(bound(
    serialize = "L: Serialize, L::State: Serialize",
    deserialize = "L: Deserialize<'de>, L::State: Deserialize<'de>"
))]
pub struct Dispatcher<L: Upgradeable> {
    /// Stable address of the component, independent of the logic version.
    pub address: Address,
    owner: Address,
    target: L,
    previous: Option<L>,
    secret_hash: [u8; 32],
    storage: L::State,
    audit: Vec<AuditRecord>,
}

impl<L> Clone for Dispatcher<L>
where
    L: Upgradeable,
    L::State: Clone,
{
    fn clone(&self) -> Self {
        Self {
            address: self.address,
            owner: self.owner,
            target: self.target.clone(),
            previous: self.previous.clone(),
            secret_hash: self.secret_hash,
            storage: self.storage.clone(),
            audit: self.audit.clone(),
        }
    }
}

impl<L> fmt::Debug for Dispatcher<L>
where
    L: Upgradeable + fmt::Debug,
    L::State: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("address", &self.address)
            .field("owner", &self.owner)
            .field("target", &self.target)
            .field("previous", &self.previous)
            .field("storage", &self.storage)
            .finish()
    }
}

impl<L: Upgradeable> Dispatcher<L> {
    /// Bind `target` to `storage`.
    ///
    /// # Errors
    /// Returns `TesseraError::IncompatibleTarget` if `target` rejects the
    /// storage.
    pub fn new(
        address: Address,
        owner: Address,
        target: L,
        mut storage: L::State,
        secret_hash: [u8; 32],
    ) -> Result<Self, TesseraError> {
        target.verify_state(&storage)?;
        target.finish_upgrade(&mut storage);
        let subject = target.target();
        let mut dispatcher = Self {
            address,
            owner,
            target,
            previous: None,
            secret_hash,
            storage,
            audit: Vec::new(),
        };
        dispatcher.record(subject, owner, AuditOutcome::StateVerified);
        dispatcher.record(subject, owner, AuditOutcome::UpgradeFinished);
        Ok(dispatcher)
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    /// Logic currently operating on the storage.
    pub fn target(&self) -> &L {
        &self.target
    }

    /// Logic that `rollback` would restore.
    pub fn previous(&self) -> Option<&L> {
        self.previous.as_ref()
    }

    pub fn storage(&self) -> &L::State {
        &self.storage
    }

    /// Active logic together with mutable storage, for running an operation.
    pub fn split_mut(&mut self) -> (&L, &mut L::State) {
        (&self.target, &mut self.storage)
    }

    pub fn secret_hash(&self) -> [u8; 32] {
        self.secret_hash
    }

    pub fn audit_log(&self) -> &[AuditRecord] {
        &self.audit
    }

    /// Replace the active logic with `new_target`.
    ///
    /// # Errors
    /// - `Unauthorized` if `caller` is not the owner.
    /// - `BadSecret` if `secret` does not match the committed hash or
    ///   `next_secret_hash` repeats it.
    /// - `IncompatibleTarget` if `new_target` is already active or rejects
    ///   the storage.
    pub fn upgrade(
        &mut self,
        caller: &Address,
        new_target: L,
        secret: &[u8],
        next_secret_hash: [u8; 32],
    ) -> Result<(), TesseraError> {
        self.require_owner(caller)?;
        self.check_secret(secret, &next_secret_hash)?;
        let subject = new_target.target();
        if subject == self.target.target() {
            return Err(TesseraError::IncompatibleTarget(format!(
                "{} is already the active target",
                subject
            )));
        }
        new_target.verify_state(&self.storage)?;
        self.record(subject, *caller, AuditOutcome::StateVerified);

        let old = mem::replace(&mut self.target, new_target);
        self.previous = Some(old);
        self.secret_hash = next_secret_hash;
        self.target.finish_upgrade(&mut self.storage);
        self.record(subject, *caller, AuditOutcome::UpgradeFinished);
        self.record(subject, *caller, AuditOutcome::Upgraded);
        Ok(())
    }

    /// Restore the previous logic.
    ///
    /// # Errors
    /// `Unauthorized` and `BadSecret` as for `upgrade`; `NotFound` if there
    /// is nothing to roll back to; `IncompatibleTarget` if the active logic
    /// rejects the storage.
    pub fn rollback(
        &mut self,
        caller: &Address,
        secret: &[u8],
        next_secret_hash: [u8; 32],
    ) -> Result<(), TesseraError> {
        self.require_owner(caller)?;
        self.check_secret(secret, &next_secret_hash)?;
        if self.previous.is_none() {
            return Err(TesseraError::NotFound(format!(
                "dispatcher {} has no previous target",
                self.address
            )));
        }
        self.target.verify_state(&self.storage)?;
        self.record(self.target.target(), *caller, AuditOutcome::StateVerified);

        let Some(restored) = self.previous.take() else {
            return Err(TesseraError::InvalidState(
                "previous target vanished during rollback".to_string(),
            ));
        };
        self.target = restored;
        self.secret_hash = next_secret_hash;
        let subject = self.target.target();
        self.record(subject, *caller, AuditOutcome::RolledBack);
        self.target.finish_upgrade(&mut self.storage);
        self.record(subject, *caller, AuditOutcome::UpgradeFinished);
        Ok(())
    }

    /// Hand the dispatcher to `new_owner`.
    pub fn transfer_ownership(&mut self, caller: &Address, new_owner: Address) -> Result<(), TesseraError> {
        self.require_owner(caller)?;
        if new_owner.is_zero() {
            return Err(TesseraError::InvalidState(
                "owner cannot be the zero address".to_string(),
            ));
        }
        self.owner = new_owner;
        self.record(new_owner, *caller, AuditOutcome::OwnershipTransferred);
        Ok(())
    }

    fn require_owner(&self, caller: &Address) -> Result<(), TesseraError> {
        if *caller != self.owner {
            tracing::warn!(
                "Rejected dispatcher call on {} from non-owner {}",
                self.address.short(),
                caller.short()
            );
            return Err(TesseraError::Unauthorized(format!(
                "{} does not own dispatcher {}",
                caller, self.address
            )));
        }
        Ok(())
    }

    fn check_secret(&self, secret: &[u8], next_secret_hash: &[u8; 32]) -> Result<(), TesseraError> {
        if secret_hash(secret) != self.secret_hash {
            tracing::warn!("Rejected dispatcher call on {}: wrong secret", self.address.short());
            return Err(TesseraError::BadSecret(
                "secret does not match the committed hash".to_string(),
            ));
        }
        if *next_secret_hash == self.secret_hash {
            return Err(TesseraError::BadSecret(
                "next secret hash must differ from the current one".to_string(),
            ));
        }
        Ok(())
    }

    fn record(&mut self, subject: Address, actor: Address, outcome: AuditOutcome) {
        tracing::info!(
            "Dispatcher {}: {:?} for {} by {}",
            self.address.short(),
            outcome,
            subject.short(),
            actor.short()
        );
        self.audit.push(AuditRecord {
            subject,
            actor,
            outcome,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        schema_version: u32,
        value: u64,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct CounterLogic {
        address: Address,
        version: u32,
    }

    impl CounterLogic {
        fn v(version: u32) -> Self {
            Self {
                address: Address::from_label(&format!("counter-v{}", version)),
                version,
            }
        }

        fn increment(&self, state: &mut Counter) {
            state.value += self.version as u64;
        }
    }

    impl Upgradeable for CounterLogic {
        type State = Counter;

        fn target(&self) -> Address {
            self.address
        }

        fn schema_version(&self) -> u32 {
            self.version
        }

        fn verify_state(&self, state: &Counter) -> Result<(), TesseraError> {
            if state.schema_version > self.version {
                return Err(TesseraError::IncompatibleTarget(format!(
                    "schema {} is newer than {}",
                    state.schema_version, self.version
                )));
            }
            Ok(())
        }

        fn finish_upgrade(&self, state: &mut Counter) {
            state.schema_version = self.version;
        }
    }

    fn owner() -> Address {
        Address::from_label("owner")
    }

    fn dispatcher() -> Dispatcher<CounterLogic> {
        Dispatcher::new(
            Address::from_label("counter"),
            owner(),
            CounterLogic::v(1),
            Counter {
                schema_version: 0,
                value: 0,
            },
            secret_hash(b"s1"),
        )
        .unwrap()
    }

    #[test]
    fn test_construction_finishes_upgrade() {
        let d = dispatcher();
        assert_eq!(d.storage().schema_version, 1);
        let outcomes: Vec<AuditOutcome> = d.audit_log().iter().map(|r| r.outcome).collect();
        assert_eq!(
            outcomes,
            vec![AuditOutcome::StateVerified, AuditOutcome::UpgradeFinished]
        );
    }

    #[test]
    fn test_upgrade_keeps_storage() {
        let mut d = dispatcher();
        {
            let (logic, storage) = d.split_mut();
            logic.increment(storage);
        }
        d.upgrade(&owner(), CounterLogic::v(2), b"s1", secret_hash(b"s2"))
            .unwrap();
        assert_eq!(d.target().version, 2);
        assert_eq!(d.storage().value, 1);
        assert_eq!(d.storage().schema_version, 2);
        let (logic, storage) = d.split_mut();
        logic.increment(storage);
        assert_eq!(d.storage().value, 3);
        assert_eq!(d.audit_log().last().unwrap().outcome, AuditOutcome::Upgraded);
    }

    #[test]
    fn test_upgrade_rejections() {
        let mut d = dispatcher();
        assert!(matches!(
            d.upgrade(&Address::from_label("mallory"), CounterLogic::v(2), b"s1", secret_hash(b"s2")),
            Err(TesseraError::Unauthorized(_))
        ));
        assert!(matches!(
            d.upgrade(&owner(), CounterLogic::v(2), b"wrong", secret_hash(b"s2")),
            Err(TesseraError::BadSecret(_))
        ));
        assert!(matches!(
            d.upgrade(&owner(), CounterLogic::v(2), b"s1", secret_hash(b"s1")),
            Err(TesseraError::BadSecret(_))
        ));
        assert!(matches!(
            d.upgrade(&owner(), CounterLogic::v(1), b"s1", secret_hash(b"s2")),
            Err(TesseraError::IncompatibleTarget(_))
        ));
        assert_eq!(d.target().version, 1);
        assert_eq!(d.secret_hash(), secret_hash(b"s1"));
    }

    #[test]
    fn test_upgrade_to_older_schema_rejected() {
        let mut d = dispatcher();
        d.upgrade(&owner(), CounterLogic::v(3), b"s1", secret_hash(b"s2"))
            .unwrap();
        let err = d
            .upgrade(&owner(), CounterLogic::v(2), b"s2", secret_hash(b"s3"))
            .unwrap_err();
        assert!(matches!(err, TesseraError::IncompatibleTarget(_)));
    }

    #[test]
    fn test_rollback_restores_previous() {
        let mut d = dispatcher();
        assert!(matches!(
            d.rollback(&owner(), b"s1", secret_hash(b"s2")),
            Err(TesseraError::NotFound(_))
        ));
        d.upgrade(&owner(), CounterLogic::v(2), b"s1", secret_hash(b"s2"))
            .unwrap();
        // Consumed secret no longer works.
        assert!(matches!(
            d.rollback(&owner(), b"s1", secret_hash(b"s3")),
            Err(TesseraError::BadSecret(_))
        ));
        d.rollback(&owner(), b"s2", secret_hash(b"s3")).unwrap();
        assert_eq!(d.target().version, 1);
        assert!(d.previous().is_none());
        assert_eq!(d.storage().schema_version, 1);
        let tail: Vec<AuditOutcome> = d.audit_log()[d.audit_log().len() - 3..]
            .iter()
            .map(|r| r.outcome)
            .collect();
        assert_eq!(
            tail,
            vec![
                AuditOutcome::StateVerified,
                AuditOutcome::RolledBack,
                AuditOutcome::UpgradeFinished
            ]
        );
    }

    #[test]
    fn test_transfer_ownership() {
        let mut d = dispatcher();
        let new_owner = Address::from_label("governor");
        d.transfer_ownership(&owner(), new_owner).unwrap();
        assert_eq!(d.owner(), new_owner);
        assert!(matches!(
            d.upgrade(&owner(), CounterLogic::v(2), b"s1", secret_hash(b"s2")),
            Err(TesseraError::Unauthorized(_))
        ));
        assert!(d
            .upgrade(&new_owner, CounterLogic::v(2), b"s1", secret_hash(b"s2"))
            .is_ok());
    }

    #[test]
    fn test_serde_round_trip_preserves_binding() {
        let d = dispatcher();
        let json = serde_json::to_string(&d).unwrap();
        let back: Dispatcher<CounterLogic> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.target(), d.target());
        assert_eq!(back.secret_hash(), d.secret_hash());
        assert_eq!(back.audit_log(), d.audit_log());
    }
}
