// crates/tessera-economics/src/token.rs
//
// Fungible balances keyed by account address.
//
// The same book is used twice by the network: once for the staking token and
// once for ether. Component accounts (the stake ledger, the escrows, the
// governor) hold balances like any other address, so every transfer between
// a user and a component is explicit.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use tessera_core::error::TesseraError;
use tessera_core::identity::Address;

/// Number of base units in one whole token (18 decimals).
pub const UNITS_PER_TOKEN: u128 = 1_000_000_000_000_000_000;

/// An account-to-amount book with a conserved total.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balances {
    /// Short label used in error messages ("token", "ether").
    pub unit: String,
    accounts: BTreeMap<Address, u128>,
    total: u128,
}

impl Balances {
    /// Create an empty book for the given unit label.
    pub fn new(unit: &str) -> Self {
        Self {
            unit: unit.to_string(),
            accounts: BTreeMap::new(),
            total: 0,
        }
    }

    /// Create new units out of thin air and credit them to `to`.
    ///
    /// Used at genesis to seed the token supply and, for ether, to fund
    /// participants from outside the system.
    pub fn issue(&mut self, to: &Address, amount: u128) {
        *self.accounts.entry(*to).or_insert(0) += amount;
        self.total = self.total.saturating_add(amount);
    }

    /// Move `amount` from `from` to `to`.
    ///
    /// # Errors
    /// Returns `TesseraError::InsufficientBalance` if `from` holds less than
    /// `amount`. No balance changes in that case.
    pub fn transfer(&mut self, from: &Address, to: &Address, amount: u128) -> Result<(), TesseraError> {
        if amount == 0 {
            return Ok(());
        }
        let available = self.balance_of(from);
        if available < amount {
            return Err(TesseraError::InsufficientBalance(format!(
                "{} holds {} {} but {} is required",
                from, available, self.unit, amount
            )));
        }
        if let Some(balance) = self.accounts.get_mut(from) {
            *balance -= amount;
        }
        *self.accounts.entry(*to).or_insert(0) += amount;
        Ok(())
    }

    /// Balance held by `account` (zero if unknown).
    pub fn balance_of(&self, account: &Address) -> u128 {
        self.accounts.get(account).copied().unwrap_or(0)
    }

    /// Sum of every balance ever issued.
    pub fn total(&self) -> u128 {
        self.total
    }

    /// All non-zero accounts, ordered by address.
    pub fn accounts(&self) -> impl Iterator<Item = (&Address, &u128)> {
        self.accounts.iter().filter(|(_, v)| **v > 0)
    }
}

/// Render a base-unit amount as whole tokens with up to 18 decimals,
/// trimming trailing zeros.
pub fn format_units(amount: u128) -> String {
    let whole = amount / UNITS_PER_TOKEN;
    let frac = amount % UNITS_PER_TOKEN;
    if frac == 0 {
        return whole.to_string();
    }
    let frac_str = format!("{:018}", frac);
    format!("{}.{}", whole, frac_str.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Address {
        Address::from_label("alice")
    }

    fn bob() -> Address {
        Address::from_label("bob")
    }

    #[test]
    fn test_issue_and_transfer() {
        let mut book = Balances::new("token");
        book.issue(&alice(), 1_000);
        book.transfer(&alice(), &bob(), 400).unwrap();

        assert_eq!(book.balance_of(&alice()), 600);
        assert_eq!(book.balance_of(&bob()), 400);
        assert_eq!(book.total(), 1_000);
    }

    #[test]
    fn test_transfer_insufficient_balance() {
        let mut book = Balances::new("ether");
        book.issue(&alice(), 10);
        let err = book.transfer(&alice(), &bob(), 11).unwrap_err();
        assert!(matches!(err, TesseraError::InsufficientBalance(_)));
        assert_eq!(book.balance_of(&alice()), 10);
        assert_eq!(book.balance_of(&bob()), 0);
    }

    #[test]
    fn test_zero_transfer_is_noop() {
        let mut book = Balances::new("token");
        assert!(book.transfer(&alice(), &bob(), 0).is_ok());
        assert_eq!(book.accounts().count(), 0);
    }

    #[test]
    fn test_format_units() {
        assert_eq!(format_units(0), "0");
        assert_eq!(format_units(15_000 * UNITS_PER_TOKEN), "15000");
        assert_eq!(format_units(UNITS_PER_TOKEN / 2), "0.5");
        assert_eq!(format_units(1), "0.000000000000000001");
    }
}
