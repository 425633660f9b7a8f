//! Account definitions for ledger.

use chrono::{DateTime, Utc};
use duelsettle_common::{Address, Amount};
use serde::{Deserialize, Serialize};

/// A ledger account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Account address.
    pub address: Address,
    /// Spendable balance. Escrowed stakes are not included.
    pub balance: Amount,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
    /// When the account was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a new empty account.
    pub fn new(address: Address) -> Self {
        let now = Utc::now();

        Self {
            address,
            balance: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn set_balance(&mut self, balance: Amount) {
        self.balance = balance;
        self.updated_at = Utc::now();
    }
}
