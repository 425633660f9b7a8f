//! Journal entries recording every balance movement.

use chrono::{DateTime, Utc};
use duelsettle_common::{Address, Amount, RoundId};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Direction of a balance movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    /// Balance decreases.
    Debit,
    /// Balance increases.
    Credit,
}

/// Why a balance moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "round_id", rename_all = "snake_case")]
pub enum EntryReason {
    /// External funding (faucet).
    Deposit,
    /// Stake moved into escrow.
    EscrowLock(RoundId),
    /// Stake returned to its owner.
    Refund(RoundId),
    /// Pot paid to the winner.
    Payout(RoundId),
    /// Protocol fee paid to the fee sink.
    Fee(RoundId),
}

impl EntryReason {
    /// Round this movement belongs to, if any.
    pub fn round_id(&self) -> Option<RoundId> {
        match *self {
            EntryReason::Deposit => None,
            EntryReason::EscrowLock(id)
            | EntryReason::Refund(id)
            | EntryReason::Payout(id)
            | EntryReason::Fee(id) => Some(id),
        }
    }
}

impl fmt::Display for EntryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryReason::Deposit => write!(f, "deposit"),
            EntryReason::EscrowLock(id) => write!(f, "escrow-lock:{}", id),
            EntryReason::Refund(id) => write!(f, "refund:{}", id),
            EntryReason::Payout(id) => write!(f, "payout:{}", id),
            EntryReason::Fee(id) => write!(f, "fee:{}", id),
        }
    }
}

/// A requested balance movement, applied as part of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    pub address: Address,
    pub entry_type: EntryType,
    pub amount: Amount,
    pub reason: EntryReason,
}

impl Posting {
    /// Create a debit posting.
    pub fn debit(address: Address, amount: Amount, reason: EntryReason) -> Self {
        Self {
            address,
            entry_type: EntryType::Debit,
            amount,
            reason,
        }
    }

    /// Create a credit posting.
    pub fn credit(address: Address, amount: Amount, reason: EntryReason) -> Self {
        Self {
            address,
            entry_type: EntryType::Credit,
            amount,
            reason,
        }
    }
}

/// A single applied journal entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Unique entry ID.
    pub id: Uuid,
    /// Account affected.
    pub address: Address,
    /// Entry type (debit or credit).
    pub entry_type: EntryType,
    /// Amount.
    pub amount: Amount,
    /// Why the balance moved.
    pub reason: EntryReason,
    /// Balance after this entry.
    pub balance_after: Amount,
    /// When this entry was created.
    pub created_at: DateTime<Utc>,
}

impl JournalEntry {
    pub(crate) fn applied(posting: &Posting, balance_after: Amount) -> Self {
        Self {
            id: Uuid::now_v7(),
            address: posting.address.clone(),
            entry_type: posting.entry_type,
            amount: posting.amount,
            reason: posting.reason,
            balance_after,
            created_at: Utc::now(),
        }
    }

    /// Signed effect on the account balance.
    pub fn signed_amount(&self) -> i128 {
        match self.entry_type {
            EntryType::Debit => -(self.amount as i128),
            EntryType::Credit => self.amount as i128,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_round_reference() {
        assert_eq!(EntryReason::Deposit.round_id(), None);
        assert_eq!(
            EntryReason::Payout(RoundId::new(4)).round_id(),
            Some(RoundId::new(4))
        );
        assert_eq!(EntryReason::Fee(RoundId::new(4)).to_string(), "fee:4");
    }

    #[test]
    fn test_signed_amount() {
        let debit = JournalEntry::applied(
            &Posting::debit(Address::new("alice"), 10, EntryReason::Deposit),
            0,
        );
        let credit = JournalEntry::applied(
            &Posting::credit(Address::new("alice"), 10, EntryReason::Deposit),
            10,
        );
        assert_eq!(debit.signed_amount(), -10);
        assert_eq!(credit.signed_amount(), 10);
    }
}
