//! Account ledger with per-address serialization.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};

use duelsettle_common::{Address, Amount, DuelError, Result, RoundId, ValidationError};

use crate::account::Account;
use crate::journal::{EntryReason, EntryType, JournalEntry, Posting};

/// The account ledger holds spendable balances.
///
/// Each account sits behind its own mutex. A batch of postings locks every
/// account it touches in address order, checks all postings against the
/// projected balances, and only then writes, so a batch applies fully or
/// not at all.
pub struct AccountLedger {
    /// Accounts by address.
    accounts: DashMap<Address, Arc<Mutex<Account>>>,
    /// Append-only record of applied postings.
    journal: Mutex<Vec<JournalEntry>>,
}

impl AccountLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
            journal: Mutex::new(Vec::new()),
        }
    }

    /// Fund an account from outside the ledger.
    #[instrument(skip(self))]
    pub fn deposit(&self, address: &Address, amount: Amount) -> Result<JournalEntry> {
        if !address.is_valid() {
            return Err(ValidationError::InvalidAddress(address.to_string()).into());
        }
        self.credit(address, amount, EntryReason::Deposit)
    }

    /// Debit an account (reduce balance).
    pub fn debit(
        &self,
        address: &Address,
        amount: Amount,
        reason: EntryReason,
    ) -> Result<JournalEntry> {
        self.apply_one(Posting::debit(address.clone(), amount, reason))
    }

    /// Credit an account (increase balance).
    pub fn credit(
        &self,
        address: &Address,
        amount: Amount,
        reason: EntryReason,
    ) -> Result<JournalEntry> {
        self.apply_one(Posting::credit(address.clone(), amount, reason))
    }

    /// Apply a batch of postings all-or-nothing.
    #[instrument(skip(self, postings), fields(postings = postings.len()))]
    pub fn apply(&self, postings: &[Posting]) -> Result<Vec<JournalEntry>> {
        if postings.is_empty() {
            return Ok(Vec::new());
        }
        if postings.iter().any(|p| p.amount == 0) {
            return Err(ValidationError::ZeroAmount.into());
        }

        // Lock in address order so overlapping batches cannot deadlock.
        let addresses: BTreeSet<&Address> = postings.iter().map(|p| &p.address).collect();
        self.reject_unfunded(postings, &addresses)?;
        let handles: Vec<(&Address, Arc<Mutex<Account>>)> = addresses
            .into_iter()
            .map(|address| (address, self.handle(address)))
            .collect();
        let mut guards: BTreeMap<&Address, MutexGuard<'_, Account>> = handles
            .iter()
            .map(|(address, handle)| (*address, handle.lock()))
            .collect();

        let mut projected: BTreeMap<&Address, Amount> = guards
            .iter()
            .map(|(address, account)| (*address, account.balance))
            .collect();

        for posting in postings {
            let balance = projected
                .get_mut(&posting.address)
                .ok_or_else(|| DuelError::Internal("posting account not locked".to_string()))?;
            *balance = match posting.entry_type {
                EntryType::Debit => {
                    if *balance < posting.amount {
                        warn!(
                            address = %posting.address,
                            required = posting.amount,
                            available = *balance,
                            "Insufficient funds"
                        );
                        return Err(DuelError::InsufficientFunds {
                            address: posting.address.clone(),
                            required: posting.amount,
                            available: *balance,
                        });
                    }
                    *balance - posting.amount
                }
                EntryType::Credit => balance.checked_add(posting.amount).ok_or_else(|| {
                    DuelError::Overflow(format!("credit to {}", posting.address))
                })?,
            };
        }

        // Every posting checked; from here on nothing can fail.
        let mut entries = Vec::with_capacity(postings.len());
        for posting in postings {
            let account = guards
                .get_mut(&posting.address)
                .ok_or_else(|| DuelError::Internal("posting account not locked".to_string()))?;
            let balance_after = match posting.entry_type {
                EntryType::Debit => account.balance - posting.amount,
                EntryType::Credit => account.balance + posting.amount,
            };
            account.set_balance(balance_after);
            entries.push(JournalEntry::applied(posting, balance_after));
        }

        self.journal.lock().extend(entries.iter().cloned());
        drop(guards);

        for entry in &entries {
            info!(
                address = %entry.address,
                entry_type = ?entry.entry_type,
                amount = entry.amount,
                reason = %entry.reason,
                balance_after = entry.balance_after,
                "Posting applied"
            );
        }

        Ok(entries)
    }

    /// Get the spendable balance. Unknown addresses have zero balance.
    pub fn balance(&self, address: &Address) -> Amount {
        let balance = self
            .accounts
            .get(address)
            .map(|handle| handle.lock().balance)
            .unwrap_or(0);
        debug!(address = %address, balance, "Balance read");
        balance
    }

    /// Sum of all spendable balances.
    pub fn total_balance(&self) -> u128 {
        self.accounts
            .iter()
            .map(|handle| handle.lock().balance as u128)
            .sum()
    }

    /// Journal entries referencing a round.
    pub fn entries_for_round(&self, round_id: RoundId) -> Vec<JournalEntry> {
        self.journal
            .lock()
            .iter()
            .filter(|e| e.reason.round_id() == Some(round_id))
            .cloned()
            .collect()
    }

    /// Journal entries for an address.
    pub fn entries_for_address(&self, address: &Address) -> Vec<JournalEntry> {
        self.journal
            .lock()
            .iter()
            .filter(|e| &e.address == address)
            .cloned()
            .collect()
    }

    /// Verify every account balance equals the sum of its journal entries.
    ///
    /// Only meaningful while no batches are in flight.
    pub fn verify_integrity(&self) -> bool {
        // Released before any account lock is taken; `apply` locks the other way round.
        let derived: BTreeMap<Address, i128> = {
            let journal = self.journal.lock();
            let mut derived = BTreeMap::new();
            for entry in journal.iter() {
                *derived.entry(entry.address.clone()).or_insert(0) += entry.signed_amount();
            }
            derived
        };

        self.accounts.iter().all(|handle| {
            let account = handle.lock();
            derived.get(&account.address).copied().unwrap_or(0) == account.balance as i128
        })
    }

    fn apply_one(&self, posting: Posting) -> Result<JournalEntry> {
        self.apply(std::slice::from_ref(&posting))?
            .pop()
            .ok_or_else(|| DuelError::Internal("posting produced no journal entry".to_string()))
    }

    /// An address with no account and no credit in the batch has nothing to
    /// debit. Fails before any account is created for it.
    fn reject_unfunded(&self, postings: &[Posting], addresses: &BTreeSet<&Address>) -> Result<()> {
        for address in addresses {
            if self.accounts.contains_key(*address) {
                continue;
            }
            let mut debit = None;
            for posting in postings.iter().filter(|p| &p.address == *address) {
                match posting.entry_type {
                    EntryType::Credit => {
                        debit = None;
                        break;
                    }
                    EntryType::Debit => {
                        debit.get_or_insert(posting.amount);
                    }
                }
            }
            if let Some(required) = debit {
                warn!(address = %address, required, "Debit against unknown account");
                return Err(DuelError::InsufficientFunds {
                    address: (*address).clone(),
                    required,
                    available: 0,
                });
            }
        }
        Ok(())
    }

    fn handle(&self, address: &Address) -> Arc<Mutex<Account>> {
        if let Some(handle) = self.accounts.get(address) {
            return Arc::clone(handle.value());
        }
        Arc::clone(
            self.accounts
                .entry(address.clone())
                .or_insert_with(|| Arc::new(Mutex::new(Account::new(address.clone()))))
                .value(),
        )
    }
}

impl Default for AccountLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn alice() -> Address {
        Address::new("alice")
    }

    fn bob() -> Address {
        Address::new("bob")
    }

    #[test]
    fn test_deposit_and_debit() {
        let ledger = AccountLedger::new();
        ledger.deposit(&alice(), 1_000).unwrap();

        let entry = ledger
            .debit(&alice(), 400, EntryReason::EscrowLock(RoundId::new(1)))
            .unwrap();

        assert_eq!(entry.balance_after, 600);
        assert_eq!(ledger.balance(&alice()), 600);
    }

    #[test]
    fn test_insufficient_funds_leaves_balance() {
        let ledger = AccountLedger::new();
        ledger.deposit(&alice(), 100).unwrap();

        let err = ledger
            .debit(&alice(), 101, EntryReason::EscrowLock(RoundId::new(1)))
            .unwrap_err();

        assert_eq!(
            err,
            DuelError::InsufficientFunds {
                address: alice(),
                required: 101,
                available: 100,
            }
        );
        assert_eq!(ledger.balance(&alice()), 100);
    }

    #[test]
    fn test_batch_is_all_or_nothing() {
        let ledger = AccountLedger::new();
        ledger.deposit(&alice(), 100).unwrap();
        ledger.deposit(&bob(), 5).unwrap();

        let round = RoundId::new(1);
        let batch = vec![
            Posting::credit(alice(), 50, EntryReason::Payout(round)),
            Posting::debit(bob(), 10, EntryReason::EscrowLock(round)),
        ];

        assert!(ledger.apply(&batch).is_err());
        assert_eq!(ledger.balance(&alice()), 100);
        assert_eq!(ledger.balance(&bob()), 5);
        assert!(ledger.entries_for_round(round).is_empty());
    }

    #[test]
    fn test_credit_overflow_rejected() {
        let ledger = AccountLedger::new();
        ledger.deposit(&alice(), u64::MAX).unwrap();

        let err = ledger.deposit(&alice(), 1).unwrap_err();
        assert!(matches!(err, DuelError::Overflow(_)));
        assert_eq!(ledger.balance(&alice()), u64::MAX);
    }

    #[test]
    fn test_zero_amount_rejected() {
        let ledger = AccountLedger::new();
        assert_eq!(
            ledger.deposit(&alice(), 0).unwrap_err(),
            DuelError::Validation(ValidationError::ZeroAmount)
        );
    }

    #[test]
    fn test_unknown_address_reads_zero() {
        let ledger = AccountLedger::new();
        assert_eq!(ledger.balance(&Address::new("nobody")), 0);
        assert!(!ledger.accounts.contains_key(&Address::new("nobody")));
    }

    #[test]
    fn test_failed_debit_leaves_no_account_behind() {
        let ledger = AccountLedger::new();
        let nobody = Address::new("nobody");

        let err = ledger
            .debit(&nobody, 10, EntryReason::EscrowLock(RoundId::new(1)))
            .unwrap_err();

        assert_eq!(
            err,
            DuelError::InsufficientFunds {
                address: nobody.clone(),
                required: 10,
                available: 0,
            }
        );
        assert!(!ledger.accounts.contains_key(&nobody));
        assert!(ledger.entries_for_address(&nobody).is_empty());
    }

    #[test]
    fn test_batch_may_credit_then_debit_new_account() {
        let ledger = AccountLedger::new();
        let carol = Address::new("carol");
        let round = RoundId::new(2);

        ledger
            .apply(&[
                Posting::credit(carol.clone(), 30, EntryReason::Payout(round)),
                Posting::debit(carol.clone(), 20, EntryReason::EscrowLock(round)),
            ])
            .unwrap();

        assert_eq!(ledger.balance(&carol), 10);
        assert!(ledger.verify_integrity());
    }

    #[test]
    fn test_concurrent_debits_do_not_lose_updates() {
        let ledger = AccountLedger::new();
        ledger.deposit(&alice(), 1_000).unwrap();

        std::thread::scope(|s| {
            for i in 0..8 {
                let ledger = &ledger;
                s.spawn(move || {
                    for j in 0..25 {
                        let round = RoundId::new(i * 100 + j);
                        let _ = ledger.debit(&alice(), 10, EntryReason::EscrowLock(round));
                    }
                });
            }
        });

        // 200 attempts of 10 against 1000: exactly 100 succeed.
        assert_eq!(ledger.balance(&alice()), 0);
        assert_eq!(ledger.entries_for_address(&alice()).len(), 101);
        assert!(ledger.verify_integrity());
    }

    proptest! {
        #[test]
        fn journal_matches_balances(ops in proptest::collection::vec((0u8..3, 1u64..1_000, any::<bool>()), 1..60)) {
            let ledger = AccountLedger::new();
            let addresses = [alice(), bob(), Address::new("carol")];
            for (who, amount, is_credit) in ops {
                let address = &addresses[who as usize];
                let _ = if is_credit {
                    ledger.deposit(address, amount)
                } else {
                    ledger.debit(address, amount, EntryReason::EscrowLock(RoundId::new(1)))
                };
            }
            prop_assert!(ledger.verify_integrity());
        }
    }
}
