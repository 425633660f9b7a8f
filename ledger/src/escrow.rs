//! Escrow of stakes locked against rounds.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use duelsettle_common::{
    checked_sum, Address, Amount, DuelError, OperationKind, Result, RoundId, ValidationError,
};

use crate::journal::{EntryReason, JournalEntry, Posting};
use crate::ledger::AccountLedger;

/// Funds one participant locked against a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowEntry {
    /// Round the stake is locked against.
    pub round_id: RoundId,
    /// Account the stake was taken from.
    pub address: Address,
    /// Amount locked.
    pub amount: Amount,
    /// Flips to true exactly once, on refund or payout.
    pub released: bool,
    /// When the stake was locked.
    pub locked_at: DateTime<Utc>,
    /// When the stake was released.
    pub released_at: Option<DateTime<Utc>>,
}

/// A credit to make out of released escrow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInstruction {
    /// Account to credit.
    pub destination: Address,
    /// Amount to credit.
    pub amount: Amount,
    /// Journal reason for the credit.
    pub reason: EntryReason,
}

impl ReleaseInstruction {
    pub fn new(destination: Address, amount: Amount, reason: EntryReason) -> Self {
        Self {
            destination,
            amount,
            reason,
        }
    }
}

/// Result of a release call.
#[derive(Debug, Clone)]
pub enum ReleaseOutcome {
    /// Entries released now; the applied credits.
    Released(Vec<JournalEntry>),
    /// Entries were released by an earlier call; nothing moved.
    AlreadyReleased,
}

impl ReleaseOutcome {
    pub fn is_already_released(&self) -> bool {
        matches!(self, ReleaseOutcome::AlreadyReleased)
    }
}

/// Vault holding stakes against rounds, on top of the account ledger.
///
/// Locking debits the owner's spendable balance; releasing credits one or
/// more destinations. Releases are idempotent per round entry.
pub struct EscrowVault {
    /// Ledger holding spendable balances.
    ledger: Arc<AccountLedger>,
    /// Entries by round, in locking order (creator first).
    entries: DashMap<RoundId, Vec<EscrowEntry>>,
}

impl EscrowVault {
    /// Create a vault over the given ledger.
    pub fn new(ledger: Arc<AccountLedger>) -> Self {
        Self {
            ledger,
            entries: DashMap::new(),
        }
    }

    /// The ledger this vault draws from.
    pub fn ledger(&self) -> &Arc<AccountLedger> {
        &self.ledger
    }

    /// Lock `amount` from `address` against a round.
    #[instrument(skip(self), fields(round_id = %round_id, address = %address))]
    pub fn lock(&self, round_id: RoundId, address: &Address, amount: Amount) -> Result<EscrowEntry> {
        if amount == 0 {
            return Err(ValidationError::ZeroAmount.into());
        }

        let mut slot = self.entries.entry(round_id).or_default();
        if slot.iter().any(|e| &e.address == address) {
            warn!(round_id = %round_id, address = %address, "Duplicate escrow lock");
            return Err(DuelError::Conflict {
                round_id,
                operation: OperationKind::Enter,
            });
        }

        if let Err(e) = self
            .ledger
            .debit(address, amount, EntryReason::EscrowLock(round_id))
        {
            let empty = slot.is_empty();
            drop(slot);
            if empty {
                self.entries.remove_if(&round_id, |_, entries| entries.is_empty());
            }
            return Err(e);
        }

        let entry = EscrowEntry {
            round_id,
            address: address.clone(),
            amount,
            released: false,
            locked_at: Utc::now(),
            released_at: None,
        };
        slot.push(entry.clone());

        info!(round_id = %round_id, address = %address, amount, "Stake locked");
        Ok(entry)
    }

    /// Release one participant's entry, crediting `destination`.
    ///
    /// Releasing an entry that is already released is a no-op.
    #[instrument(skip(self, reason), fields(round_id = %round_id))]
    pub fn release(
        &self,
        round_id: RoundId,
        owner: &Address,
        destination: &Address,
        amount: Amount,
        reason: EntryReason,
    ) -> Result<ReleaseOutcome> {
        let mut slot = self.entries.get_mut(&round_id).ok_or_else(|| {
            DuelError::Internal(format!("no escrow held for round {}", round_id))
        })?;
        let entry = slot
            .iter_mut()
            .find(|e| &e.address == owner)
            .ok_or_else(|| {
                DuelError::Internal(format!("no escrow for {} in round {}", owner, round_id))
            })?;

        if entry.released {
            info!(round_id = %round_id, owner = %owner, "Escrow already released");
            return Ok(ReleaseOutcome::AlreadyReleased);
        }
        if entry.amount != amount {
            return Err(DuelError::Internal(format!(
                "release of {} does not match escrowed {} for {}",
                amount, entry.amount, owner
            )));
        }

        let credit = self.ledger.credit(destination, amount, reason)?;
        entry.released = true;
        entry.released_at = Some(Utc::now());

        info!(
            round_id = %round_id,
            owner = %owner,
            destination = %destination,
            amount,
            "Escrow released"
        );
        Ok(ReleaseOutcome::Released(vec![credit]))
    }

    /// Release every entry of a round, crediting all instructions as one unit.
    ///
    /// The instructions must add up to the escrowed total. If the round's
    /// entries were already released, nothing moves.
    #[instrument(skip(self, instructions), fields(round_id = %round_id))]
    pub fn release_all(
        &self,
        round_id: RoundId,
        instructions: &[ReleaseInstruction],
    ) -> Result<ReleaseOutcome> {
        let mut slot = self.entries.get_mut(&round_id).ok_or_else(|| {
            DuelError::Internal(format!("no escrow held for round {}", round_id))
        })?;

        if slot.iter().all(|e| e.released) {
            info!(round_id = %round_id, "Escrow already released");
            return Ok(ReleaseOutcome::AlreadyReleased);
        }
        if slot.iter().any(|e| e.released) {
            return Err(DuelError::Internal(format!(
                "round {} escrow partially released",
                round_id
            )));
        }

        let held = checked_sum(slot.iter().map(|e| e.amount))
            .ok_or_else(|| DuelError::Overflow(format!("escrow total for round {}", round_id)))?;
        let requested = checked_sum(instructions.iter().map(|i| i.amount))
            .ok_or_else(|| DuelError::Overflow(format!("release total for round {}", round_id)))?;
        if held != requested {
            return Err(DuelError::Internal(format!(
                "release of {} does not match escrowed {} for round {}",
                requested, held, round_id
            )));
        }

        let postings: Vec<Posting> = instructions
            .iter()
            .filter(|i| i.amount > 0)
            .map(|i| Posting::credit(i.destination.clone(), i.amount, i.reason))
            .collect();
        let credits = self.ledger.apply(&postings)?;

        let now = Utc::now();
        for entry in slot.iter_mut() {
            entry.released = true;
            entry.released_at = Some(now);
        }

        info!(
            round_id = %round_id,
            amount = held,
            credits = credits.len(),
            "Round escrow released"
        );
        Ok(ReleaseOutcome::Released(credits))
    }

    /// Entries for a round.
    pub fn entries(&self, round_id: RoundId) -> Vec<EscrowEntry> {
        self.entries
            .get(&round_id)
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Unreleased amount held for a round.
    pub fn escrowed(&self, round_id: RoundId) -> Amount {
        self.entries
            .get(&round_id)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| !e.released)
                    .map(|e| e.amount)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Unreleased amount held across all rounds.
    pub fn total_escrowed(&self) -> u128 {
        self.entries
            .iter()
            .flat_map(|entries| {
                entries
                    .iter()
                    .filter(|e| !e.released)
                    .map(|e| e.amount as u128)
                    .collect::<Vec<_>>()
            })
            .sum()
    }
}
