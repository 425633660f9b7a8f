//! DuelSettle Ledger
//!
//! Account balances with all-or-nothing posting batches, and the escrow
//! vault that holds stakes locked against open rounds.

pub mod account;
pub mod journal;
pub mod ledger;
pub mod escrow;

pub use account::Account;
pub use journal::{EntryReason, EntryType, JournalEntry, Posting};
pub use ledger::AccountLedger;
pub use escrow::{EscrowEntry, EscrowVault, ReleaseInstruction, ReleaseOutcome};
