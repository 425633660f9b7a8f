//! The ledger gateway boundary.
//!
//! Writes are submitted as transactions and confirm asynchronously. A caller
//! only relies on a state change after its transaction is confirmed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use duelsettle_common::{
    Address, Amount, DuelError, IdempotencyKey, OperationKind, Result, RoundId, RoundOutcome,
    RoundView, Timestamp, TxHash,
};

/// A state-mutating call submitted by a sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum Call {
    CreateRound { stake: Amount, private: bool },
    EnterRound { stake: Amount, round_id: RoundId },
    EndRound { round_id: RoundId },
    CancelRound { round_id: RoundId },
}

impl Call {
    pub fn kind(&self) -> OperationKind {
        match self {
            Call::CreateRound { .. } => OperationKind::Create,
            Call::EnterRound { .. } => OperationKind::Enter,
            Call::EndRound { .. } => OperationKind::Resolve,
            Call::CancelRound { .. } => OperationKind::Cancel,
        }
    }

    /// Key under which this call may be resubmitted. `None` for calls that
    /// are not safe to repeat.
    pub fn idempotency_key(&self) -> Option<IdempotencyKey> {
        let round_id = match *self {
            Call::CreateRound { .. } => return None,
            Call::EnterRound { round_id, .. }
            | Call::EndRound { round_id }
            | Call::CancelRound { round_id } => round_id,
        };
        let kind = self.kind();
        kind.is_idempotent().then(|| IdempotencyKey::new(round_id, kind))
    }
}

/// What a confirmed call produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CallOutput {
    RoundCreated { round_id: RoundId },
    RoundEntered { round_id: RoundId },
    RoundEnded { outcome: RoundOutcome },
    RoundCancelled { round_id: RoundId },
}

/// Confirmation record for a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub sender: Address,
    pub call: Call,
    pub output: CallOutput,
    pub submitted_at: Timestamp,
    pub confirmed_at: Timestamp,
}

impl TxReceipt {
    /// Round created by this transaction, if it was a create.
    pub fn created_round(&self) -> Option<RoundId> {
        match self.output {
            CallOutput::RoundCreated { round_id } => Some(round_id),
            _ => None,
        }
    }
}

/// Observed state of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    /// Not yet confirmed.
    Pending,
    /// Confirmed and applied.
    Confirmed(TxReceipt),
    /// Confirmed but rejected; nothing was applied.
    Reverted(DuelError),
}

/// Boundary to the ledger holding balances and rounds.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Credit an account from outside the system. Returns the new balance.
    async fn fund_account(&self, address: &Address, amount: Amount) -> Result<Amount>;

    /// Spendable balance of an account.
    async fn balance(&self, address: &Address) -> Result<Amount>;

    /// Submit a call. Returns as soon as the transaction is accepted.
    async fn submit(&self, sender: &Address, call: Call) -> Result<TxHash>;

    /// Current status of a submitted transaction.
    async fn transaction_status(&self, tx_hash: &TxHash) -> Result<TxStatus>;

    /// Public fields of a round.
    async fn get_round_info(&self, round_id: RoundId) -> Result<RoundView>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotency_keys() {
        let round_id = RoundId::new(3);
        assert_eq!(
            Call::EndRound { round_id }.idempotency_key(),
            Some(IdempotencyKey::new(round_id, OperationKind::Resolve))
        );
        assert!(Call::CancelRound { round_id }.idempotency_key().is_some());
        assert!(Call::EnterRound { stake: 1, round_id }.idempotency_key().is_none());
        assert!(Call::CreateRound { stake: 1, private: false }
            .idempotency_key()
            .is_none());
    }

    #[test]
    fn test_call_json() {
        let call = Call::EnterRound {
            stake: 10_000,
            round_id: RoundId::new(1),
        };
        let json = serde_json::to_value(&call).unwrap();
        assert_eq!(json["call"], "enter_round");
        assert_eq!(json["round_id"], 1);
    }
}
