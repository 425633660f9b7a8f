//! Gateway that executes calls against a local engine.
//!
//! Transactions apply at submission. Their confirmation becomes visible after
//! a configurable delay, and can be dropped entirely to reproduce an
//! ambiguous timeout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use duelsettle_common::{
    now, Address, Amount, DuelError, Result, RoundId, RoundView, Timestamp, TxHash,
};
use duelsettle_crypto::Transcript;
use duelsettle_engine::DuelEngine;

use crate::gateway::{Call, CallOutput, LedgerGateway, TxReceipt, TxStatus};

/// Injected faults and latencies.
#[derive(Debug, Clone, Default)]
struct FaultPlan {
    /// Delay before a submission is accepted.
    submit_delay: Duration,
    /// Delay between execution and visible confirmation.
    confirmation_delay: Duration,
    /// Upcoming submissions whose confirmation is never reported.
    drop_confirmations: usize,
}

struct TxRecord {
    status: TxStatus,
    visible_at: Instant,
    dropped: bool,
}

/// In-process ledger gateway backed by a [`DuelEngine`].
pub struct InProcessGateway {
    engine: Arc<DuelEngine>,
    transactions: DashMap<TxHash, TxRecord>,
    nonce: AtomicU64,
    faults: Mutex<FaultPlan>,
}

impl InProcessGateway {
    pub fn new(engine: Arc<DuelEngine>) -> Self {
        Self {
            engine,
            transactions: DashMap::new(),
            nonce: AtomicU64::new(0),
            faults: Mutex::new(FaultPlan::default()),
        }
    }

    /// Delay every confirmation by `delay`.
    pub fn with_confirmation_delay(self, delay: Duration) -> Self {
        self.faults.lock().confirmation_delay = delay;
        self
    }

    /// Delay acceptance of every submission by `delay`.
    pub fn set_submit_delay(&self, delay: Duration) {
        self.faults.lock().submit_delay = delay;
    }

    /// Execute the next `count` submissions without ever confirming them.
    pub fn drop_next_confirmations(&self, count: usize) {
        self.faults.lock().drop_confirmations = count;
    }

    pub fn engine(&self) -> &Arc<DuelEngine> {
        &self.engine
    }

    /// Number of submitted transactions.
    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    fn tx_hash(&self, sender: &Address, call: &Call) -> Result<TxHash> {
        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst);
        let payload = serde_json::to_vec(call)
            .map_err(|e| DuelError::Internal(format!("encode call: {}", e)))?;

        let mut transcript = Transcript::new("duelsettle/tx/v1");
        transcript
            .append_u64(nonce)
            .append(sender.as_str().as_bytes())
            .append(&payload);
        Ok(TxHash::new(format!("0x{}", transcript.finish_hex())))
    }

    fn execute(&self, sender: &Address, call: &Call) -> Result<CallOutput> {
        match *call {
            Call::CreateRound { stake, private } => {
                let round_id = self.engine.create_round(sender, stake, private)?;
                Ok(CallOutput::RoundCreated { round_id })
            }
            Call::EnterRound { stake, round_id } => {
                self.engine.enter_round(round_id, sender, stake)?;
                Ok(CallOutput::RoundEntered { round_id })
            }
            Call::EndRound { round_id } => {
                let outcome = self.engine.end_round(round_id, sender)?;
                Ok(CallOutput::RoundEnded { outcome })
            }
            Call::CancelRound { round_id } => {
                self.engine.cancel_round(round_id, sender)?;
                Ok(CallOutput::RoundCancelled { round_id })
            }
        }
    }
}

#[async_trait]
impl LedgerGateway for InProcessGateway {
    async fn fund_account(&self, address: &Address, amount: Amount) -> Result<Amount> {
        self.engine.fund(address, amount)
    }

    async fn balance(&self, address: &Address) -> Result<Amount> {
        Ok(self.engine.balance(address))
    }

    #[instrument(skip(self, call), fields(sender = %sender, kind = %call.kind()))]
    async fn submit(&self, sender: &Address, call: Call) -> Result<TxHash> {
        let plan = self.faults.lock().clone();
        if !plan.submit_delay.is_zero() {
            tokio::time::sleep(plan.submit_delay).await;
        }

        let tx_hash = self.tx_hash(sender, &call)?;
        let submitted_at: Timestamp = now();

        let status = match self.execute(sender, &call) {
            Ok(output) => TxStatus::Confirmed(TxReceipt {
                tx_hash: tx_hash.clone(),
                sender: sender.clone(),
                call,
                output,
                submitted_at,
                confirmed_at: now(),
            }),
            Err(e) => TxStatus::Reverted(e),
        };

        let dropped = {
            let mut faults = self.faults.lock();
            if faults.drop_confirmations > 0 {
                faults.drop_confirmations -= 1;
                true
            } else {
                false
            }
        };
        if dropped {
            warn!(tx_hash = %tx_hash, "Confirmation will be dropped");
        }

        info!(
            tx_hash = %tx_hash,
            reverted = matches!(status, TxStatus::Reverted(_)),
            "Transaction submitted"
        );
        self.transactions.insert(
            tx_hash.clone(),
            TxRecord {
                status,
                visible_at: Instant::now() + plan.confirmation_delay,
                dropped,
            },
        );
        Ok(tx_hash)
    }

    async fn transaction_status(&self, tx_hash: &TxHash) -> Result<TxStatus> {
        let record = self
            .transactions
            .get(tx_hash)
            .ok_or_else(|| DuelError::Gateway(format!("unknown transaction {}", tx_hash)))?;

        if record.dropped || Instant::now() < record.visible_at {
            debug!(tx_hash = %tx_hash, "Transaction pending");
            return Ok(TxStatus::Pending);
        }
        Ok(record.status.clone())
    }

    async fn get_round_info(&self, round_id: RoundId) -> Result<RoundView> {
        self.engine.get_round_info(round_id)
    }
}
