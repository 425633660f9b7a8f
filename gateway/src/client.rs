//! Confirmation-aware client over a [`LedgerGateway`].

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use duelsettle_common::{
    Address, Amount, DuelError, Result, RoundId, RoundOutcome, RoundView, Timeout, TxHash,
};

use crate::config::GatewayConfig;
use crate::gateway::{Call, CallOutput, LedgerGateway, TxReceipt, TxStatus};

/// Client that bounds every gateway call, waits for confirmations and
/// resubmits idempotent calls after a timeout.
pub struct GatewayClient {
    gateway: Arc<dyn LedgerGateway>,
    config: GatewayConfig,
}

impl GatewayClient {
    /// Create a client. Fails if the configuration is invalid.
    pub fn new(gateway: Arc<dyn LedgerGateway>, config: GatewayConfig) -> Result<Self> {
        config.validate().map_err(DuelError::Configuration)?;
        Ok(Self { gateway, config })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Fund an account. Returns the new balance.
    pub async fn fund(&self, address: &Address, amount: Amount) -> Result<Amount> {
        self.bounded("fund_account", self.gateway.fund_account(address, amount))
            .await
    }

    pub async fn balance(&self, address: &Address) -> Result<Amount> {
        self.bounded("balance", self.gateway.balance(address)).await
    }

    pub async fn get_round_info(&self, round_id: RoundId) -> Result<RoundView> {
        self.bounded("get_round_info", self.gateway.get_round_info(round_id))
            .await
    }

    /// Create a round and wait until it is confirmed.
    pub async fn create_round(
        &self,
        sender: &Address,
        stake: Amount,
        private: bool,
    ) -> Result<RoundId> {
        let receipt = self
            .execute(sender, Call::CreateRound { stake, private })
            .await?;
        receipt.created_round().ok_or_else(|| {
            DuelError::Gateway(format!("create confirmed without a round id: {}", receipt.tx_hash))
        })
    }

    /// Enter a round and wait until it is confirmed.
    pub async fn enter_round(
        &self,
        sender: &Address,
        round_id: RoundId,
        stake: Amount,
    ) -> Result<TxReceipt> {
        self.execute(sender, Call::EnterRound { stake, round_id })
            .await
    }

    /// End a round and return the recorded outcome.
    pub async fn end_round(&self, sender: &Address, round_id: RoundId) -> Result<RoundOutcome> {
        let receipt = self.execute(sender, Call::EndRound { round_id }).await?;
        match receipt.output {
            CallOutput::RoundEnded { outcome } => Ok(outcome),
            other => Err(DuelError::Gateway(format!(
                "end_round confirmed with unexpected output {:?}",
                other
            ))),
        }
    }

    /// Cancel a round and wait until it is confirmed.
    pub async fn cancel_round(&self, sender: &Address, round_id: RoundId) -> Result<TxReceipt> {
        self.execute(sender, Call::CancelRound { round_id }).await
    }

    /// Submit a call and wait for its confirmation.
    ///
    /// Idempotent calls are resubmitted under their idempotency key when the
    /// gateway times out; any other call surfaces the timeout.
    #[instrument(skip(self, call), fields(sender = %sender, kind = %call.kind()))]
    pub async fn execute(&self, sender: &Address, call: Call) -> Result<TxReceipt> {
        let key = call.idempotency_key();
        let attempts = if key.is_some() {
            self.config.max_retries + 1
        } else {
            1
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self.submit_and_wait(sender, call.clone()).await;

            match (&result, key) {
                (Err(e), Some(key)) if retryable(e) && attempt < attempts => {
                    let backoff = self.config.backoff_for(attempt);
                    warn!(
                        idempotency_key = %key,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Retrying idempotent call"
                    );
                    tokio::time::sleep(backoff).await;
                }
                _ => return result,
            }
        }
    }

    /// Poll a transaction until it confirms, reverts or the confirmation
    /// timeout passes.
    #[instrument(skip(self), fields(tx_hash = %tx_hash))]
    pub async fn wait_for_transaction(&self, tx_hash: &TxHash) -> Result<TxReceipt> {
        let timeout = Timeout::new(
            chrono::Duration::from_std(self.config.confirmation_timeout)
                .map_err(|e| DuelError::Configuration(e.to_string()))?,
            format!("confirm {}", tx_hash),
        );

        loop {
            match self
                .bounded("transaction_status", self.gateway.transaction_status(tx_hash))
                .await?
            {
                TxStatus::Confirmed(receipt) => {
                    info!(tx_hash = %tx_hash, "Transaction confirmed");
                    return Ok(receipt);
                }
                TxStatus::Reverted(e) => {
                    warn!(tx_hash = %tx_hash, error = %e, "Transaction reverted");
                    return Err(e);
                }
                TxStatus::Pending => {}
            }

            if timeout.is_exceeded() {
                warn!(tx_hash = %tx_hash, "Confirmation timed out");
                return Err(DuelError::ExternalTimeout {
                    operation: timeout.operation,
                    waited_ms: self.config.confirmation_timeout.as_millis() as u64,
                });
            }
            debug!(tx_hash = %tx_hash, "Awaiting confirmation");
            tokio::time::sleep(self.config.poll_interval.min(timeout.remaining_std())).await;
        }
    }

    async fn submit_and_wait(&self, sender: &Address, call: Call) -> Result<TxReceipt> {
        let tx_hash = self
            .bounded("submit", self.gateway.submit(sender, call))
            .await?;
        self.wait_for_transaction(&tx_hash).await
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.config.request_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, "Gateway request timed out");
                Err(DuelError::ExternalTimeout {
                    operation: operation.to_string(),
                    waited_ms: self.config.request_timeout.as_millis() as u64,
                })
            }
        }
    }
}

/// Only transport failures are worth resubmitting; a reverted call would
/// revert again.
fn retryable(err: &DuelError) -> bool {
    matches!(err, DuelError::ExternalTimeout { .. } | DuelError::Gateway(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use duelsettle_common::{RoundState, Side};
    use duelsettle_engine::{DuelEngine, EngineConfig, FixedResolution};
    use tokio_test::{assert_err, assert_ok};

    use crate::in_process::InProcessGateway;

    fn fast_config() -> GatewayConfig {
        GatewayConfig {
            request_timeout: Duration::from_millis(200),
            confirmation_timeout: Duration::from_millis(60),
            poll_interval: Duration::from_millis(5),
            max_retries: 2,
            retry_backoff: Duration::from_millis(5),
        }
    }

    async fn setup() -> (Arc<InProcessGateway>, GatewayClient) {
        let engine = DuelEngine::with_strategy(
            EngineConfig::default(),
            Arc::new(FixedResolution(Side::Opponent)),
        )
        .unwrap();
        let gateway = Arc::new(InProcessGateway::new(Arc::new(engine)));
        let client = GatewayClient::new(gateway.clone(), fast_config()).unwrap();
        client.fund(&Address::new("alice"), 50_000).await.unwrap();
        client.fund(&Address::new("bob"), 50_000).await.unwrap();
        (gateway, client)
    }

    #[tokio::test]
    async fn test_full_flow() {
        let (_, client) = setup().await;
        let alice = Address::new("alice");
        let bob = Address::new("bob");

        let id = client.create_round(&alice, 10_000, false).await.unwrap();
        assert_ok!(client.enter_round(&bob, id, 10_000).await);
        let outcome = client.end_round(&alice, id).await.unwrap();

        assert_eq!(outcome.winner, bob);
        assert_eq!(client.balance(&bob).await.unwrap(), 60_000);
        assert_eq!(client.balance(&alice).await.unwrap(), 40_000);
        let info = client.get_round_info(id).await.unwrap();
        assert_eq!(info.state, RoundState::Resolved);
    }

    #[tokio::test]
    async fn test_reverted_call_is_not_retried() {
        let (gateway, client) = setup().await;
        let alice = Address::new("alice");
        let id = client.create_round(&alice, 10_000, false).await.unwrap();

        let err = client.end_round(&alice, id).await.unwrap_err();
        assert!(matches!(err, DuelError::InvalidState { .. }));
        assert_eq!(gateway.transaction_count(), 2);
    }

    #[tokio::test]
    async fn test_end_round_retried_after_dropped_confirmation() {
        let (gateway, client) = setup().await;
        let alice = Address::new("alice");
        let bob = Address::new("bob");
        let id = client.create_round(&alice, 10_000, false).await.unwrap();
        client.enter_round(&bob, id, 10_000).await.unwrap();

        gateway.drop_next_confirmations(1);
        let outcome = client.end_round(&alice, id).await.unwrap();

        assert_eq!(outcome.winner, bob);
        assert_eq!(client.balance(&bob).await.unwrap(), 60_000);
        // create, enter, dropped end, retried end
        assert_eq!(gateway.transaction_count(), 4);
    }

    #[tokio::test]
    async fn test_cancel_retried_after_dropped_confirmation() {
        let (gateway, client) = setup().await;
        let alice = Address::new("alice");
        let id = client.create_round(&alice, 10_000, false).await.unwrap();

        gateway.drop_next_confirmations(2);
        assert_ok!(client.cancel_round(&alice, id).await);
        assert_eq!(client.balance(&alice).await.unwrap(), 50_000);
    }

    #[tokio::test]
    async fn test_create_timeout_surfaces() {
        let (gateway, client) = setup().await;
        let alice = Address::new("alice");

        gateway.drop_next_confirmations(1);
        let err = client.create_round(&alice, 10_000, false).await.unwrap_err();

        assert!(matches!(err, DuelError::ExternalTimeout { .. }));
        assert!(err.is_retryable());
        assert_eq!(gateway.transaction_count(), 1);
    }

    #[tokio::test]
    async fn test_slow_submission_times_out() {
        let (gateway, client) = setup().await;
        gateway.set_submit_delay(Duration::from_millis(500));

        let result = client.create_round(&Address::new("alice"), 10_000, false).await;
        let err = assert_err!(result);
        assert_eq!(err.error_code(), "EXTERNAL_TIMEOUT");
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let (gateway, client) = setup().await;
        let alice = Address::new("alice");
        let bob = Address::new("bob");
        let id = client.create_round(&alice, 10_000, false).await.unwrap();
        client.enter_round(&bob, id, 10_000).await.unwrap();

        gateway.drop_next_confirmations(10);
        let err = client.end_round(&alice, id).await.unwrap_err();

        assert!(matches!(err, DuelError::ExternalTimeout { .. }));
        // create, enter, then one attempt plus two retries
        assert_eq!(gateway.transaction_count(), 5);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let engine = DuelEngine::new(EngineConfig::default()).unwrap();
        let gateway = Arc::new(InProcessGateway::new(Arc::new(engine)));
        let config = GatewayConfig {
            poll_interval: Duration::ZERO,
            ..GatewayConfig::default()
        };
        assert!(GatewayClient::new(gateway, config).is_err());
    }
}
