//! Engine facade.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use duelsettle_common::{
    Address, Amount, DuelError, Result, Round, RoundId, RoundOutcome, RoundView,
};
use duelsettle_ledger::{AccountLedger, EscrowVault, JournalEntry};

use crate::config::EngineConfig;
use crate::metrics::EngineMetrics;
use crate::registry::RoundRegistry;
use crate::resolution::{self, ResolutionStrategy};
use crate::settlement::SettlementEngine;
use crate::state_machine::RoundStateMachine;

/// Round escrow engine.
///
/// Owns the ledger, the escrow vault and the round registry. Every operation
/// takes the acting address explicitly; there is no ambient caller.
pub struct DuelEngine {
    config: EngineConfig,
    ledger: Arc<AccountLedger>,
    vault: Arc<EscrowVault>,
    registry: Arc<RoundRegistry>,
    settlement: Arc<SettlementEngine>,
    machine: RoundStateMachine,
    metrics: EngineMetrics,
}

impl DuelEngine {
    /// Build an engine with the configured resolution strategy.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let strategy = resolution::from_config(&config.resolution);
        Self::with_strategy(config, strategy)
    }

    /// Build an engine with a caller-supplied resolution strategy.
    pub fn with_strategy(
        config: EngineConfig,
        strategy: Arc<dyn ResolutionStrategy>,
    ) -> Result<Self> {
        config.validate().map_err(DuelError::Configuration)?;

        let ledger = Arc::new(AccountLedger::new());
        let vault = Arc::new(EscrowVault::new(Arc::clone(&ledger)));
        let registry = Arc::new(RoundRegistry::new(
            Arc::clone(&vault),
            config.fee_policy,
        ));
        let settlement = Arc::new(SettlementEngine::new(
            strategy,
            config.fee_policy,
            config.fee_sink.clone(),
        ));
        let machine = RoundStateMachine::new(
            Arc::clone(&registry),
            Arc::clone(&vault),
            Arc::clone(&settlement),
            config.authorized_resolvers.clone(),
        );

        info!(
            fee_policy = %config.fee_policy,
            strategy = settlement.strategy_name(),
            resolvers = config.authorized_resolvers.len(),
            "Duel engine ready"
        );

        Ok(Self {
            config,
            ledger,
            vault,
            registry,
            settlement,
            machine,
            metrics: EngineMetrics::new(),
        })
    }

    /// Credit an account from outside the system. Returns the new balance.
    #[instrument(skip(self), fields(address = %address))]
    pub fn fund(&self, address: &Address, amount: Amount) -> Result<Amount> {
        let entry = self.observe(self.ledger.deposit(address, amount))?;
        Ok(entry.balance_after)
    }

    /// Spendable balance of an account.
    pub fn balance(&self, address: &Address) -> Amount {
        self.ledger.balance(address)
    }

    /// Open a round, escrowing the creator's stake.
    #[instrument(skip(self), fields(creator = %creator))]
    pub fn create_round(&self, creator: &Address, stake: Amount, private: bool) -> Result<RoundId> {
        let id = self.observe(self.registry.create_round(creator, stake, private))?;
        self.metrics.round_created(stake);
        Ok(id)
    }

    /// Match an open round with an equal stake.
    #[instrument(skip(self), fields(round_id = %round_id, opponent = %opponent))]
    pub fn enter_round(&self, round_id: RoundId, opponent: &Address, stake: Amount) -> Result<Round> {
        let round = self.observe(self.machine.enter(round_id, opponent, stake))?;
        self.metrics.round_matched(stake);
        Ok(round)
    }

    /// Cancel an open round and refund its creator. Safe to retry.
    #[instrument(skip(self), fields(round_id = %round_id, caller = %caller))]
    pub fn cancel_round(&self, round_id: RoundId, caller: &Address) -> Result<Round> {
        let transition = self.observe(self.machine.cancel(round_id, caller))?;
        if !transition.is_replay() {
            self.metrics.round_cancelled();
        }
        Ok(transition.into_inner())
    }

    /// Resolve a matched round and pay the winner. Safe to retry.
    #[instrument(skip(self), fields(round_id = %round_id, resolver = %resolver))]
    pub fn end_round(&self, round_id: RoundId, resolver: &Address) -> Result<RoundOutcome> {
        let transition = self.observe(self.machine.resolve(round_id, resolver))?;
        let replayed = transition.is_replay();
        let outcome = transition.into_inner();
        if !replayed {
            self.metrics.round_resolved(&outcome);
        }
        Ok(outcome)
    }

    /// Full round record.
    pub fn get_round(&self, round_id: RoundId) -> Result<Round> {
        self.registry.get_round(round_id)
    }

    /// Public fields of a round.
    pub fn get_round_info(&self, round_id: RoundId) -> Result<RoundView> {
        let view = self.registry.get_round(round_id)?.view();
        debug!(round_id = %round_id, state = %view.state, "Round info read");
        Ok(view)
    }

    /// Public rounds waiting for an opponent.
    pub fn open_rounds(&self) -> Vec<RoundView> {
        self.registry.open_rounds()
    }

    /// Rounds an address created or entered.
    pub fn rounds_for(&self, address: &Address) -> Vec<RoundView> {
        self.registry.rounds_for(address)
    }

    /// Unreleased stake held for a round.
    pub fn escrowed(&self, round_id: RoundId) -> Amount {
        self.vault.escrowed(round_id)
    }

    /// Ledger balances plus unreleased escrow. Only funding changes it.
    pub fn total_supply(&self) -> u128 {
        self.ledger.total_balance() + self.vault.total_escrowed()
    }

    /// Journal entries that reference a round.
    pub fn round_journal(&self, round_id: RoundId) -> Vec<JournalEntry> {
        self.ledger.entries_for_round(round_id)
    }

    /// Check every balance against the journal.
    pub fn verify_integrity(&self) -> bool {
        let ok = self.ledger.verify_integrity();
        if !ok {
            warn!("Ledger balances disagree with journal");
        }
        ok
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    pub fn ledger(&self) -> &Arc<AccountLedger> {
        &self.ledger
    }

    pub fn vault(&self) -> &Arc<EscrowVault> {
        &self.vault
    }

    pub fn settlement(&self) -> &Arc<SettlementEngine> {
        &self.settlement
    }

    fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.metrics.operation_rejected();
            warn!(code = e.error_code(), error = %e, "Operation failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ResolutionConfig, ResolutionKind};
    use crate::resolution::FixedResolution;
    use duelsettle_common::{FeePolicy, RoundState, Side};

    fn engine_with(side: Side, fee_policy: FeePolicy) -> DuelEngine {
        let config = EngineConfig {
            fee_policy,
            fee_sink: Some(Address::new("treasury")),
            authorized_resolvers: vec![Address::new("owner")],
            resolution: ResolutionConfig::default(),
        };
        DuelEngine::with_strategy(config, Arc::new(FixedResolution(side))).unwrap()
    }

    fn funded(side: Side, fee_policy: FeePolicy) -> DuelEngine {
        let engine = engine_with(side, fee_policy);
        engine.fund(&Address::new("alice"), 100_000).unwrap();
        engine.fund(&Address::new("bob"), 100_000).unwrap();
        engine
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = EngineConfig {
            fee_policy: FeePolicy::BasisPoints(100),
            ..EngineConfig::default()
        };
        let err = DuelEngine::new(config).err().unwrap();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn test_full_round() {
        let engine = funded(Side::Opponent, FeePolicy::BasisPoints(100));
        let alice = Address::new("alice");
        let bob = Address::new("bob");

        let id = engine.create_round(&alice, 10_000, false).unwrap();
        assert_eq!(engine.balance(&alice), 90_000);

        engine.enter_round(id, &bob, 10_000).unwrap();
        assert_eq!(engine.escrowed(id), 20_000);

        let outcome = engine.end_round(id, &Address::new("owner")).unwrap();
        assert_eq!(outcome.winner, bob);
        assert_eq!(outcome.fee, 200);
        assert_eq!(engine.balance(&bob), 109_800);
        assert_eq!(engine.balance(&alice), 90_000);
        assert_eq!(engine.balance(&Address::new("treasury")), 200);
        assert_eq!(engine.total_supply(), 200_000);
        assert!(engine.verify_integrity());

        let info = engine.get_round_info(id).unwrap();
        assert_eq!(info.state, RoundState::Resolved);
        assert_eq!(info.winner, Some(bob));
        assert_eq!(engine.round_journal(id).len(), 4);
    }

    #[test]
    fn test_metrics_track_operations() {
        let engine = funded(Side::Creator, FeePolicy::Flat(50));
        let alice = Address::new("alice");
        let bob = Address::new("bob");

        let resolved = engine.create_round(&alice, 1_000, false).unwrap();
        engine.enter_round(resolved, &bob, 1_000).unwrap();
        engine.end_round(resolved, &alice).unwrap();
        engine.end_round(resolved, &alice).unwrap();

        let cancelled = engine.create_round(&alice, 1_000, false).unwrap();
        engine.cancel_round(cancelled, &alice).unwrap();
        engine.cancel_round(cancelled, &alice).unwrap();

        assert!(engine.enter_round(cancelled, &bob, 1_000).is_err());

        let snapshot = engine.metrics().snapshot();
        assert_eq!(snapshot.rounds_created, 2);
        assert_eq!(snapshot.rounds_matched, 1);
        assert_eq!(snapshot.rounds_resolved, 1);
        assert_eq!(snapshot.rounds_cancelled, 1);
        assert_eq!(snapshot.rounds_open, 0);
        assert_eq!(snapshot.operations_rejected, 1);
        assert_eq!(snapshot.payouts_total, 1_950);
        assert_eq!(snapshot.fees_collected, 50);
    }

    #[test]
    fn test_fund_rejects_bad_input() {
        let engine = engine_with(Side::Creator, FeePolicy::None);
        assert!(engine.fund(&Address::new("bad address"), 10).is_err());
        assert!(engine.fund(&Address::new("alice"), 0).is_err());
        assert_eq!(engine.metrics().snapshot().operations_rejected, 2);
    }

    #[test]
    fn test_configured_strategy() {
        let config = EngineConfig {
            resolution: ResolutionConfig {
                kind: ResolutionKind::Fixed(Side::Creator),
                seed: None,
            },
            ..EngineConfig::default()
        };
        let engine = DuelEngine::new(config).unwrap();
        assert_eq!(engine.settlement().strategy_name(), "fixed-creator");
    }

    #[tokio::test]
    async fn test_concurrent_rounds_on_separate_tasks() {
        let engine = Arc::new(funded(Side::Creator, FeePolicy::None));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = Arc::clone(&engine);
            handles.push(tokio::task::spawn_blocking(move || {
                let alice = Address::new("alice");
                let bob = Address::new("bob");
                let id = engine.create_round(&alice, 1_000, false)?;
                engine.enter_round(id, &bob, 1_000)?;
                engine.end_round(id, &bob)
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(engine.balance(&Address::new("alice")), 108_000);
        assert_eq!(engine.balance(&Address::new("bob")), 92_000);
        assert_eq!(engine.total_supply(), 200_000);
    }
}
