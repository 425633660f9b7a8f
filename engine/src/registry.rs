//! Round registry: owns round records and allocates round ids.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use duelsettle_common::{
    Address, Amount, DuelError, FeePolicy, Result, Round, RoundId, RoundView, ValidationError,
};
use duelsettle_ledger::EscrowVault;

use crate::settlement::Payout;

/// Registry of all rounds created by an engine instance.
pub struct RoundRegistry {
    /// Rounds by id. Each round sits behind its own mutex, which is the
    /// exclusive section for every transition on it.
    rounds: DashMap<RoundId, Arc<Mutex<Round>>>,
    /// Next id to hand out.
    next_id: AtomicU64,
    /// Escrow for creator stakes.
    vault: Arc<EscrowVault>,
    /// Fee policy, checked at creation so every round can be settled.
    fee_policy: FeePolicy,
}

impl RoundRegistry {
    /// Create an empty registry. The first round gets id 1.
    pub fn new(vault: Arc<EscrowVault>, fee_policy: FeePolicy) -> Self {
        Self {
            rounds: DashMap::new(),
            next_id: AtomicU64::new(1),
            vault,
            fee_policy,
        }
    }

    /// Open a round and escrow the creator's stake.
    ///
    /// An id whose escrow lock fails is skipped, never reissued.
    #[instrument(skip(self), fields(creator = %creator))]
    pub fn create_round(&self, creator: &Address, stake: Amount, private: bool) -> Result<RoundId> {
        if stake == 0 {
            return Err(ValidationError::ZeroStake.into());
        }
        if !creator.is_valid() {
            return Err(ValidationError::InvalidAddress(creator.to_string()).into());
        }
        Payout::quote(stake, &self.fee_policy)?;

        let id = self.allocate_id()?;

        if let Err(e) = self.vault.lock(id, creator, stake) {
            warn!(round_id = %id, creator = %creator, error = %e, "Round creation failed");
            return Err(e);
        }

        let round = Round::new(id, creator.clone(), stake, private);
        self.rounds.insert(id, Arc::new(Mutex::new(round)));

        info!(round_id = %id, creator = %creator, stake, private, "Round created");
        Ok(id)
    }

    /// Get a snapshot of a round.
    pub fn get_round(&self, id: RoundId) -> Result<Round> {
        let round = self.handle(id)?.lock().clone();
        debug!(round_id = %id, state = %round.state, "Round read");
        Ok(round)
    }

    /// Shared handle to a round's exclusive section.
    pub(crate) fn handle(&self, id: RoundId) -> Result<Arc<Mutex<Round>>> {
        self.rounds
            .get(&id)
            .map(|r| Arc::clone(r.value()))
            .ok_or(DuelError::RoundNotFound(id))
    }

    /// Public rounds still waiting for an opponent, oldest first.
    pub fn open_rounds(&self) -> Vec<RoundView> {
        let mut rounds: Vec<RoundView> = self
            .rounds
            .iter()
            .filter_map(|r| {
                let round = r.lock();
                if round.is_joinable() {
                    Some(round.view())
                } else {
                    None
                }
            })
            .collect();
        rounds.sort_by_key(|r| r.round_id);
        rounds
    }

    /// Rounds an address created or entered, oldest first.
    pub fn rounds_for(&self, address: &Address) -> Vec<RoundView> {
        let mut rounds: Vec<RoundView> = self
            .rounds
            .iter()
            .filter_map(|r| {
                let round = r.lock();
                if round.is_participant(address) {
                    Some(round.view())
                } else {
                    None
                }
            })
            .collect();
        rounds.sort_by_key(|r| r.round_id);
        rounds
    }

    /// Number of rounds created.
    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }

    fn allocate_id(&self) -> Result<RoundId> {
        let raw = self.next_id.fetch_add(1, Ordering::SeqCst);
        if raw == u64::MAX {
            return Err(DuelError::Overflow("round id space exhausted".to_string()));
        }
        Ok(RoundId::new(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duelsettle_common::RoundState;
    use duelsettle_ledger::AccountLedger;

    fn registry() -> RoundRegistry {
        let ledger = Arc::new(AccountLedger::new());
        ledger.deposit(&Address::new("alice"), 100_000).unwrap();
        RoundRegistry::new(Arc::new(EscrowVault::new(ledger)), FeePolicy::Flat(100))
    }

    #[test]
    fn test_create_round_escrows_stake() {
        let registry = registry();
        let alice = Address::new("alice");

        let id = registry.create_round(&alice, 10_000, false).unwrap();
        let round = registry.get_round(id).unwrap();

        assert_eq!(id, RoundId::new(1));
        assert_eq!(round.state, RoundState::Open);
        assert_eq!(round.stake, 10_000);
        assert_eq!(registry.vault.escrowed(id), 10_000);
        assert_eq!(registry.vault.ledger().balance(&alice), 90_000);
    }

    #[test]
    fn test_ids_strictly_increase_and_skip_failures() {
        let registry = registry();
        let alice = Address::new("alice");

        let first = registry.create_round(&alice, 1_000, false).unwrap();
        assert!(registry.create_round(&alice, 1_000_000, false).is_err());
        let second = registry.create_round(&alice, 1_000, false).unwrap();

        assert!(second > first);
        assert_eq!(second, RoundId::new(3));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_zero_stake_rejected_without_side_effects() {
        let registry = registry();
        let err = registry
            .create_round(&Address::new("alice"), 0, false)
            .unwrap_err();

        assert_eq!(err, DuelError::Validation(ValidationError::ZeroStake));
        assert!(registry.is_empty());
        assert_eq!(registry.vault.ledger().balance(&Address::new("alice")), 100_000);
    }

    #[test]
    fn test_unpayable_fee_rejected_at_creation() {
        let registry = registry();
        let err = registry
            .create_round(&Address::new("alice"), 40, false)
            .unwrap_err();
        assert!(matches!(
            err,
            DuelError::Validation(ValidationError::FeeExceedsPot { fee: 100, pot: 80 })
        ));
    }

    #[test]
    fn test_get_unknown_round() {
        let registry = registry();
        assert_eq!(
            registry.get_round(RoundId::new(9)).unwrap_err(),
            DuelError::RoundNotFound(RoundId::new(9))
        );
    }

    #[test]
    fn test_open_rounds_hide_private() {
        let registry = registry();
        let alice = Address::new("alice");
        let public = registry.create_round(&alice, 1_000, false).unwrap();
        registry.create_round(&alice, 1_000, true).unwrap();

        let open = registry.open_rounds();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].round_id, public);
        assert_eq!(registry.rounds_for(&alice).len(), 2);
    }
}
