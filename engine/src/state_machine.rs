//! Round state machine.
//!
//! `Open → Matched → Resolved` and `Open → Cancelled`. Every transition runs
//! under the round's mutex, and the state is checked after the lock is taken.

use std::sync::Arc;

use parking_lot::MutexGuard;
use tracing::{info, instrument, warn};

use duelsettle_common::{
    Address, Amount, DuelError, OperationKind, Result, Round, RoundId, RoundOutcome, RoundState,
    ValidationError,
};
use duelsettle_ledger::{EntryReason, EscrowVault, ReleaseOutcome};

use crate::registry::RoundRegistry;
use crate::settlement::SettlementEngine;

/// Result of an idempotent operation: either it moved the round, or the
/// round was already in the target state and the recorded value is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition<T> {
    Applied(T),
    Replayed(T),
}

impl<T> Transition<T> {
    pub fn is_replay(&self) -> bool {
        matches!(self, Transition::Replayed(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Transition::Applied(value) | Transition::Replayed(value) => value,
        }
    }
}

/// Drives rounds through their lifecycle.
pub struct RoundStateMachine {
    registry: Arc<RoundRegistry>,
    vault: Arc<EscrowVault>,
    settlement: Arc<SettlementEngine>,
    authorized_resolvers: Vec<Address>,
}

impl RoundStateMachine {
    pub fn new(
        registry: Arc<RoundRegistry>,
        vault: Arc<EscrowVault>,
        settlement: Arc<SettlementEngine>,
        authorized_resolvers: Vec<Address>,
    ) -> Self {
        Self {
            registry,
            vault,
            settlement,
            authorized_resolvers,
        }
    }

    /// Match an open round.
    ///
    /// Losing a race against another entrant fails with `Conflict`.
    #[instrument(skip(self), fields(round_id = %round_id, opponent = %opponent))]
    pub fn enter(&self, round_id: RoundId, opponent: &Address, stake: Amount) -> Result<Round> {
        if !opponent.is_valid() {
            return Err(ValidationError::InvalidAddress(opponent.to_string()).into());
        }

        let handle = self.registry.handle(round_id)?;
        let mut round = handle.lock();

        match round.state {
            RoundState::Open => {}
            RoundState::Matched => {
                warn!(round_id = %round_id, "Round already matched");
                return Err(DuelError::Conflict {
                    round_id,
                    operation: OperationKind::Enter,
                });
            }
            state => return Err(invalid_state(round_id, state, OperationKind::Enter)),
        }
        if stake != round.stake {
            return Err(ValidationError::StakeMismatch {
                expected: round.stake,
                actual: stake,
            }
            .into());
        }
        if &round.creator == opponent {
            return Err(ValidationError::SelfMatch(opponent.clone()).into());
        }

        self.vault.lock(round_id, opponent, stake)?;

        round.opponent = Some(opponent.clone());
        transition(&mut round, RoundState::Matched, OperationKind::Enter)?;

        info!(round_id = %round_id, opponent = %opponent, stake, "Round matched");
        Ok(round.clone())
    }

    /// Cancel an open round and refund the creator.
    ///
    /// Cancelling a cancelled round succeeds without moving funds.
    #[instrument(skip(self), fields(round_id = %round_id, caller = %caller))]
    pub fn cancel(&self, round_id: RoundId, caller: &Address) -> Result<Transition<Round>> {
        let handle = self.registry.handle(round_id)?;
        let mut round = handle.lock();

        if &round.creator != caller && !self.is_authorized_resolver(caller) {
            return Err(unauthorized(caller, round_id, OperationKind::Cancel));
        }

        match round.state {
            RoundState::Cancelled => {
                info!(round_id = %round_id, "Round already cancelled");
                return Ok(Transition::Replayed(round.clone()));
            }
            RoundState::Open => {}
            state => return Err(invalid_state(round_id, state, OperationKind::Cancel)),
        }

        let creator = round.creator.clone();
        let refund = self.vault.release(
            round_id,
            &creator,
            &creator,
            round.stake,
            EntryReason::Refund(round_id),
        )?;
        if refund.is_already_released() {
            return Err(DuelError::Internal(format!(
                "open round {} has no held stake",
                round_id
            )));
        }
        transition(&mut round, RoundState::Cancelled, OperationKind::Cancel)?;

        info!(round_id = %round_id, creator = %creator, refund = round.stake, "Round cancelled");
        Ok(Transition::Applied(round.clone()))
    }

    /// Resolve a matched round and pay the winner.
    ///
    /// Resolving a resolved round returns the recorded outcome.
    #[instrument(skip(self), fields(round_id = %round_id, resolver = %resolver))]
    pub fn resolve(
        &self,
        round_id: RoundId,
        resolver: &Address,
    ) -> Result<Transition<RoundOutcome>> {
        let handle = self.registry.handle(round_id)?;
        let mut round = handle.lock();

        if !round.is_participant(resolver) && !self.is_authorized_resolver(resolver) {
            return Err(unauthorized(resolver, round_id, OperationKind::Resolve));
        }

        match round.state {
            RoundState::Resolved => {
                info!(round_id = %round_id, "Round already resolved");
                return round.outcome.clone().map(Transition::Replayed).ok_or_else(|| {
                    DuelError::Internal(format!("resolved round {} has no outcome", round_id))
                });
            }
            RoundState::Matched => {}
            state => return Err(invalid_state(round_id, state, OperationKind::Resolve)),
        }

        let settlement = self.settlement.settle(&round, resolver)?;
        match self.vault.release_all(round_id, &settlement.instructions)? {
            ReleaseOutcome::Released(_) => {}
            ReleaseOutcome::AlreadyReleased => {
                return Err(DuelError::Internal(format!(
                    "matched round {} has no held stakes",
                    round_id
                )));
            }
        }

        round.outcome = Some(settlement.outcome.clone());
        transition(&mut round, RoundState::Resolved, OperationKind::Resolve)?;

        info!(
            round_id = %round_id,
            winner = %settlement.outcome.winner,
            payout = settlement.outcome.payout,
            fee = settlement.outcome.fee,
            "Round resolved"
        );
        Ok(Transition::Applied(settlement.outcome))
    }

    /// Whether the address may act on rounds it is not part of.
    pub fn is_authorized_resolver(&self, address: &Address) -> bool {
        self.authorized_resolvers.contains(address)
    }
}

fn transition(
    round: &mut MutexGuard<'_, Round>,
    next: RoundState,
    operation: OperationKind,
) -> Result<()> {
    let id = round.id;
    round
        .transition_to(next)
        .map_err(|state| invalid_state(id, state, operation))
}

fn invalid_state(round_id: RoundId, state: RoundState, operation: OperationKind) -> DuelError {
    warn!(round_id = %round_id, %state, %operation, "Operation rejected");
    DuelError::InvalidState {
        round_id,
        state,
        operation,
    }
}

fn unauthorized(caller: &Address, round_id: RoundId, operation: OperationKind) -> DuelError {
    warn!(round_id = %round_id, caller = %caller, %operation, "Caller not authorized");
    DuelError::Unauthorized {
        caller: caller.clone(),
        round_id,
        operation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolution::FixedResolution;
    use duelsettle_common::{FeePolicy, Side};
    use duelsettle_ledger::AccountLedger;

    struct Fixture {
        ledger: Arc<AccountLedger>,
        vault: Arc<EscrowVault>,
        registry: Arc<RoundRegistry>,
        machine: RoundStateMachine,
    }

    fn fixture(side: Side) -> Fixture {
        let ledger = Arc::new(AccountLedger::new());
        for name in ["alice", "bob", "carol"] {
            ledger.deposit(&Address::new(name), 50_000).unwrap();
        }
        let vault = Arc::new(EscrowVault::new(Arc::clone(&ledger)));
        let registry = Arc::new(RoundRegistry::new(Arc::clone(&vault), FeePolicy::Flat(200)));
        let settlement = Arc::new(SettlementEngine::new(
            Arc::new(FixedResolution(side)),
            FeePolicy::Flat(200),
            Some(Address::new("treasury")),
        ));
        let machine = RoundStateMachine::new(
            Arc::clone(&registry),
            Arc::clone(&vault),
            settlement,
            vec![Address::new("owner")],
        );
        Fixture {
            ledger,
            vault,
            registry,
            machine,
        }
    }

    fn open_round(f: &Fixture) -> RoundId {
        f.registry
            .create_round(&Address::new("alice"), 10_000, false)
            .unwrap()
    }

    #[test]
    fn test_enter_matches_round() {
        let f = fixture(Side::Creator);
        let id = open_round(&f);

        let round = f.machine.enter(id, &Address::new("bob"), 10_000).unwrap();

        assert_eq!(round.state, RoundState::Matched);
        assert_eq!(round.opponent, Some(Address::new("bob")));
        assert!(round.matched_at.is_some());
        assert_eq!(f.vault.escrowed(id), 20_000);
        assert_eq!(f.ledger.balance(&Address::new("bob")), 40_000);
    }

    #[test]
    fn test_enter_rejections_leave_no_escrow() {
        let f = fixture(Side::Creator);
        let id = open_round(&f);

        let mismatch = f.machine.enter(id, &Address::new("bob"), 9_999).unwrap_err();
        assert!(matches!(
            mismatch,
            DuelError::Validation(ValidationError::StakeMismatch { expected: 10_000, actual: 9_999 })
        ));

        let self_match = f.machine.enter(id, &Address::new("alice"), 10_000).unwrap_err();
        assert!(matches!(
            self_match,
            DuelError::Validation(ValidationError::SelfMatch(_))
        ));

        let broke = f.machine.enter(id, &Address::new("dave"), 10_000).unwrap_err();
        assert!(matches!(broke, DuelError::InsufficientFunds { .. }));

        assert_eq!(f.vault.escrowed(id), 10_000);
        assert_eq!(f.registry.get_round(id).unwrap().state, RoundState::Open);
    }

    #[test]
    fn test_second_enter_conflicts() {
        let f = fixture(Side::Creator);
        let id = open_round(&f);
        f.machine.enter(id, &Address::new("bob"), 10_000).unwrap();

        let err = f.machine.enter(id, &Address::new("carol"), 10_000).unwrap_err();
        assert!(matches!(err, DuelError::Conflict { .. }));
        assert_eq!(f.ledger.balance(&Address::new("carol")), 50_000);
    }

    #[test]
    fn test_enter_unknown_round() {
        let f = fixture(Side::Creator);
        let err = f
            .machine
            .enter(RoundId::new(42), &Address::new("bob"), 10_000)
            .unwrap_err();
        assert_eq!(err, DuelError::RoundNotFound(RoundId::new(42)));
    }

    #[test]
    fn test_cancel_refunds_creator_once() {
        let f = fixture(Side::Creator);
        let id = open_round(&f);
        let alice = Address::new("alice");

        let round = f.machine.cancel(id, &alice).unwrap();
        assert!(!round.is_replay());
        assert_eq!(round.into_inner().state, RoundState::Cancelled);
        assert_eq!(f.ledger.balance(&alice), 50_000);

        let again = f.machine.cancel(id, &alice).unwrap();
        assert!(again.is_replay());
        assert_eq!(again.into_inner().state, RoundState::Cancelled);
        assert_eq!(f.ledger.balance(&alice), 50_000);
        assert_eq!(f.vault.escrowed(id), 0);
    }

    #[test]
    fn test_cancel_matched_round_is_invalid() {
        let f = fixture(Side::Creator);
        let id = open_round(&f);
        f.machine.enter(id, &Address::new("bob"), 10_000).unwrap();

        let err = f.machine.cancel(id, &Address::new("alice")).unwrap_err();
        assert!(matches!(
            err,
            DuelError::InvalidState { state: RoundState::Matched, operation: OperationKind::Cancel, .. }
        ));
    }

    #[test]
    fn test_cancel_authorization() {
        let f = fixture(Side::Creator);
        let id = open_round(&f);

        let err = f.machine.cancel(id, &Address::new("bob")).unwrap_err();
        assert!(matches!(err, DuelError::Unauthorized { .. }));

        let round = f.machine.cancel(id, &Address::new("owner")).unwrap().into_inner();
        assert_eq!(round.state, RoundState::Cancelled);
    }

    #[test]
    fn test_resolve_pays_winner_and_fee() {
        let f = fixture(Side::Opponent);
        let id = open_round(&f);
        f.machine.enter(id, &Address::new("bob"), 10_000).unwrap();

        let outcome = f.machine.resolve(id, &Address::new("alice")).unwrap().into_inner();

        assert_eq!(outcome.winner, Address::new("bob"));
        assert_eq!(outcome.payout, 19_800);
        assert_eq!(f.ledger.balance(&Address::new("bob")), 59_800);
        assert_eq!(f.ledger.balance(&Address::new("alice")), 40_000);
        assert_eq!(f.ledger.balance(&Address::new("treasury")), 200);
        assert_eq!(f.vault.escrowed(id), 0);
        assert_eq!(f.registry.get_round(id).unwrap().state, RoundState::Resolved);
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let f = fixture(Side::Creator);
        let id = open_round(&f);
        f.machine.enter(id, &Address::new("bob"), 10_000).unwrap();

        let first = f.machine.resolve(id, &Address::new("owner")).unwrap();
        let second = f.machine.resolve(id, &Address::new("bob")).unwrap();

        assert!(second.is_replay());
        assert_eq!(first.into_inner(), second.into_inner());
        assert_eq!(f.ledger.balance(&Address::new("alice")), 59_800);
        assert_eq!(f.ledger.entries_for_round(id).len(), 4);
    }

    #[test]
    fn test_resolve_open_round_is_invalid() {
        let f = fixture(Side::Creator);
        let id = open_round(&f);
        let err = f.machine.resolve(id, &Address::new("alice")).unwrap_err();
        assert!(matches!(err, DuelError::InvalidState { state: RoundState::Open, .. }));
    }

    #[test]
    fn test_resolve_by_stranger_is_unauthorized() {
        let f = fixture(Side::Creator);
        let id = open_round(&f);
        f.machine.enter(id, &Address::new("bob"), 10_000).unwrap();

        let err = f.machine.resolve(id, &Address::new("carol")).unwrap_err();
        assert_eq!(err.error_code(), "UNAUTHORIZED");
        assert_eq!(f.vault.escrowed(id), 20_000);
    }
}
