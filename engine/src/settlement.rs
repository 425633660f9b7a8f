//! Settlement of matched rounds.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use duelsettle_common::{
    pot_for, Address, Amount, DuelError, FeePolicy, OperationKind, Result, Round, RoundOutcome,
    RoundState, Side, ValidationError,
};
use duelsettle_ledger::{EntryReason, ReleaseInstruction};

use crate::resolution::{ResolutionContext, ResolutionStrategy};

/// Split of a round's pot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Payout {
    /// Both stakes.
    pub pot: Amount,
    /// Fee-sink share.
    pub fee: Amount,
    /// Winner's share: `pot - fee`.
    pub payout: Amount,
}

impl Payout {
    /// Compute the split for a per-player stake.
    pub fn quote(stake: Amount, policy: &FeePolicy) -> Result<Self> {
        if stake == 0 {
            return Err(ValidationError::ZeroStake.into());
        }
        let pot = pot_for(stake)
            .ok_or_else(|| DuelError::Overflow(format!("pot for stake {}", stake)))?;
        let fee = policy.fee_for(pot).ok_or_else(|| {
            let fee = match *policy {
                FeePolicy::Flat(amount) => amount,
                _ => pot,
            };
            DuelError::from(ValidationError::FeeExceedsPot { fee, pot })
        })?;

        Ok(Self {
            pot,
            fee,
            payout: pot - fee,
        })
    }
}

/// What settling a round produces: the outcome to record and the escrow
/// releases to apply as one unit.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub outcome: RoundOutcome,
    pub instructions: Vec<ReleaseInstruction>,
}

/// Settlement engine picks the winner and splits the pot.
pub struct SettlementEngine {
    /// Winner selection.
    strategy: Arc<dyn ResolutionStrategy>,
    /// Fee policy.
    fee_policy: FeePolicy,
    /// Fee destination.
    fee_sink: Option<Address>,
}

impl SettlementEngine {
    /// Create a new settlement engine.
    pub fn new(
        strategy: Arc<dyn ResolutionStrategy>,
        fee_policy: FeePolicy,
        fee_sink: Option<Address>,
    ) -> Self {
        Self {
            strategy,
            fee_policy,
            fee_sink,
        }
    }

    /// Name of the resolution strategy.
    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    /// Quote the pot split for a stake under the configured fee policy.
    pub fn quote(&self, stake: Amount) -> Result<Payout> {
        Payout::quote(stake, &self.fee_policy)
    }

    /// Settle a matched round. Does not touch balances.
    #[instrument(skip(self, round), fields(round_id = %round.id))]
    pub fn settle(&self, round: &Round, resolved_by: &Address) -> Result<Settlement> {
        if round.state != RoundState::Matched {
            return Err(DuelError::InvalidState {
                round_id: round.id,
                state: round.state,
                operation: OperationKind::Resolve,
            });
        }
        let opponent = round.opponent.as_ref().ok_or_else(|| {
            DuelError::Internal(format!("matched round {} has no opponent", round.id))
        })?;

        let split = self.quote(round.stake)?;

        let ctx = ResolutionContext {
            round_id: round.id,
            creator: &round.creator,
            opponent,
            stake: round.stake,
        };
        let winning_side = self.strategy.pick(&ctx)?;
        let side_address = |side: Side| {
            round.participant(side).cloned().ok_or_else(|| {
                DuelError::Internal(format!("round {} has no {:?}", round.id, side))
            })
        };
        let winner = side_address(winning_side)?;
        let loser = side_address(winning_side.other())?;

        let mut instructions = vec![ReleaseInstruction::new(
            winner.clone(),
            split.payout,
            EntryReason::Payout(round.id),
        )];
        let fee_sink = if split.fee > 0 {
            let sink = self.fee_sink.clone().ok_or_else(|| {
                DuelError::Configuration("fee configured without a fee sink".to_string())
            })?;
            instructions.push(ReleaseInstruction::new(
                sink.clone(),
                split.fee,
                EntryReason::Fee(round.id),
            ));
            Some(sink)
        } else {
            None
        };

        info!(
            round_id = %round.id,
            strategy = self.strategy.name(),
            winner = %winner,
            payout = split.payout,
            fee = split.fee,
            "Round settled"
        );

        Ok(Settlement {
            outcome: RoundOutcome {
                winning_side,
                winner,
                loser,
                payout: split.payout,
                fee: split.fee,
                fee_sink,
                resolved_by: resolved_by.clone(),
                resolved_at: Utc::now(),
            },
            instructions,
        })
    }
}
