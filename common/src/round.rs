//! Round types and lifecycle state machine.

use crate::{Address, Amount, RoundId, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Round state representing the lifecycle stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundState {
    /// Creator's stake is escrowed, waiting for an opponent.
    Open,
    /// Both stakes are escrowed, waiting for resolution.
    Matched,
    /// Pot paid out to the winner.
    Resolved,
    /// Creator's stake refunded before anyone entered.
    Cancelled,
}

impl RoundState {
    /// Check if this is a final state.
    pub fn is_final(&self) -> bool {
        matches!(self, RoundState::Resolved | RoundState::Cancelled)
    }

    /// Get valid next states from current state.
    pub fn valid_transitions(&self) -> &[RoundState] {
        match self {
            RoundState::Open => &[RoundState::Matched, RoundState::Cancelled],
            RoundState::Matched => &[RoundState::Resolved],
            RoundState::Resolved => &[],
            RoundState::Cancelled => &[],
        }
    }

    /// Check if transition to given state is valid.
    pub fn can_transition_to(&self, next: RoundState) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl fmt::Display for RoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RoundState::Open => "OPEN",
            RoundState::Matched => "MATCHED",
            RoundState::Resolved => "RESOLVED",
            RoundState::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Which participant of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Creator,
    Opponent,
}

impl Side {
    pub fn other(&self) -> Side {
        match self {
            Side::Creator => Side::Opponent,
            Side::Opponent => Side::Creator,
        }
    }
}

/// Recorded result of a resolved round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundOutcome {
    /// Side that won the pot.
    pub winning_side: Side,
    /// Winner's address.
    pub winner: Address,
    /// Loser's address.
    pub loser: Address,
    /// Amount credited to the winner.
    pub payout: Amount,
    /// Amount credited to the fee sink.
    pub fee: Amount,
    /// Fee sink, if a fee was taken.
    pub fee_sink: Option<Address>,
    /// Who requested resolution.
    pub resolved_by: Address,
    /// When the payout was applied.
    pub resolved_at: Timestamp,
}

/// A single two-player wagering round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    /// Round identifier.
    pub id: RoundId,
    /// Account that opened the round.
    pub creator: Address,
    /// Per-player stake.
    pub stake: Amount,
    /// Account that matched the stake.
    pub opponent: Option<Address>,
    /// Private rounds are hidden from the open-round listing.
    pub private: bool,
    /// Current state.
    pub state: RoundState,
    /// When the round was created.
    pub created_at: Timestamp,
    /// When an opponent entered.
    pub matched_at: Option<Timestamp>,
    /// When the round was resolved.
    pub resolved_at: Option<Timestamp>,
    /// When the round was cancelled.
    pub cancelled_at: Option<Timestamp>,
    /// Settlement result, set on resolution.
    pub outcome: Option<RoundOutcome>,
}

impl Round {
    /// Create a new open round.
    pub fn new(id: RoundId, creator: Address, stake: Amount, private: bool) -> Self {
        Self {
            id,
            creator,
            stake,
            opponent: None,
            private,
            state: RoundState::Open,
            created_at: Utc::now(),
            matched_at: None,
            resolved_at: None,
            cancelled_at: None,
            outcome: None,
        }
    }

    /// Transition to a new state, stamping the matching timestamp.
    pub fn transition_to(&mut self, next: RoundState) -> Result<(), RoundState> {
        if !self.state.can_transition_to(next) {
            return Err(self.state);
        }

        let now = Utc::now();
        match next {
            RoundState::Matched => self.matched_at = Some(now),
            RoundState::Resolved => self.resolved_at = Some(now),
            RoundState::Cancelled => self.cancelled_at = Some(now),
            RoundState::Open => {}
        }
        self.state = next;
        Ok(())
    }

    /// Address of the given side, if that side has joined.
    pub fn participant(&self, side: Side) -> Option<&Address> {
        match side {
            Side::Creator => Some(&self.creator),
            Side::Opponent => self.opponent.as_ref(),
        }
    }

    /// Whether the address is the creator or the opponent.
    pub fn is_participant(&self, address: &Address) -> bool {
        &self.creator == address || self.opponent.as_ref() == Some(address)
    }

    /// Whether the round is listed publicly for opponents.
    pub fn is_joinable(&self) -> bool {
        self.state == RoundState::Open && !self.private
    }

    /// Public view of the round.
    pub fn view(&self) -> RoundView {
        RoundView::from(self)
    }
}

/// Read-only public fields of a round, as returned by `get_round_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundView {
    pub round_id: RoundId,
    pub state: RoundState,
    pub stake: Amount,
    pub creator: Address,
    pub opponent: Option<Address>,
    pub private: bool,
    pub winner: Option<Address>,
    pub payout: Option<Amount>,
    pub fee: Option<Amount>,
    pub created_at: Timestamp,
    pub resolved_at: Option<Timestamp>,
}

impl From<&Round> for RoundView {
    fn from(round: &Round) -> Self {
        Self {
            round_id: round.id,
            state: round.state,
            stake: round.stake,
            creator: round.creator.clone(),
            opponent: round.opponent.clone(),
            private: round.private,
            winner: round.outcome.as_ref().map(|o| o.winner.clone()),
            payout: round.outcome.as_ref().map(|o| o.payout),
            fee: round.outcome.as_ref().map(|o| o.fee),
            created_at: round.created_at,
            resolved_at: round.resolved_at,
        }
    }
}
