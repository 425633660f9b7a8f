//! DuelSettle Engine
//!
//! The engine owns the round lifecycle of a two-player wager: a creator
//! opens a round with a stake, an opponent matches it, and a resolver closes
//! the round and pays the winner. Stakes are held in escrow on the account
//! ledger from entry until refund or payout.

pub mod engine;
pub mod config;
pub mod registry;
pub mod state_machine;
pub mod settlement;
pub mod resolution;
pub mod metrics;

pub use engine::DuelEngine;
pub use config::{EngineConfig, ResolutionConfig, ResolutionKind};
pub use registry::RoundRegistry;
pub use state_machine::{RoundStateMachine, Transition};
pub use settlement::{Payout, Settlement, SettlementEngine};
pub use resolution::{
    FixedResolution, HashResolution, RandomResolution, ResolutionContext, ResolutionStrategy,
};
pub use metrics::{EngineMetrics, MetricsSnapshot};
