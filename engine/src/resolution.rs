//! Winner-selection strategies.
//!
//! A strategy picks a [`Side`] rather than an address, so the winner is
//! always one of the two participants. Strategies run inside the round's
//! exclusive section and must not block.

use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use duelsettle_common::{Address, Amount, Result, RoundId, Side};
use duelsettle_crypto::Transcript;

use crate::config::{ResolutionConfig, ResolutionKind};

/// Inputs available to a strategy.
#[derive(Debug, Clone, Copy)]
pub struct ResolutionContext<'a> {
    pub round_id: RoundId,
    pub creator: &'a Address,
    pub opponent: &'a Address,
    pub stake: Amount,
}

/// Trait for winner-selection strategies.
pub trait ResolutionStrategy: Send + Sync {
    /// Strategy name, for logs.
    fn name(&self) -> &str;

    /// Pick the winning side of a matched round.
    fn pick(&self, ctx: &ResolutionContext<'_>) -> Result<Side>;
}

/// Deterministic selection: a pure function of the seed, round id and both
/// participants.
///
/// The low bit of `SHA-256(seed, round_id, creator, opponent)` picks the
/// side. Anyone holding the inputs can recompute the result.
pub struct HashResolution {
    seed: u64,
}

impl HashResolution {
    const DOMAIN: &'static str = "duelsettle/winner/v1";

    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Digest the side is derived from.
    pub fn digest(&self, ctx: &ResolutionContext<'_>) -> [u8; 32] {
        let mut transcript = Transcript::new(Self::DOMAIN);
        transcript
            .append_u64(self.seed)
            .append_u64(ctx.round_id.value())
            .append(ctx.creator.as_str().as_bytes())
            .append(ctx.opponent.as_str().as_bytes());
        transcript.finish()
    }
}

impl ResolutionStrategy for HashResolution {
    fn name(&self) -> &str {
        "hash"
    }

    fn pick(&self, ctx: &ResolutionContext<'_>) -> Result<Side> {
        let digest = self.digest(ctx);
        Ok(if digest[31] & 1 == 0 {
            Side::Creator
        } else {
            Side::Opponent
        })
    }
}

/// Selection from a random source.
pub struct RandomResolution {
    rng: Mutex<StdRng>,
}

impl RandomResolution {
    /// Create from a seed, or from OS entropy when `None`.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self {
            rng: Mutex::new(rng),
        }
    }
}

impl ResolutionStrategy for RandomResolution {
    fn name(&self) -> &str {
        "random"
    }

    fn pick(&self, _ctx: &ResolutionContext<'_>) -> Result<Side> {
        Ok(if self.rng.lock().gen_bool(0.5) {
            Side::Creator
        } else {
            Side::Opponent
        })
    }
}

/// Always picks the same side.
pub struct FixedResolution(pub Side);

impl ResolutionStrategy for FixedResolution {
    fn name(&self) -> &str {
        match self.0 {
            Side::Creator => "fixed-creator",
            Side::Opponent => "fixed-opponent",
        }
    }

    fn pick(&self, _ctx: &ResolutionContext<'_>) -> Result<Side> {
        Ok(self.0)
    }
}

/// Build the configured strategy.
pub fn from_config(config: &ResolutionConfig) -> Arc<dyn ResolutionStrategy> {
    match config.kind {
        ResolutionKind::Hash => Arc::new(HashResolution::new(config.seed.unwrap_or(0))),
        ResolutionKind::Random => Arc::new(RandomResolution::new(config.seed)),
        ResolutionKind::Fixed(side) => Arc::new(FixedResolution(side)),
    }
}
