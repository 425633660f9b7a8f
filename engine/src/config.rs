//! Engine configuration.

use duelsettle_common::{Address, FeePolicy, Side};

/// Which winner-selection strategy to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionKind {
    /// SHA-256 over the round inputs.
    Hash,
    /// Random source, optionally seeded.
    Random,
    /// Always the same side.
    Fixed(Side),
}

/// Resolution configuration.
#[derive(Debug, Clone)]
pub struct ResolutionConfig {
    /// Strategy kind.
    pub kind: ResolutionKind,
    /// Seed for hash or random resolution.
    pub seed: Option<u64>,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            kind: ResolutionKind::Hash,
            seed: None,
        }
    }
}

/// Main engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Fee taken from each settled pot.
    pub fee_policy: FeePolicy,
    /// Account credited with fees.
    pub fee_sink: Option<Address>,
    /// Third parties allowed to resolve or cancel any round.
    pub authorized_resolvers: Vec<Address>,
    /// Winner selection.
    pub resolution: ResolutionConfig,
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(bps) = std::env::var("DUEL_FEE_BPS") {
            if let Ok(bps) = bps.parse() {
                config.fee_policy = FeePolicy::BasisPoints(bps);
            }
        }

        if let Ok(flat) = std::env::var("DUEL_FEE_FLAT") {
            if let Ok(flat) = flat.parse() {
                config.fee_policy = FeePolicy::Flat(flat);
            }
        }

        if let Ok(sink) = std::env::var("DUEL_FEE_SINK") {
            config.fee_sink = Some(Address::new(sink));
        }

        if let Ok(resolvers) = std::env::var("DUEL_RESOLVERS") {
            config.authorized_resolvers = resolvers
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(Address::new)
                .collect();
        }

        if let Ok(kind) = std::env::var("DUEL_RESOLUTION") {
            if let Some(kind) = parse_resolution_kind(&kind) {
                config.resolution.kind = kind;
            }
        }

        if let Ok(seed) = std::env::var("DUEL_RESOLUTION_SEED") {
            if let Ok(seed) = seed.parse() {
                config.resolution.seed = Some(seed);
            }
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        self.fee_policy.validate()?;

        if self.fee_policy.charges_fee() && self.fee_sink.is_none() {
            return Err("A fee sink is required when a fee is configured".to_string());
        }

        if let Some(sink) = &self.fee_sink {
            if !sink.is_valid() {
                return Err(format!("Invalid fee sink address: {}", sink));
            }
        }

        if let Some(resolver) = self.authorized_resolvers.iter().find(|r| !r.is_valid()) {
            return Err(format!("Invalid resolver address: {}", resolver));
        }

        Ok(())
    }
}

/// Parse a resolution kind name: `hash`, `random`, `creator` or `opponent`.
pub fn parse_resolution_kind(name: &str) -> Option<ResolutionKind> {
    match name.trim().to_ascii_lowercase().as_str() {
        "hash" => Some(ResolutionKind::Hash),
        "random" => Some(ResolutionKind::Random),
        "creator" => Some(ResolutionKind::Fixed(Side::Creator)),
        "opponent" => Some(ResolutionKind::Fixed(Side::Opponent)),
        _ => None,
    }
}
