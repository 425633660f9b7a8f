//! DuelSettle command-line driver.
//!
//! Funds an owner and two players, then plays a round through the gateway
//! client and prints balances and round info along the way.

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use duelsettle_common::{Address, Amount, FeePolicy};
use duelsettle_engine::config::parse_resolution_kind;
use duelsettle_engine::{DuelEngine, EngineConfig};
use duelsettle_gateway::{GatewayClient, GatewayConfig, InProcessGateway};

mod scenario;

use scenario::{Participants, ScenarioKind, ScenarioRunner};

/// DuelSettle CLI
#[derive(Parser, Debug)]
#[command(name = "duel")]
#[command(about = "Play two-player wagering rounds against an in-process ledger")]
struct Args {
    /// Scenario to run
    #[arg(short, long, value_enum, default_value = "duel")]
    scenario: ScenarioKind,

    /// Initial balance for every account
    #[arg(long, default_value = "100000000")]
    funding: Amount,

    /// Per-player stake
    #[arg(long, default_value = "10000")]
    stake: Amount,

    /// Fee in basis points of the pot (overrides DUEL_FEE_BPS)
    #[arg(long)]
    fee_bps: Option<u16>,

    /// Owner account: fee sink and authorized resolver
    #[arg(long, default_value = "owner")]
    owner: String,

    /// Winner selection: hash, random, creator or opponent
    #[arg(long)]
    resolution: Option<String>,

    /// Seed for hash or random resolution
    #[arg(long)]
    seed: Option<u64>,

    /// Rounds to play in the high-volume scenario
    #[arg(long, default_value = "20")]
    rounds: usize,

    /// Emit JSON logs and print a JSON report instead of progress lines
    #[arg(long)]
    json: bool,

    /// Print engine metrics in Prometheus text format when done
    #[arg(long)]
    prometheus: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    );
    if args.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let owner = Address::new(args.owner.clone());
    let config = engine_config(&args, &owner)?;
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let engine = Arc::new(DuelEngine::new(config)?);
    let gateway = Arc::new(InProcessGateway::new(engine));
    let client = GatewayClient::new(gateway.clone(), GatewayConfig::from_env())?;

    info!(scenario = ?args.scenario, owner = %owner, "Starting duel driver");

    let mut runner = ScenarioRunner::new(
        client,
        gateway.clone(),
        Participants::new(owner),
        args.funding,
        args.stake,
    )
    .with_rounds(args.rounds);
    if args.json {
        runner = runner.quiet();
    }

    let report = runner.run(args.scenario).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    if args.prometheus {
        print!("{}", gateway.engine().metrics().to_prometheus());
    }

    info!(
        rounds = report.rounds.len(),
        resolved = report.metrics.rounds_resolved,
        fees = report.metrics.fees_collected,
        "Scenario complete"
    );
    Ok(())
}

/// Environment configuration with command-line overrides applied.
fn engine_config(args: &Args, owner: &Address) -> anyhow::Result<EngineConfig> {
    let mut config = EngineConfig::from_env();

    if let Some(bps) = args.fee_bps {
        config.fee_policy = FeePolicy::BasisPoints(bps);
    }
    if config.fee_policy.charges_fee() && config.fee_sink.is_none() {
        config.fee_sink = Some(owner.clone());
    }
    if !config.authorized_resolvers.contains(owner) {
        config.authorized_resolvers.push(owner.clone());
    }

    if let Some(name) = &args.resolution {
        config.resolution.kind = parse_resolution_kind(name)
            .ok_or_else(|| anyhow::anyhow!("Unknown resolution strategy: {}", name))?;
    }
    if args.seed.is_some() {
        config.resolution.seed = args.seed;
    }

    Ok(config)
}
