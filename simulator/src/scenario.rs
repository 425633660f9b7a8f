//! Round scenarios driven through the gateway client.

use std::collections::BTreeMap;
use std::sync::Arc;

use clap::ValueEnum;
use futures::future::try_join_all;
use serde::Serialize;
use tracing::info;

use duelsettle_common::{Address, Amount, Result, RoundId, RoundView};
use duelsettle_engine::MetricsSnapshot;
use duelsettle_gateway::{GatewayClient, InProcessGateway};

/// Available scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScenarioKind {
    /// Fund, create, enter, end.
    Duel,
    /// Create a round and cancel it before anyone enters.
    Cancel,
    /// Like `duel`, but the end-round confirmation is lost once and retried.
    FlakyGateway,
    /// Many independent duels in parallel.
    HighVolume,
}

/// Accounts taking part in a scenario.
#[derive(Debug, Clone)]
pub struct Participants {
    /// Fee sink and authorized resolver.
    pub owner: Address,
    pub player1: Address,
    pub player2: Address,
}

impl Participants {
    pub fn new(owner: Address) -> Self {
        Self {
            owner,
            player1: Address::random(),
            player2: Address::random(),
        }
    }
}

/// What a scenario run produced.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub scenario: ScenarioKind,
    pub rounds: Vec<RoundView>,
    pub balances: BTreeMap<String, Amount>,
    pub metrics: MetricsSnapshot,
}

/// Runs scenarios against an in-process gateway.
pub struct ScenarioRunner {
    client: GatewayClient,
    gateway: Arc<InProcessGateway>,
    participants: Participants,
    funding: Amount,
    stake: Amount,
    rounds: usize,
    /// Print human-readable progress.
    verbose: bool,
}

impl ScenarioRunner {
    pub fn new(
        client: GatewayClient,
        gateway: Arc<InProcessGateway>,
        participants: Participants,
        funding: Amount,
        stake: Amount,
    ) -> Self {
        Self {
            client,
            gateway,
            participants,
            funding,
            stake,
            rounds: 1,
            verbose: true,
        }
    }

    /// Parallel duels for `high-volume`.
    pub fn with_rounds(mut self, rounds: usize) -> Self {
        self.rounds = rounds.max(1);
        self
    }

    pub fn quiet(mut self) -> Self {
        self.verbose = false;
        self
    }

    pub async fn run(&self, kind: ScenarioKind) -> Result<ScenarioReport> {
        info!(scenario = ?kind, stake = self.stake, "Running scenario");

        let rounds = match kind {
            ScenarioKind::Duel => vec![self.duel(false).await?],
            ScenarioKind::FlakyGateway => vec![self.duel(true).await?],
            ScenarioKind::Cancel => vec![self.cancel().await?],
            ScenarioKind::HighVolume => self.high_volume().await?,
        };

        let mut rounds_info = Vec::with_capacity(rounds.len());
        for id in rounds {
            rounds_info.push(self.client.get_round_info(id).await?);
        }

        let mut balances = BTreeMap::new();
        for address in [
            &self.participants.owner,
            &self.participants.player1,
            &self.participants.player2,
        ] {
            balances.insert(address.to_string(), self.client.balance(address).await?);
        }

        Ok(ScenarioReport {
            scenario: kind,
            rounds: rounds_info,
            balances,
            metrics: self.gateway.engine().metrics().snapshot(),
        })
    }

    async fn duel(&self, drop_end_confirmation: bool) -> Result<RoundId> {
        let Participants {
            owner,
            player1,
            player2,
        } = &self.participants;

        self.fund_all().await?;
        self.say("Owner at the start");
        self.show_balance(owner).await?;

        let id = self.client.create_round(player1, self.stake, false).await?;
        self.show_balance(player1).await?;
        self.show_round(id).await?;

        self.client.enter_round(player2, id, self.stake).await?;
        self.show_balance(player2).await?;
        self.show_round(id).await?;

        self.say("Owner before");
        self.show_balance(owner).await?;

        if drop_end_confirmation {
            self.gateway.drop_next_confirmations(1);
        }
        let outcome = self.client.end_round(player1, id).await?;
        self.say(&format!("Winner: {} (+{})", outcome.winner, outcome.payout));

        self.show_balance(player1).await?;
        self.show_balance(player2).await?;
        self.say("Owner after");
        self.show_balance(owner).await?;
        self.show_round(id).await?;

        Ok(id)
    }

    async fn cancel(&self) -> Result<RoundId> {
        let player1 = &self.participants.player1;

        self.fund_all().await?;
        let id = self.client.create_round(player1, self.stake, false).await?;
        self.show_balance(player1).await?;

        self.client.cancel_round(player1, id).await?;
        self.show_balance(player1).await?;
        self.show_round(id).await?;

        Ok(id)
    }

    async fn high_volume(&self) -> Result<Vec<RoundId>> {
        self.fund_all().await?;

        let duels = (0..self.rounds).map(|i| async move {
            let creator = Address::new(format!("creator-{}", i));
            let opponent = Address::new(format!("opponent-{}", i));
            self.client.fund(&creator, self.funding).await?;
            self.client.fund(&opponent, self.funding).await?;

            let id = self.client.create_round(&creator, self.stake, false).await?;
            self.client.enter_round(&opponent, id, self.stake).await?;
            self.client.end_round(&self.participants.owner, id).await?;
            Ok::<_, duelsettle_common::DuelError>(id)
        });

        let ids = try_join_all(duels).await?;
        self.say(&format!("Settled {} rounds", ids.len()));
        Ok(ids)
    }

    async fn fund_all(&self) -> Result<()> {
        for address in [
            &self.participants.owner,
            &self.participants.player1,
            &self.participants.player2,
        ] {
            self.client.fund(address, self.funding).await?;
        }
        Ok(())
    }

    async fn show_balance(&self, address: &Address) -> Result<()> {
        let balance = self.client.balance(address).await?;
        self.say(&format!("{}\nBalance = {}", address, balance));
        Ok(())
    }

    async fn show_round(&self, id: RoundId) -> Result<()> {
        let view = self.client.get_round_info(id).await?;
        if self.verbose {
            let json = serde_json::to_string_pretty(&view).unwrap_or_else(|_| format!("{:?}", view));
            println!("{}", json);
        }
        Ok(())
    }

    fn say(&self, line: &str) {
        if self.verbose {
            println!("{}", line);
        }
    }
}
