mod book;
mod config;
mod engine;
mod exec;
mod feeds;
mod gateway;
mod telemetry;
mod types;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use anyhow::Context;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

use book::OrderBookStore;
use config::Config;
use engine::runner::run_engine;
use exec::circuit::CircuitBreaker;
use exec::idempotency::IdempotencyRegistry;
use exec::router::ExecutionRouter;
use exec::simulated::SimulatedExecutor;
use feeds::clob::{run_feed, Ingestor};
use gateway::oracle::{run_price_poller, CachedOracle};
use telemetry::bus::TelemetryBus;
use telemetry::recorder::run_recorder;
use types::MarketPair;

/// One entry of the markets file: the pairs this engine trades are supplied
/// by the operator, not discovered.
#[derive(serde::Deserialize)]
struct MarketDef {
    market_id: String,
    yes_token_id: String,
    no_token_id: String,
    #[serde(default)]
    question: String,
    end_date: DateTime<Utc>,
}

fn load_markets(path: &str) -> anyhow::Result<Vec<MarketDef>> {
    let body = std::fs::read_to_string(path)
        .with_context(|| format!("reading markets file {path}"))?;
    let defs: Vec<MarketDef> =
        serde_json::from_str(&body).with_context(|| format!("parsing markets file {path}"))?;
    anyhow::ensure!(!defs.is_empty(), "markets file {path} is empty");
    for def in &defs {
        anyhow::ensure!(
            def.yes_token_id != def.no_token_id,
            "market {} has identical YES/NO token ids",
            def.market_id
        );
    }
    Ok(defs)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env();
    tracing::info!(
        trade_size = %config.trade_size,
        fee_rate = %config.fee_rate,
        min_profit_abs = %config.min_profit_threshold_abs,
        dry_run = config.dry_run,
        "binary-market arbitrage engine starting"
    );

    // The signing + submission capability is injected by the deployment; a
    // build without one can only run dry. Refusing beats pretending.
    if !config.dry_run {
        anyhow::bail!(
            "live mode requires a chain signing capability; none is linked into this binary \
             (set DRY_RUN=true)"
        );
    }

    let markets = load_markets(&config.markets_file)?;
    tracing::info!(markets = markets.len(), "markets loaded");

    // ── Book store + pair/token registration (subscription order) ──
    let store = Arc::new(OrderBookStore::new(config.orderbook_depth_cap));
    let mut pairs = Vec::new();
    let mut tokens = Vec::new();
    for def in &markets {
        let yes = store.register_token(&def.yes_token_id);
        let no = store.register_token(&def.no_token_id);
        tokens.push(yes.clone());
        tokens.push(no.clone());
        pairs.push(Arc::new(MarketPair {
            market_id: def.market_id.clone(),
            yes_token_id: yes,
            no_token_id: no,
            question: def.question.clone(),
            end_date: def.end_date,
        }));
    }

    // ── Telemetry: bus → recorder task ──
    let (event_tx, event_rx) = mpsc::channel(4096);
    let telemetry = Arc::new(TelemetryBus::new(event_tx));
    let recorder = tokio::spawn(run_recorder(event_rx, PathBuf::from(&config.event_log_dir)));

    // ── MATIC→USDC oracle poller ──
    let http = reqwest::Client::new();
    let (price_tx, price_rx) = watch::channel(rust_decimal_macros::dec!(0.50));
    tokio::spawn(run_price_poller(
        http,
        config.price_oracle_url.clone(),
        Duration::from_secs(30),
        price_tx,
    ));
    let oracle = Arc::new(CachedOracle::new(price_rx));

    // ── Execution path ──
    let breaker = Arc::new(CircuitBreaker::new(
        config.circuit_breaker.clone(),
        telemetry.clone(),
    ));
    let registry = Arc::new(IdempotencyRegistry::new(
        config.idempotency_window + Duration::from_secs(300),
    ));
    let simulated = Arc::new(SimulatedExecutor::new(store.clone(), telemetry.clone(), &config));
    let router = Arc::new(ExecutionRouter::new(config.dry_run, simulated, None));

    // ── Feed ingestor ──
    let (update_tx, update_rx) = mpsc::channel(4096);
    let ingestor = Ingestor::new(
        store.clone(),
        telemetry.clone(),
        update_tx,
        tokens.clone(),
        config.dedup_lru_size,
    );
    let feed = tokio::spawn(run_feed(ingestor, config.clone()));

    // ── Engine ──
    let engine = tokio::spawn(run_engine(
        config,
        store,
        pairs,
        tokens,
        update_rx,
        router,
        breaker,
        registry,
        oracle,
        None,
        Address::ZERO,
        telemetry.clone(),
    ));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received, shutting down");
        }
        result = engine => {
            tracing::warn!(?result, "engine exited");
        }
    }

    feed.abort();
    if telemetry.dropped_count() > 0 {
        tracing::warn!(dropped = telemetry.dropped_count(), "telemetry records dropped");
    }
    drop(telemetry);
    let _ = tokio::time::timeout(Duration::from_secs(2), recorder).await;
    Ok(())
}
