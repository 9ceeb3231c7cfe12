use std::time::Duration;

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tokio::sync::watch;

/// MATIC→USDC conversion used to express gas costs in trade currency.
/// Reads must be synchronous and cheap — the edge calculator sits on the
/// hot path.
pub trait PriceOracle: Send + Sync {
    fn matic_usd(&self) -> Decimal;
}

/// Fixed-rate oracle for dry runs and tests.
pub struct StaticOracle(pub Decimal);

impl PriceOracle for StaticOracle {
    fn matic_usd(&self) -> Decimal {
        self.0
    }
}

/// Oracle backed by a background HTTP poller; reads return the latest
/// cached price.
pub struct CachedOracle {
    rx: watch::Receiver<Decimal>,
}

impl CachedOracle {
    pub fn new(rx: watch::Receiver<Decimal>) -> Self {
        Self { rx }
    }
}

impl PriceOracle for CachedOracle {
    fn matic_usd(&self) -> Decimal {
        *self.rx.borrow()
    }
}

/// Poll a coingecko-style simple-price endpoint
/// (`{"matic-network": {"usd": 0.52}}`) and publish into the watch channel.
/// Keeps the last good price on fetch errors.
pub async fn run_price_poller(
    http: reqwest::Client,
    url: String,
    interval: Duration,
    tx: watch::Sender<Decimal>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match fetch_price(&http, &url).await {
            Ok(price) => {
                if tx.send(price).is_err() {
                    tracing::info!(target: "oracle", "no readers left, poller exiting");
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(target: "oracle", "price fetch failed: {e}; keeping last price");
            }
        }
    }
}

async fn fetch_price(http: &reqwest::Client, url: &str) -> Result<Decimal, String> {
    let body: serde_json::Value = http
        .get(url)
        .send()
        .await
        .map_err(|e| e.to_string())?
        .json()
        .await
        .map_err(|e| e.to_string())?;

    let usd = body
        .get("matic-network")
        .and_then(|v| v.get("usd"))
        .and_then(|v| v.as_f64())
        .ok_or_else(|| format!("unexpected oracle payload: {body}"))?;

    Decimal::from_f64(usd).ok_or_else(|| format!("unrepresentable price: {usd}"))
}
