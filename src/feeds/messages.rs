use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};

use crate::types::{Side, TokenId};

/// One price level on the wire. Prices and sizes arrive as decimal strings;
/// rust_decimal's deserializer accepts both strings and numbers.
#[derive(Clone, Debug, Deserialize)]
pub struct WireLevel {
    pub price: Decimal,
    pub size: Decimal,
}

/// One level change inside a delta.
#[derive(Clone, Debug, Deserialize)]
pub struct WireChange {
    pub price: Decimal,
    pub size: Decimal,
    pub side: WireSide,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum WireSide {
    Buy,
    Sell,
}

impl From<WireSide> for Side {
    fn from(side: WireSide) -> Self {
        match side {
            WireSide::Buy => Side::Buy,
            WireSide::Sell => Side::Sell,
        }
    }
}

/// Full-book reseed for one token.
#[derive(Clone, Debug, Deserialize)]
pub struct BookSnapshotMsg {
    pub asset_id: String,
    #[serde(default)]
    pub bids: Vec<WireLevel>,
    #[serde(default)]
    pub asks: Vec<WireLevel>,
    #[serde(default)]
    pub seq: Option<u64>,
    #[serde(default, deserialize_with = "de_opt_ts_ms")]
    pub timestamp: Option<i64>,
}

/// Incremental level changes for one token.
#[derive(Clone, Debug, Deserialize)]
pub struct BookDeltaMsg {
    pub asset_id: String,
    #[serde(default)]
    pub changes: Vec<WireChange>,
    #[serde(default)]
    pub seq: Option<u64>,
    #[serde(default, deserialize_with = "de_opt_ts_ms")]
    pub timestamp: Option<i64>,
}

/// The two message kinds the ingestor consumes. The upstream tags snapshots
/// `book` and deltas `price_change`.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum WireMessage {
    Book(BookSnapshotMsg),
    PriceChange(BookDeltaMsg),
}

impl WireMessage {
    pub fn asset_id(&self) -> &str {
        match self {
            WireMessage::Book(m) => &m.asset_id,
            WireMessage::PriceChange(m) => &m.asset_id,
        }
    }

    pub fn seq(&self) -> Option<u64> {
        match self {
            WireMessage::Book(m) => m.seq,
            WireMessage::PriceChange(m) => m.seq,
        }
    }

    /// Deduplication key: hash of the message identity (token, kind, seq).
    pub fn dedup_key(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.asset_id().hash(&mut hasher);
        matches!(self, WireMessage::Book(_)).hash(&mut hasher);
        self.seq().hash(&mut hasher);
        hasher.finish()
    }
}

/// Accept epoch-millisecond timestamps as either JSON numbers or strings.
fn de_opt_ts_ms<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum TsRepr {
        Num(i64),
        Str(String),
    }
    Ok(match Option::<TsRepr>::deserialize(deserializer)? {
        None => None,
        Some(TsRepr::Num(n)) => Some(n),
        Some(TsRepr::Str(s)) => s.parse().ok(),
    })
}

/// Parse one websocket text frame. The upstream sends either a single event
/// object or an array of them; event types we do not consume are skipped.
pub fn parse_frame(text: &str) -> Result<Vec<WireMessage>, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let elements = match value {
        serde_json::Value::Array(items) => items,
        other => vec![other],
    };

    let mut messages = Vec::with_capacity(elements.len());
    for element in elements {
        let known = element
            .get("event_type")
            .and_then(|t| t.as_str())
            .map(|t| t == "book" || t == "price_change")
            .unwrap_or(false);
        if !known {
            continue;
        }
        messages.push(serde_json::from_value(element)?);
    }
    Ok(messages)
}

/// Subscription request for a set of token ids.
pub fn subscribe_message(token_ids: &[TokenId]) -> String {
    let ids: Vec<&str> = token_ids.iter().map(|t| t.as_ref()).collect();
    serde_json::json!({
        "assets_ids": ids,
        "type": "market",
    })
    .to_string()
}
