use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::book::{LevelUpdate, OrderBookStore};
use crate::config::Config;
use crate::feeds::messages::{parse_frame, subscribe_message, WireMessage};
use crate::telemetry::bus::{
    self as events, TelemetryBus,
};
use crate::types::{OrderLevel, TokenId};

/// Notification handed to the detector after an update lands in the store.
#[derive(Clone, Copy, Debug)]
pub struct TokenUpdate {
    pub token_index: usize,
    pub recv_at: Instant,
    pub applied_at: Instant,
}

/// Drop/recovery counters, owned by the ingest task.
#[derive(Clone, Copy, Debug, Default)]
pub struct IngestCounters {
    pub applied: u64,
    pub dedup_hits: u64,
    pub sequence_gaps: u64,
    pub out_of_order: u64,
    pub decode_errors: u64,
    pub reseeds_pending_drops: u64,
    pub disconnects: u64,
}

/// Wire → order-book applier. Owns per-token sequencing state and the dedup
/// LRU; the websocket loop in `run_feed` feeds it raw frames.
///
/// Sole writer to the book store. Nothing here suspends — every apply is a
/// short critical section under the token's write lock.
pub struct Ingestor {
    store: Arc<OrderBookStore>,
    telemetry: Arc<TelemetryBus>,
    update_tx: mpsc::Sender<TokenUpdate>,
    tokens: Vec<TokenId>,
    token_index: HashMap<TokenId, usize>,
    dedup: moka::sync::Cache<u64, ()>,
    last_seq: HashMap<usize, u64>,
    /// Tokens whose deltas are untrusted until the next snapshot lands.
    pending_reseed: HashSet<usize>,
    pub counters: IngestCounters,
}

impl Ingestor {
    pub fn new(
        store: Arc<OrderBookStore>,
        telemetry: Arc<TelemetryBus>,
        update_tx: mpsc::Sender<TokenUpdate>,
        tokens: Vec<TokenId>,
        dedup_lru_size: u64,
    ) -> Self {
        let token_index = tokens
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i))
            .collect();
        let mut ingestor = Self {
            store,
            telemetry,
            update_tx,
            tokens,
            token_index,
            dedup: moka::sync::Cache::new(dedup_lru_size),
            last_seq: HashMap::new(),
            pending_reseed: HashSet::new(),
            counters: IngestCounters::default(),
        };
        ingestor.mark_all_pending_reseed();
        ingestor
    }

    pub fn tokens(&self) -> &[TokenId] {
        &self.tokens
    }

    /// Until a snapshot arrives per token, deltas are meaningless. Called at
    /// construction and on every (re)connect.
    pub fn mark_all_pending_reseed(&mut self) {
        for i in 0..self.tokens.len() {
            self.pending_reseed.insert(i);
        }
    }

    /// Process one websocket text frame. Returns the tokens that need a
    /// snapshot reseed requested upstream.
    pub fn handle_text(&mut self, text: &str, recv_at: Instant) -> Vec<TokenId> {
        let messages = match parse_frame(text) {
            Ok(messages) => messages,
            Err(e) => {
                self.counters.decode_errors += 1;
                self.telemetry.emit(
                    events::DECODE_ERROR,
                    None,
                    serde_json::json!({"error": e.to_string()}),
                );
                return Vec::new();
            }
        };

        let mut need_reseed = Vec::new();
        for message in messages {
            if let Some(token) = self.handle_message(message, recv_at) {
                need_reseed.push(token);
            }
        }
        need_reseed
    }

    /// Returns Some(token) when the message exposed a gap and the token needs
    /// a snapshot reseed.
    fn handle_message(&mut self, message: WireMessage, recv_at: Instant) -> Option<TokenId> {
        let Some(&index) = self.token_index.get(message.asset_id()) else {
            // Not subscribed — the server should not send it; ignore.
            return None;
        };

        // 1. Dedup before anything else.
        let key = message.dedup_key();
        if self.dedup.contains_key(&key) {
            self.counters.dedup_hits += 1;
            self.telemetry.emit(
                events::DEDUP_HIT,
                None,
                serde_json::json!({"token": message.asset_id()}),
            );
            return None;
        }
        self.dedup.insert(key, ());

        match message {
            WireMessage::Book(snapshot) => {
                let last = self.last_seq.get(&index).copied().unwrap_or(0);
                let reseeding = self.pending_reseed.contains(&index);
                let seq = snapshot.seq.unwrap_or(last + 1);
                if !reseeding && snapshot.seq.is_some() && seq <= last {
                    self.counters.out_of_order += 1;
                    return None;
                }

                let bids = levels(&snapshot.bids);
                let asks = levels(&snapshot.asks);
                let ts = wire_ts(snapshot.timestamp);
                let token = self.tokens[index].clone();
                if self.store.apply_snapshot(&token, bids, asks, seq, ts).is_err() {
                    return None;
                }
                let applied_at = Instant::now();
                self.last_seq.insert(index, seq);
                if reseeding {
                    self.pending_reseed.remove(&index);
                    self.telemetry.emit(
                        events::BOOK_RESEED,
                        None,
                        serde_json::json!({"token": token.as_ref(), "seq": seq}),
                    );
                }
                self.finish_apply(index, &token, seq, "snapshot", recv_at, applied_at);
            }
            WireMessage::PriceChange(delta) => {
                if self.pending_reseed.contains(&index) {
                    self.counters.reseeds_pending_drops += 1;
                    return None;
                }
                let Some(seq) = delta.seq else {
                    self.counters.decode_errors += 1;
                    return None;
                };
                let last = self.last_seq.get(&index).copied().unwrap_or(0);
                if seq <= last {
                    self.counters.out_of_order += 1;
                    return None;
                }
                if seq > last + 1 {
                    // Gap: drop the delta, distrust the book, ask for a seed.
                    self.counters.sequence_gaps += 1;
                    self.pending_reseed.insert(index);
                    let token = self.tokens[index].clone();
                    self.telemetry.emit(
                        events::SEQUENCE_GAP,
                        None,
                        serde_json::json!({
                            "token": token.as_ref(),
                            "expected": last + 1,
                            "got": seq,
                        }),
                    );
                    return Some(token);
                }

                let updates: Vec<LevelUpdate> = delta
                    .changes
                    .iter()
                    .map(|c| LevelUpdate {
                        side: c.side.into(),
                        price: c.price,
                        size: c.size,
                    })
                    .collect();
                let ts = wire_ts(delta.timestamp);
                let token = self.tokens[index].clone();
                if self.store.apply_delta(&token, &updates, seq, ts).is_err() {
                    return None;
                }
                let applied_at = Instant::now();
                self.last_seq.insert(index, seq);
                self.finish_apply(index, &token, seq, "delta", recv_at, applied_at);
            }
        }
        None
    }

    fn finish_apply(
        &mut self,
        index: usize,
        token: &TokenId,
        seq: u64,
        kind: &'static str,
        recv_at: Instant,
        applied_at: Instant,
    ) {
        self.counters.applied += 1;
        self.telemetry.emit(
            events::EVENT_RECEIVED,
            None,
            serde_json::json!({
                "token": token.as_ref(),
                "seq": seq,
                "kind": kind,
                "apply_us": applied_at.saturating_duration_since(recv_at).as_micros() as u64,
            }),
        );
        // Detection lag is acceptable; losing the notification is not, so a
        // full channel blocks-by-drop only for duplicates of the same token
        // already queued. try_send keeps the ingest task non-suspending.
        let _ = self.update_tx.try_send(TokenUpdate {
            token_index: index,
            recv_at,
            applied_at,
        });
    }
}

fn levels(wire: &[crate::feeds::messages::WireLevel]) -> Vec<OrderLevel> {
    wire.iter().map(|l| OrderLevel::new(l.price, l.size)).collect()
}

fn wire_ts(ms: Option<i64>) -> DateTime<Utc> {
    ms.and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now)
}

/// Websocket loop: connect, subscribe, pump frames into the ingestor.
/// Reconnects with exponential backoff and reseeds every token after each
/// reconnect. Runs until the update channel closes.
pub async fn run_feed(mut ingestor: Ingestor, config: Config) {
    let mut backoff = config.ws_backoff_initial;

    loop {
        tracing::info!(target: "feed", url = %config.clob_ws_url, "connecting");
        let ws = match connect_async(&config.clob_ws_url).await {
            Ok((ws, _)) => {
                tracing::info!(target: "feed", "connected");
                ingestor.telemetry.emit(events::WS_CONNECTED, None, serde_json::json!({}));
                backoff = config.ws_backoff_initial;
                ws
            }
            Err(e) => {
                tracing::warn!(target: "feed", "connect failed: {e}, retrying in {backoff:?}");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(config.ws_backoff_max);
                continue;
            }
        };

        let (mut write, mut read) = ws.split();

        // Fresh connection: all books are stale until reseeded.
        ingestor.mark_all_pending_reseed();
        let sub = subscribe_message(ingestor.tokens());
        if let Err(e) = write.send(Message::Text(sub)).await {
            tracing::warn!(target: "feed", "subscribe failed: {e}, reconnecting");
            continue;
        }

        let mut ping_interval = tokio::time::interval(Duration::from_secs(10));

        loop {
            tokio::select! {
                msg = read.next() => {
                    let msg = match msg {
                        Some(Ok(m)) => m,
                        Some(Err(e)) => {
                            tracing::warn!(target: "feed", "ws error: {e}, reconnecting");
                            break;
                        }
                        None => {
                            tracing::warn!(target: "feed", "stream ended, reconnecting");
                            break;
                        }
                    };

                    if let Message::Text(text) = msg {
                        if ingestor.update_tx.is_closed() {
                            tracing::info!(target: "feed", "engine gone, feed exiting");
                            return;
                        }
                        let need_reseed = ingestor.handle_text(&text, Instant::now());
                        if !need_reseed.is_empty() {
                            // Re-subscribing the gapped tokens makes the server
                            // push a fresh book snapshot for them.
                            let sub = subscribe_message(&need_reseed);
                            if let Err(e) = write.send(Message::Text(sub)).await {
                                tracing::warn!(target: "feed", "reseed request failed: {e}");
                                break;
                            }
                        }
                    }
                }
                _ = ping_interval.tick() => {
                    let _ = write.send(Message::Ping(Vec::new())).await;
                }
            }
        }

        ingestor.counters.disconnects += 1;
        ingestor.telemetry.emit(events::WS_DISCONNECT, None, serde_json::json!({}));
        tracing::warn!(target: "feed", "disconnected, reconnecting in {backoff:?}");
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(config.ws_backoff_max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn make_ingestor() -> (Ingestor, Arc<OrderBookStore>, mpsc::Receiver<TokenUpdate>) {
        let store = Arc::new(OrderBookStore::new(50));
        let yes = store.register_token("tok-yes");
        let no = store.register_token("tok-no");
        let (tx, rx) = mpsc::channel(64);
        let ingestor = Ingestor::new(
            store.clone(),
            Arc::new(TelemetryBus::disconnected()),
            tx,
            vec![yes, no],
            10_000,
        );
        (ingestor, store, rx)
    }

    fn snapshot_frame(token: &str, seq: u64) -> String {
        format!(
            r#"{{"event_type":"book","asset_id":"{token}",
                "bids":[{{"price":"0.40","size":"10"}}],
                "asks":[{{"price":"0.45","size":"100"}},{{"price":"0.46","size":"50"}}],
                "seq":{seq},"timestamp":1700000000000}}"#
        )
    }

    fn delta_frame(token: &str, seq: u64, price: &str, size: &str) -> String {
        format!(
            r#"{{"event_type":"price_change","asset_id":"{token}",
                "changes":[{{"price":"{price}","size":"{size}","side":"SELL"}}],
                "seq":{seq},"timestamp":1700000000100}}"#
        )
    }

    /// Scenario: snapshot then an in-sequence delta.
    /// Expected: both applied, two detector notifications, no drops.
    #[test]
    fn test_snapshot_then_delta_applies() {
        let (mut ingestor, store, mut rx) = make_ingestor();
        let t0 = Instant::now();

        assert!(ingestor.handle_text(&snapshot_frame("tok-yes", 100), t0).is_empty());
        assert!(ingestor.handle_text(&delta_frame("tok-yes", 101, "0.45", "0"), t0).is_empty());

        assert_eq!(ingestor.counters.applied, 2);
        assert_eq!(store.best_ask("tok-yes").unwrap().unwrap().price, dec!(0.46));
        assert_eq!(store.last_seq("tok-yes").unwrap(), 101);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    /// Scenario 4 of the end-to-end suite: last applied seq is 100 and a
    /// delta with seq 102 arrives.
    /// Expected: delta dropped, sequence_gap counted, reseed requested, no
    /// detection notification until the fresh snapshot overwrites the book.
    #[test]
    fn test_gap_triggers_reseed() {
        let (mut ingestor, store, mut rx) = make_ingestor();
        let t0 = Instant::now();

        ingestor.handle_text(&snapshot_frame("tok-yes", 100), t0);
        let _ = rx.try_recv();

        let need = ingestor.handle_text(&delta_frame("tok-yes", 102, "0.45", "0"), t0);
        assert_eq!(need.len(), 1);
        assert_eq!(need[0].as_ref(), "tok-yes");
        assert_eq!(ingestor.counters.sequence_gaps, 1);
        // Book untouched by the gapped delta.
        assert_eq!(store.best_ask("tok-yes").unwrap().unwrap().price, dec!(0.45));
        assert!(rx.try_recv().is_err(), "no detection between gap and reseed");

        // Deltas stay dropped while the reseed is pending, even in-sequence.
        ingestor.handle_text(&delta_frame("tok-yes", 103, "0.45", "0"), t0);
        assert_eq!(ingestor.counters.reseeds_pending_drops, 1);
        assert!(rx.try_recv().is_err());

        // The reseed snapshot overwrites state and reopens the token.
        ingestor.handle_text(&snapshot_frame("tok-yes", 104), t0);
        assert_eq!(store.last_seq("tok-yes").unwrap(), 104);
        assert!(rx.try_recv().is_ok());
        ingestor.handle_text(&delta_frame("tok-yes", 105, "0.45", "0"), t0);
        assert_eq!(store.best_ask("tok-yes").unwrap().unwrap().price, dec!(0.46));
    }

    /// P2: once seq 101 is applied, anything ≤ 101 is rejected.
    #[test]
    fn test_out_of_order_dropped() {
        let (mut ingestor, store, _rx) = make_ingestor();
        let t0 = Instant::now();

        ingestor.handle_text(&snapshot_frame("tok-yes", 100), t0);
        ingestor.handle_text(&delta_frame("tok-yes", 101, "0.45", "0"), t0);
        // Older seqs must not apply, whatever they carry.
        ingestor.handle_text(&delta_frame("tok-yes", 100, "0.46", "0"), t0);
        ingestor.handle_text(&delta_frame("tok-yes", 99, "0.46", "0"), t0);

        assert_eq!(ingestor.counters.out_of_order, 2);
        assert_eq!(store.best_ask("tok-yes").unwrap().unwrap().price, dec!(0.46));
    }

    /// An exact duplicate frame is swallowed by the LRU, not re-applied.
    #[test]
    fn test_duplicate_frame_dedup() {
        let (mut ingestor, _store, mut rx) = make_ingestor();
        let t0 = Instant::now();

        let frame = snapshot_frame("tok-yes", 100);
        ingestor.handle_text(&frame, t0);
        ingestor.handle_text(&frame, t0);

        assert_eq!(ingestor.counters.dedup_hits, 1);
        assert_eq!(ingestor.counters.applied, 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    /// Deltas that arrive before any snapshot are dropped: a book with no
    /// seeded state must never become visible to detection.
    #[test]
    fn test_delta_before_snapshot_dropped() {
        let (mut ingestor, _store, mut rx) = make_ingestor();
        ingestor.handle_text(&delta_frame("tok-yes", 1, "0.45", "5"), Instant::now());
        assert_eq!(ingestor.counters.reseeds_pending_drops, 1);
        assert!(rx.try_recv().is_err());
    }

    /// Unsubscribed tokens and garbage frames are counted, never applied.
    #[test]
    fn test_unknown_token_and_garbage() {
        let (mut ingestor, _store, _rx) = make_ingestor();
        let t0 = Instant::now();
        ingestor.handle_text(&snapshot_frame("tok-other", 1), t0);
        assert_eq!(ingestor.counters.applied, 0);
        ingestor.handle_text("{{{", t0);
        assert_eq!(ingestor.counters.decode_errors, 1);
    }
}
