//! Top-of-book stream handle (§6 "Transport is out of scope; the engine
//! consumes them via a subscription handle").
//!
//! The wire protocol of the subscriber itself is an external collaborator
//! per §1 — this module only defines the trait boundary the hot path reads
//! from, plus one production adapter that decodes the shape in §6
//! (`{assetId, bestBid, bestAsk, bestBidSize?, bestAskSize?, timestampMs}`)
//! off a WebSocket text stream. Reconnect-with-backoff is grounded on
//! `polymarket/user_ws.rs`'s listener loop, simplified: no auth handshake,
//! no subscribe payload, since that wire contract belongs to the external
//! subscriber this crate does not implement.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{info, warn};

use crate::model::TopOfBookUpdate;

#[derive(Debug, Deserialize)]
struct WireUpdate {
    #[serde(rename = "assetId")]
    asset_id: String,
    #[serde(rename = "bestBid")]
    best_bid: f64,
    #[serde(rename = "bestAsk")]
    best_ask: f64,
    #[serde(rename = "bestBidSize")]
    best_bid_size: Option<f64>,
    #[serde(rename = "bestAskSize")]
    best_ask_size: Option<f64>,
    #[serde(rename = "timestampMs")]
    timestamp_ms: i64,
}

impl From<WireUpdate> for TopOfBookUpdate {
    fn from(w: WireUpdate) -> Self {
        TopOfBookUpdate {
            asset_id: w.asset_id,
            best_bid: w.best_bid,
            best_ask: w.best_ask,
            best_bid_size: w.best_bid_size,
            best_ask_size: w.best_ask_size,
            timestamp_ms: w.timestamp_ms,
        }
    }
}

/// Reconnect policy for the WS subscription handle.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub ws_url: String,
    pub reconnect_backoff: Vec<Duration>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://ws-subscriptions-clob.polymarket.com/ws/market".to_string(),
            reconnect_backoff: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(5),
                Duration::from_secs(10),
            ],
        }
    }
}

/// Runs the subscription handle forever, forwarding every parsed
/// `TopOfBookUpdate` to the engine's single consumer task. Malformed
/// messages are logged and skipped rather than tearing down the connection;
/// a closed socket triggers the backoff ladder before reconnecting.
pub async fn run_ws_feed(config: FeedConfig, tx: mpsc::UnboundedSender<TopOfBookUpdate>) {
    let mut attempt = 0usize;
    loop {
        info!(url = %config.ws_url, attempt, "connecting top-of-book feed");
        match connect_async(&config.ws_url).await {
            Ok((stream, _response)) => {
                attempt = 0;
                let (mut write, mut read) = stream.split();
                loop {
                    match read.next().await {
                        Some(Ok(Message::Text(text))) => match serde_json::from_str::<WireUpdate>(&text) {
                            Ok(update) => {
                                if tx.send(update.into()).is_err() {
                                    warn!("top-of-book consumer dropped, stopping feed");
                                    return;
                                }
                            }
                            Err(err) => warn!(error = %err, "discarding malformed top-of-book message"),
                        },
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!(error = %err, "top-of-book feed error, reconnecting");
                            break;
                        }
                        None => {
                            warn!("top-of-book feed closed, reconnecting");
                            break;
                        }
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to connect top-of-book feed");
            }
        }

        let delay = config
            .reconnect_backoff
            .get(attempt.min(config.reconnect_backoff.len() - 1))
            .copied()
            .unwrap_or(Duration::from_secs(10));
        attempt += 1;
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_update_maps_fields_into_top_of_book_update() {
        let raw = r#"{"assetId":"tok-1","bestBid":0.4,"bestAsk":0.42,"bestBidSize":10.0,"bestAskSize":5.0,"timestampMs":1000}"#;
        let wire: WireUpdate = serde_json::from_str(raw).unwrap();
        let update: TopOfBookUpdate = wire.into();
        assert_eq!(update.asset_id, "tok-1");
        assert_eq!(update.best_bid, 0.4);
        assert_eq!(update.best_ask_size, Some(5.0));
        assert_eq!(update.timestamp_ms, 1000);
    }

    #[test]
    fn missing_optional_sizes_default_to_none() {
        let raw = r#"{"assetId":"tok-1","bestBid":0.4,"bestAsk":0.42,"timestampMs":1000}"#;
        let wire: WireUpdate = serde_json::from_str(raw).unwrap();
        let update: TopOfBookUpdate = wire.into();
        assert_eq!(update.best_bid_size, None);
        assert_eq!(update.best_ask_size, None);
    }
}
