//! Position Manager (§4.7): reconciles each batch 3s after submission,
//! classifying every order as a terminal success, a partial fill whose
//! remainder needs an aggressive-price replacement, or an on-chain revert
//! that needs identical resubmission. Replacement legs from one batch
//! coalesce into a single follow-up dispatch.
//!
//! The 60s reconciliation dedup window is the same shape as the reference
//! engine's `user_ws.rs::DedupCache` (`HashMap<String, Instant>` with TTL and
//! max-entries eviction) — reused here keyed by order id instead of message
//! id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::clob_http::ClobHttpClient;
use crate::config::PositionManagerConfig;
use crate::executor::{to_base_units, Executor};
use crate::model::OrderSide;
use crate::signing::OrderToSign;

const MATCHED: &str = "MATCHED";
const FAILED: &str = "FAILED";

/// Enough of the original order to rebuild a replacement leg without
/// re-reading the opportunity that produced it.
#[derive(Debug, Clone)]
pub struct SubmittedOrder {
    pub order_id: String,
    pub token_id: String,
    pub side: OrderSide,
    pub price: f64,
    pub size: f64,
    pub neg_risk: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    PartialFillCanceled,
    Reverted,
}

#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub failure_type: FailureType,
    pub retry_count: u32,
    pub original_order: SubmittedOrder,
    pub retry_order_ids: Vec<String>,
}

struct DedupCache {
    seen_at: HashMap<String, Instant>,
    ttl: Duration,
    max_entries: usize,
}

impl DedupCache {
    fn new(ttl: Duration, max_entries: usize) -> Self {
        Self { seen_at: HashMap::with_capacity(max_entries.min(4096)), ttl, max_entries }
    }

    fn remember(&mut self, key: String) -> bool {
        let now = Instant::now();
        self.evict_expired(now);
        if self.seen_at.contains_key(&key) {
            return false;
        }
        self.seen_at.insert(key, now);
        self.evict_oldest_if_needed();
        true
    }

    fn evict_expired(&mut self, now: Instant) {
        let cutoff = now.checked_sub(self.ttl).unwrap_or(now);
        self.seen_at.retain(|_, ts| *ts >= cutoff);
    }

    fn evict_oldest_if_needed(&mut self) {
        while self.seen_at.len() > self.max_entries {
            let oldest = self.seen_at.iter().min_by_key(|(_, ts)| **ts).map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    self.seen_at.remove(&key);
                }
                None => break,
            }
        }
    }
}

fn build_replacement(order: &SubmittedOrder, price: f64, size: f64) -> OrderToSign {
    let (maker_amount, taker_amount) = match order.side {
        OrderSide::Buy => (to_base_units(price * size), to_base_units(size)),
        OrderSide::Sell => (to_base_units(size), to_base_units(price * size)),
    };
    OrderToSign {
        token_id: order.token_id.clone(),
        maker_amount,
        taker_amount,
        side: order.side,
        neg_risk: order.neg_risk,
        salt: rand::random(),
    }
}

pub struct PositionManager {
    http: ClobHttpClient,
    executor: Arc<Executor>,
    config: PositionManagerConfig,
    dedup: Mutex<DedupCache>,
    trades: Mutex<HashMap<String, TradeRecord>>,
}

impl PositionManager {
    pub fn new(http: ClobHttpClient, executor: Arc<Executor>, config: PositionManagerConfig) -> Self {
        let dedup = DedupCache::new(Duration::from_millis(config.dedup_window_ms.max(0) as u64), 50_000);
        Self { http, executor, config, dedup: Mutex::new(dedup), trades: Mutex::new(HashMap::new()) }
    }

    /// Spawns the 3s-delayed reconciliation for one submitted batch (§4.7,
    /// §5 "fire-and-forget" continuation shape reused one layer up).
    pub fn schedule_reconciliation(self: &Arc<Self>, orders: Vec<SubmittedOrder>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(manager.config.reconcile_delay_ms)).await;
            manager.reconcile_batch(orders).await;
        });
    }

    async fn reconcile_batch(&self, orders: Vec<SubmittedOrder>) {
        let mut replacements = Vec::new();
        let mut origins = Vec::new();
        for order in orders {
            {
                let mut dedup = self.dedup.lock().await;
                if !dedup.remember(order.order_id.clone()) {
                    continue;
                }
            }
            if let Some(replacement) = self.reconcile_one(&order).await {
                origins.push(order.order_id.clone());
                replacements.push(replacement);
            }
        }

        if replacements.is_empty() {
            return;
        }

        match self.executor.sign_and_dispatch(replacements).await {
            Ok(responses) => {
                let matched = responses.iter().filter(|r| r.order_id.is_some()).count();
                info!(matched, total = responses.len(), "reconciliation batch dispatched");
                self.record_retry_ids(&origins, &responses).await;
            }
            Err(err) => warn!(error = %err, "reconciliation batch dispatch failed"),
        }
    }

    async fn record_retry_ids(&self, origins: &[String], responses: &[crate::clob_http::OrderResponseEntry]) {
        let mut trades = self.trades.lock().await;
        for (original_id, response) in origins.iter().zip(responses.iter()) {
            if let (Some(record), Some(retry_id)) = (trades.get_mut(original_id), response.order_id.clone()) {
                record.retry_order_ids.push(retry_id);
            }
        }
    }

    /// Classifies one order and returns the replacement leg to submit, if
    /// any (§4.7: partial-fill-canceled ⇒ aggressive replacement, reverted ⇒
    /// identical resubmission, else terminal success with no action).
    async fn reconcile_one(&self, order: &SubmittedOrder) -> Option<OrderToSign> {
        let status = match self.http.get_order_status(&order.order_id).await {
            Ok(status) => status,
            Err(err) => {
                warn!(order_id = %order.order_id, error = %err, "status poll failed, skipping reconciliation this round");
                return None;
            }
        };

        let remaining = status.original_size - status.size_matched;

        if status.status == MATCHED && remaining > 1e-9 {
            self.record_failure(order, FailureType::PartialFillCanceled).await;
            let price = match order.side {
                OrderSide::Buy => self.config.aggressive_buy_price,
                OrderSide::Sell => self.config.aggressive_sell_price,
            };
            return Some(build_replacement(order, price, remaining));
        }

        if status.status == MATCHED && remaining.abs() <= 1e-9 {
            if let Some(trade_id) = status.associate_trades.first() {
                match self.http.get_trade_status(trade_id).await {
                    Ok(trade) if trade.status == FAILED => {
                        self.record_failure(order, FailureType::Reverted).await;
                        return Some(build_replacement(order, order.price, order.size));
                    }
                    Ok(_) => {}
                    Err(err) => warn!(trade_id, error = %err, "trade status poll failed"),
                }
            }
        }

        None
    }

    async fn record_failure(&self, order: &SubmittedOrder, failure_type: FailureType) {
        let mut trades = self.trades.lock().await;
        let record = trades.entry(order.order_id.clone()).or_insert_with(|| TradeRecord {
            failure_type,
            retry_count: 0,
            original_order: order.clone(),
            retry_order_ids: Vec::new(),
        });
        record.failure_type = failure_type;
        record.retry_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_cache_suppresses_repeat_within_ttl() {
        let mut cache = DedupCache::new(Duration::from_secs(60), 100);
        assert!(cache.remember("order-1".to_string()));
        assert!(!cache.remember("order-1".to_string()));
    }

    #[test]
    fn dedup_cache_evicts_oldest_past_capacity() {
        let mut cache = DedupCache::new(Duration::from_secs(60), 2);
        cache.remember("a".to_string());
        cache.remember("b".to_string());
        cache.remember("c".to_string());
        assert!(cache.seen_at.len() <= 2);
    }

    fn order(side: OrderSide) -> SubmittedOrder {
        SubmittedOrder { order_id: "o1".to_string(), token_id: "tok".to_string(), side, price: 0.5, size: 10.0, neg_risk: false }
    }

    #[test]
    fn aggressive_replacement_uses_configured_buy_price() {
        let replacement = build_replacement(&order(OrderSide::Buy), 0.999, 3.0);
        assert_eq!(replacement.maker_amount, to_base_units(0.999 * 3.0));
        assert_eq!(replacement.taker_amount, to_base_units(3.0));
    }

    #[test]
    fn aggressive_replacement_uses_configured_sell_price() {
        let replacement = build_replacement(&order(OrderSide::Sell), 0.001, 3.0);
        assert_eq!(replacement.maker_amount, to_base_units(3.0));
        assert_eq!(replacement.taker_amount, to_base_units(0.001 * 3.0));
    }
}
