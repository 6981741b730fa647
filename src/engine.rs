//! Opportunity Detector (§4.3): the hot path. `Engine::on_top_of_book` is the
//! single synchronous entry point — no `await` anywhere in this module, in
//! keeping with §5's "the hot path does not suspend".

use std::collections::HashMap;

use crate::config::EngineConfig;
use crate::model::{
    EngineSnapshot, Group, LegSnapshot, Opportunity, OpportunityLeg, OrderSide, Strategy, TopOfBookUpdate,
    TrioSnapshot,
};
use crate::trio::{LegRole, TrioIndexer};

/// Owns the trio index, per-asset dirty-check cache, and the cooldown map.
/// One `Engine` per process; the hot path mutates it synchronously from a
/// single task (§5 "only the engine thread mutates").
pub struct Engine {
    indexer: TrioIndexer,
    groups: HashMap<String, Group>,
    config: EngineConfig,
    last_seen: HashMap<String, LegSnapshot>,
    cooldowns: HashMap<String, i64>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            indexer: TrioIndexer::new(),
            groups: HashMap::new(),
            config,
            last_seen: HashMap::new(),
            cooldowns: HashMap::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Point-in-time export of every trio's leg state, for the admin
    /// surface's `/snapshot` endpoint (§3a expansion). `order_in_flight` is
    /// threaded in by the caller, since the executor's single-flight lock
    /// lives outside the engine.
    pub fn snapshot(&self, order_in_flight: bool) -> EngineSnapshot {
        let mut trios = Vec::new();
        for (group_key, index) in self.indexer.iter() {
            for (trio_idx, trio) in index.trios.iter().enumerate() {
                trios.push(TrioSnapshot {
                    group_key: group_key.clone(),
                    trio_idx,
                    lower_yes_token: trio.lower_yes_token.clone(),
                    upper_no_token: trio.upper_no_token.clone(),
                    range_no_token: trio.range_no_token.clone(),
                    lower_yes: trio.lower_yes,
                    upper_no: trio.upper_no,
                    range_no: trio.range_no,
                });
            }
        }
        EngineSnapshot { trios, order_in_flight }
    }

    /// Applies a fresh group list from the structure builder (§4.1 boot / periodic
    /// resync / expiry cleanup). Groups not present in `groups` are dropped.
    pub fn rebuild_groups(&mut self, groups: Vec<Group>) {
        self.indexer.rebuild(&groups);
        self.groups = groups.into_iter().map(|g| (g.group_key.clone(), g)).collect();
    }

    /// `onTopOfBook(update)` (§4.3). Runs the dirty check, then dispatches to
    /// the triangle and range evaluators for every leg the update touches.
    pub fn on_top_of_book(&mut self, update: &TopOfBookUpdate) -> Vec<Opportunity> {
        if update.best_bid == 0.0 || update.best_ask == 0.0 {
            return Vec::new();
        }

        if let Some(prev) = self.last_seen.get(&update.asset_id) {
            let same_prices = prev.best_bid == Some(update.best_bid) && prev.best_ask == Some(update.best_ask);
            if prev.timestamp_ms >= update.timestamp_ms || same_prices {
                return Vec::new();
            }
        }

        let snapshot = LegSnapshot {
            best_bid: Some(update.best_bid),
            best_ask: Some(update.best_ask),
            best_bid_size: update.best_bid_size,
            best_ask_size: update.best_ask_size,
            timestamp_ms: update.timestamp_ms,
        };
        self.last_seen.insert(update.asset_id.clone(), snapshot);

        let touched = self.indexer.apply_update(&update.asset_id, snapshot);
        let mut emitted = Vec::new();
        for (group_key, trio_idx, role) in touched {
            match role {
                LegRole::Triangle(_) => {
                    if let Some(opp) = self.evaluate_triangle(&group_key, trio_idx, update.timestamp_ms) {
                        emitted.push(opp);
                    }
                }
                LegRole::Range(_) => {
                    emitted.extend(self.evaluate_range(&group_key, trio_idx, update.timestamp_ms));
                }
            }
        }
        emitted
    }

    /// `cooldowns[emitKey]` check-and-set: suppress re-emission inside the
    /// window, otherwise record `now` as the new last-emitted time.
    fn check_and_mark_cooldown(&mut self, emit_key: &str, now_ms: i64) -> bool {
        if let Some(&last) = self.cooldowns.get(emit_key) {
            if now_ms - last < self.config.cooldown_ms {
                return false;
            }
        }
        self.cooldowns.insert(emit_key.to_string(), now_ms);
        true
    }

    fn evaluate_triangle(&mut self, group_key: &str, trio_idx: usize, now_ms: i64) -> Option<Opportunity> {
        let staleness = self.config.staleness_ms;
        let (lower, upper, range, lower_tok, upper_tok, range_tok, neg_lower, neg_upper, neg_range) = {
            let group = self.groups.get(group_key)?;
            let index = self.indexer.index_for(group_key)?;
            let trio = index.trios.get(trio_idx)?;
            (
                trio.lower_yes,
                trio.upper_no,
                trio.range_no,
                trio.lower_yes_token.clone(),
                trio.upper_no_token.clone(),
                trio.range_no_token.clone(),
                group.parents[trio.parent_lower_idx].neg_risk,
                group.parents[trio.parent_upper_idx].neg_risk,
                group.children[trio.range_idx].neg_risk,
            )
        };

        if !(lower.is_present() && upper.is_present() && range.is_present()) {
            return None;
        }
        if !(lower.fresh_at(now_ms, staleness) && upper.fresh_at(now_ms, staleness) && range.fresh_at(now_ms, staleness)) {
            return None;
        }

        let ask_sum = lower.best_ask.unwrap() + upper.best_ask.unwrap() + range.best_ask.unwrap();
        let bid_sum = lower.best_bid.unwrap() + upper.best_bid.unwrap() + range.best_bid.unwrap();
        const PAYOUT: f64 = 2.0;

        let profit_buy = PAYOUT - ask_sum;
        let bps_buy = if ask_sum > 0.0 { profit_buy / ask_sum * 10000.0 } else { 0.0 };
        let buy_qualifies = profit_buy >= self.config.min_profit_abs && bps_buy >= self.config.min_profit_bps;

        // Buy takes precedence over sell when a trio somehow qualifies for
        // both (§4.3 "ordering / tie-breaks") — in practice impossible since
        // bid <= ask, but the branch order encodes the rule regardless.
        if buy_qualifies {
            let legs = vec![
                OpportunityLeg {
                    token_id: lower_tok,
                    side: OrderSide::Buy,
                    price: lower.best_ask.unwrap(),
                    book_size: lower.best_ask_size,
                    neg_risk: neg_lower,
                },
                OpportunityLeg {
                    token_id: upper_tok,
                    side: OrderSide::Buy,
                    price: upper.best_ask.unwrap(),
                    book_size: upper.best_ask_size,
                    neg_risk: neg_upper,
                },
                OpportunityLeg {
                    token_id: range_tok,
                    side: OrderSide::Buy,
                    price: range.best_ask.unwrap(),
                    book_size: range.best_ask_size,
                    neg_risk: neg_range,
                },
            ];
            let opp = Opportunity {
                group_key: group_key.to_string(),
                strategy: Strategy::TriangleBuy,
                legs,
                profit_abs: profit_buy,
                profit_bps: bps_buy,
                timestamp_ms: now_ms,
                reason: String::new(),
            };
            return self.check_and_mark_cooldown(&opp.emit_key(), now_ms).then_some(opp);
        }

        if !self.config.sell_arb_enabled {
            return None;
        }
        let profit_sell = bid_sum - PAYOUT;
        let bps_sell = if PAYOUT > 0.0 { profit_sell / PAYOUT * 10000.0 } else { 0.0 };
        if profit_sell >= self.config.min_profit_abs && bps_sell >= self.config.min_profit_bps {
            let legs = vec![
                OpportunityLeg {
                    token_id: lower_tok,
                    side: OrderSide::Sell,
                    price: lower.best_bid.unwrap(),
                    book_size: lower.best_bid_size,
                    neg_risk: neg_lower,
                },
                OpportunityLeg {
                    token_id: upper_tok,
                    side: OrderSide::Sell,
                    price: upper.best_bid.unwrap(),
                    book_size: upper.best_bid_size,
                    neg_risk: neg_upper,
                },
                OpportunityLeg {
                    token_id: range_tok,
                    side: OrderSide::Sell,
                    price: range.best_bid.unwrap(),
                    book_size: range.best_bid_size,
                    neg_risk: neg_range,
                },
            ];
            let opp = Opportunity {
                group_key: group_key.to_string(),
                strategy: Strategy::TriangleSell,
                legs,
                profit_abs: profit_sell,
                profit_bps: bps_sell,
                timestamp_ms: now_ms,
                reason: String::new(),
            };
            return self.check_and_mark_cooldown(&opp.emit_key(), now_ms).then_some(opp);
        }
        None
    }

    fn evaluate_range(&mut self, group_key: &str, trio_idx: usize, now_ms: i64) -> Vec<Opportunity> {
        let staleness = self.config.staleness_ms;
        let Some((pl, pu, rc, pl_tok, pu_tok, rc_tok, neg_pl, neg_pu, neg_rc)) = (|| {
            let group = self.groups.get(group_key)?;
            let index = self.indexer.index_for(group_key)?;
            let trio = index.trios.get(trio_idx)?;
            let range = index.range_legs.get(trio_idx)?;
            Some((
                range.parent_lower_yes,
                range.parent_upper_yes,
                range.range_yes,
                range.parent_lower_yes_token.clone(),
                range.parent_upper_yes_token.clone(),
                range.range_yes_token.clone(),
                group.parents[trio.parent_lower_idx].neg_risk,
                group.parents[trio.parent_upper_idx].neg_risk,
                group.children[trio.range_idx].neg_risk,
            ))
        })() else {
            return Vec::new();
        };

        if !(pl.is_present() && pu.is_present() && rc.is_present()) {
            return Vec::new();
        }
        if !(pl.fresh_at(now_ms, staleness) && pu.fresh_at(now_ms, staleness) && rc.fresh_at(now_ms, staleness)) {
            return Vec::new();
        }

        let mut out = Vec::new();

        // Unbundle: SELL parent_lower_YES, BUY range_YES, BUY parent_upper_YES.
        let unbundle_cost = rc.best_ask.unwrap() + pu.best_ask.unwrap();
        let unbundle_profit = pl.best_bid.unwrap() - unbundle_cost;
        let unbundle_bps = if unbundle_cost > 0.0 { unbundle_profit / unbundle_cost * 10000.0 } else { 0.0 };
        if unbundle_profit >= self.config.min_profit_abs && unbundle_bps >= self.config.min_profit_bps {
            let legs = vec![
                OpportunityLeg {
                    token_id: pl_tok.clone(),
                    side: OrderSide::Sell,
                    price: pl.best_bid.unwrap(),
                    book_size: pl.best_bid_size,
                    neg_risk: neg_pl,
                },
                OpportunityLeg {
                    token_id: rc_tok.clone(),
                    side: OrderSide::Buy,
                    price: rc.best_ask.unwrap(),
                    book_size: rc.best_ask_size,
                    neg_risk: neg_rc,
                },
                OpportunityLeg {
                    token_id: pu_tok.clone(),
                    side: OrderSide::Buy,
                    price: pu.best_ask.unwrap(),
                    book_size: pu.best_ask_size,
                    neg_risk: neg_pu,
                },
            ];
            let opp = Opportunity {
                group_key: group_key.to_string(),
                strategy: Strategy::RangeUnbundle,
                legs,
                profit_abs: unbundle_profit,
                profit_bps: unbundle_bps,
                timestamp_ms: now_ms,
                reason: String::new(),
            };
            if self.check_and_mark_cooldown(&opp.emit_key(), now_ms) {
                out.push(opp);
            }
        }

        // Bundle: BUY parent_lower_YES, SELL range_YES, SELL parent_upper_YES.
        let bundle_ask = pl.best_ask.unwrap();
        let bundle_revenue = rc.best_bid.unwrap() + pu.best_bid.unwrap();
        let bundle_profit = bundle_revenue - bundle_ask;
        let bundle_bps = if bundle_ask > 0.0 { bundle_profit / bundle_ask * 10000.0 } else { 0.0 };
        if bundle_profit >= self.config.min_profit_abs && bundle_bps >= self.config.min_profit_bps {
            let legs = vec![
                OpportunityLeg {
                    token_id: pl_tok,
                    side: OrderSide::Buy,
                    price: bundle_ask,
                    book_size: pl.best_ask_size,
                    neg_risk: neg_pl,
                },
                OpportunityLeg {
                    token_id: rc_tok,
                    side: OrderSide::Sell,
                    price: rc.best_bid.unwrap(),
                    book_size: rc.best_bid_size,
                    neg_risk: neg_rc,
                },
                OpportunityLeg {
                    token_id: pu_tok,
                    side: OrderSide::Sell,
                    price: pu.best_bid.unwrap(),
                    book_size: pu.best_bid_size,
                    neg_risk: neg_pu,
                },
            ];
            let opp = Opportunity {
                group_key: group_key.to_string(),
                strategy: Strategy::RangeBundle,
                legs,
                profit_abs: bundle_profit,
                profit_bps: bundle_bps,
                timestamp_ms: now_ms,
                reason: String::new(),
            };
            if self.check_and_mark_cooldown(&opp.emit_key(), now_ms) {
                out.push(opp);
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MarketKind;

    fn market(id: &str, kind: MarketKind, lower: f64, upper: Option<f64>) -> crate::model::MarketDescriptor {
        crate::model::MarketDescriptor {
            market_id: id.to_string(),
            slug: format!("{}-slug", id),
            group_key: "g".to_string(),
            kind,
            lower,
            upper,
            yes_id: Some(format!("{}-yes", id)),
            no_id: Some(format!("{}-no", id)),
            neg_risk: false,
            condition_id: format!("{}-cond", id),
            neg_risk_market_id: None,
            end_date_ms: 1_000_000,
        }
    }

    fn group() -> Group {
        Group {
            group_key: "g".to_string(),
            asset: "btc".to_string(),
            end_date_ms: 1_000_000,
            parents: vec![
                market("p1", MarketKind::Threshold, 90000.0, None),
                market("p2", MarketKind::Threshold, 92000.0, None),
            ],
            children: vec![market("c1", MarketKind::Bracket, 90000.0, Some(92000.0))],
        }
    }

    fn test_config() -> EngineConfig {
        EngineConfig {
            min_profit_abs: 0.005,
            min_profit_bps: 30.0,
            cooldown_ms: 0,
            staleness_ms: 5000,
            sell_arb_enabled: true,
        }
    }

    fn update(asset: &str, bid: f64, ask: f64, ts: i64) -> TopOfBookUpdate {
        TopOfBookUpdate {
            asset_id: asset.to_string(),
            best_bid: bid,
            best_ask: ask,
            best_bid_size: Some(100.0),
            best_ask_size: Some(100.0),
            timestamp_ms: ts,
        }
    }

    #[test]
    fn triangle_buy_emits_when_ask_sum_below_two() {
        let mut engine = Engine::new(test_config());
        engine.rebuild_groups(vec![group()]);

        engine.on_top_of_book(&update("p1-yes", 0.58, 0.60, 1));
        engine.on_top_of_book(&update("p2-no", 0.48, 0.50, 2));
        let opps = engine.on_top_of_book(&update("c1-no", 0.78, 0.80, 3));

        assert_eq!(opps.len(), 1);
        assert_eq!(opps[0].strategy, Strategy::TriangleBuy);
        assert!((opps[0].profit_abs - 0.10).abs() < 1e-9);
    }

    #[test]
    fn triangle_sell_disabled_by_default_config() {
        let mut config = test_config();
        config.sell_arb_enabled = false;
        let mut engine = Engine::new(config);
        engine.rebuild_groups(vec![group()]);

        engine.on_top_of_book(&update("p1-yes", 0.90, 0.92, 1));
        engine.on_top_of_book(&update("p2-no", 0.90, 0.92, 2));
        let opps = engine.on_top_of_book(&update("c1-no", 0.90, 0.92, 3));
        assert!(opps.is_empty());
    }

    #[test]
    fn range_unbundle_emits_on_yes_side_prices() {
        let mut engine = Engine::new(test_config());
        engine.rebuild_groups(vec![group()]);

        engine.on_top_of_book(&update("p1-yes", 0.80, 0.82, 1));
        engine.on_top_of_book(&update("p2-yes", 0.38, 0.40, 2));
        let opps = engine.on_top_of_book(&update("c1-yes", 0.28, 0.30, 3));

        let unbundle: Vec<_> = opps.iter().filter(|o| o.strategy == Strategy::RangeUnbundle).collect();
        assert_eq!(unbundle.len(), 1);
        assert!((unbundle[0].profit_abs - 0.10).abs() < 1e-9);
    }

    #[test]
    fn dirty_check_suppresses_duplicate_prices() {
        let mut engine = Engine::new(test_config());
        engine.rebuild_groups(vec![group()]);

        engine.on_top_of_book(&update("p1-yes", 0.60, 0.62, 1));
        let repeated = engine.on_top_of_book(&update("p1-yes", 0.60, 0.62, 2));
        assert!(repeated.is_empty());
    }

    #[test]
    fn cooldown_suppresses_rapid_reemission() {
        let mut config = test_config();
        config.cooldown_ms = 10_000;
        let mut engine = Engine::new(config);
        engine.rebuild_groups(vec![group()]);

        engine.on_top_of_book(&update("p1-yes", 0.58, 0.60, 1));
        engine.on_top_of_book(&update("p2-no", 0.48, 0.50, 2));
        let first = engine.on_top_of_book(&update("c1-no", 0.78, 0.80, 3));
        assert_eq!(first.len(), 1);

        let second = engine.on_top_of_book(&update("c1-no", 0.78, 0.80, 4));
        assert!(second.is_empty(), "cooldown should suppress immediate re-emission");
    }

    #[test]
    fn stale_leg_blocks_evaluation() {
        let mut engine = Engine::new(test_config());
        engine.rebuild_groups(vec![group()]);

        engine.on_top_of_book(&update("p1-yes", 0.58, 0.60, 1));
        engine.on_top_of_book(&update("p2-no", 0.48, 0.50, 2));
        let opps = engine.on_top_of_book(&update("c1-no", 0.78, 0.80, 10_000));
        assert!(opps.is_empty(), "p1-yes/p2-no are now stale relative to the third update");
    }

    #[test]
    fn snapshot_exports_one_trio_per_group() {
        let mut engine = Engine::new(test_config());
        engine.rebuild_groups(vec![group()]);
        engine.on_top_of_book(&update("p1-yes", 0.58, 0.60, 1));

        let snapshot = engine.snapshot(false);
        assert_eq!(snapshot.trios.len(), 1);
        assert_eq!(snapshot.trios[0].group_key, "g");
        assert!(!snapshot.order_in_flight);
        assert_eq!(snapshot.trios[0].lower_yes.best_bid, Some(0.58));
    }
}
