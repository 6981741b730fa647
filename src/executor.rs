//! Executor (§4.5): turns a sized opportunity into a signed, batched order
//! submission. Guard → Reserve run synchronously before `try_execute`
//! returns; Build → Sign → Authenticate → Dispatch → Settle run inside a
//! spawned continuation, so the caller never awaits the network round trip
//! (§5 "fire-and-forget ... the lock is released inside the dispatch
//! continuation").

use std::sync::Arc;

use rand::Rng;
use tracing::{info, warn};

use crate::clob_http::ClobHttpClient;
use crate::config::ExecutorConfig;
use crate::error::CoreError;
use crate::ledger::{CashLedger, InventoryLedger};
use crate::model::{Opportunity, OrderSide};
use crate::position_manager::SubmittedOrder;
use crate::signing::{OrderToSign, SignerState};

const AMOUNT_SCALE: f64 = 1_000_000.0;

pub(crate) fn to_base_units(value: f64) -> alloy_primitives::U256 {
    alloy_primitives::U256::from((value * AMOUNT_SCALE).round().max(0.0) as u128)
}

/// One SELL leg's worth of replenishment the minter should schedule, so the
/// wallet has inventory again for the next emission of this trio (§4.6
/// "triggered whenever a SELL order is dispatched").
#[derive(Debug, Clone, PartialEq)]
pub struct MintTrigger {
    pub group_key: String,
    pub token_id: String,
    pub size: f64,
}

/// Builds the unsigned order list for one opportunity at the given size
/// (§4.5 Build). Maker/taker assignment follows the side: BUY pays
/// collateral and receives shares, SELL gives shares and receives
/// collateral.
fn build_orders_for(opportunity: &Opportunity, size: f64) -> Vec<OrderToSign> {
    opportunity
        .legs
        .iter()
        .map(|leg| {
            let (maker_amount, taker_amount) = match leg.side {
                OrderSide::Buy => (to_base_units(leg.price * size), to_base_units(size)),
                OrderSide::Sell => (to_base_units(size), to_base_units(leg.price * size)),
            };
            OrderToSign {
                token_id: leg.token_id.clone(),
                maker_amount,
                taker_amount,
                side: leg.side,
                neg_risk: leg.neg_risk,
                salt: rand::thread_rng().gen(),
            }
        })
        .collect()
}

fn mint_triggers_for(opportunity: &Opportunity, size: f64) -> Vec<MintTrigger> {
    opportunity
        .legs
        .iter()
        .filter(|leg| leg.side == OrderSide::Sell)
        .map(|leg| MintTrigger {
            group_key: opportunity.group_key.clone(),
            token_id: leg.token_id.clone(),
            size,
        })
        .collect()
}

pub struct Executor {
    config: ExecutorConfig,
    cash: Arc<CashLedger>,
    inventory: Arc<InventoryLedger>,
    signer: SignerState,
    http: ClobHttpClient,
    mint_tx: Option<tokio::sync::mpsc::UnboundedSender<MintTrigger>>,
    submitted_tx: Option<tokio::sync::mpsc::UnboundedSender<Vec<SubmittedOrder>>>,
}

impl Executor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ExecutorConfig,
        cash: Arc<CashLedger>,
        inventory: Arc<InventoryLedger>,
        signer: SignerState,
        http: ClobHttpClient,
        mint_tx: Option<tokio::sync::mpsc::UnboundedSender<MintTrigger>>,
        submitted_tx: Option<tokio::sync::mpsc::UnboundedSender<Vec<SubmittedOrder>>>,
    ) -> Self {
        Self { config, cash, inventory, signer, http, mint_tx, submitted_tx }
    }

    /// Guard + Reserve run here, synchronously; Build through Settle are
    /// handed to a spawned task. Returns once the reservation is resolved
    /// one way or the other — not once the batch has actually settled.
    pub fn try_execute(self: &Arc<Self>, opportunity: Opportunity, size: f64, now_ms: i64) -> Result<(), CoreError> {
        let age_ms = opportunity.age_ms(now_ms);
        if age_ms > self.config.opportunity_timeout_ms {
            return Err(CoreError::StaleOpportunity { age_ms, limit_ms: self.config.opportunity_timeout_ms });
        }
        if size <= 0.0 {
            return Ok(());
        }
        if opportunity.legs.len() > self.config.max_orders_per_batch {
            return Err(CoreError::ValidationRejected {
                index: 0,
                message: format!("opportunity has {} legs, exceeds max batch size {}", opportunity.legs.len(), self.config.max_orders_per_batch),
            });
        }
        if !self.config.real_trading_enabled {
            info!(
                group = %opportunity.group_key,
                strategy = ?opportunity.strategy,
                profit_bps = opportunity.profit_bps,
                size,
                "REAL_TRADING_ENABLED is false, logging opportunity without dispatching"
            );
            return Ok(());
        }
        let pnl_percent = opportunity.profit_bps / 100.0;
        if pnl_percent < self.config.min_pnl_threshold_percent {
            return Ok(());
        }

        let required = CashLedger::required_cash(&opportunity, size);
        self.cash.try_reserve(required)?;

        let orders = build_orders_for(&opportunity, size);
        let executor = Arc::clone(self);
        tokio::spawn(async move {
            executor.dispatch_continuation(orders, required, opportunity, size).await;
        });
        Ok(())
    }

    /// Sign → Authenticate → Dispatch, reusable by the position manager for
    /// its own compensating-leg batches (§4.7), which bypass cash reservation
    /// since they replace, rather than add to, an already-reserved amount.
    pub async fn sign_and_dispatch(
        &self,
        orders: Vec<OrderToSign>,
    ) -> Result<Vec<crate::clob_http::OrderResponseEntry>, CoreError> {
        let signed = self.signer.sign_batch_orders(&orders).await?;
        match tokio::time::timeout(self.config.dispatch_timeout, self.http.post_batch_orders(signed)).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::TransientNetwork("order dispatch timed out".to_string())),
        }
    }

    async fn dispatch_continuation(&self, orders: Vec<OrderToSign>, required: f64, opportunity: Opportunity, size: f64) {
        match self.sign_and_dispatch(orders).await {
            Ok(responses) => {
                let matched = responses.iter().filter(|r| r.order_id.is_some()).count();
                info!(
                    group = %opportunity.group_key,
                    strategy = ?opportunity.strategy,
                    matched,
                    total = responses.len(),
                    "batch dispatched"
                );
                self.cash.commit();
                self.decrement_sell_inventory(&opportunity, size, &responses);
                self.schedule_mints(&opportunity, size);
                self.schedule_position_tracking(&opportunity, size, &responses);
            }
            Err(err) => {
                warn!(group = %opportunity.group_key, error = %err, "dispatch failed, refunding reservation");
                self.cash.refund(required);
            }
        }
    }

    /// Optimistic decrement of minted inventory for every SELL leg that
    /// actually reached the exchange (§5 "mintedInventory ... writers are the
    /// minter (increment) and executor (decrement on SELL)"). May drift
    /// positive if the order later reverts; the 10s background refresh
    /// corrects that from the durable ledger.
    fn decrement_sell_inventory(&self, opportunity: &Opportunity, size: f64, responses: &[crate::clob_http::OrderResponseEntry]) {
        for (leg, response) in opportunity.legs.iter().zip(responses.iter()) {
            if leg.side != OrderSide::Sell || response.order_id.is_none() {
                continue;
            }
            if let Err(err) = self.inventory.try_decrement(&opportunity.group_key, &leg.token_id, size) {
                warn!(token = %leg.token_id, error = %err, "inventory decrement drifted negative, leaving for background refresh");
            }
        }
    }

    fn schedule_mints(&self, opportunity: &Opportunity, size: f64) {
        let Some(tx) = &self.mint_tx else { return };
        for trigger in mint_triggers_for(opportunity, size) {
            if tx.send(trigger).is_err() {
                warn!("mint queue closed, dropping mint trigger");
                break;
            }
        }
    }

    /// Hands every leg that actually reached the exchange (has an order id)
    /// to the position manager for 3s-delayed reconciliation (§4.7), the
    /// same fire-and-forget handoff `schedule_mints` uses for SELL legs.
    fn schedule_position_tracking(&self, opportunity: &Opportunity, size: f64, responses: &[crate::clob_http::OrderResponseEntry]) {
        let Some(tx) = &self.submitted_tx else { return };
        let submitted: Vec<SubmittedOrder> = opportunity
            .legs
            .iter()
            .zip(responses.iter())
            .filter_map(|(leg, response)| {
                response.order_id.clone().map(|order_id| SubmittedOrder {
                    order_id,
                    token_id: leg.token_id.clone(),
                    side: leg.side,
                    price: leg.price,
                    size,
                    neg_risk: leg.neg_risk,
                })
            })
            .collect();
        if submitted.is_empty() {
            return;
        }
        if tx.send(submitted).is_err() {
            warn!("position tracking channel closed, dropping submitted batch");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OpportunityLeg, Strategy};
    use alloy_primitives::Address;

    fn opp(legs: Vec<OpportunityLeg>, timestamp_ms: i64) -> Opportunity {
        Opportunity {
            group_key: "g".to_string(),
            strategy: Strategy::TriangleBuy,
            legs,
            profit_abs: 0.1,
            profit_bps: 100.0,
            timestamp_ms,
            reason: String::new(),
        }
    }

    fn leg(side: OrderSide, price: f64, neg_risk: bool) -> OpportunityLeg {
        OpportunityLeg { token_id: "tok".to_string(), side, price, book_size: Some(100.0), neg_risk }
    }

    #[test]
    fn build_orders_assigns_maker_taker_by_side() {
        let o = opp(vec![leg(OrderSide::Buy, 0.60, false), leg(OrderSide::Sell, 0.80, false)], 0);
        let orders = build_orders_for(&o, 10.0);
        assert_eq!(orders[0].maker_amount, to_base_units(6.0));
        assert_eq!(orders[0].taker_amount, to_base_units(10.0));
        assert_eq!(orders[1].maker_amount, to_base_units(10.0));
        assert_eq!(orders[1].taker_amount, to_base_units(8.0));
    }

    #[test]
    fn mint_triggers_only_cover_sell_legs() {
        let o = opp(vec![leg(OrderSide::Buy, 0.60, false), leg(OrderSide::Sell, 0.80, true)], 0);
        let triggers = mint_triggers_for(&o, 5.0);
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].token_id, "tok");
        assert_eq!(triggers[0].size, 5.0);
    }

    fn test_signer() -> SignerState {
        SignerState::new(
            "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d",
            Address::ZERO,
            137,
            "0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E".parse().unwrap(),
            "0xC5d563A36AE78145C45a50134d48A1215220f80a".parse().unwrap(),
        )
        .unwrap()
    }

    fn test_http(rest_url: &str) -> ClobHttpClient {
        ClobHttpClient::new(
            rest_url.to_string(),
            crate::clob_http::ClobCredentials {
                address: "0xabc".to_string(),
                api_key: "key".to_string(),
                api_secret: "c2VjcmV0".to_string(),
                passphrase: "pass".to_string(),
            },
        )
    }

    fn executor_with(config: ExecutorConfig, cash: Arc<CashLedger>, inventory: Arc<InventoryLedger>) -> Arc<Executor> {
        let http = test_http(&config.rest_url);
        Arc::new(Executor::new(config, cash, inventory, test_signer(), http, None, None))
    }

    fn test_executor() -> Arc<Executor> {
        let config = ExecutorConfig { real_trading_enabled: true, ..ExecutorConfig::default() };
        executor_with(config, Arc::new(CashLedger::new(100.0)), Arc::new(InventoryLedger::new()))
    }

    #[test]
    fn try_execute_rejects_stale_opportunity_before_touching_cash() {
        let executor = test_executor();
        let o = opp(vec![leg(OrderSide::Buy, 0.60, false)], 0);
        let err = executor.try_execute(o, 10.0, 1_000_000).unwrap_err();
        assert!(matches!(err, CoreError::StaleOpportunity { .. }));
        assert_eq!(executor.cash.balance(), 100.0);
        assert!(!executor.cash.is_in_flight());
    }

    #[test]
    fn try_execute_rejects_insufficient_cash_without_spawning() {
        let executor = test_executor();
        let o = opp(vec![leg(OrderSide::Buy, 50.0, false), leg(OrderSide::Buy, 50.0, false)], 0);
        let err = executor.try_execute(o, 10.0, 0).unwrap_err();
        assert!(matches!(err, CoreError::InsufficientLocalCash { .. }));
        assert_eq!(executor.cash.balance(), 100.0);
    }

    #[test]
    fn try_execute_skips_dispatch_when_real_trading_disabled() {
        let config = ExecutorConfig { real_trading_enabled: false, ..ExecutorConfig::default() };
        let cash = Arc::new(CashLedger::new(100.0));
        let executor = executor_with(config, Arc::clone(&cash), Arc::new(InventoryLedger::new()));
        let o = opp(vec![leg(OrderSide::Buy, 0.60, false)], 0);
        executor.try_execute(o, 10.0, 0).unwrap();
        assert_eq!(cash.balance(), 100.0);
        assert!(!cash.is_in_flight());
    }

    #[test]
    fn try_execute_skips_dispatch_below_min_pnl_threshold() {
        let config = ExecutorConfig { real_trading_enabled: true, min_pnl_threshold_percent: 5.0, ..ExecutorConfig::default() };
        let cash = Arc::new(CashLedger::new(100.0));
        let executor = executor_with(config, Arc::clone(&cash), Arc::new(InventoryLedger::new()));
        // profit_bps = 100.0 from the `opp()` fixture => 1% pnl, below the 5% floor.
        let o = opp(vec![leg(OrderSide::Buy, 0.60, false)], 0);
        executor.try_execute(o, 10.0, 0).unwrap();
        assert_eq!(cash.balance(), 100.0);
        assert!(!cash.is_in_flight());
    }

    #[test]
    fn try_execute_rejects_opportunity_exceeding_max_batch_size() {
        let executor = test_executor();
        let legs: Vec<_> = (0..20).map(|_| leg(OrderSide::Buy, 0.10, false)).collect();
        let o = opp(legs, 0);
        let err = executor.try_execute(o, 1.0, 0).unwrap_err();
        assert!(matches!(err, CoreError::ValidationRejected { .. }));
        assert_eq!(executor.cash.balance(), 100.0);
        assert!(!executor.cash.is_in_flight());
    }

    #[test]
    fn decrement_sell_inventory_only_touches_matched_sell_legs() {
        let inventory = Arc::new(InventoryLedger::new());
        inventory.increment("g", "sold-tok", 20.0);
        let config = ExecutorConfig { real_trading_enabled: true, ..ExecutorConfig::default() };
        let executor = executor_with(config, Arc::new(CashLedger::new(100.0)), Arc::clone(&inventory));

        let o = opp(
            vec![
                OpportunityLeg { token_id: "sold-tok".to_string(), side: OrderSide::Sell, price: 0.80, book_size: Some(100.0), neg_risk: false },
                OpportunityLeg { token_id: "unfilled-tok".to_string(), side: OrderSide::Sell, price: 0.30, book_size: Some(100.0), neg_risk: false },
                OpportunityLeg { token_id: "bought-tok".to_string(), side: OrderSide::Buy, price: 0.10, book_size: Some(100.0), neg_risk: false },
            ],
            0,
        );
        let responses = [
            crate::clob_http::OrderResponseEntry { order_id: Some("1".to_string()), status: None, error_msg: None },
            crate::clob_http::OrderResponseEntry { order_id: None, status: None, error_msg: Some("rejected".to_string()) },
            crate::clob_http::OrderResponseEntry { order_id: Some("3".to_string()), status: None, error_msg: None },
        ];
        executor.decrement_sell_inventory(&o, 5.0, &responses);

        assert_eq!(inventory.available("g", "sold-tok"), 15.0);
        assert_eq!(inventory.available("g", "unfilled-tok"), 0.0);
    }
}
