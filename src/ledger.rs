//! Local cash balance and minted-inventory ledgers (§3, §5).
//!
//! `CashLedger` mirrors the atomic compare-and-swap balance pattern used by
//! the sibling engine's order validator (float bits packed into an
//! `AtomicU64`, CAS loop to deduct) rather than a plain `Mutex<f64>`, since
//! the executor's Reserve step and the 5s background refresher both touch
//! the balance from different tasks and neither should block the other.
//! `InventoryLedger` follows the VWAP-ledger shape of `polymarket/inventory.rs`
//! but tracks raw minted balances per `(groupKey, tokenId)` rather than
//! blended average cost, since mint/sell only ever move whole units of
//! already-priced inventory.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use alloy_primitives::Address;

use crate::error::CoreError;
use crate::model::{Opportunity, OrderSide};

/// On-chain position-token balance reader, the boundary the periodic
/// inventory drift-correction refresh reads through (§5, every 10s) — the
/// same split `minter.rs::CollateralSource` uses between a trait callers
/// depend on and a `reqwest`-based production adapter in `relay.rs`.
pub trait TokenBalanceSource: Send + Sync {
    async fn balances(&self, wallet: Address, token_ids: &[String]) -> Result<HashMap<String, f64>, CoreError>;
}

/// Process-local `usdcBalance` (§3) with single-flight reservation.
pub struct CashLedger {
    balance_bits: AtomicU64,
    in_flight: AtomicBool,
}

impl CashLedger {
    pub fn new(initial: f64) -> Self {
        Self {
            balance_bits: AtomicU64::new(initial.to_bits()),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn balance(&self) -> f64 {
        f64::from_bits(self.balance_bits.load(Ordering::SeqCst))
    }

    /// Overwrite the balance unconditionally. Used by the background
    /// refresher, which is only ever invoked when `is_in_flight()` is false
    /// (§5: "writes a reconciled value every 5s ... that only applies when
    /// no dispatch is in flight").
    pub fn set_balance(&self, value: f64) {
        self.balance_bits.store(value.to_bits(), Ordering::SeqCst);
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// `requiredCash = Σ BUY price × size` (§4.5 Reserve, §9 Open Question (b):
    /// SELL legs pay in assets already on hand, not collateral, so they never
    /// contribute to the cash requirement).
    pub fn required_cash(opportunity: &Opportunity, size: f64) -> f64 {
        opportunity
            .legs
            .iter()
            .filter(|leg| leg.side == OrderSide::Buy)
            .map(|leg| leg.price * size)
            .sum()
    }

    /// Guard + Reserve (§4.5): fails if another opportunity is already
    /// in-flight, or if the balance is insufficient. On success the balance
    /// is debited and the single-flight lock is held until `commit`/`refund`.
    pub fn try_reserve(&self, required: f64) -> Result<(), CoreError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CoreError::ValidationRejected {
                index: 0,
                message: "another opportunity is already in flight".to_string(),
            });
        }

        loop {
            let current_bits = self.balance_bits.load(Ordering::SeqCst);
            let current = f64::from_bits(current_bits);
            if current < required {
                self.in_flight.store(false, Ordering::SeqCst);
                return Err(CoreError::InsufficientLocalCash {
                    required,
                    available: current,
                });
            }
            let updated = current - required;
            if self
                .balance_bits
                .compare_exchange_weak(current_bits, updated.to_bits(), Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    /// Settle success: the reservation stands, release the single-flight lock.
    pub fn commit(&self) {
        self.in_flight.store(false, Ordering::SeqCst);
    }

    /// Settle failure (dispatch error, timeout, full rejection): give the
    /// reserved cash back and release the lock.
    pub fn refund(&self, amount: f64) {
        loop {
            let current_bits = self.balance_bits.load(Ordering::SeqCst);
            let current = f64::from_bits(current_bits);
            let updated = current + amount;
            if self
                .balance_bits
                .compare_exchange_weak(current_bits, updated.to_bits(), Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                break;
            }
        }
        self.in_flight.store(false, Ordering::SeqCst);
    }
}

/// Minted inventory, keyed by `(groupKey, tokenId)` (§3 "Inventory ledger").
/// Writers are the minter (increment, on a successful split) and the
/// executor (optimistic decrement, on a dispatched SELL); a periodic refresh
/// rewrites the map from the durable on-chain read to correct drift (§5).
#[derive(Default)]
pub struct InventoryLedger {
    minted: Mutex<HashMap<(String, String), f64>>,
}

impl InventoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn available(&self, group_key: &str, token_id: &str) -> f64 {
        self.minted
            .lock()
            .unwrap()
            .get(&(group_key.to_string(), token_id.to_string()))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn increment(&self, group_key: &str, token_id: &str, amount: f64) {
        let mut guard = self.minted.lock().unwrap();
        *guard.entry((group_key.to_string(), token_id.to_string())).or_insert(0.0) += amount;
    }

    /// Optimistic decrement on SELL dispatch (§5 "mintedInventory"). Errors
    /// rather than going negative; the executor should have capped size to
    /// available inventory in the sizer already, so this is a last-ditch
    /// guard against a race with another decrementer.
    pub fn try_decrement(&self, group_key: &str, token_id: &str, amount: f64) -> Result<(), CoreError> {
        let mut guard = self.minted.lock().unwrap();
        let key = (group_key.to_string(), token_id.to_string());
        let current = guard.get(&key).copied().unwrap_or(0.0);
        if current < amount {
            return Err(CoreError::InsufficientInventory {
                token_id: token_id.to_string(),
                required: amount,
                available: current,
            });
        }
        guard.insert(key, current - amount);
        Ok(())
    }

    /// Periodic drift-correction refresh (§5, every 10s): rewrite the known
    /// balances for one group from the durable ledger / on-chain read.
    pub fn refresh_group(&self, group_key: &str, balances: HashMap<String, f64>) {
        let mut guard = self.minted.lock().unwrap();
        guard.retain(|(g, _), _| g != group_key);
        for (token_id, amount) in balances {
            guard.insert((group_key.to_string(), token_id), amount);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OpportunityLeg, Strategy};

    fn opp_with(legs: Vec<(OrderSide, f64)>) -> Opportunity {
        Opportunity {
            group_key: "g".to_string(),
            strategy: Strategy::TriangleBuy,
            legs: legs
                .into_iter()
                .map(|(side, price)| OpportunityLeg {
                    token_id: "tok".to_string(),
                    side,
                    price,
                    book_size: Some(100.0),
                    neg_risk: false,
                })
                .collect(),
            profit_abs: 0.1,
            profit_bps: 100.0,
            timestamp_ms: 0,
            reason: String::new(),
        }
    }

    #[test]
    fn required_cash_counts_buy_legs_only() {
        let opp = opp_with(vec![(OrderSide::Buy, 0.6), (OrderSide::Sell, 0.3), (OrderSide::Buy, 0.1)]);
        assert!((CashLedger::required_cash(&opp, 10.0) - 7.0).abs() < 1e-9);
    }

    #[test]
    fn reserve_then_refund_restores_balance() {
        let ledger = CashLedger::new(100.0);
        ledger.try_reserve(40.0).unwrap();
        assert!((ledger.balance() - 60.0).abs() < 1e-9);
        assert!(ledger.is_in_flight());
        ledger.refund(40.0);
        assert!((ledger.balance() - 100.0).abs() < 1e-9);
        assert!(!ledger.is_in_flight());
    }

    #[test]
    fn reserve_rejects_second_in_flight_opportunity() {
        let ledger = CashLedger::new(100.0);
        ledger.try_reserve(10.0).unwrap();
        assert!(ledger.try_reserve(10.0).is_err());
    }

    #[test]
    fn reserve_rejects_insufficient_balance() {
        let ledger = CashLedger::new(5.0);
        let err = ledger.try_reserve(10.0).unwrap_err();
        assert!(matches!(err, CoreError::InsufficientLocalCash { .. }));
        assert!(!ledger.is_in_flight());
    }

    #[test]
    fn inventory_increment_and_decrement_roundtrip() {
        let ledger = InventoryLedger::new();
        ledger.increment("g", "tok", 10.0);
        assert!((ledger.available("g", "tok") - 10.0).abs() < 1e-9);
        ledger.try_decrement("g", "tok", 4.0).unwrap();
        assert!((ledger.available("g", "tok") - 6.0).abs() < 1e-9);
    }

    #[test]
    fn inventory_decrement_rejects_when_insufficient() {
        let ledger = InventoryLedger::new();
        ledger.increment("g", "tok", 2.0);
        assert!(ledger.try_decrement("g", "tok", 5.0).is_err());
    }

    #[test]
    fn inventory_refresh_replaces_group_balances() {
        let ledger = InventoryLedger::new();
        ledger.increment("g", "tok", 10.0);
        let mut fresh = HashMap::new();
        fresh.insert("tok".to_string(), 3.0);
        ledger.refresh_group("g", fresh);
        assert!((ledger.available("g", "tok") - 3.0).abs() < 1e-9);
    }
}
