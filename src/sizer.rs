//! Sizer (§4.4): collapses an [`Opportunity`] to a single executable size
//! every leg can satisfy, capped by cash, minted inventory, and top-of-book
//! depth. Rounding rules (two-decimal shares, four-decimal collateral) mirror
//! the sibling engine's order-preparation step (`executor/validator.rs`'s
//! `prepare_batch_orders`), which rounds size before quantizing maker/taker
//! amounts for the same reason: the exchange rejects sub-cent-precision
//! quantities.

use crate::config::SizerConfig;
use crate::ledger::InventoryLedger;
use crate::model::{Opportunity, OrderSide};

/// Rounds `value` to `decimals` fractional digits (half-up), matching the
/// `(value * 10^d).round() / 10^d` pattern used throughout the order-prep
/// pipeline this is grounded on.
fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// `sizer.size(opportunity, usdc_balance, inventory) → f64` (§4.4). Returns
/// `0.0` when any leg is missing price/depth or the result rounds below one
/// contract — the caller treats that as "skip".
pub fn size_opportunity(
    opportunity: &Opportunity,
    usdc_balance: f64,
    inventory: &InventoryLedger,
    config: &SizerConfig,
) -> f64 {
    let buy_legs: Vec<_> = opportunity.legs.iter().filter(|l| l.side == OrderSide::Buy).collect();
    let sell_legs: Vec<_> = opportunity.legs.iter().filter(|l| l.side == OrderSide::Sell).collect();

    let mut cap = config.default_size;

    if !buy_legs.is_empty() {
        let per_leg_budget = usdc_balance / buy_legs.len() as f64;
        for leg in &buy_legs {
            if leg.price <= 0.0 {
                return 0.0;
            }
            let by_cash = per_leg_budget / leg.price;
            cap = cap.min(by_cash);
            match leg.book_size {
                Some(depth) => cap = cap.min(depth),
                None => return 0.0,
            }
        }
    }

    for leg in &sell_legs {
        let available = inventory.available(&opportunity.group_key, &leg.token_id);
        cap = cap.min(available);
        match leg.book_size {
            Some(depth) => cap = cap.min(depth),
            None => return 0.0,
        }
    }

    if cap <= 0.0 {
        return 0.0;
    }

    let rounded = round_to(cap, config.share_decimals);
    if rounded < config.min_size.min(1.0) {
        return 0.0;
    }
    rounded
}

/// Quantizes a collateral amount to the configured precision, for the
/// maker/taker `usdcAmount` that gets multiplied up to 6-decimal on-chain
/// units before signing (§4.4, §4.5).
pub fn round_collateral(amount: f64, config: &SizerConfig) -> f64 {
    round_to(amount, config.collateral_decimals)
}
