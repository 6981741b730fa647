//! Core data model (§3): market descriptors, groups, leg snapshots, trios,
//! and opportunities. Adapted from the shapes in `polymarket/types.rs` and
//! `polymarket/messages.rs`, generalized from a single fixed YES/NO pair to
//! arbitrary groups of thresholds and brackets.

use serde::{Deserialize, Serialize};

/// Which token of a market: the side that resolves YES, or the side that
/// resolves NO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenSide {
    Yes,
    No,
}

/// Direction of an order placed against the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
}

/// Whether a listed market is a single-bound threshold or a two-bound
/// bracket (§1, §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketKind {
    Threshold,
    Bracket,
}

/// One listed market: immutable after catalogue load for the lifetime of
/// its group (§3 "Market descriptor").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDescriptor {
    pub market_id: String,
    pub slug: String,
    pub group_key: String,
    pub kind: MarketKind,
    pub lower: f64,
    pub upper: Option<f64>,
    pub yes_id: Option<String>,
    pub no_id: Option<String>,
    pub neg_risk: bool,
    pub condition_id: String,
    pub neg_risk_market_id: Option<String>,
    pub end_date_ms: i64,
}

impl MarketDescriptor {
    pub fn has_both_tokens(&self) -> bool {
        self.yes_id.is_some() && self.no_id.is_some()
    }
}

/// All markets sharing `asset + event end date`, split into ordered parents
/// (thresholds, ascending by lower bound) and children (brackets, ascending
/// by lower bound) (§3 "Group").
#[derive(Debug, Clone)]
pub struct Group {
    pub group_key: String,
    pub asset: String,
    pub end_date_ms: i64,
    pub parents: Vec<MarketDescriptor>,
    pub children: Vec<MarketDescriptor>,
}

impl Group {
    pub fn is_eligible(&self) -> bool {
        !self.parents.is_empty()
            && !self.children.is_empty()
            && self.parents.iter().all(MarketDescriptor::has_both_tokens)
            && self.children.iter().all(MarketDescriptor::has_both_tokens)
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.end_date_ms < now_ms
    }
}

/// `{assetId, bestBid?, bestAsk?, bestBidSize?, bestAskSize?, timestampMs?}`
/// (§3 "Leg snapshot"). `Copy` so per-leg state fits a cache line and can be
/// read tear-free without locking (§5).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LegSnapshot {
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub best_bid_size: Option<f64>,
    pub best_ask_size: Option<f64>,
    pub timestamp_ms: i64,
}

impl LegSnapshot {
    pub fn is_present(&self) -> bool {
        self.best_bid.is_some() && self.best_ask.is_some()
    }

    /// Staleness check per §4.3: a leg older than `staleness_ms` is treated
    /// as null for the purposes of profit evaluation.
    pub fn fresh_at(&self, now_ms: i64, staleness_ms: i64) -> bool {
        self.timestamp_ms > 0 && now_ms - self.timestamp_ms <= staleness_ms
    }
}

/// A top-of-book update as received from the (external) top-of-book stream
/// (§6).
#[derive(Debug, Clone)]
pub struct TopOfBookUpdate {
    pub asset_id: String,
    pub best_bid: f64,
    pub best_ask: f64,
    pub best_bid_size: Option<f64>,
    pub best_ask_size: Option<f64>,
    pub timestamp_ms: i64,
}

/// Which role a token plays inside a trio, for the jump table (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrioRole {
    LowerYes,
    UpperNo,
    RangeNo,
}

/// Adjacent threshold pair plus their bracket: three legs whose combined
/// one-of-each fill settles to exactly $2 (§3 "Trio").
#[derive(Debug, Clone)]
pub struct Trio {
    pub parent_lower_idx: usize,
    pub parent_upper_idx: usize,
    pub range_idx: usize,
    pub lower_yes_token: String,
    pub upper_no_token: String,
    pub range_no_token: String,
    pub lower_yes: LegSnapshot,
    pub upper_no: LegSnapshot,
    pub range_no: LegSnapshot,
}

impl Trio {
    pub fn new(
        parent_lower_idx: usize,
        parent_upper_idx: usize,
        range_idx: usize,
        lower_yes_token: String,
        upper_no_token: String,
        range_no_token: String,
    ) -> Self {
        Self {
            parent_lower_idx,
            parent_upper_idx,
            range_idx,
            lower_yes_token,
            upper_no_token,
            range_no_token,
            lower_yes: LegSnapshot::default(),
            upper_no: LegSnapshot::default(),
            range_no: LegSnapshot::default(),
        }
    }

    pub fn leg_mut(&mut self, role: TrioRole) -> &mut LegSnapshot {
        match role {
            TrioRole::LowerYes => &mut self.lower_yes,
            TrioRole::UpperNo => &mut self.upper_no,
            TrioRole::RangeNo => &mut self.range_no,
        }
    }

    pub fn token_for(&self, role: TrioRole) -> &str {
        match role {
            TrioRole::LowerYes => &self.lower_yes_token,
            TrioRole::UpperNo => &self.upper_no_token,
            TrioRole::RangeNo => &self.range_no_token,
        }
    }
}

/// Strategy kinds an opportunity can be emitted under (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    TriangleBuy,
    TriangleSell,
    RangeUnbundle,
    RangeBundle,
}

/// One leg of an opportunity: the token to trade, the direction, the price
/// it was evaluated at, and the book size available at that price.
#[derive(Debug, Clone)]
pub struct OpportunityLeg {
    pub token_id: String,
    pub side: OrderSide,
    pub price: f64,
    pub book_size: Option<f64>,
    pub neg_risk: bool,
}

/// `{groupKey, strategy, legs, profitAbs, profitBps, timestampMs, reason}`
/// (§3 "Opportunity").
#[derive(Debug, Clone)]
pub struct Opportunity {
    pub group_key: String,
    pub strategy: Strategy,
    pub legs: Vec<OpportunityLeg>,
    pub profit_abs: f64,
    pub profit_bps: f64,
    pub timestamp_ms: i64,
    pub reason: String,
}

impl Opportunity {
    /// Canonical emit key for the cooldown map: strategy-specific, built
    /// from the three asset IDs in canonical (sorted) order (§3, §4.3).
    pub fn emit_key(&self) -> String {
        let mut ids: Vec<&str> = self.legs.iter().map(|l| l.token_id.as_str()).collect();
        ids.sort_unstable();
        format!("{:?}:{}", self.strategy, ids.join(","))
    }

    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.timestamp_ms
    }
}

/// One trio's current leg state, for the admin surface's `/snapshot`
/// endpoint (§3a expansion). Built from the same `Copy` leg records the hot
/// path writes, read without locking.
#[derive(Debug, Clone, Serialize)]
pub struct TrioSnapshot {
    pub group_key: String,
    pub trio_idx: usize,
    pub lower_yes_token: String,
    pub upper_no_token: String,
    pub range_no_token: String,
    pub lower_yes: LegSnapshot,
    pub upper_no: LegSnapshot,
    pub range_no: LegSnapshot,
}

/// Point-in-time view of every trio plus the executor's single-flight flag
/// (§3a expansion "`Snapshot` (read-only export)").
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub trios: Vec<TrioSnapshot>,
    pub order_in_flight: bool,
}
