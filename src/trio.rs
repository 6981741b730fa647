//! Trio Indexer (§4.2): materializes the trio list and the token jump table
//! for each group, and applies top-of-book updates to the right leg(s).
//!
//! The triangle legs (`lowerYes`, `upperNo`, `rangeNo`) live on [`crate::model::Trio`]
//! itself. The range strategies (Unbundle/Bundle) read a different leg set off
//! the *same* three markets — the parents' and bracket's YES sides — so this
//! module carries a parallel `RangeLegs` record per trio index rather than
//! widening `Trio` with fields the triangle evaluator never touches.

use std::collections::HashMap;

use crate::model::{Group, LegSnapshot, Trio, TrioRole};

/// Which of the three range-strategy legs a token plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRole {
    ParentLowerYes,
    ParentUpperYes,
    RangeYes,
}

/// The YES-side leg snapshots for a trio's range arbitrage (Unbundle/Bundle),
/// keyed by the same `(parentLowerIdx, parentUpperIdx, rangeIdx)` triple as
/// its triangle counterpart.
#[derive(Debug, Clone, Default)]
pub struct RangeLegs {
    pub parent_lower_yes_token: String,
    pub parent_upper_yes_token: String,
    pub range_yes_token: String,
    pub parent_lower_yes: LegSnapshot,
    pub parent_upper_yes: LegSnapshot,
    pub range_yes: LegSnapshot,
}

impl RangeLegs {
    fn leg_mut(&mut self, role: RangeRole) -> &mut LegSnapshot {
        match role {
            RangeRole::ParentLowerYes => &mut self.parent_lower_yes,
            RangeRole::ParentUpperYes => &mut self.parent_upper_yes,
            RangeRole::RangeYes => &mut self.range_yes,
        }
    }
}

/// Which family of leg a token update lands in (§4.3: both evaluators run on
/// every update).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegRole {
    Triangle(TrioRole),
    Range(RangeRole),
}

/// The indexed state for a single group: its trios, their range-leg
/// counterparts, and the token jump table. A token participating in more than
/// one trio (a parent shared by two adjacent pairs) maps to every affected
/// `(trio_idx, LegRole)`.
#[derive(Debug, Clone, Default)]
pub struct TrioIndex {
    pub group_key: String,
    pub trios: Vec<Trio>,
    pub range_legs: Vec<RangeLegs>,
    token_lookup: HashMap<String, Vec<(usize, LegRole)>>,
}

impl TrioIndex {
    /// `buildTrios(group) → TrioIndex` (§4.2). Adjacent parent pairs are
    /// matched against the unique child whose bounds equal
    /// `(parents[i].lower, parents[i+1].lower)`. Pairs with no matching child,
    /// or missing the required token ids, are skipped rather than failing the
    /// whole group.
    pub fn build(group: &Group) -> Self {
        // A token id must map to exactly one market. Two distinct markets
        // quoting the same token id is corruption (edge case (c)) — reject
        // the whole group up front. A single market's token legitimately
        // appearing in two adjacent trios (e.g. a parent that is both the
        // upper leg of one pair and the lower leg of the next) is expected
        // and is not flagged here.
        let mut owner_of: HashMap<&str, &str> = HashMap::new();
        for m in group.parents.iter().chain(group.children.iter()) {
            for tok in [m.yes_id.as_deref(), m.no_id.as_deref()].into_iter().flatten() {
                if let Some(&existing) = owner_of.get(tok) {
                    if existing != m.market_id.as_str() {
                        return Self {
                            group_key: group.group_key.clone(),
                            trios: Vec::new(),
                            range_legs: Vec::new(),
                            token_lookup: HashMap::new(),
                        };
                    }
                } else {
                    owner_of.insert(tok, &m.market_id);
                }
            }
        }

        let mut trios = Vec::new();
        let mut range_legs = Vec::new();
        let mut token_lookup: HashMap<String, Vec<(usize, LegRole)>> = HashMap::new();

        for lower_idx in 0..group.parents.len().saturating_sub(1) {
            let upper_idx = lower_idx + 1;
            let lower = &group.parents[lower_idx];
            let upper = &group.parents[upper_idx];

            let range_idx = match group
                .children
                .iter()
                .position(|c| c.lower == lower.lower && c.upper == Some(upper.lower))
            {
                Some(idx) => idx,
                None => continue,
            };
            let range = &group.children[range_idx];

            let (Some(lower_yes), Some(upper_no), Some(range_no)) =
                (lower.yes_id.clone(), upper.no_id.clone(), range.no_id.clone())
            else {
                continue;
            };
            let (Some(lower_yes2), Some(upper_yes), Some(range_yes)) =
                (lower.yes_id.clone(), upper.yes_id.clone(), range.yes_id.clone())
            else {
                continue;
            };

            let trio_idx = trios.len();
            trios.push(Trio::new(
                lower_idx, upper_idx, range_idx, lower_yes.clone(), upper_no.clone(), range_no.clone(),
            ));
            range_legs.push(RangeLegs {
                parent_lower_yes_token: lower_yes2,
                parent_upper_yes_token: upper_yes.clone(),
                range_yes_token: range_yes.clone(),
                ..Default::default()
            });

            token_lookup
                .entry(lower_yes)
                .or_default()
                .push((trio_idx, LegRole::Triangle(TrioRole::LowerYes)));
            token_lookup
                .entry(upper_no)
                .or_default()
                .push((trio_idx, LegRole::Triangle(TrioRole::UpperNo)));
            token_lookup
                .entry(range_no)
                .or_default()
                .push((trio_idx, LegRole::Triangle(TrioRole::RangeNo)));
            token_lookup
                .entry(range_legs[trio_idx].parent_lower_yes_token.clone())
                .or_default()
                .push((trio_idx, LegRole::Range(RangeRole::ParentLowerYes)));
            token_lookup
                .entry(upper_yes)
                .or_default()
                .push((trio_idx, LegRole::Range(RangeRole::ParentUpperYes)));
            token_lookup
                .entry(range_yes)
                .or_default()
                .push((trio_idx, LegRole::Range(RangeRole::RangeYes)));
        }

        Self {
            group_key: group.group_key.clone(),
            trios,
            range_legs,
            token_lookup,
        }
    }

    /// `applyUpdate(tokenId, newSnapshot)`: writes the snapshot into every leg
    /// this token plays, honoring the monotone-timestamp rule (§3 "Leg
    /// snapshot"), and returns the set of `(trio_idx, LegRole)` touched so the
    /// caller can run the matching evaluator(s).
    pub fn apply_update(&mut self, token_id: &str, snapshot: LegSnapshot) -> Vec<(usize, LegRole)> {
        let Some(targets) = self.token_lookup.get(token_id).cloned() else {
            return Vec::new();
        };

        let mut applied = Vec::new();
        for (trio_idx, role) in targets {
            let current = match role {
                LegRole::Triangle(r) => self.trios[trio_idx].leg_mut(r),
                LegRole::Range(r) => self.range_legs[trio_idx].leg_mut(r),
            };
            if snapshot.timestamp_ms <= current.timestamp_ms && current.timestamp_ms > 0 {
                continue;
            }
            *current = snapshot;
            applied.push((trio_idx, role));
        }
        applied
    }
}

/// Registry across all groups: maps every known token back to its owning
/// group so the hot path can dispatch from a bare `assetId` (§4.3).
#[derive(Debug, Clone, Default)]
pub struct TrioIndexer {
    indices: HashMap<String, TrioIndex>,
    token_to_group: HashMap<String, String>,
}

impl TrioIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds every group's index from scratch. Called on structure-builder
    /// refresh (boot, periodic resync, expiry cleanup).
    pub fn rebuild(&mut self, groups: &[Group]) {
        self.indices.clear();
        self.token_to_group.clear();
        for group in groups {
            let index = TrioIndex::build(group);
            for token in index.token_lookup.keys() {
                self.token_to_group.insert(token.clone(), group.group_key.clone());
            }
            self.indices.insert(group.group_key.clone(), index);
        }
    }

    pub fn remove_group(&mut self, group_key: &str) {
        if let Some(index) = self.indices.remove(group_key) {
            for token in index.token_lookup.keys() {
                self.token_to_group.remove(token);
            }
        }
    }

    pub fn index_for(&self, group_key: &str) -> Option<&TrioIndex> {
        self.indices.get(group_key)
    }

    /// Every known group's index, for the admin snapshot export (§3a
    /// expansion) — iteration order is unspecified.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &TrioIndex)> {
        self.indices.iter()
    }

    /// Applies an update to whichever group owns `token_id`. Returns
    /// `(group_key, trio_idx, LegRole)` triples for every leg touched.
    pub fn apply_update(&mut self, token_id: &str, snapshot: LegSnapshot) -> Vec<(String, usize, LegRole)> {
        let Some(group_key) = self.token_to_group.get(token_id).cloned() else {
            return Vec::new();
        };
        let Some(index) = self.indices.get_mut(&group_key) else {
            return Vec::new();
        };
        index
            .apply_update(token_id, snapshot)
            .into_iter()
            .map(|(idx, role)| (group_key.clone(), idx, role))
            .collect()
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

    #[test]
    fn builds_one_trio_with_both_leg_families() {
        let index = TrioIndex::build(&group());
        assert_eq!(index.trios.len(), 1);
        assert_eq!(index.range_legs.len(), 1);
        assert_eq!(index.trios[0].lower_yes_token, "p1-yes");
        assert_eq!(index.trios[0].upper_no_token, "p2-no");
        assert_eq!(index.trios[0].range_no_token, "c1-no");
        assert_eq!(index.range_legs[0].parent_upper_yes_token, "p2-yes");
        assert_eq!(index.range_legs[0].range_yes_token, "c1-yes");
    }

    #[test]
    fn unmatched_bracket_bounds_skip_the_pair() {
        let mut g = group();
        g.children[0].upper = Some(93000.0);
        let index = TrioIndex::build(&g);
        assert!(index.trios.is_empty());
    }

    #[test]
    fn apply_update_writes_both_triangle_and_range_legs_for_shared_token() {
        let mut index = TrioIndex::build(&group());
        let snap = LegSnapshot {
            best_bid: Some(0.60),
            best_ask: Some(0.62),
            best_bid_size: Some(10.0),
            best_ask_size: Some(10.0),
            timestamp_ms: 5,
        };
        let touched = index.apply_update("p1-yes", snap);
        assert_eq!(touched.len(), 2);
        assert!(index.trios[0].lower_yes.is_present());
        assert!(index.range_legs[0].parent_lower_yes.is_present());
    }

    #[test]
    fn stale_timestamp_is_discarded() {
        let mut index = TrioIndex::build(&group());
        let first = LegSnapshot {
            best_bid: Some(0.5),
            best_ask: Some(0.52),
            best_bid_size: None,
            best_ask_size: None,
            timestamp_ms: 10,
        };
        index.apply_update("p1-yes", first);
        let stale = LegSnapshot {
            best_bid: Some(0.9),
            best_ask: Some(0.92),
            best_bid_size: None,
            best_ask_size: None,
            timestamp_ms: 5,
        };
        let touched = index.apply_update("p1-yes", stale);
        assert!(touched.is_empty());
        assert_eq!(index.trios[0].lower_yes.best_bid, Some(0.5));
    }

    #[test]
    fn duplicate_token_ids_across_markets_reject_the_group() {
        let mut g = group();
        g.parents[1].yes_id = g.parents[0].yes_id.clone();
        let index = TrioIndex::build(&g);
        assert!(index.trios.is_empty());
    }

    #[test]
    fn indexer_dispatches_update_to_owning_group() {
        let mut indexer = TrioIndexer::new();
        indexer.rebuild(&[group()]);
        let snap = LegSnapshot {
            best_bid: Some(0.6),
            best_ask: Some(0.62),
            best_bid_size: None,
            best_ask_size: None,
            timestamp_ms: 1,
        };
        let touched = indexer.apply_update("p1-yes", snap);
        assert_eq!(touched.len(), 2);
        assert_eq!(touched[0].0, "g");
    }
}
