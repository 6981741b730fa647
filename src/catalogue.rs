//! Structure Builder (§4.1): turns the relational market catalogue into an
//! in-memory `Group` list.
//!
//! The catalogue itself is an external collaborator (§1); the core only
//! depends on the [`MarketCatalogue`] trait so the builder is testable
//! against an in-memory fixture without a live HTTP dependency. The
//! production adapter (`GammaCatalogue`, in `gamma_http.rs`) implements this
//! trait over Polymarket's Gamma API.

use crate::model::{Group, MarketDescriptor, MarketKind};

/// Pluggable market catalogue: anything that can list currently-active
/// markets. The Gamma-backed production implementation lives in
/// `gamma_http.rs`; tests use a `Vec<MarketDescriptor>` fixture directly.
pub trait MarketCatalogue {
    fn list_active(&self, now_ms: i64) -> anyhow::Result<Vec<MarketDescriptor>>;
}

impl MarketCatalogue for Vec<MarketDescriptor> {
    fn list_active(&self, now_ms: i64) -> anyhow::Result<Vec<MarketDescriptor>> {
        Ok(self
            .iter()
            .filter(|m| m.end_date_ms >= now_ms)
            .cloned()
            .collect())
    }
}

/// Parses the slug-fragment grammar used when the catalogue itself lacks
/// numeric bounds (§4.1): `above-<N>`, `above-<N>k`, `between-<N>-<M>`
/// (optionally `k`-suffixed, meaning ×1000).
pub fn parse_bounds_from_slug(slug: &str) -> Option<(f64, Option<f64>)> {
    let fragment = slug.rsplit('/').next().unwrap_or(slug);

    if let Some(rest) = fragment.strip_prefix("above-") {
        return parse_magnitude(rest).map(|lower| (lower, None));
    }
    if let Some(rest) = fragment.strip_prefix("between-") {
        let mut parts = rest.splitn(2, '-');
        let lower = parts.next().and_then(parse_magnitude)?;
        let upper = parts.next().and_then(parse_magnitude)?;
        return Some((lower, Some(upper)));
    }
    None
}

fn parse_magnitude(raw: &str) -> Option<f64> {
    if let Some(digits) = raw.strip_suffix('k').or_else(|| raw.strip_suffix('K')) {
        digits.parse::<f64>().ok().map(|v| v * 1000.0)
    } else {
        raw.parse::<f64>().ok()
    }
}

/// Builds the in-memory `Group` list from whatever the catalogue currently
/// returns (§4.1).
pub struct StructureBuilder<C: MarketCatalogue> {
    catalogue: C,
}

impl<C: MarketCatalogue> StructureBuilder<C> {
    pub fn new(catalogue: C) -> Self {
        Self { catalogue }
    }

    /// `rebuild() → list<Group>`. Idempotent: two calls without catalogue
    /// changes yield identical group identities, descriptor orders, and
    /// token bindings.
    pub fn rebuild(&self, now_ms: i64) -> anyhow::Result<Vec<Group>> {
        let markets = self.catalogue.list_active(now_ms)?;

        let mut by_group: std::collections::BTreeMap<String, Vec<MarketDescriptor>> =
            std::collections::BTreeMap::new();
        for market in markets {
            if !market.has_both_tokens() {
                continue;
            }
            by_group.entry(market.group_key.clone()).or_default().push(market);
        }

        let mut groups = Vec::new();
        for (group_key, mut members) in by_group {
            let asset = group_key.split('-').next().unwrap_or(&group_key).to_string();
            let end_date_ms = members.iter().map(|m| m.end_date_ms).max().unwrap_or(0);

            let mut parents: Vec<MarketDescriptor> = members
                .iter()
                .filter(|m| m.kind == MarketKind::Threshold)
                .cloned()
                .collect();
            let mut children: Vec<MarketDescriptor> = members
                .iter()
                .filter(|m| m.kind == MarketKind::Bracket)
                .cloned()
                .collect();
            members.clear();

            // Deterministic de-dup on lower bound: keep the first occurrence,
            // drop later duplicates (§4.2 edge case (a)).
            dedup_by_lower(&mut parents);

            parents.sort_by(|a, b| a.lower.partial_cmp(&b.lower).unwrap());
            children.sort_by(|a, b| a.lower.partial_cmp(&b.lower).unwrap());

            if parents.is_empty() || children.is_empty() {
                continue;
            }

            groups.push(Group {
                group_key,
                asset,
                end_date_ms,
                parents,
                children,
            });
        }

        Ok(groups)
    }

    /// `cleanupExpired(now) → list<groupKey>` — identifies groups whose
    /// `endDate < now` for eviction by the caller.
    pub fn cleanup_expired(&self, groups: &[Group], now_ms: i64) -> Vec<String> {
        groups
            .iter()
            .filter(|g| g.is_expired(now_ms))
            .map(|g| g.group_key.clone())
            .collect()
    }
}

fn dedup_by_lower(parents: &mut Vec<MarketDescriptor>) {
    let mut seen = std::collections::HashSet::new();
    parents.retain(|m| seen.insert(m.lower.to_bits()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MarketKind;

    fn market(id: &str, group: &str, kind: MarketKind, lower: f64, upper: Option<f64>) -> MarketDescriptor {
        MarketDescriptor {
            market_id: id.to_string(),
            slug: format!("{}-slug", id),
            group_key: group.to_string(),
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

    #[test]
    fn parses_above_and_between_slugs() {
        assert_eq!(parse_bounds_from_slug("above-90000"), Some((90000.0, None)));
        assert_eq!(parse_bounds_from_slug("above-90k"), Some((90000.0, None)));
        assert_eq!(
            parse_bounds_from_slug("between-90000-92000"),
            Some((90000.0, Some(92000.0)))
        );
        assert_eq!(
            parse_bounds_from_slug("between-90k-92k"),
            Some((90000.0, Some(92000.0)))
        );
        assert_eq!(parse_bounds_from_slug("garbage"), None);
    }

    #[test]
    fn rebuild_groups_and_sorts_ascending() {
        let fixture = vec![
            market("p2", "btc-2026-01-01", MarketKind::Threshold, 92000.0, None),
            market("p1", "btc-2026-01-01", MarketKind::Threshold, 90000.0, None),
            market("c1", "btc-2026-01-01", MarketKind::Bracket, 90000.0, Some(92000.0)),
        ];
        let builder = StructureBuilder::new(fixture);
        let groups = builder.rebuild(0).unwrap();
        assert_eq!(groups.len(), 1);
        let g = &groups[0];
        assert_eq!(g.parents[0].market_id, "p1");
        assert_eq!(g.parents[1].market_id, "p2");
        assert!(g.is_eligible());
    }

    #[test]
    fn rebuild_drops_groups_missing_tokens() {
        let mut incomplete = market("p1", "g", MarketKind::Threshold, 90000.0, None);
        incomplete.no_id = None;
        let fixture = vec![incomplete, market("c1", "g", MarketKind::Bracket, 90000.0, Some(92000.0))];
        let builder = StructureBuilder::new(fixture);
        let groups = builder.rebuild(0).unwrap();
        assert!(groups.is_empty());
    }

    #[test]
    fn rebuild_is_idempotent() {
        let fixture = vec![
            market("p1", "g", MarketKind::Threshold, 90000.0, None),
            market("p2", "g", MarketKind::Threshold, 92000.0, None),
            market("c1", "g", MarketKind::Bracket, 90000.0, Some(92000.0)),
        ];
        let builder = StructureBuilder::new(fixture);
        let first = builder.rebuild(0).unwrap();
        let second = builder.rebuild(0).unwrap();
        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].parents[0].market_id, second[0].parents[0].market_id);
    }

    #[test]
    fn cleanup_expired_identifies_past_groups() {
        let mut fixture = vec![
            market("p1", "old", MarketKind::Threshold, 1.0, None),
            market("c1", "old", MarketKind::Bracket, 1.0, Some(2.0)),
        ];
        for m in fixture.iter_mut() {
            m.end_date_ms = 100;
        }
        let builder = StructureBuilder::new(fixture);
        let groups = builder.rebuild(0).unwrap();
        let expired = builder.cleanup_expired(&groups, 200);
        assert_eq!(expired, vec!["old".to_string()]);
    }

    #[test]
    fn duplicate_parent_lower_bound_keeps_first() {
        let fixture = vec![
            market("p1", "g", MarketKind::Threshold, 90000.0, None),
            market("p1dup", "g", MarketKind::Threshold, 90000.0, None),
            market("p2", "g", MarketKind::Threshold, 92000.0, None),
            market("c1", "g", MarketKind::Bracket, 90000.0, Some(92000.0)),
        ];
        let builder = StructureBuilder::new(fixture);
        let groups = builder.rebuild(0).unwrap();
        assert_eq!(groups[0].parents.len(), 2);
        assert_eq!(groups[0].parents[0].market_id, "p1");
    }
}
