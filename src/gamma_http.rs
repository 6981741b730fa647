//! Lightweight Gamma API client — bypasses any SDK's market model, goes
//! direct via HTTP + serde_json. This is the production [`MarketCatalogue`]
//! adapter; the core's [`crate::catalogue::StructureBuilder`] only depends on
//! the trait, so this module is the single place that knows Gamma's wire
//! shapes.

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::catalogue::{parse_bounds_from_slug, MarketCatalogue};
use crate::model::{MarketDescriptor, MarketKind};

const GAMMA_API_BASE: &str = "https://gamma-api.polymarket.com";

#[derive(Debug, Deserialize)]
struct GammaEvent {
    markets: Option<Vec<GammaMarket>>,
}

#[derive(Debug, Deserialize)]
struct GammaMarket {
    #[serde(rename = "conditionId")]
    condition_id: String,
    slug: Option<String>,
    #[serde(rename = "clobTokenIds")]
    clob_token_ids: Option<String>,
    #[serde(rename = "negRisk")]
    neg_risk: Option<bool>,
    #[serde(rename = "negRiskMarketID")]
    neg_risk_market_id: Option<String>,
    #[serde(rename = "endDate")]
    end_date: Option<String>,
}

/// Production [`MarketCatalogue`] backed by Polymarket's Gamma API. Tracks
/// a fixed set of event slugs (one per underlying/expiry family) and
/// flattens their markets into [`MarketDescriptor`]s on every `list_active`
/// call — the structure builder only calls this on boot and on cleanup
/// events (§4.1), never on the hot path.
pub struct GammaCatalogue {
    client: reqwest::Client,
    event_slugs: Vec<String>,
}

impl GammaCatalogue {
    pub fn new(event_slugs: Vec<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            event_slugs,
        }
    }

    async fn fetch_event(&self, slug: &str) -> Result<GammaEvent> {
        let url = format!("{}/events?slug={}", GAMMA_API_BASE, slug);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("failed to request Gamma API")?;

        if !resp.status().is_success() {
            anyhow::bail!("Gamma API returned status: {}", resp.status());
        }

        let events: Vec<GammaEvent> = resp.json().await.context("failed to parse Gamma API response")?;
        events
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("no event found for slug: {}", slug))
    }

    fn to_descriptor(market: &GammaMarket, group_key: &str) -> Option<MarketDescriptor> {
        let slug = market.slug.clone().unwrap_or_default();
        let (lower, upper) = parse_bounds_from_slug(&slug)?;
        let kind = if upper.is_some() {
            MarketKind::Bracket
        } else {
            MarketKind::Threshold
        };

        let token_ids: Vec<String> = market
            .clob_token_ids
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default();
        let (yes_id, no_id) = match token_ids.as_slice() {
            [yes, no, ..] => (Some(yes.clone()), Some(no.clone())),
            _ => (None, None),
        };

        let end_date_ms = market
            .end_date
            .as_deref()
            .and_then(|d| chrono::DateTime::parse_from_rfc3339(d).ok())
            .map(|d| d.timestamp_millis())
            .unwrap_or(i64::MAX);

        Some(MarketDescriptor {
            market_id: market.condition_id.clone(),
            slug,
            group_key: group_key.to_string(),
            kind,
            lower,
            upper,
            yes_id,
            no_id,
            neg_risk: market.neg_risk.unwrap_or(false),
            condition_id: market.condition_id.clone(),
            neg_risk_market_id: market.neg_risk_market_id.clone(),
            end_date_ms,
        })
    }

    async fn list_active_async(&self, now_ms: i64) -> Result<Vec<MarketDescriptor>> {
        let mut out = Vec::new();
        for slug in &self.event_slugs {
            let event = self.fetch_event(slug).await?;
            if let Some(markets) = event.markets {
                for m in &markets {
                    if let Some(descriptor) = Self::to_descriptor(m, slug) {
                        if descriptor.end_date_ms >= now_ms {
                            out.push(descriptor);
                        }
                    }
                }
            }
        }
        Ok(out)
    }
}

impl MarketCatalogue for GammaCatalogue {
    fn list_active(&self, now_ms: i64) -> anyhow::Result<Vec<MarketDescriptor>> {
        // The structure builder only calls this synchronously on boot and on
        // cleanup events, never from the hot path, so bridging into the
        // async client here keeps the trait boundary synchronous.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => tokio::task::block_in_place(|| handle.block_on(self.list_active_async(now_ms))),
            Err(_) => tokio::runtime::Runtime::new()?.block_on(self.list_active_async(now_ms)),
        }
    }
}
