//! Environment-driven configuration, one struct per subsystem.
//!
//! Mirrors the `XxxConfig::from_env()` convention used throughout the
//! reference engine's `polymarket` module: every field has a `Default`, and
//! `from_env` overlays whatever the process environment sets, falling back
//! silently to the default on missing or unparsable values.

use std::env;
use std::time::Duration;

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes"))
        .unwrap_or(default)
}

/// Thresholds and timing for the opportunity detector (§4.3).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub min_profit_abs: f64,
    pub min_profit_bps: f64,
    pub cooldown_ms: i64,
    pub staleness_ms: i64,
    pub sell_arb_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_profit_abs: 0.0,
            min_profit_bps: 5.0,
            cooldown_ms: 1000,
            staleness_ms: 5000,
            sell_arb_enabled: false,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            min_profit_abs: env_f64("ARB_MIN_PROFIT_ABS", d.min_profit_abs),
            min_profit_bps: env_f64("ARB_MIN_PROFIT_BPS", d.min_profit_bps),
            cooldown_ms: env_u64("ARB_COOLDOWN_MS", d.cooldown_ms as u64) as i64,
            staleness_ms: env_u64("ARB_STALENESS_MS", d.staleness_ms as u64) as i64,
            sell_arb_enabled: env_bool("ARB_SELL_ENABLED", d.sell_arb_enabled),
        }
    }
}

/// Sizing and cash/inventory ceilings for the sizer and executor (§4.4, §4.5).
#[derive(Debug, Clone)]
pub struct SizerConfig {
    pub default_size: f64,
    pub min_size: f64,
    pub share_decimals: u32,
    pub collateral_decimals: u32,
}

impl Default for SizerConfig {
    fn default() -> Self {
        Self {
            default_size: 30.0,
            min_size: 1.0,
            share_decimals: 2,
            collateral_decimals: 4,
        }
    }
}

impl SizerConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            default_size: env_f64("REAL_TRADE_SIZE", d.default_size),
            min_size: env_f64("ARB_MIN_SIZE", d.min_size),
            share_decimals: d.share_decimals,
            collateral_decimals: d.collateral_decimals,
        }
    }
}

/// Executor timing, chain parameters, and authentication (§4.5, §6).
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub rest_url: String,
    pub chain_id: u64,
    pub exchange_address: String,
    pub neg_risk_exchange_address: String,
    pub dispatch_timeout: Duration,
    pub opportunity_timeout_ms: i64,
    pub max_orders_per_batch: usize,
    pub real_trading_enabled: bool,
    pub api_address: String,
    pub api_key: String,
    pub api_passphrase: String,
    pub api_secret: String,
    pub proxy_address: String,
    pub signer_private_key: Option<String>,
    pub min_pnl_threshold_percent: f64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            rest_url: "https://clob.polymarket.com".to_string(),
            chain_id: 137,
            exchange_address: "0x4bfb41d5b3570defd03c39a9a4d8de6bd8b8982e".to_string(),
            neg_risk_exchange_address: "0xC5d563A36AE78145C45a50134d48A1215220f80a".to_string(),
            dispatch_timeout: Duration::from_secs(5),
            opportunity_timeout_ms: 20_000,
            max_orders_per_batch: 15,
            real_trading_enabled: false,
            api_address: String::new(),
            api_key: String::new(),
            api_passphrase: String::new(),
            api_secret: String::new(),
            proxy_address: String::new(),
            signer_private_key: None,
            min_pnl_threshold_percent: 0.5,
        }
    }
}

impl ExecutorConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            rest_url: env::var("POLYMARKET_REST_URL").unwrap_or(d.rest_url),
            chain_id: env_u64("POLYMARKET_CHAIN_ID", d.chain_id),
            exchange_address: env::var("POLYMARKET_EXCHANGE_ADDRESS").unwrap_or(d.exchange_address),
            neg_risk_exchange_address: env::var("POLYMARKET_NEG_RISK_EXCHANGE_ADDRESS")
                .unwrap_or(d.neg_risk_exchange_address),
            dispatch_timeout: Duration::from_secs(env_u64("ARB_DISPATCH_TIMEOUT_SECS", 5)),
            opportunity_timeout_ms: env_u64("ARB_OPPORTUNITY_TIMEOUT_MS", d.opportunity_timeout_ms as u64)
                as i64,
            max_orders_per_batch: env_usize("ARB_MAX_ORDERS_PER_BATCH", d.max_orders_per_batch),
            real_trading_enabled: env_bool("REAL_TRADING_ENABLED", d.real_trading_enabled),
            api_address: env::var("POLY_ADDRESS").unwrap_or_default(),
            api_key: env::var("POLY_API_KEY").unwrap_or_default(),
            api_passphrase: env::var("POLY_PASSPHRASE").unwrap_or_default(),
            api_secret: env::var("POLY_API_SECRET").unwrap_or_default(),
            proxy_address: env::var("POLYMARKET_FUNDER_ADDRESS").unwrap_or_default(),
            signer_private_key: env::var("POLYMARKET_PRIVATE_KEY").ok(),
            min_pnl_threshold_percent: env_f64("REAL_TRADING_MIN_PNL_PERCENT", d.min_pnl_threshold_percent),
        }
    }
}

/// Mint job policy (§4.6).
#[derive(Debug, Clone)]
pub struct MinterConfig {
    pub liquidity_reserve_multiple: f64,
    pub dedup_window_ms: i64,
    pub max_attempts: u32,
    pub backoff_ms: Vec<u64>,
    pub job_timeout_ms: i64,
}

impl Default for MinterConfig {
    fn default() -> Self {
        Self {
            liquidity_reserve_multiple: 6.0,
            dedup_window_ms: 30_000,
            max_attempts: 3,
            backoff_ms: vec![5_000, 10_000, 20_000],
            job_timeout_ms: 120_000,
        }
    }
}

impl MinterConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            liquidity_reserve_multiple: env_f64(
                "MINT_LIQUIDITY_RESERVE_MULTIPLE",
                d.liquidity_reserve_multiple,
            ),
            dedup_window_ms: env_u64("MINT_DEDUP_WINDOW_MS", d.dedup_window_ms as u64) as i64,
            max_attempts: env_u64("MINT_MAX_ATTEMPTS", d.max_attempts as u64) as u32,
            backoff_ms: d.backoff_ms,
            job_timeout_ms: env_u64("MINT_JOB_TIMEOUT_MS", d.job_timeout_ms as u64) as i64,
        }
    }
}

/// Position manager reconciliation timing (§4.7).
#[derive(Debug, Clone)]
pub struct PositionManagerConfig {
    pub reconcile_delay_ms: u64,
    pub dedup_window_ms: i64,
    pub aggressive_buy_price: f64,
    pub aggressive_sell_price: f64,
}

impl Default for PositionManagerConfig {
    fn default() -> Self {
        Self {
            reconcile_delay_ms: 3_000,
            dedup_window_ms: 60_000,
            aggressive_buy_price: 0.999,
            aggressive_sell_price: 0.001,
        }
    }
}

impl PositionManagerConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            reconcile_delay_ms: env_u64("ARB_RECONCILE_DELAY_MS", d.reconcile_delay_ms),
            dedup_window_ms: env_u64("ARB_RECONCILE_DEDUP_MS", d.dedup_window_ms as u64) as i64,
            aggressive_buy_price: d.aggressive_buy_price,
            aggressive_sell_price: d.aggressive_sell_price,
        }
    }
}
