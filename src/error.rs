//! Typed error kinds for the core arbitrage pipeline.
//!
//! Transport and parsing libraries return their own error types at the edges;
//! everything that crosses into the engine, executor, minter, or position
//! manager is folded into [`CoreError`] so callers can `match` on failure mode
//! instead of string-matching an opaque error. `main`/`worker` binaries still
//! use `anyhow::Result` for top-level diagnostics.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("transient network failure: {0}")]
    TransientNetwork(String),

    #[error("unauthorized: credentials rejected by order API ({0})")]
    Unauthorized(String),

    #[error("order at index {index} rejected by exchange: {message}")]
    ValidationRejected { index: usize, message: String },

    #[error("insufficient local cash: need {required}, have {available}")]
    InsufficientLocalCash { required: f64, available: f64 },

    #[error("insufficient inventory for token {token_id}: need {required}, have {available}")]
    InsufficientInventory {
        token_id: String,
        required: f64,
        available: f64,
    },

    #[error("opportunity {age_ms}ms old exceeds timeout of {limit_ms}ms")]
    StaleOpportunity { age_ms: i64, limit_ms: i64 },

    #[error("order {order_id} partially filled ({size_matched}/{original_size}), remainder canceled")]
    PartialFillCanceled {
        order_id: String,
        original_size: f64,
        size_matched: f64,
    },

    #[error("order {order_id} matched but underlying transaction reverted")]
    TransactionFailed { order_id: String },

    #[error("mint job for {asset_id} failed: {reason}")]
    MintFailure { asset_id: String, reason: String },

    #[error("catalogue drift: group {group_key} no longer present in catalogue")]
    CatalogueDrift { group_key: String },

    #[error("signing error: {0}")]
    Signing(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl CoreError {
    /// Whether the executor's single-flight lock should be released with a
    /// cash refund, vs. the reservation standing because some slots matched.
    pub fn is_full_refund(&self) -> bool {
        matches!(
            self,
            CoreError::TransientNetwork(_) | CoreError::Unauthorized(_)
        )
    }

    /// Whether trading should pause entirely until credentials are fixed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::Unauthorized(_))
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        CoreError::TransientNetwork(err.to_string())
    }
}
