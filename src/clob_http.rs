//! Order API HTTP client (§4.5, §6): two persistent `reqwest::Client` pools —
//! one for order submission, one for status polling — each reused across
//! every request rather than built per-call, grounded on the sibling
//! engine's `executor/api_client.rs` (`tcp_nodelay`, bounded idle pool, 5s
//! timeout). Splitting the pools is the same connection discipline §5 calls
//! for explicitly: a stalled status poll should never compete for sockets
//! with the order-submission path the hot path is waiting on.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::auth::build_auth_headers;
use crate::error::CoreError;
use crate::signing::SignedClobOrder;

const ORDERS_PATH: &str = "/orders";

/// `POST /orders` batch entry (§6): wraps one signed order with dispatch
/// metadata the exchange needs alongside it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOrderPayload {
    pub defer_exec: bool,
    pub order: SignedClobOrder,
    pub owner: String,
    pub order_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderResponseEntry {
    #[serde(rename = "orderID")]
    pub order_id: Option<String>,
    pub status: Option<String>,
    #[serde(rename = "errorMsg")]
    pub error_msg: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderStatusResponse {
    pub status: String,
    pub original_size: f64,
    pub size_matched: f64,
    pub associate_trades: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradeStatusResponse {
    pub status: String,
}

/// Credentials needed to sign every outbound request (§6 "Auth headers").
#[derive(Debug, Clone)]
pub struct ClobCredentials {
    pub address: String,
    pub api_key: String,
    pub api_secret: String,
    pub passphrase: String,
}

#[derive(Clone)]
pub struct ClobHttpClient {
    order_client: reqwest::Client,
    status_client: reqwest::Client,
    base_url: String,
    creds: ClobCredentials,
}

impl ClobHttpClient {
    pub fn new(base_url: String, creds: ClobCredentials) -> Self {
        let build = || {
            reqwest::Client::builder()
                .tcp_nodelay(true)
                .pool_idle_timeout(Duration::from_secs(25))
                .pool_max_idle_per_host(10)
                .timeout(Duration::from_secs(5))
                .build()
                .expect("static reqwest client configuration is always valid")
        };
        Self { order_client: build(), status_client: build(), base_url, creds }
    }

    fn now_unix_secs() -> i64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
    }

    /// Warms the connection pool with a cheap unauthenticated GET, so the
    /// first real batch doesn't pay TLS/TCP handshake latency (grounded on
    /// `api_client.rs::warm_connection`).
    pub async fn warm_connection(&self) -> Result<(), CoreError> {
        let url = format!("{}/time", self.base_url);
        self.order_client.get(&url).send().await.map_err(CoreError::from)?;
        self.status_client.get(&url).send().await.map(|_| ()).map_err(CoreError::from)
    }

    /// Dispatch — §4.5: POST the JSON array over the persistent connection,
    /// 5s hard timeout (set on the client itself).
    pub async fn post_batch_orders(&self, orders: Vec<SignedClobOrder>) -> Result<Vec<OrderResponseEntry>, CoreError> {
        let payload: Vec<BatchOrderPayload> = orders
            .into_iter()
            .map(|order| BatchOrderPayload {
                defer_exec: false,
                order,
                owner: self.creds.api_key.clone(),
                order_type: "GTC".to_string(),
            })
            .collect();
        let body = serde_json::to_string(&payload)?;

        let headers = build_auth_headers(
            &self.creds.address,
            &self.creds.api_key,
            &self.creds.passphrase,
            &self.creds.api_secret,
            "POST",
            ORDERS_PATH,
            &body,
            Self::now_unix_secs(),
        )?;

        let response = self
            .order_client
            .post(format!("{}{}", self.base_url, ORDERS_PATH))
            .header("POLY_ADDRESS", headers.address)
            .header("POLY_API_KEY", headers.api_key)
            .header("POLY_PASSPHRASE", headers.passphrase)
            .header("POLY_TIMESTAMP", headers.timestamp)
            .header("POLY_SIGNATURE", headers.signature)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await?;

        self.handle_response(response).await
    }

    async fn handle_response(&self, response: reqwest::Response) -> Result<Vec<OrderResponseEntry>, CoreError> {
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            let text = response.text().await.unwrap_or_default();
            return Err(CoreError::Unauthorized(text));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CoreError::TransientNetwork(format!("order API returned {status}: {text}")));
        }
        response.json().await.map_err(CoreError::from)
    }

    /// `GET /order/{id}` (§6, §4.7 reconciliation).
    pub async fn get_order_status(&self, order_id: &str) -> Result<OrderStatusResponse, CoreError> {
        let path = format!("/order/{order_id}");
        let headers = build_auth_headers(
            &self.creds.address,
            &self.creds.api_key,
            &self.creds.passphrase,
            &self.creds.api_secret,
            "GET",
            &path,
            "",
            Self::now_unix_secs(),
        )?;

        let response = self
            .status_client
            .get(format!("{}{}", self.base_url, path))
            .header("POLY_ADDRESS", headers.address)
            .header("POLY_API_KEY", headers.api_key)
            .header("POLY_PASSPHRASE", headers.passphrase)
            .header("POLY_TIMESTAMP", headers.timestamp)
            .header("POLY_SIGNATURE", headers.signature)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(CoreError::TransientNetwork(format!("order status returned {status}: {text}")));
        }
        response.json().await.map_err(CoreError::from)
    }

    /// `GET /trades?id=...` (§6, §4.7 reconciliation).
    pub async fn get_trade_status(&self, trade_id: &str) -> Result<TradeStatusResponse, CoreError> {
        let path = format!("/trades?id={trade_id}");
        let headers = build_auth_headers(
            &self.creds.address,
            &self.creds.api_key,
            &self.creds.passphrase,
            &self.creds.api_secret,
            "GET",
            &path,
            "",
            Self::now_unix_secs(),
        )?;

        let response = self
            .status_client
            .get(format!("{}{}", self.base_url, path))
            .header("POLY_ADDRESS", headers.address)
            .header("POLY_API_KEY", headers.api_key)
            .header("POLY_PASSPHRASE", headers.passphrase)
            .header("POLY_TIMESTAMP", headers.timestamp)
            .header("POLY_SIGNATURE", headers.signature)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(CoreError::TransientNetwork(format!("trade status returned {status}: {text}")));
        }
        response.json().await.map_err(CoreError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_payload_serializes_with_camel_case_wire_fields() {
        let payload = BatchOrderPayload {
            defer_exec: false,
            order: SignedClobOrder {
                salt: 1,
                maker: "0xabc".to_string(),
                signer: "0xdef".to_string(),
                taker: "0x0".to_string(),
                token_id: "123".to_string(),
                maker_amount: "1000000".to_string(),
                taker_amount: "2000000".to_string(),
                expiration: "0".to_string(),
                nonce: "0".to_string(),
                fee_rate_bps: "0".to_string(),
                side: crate::model::OrderSide::Buy,
                signature_type: 2,
                signature: "0xsig".to_string(),
            },
            owner: "api-key".to_string(),
            order_type: "GTC".to_string(),
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"deferExec\":false"));
        assert!(json.contains("\"tokenId\":\"123\""));
        assert!(json.contains("\"orderType\":\"GTC\""));
    }
}
