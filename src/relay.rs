//! Production adapters for the minter's external collaborators (§4.6) plus
//! the inventory ledger's drift-correction reader (§5): a collateral-balance
//! reader, a position-token (ERC-1155) balance reader, and a Safe
//! transaction relay. All three talk raw JSON-RPC / REST over `reqwest`
//! rather than pulling in a provider SDK, the same "go direct via HTTP +
//! serde_json" choice `gamma_http.rs` makes for the market catalogue.

use std::collections::HashMap;

use alloy_primitives::{Address, U256};
use anyhow::Context;
use serde_json::json;

use crate::error::CoreError;
use crate::ledger::TokenBalanceSource;
use crate::minter::{CollateralSource, SafeRelay, SignedSafeTx};

const BALANCE_OF_SELECTOR: &str = "70a08231";
const COLLATERAL_DECIMALS: f64 = 1_000_000.0;
const ERC1155_BALANCE_OF_SELECTOR: &str = "00fdd58e";
const SHARE_DECIMALS: f64 = 1_000_000.0;

/// Reads an ERC-20 balance with a single `eth_call`, no provider crate
/// required: `balanceOf(address)` is four bytes of selector plus one
/// left-padded address argument.
pub struct RpcCollateralSource {
    client: reqwest::Client,
    rpc_url: String,
    token: Address,
}

impl RpcCollateralSource {
    pub fn new(rpc_url: String, token: Address) -> Self {
        Self { client: reqwest::Client::new(), rpc_url, token }
    }

    fn call_data(wallet: Address) -> String {
        format!("0x{BALANCE_OF_SELECTOR}{:0>64}", hex::encode(wallet.as_slice()))
    }
}

impl CollateralSource for RpcCollateralSource {
    async fn balance(&self, wallet: Address) -> Result<f64, CoreError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_call",
            "params": [{ "to": self.token, "data": Self::call_data(wallet) }, "latest"],
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::TransientNetwork(e.to_string()))?;

        let parsed: serde_json::Value =
            response.json().await.map_err(|e| CoreError::TransientNetwork(e.to_string()))?;
        let hex_result = parsed
            .get("result")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::TransientNetwork("eth_call returned no result field".to_string()))?;

        let raw = hex_result.trim_start_matches("0x");
        let amount = U256::from_str_radix(raw, 16)
            .map_err(|e| CoreError::TransientNetwork(format!("malformed balanceOf result: {e}")))?;
        Ok(amount.to::<u128>() as f64 / COLLATERAL_DECIMALS)
    }
}

/// Reads CTF position-token balances with one `eth_call` per token id —
/// `balanceOf(address,uint256)` is the ERC-1155 two-argument overload,
/// unlike the collateral contract's plain ERC-20 `balanceOf(address)` above.
/// Backs the minted-inventory drift-correction refresh (§5, every 10s).
pub struct RpcPositionBalanceSource {
    client: reqwest::Client,
    rpc_url: String,
    ctf_token: Address,
}

impl RpcPositionBalanceSource {
    pub fn new(rpc_url: String, ctf_token: Address) -> Self {
        Self { client: reqwest::Client::new(), rpc_url, ctf_token }
    }

    fn call_data(wallet: Address, token_id: &str) -> Option<String> {
        let id = U256::from_str_radix(token_id, 10).ok()?;
        Some(format!(
            "0x{ERC1155_BALANCE_OF_SELECTOR}{:0>64}{}",
            hex::encode(wallet.as_slice()),
            hex::encode(id.to_be_bytes::<32>())
        ))
    }

    async fn balance_of(&self, wallet: Address, token_id: &str) -> Result<f64, CoreError> {
        let data = Self::call_data(wallet, token_id)
            .ok_or_else(|| CoreError::TransientNetwork(format!("malformed tokenId {token_id}")))?;
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_call",
            "params": [{ "to": self.ctf_token, "data": data }, "latest"],
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::TransientNetwork(e.to_string()))?;

        let parsed: serde_json::Value =
            response.json().await.map_err(|e| CoreError::TransientNetwork(e.to_string()))?;
        let hex_result = parsed
            .get("result")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::TransientNetwork("eth_call returned no result field".to_string()))?;

        let raw = hex_result.trim_start_matches("0x");
        let amount = U256::from_str_radix(raw, 16)
            .map_err(|e| CoreError::TransientNetwork(format!("malformed balanceOf result: {e}")))?;
        Ok(amount.to::<u128>() as f64 / SHARE_DECIMALS)
    }
}

impl TokenBalanceSource for RpcPositionBalanceSource {
    /// Sequential per-token `eth_call`s rather than a multicall batch — the
    /// 10s refresh cadence tolerates the extra round trips, and it keeps this
    /// adapter free of a multicall contract address to configure.
    async fn balances(&self, wallet: Address, token_ids: &[String]) -> Result<HashMap<String, f64>, CoreError> {
        let mut out = HashMap::with_capacity(token_ids.len());
        for token_id in token_ids {
            let amount = self.balance_of(wallet, token_id).await?;
            out.insert(token_id.clone(), amount);
        }
        Ok(out)
    }
}

/// Submits a signed `SafeTx` to a Gnosis-Safe-compatible transaction
/// service, the same "sign locally, hand it to a relay" split the exchange
/// order flow uses one layer up.
pub struct HttpSafeRelay {
    client: reqwest::Client,
    relay_url: String,
}

impl HttpSafeRelay {
    pub fn new(relay_url: String) -> Self {
        Self { client: reqwest::Client::new(), relay_url }
    }
}

impl SafeRelay for HttpSafeRelay {
    async fn submit(&self, envelope: SignedSafeTx) -> Result<String, CoreError> {
        let url = format!("{}/api/v1/safes/{:?}/multisig-transactions/", self.relay_url, envelope.safe_address);
        let body = json!({
            "to": envelope.to,
            "value": envelope.value.to_string(),
            "data": format!("0x{}", hex::encode(&envelope.data)),
            "operation": 0,
            "nonce": envelope.nonce.to_string(),
            "signature": envelope.signature,
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::TransientNetwork(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CoreError::MintFailure {
                asset_id: format!("{:?}", envelope.to),
                reason: format!("relay returned status {}", response.status()),
            });
        }

        let parsed: serde_json::Value =
            response.json().await.map_err(|e| CoreError::TransientNetwork(e.to_string()))?;
        parsed
            .get("transactionHash")
            .or_else(|| parsed.get("txHash"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .context("relay response missing transaction hash")
            .map_err(|e| CoreError::MintFailure { asset_id: format!("{:?}", envelope.to), reason: e.to_string() })
    }
}
