//! EIP-712 order signing (§4.5, §6).
//!
//! The reference engine hands order construction and signing to
//! `polymarket-client-sdk`'s `ClobClient`, fine for its single-order maker
//! flow but opaque for the batched, domain-sensitive signing this core
//! needs. Signing here is native: `alloy-sol-types`' `sol!` macro defines the
//! exchange's `Order` struct and derives its EIP-712 struct hash, and
//! `alloy-signer-local`'s `PrivateKeySigner` produces the 65-byte `(r, s, v)`
//! signature — the same `alloy` family the reference engine already depends
//! on for wallet/chain plumbing, reached for directly instead of through an
//! SDK's order builder, mirroring `gamma_http.rs`'s own precedent of bypassing
//! an SDK's model to go direct.
//!
//! Two domain separators are precomputed at startup — one per exchange
//! contract (standard vs negRisk) — since every order in a batch must be
//! signed under the contract that will actually settle it; mixing them
//! invalidates the whole batch.

use std::str::FromStr;

use alloy_primitives::{Address, U256};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{eip712_domain, sol, Eip712Domain, SolStruct};
use serde::Serialize;

use crate::error::CoreError;
use crate::model::OrderSide;

sol! {
    #[derive(Debug)]
    struct Order {
        uint256 salt;
        address maker;
        address signer;
        address taker;
        uint256 tokenId;
        uint256 makerAmount;
        uint256 takerAmount;
        uint256 expiration;
        uint256 nonce;
        uint256 feeRateBps;
        uint8 side;
        uint8 signatureType;
    }
}

/// Smart-contract-wallet maker signature tag (§6): orders are submitted on
/// behalf of a Gnosis-Safe-style proxy wallet, not signed directly by an EOA.
const SIGNATURE_TYPE_POLY_GNOSIS_SAFE: u8 = 2;

/// One leg ready to sign: amounts already quantized to on-chain integer units
/// by the sizer/executor (§4.4, §4.5).
#[derive(Debug, Clone)]
pub struct OrderToSign {
    pub token_id: String,
    pub maker_amount: U256,
    pub taker_amount: U256,
    pub side: OrderSide,
    pub neg_risk: bool,
    pub salt: u64,
}

/// Wire shape matching §6's `OrderJSON`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedClobOrder {
    pub salt: u64,
    pub maker: String,
    pub signer: String,
    pub taker: String,
    pub token_id: String,
    pub maker_amount: String,
    pub taker_amount: String,
    pub expiration: String,
    pub nonce: String,
    pub fee_rate_bps: String,
    pub side: OrderSide,
    pub signature_type: u8,
    pub signature: String,
}

/// Holds the signer and both precomputed EIP-712 domains.
#[derive(Clone)]
pub struct SignerState {
    signer: PrivateKeySigner,
    maker_address: Address,
    signer_address: Address,
    domain_standard: Eip712Domain,
    domain_neg_risk: Eip712Domain,
}

impl SignerState {
    pub fn new(
        private_key: &str,
        maker_address: Address,
        chain_id: u64,
        exchange_address: Address,
        neg_risk_exchange_address: Address,
    ) -> Result<Self, CoreError> {
        let signer: PrivateKeySigner = private_key
            .parse()
            .map_err(|e| CoreError::Signing(format!("invalid private key: {e}")))?;
        let signer_address = signer.address();

        Ok(Self {
            signer,
            maker_address,
            signer_address,
            domain_standard: eip712_domain! {
                name: "Polymarket CTF Exchange",
                version: "1",
                chain_id: chain_id,
                verifying_contract: exchange_address,
            },
            domain_neg_risk: eip712_domain! {
                name: "Polymarket CTF Exchange",
                version: "1",
                chain_id: chain_id,
                verifying_contract: neg_risk_exchange_address,
            },
        })
    }

    pub fn signer_address(&self) -> Address {
        self.signer_address
    }

    pub fn maker_address(&self) -> Address {
        self.maker_address
    }

    /// Signs an arbitrary EIP-712 digest with the controlling private key —
    /// used by the minter for the Safe transaction envelope (§4.6), which
    /// has its own struct and domain distinct from the exchange `Order`.
    pub async fn sign_raw_hash(&self, hash: alloy_primitives::B256) -> Result<alloy_primitives::Signature, CoreError> {
        self.signer.sign_hash(&hash).await.map_err(|e| CoreError::Signing(e.to_string()))
    }

    /// Signs every order in the batch, routing each to the correct domain by
    /// its own `neg_risk` flag. Fails the whole batch on the first signing
    /// error — a partially-signed batch is not submittable.
    pub async fn sign_batch_orders(&self, orders: &[OrderToSign]) -> Result<Vec<SignedClobOrder>, CoreError> {
        let mut signed = Vec::with_capacity(orders.len());
        for order in orders {
            signed.push(self.sign_one(order).await?);
        }
        Ok(signed)
    }

    async fn sign_one(&self, order: &OrderToSign) -> Result<SignedClobOrder, CoreError> {
        let token_id = U256::from_str(&order.token_id)
            .map_err(|e| CoreError::Signing(format!("invalid tokenId {}: {e}", order.token_id)))?;

        let domain = if order.neg_risk { &self.domain_neg_risk } else { &self.domain_standard };

        let sol_order = Order {
            salt: U256::from(order.salt),
            maker: self.maker_address,
            signer: self.signer_address,
            taker: Address::ZERO,
            tokenId: token_id,
            makerAmount: order.maker_amount,
            takerAmount: order.taker_amount,
            expiration: U256::ZERO,
            nonce: U256::ZERO,
            feeRateBps: U256::ZERO,
            side: order.side as u8,
            signatureType: SIGNATURE_TYPE_POLY_GNOSIS_SAFE,
        };

        let signing_hash = sol_order.eip712_signing_hash(domain);
        let signature = self
            .signer
            .sign_hash(&signing_hash)
            .await
            .map_err(|e| CoreError::Signing(e.to_string()))?;

        Ok(SignedClobOrder {
            salt: order.salt,
            maker: self.maker_address.to_string(),
            signer: self.signer_address.to_string(),
            taker: Address::ZERO.to_string(),
            token_id: order.token_id.clone(),
            maker_amount: order.maker_amount.to_string(),
            taker_amount: order.taker_amount.to_string(),
            expiration: "0".to_string(),
            nonce: "0".to_string(),
            fee_rate_bps: "0".to_string(),
            side: order.side,
            signature_type: SIGNATURE_TYPE_POLY_GNOSIS_SAFE,
            signature: format!("0x{}", hex::encode(signature.as_bytes())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A throwaway deterministic key — never used on any live chain.
    const TEST_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

    fn test_state() -> SignerState {
        SignerState::new(
            TEST_KEY,
            "0x0000000000000000000000000000000000000001".parse().unwrap(),
            137,
            "0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E".parse().unwrap(),
            "0xC5d563A36AE78145C45a50134d48A1215220f80a".parse().unwrap(),
        )
        .unwrap()
    }

    fn order(neg_risk: bool) -> OrderToSign {
        OrderToSign {
            token_id: "123456789".to_string(),
            maker_amount: U256::from(1_000_000u64),
            taker_amount: U256::from(2_000_000u64),
            side: OrderSide::Buy,
            neg_risk,
            salt: 42,
        }
    }

    #[tokio::test]
    async fn signs_a_batch_and_tags_gnosis_safe_signature_type() {
        let state = test_state();
        let signed = state.sign_batch_orders(&[order(false)]).await.unwrap();
        assert_eq!(signed.len(), 1);
        assert_eq!(signed[0].signature_type, 2);
        assert!(signed[0].signature.starts_with("0x"));
        assert_eq!(signed[0].signature.len(), 2 + 65 * 2);
    }

    #[tokio::test]
    async fn standard_and_neg_risk_domains_produce_different_signatures() {
        let state = test_state();
        let standard = state.sign_batch_orders(&[order(false)]).await.unwrap();
        let neg_risk = state.sign_batch_orders(&[order(true)]).await.unwrap();
        assert_ne!(standard[0].signature, neg_risk[0].signature);
    }

    #[tokio::test]
    async fn same_order_signs_deterministically() {
        let state = test_state();
        let a = state.sign_batch_orders(&[order(false)]).await.unwrap();
        let b = state.sign_batch_orders(&[order(false)]).await.unwrap();
        assert_eq!(a[0].signature, b[0].signature);
    }
}
