//! Minter (§4.6): converts collateral into matching YES+NO inventory so SELL
//! legs have something to sell. Jobs flow through a `MintQueue` trait
//! (`enqueue`/`dequeue`/`ack`/`nack_with_backoff`), the boundary where a
//! durable backend would plug in without touching the retry/backoff state
//! machine — the in-process `tokio::sync::mpsc` implementation here is what
//! the worker binary wires up today.
//!
//! The on-chain mint call is executed through the same Gnosis-Safe-style
//! proxy wallet the exchange orders settle against: an EIP-712 `SafeTx`
//! envelope is signed locally and handed to a relay (`SafeRelay`) rather than
//! broadcast as a raw transaction this crate assembles itself — the same
//! "sign locally, let a service execute" shape the reference engine's order
//! flow already follows for the exchange API, just one layer lower.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::{eip712_domain, sol, SolCall, SolStruct};
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use crate::config::MinterConfig;
use crate::error::CoreError;
use crate::ledger::InventoryLedger;
use crate::model::{Group, MarketDescriptor};
use crate::signing::SignerState;

sol! {
    #[derive(Debug)]
    struct SafeTx {
        address to;
        uint256 value;
        bytes data;
        uint8 operation;
        uint256 safeTxGas;
        uint256 baseGas;
        uint256 gasPrice;
        address gasToken;
        address refundReceiver;
        uint256 nonce;
    }

    // Binary-outcome conditional-tokens contract (§4.6 step 4, standard markets).
    interface IConditionalTokens {
        function splitPosition(address collateralToken, bytes32 parentCollectionId, bytes32 conditionId, uint256[] partition, uint256 amount);
    }

    // negRisk adapter's simpler overload (§4.6 step 4, negRisk markets).
    interface INegRiskAdapter {
        function splitPosition(bytes32 conditionId, uint256 amount);
    }
}

const OPERATION_CALL: u8 = 0;

/// One mint request: split `size` collateral into `size` YES + `size` NO of
/// the market `token_id` belongs to (§4.6).
#[derive(Debug, Clone, PartialEq)]
pub struct MintJob {
    pub group_key: String,
    pub token_id: String,
    pub size: f64,
    pub attempt: u32,
    pub enqueued_at_ms: i64,
}

/// Durable job queue boundary (§4.6 expansion). `dequeue` is the only
/// suspending call — everything else is a cheap local operation even for a
/// remote-backed implementation, since ack/nack just resolve a job this
/// worker already holds.
pub trait MintQueue: Send + Sync {
    fn enqueue(&self, job: MintJob) -> Result<(), CoreError>;
    async fn dequeue(&self) -> Option<MintJob>;
    fn ack(&self, job: &MintJob);
    fn nack_with_backoff(&self, job: MintJob, delay: Duration);
}

/// In-process queue backing the worker binary: an `mpsc` channel plus a
/// shared sender used by `nack_with_backoff` to requeue after a delay.
pub struct InProcessMintQueue {
    tx: mpsc::UnboundedSender<MintJob>,
    rx: Mutex<mpsc::UnboundedReceiver<MintJob>>,
}

impl InProcessMintQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Mutex::new(rx) }
    }
}

impl Default for InProcessMintQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MintQueue for InProcessMintQueue {
    fn enqueue(&self, job: MintJob) -> Result<(), CoreError> {
        self.tx
            .send(job)
            .map_err(|_| CoreError::MintFailure { asset_id: "unknown".to_string(), reason: "queue closed".to_string() })
    }

    async fn dequeue(&self) -> Option<MintJob> {
        self.rx.lock().await.recv().await
    }

    fn ack(&self, job: &MintJob) {
        info!(group = %job.group_key, token = %job.token_id, "mint job acknowledged");
    }

    fn nack_with_backoff(&self, mut job: MintJob, delay: Duration) {
        job.attempt += 1;
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(job);
        });
    }
}

/// Reads the proxy wallet's current collateral balance (§4.6 step 1) — kept
/// behind a trait so the retry/liquidity-gate logic is testable without a
/// live chain read.
pub trait CollateralSource: Send + Sync {
    async fn balance(&self, wallet: Address) -> Result<f64, CoreError>;
}

/// Submits a signed `SafeTx` for on-chain execution (§4.6 step 5) — in
/// production this is the proxy-wallet relay service; behind a trait so
/// signing correctness is tested without a network dependency.
pub trait SafeRelay: Send + Sync {
    async fn submit(&self, envelope: SignedSafeTx) -> Result<String, CoreError>;
}

#[derive(Debug, Clone)]
pub struct SignedSafeTx {
    pub safe_address: Address,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub nonce: U256,
    pub signature: String,
}

fn resolve_market<'a>(group: &'a Group, token_id: &str) -> Option<&'a MarketDescriptor> {
    group
        .parents
        .iter()
        .chain(group.children.iter())
        .find(|m| m.yes_id.as_deref() == Some(token_id) || m.no_id.as_deref() == Some(token_id))
}

/// ABI-encodes the split call for `market` (§4.6 step 4): standard markets
/// call `splitPosition(collateral, parentCollectionId, conditionId, [1,2],
/// amount)` on the conditional-tokens contract; negRisk markets call the
/// adapter's `splitPosition(conditionId, amount)` overload instead.
fn build_split_calldata(market: &MarketDescriptor, collateral: Address, amount_wei: U256) -> Result<Bytes, CoreError> {
    let condition_id = B256::from_str(&market.condition_id).map_err(|e| CoreError::MintFailure {
        asset_id: market.market_id.clone(),
        reason: format!("invalid conditionId {}: {e}", market.condition_id),
    })?;

    let calldata = if market.neg_risk {
        INegRiskAdapter::splitPositionCall { conditionId: condition_id, amount: amount_wei }.abi_encode()
    } else {
        IConditionalTokens::splitPositionCall {
            collateralToken: collateral,
            parentCollectionId: B256::ZERO,
            conditionId: condition_id,
            partition: vec![U256::from(1), U256::from(2)],
            amount: amount_wei,
        }
        .abi_encode()
    };
    Ok(Bytes::from(calldata))
}

pub struct Minter<Q: MintQueue, C: CollateralSource, R: SafeRelay> {
    queue: Q,
    collateral: C,
    relay: R,
    signer: SignerState,
    config: MinterConfig,
    groups: StdMutex<HashMap<String, Group>>,
    inventory: std::sync::Arc<InventoryLedger>,
    dedup: StdMutex<HashMap<String, i64>>,
    safe_address: Address,
    collateral_address: Address,
    split_contract: Address,
    neg_risk_split_contract: Address,
}

impl<Q: MintQueue, C: CollateralSource, R: SafeRelay> Minter<Q, C, R> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Q,
        collateral: C,
        relay: R,
        signer: SignerState,
        config: MinterConfig,
        inventory: std::sync::Arc<InventoryLedger>,
        safe_address: Address,
        collateral_address: Address,
        split_contract: Address,
        neg_risk_split_contract: Address,
    ) -> Self {
        Self {
            queue,
            collateral,
            relay,
            signer,
            config,
            groups: StdMutex::new(HashMap::new()),
            inventory,
            dedup: StdMutex::new(HashMap::new()),
            safe_address,
            collateral_address,
            split_contract,
            neg_risk_split_contract,
        }
    }

    pub fn rebuild_groups(&self, groups: Vec<Group>) {
        *self.groups.lock().unwrap() = groups.into_iter().map(|g| (g.group_key.clone(), g)).collect();
    }

    /// Schedules a mint, deduplicated within `dedup_window_ms` of the last
    /// enqueue for the same token (§4.6 "deduplicated within a 30s window").
    pub fn request_mint(&self, group_key: &str, token_id: &str, size: f64, now_ms: i64) -> Result<(), CoreError> {
        {
            let mut dedup = self.dedup.lock().unwrap();
            if let Some(&last) = dedup.get(token_id) {
                if now_ms - last < self.config.dedup_window_ms {
                    return Ok(());
                }
            }
            dedup.insert(token_id.to_string(), now_ms);
        }
        self.queue.enqueue(MintJob {
            group_key: group_key.to_string(),
            token_id: token_id.to_string(),
            size,
            attempt: 0,
            enqueued_at_ms: now_ms,
        })
    }

    /// Drains the queue forever, processing one job at a time. Intended to
    /// be spawned as its own task by the worker binary.
    pub async fn run(&self) {
        while let Some(job) = self.queue.dequeue().await {
            self.process(job).await;
        }
    }

    async fn process(&self, job: MintJob) {
        let timeout = Duration::from_millis(self.config.job_timeout_ms.max(0) as u64);
        let outcome = match tokio::time::timeout(timeout, self.try_mint(&job)).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::MintFailure {
                asset_id: job.token_id.clone(),
                reason: format!("mint job exceeded {}ms timeout", self.config.job_timeout_ms),
            }),
        };
        match outcome {
            Ok(()) => self.queue.ack(&job),
            Err(err) if job.attempt + 1 >= self.config.max_attempts => {
                warn!(token = %job.token_id, attempt = job.attempt, error = %err, "mint job exhausted retries");
            }
            Err(err) => {
                let backoff_idx = (job.attempt as usize).min(self.config.backoff_ms.len() - 1);
                let delay = Duration::from_millis(self.config.backoff_ms[backoff_idx]);
                warn!(token = %job.token_id, attempt = job.attempt, error = %err, delay_ms = delay.as_millis() as u64, "mint job failed, retrying");
                self.queue.nack_with_backoff(job, delay);
            }
        }
    }

    async fn try_mint(&self, job: &MintJob) -> Result<(), CoreError> {
        let balance = self.collateral.balance(self.safe_address).await?;
        if balance < job.size * self.config.liquidity_reserve_multiple {
            return Err(CoreError::MintFailure {
                asset_id: job.token_id.clone(),
                reason: format!("balance {balance} below reserve requirement for size {}", job.size),
            });
        }

        let market = {
            let groups = self.groups.lock().unwrap();
            let group = groups
                .get(&job.group_key)
                .ok_or_else(|| CoreError::CatalogueDrift { group_key: job.group_key.clone() })?;
            resolve_market(group, &job.token_id)
                .cloned()
                .ok_or_else(|| CoreError::CatalogueDrift { group_key: job.group_key.clone() })?
        };

        let amount_wei = U256::from((job.size * 1_000_000.0).round().max(0.0) as u128);
        let split_contract = if market.neg_risk { self.neg_risk_split_contract } else { self.split_contract };
        let calldata = build_split_calldata(&market, self.collateral_address, amount_wei)?;

        let envelope = self.sign_safe_tx(split_contract, calldata).await?;
        let tx_hash = self.relay.submit(envelope).await.map_err(|e| CoreError::MintFailure {
            asset_id: job.token_id.clone(),
            reason: e.to_string(),
        })?;

        self.inventory.increment(&job.group_key, &job.token_id, job.size);
        info!(group = %job.group_key, token = %job.token_id, size = job.size, tx_hash, "mint settled");
        Ok(())
    }

    async fn sign_safe_tx(&self, to: Address, data: Bytes) -> Result<SignedSafeTx, CoreError> {
        let domain = eip712_domain! {
            chain_id: 137,
            verifying_contract: self.safe_address,
        };
        let nonce = U256::ZERO;
        let safe_tx = SafeTx {
            to,
            value: U256::ZERO,
            data: data.clone(),
            operation: OPERATION_CALL,
            safeTxGas: U256::ZERO,
            baseGas: U256::ZERO,
            gasPrice: U256::ZERO,
            gasToken: Address::ZERO,
            refundReceiver: Address::ZERO,
            nonce,
        };
        let hash = safe_tx.eip712_signing_hash(&domain);
        let signature = self.signer.sign_raw_hash(hash).await?;
        Ok(SignedSafeTx {
            safe_address: self.safe_address,
            to,
            value: U256::ZERO,
            data,
            nonce,
            signature: format!("0x{}", hex::encode(signature.as_bytes())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MarketKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FakeCollateral(f64);
    impl CollateralSource for FakeCollateral {
        async fn balance(&self, _wallet: Address) -> Result<f64, CoreError> {
            Ok(self.0)
        }
    }

    struct FakeRelay {
        submitted: AtomicU32,
    }
    impl SafeRelay for FakeRelay {
        async fn submit(&self, _envelope: SignedSafeTx) -> Result<String, CoreError> {
            self.submitted.fetch_add(1, Ordering::SeqCst);
            Ok("0xdeadbeef".to_string())
        }
    }

    fn test_signer() -> SignerState {
        SignerState::new(
            "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d",
            Address::ZERO,
            137,
            "0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E".parse().unwrap(),
            "0xC5d563A36AE78145C45a50134d48A1215220f80a".parse().unwrap(),
        )
        .unwrap()
    }

    fn market(id: &str, neg_risk: bool) -> MarketDescriptor {
        MarketDescriptor {
            market_id: id.to_string(),
            slug: format!("{id}-slug"),
            group_key: "g".to_string(),
            kind: MarketKind::Threshold,
            lower: 1.0,
            upper: None,
            yes_id: Some(format!("{id}-yes")),
            no_id: Some(format!("{id}-no")),
            neg_risk,
            condition_id: format!("0x{:0>64}", hex::encode(id.as_bytes())),
            neg_risk_market_id: None,
            end_date_ms: 1_000_000,
        }
    }

    fn group() -> Group {
        Group {
            group_key: "g".to_string(),
            asset: "btc".to_string(),
            end_date_ms: 1_000_000,
            parents: vec![market("p1", false)],
            children: vec![],
        }
    }

    fn test_minter(balance: f64) -> Minter<InProcessMintQueue, FakeCollateral, FakeRelay> {
        let minter = Minter::new(
            InProcessMintQueue::new(),
            FakeCollateral(balance),
            FakeRelay { submitted: AtomicU32::new(0) },
            test_signer(),
            MinterConfig { backoff_ms: vec![1, 1, 1], ..MinterConfig::default() },
            Arc::new(InventoryLedger::new()),
            Address::ZERO,
            Address::ZERO,
            Address::ZERO,
            Address::ZERO,
        );
        minter.rebuild_groups(vec![group()]);
        minter
    }

    #[tokio::test]
    async fn mint_below_reserve_multiple_fails() {
        let minter = test_minter(10.0);
        let job = MintJob { group_key: "g".to_string(), token_id: "p1-yes".to_string(), size: 5.0, attempt: 0, enqueued_at_ms: 0 };
        let err = minter.try_mint(&job).await.unwrap_err();
        assert!(matches!(err, CoreError::MintFailure { .. }));
    }

    #[tokio::test]
    async fn successful_mint_increments_inventory() {
        let minter = test_minter(1000.0);
        let job = MintJob { group_key: "g".to_string(), token_id: "p1-yes".to_string(), size: 5.0, attempt: 0, enqueued_at_ms: 0 };
        minter.try_mint(&job).await.unwrap();
        assert_eq!(minter.inventory.available("g", "p1-yes"), 5.0);
    }

    #[tokio::test]
    async fn unknown_token_reports_catalogue_drift() {
        let minter = test_minter(1000.0);
        let job = MintJob { group_key: "g".to_string(), token_id: "missing".to_string(), size: 5.0, attempt: 0, enqueued_at_ms: 0 };
        let err = minter.try_mint(&job).await.unwrap_err();
        assert!(matches!(err, CoreError::CatalogueDrift { .. }));
    }

    struct StuckCollateral;
    impl CollateralSource for StuckCollateral {
        async fn balance(&self, _wallet: Address) -> Result<f64, CoreError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(1000.0)
        }
    }

    #[tokio::test]
    async fn process_times_out_a_stuck_job_and_retries() {
        let minter = Minter::new(
            InProcessMintQueue::new(),
            StuckCollateral,
            FakeRelay { submitted: AtomicU32::new(0) },
            test_signer(),
            MinterConfig { job_timeout_ms: 20, backoff_ms: vec![1, 1, 1], ..MinterConfig::default() },
            Arc::new(InventoryLedger::new()),
            Address::ZERO,
            Address::ZERO,
            Address::ZERO,
            Address::ZERO,
        );
        minter.rebuild_groups(vec![group()]);
        let job = MintJob { group_key: "g".to_string(), token_id: "p1-yes".to_string(), size: 5.0, attempt: 0, enqueued_at_ms: 0 };
        minter.process(job).await;
        assert_eq!(minter.inventory.available("g", "p1-yes"), 0.0);
    }

    #[test]
    fn dedup_window_suppresses_second_request() {
        let minter = test_minter(1000.0);
        minter.request_mint("g", "p1-yes", 5.0, 1000).unwrap();
        minter.request_mint("g", "p1-yes", 5.0, 1500).unwrap();
        // second call within the 30s default window should not enqueue again;
        // draining the queue once should leave it empty for a subsequent pop.
        let dedup = minter.dedup.lock().unwrap();
        assert_eq!(dedup.get("p1-yes"), Some(&1000));
    }
}
