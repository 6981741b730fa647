//! `worker` binary (§6): queues only, no HTTP. Runs the minter's
//! dequeue/process loop and the periodic catalogue refresh it needs to
//! resolve tokens to markets, with no admin surface and no top-of-book feed.
//!
//! `MintQueue` is a trait precisely so a durable backend can stand between
//! this process and `engine` in production (§4.6); wired against the
//! in-process implementation, as shipped here, this binary is a standalone
//! soak-runner for the mint pipeline rather than `engine`'s actual job
//! source — the two binaries don't yet share a queue across the process
//! boundary.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use alloy_primitives::Address;
use tracing::{info, warn};

use poly_trio_arb::catalogue::StructureBuilder;
use poly_trio_arb::config::{ExecutorConfig, MinterConfig};
use poly_trio_arb::gamma_http::GammaCatalogue;
use poly_trio_arb::ledger::InventoryLedger;
use poly_trio_arb::minter::{InProcessMintQueue, Minter};
use poly_trio_arb::relay::{HttpSafeRelay, RpcCollateralSource};
use poly_trio_arb::signing::SignerState;

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as i64
}

fn env_addr(key: &str, default: Address) -> Address {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt().with_env_filter("info").init();

    let executor_config = ExecutorConfig::from_env();
    let minter_config = MinterConfig::from_env();

    let private_key = executor_config
        .signer_private_key
        .clone()
        .ok_or_else(|| anyhow::anyhow!("POLYMARKET_PRIVATE_KEY must be set"))?;
    let proxy_address: Address = executor_config
        .proxy_address
        .parse()
        .map_err(|_| anyhow::anyhow!("POLYMARKET_FUNDER_ADDRESS is not a valid address"))?;
    let exchange_address: Address = executor_config.exchange_address.parse()?;
    let neg_risk_exchange_address: Address = executor_config.neg_risk_exchange_address.parse()?;

    let signer = SignerState::new(
        &private_key,
        proxy_address,
        executor_config.chain_id,
        exchange_address,
        neg_risk_exchange_address,
    )?;

    let rpc_url = std::env::var("POLYGON_RPC_URL").unwrap_or_else(|_| "https://polygon-rpc.com".to_string());
    let collateral_address = env_addr("POLYMARKET_COLLATERAL_ADDRESS", Address::ZERO);
    let split_contract = env_addr("POLYMARKET_CTF_ADDRESS", Address::ZERO);
    let neg_risk_split_contract = env_addr("POLYMARKET_NEG_RISK_ADAPTER_ADDRESS", Address::ZERO);
    let relay_url =
        std::env::var("SAFE_RELAY_URL").unwrap_or_else(|_| "https://safe-transaction.polygon.gnosis.io".to_string());

    let minter = Arc::new(Minter::new(
        InProcessMintQueue::new(),
        RpcCollateralSource::new(rpc_url, collateral_address),
        HttpSafeRelay::new(relay_url),
        signer,
        minter_config,
        Arc::new(InventoryLedger::new()),
        proxy_address,
        collateral_address,
        split_contract,
        neg_risk_split_contract,
    ));

    let event_slugs: Vec<String> = std::env::var("ARB_EVENT_SLUGS")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    let structure_builder = StructureBuilder::new(GammaCatalogue::new(event_slugs));
    match structure_builder.rebuild(now_ms()) {
        Ok(groups) => minter.rebuild_groups(groups),
        Err(err) => warn!(error = %err, "initial catalogue rebuild failed, starting with an empty group set"),
    }

    tokio::spawn({
        let minter = Arc::clone(&minter);
        async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                ticker.tick().await;
                match structure_builder.rebuild(now_ms()) {
                    Ok(groups) => minter.rebuild_groups(groups),
                    Err(err) => warn!(error = %err, "periodic catalogue rebuild failed"),
                }
            }
        }
    });

    info!("worker started, draining mint queue");
    minter.run().await;
    Ok(())
}
