//! `engine` binary (§6): the HTTP control plane + hot path, in one process.
//! Owns the `Engine`, the ledgers, and the signer; runs the catalogue
//! refresh loop, the top-of-book consumer, and the admin HTTP surface as
//! sibling tasks on one multi-thread runtime.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use alloy_primitives::Address;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use poly_trio_arb::admin::{self, AdminState};
use poly_trio_arb::catalogue::StructureBuilder;
use poly_trio_arb::clob_http::{ClobCredentials, ClobHttpClient};
use poly_trio_arb::config::{EngineConfig, ExecutorConfig, MinterConfig, PositionManagerConfig, SizerConfig};
use poly_trio_arb::engine::Engine;
use poly_trio_arb::executor::Executor;
use poly_trio_arb::feed::{self, FeedConfig};
use poly_trio_arb::gamma_http::GammaCatalogue;
use poly_trio_arb::ledger::{CashLedger, InventoryLedger, TokenBalanceSource};
use poly_trio_arb::minter::{CollateralSource, InProcessMintQueue, Minter};
use poly_trio_arb::model::{Group, TopOfBookUpdate};
use poly_trio_arb::position_manager::PositionManager;
use poly_trio_arb::relay::{HttpSafeRelay, RpcCollateralSource, RpcPositionBalanceSource};
use poly_trio_arb::signing::SignerState;
use poly_trio_arb::sizer::size_opportunity;

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

    let engine_config = EngineConfig::from_env();
    let sizer_config = SizerConfig::from_env();
    let executor_config = ExecutorConfig::from_env();
    let minter_config = MinterConfig::from_env();
    let position_config = PositionManagerConfig::from_env();

    let initial_balance: f64 = std::env::var("ARB_INITIAL_USDC_BALANCE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0.0);
    let cash = Arc::new(CashLedger::new(initial_balance));
    let inventory = Arc::new(InventoryLedger::new());

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

    let http = ClobHttpClient::new(
        executor_config.rest_url.clone(),
        ClobCredentials {
            address: executor_config.api_address.clone(),
            api_key: executor_config.api_key.clone(),
            api_secret: executor_config.api_secret.clone(),
            passphrase: executor_config.api_passphrase.clone(),
        },
    );
    if let Err(err) = http.warm_connection().await {
        warn!(error = %err, "order API connection warm-up failed, continuing anyway");
    }

    let (mint_tx, mut mint_rx) = mpsc::unbounded_channel();
    let (submitted_tx, mut submitted_rx) = mpsc::unbounded_channel();

    let executor = Arc::new(Executor::new(
        executor_config.clone(),
        Arc::clone(&cash),
        Arc::clone(&inventory),
        signer.clone(),
        http.clone(),
        Some(mint_tx),
        Some(submitted_tx),
    ));

    let position_manager = Arc::new(PositionManager::new(http.clone(), Arc::clone(&executor), position_config));
    tokio::spawn({
        let position_manager = Arc::clone(&position_manager);
        async move {
            while let Some(orders) = submitted_rx.recv().await {
                position_manager.schedule_reconciliation(orders);
            }
        }
    });

    let rpc_url = std::env::var("POLYGON_RPC_URL").unwrap_or_else(|_| "https://polygon-rpc.com".to_string());
    let collateral_address = env_addr("POLYMARKET_COLLATERAL_ADDRESS", Address::ZERO);
    let split_contract = env_addr("POLYMARKET_CTF_ADDRESS", Address::ZERO);
    let neg_risk_split_contract = env_addr("POLYMARKET_NEG_RISK_ADAPTER_ADDRESS", Address::ZERO);
    let relay_url =
        std::env::var("SAFE_RELAY_URL").unwrap_or_else(|_| "https://safe-transaction.polygon.gnosis.io".to_string());

    let minter = Arc::new(Minter::new(
        InProcessMintQueue::new(),
        RpcCollateralSource::new(rpc_url.clone(), collateral_address),
        HttpSafeRelay::new(relay_url),
        signer.clone(),
        minter_config,
        Arc::clone(&inventory),
        proxy_address,
        collateral_address,
        split_contract,
        neg_risk_split_contract,
    ));
    tokio::spawn({
        let minter = Arc::clone(&minter);
        async move { minter.run().await }
    });
    tokio::spawn({
        let minter = Arc::clone(&minter);
        async move {
            while let Some(trigger) = mint_rx.recv().await {
                if let Err(err) = minter.request_mint(&trigger.group_key, &trigger.token_id, trigger.size, now_ms()) {
                    warn!(error = %err, token = %trigger.token_id, "failed to enqueue mint trigger");
                }
            }
        }
    });

    let event_slugs: Vec<String> = std::env::var("ARB_EVENT_SLUGS")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    let structure_builder = Arc::new(StructureBuilder::new(GammaCatalogue::new(event_slugs)));

    let mut engine = Engine::new(engine_config);
    let initial_groups = structure_builder.rebuild(now_ms()).unwrap_or_else(|err| {
        warn!(error = %err, "initial catalogue rebuild failed, starting with an empty group set");
        Vec::new()
    });
    minter.rebuild_groups(initial_groups.clone());
    let latest_groups = Arc::new(std::sync::Mutex::new(initial_groups.clone()));
    engine.rebuild_groups(initial_groups);

    // §5 "a background refresher writes a reconciled value every 5s ... that
    // only applies when no dispatch is in flight" — the executor's Reserve
    // step is the only other writer, and it always holds the in-flight flag
    // while it does so, so skipping the write here is race-free.
    tokio::spawn({
        let cash = Arc::clone(&cash);
        let collateral_source = RpcCollateralSource::new(rpc_url.clone(), collateral_address);
        async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(5));
            loop {
                ticker.tick().await;
                if cash.is_in_flight() {
                    continue;
                }
                match collateral_source.balance(proxy_address).await {
                    Ok(balance) => cash.set_balance(balance),
                    Err(err) => warn!(error = %err, "cash balance refresh failed"),
                }
            }
        }
    });

    // §5 "mintedInventory ... a periodic (10s) background refresh rewrites
    // the hash from the durable ledger" — reads every known trio token's
    // on-chain CTF balance and rewrites the group's entry wholesale, so a
    // drifted optimistic decrement (executor) or increment (minter) self-heals.
    tokio::spawn({
        let inventory = Arc::clone(&inventory);
        let latest_groups = Arc::clone(&latest_groups);
        let position_source = RpcPositionBalanceSource::new(rpc_url.clone(), split_contract);
        async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(10));
            loop {
                ticker.tick().await;
                let groups = latest_groups.lock().unwrap().clone();
                for group in &groups {
                    let token_ids: Vec<String> = group
                        .parents
                        .iter()
                        .chain(group.children.iter())
                        .flat_map(|m| [m.yes_id.clone(), m.no_id.clone()])
                        .flatten()
                        .collect();
                    if token_ids.is_empty() {
                        continue;
                    }
                    match position_source.balances(proxy_address, &token_ids).await {
                        Ok(balances) => inventory.refresh_group(&group.group_key, balances),
                        Err(err) => warn!(error = %err, group = %group.group_key, "inventory refresh failed"),
                    }
                }
            }
        }
    });

    let (snapshot_tx, snapshot_rx) = watch::channel(engine.snapshot(cash.is_in_flight()));
    let admin_state = AdminState { snapshot_rx, cash: Arc::clone(&cash) };
    let admin_addr: SocketAddr = std::env::var("ARB_ADMIN_ADDR")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| "0.0.0.0:8080".parse().unwrap());
    tokio::spawn(async move {
        if let Err(err) = admin::serve(admin_state, admin_addr).await {
            error!(error = %err, "admin surface exited");
        }
    });

    let (groups_tx, mut groups_rx) = mpsc::unbounded_channel::<Vec<Group>>();
    tokio::spawn({
        let structure_builder = Arc::clone(&structure_builder);
        async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                ticker.tick().await;
                match structure_builder.rebuild(now_ms()) {
                    Ok(groups) => {
                        if groups_tx.send(groups).is_err() {
                            return;
                        }
                    }
                    Err(err) => warn!(error = %err, "periodic catalogue rebuild failed"),
                }
            }
        }
    });

    let (feed_tx, mut feed_rx) = mpsc::unbounded_channel::<TopOfBookUpdate>();
    let feed_config =
        FeedConfig { ws_url: std::env::var("ARB_WS_URL").unwrap_or_else(|_| FeedConfig::default().ws_url), ..FeedConfig::default() };
    tokio::spawn(feed::run_ws_feed(feed_config, feed_tx));

    info!("engine started");
    loop {
        tokio::select! {
            update = feed_rx.recv() => {
                let Some(update) = update else { break };
                let opportunities = engine.on_top_of_book(&update);
                for opportunity in opportunities {
                    let size = size_opportunity(&opportunity, cash.balance(), &inventory, &sizer_config);
                    if size <= 0.0 {
                        continue;
                    }
                    if let Err(err) = executor.try_execute(opportunity, size, now_ms()) {
                        warn!(error = %err, "opportunity rejected before dispatch");
                    }
                }
                let _ = snapshot_tx.send(engine.snapshot(cash.is_in_flight()));
            }
            groups = groups_rx.recv() => {
                let Some(groups) = groups else { continue };
                minter.rebuild_groups(groups.clone());
                *latest_groups.lock().unwrap() = groups.clone();
                engine.rebuild_groups(groups);
                let _ = snapshot_tx.send(engine.snapshot(cash.is_in_flight()));
            }
        }
    }

    Ok(())
}
