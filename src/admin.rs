//! Minimal admin HTTP surface (§2a expansion): the full REST control plane,
//! Swagger docs, and health probes the reference engine exposes are out of
//! scope (§1) as external collaborators, but a production rendition of this
//! process still needs *something* to observe it by. This trims the
//! reference engine's admin module (`axum::Router` + shared `State`) down to
//! the two routes that matter for the core: liveness, and a read-only export
//! of every trio's current leg state plus the executor's in-flight flag.
//!
//! The engine hot path is single-owner (§5); this module never touches it
//! directly. The hot-path task publishes an [`EngineSnapshot`] into a
//! `watch` channel after processing each update batch, and this module just
//! serves the latest published value — the same "latest-value, multiple
//! readers, no mailbox" shape §9's expansion calls for.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tokio::sync::watch;

use crate::ledger::CashLedger;
use crate::model::EngineSnapshot;

#[derive(Clone)]
pub struct AdminState {
    pub snapshot_rx: watch::Receiver<EngineSnapshot>,
    pub cash: Arc<CashLedger>,
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
}

#[derive(Serialize)]
struct SnapshotBody {
    usdc_balance: f64,
    order_in_flight: bool,
    trio_count: usize,
    #[serde(flatten)]
    engine: EngineSnapshot,
}

async fn healthz() -> Json<HealthBody> {
    Json(HealthBody { status: "ok" })
}

async fn snapshot(State(state): State<AdminState>) -> Json<SnapshotBody> {
    let engine = state.snapshot_rx.borrow().clone();
    Json(SnapshotBody {
        usdc_balance: state.cash.balance(),
        order_in_flight: state.cash.is_in_flight(),
        trio_count: engine.trios.len(),
        engine,
    })
}

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/snapshot", get(snapshot))
        .with_state(state)
}

pub async fn serve(state: AdminState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "admin surface listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EngineSnapshot;

    #[tokio::test]
    async fn healthz_reports_ok() {
        let body = healthz().await;
        assert_eq!(body.0.status, "ok");
    }

    #[tokio::test]
    async fn snapshot_reflects_published_engine_state() {
        let (_tx, rx) = watch::channel(EngineSnapshot { trios: vec![], order_in_flight: false });
        let cash = Arc::new(CashLedger::new(42.0));
        let state = AdminState { snapshot_rx: rx, cash };
        let body = snapshot(State(state)).await;
        assert_eq!(body.0.usdc_balance, 42.0);
        assert_eq!(body.0.trio_count, 0);
    }
}
