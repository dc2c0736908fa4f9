use crate::{models::HealthStatus, services::WalletService};
use axum::{extract::State, Json};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct HealthState {
    pub wallet: Arc<WalletService>,
    pub started_at: Instant,
}

pub async fn health_check(State(state): State<HealthState>) -> Json<HealthStatus> {
    let wallet_ok = state.wallet.is_provisioned();
    let rpc_ok = state.wallet.rpc_ok().await;

    let status = if rpc_ok { "healthy" } else { "degraded" };

    Json(HealthStatus {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        wallet: wallet_ok,
        rpc: rpc_ok,
        uptime_seconds: state.started_at.elapsed().as_secs(),
        timestamp: Utc::now(),
    })
}
