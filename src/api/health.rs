use axum::{extract::State, Json};
use serde::Serialize;
use super::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub ledger: String,
    pub ledger_status: String,
    pub pending_transactions: usize,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    // A cheap read proves the ledger answers.
    let ledger_status = match state.ctx.client.get_owner().await {
        Ok(_) => "connected".to_string(),
        Err(err) => {
            tracing::warn!("Health check ledger read failed: {}", err);
            "disconnected".to_string()
        }
    };

    let ledger = if state.config.is_simulated() {
        "simulated"
    } else {
        "rpc"
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        ledger: ledger.to_string(),
        ledger_status,
        pending_transactions: state.ctx.tracker().pending_count().await,
    })
}
