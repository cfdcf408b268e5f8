use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;

use crate::{
    error::{AppError, Result},
    models::{ApiResponse, TxOutcome, Wei, WorldId},
};

use super::{parse_address, AppState};

// Combat rules live in the contract. These handlers only forward the writes.

#[derive(Debug, Deserialize)]
pub struct AttackRequest {
    pub defender: String,
    pub troops: u64,
}

#[derive(Debug, Deserialize)]
pub struct ScoutRequest {
    pub city_owner: String,
    /// Display units, e.g. "0.01".
    pub fee: String,
}

/// POST /api/v1/worlds/{id}/attack
pub async fn attack_city(
    State(state): State<AppState>,
    Path(world_id): Path<WorldId>,
    Json(req): Json<AttackRequest>,
) -> Result<Json<ApiResponse<TxOutcome>>> {
    let from = state.ctx.session.address().await.ok_or(AppError::NoWallet)?;
    let defender = parse_address(&req.defender, "defender")?;
    let outcome = state
        .ctx
        .client
        .attack_city(from, world_id, defender, req.troops)
        .await?;
    Ok(Json(ApiResponse::success(outcome)))
}

/// POST /api/v1/worlds/{id}/scout
pub async fn scout_city(
    State(state): State<AppState>,
    Path(world_id): Path<WorldId>,
    Json(req): Json<ScoutRequest>,
) -> Result<Json<ApiResponse<TxOutcome>>> {
    let from = state.ctx.session.address().await.ok_or(AppError::NoWallet)?;
    let city_owner = parse_address(&req.city_owner, "city owner")?;
    let fee = Wei::from_ether_str(&req.fee)?;
    let outcome = state
        .ctx
        .client
        .scout_city(from, world_id, city_owner, fee)
        .await?;
    Ok(Json(ApiResponse::success(outcome)))
}
