use axum::{extract::State, Json};
use ethers::types::Address;
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, Result},
    models::{ApiResponse, SessionSnapshot, Wei, WorldId},
};

use super::{parse_address, AppState};

// ==================== REQUEST/RESPONSE TYPES ====================

#[derive(Debug, Default, Deserialize)]
pub struct ConnectRequest {
    pub address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SignUpRequest {
    pub username: String,
    pub world_id: WorldId,
    /// Display units, e.g. "0.1".
    pub fee: String,
}

#[derive(Debug, Serialize)]
pub struct OwnerResponse {
    pub owner: Address,
    pub is_session_owner: bool,
}

// ==================== HANDLERS ====================

/// GET /api/v1/session
pub async fn get_session(State(state): State<AppState>) -> Json<ApiResponse<SessionSnapshot>> {
    Json(ApiResponse::success(state.ctx.session.snapshot().await))
}

/// POST /api/v1/session/connect
pub async fn connect(
    State(state): State<AppState>,
    body: Option<Json<ConnectRequest>>,
) -> Result<Json<ApiResponse<SessionSnapshot>>> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let address = resolve_wallet(req.address.as_deref(), state.default_wallet)?;
    let snapshot = state.ctx.session.connect(address).await?;
    Ok(Json(ApiResponse::success(snapshot)))
}

/// POST /api/v1/session/disconnect
pub async fn disconnect(State(state): State<AppState>) -> Json<ApiResponse<SessionSnapshot>> {
    Json(ApiResponse::success(state.ctx.session.disconnect().await))
}

/// POST /api/v1/auth/login
pub async fn login(State(state): State<AppState>) -> Result<Json<ApiResponse<SessionSnapshot>>> {
    let snapshot = state.ctx.session.login().await?;
    Ok(Json(ApiResponse::success(snapshot)))
}

/// POST /api/v1/auth/signup
pub async fn sign_up(
    State(state): State<AppState>,
    Json(req): Json<SignUpRequest>,
) -> Result<Json<ApiResponse<SessionSnapshot>>> {
    let fee = Wei::from_ether_str(&req.fee)?;
    let snapshot = state
        .ctx
        .session
        .sign_up(&req.username, req.world_id, fee)
        .await?;
    Ok(Json(ApiResponse::success(snapshot)))
}

/// GET /api/v1/owner
pub async fn get_owner(State(state): State<AppState>) -> Result<Json<ApiResponse<OwnerResponse>>> {
    let owner = state.ctx.client.get_owner().await?;
    let is_session_owner = state.ctx.session.address().await == Some(owner);
    Ok(Json(ApiResponse::success(OwnerResponse {
        owner,
        is_session_owner,
    })))
}

fn resolve_wallet(requested: Option<&str>, default_wallet: Option<Address>) -> Result<Address> {
    match requested.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => parse_address(value, "wallet"),
        None => default_wallet.ok_or(AppError::NoWallet),
    }
}
