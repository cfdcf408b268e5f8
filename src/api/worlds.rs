use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use ethers::types::Address;
use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    models::{
        ApiResponse, JoinOutcome, MembershipState, TxOutcome, Wei, WorldDraft, WorldEntry,
        WorldId,
    },
    services::world_catalog::resolve_membership,
};

use super::{AppState, FeeView};

// ==================== REQUEST/RESPONSE TYPES ====================

#[derive(Debug, Deserialize)]
pub struct CreateWorldRequest {
    pub name: String,
    pub x: i64,
    pub y: i64,
    /// Display units, e.g. "0.1".
    pub fee: String,
}

#[derive(Debug, Serialize)]
pub struct WorldView {
    pub id: WorldId,
    pub name: String,
    pub x: u64,
    pub y: u64,
    pub cells: u128,
    pub fee: FeeView,
    pub owner: Address,
    pub player_count: u64,
    pub is_active: bool,
    pub state: MembershipState,
}

#[derive(Debug, Serialize)]
pub struct CatalogResponse {
    pub worlds: Vec<WorldView>,
    pub current_world: Option<WorldId>,
    pub fetched_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct CreateWorldResponse {
    pub transaction: TxOutcome,
    pub worlds: usize,
}

impl WorldView {
    fn from_entry(entry: WorldEntry) -> Result<Self> {
        let WorldEntry { world, state } = entry;
        let cells = world.cells();
        Ok(Self {
            id: world.id,
            name: world.name,
            x: world.x,
            y: world.y,
            cells,
            fee: FeeView::from_wei(world.fee)?,
            owner: world.owner,
            player_count: world.player_count,
            is_active: world.is_active,
            state,
        })
    }
}

// ==================== HANDLERS ====================

/// GET /api/v1/worlds
pub async fn list_worlds(State(state): State<AppState>) -> Result<Json<ApiResponse<CatalogResponse>>> {
    let entries = state.ctx.catalog.entries().await?;
    catalog_response(&state, entries).await
}

/// POST /api/v1/worlds/refresh
pub async fn refresh_worlds(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<CatalogResponse>>> {
    let worlds = state.ctx.catalog.refresh().await?;
    let current_world = state.ctx.session.current_world().await;
    catalog_response(&state, resolve_membership(&worlds, current_world)).await
}

/// GET /api/v1/worlds/{id}
pub async fn get_world(
    State(state): State<AppState>,
    Path(world_id): Path<WorldId>,
) -> Result<Json<ApiResponse<WorldView>>> {
    let world = state.ctx.client.get_world(world_id).await?;
    let membership = if state.ctx.session.current_world().await == Some(world.id) {
        MembershipState::Enterable
    } else {
        MembershipState::Joinable
    };
    let view = WorldView::from_entry(WorldEntry {
        world,
        state: membership,
    })?;
    Ok(Json(ApiResponse::success(view)))
}

/// POST /api/v1/worlds
pub async fn create_world(
    State(state): State<AppState>,
    Json(req): Json<CreateWorldRequest>,
) -> Result<Json<ApiResponse<CreateWorldResponse>>> {
    let draft = WorldDraft {
        name: req.name,
        x: req.x,
        y: req.y,
        fee: Wei::from_ether_str(&req.fee)?,
    };
    let transaction = state.ctx.catalog.submit_create_world(draft).await?;
    let worlds = state.ctx.catalog.worlds().await?.len();
    Ok(Json(ApiResponse::success(CreateWorldResponse {
        transaction,
        worlds,
    })))
}

/// POST /api/v1/worlds/{id}/join
pub async fn join_or_enter(
    State(state): State<AppState>,
    Path(world_id): Path<WorldId>,
) -> Result<Json<ApiResponse<JoinOutcome>>> {
    let outcome = state.ctx.catalog.join_or_enter(world_id).await?;
    Ok(Json(ApiResponse::success(outcome)))
}

async fn catalog_response(
    state: &AppState,
    entries: Vec<WorldEntry>,
) -> Result<Json<ApiResponse<CatalogResponse>>> {
    let worlds = entries
        .into_iter()
        .map(WorldView::from_entry)
        .collect::<Result<Vec<_>>>()?;
    Ok(Json(ApiResponse::success(CatalogResponse {
        worlds,
        current_world: state.ctx.session.current_world().await,
        fetched_at: state.ctx.catalog.fetched_at().await,
    })))
}
