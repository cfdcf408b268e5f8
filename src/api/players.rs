use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::{
    error::{AppError, Result},
    models::{ApiResponse, CityLocation, Player},
};

use super::{parse_address, AppState};

#[derive(Debug, Serialize)]
pub struct PlayerView {
    #[serde(flatten)]
    pub player: Player,
    pub city: Option<CityLocation>,
}

/// GET /api/v1/players/{address}
pub async fn get_player(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<ApiResponse<PlayerView>>> {
    let address = parse_address(&address, "player")?;
    let player = state
        .ctx
        .client
        .get_player(address)
        .await?
        .ok_or(AppError::UserNotFound)?;

    let city = match player.current_world {
        Some(world_id) => state.ctx.client.get_player_location(world_id, address).await?,
        None => None,
    };

    Ok(Json(ApiResponse::success(PlayerView { player, city })))
}
