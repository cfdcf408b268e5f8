use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use crate::{
    error::{AppError, Result},
    models::{ApiResponse, TxRecord, TxStatus},
};

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct TransactionQuery {
    pub status: Option<TxStatus>,
    pub limit: Option<usize>,
}

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

/// GET /api/v1/transactions
pub async fn list_transactions(
    State(state): State<AppState>,
    Query(query): Query<TransactionQuery>,
) -> Result<Json<ApiResponse<Vec<TxRecord>>>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    if limit == 0 || limit > MAX_LIMIT {
        return Err(AppError::BadRequest(format!(
            "limit must be between 1 and {}",
            MAX_LIMIT
        )));
    }

    let records = state
        .ctx
        .tracker()
        .list()
        .await
        .into_iter()
        .filter(|record| query.status.map_or(true, |status| record.status == status))
        .take(limit)
        .collect();
    Ok(Json(ApiResponse::success(records)))
}

/// GET /api/v1/transactions/{id}
pub async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<ApiResponse<TxRecord>>> {
    let record = state
        .ctx
        .tracker()
        .get(id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Transaction record {}", id)))?;
    Ok(Json(ApiResponse::success(record)))
}
