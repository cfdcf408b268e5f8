// src/api/mod.rs

pub mod combat;
pub mod health;
pub mod players;
pub mod session;
pub mod transactions;
pub mod worlds;

use ethers::types::Address;
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::Config;
use crate::constants::DISPLAY_CURRENCY;
use crate::error::{AppError, Result};
use crate::models::Wei;
use crate::services::GameContext;

// AppState definition
#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<GameContext>,
    pub config: Config,
    /// Address used when a connect request names none (the rpc signer).
    pub default_wallet: Option<Address>,
}

pub fn parse_address(value: &str, field: &str) -> Result<Address> {
    Address::from_str(value.trim())
        .map_err(|_| AppError::BadRequest(format!("Invalid {} address: {}", field, value)))
}

/// Fee as it crosses the HTTP boundary: raw wei plus the human value.
#[derive(Debug, Serialize)]
pub struct FeeView {
    pub wei: String,
    pub amount: String,
    pub currency: &'static str,
}

impl FeeView {
    pub fn from_wei(fee: Wei) -> Result<Self> {
        Ok(Self {
            wei: fee.to_string(),
            amount: fee.to_ether_decimal()?.to_string(),
            currency: DISPLAY_CURRENCY,
        })
    }
}
