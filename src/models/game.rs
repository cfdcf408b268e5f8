use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use ethers::utils::parse_ether;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::CHAIN_UNIT_DECIMALS;
use crate::error::{AppError, Result};

// ==================== AMOUNTS ====================

/// Amount in the chain's smallest unit. Never scaled until display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Wei(pub U256);

impl Wei {
    pub fn zero() -> Self {
        Self(U256::zero())
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn raw(&self) -> U256 {
        self.0
    }

    /// Parses a display amount such as "0.1" into wei.
    pub fn from_ether_str(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(AppError::InvalidParameters("Amount cannot be empty".into()));
        }
        parse_ether(trimmed)
            .map(Self)
            .map_err(|e| AppError::InvalidParameters(format!("Invalid amount '{}': {}", trimmed, e)))
    }

    /// Display conversion; fails rather than rounding when the value exceeds decimal range.
    pub fn to_ether_decimal(&self) -> Result<Decimal> {
        if self.0 > U256::from(i128::MAX as u128) {
            return Err(AppError::Internal(format!("Amount {} exceeds display range", self.0)));
        }
        let raw = self.0.as_u128() as i128;
        Decimal::try_from_i128_with_scale(raw, CHAIN_UNIT_DECIMALS)
            .map(|d| d.normalize())
            .map_err(|e| AppError::Internal(format!("Amount {} exceeds display range: {}", self.0, e)))
    }
}

impl From<U256> for Wei {
    fn from(value: U256) -> Self {
        Self(value)
    }
}

impl From<u128> for Wei {
    fn from(value: u128) -> Self {
        Self(U256::from(value))
    }
}

impl fmt::Display for Wei {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Narrows a ledger integer to u64, refusing to truncate.
pub fn u256_to_u64(value: U256, field: &str) -> Result<u64> {
    if value > U256::from(u64::MAX) {
        return Err(AppError::Internal(format!("{} value {} overflows u64", field, value)));
    }
    Ok(value.as_u64())
}

// ==================== WORLD ====================

pub type WorldId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct World {
    pub id: WorldId,
    pub name: String,
    pub x: u64,
    pub y: u64,
    pub fee: Wei,
    pub owner: Address,
    pub player_count: u64,
    pub is_active: bool,
}

impl World {
    pub fn cells(&self) -> u128 {
        self.x as u128 * self.y as u128
    }
}

/// Unvalidated world parameters as entered by the owner.
#[derive(Debug, Clone)]
pub struct WorldDraft {
    pub name: String,
    pub x: i64,
    pub y: i64,
    pub fee: Wei,
}

impl WorldDraft {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::InvalidParameters("World name cannot be empty".into()));
        }
        if self.x < 0 || self.y < 0 {
            return Err(AppError::InvalidParameters(
                "World dimensions cannot be negative".into(),
            ));
        }
        if self.fee.is_zero() {
            return Err(AppError::InvalidParameters("World fee must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipState {
    Joinable,
    Enterable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorldEntry {
    pub world: World,
    pub state: MembershipState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JoinOutcome {
    /// Already a member; nothing was submitted.
    Entered { world_id: WorldId },
    Joined {
        world_id: WorldId,
        settlement: TxOutcome,
    },
}

// ==================== PLAYER ====================

/// Raw `players(address)` record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub username: String,
    pub is_registered: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub address: Address,
    pub username: String,
    pub is_registered: bool,
    pub current_world: Option<WorldId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CityLocation {
    pub x: u64,
    pub y: u64,
}

// ==================== LEDGER CALLS ====================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerCall {
    CreateWorld {
        name: String,
        x: U256,
        y: U256,
        fee: Wei,
    },
    RegisterUser {
        username: String,
    },
    JoinWorld {
        world_id: WorldId,
        username: String,
        value: Wei,
    },
    AttackCity {
        world_id: WorldId,
        defender: Address,
        troops: U256,
    },
    ScoutCity {
        world_id: WorldId,
        city_owner: Address,
        value: Wei,
    },
}

impl LedgerCall {
    pub fn kind(&self) -> TxKind {
        match self {
            LedgerCall::CreateWorld { .. } => TxKind::CreateWorld,
            LedgerCall::RegisterUser { .. } => TxKind::RegisterUser,
            LedgerCall::JoinWorld { .. } => TxKind::JoinWorld,
            LedgerCall::AttackCity { .. } => TxKind::AttackCity,
            LedgerCall::ScoutCity { .. } => TxKind::ScoutCity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub tx_hash: H256,
    pub block_number: Option<u64>,
}

// ==================== TRANSACTIONS ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    CreateWorld,
    RegisterUser,
    JoinWorld,
    AttackCity,
    ScoutCity,
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TxKind::CreateWorld => "create_world",
            TxKind::RegisterUser => "register_user",
            TxKind::JoinWorld => "join_world",
            TxKind::AttackCity => "attack_city",
            TxKind::ScoutCity => "scout_city",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Settled,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct TxRecord {
    pub id: u64,
    pub kind: TxKind,
    pub from: Address,
    pub tx_hash: Option<H256>,
    pub status: TxStatus,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub block_number: Option<u64>,
    pub submitted_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Returned by every settled write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxOutcome {
    pub record_id: u64,
    pub kind: TxKind,
    pub tx_hash: H256,
    pub block_number: Option<u64>,
}

// ==================== SESSION ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    AnonymousNoWallet,
    WalletConnectedUnregistered,
    WalletConnectedRegistered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignUpStep {
    Validate,
    Register,
    Join,
}

impl fmt::Display for SignUpStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SignUpStep::Validate => "validate",
            SignUpStep::Register => "register",
            SignUpStep::Join => "join",
        };
        f.write_str(label)
    }
}

/// Where the last sign-up got to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SignUpProgress {
    Registering,
    Joining { world_id: WorldId },
    RegisteredNotJoined { world_id: WorldId },
    Completed { world_id: WorldId },
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub address: Option<Address>,
    pub username: Option<String>,
    pub current_world: Option<WorldId>,
    pub sign_up: Option<SignUpProgress>,
}

// ==================== API ====================

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ether_string_round_trips_through_display_boundary() {
        let fee = Wei::from_ether_str("0.1").expect("valid amount");
        assert_eq!(fee.raw(), U256::from(100_000_000_000_000_000u128));
        assert_eq!(fee.to_ether_decimal().expect("in range").to_string(), "0.1");
    }

    #[test]
    fn invalid_amounts_are_rejected() {
        assert!(matches!(
            Wei::from_ether_str(""),
            Err(AppError::InvalidParameters(_))
        ));
        assert!(matches!(
            Wei::from_ether_str("abc"),
            Err(AppError::InvalidParameters(_))
        ));
    }

    #[test]
    fn display_conversion_refuses_huge_values() {
        let huge = Wei(U256::MAX);
        assert!(matches!(huge.to_ether_decimal(), Err(AppError::Internal(_))));
    }

    #[test]
    fn u64_narrowing_checks_overflow() {
        assert_eq!(u256_to_u64(U256::from(42u64), "x").unwrap(), 42);
        assert!(u256_to_u64(U256::from(u64::MAX) + U256::one(), "x").is_err());
    }

    #[test]
    fn draft_validation_rules() {
        let fee = Wei::from(1u128);
        let ok = WorldDraft { name: "Richmond".into(), x: 10, y: 10, fee };
        assert!(ok.validate().is_ok());

        let blank = WorldDraft { name: "  ".into(), ..ok.clone() };
        assert!(matches!(blank.validate(), Err(AppError::InvalidParameters(_))));

        let negative = WorldDraft { x: -1, ..ok.clone() };
        assert!(matches!(negative.validate(), Err(AppError::InvalidParameters(_))));

        let free = WorldDraft { fee: Wei::zero(), ..ok };
        assert!(matches!(free.validate(), Err(AppError::InvalidParameters(_))));
    }

    #[test]
    fn api_response_success_sets_flag() {
        let response = ApiResponse::success("ok");
        assert!(response.success);
        assert_eq!(response.data, "ok");
    }
}
