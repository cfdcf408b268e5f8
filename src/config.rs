use serde::Deserialize;
use std::env;
use std::str::FromStr;

use crate::constants::{
    DEFAULT_CHAIN_ID, DEFAULT_PENDING_WARN_SECS, DEFAULT_RPC_URL, DEFAULT_SETTLEMENT_TIMEOUT_SECS,
    DEFAULT_TX_CONFIRMATIONS, SIMULATED_CHAIN_ID, SIMULATED_OWNER_ADDRESS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerMode {
    Rpc,
    Simulated,
}

impl FromStr for LedgerMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "rpc" | "evm" => Ok(LedgerMode::Rpc),
            "simulated" | "memory" | "sim" => Ok(LedgerMode::Simulated),
            other => anyhow::bail!("Unknown LEDGER_MODE '{}'", other),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // Server
    pub host: String,
    pub port: u16,
    pub environment: String,

    // Ledger
    pub ledger_mode: LedgerMode,
    pub rpc_url: String,
    pub chain_id: u64,
    pub game_contract_address: String,
    pub wallet_private_key: Option<String>,
    pub simulated_owner_address: String,

    // Settlement
    pub tx_confirmations: usize,
    pub pending_warn_secs: u64,
    pub settlement_timeout_secs: u64,

    // CORS
    pub cors_allowed_origins: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let ledger_mode: LedgerMode = env::var("LEDGER_MODE")
            .unwrap_or_else(|_| "rpc".to_string())
            .parse()?;

        let game_contract_address = match ledger_mode {
            LedgerMode::Rpc => env::var("GAME_CONTRACT_ADDRESS")?,
            LedgerMode::Simulated => env::var("GAME_CONTRACT_ADDRESS").unwrap_or_default(),
        };

        let default_chain_id = match ledger_mode {
            LedgerMode::Rpc => DEFAULT_CHAIN_ID,
            LedgerMode::Simulated => SIMULATED_CHAIN_ID,
        };

        Ok(Config {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),

            ledger_mode,
            rpc_url: env::var("RPC_URL").unwrap_or_else(|_| DEFAULT_RPC_URL.to_string()),
            chain_id: env::var("CHAIN_ID")
                .unwrap_or_else(|_| default_chain_id.to_string())
                .parse()?,
            game_contract_address,
            wallet_private_key: env::var("WALLET_PRIVATE_KEY").ok(),
            simulated_owner_address: env::var("SIMULATED_OWNER_ADDRESS")
                .unwrap_or_else(|_| SIMULATED_OWNER_ADDRESS.to_string()),

            tx_confirmations: env::var("TX_CONFIRMATIONS")
                .unwrap_or_else(|_| DEFAULT_TX_CONFIRMATIONS.to_string())
                .parse()?,
            pending_warn_secs: env::var("PENDING_WARN_SECS")
                .unwrap_or_else(|_| DEFAULT_PENDING_WARN_SECS.to_string())
                .parse()?,
            settlement_timeout_secs: env::var("SETTLEMENT_TIMEOUT_SECS")
                .unwrap_or_else(|_| DEFAULT_SETTLEMENT_TIMEOUT_SECS.to_string())
                .parse()?,

            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "*".to_string()),
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.ledger_mode == LedgerMode::Rpc {
            if self.rpc_url.trim().is_empty() {
                anyhow::bail!("RPC_URL is empty");
            }
            url::Url::parse(&self.rpc_url)
                .map_err(|e| anyhow::anyhow!("RPC_URL is not a valid URL: {}", e))?;
            if self.game_contract_address.trim().is_empty() {
                anyhow::bail!("GAME_CONTRACT_ADDRESS is empty");
            }
            if self
                .wallet_private_key
                .as_deref()
                .map(|key| key.trim().is_empty())
                .unwrap_or(true)
            {
                anyhow::bail!("WALLET_PRIVATE_KEY is required in rpc mode");
            }
            if self.game_contract_address.starts_with("0x0000") {
                tracing::warn!("Using placeholder game contract address");
            }
        }

        if self.settlement_timeout_secs == 0 {
            anyhow::bail!("SETTLEMENT_TIMEOUT_SECS must be > 0");
        }
        if self.pending_warn_secs >= self.settlement_timeout_secs {
            tracing::warn!(
                "PENDING_WARN_SECS ({}) >= SETTLEMENT_TIMEOUT_SECS ({}); the pending warning fires at the timeout",
                self.pending_warn_secs,
                self.settlement_timeout_secs
            );
        }
        if self.tx_confirmations == 0 {
            tracing::warn!("TX_CONFIRMATIONS is 0; waiting for 1 confirmation instead");
        }

        if self.cors_allowed_origins.trim().is_empty() {
            tracing::warn!("CORS_ALLOWED_ORIGINS is empty; requests may be blocked");
        }

        Ok(())
    }

    pub fn is_simulated(&self) -> bool {
        self.ledger_mode == LedgerMode::Simulated
    }
}
