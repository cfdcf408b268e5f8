use axum::http::HeaderValue;
use axum::{
    routing::{get, post},
    Router,
};
use ethers::types::Address;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod config;
mod constants;
mod error;
mod ledger;
mod models;
mod services;
mod websocket;

use config::{Config, LedgerMode};
use constants::API_VERSION;
use ledger::{EvmLedger, GameLedger, SimulatedLedger};
use services::GameContext;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "corefight_gateway=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    config.validate()?;

    tracing::info!("Starting Core Fight gateway");
    tracing::info!("Environment: {}", config.environment);
    tracing::info!("API Version: {}", API_VERSION);

    let (ledger, default_wallet) = build_ledger(&config)?;
    let ctx = Arc::new(GameContext::new(ledger, &config));

    // Warm the catalog; a failure here is not fatal.
    match ctx.catalog.refresh().await {
        Ok(worlds) => tracing::info!("Loaded {} worlds", worlds.len()),
        Err(err) => tracing::warn!("Initial catalog load failed: {}", err),
    }

    let app_state = api::AppState {
        ctx,
        config: config.clone(),
        default_wallet,
    };

    let app = build_router(app_state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_ledger(config: &Config) -> anyhow::Result<(Arc<dyn GameLedger>, Option<Address>)> {
    match config.ledger_mode {
        LedgerMode::Rpc => {
            let ledger = EvmLedger::from_config(config)?;
            let signer = ledger.signer_address();
            Ok((Arc::new(ledger), Some(signer)))
        }
        LedgerMode::Simulated => {
            let owner = Address::from_str(config.simulated_owner_address.trim()).map_err(|e| {
                anyhow::anyhow!(
                    "Invalid SIMULATED_OWNER_ADDRESS '{}': {}",
                    config.simulated_owner_address,
                    e
                )
            })?;
            tracing::warn!("Using simulated ledger (owner {:?}); nothing is on-chain", owner);
            Ok((Arc::new(SimulatedLedger::new(owner)), None))
        }
    }
}

fn build_router(state: api::AppState) -> Router {
    // CORS configuration
    let cors = cors_from_config(&state.config);

    Router::new()
        // Health check
        .route("/health", get(api::health::health_check))
        .route("/api/v1/owner", get(api::session::get_owner))
        // Session
        .route("/api/v1/session", get(api::session::get_session))
        .route("/api/v1/session/connect", post(api::session::connect))
        .route("/api/v1/session/disconnect", post(api::session::disconnect))
        .route("/api/v1/auth/signup", post(api::session::sign_up))
        .route("/api/v1/auth/login", post(api::session::login))
        // Worlds
        .route(
            "/api/v1/worlds",
            get(api::worlds::list_worlds).post(api::worlds::create_world),
        )
        .route("/api/v1/worlds/refresh", post(api::worlds::refresh_worlds))
        .route("/api/v1/worlds/{id}", get(api::worlds::get_world))
        .route("/api/v1/worlds/{id}/join", post(api::worlds::join_or_enter))
        .route("/api/v1/worlds/{id}/attack", post(api::combat::attack_city))
        .route("/api/v1/worlds/{id}/scout", post(api::combat::scout_city))
        // Players
        .route("/api/v1/players/{address}", get(api::players::get_player))
        // Transactions
        .route(
            "/api/v1/transactions",
            get(api::transactions::list_transactions),
        )
        .route(
            "/api/v1/transactions/{id}",
            get(api::transactions::get_transaction),
        )
        // WebSocket endpoints
        .route("/ws/events", get(websocket::events::handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_from_config(config: &Config) -> CorsLayer {
    let raw = config.cors_allowed_origins.trim();
    if raw.is_empty() || raw == "*" {
        return CorsLayer::very_permissive();
    }

    let allowed: Vec<HeaderValue> = raw
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<HeaderValue>().ok())
        .collect();

    if allowed.is_empty() {
        tracing::warn!("No valid CORS origins parsed; falling back to permissive");
        return CorsLayer::very_permissive();
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(Any)
        .allow_headers(Any)
}

#[cfg(test)]
mod tests {
    use super::*;
    use constants::SIMULATED_OWNER_ADDRESS;

    fn simulated_config() -> Config {
        Config {
            host: "127.0.0.1".into(),
            port: 3000,
            environment: "test".into(),
            ledger_mode: LedgerMode::Simulated,
            rpc_url: String::new(),
            chain_id: 31337,
            game_contract_address: String::new(),
            wallet_private_key: None,
            simulated_owner_address: SIMULATED_OWNER_ADDRESS.into(),
            tx_confirmations: 1,
            pending_warn_secs: 5,
            settlement_timeout_secs: 30,
            cors_allowed_origins: "http://localhost:5173".into(),
        }
    }

    #[tokio::test]
    async fn simulated_ledger_uses_configured_owner() {
        let (ledger, default_wallet) = build_ledger(&simulated_config()).expect("ledger");
        assert!(default_wallet.is_none());
        let owner = ledger.owner().await.unwrap();
        assert_eq!(owner, Address::from_str(SIMULATED_OWNER_ADDRESS).unwrap());
    }

    #[test]
    fn bad_simulated_owner_is_rejected() {
        let mut config = simulated_config();
        config.simulated_owner_address = "owner".into();
        assert!(build_ledger(&config).is_err());
    }

    #[tokio::test]
    async fn router_builds_with_simulated_context() {
        let config = simulated_config();
        let (ledger, default_wallet) = build_ledger(&config).expect("ledger");
        let state = api::AppState {
            ctx: Arc::new(GameContext::new(ledger, &config)),
            config,
            default_wallet,
        };
        let _router = build_router(state);
    }
}
