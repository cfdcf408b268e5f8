// All service modules
pub mod contract_client;
pub mod event_bus;
pub mod session;
pub mod transaction_tracker;
pub mod world_catalog;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export for convenience
pub use contract_client::{ContractClient, SettlementPolicy};
pub use event_bus::{EventBus, GameEvent};
pub use session::SessionManager;
pub use transaction_tracker::TransactionTracker;
pub use world_catalog::WorldCatalog;

use crate::{config::Config, ledger::GameLedger};
use std::sync::Arc;

/// Owned session context: one per connected front end, shared by handlers.
pub struct GameContext {
    pub client: Arc<ContractClient>,
    pub session: Arc<SessionManager>,
    pub catalog: Arc<WorldCatalog>,
    pub events: EventBus,
}

impl GameContext {
    pub fn new(ledger: Arc<dyn GameLedger>, config: &Config) -> Self {
        let events = EventBus::new();
        let client = Arc::new(ContractClient::new(
            ledger,
            TransactionTracker::new(),
            events.clone(),
            SettlementPolicy::from_config(config),
        ));
        let session = Arc::new(SessionManager::new(client.clone(), events.clone()));
        let catalog = Arc::new(WorldCatalog::new(
            client.clone(),
            session.clone(),
            events.clone(),
        ));

        tracing::info!(
            "Game context ready (warn after {}s, give up after {}s)",
            config.pending_warn_secs,
            config.settlement_timeout_secs
        );

        Self {
            client,
            session,
            catalog,
            events,
        }
    }

    pub fn tracker(&self) -> &TransactionTracker {
        self.client.tracker()
    }
}
