use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::{
    error::{AppError, Result},
    models::{
        JoinOutcome, MembershipState, TxOutcome, World, WorldDraft, WorldEntry, WorldId,
    },
    services::{
        contract_client::ContractClient,
        event_bus::{EventBus, GameEvent},
        session::SessionManager,
    },
};

struct CatalogSnapshot {
    worlds: Vec<World>,
    epoch: u64,
    fetched_at: DateTime<Utc>,
}

/// `Enterable` for the player's current world, `Joinable` for the rest.
pub fn resolve_membership(worlds: &[World], current_world: Option<WorldId>) -> Vec<WorldEntry> {
    worlds
        .iter()
        .map(|world| WorldEntry {
            world: world.clone(),
            state: if Some(world.id) == current_world {
                MembershipState::Enterable
            } else {
                MembershipState::Joinable
            },
        })
        .collect()
}

/// Cached world list plus the join/create flow.
///
/// The cache is only replaced with ledger data: never patched optimistically.
/// It goes stale whenever the client settles a createWorld or joinWorld.
pub struct WorldCatalog {
    client: Arc<ContractClient>,
    session: Arc<SessionManager>,
    events: EventBus,
    cache: RwLock<Option<CatalogSnapshot>>,
}

impl WorldCatalog {
    pub fn new(client: Arc<ContractClient>, session: Arc<SessionManager>, events: EventBus) -> Self {
        Self {
            client,
            session,
            events,
            cache: RwLock::new(None),
        }
    }

    pub async fn worlds(&self) -> Result<Vec<World>> {
        {
            let cache = self.cache.read().await;
            if let Some(snapshot) = cache.as_ref() {
                if snapshot.epoch == self.client.catalog_epoch() {
                    return Ok(snapshot.worlds.clone());
                }
            }
        }
        self.refresh().await
    }

    pub async fn refresh(&self) -> Result<Vec<World>> {
        let epoch = self.client.catalog_epoch();
        let worlds = self.client.list_worlds().await?;

        *self.cache.write().await = Some(CatalogSnapshot {
            worlds: worlds.clone(),
            epoch,
            fetched_at: Utc::now(),
        });

        tracing::debug!("World catalog refreshed: {} worlds", worlds.len());
        self.events.publish(GameEvent::CatalogRefreshed {
            worlds: worlds.len(),
        });
        Ok(worlds)
    }

    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    pub async fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.cache
            .read()
            .await
            .as_ref()
            .map(|snapshot| snapshot.fetched_at)
    }

    pub async fn entries(&self) -> Result<Vec<WorldEntry>> {
        let worlds = self.worlds().await?;
        let current_world = self.session.current_world().await;
        Ok(resolve_membership(&worlds, current_world))
    }

    pub async fn world(&self, world_id: WorldId) -> Result<World> {
        self.worlds()
            .await?
            .into_iter()
            .find(|world| world.id == world_id)
            .ok_or(AppError::WorldNotFound)
    }

    /// Enter the current world locally, or pay its fee and join it.
    pub async fn join_or_enter(&self, world_id: WorldId) -> Result<JoinOutcome> {
        let world = self.world(world_id).await?;
        if !world.is_active {
            return Err(AppError::WorldNotFound);
        }

        if self.session.current_world().await == Some(world_id) {
            tracing::debug!("Entering world {} without a ledger write", world_id);
            return Ok(JoinOutcome::Entered { world_id });
        }

        let settlement = self.session.join_world(world_id, world.fee).await?;
        self.invalidate().await;
        Ok(JoinOutcome::Joined {
            world_id,
            settlement,
        })
    }

    pub async fn submit_create_world(&self, draft: WorldDraft) -> Result<TxOutcome> {
        draft.validate()?;
        let from = self.session.address().await.ok_or(AppError::NoWallet)?;
        let x = u64::try_from(draft.x)
            .map_err(|_| AppError::InvalidParameters("Invalid world width".into()))?;
        let y = u64::try_from(draft.y)
            .map_err(|_| AppError::InvalidParameters("Invalid world height".into()))?;

        let outcome = self
            .client
            .create_world(from, &draft.name, x, y, draft.fee)
            .await?;

        self.invalidate().await;
        if let Err(err) = self.refresh().await {
            tracing::warn!("Catalog refetch after createWorld failed: {}", err);
        }
        Ok(outcome)
    }
}
