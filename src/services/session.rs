use ethers::types::Address;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};

use crate::{
    error::{AppError, Result},
    models::{
        Player, SessionSnapshot, SessionState, SignUpProgress, SignUpStep, TxOutcome, Wei,
        WorldId,
    },
    services::{
        contract_client::{validate_username, ContractClient},
        event_bus::{EventBus, GameEvent},
    },
};

#[derive(Debug, Default)]
struct SessionInner {
    address: Option<Address>,
    player: Option<Player>,
    sign_up: Option<SignUpProgress>,
}

impl SessionInner {
    fn state(&self) -> SessionState {
        match (&self.address, &self.player) {
            (None, _) => SessionState::AnonymousNoWallet,
            (Some(_), Some(player)) if player.is_registered => {
                SessionState::WalletConnectedRegistered
            }
            (Some(_), _) => SessionState::WalletConnectedUnregistered,
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state(),
            address: self.address,
            username: self
                .player
                .as_ref()
                .filter(|player| !player.username.is_empty())
                .map(|player| player.username.clone()),
            current_world: self.current_world(),
            sign_up: self.sign_up,
        }
    }

    fn current_world(&self) -> Option<WorldId> {
        self.player.as_ref().and_then(|player| player.current_world)
    }

    // Local record after a settled registration, before the next lookup.
    fn player_mut(&mut self, address: Address) -> &mut Player {
        self.player.get_or_insert_with(|| Player {
            address,
            username: String::new(),
            is_registered: false,
            current_world: None,
        })
    }
}

/// The one logical user behind the connected wallet.
///
/// Sign-up and login are serialized through `op_guard`: a second call while one
/// is in flight fails with `SessionBusy` instead of queueing a duplicate write.
pub struct SessionManager {
    client: Arc<ContractClient>,
    events: EventBus,
    inner: RwLock<SessionInner>,
    op_guard: Mutex<()>,
}

impl SessionManager {
    pub fn new(client: Arc<ContractClient>, events: EventBus) -> Self {
        Self {
            client,
            events,
            inner: RwLock::new(SessionInner::default()),
            op_guard: Mutex::new(()),
        }
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.inner.read().await.snapshot()
    }

    pub async fn state(&self) -> SessionState {
        self.inner.read().await.state()
    }

    pub async fn address(&self) -> Option<Address> {
        self.inner.read().await.address
    }

    pub async fn current_world(&self) -> Option<WorldId> {
        self.inner.read().await.current_world()
    }

    /// Wallet connected: look up the player record and settle on a state.
    pub async fn connect(&self, address: Address) -> Result<SessionSnapshot> {
        let _guard = self.begin_operation()?;

        let player = self.client.get_player(address).await?;
        let snapshot = {
            let mut inner = self.inner.write().await;
            *inner = SessionInner {
                address: Some(address),
                player,
                sign_up: None,
            };
            inner.snapshot()
        };

        tracing::info!("Wallet {:?} connected as {:?}", address, snapshot.state);
        self.publish(&snapshot);
        Ok(snapshot)
    }

    /// Teardown. A write already submitted keeps going on the ledger.
    pub async fn disconnect(&self) -> SessionSnapshot {
        let snapshot = {
            let mut inner = self.inner.write().await;
            if let Some(address) = inner.address {
                tracing::info!("Wallet {:?} disconnected", address);
            }
            *inner = SessionInner::default();
            inner.snapshot()
        };
        self.publish(&snapshot);
        snapshot
    }

    pub async fn login(&self) -> Result<SessionSnapshot> {
        let address = self.require_address().await?;
        let _guard = self.begin_operation()?;

        let player = match self.client.get_player(address).await? {
            Some(player) if player.is_registered => player,
            _ => {
                tracing::debug!("Login for {:?}: no registered player", address);
                return Err(AppError::UserNotFound);
            }
        };

        let snapshot = {
            let mut inner = self.inner.write().await;
            if inner.address != Some(address) {
                return Err(AppError::NoWallet);
            }
            inner.player = Some(player);
            inner.snapshot()
        };

        tracing::info!("Player {:?} logged in", address);
        self.publish(&snapshot);
        Ok(snapshot)
    }

    /// Register, then join. The join is only submitted once the registration
    /// has settled; a failed join leaves the session registered but unjoined.
    pub async fn sign_up(
        &self,
        username: &str,
        world_id: WorldId,
        fee: Wei,
    ) -> Result<SessionSnapshot> {
        let address = self.require_address().await?;
        let _guard = self.begin_operation()?;

        validate_username(username).map_err(|err| sign_up_failed(SignUpStep::Validate, err))?;
        let username = username.trim();

        if self.state().await == SessionState::WalletConnectedRegistered {
            return Err(sign_up_failed(
                SignUpStep::Register,
                AppError::DuplicateRegistration,
            ));
        }

        // ====== STEP 1: REGISTER ======
        self.set_progress(address, Some(SignUpProgress::Registering))
            .await;
        if let Err(err) = self.client.register_user(address, username).await {
            self.set_progress(address, None).await;
            tracing::warn!("Sign-up for {:?} failed at register: {}", address, err);
            return Err(sign_up_failed(SignUpStep::Register, err));
        }

        {
            let mut inner = self.inner.write().await;
            if inner.address == Some(address) {
                let player = inner.player_mut(address);
                player.username = username.to_string();
                player.is_registered = true;
                inner.sign_up = Some(SignUpProgress::Joining { world_id });
            }
        }

        // ====== STEP 2: JOIN ======
        if let Err(err) = self
            .client
            .join_world(address, world_id, username, fee)
            .await
        {
            // The join may still have landed (e.g. a slow settlement); ask the ledger.
            // If that read fails too, keep the membership we already knew.
            let current_world = match self.client.get_player_world(address).await {
                Ok(world) => Some(world),
                Err(lookup_err) => {
                    tracing::warn!("Membership re-query for {:?} failed: {}", address, lookup_err);
                    None
                }
            };
            let snapshot = {
                let mut inner = self.inner.write().await;
                if inner.address == Some(address) {
                    if let Some(current_world) = current_world {
                        inner.player_mut(address).current_world = current_world;
                    }
                    inner.sign_up = Some(SignUpProgress::RegisteredNotJoined { world_id });
                }
                inner.snapshot()
            };
            tracing::warn!("Sign-up for {:?} failed at join: {}", address, err);
            self.publish(&snapshot);
            return Err(sign_up_failed(SignUpStep::Join, err));
        }

        let snapshot = {
            let mut inner = self.inner.write().await;
            if inner.address == Some(address) {
                inner.player_mut(address).current_world = Some(world_id);
                inner.sign_up = Some(SignUpProgress::Completed { world_id });
            }
            inner.snapshot()
        };

        tracing::info!("Player {:?} signed up and joined world {}", address, world_id);
        self.publish(&snapshot);
        Ok(snapshot)
    }

    /// Join on behalf of a registered session. Membership is updated only
    /// after the ledger settles the write.
    pub async fn join_world(&self, world_id: WorldId, fee: Wei) -> Result<TxOutcome> {
        let address = self.require_address().await?;
        let _guard = self.begin_operation()?;

        let username = {
            let inner = self.inner.read().await;
            match &inner.player {
                Some(player) if player.is_registered => player.username.clone(),
                _ => return Err(AppError::UserNotFound),
            }
        };

        let outcome = self
            .client
            .join_world(address, world_id, &username, fee)
            .await?;

        let snapshot = {
            let mut inner = self.inner.write().await;
            if inner.address == Some(address) {
                inner.player_mut(address).current_world = Some(world_id);
                if matches!(inner.sign_up, Some(SignUpProgress::RegisteredNotJoined { .. })) {
                    inner.sign_up = Some(SignUpProgress::Completed { world_id });
                }
            }
            inner.snapshot()
        };
        self.publish(&snapshot);
        Ok(outcome)
    }

    async fn require_address(&self) -> Result<Address> {
        self.inner.read().await.address.ok_or(AppError::NoWallet)
    }

    fn begin_operation(&self) -> Result<MutexGuard<'_, ()>> {
        self.op_guard.try_lock().map_err(|_| AppError::SessionBusy)
    }

    async fn set_progress(&self, address: Address, progress: Option<SignUpProgress>) {
        let mut inner = self.inner.write().await;
        if inner.address == Some(address) {
            inner.sign_up = progress;
        }
    }

    fn publish(&self, snapshot: &SessionSnapshot) {
        self.events.publish(GameEvent::SessionChanged {
            state: snapshot.state,
            address: snapshot.address,
            current_world: snapshot.current_world,
        });
    }
}

fn sign_up_failed(step: SignUpStep, source: AppError) -> AppError {
    AppError::SignUpFailed {
        step,
        source: Box::new(source),
    }
}
