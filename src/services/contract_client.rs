use ethers::types::{Address, H256, U256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::{
    config::Config,
    constants::MIN_USERNAME_LEN,
    error::{AppError, Result},
    ledger::GameLedger,
    models::{
        CityLocation, LedgerCall, Player, Settlement, TxKind, TxOutcome, Wei, World, WorldId,
    },
    services::{
        event_bus::{EventBus, GameEvent},
        transaction_tracker::TransactionTracker,
    },
};

/// How long to wait on a submitted write before warning, then giving up.
#[derive(Debug, Clone, Copy)]
pub struct SettlementPolicy {
    pub pending_warn_after: Duration,
    pub settlement_timeout: Duration,
}

impl SettlementPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            pending_warn_after: Duration::from_secs(config.pending_warn_secs),
            settlement_timeout: Duration::from_secs(config.settlement_timeout_secs),
        }
    }
}

/// Local username rule, checked before anything is submitted.
pub fn validate_username(username: &str) -> Result<()> {
    let trimmed = username.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidUsername("Username cannot be empty".into()));
    }
    if trimmed.chars().count() < MIN_USERNAME_LEN {
        return Err(AppError::InvalidUsername(format!(
            "Username must be at least {} characters long",
            MIN_USERNAME_LEN
        )));
    }
    Ok(())
}

/// Typed adapter over the game contract.
///
/// Reads are passed through and normalized. Writes go through `execute`, which
/// records a pending/settled/failed lifecycle and only reports success once the
/// ledger has confirmed the transaction.
pub struct ContractClient {
    ledger: Arc<dyn GameLedger>,
    tracker: TransactionTracker,
    events: EventBus,
    policy: SettlementPolicy,
    catalog_epoch: Arc<AtomicU64>,
}

impl ContractClient {
    pub fn new(
        ledger: Arc<dyn GameLedger>,
        tracker: TransactionTracker,
        events: EventBus,
        policy: SettlementPolicy,
    ) -> Self {
        Self {
            ledger,
            tracker,
            events,
            policy,
            catalog_epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn tracker(&self) -> &TransactionTracker {
        &self.tracker
    }

    /// Bumped after every settled createWorld / joinWorld.
    pub fn catalog_epoch(&self) -> u64 {
        self.catalog_epoch.load(Ordering::SeqCst)
    }

    // ==================== READS ====================

    pub async fn get_owner(&self) -> Result<Address> {
        self.ledger.owner().await
    }

    pub async fn list_worlds(&self) -> Result<Vec<World>> {
        let worlds = self.ledger.all_worlds().await?;
        tracing::debug!("Fetched {} worlds", worlds.len());
        Ok(worlds)
    }

    pub async fn get_world(&self, world_id: WorldId) -> Result<World> {
        self.ledger.world(world_id).await
    }

    pub async fn get_player_location(
        &self,
        world_id: WorldId,
        address: Address,
    ) -> Result<Option<CityLocation>> {
        self.ledger.player_location(world_id, address).await
    }

    /// `None` when the address has never touched the contract.
    pub async fn get_player(&self, address: Address) -> Result<Option<Player>> {
        let record = self.ledger.player(address).await?;
        if !record.is_registered && record.username.is_empty() {
            return Ok(None);
        }
        let current_world = self.get_player_world(address).await?;
        Ok(Some(Player {
            address,
            username: record.username,
            is_registered: record.is_registered,
            current_world,
        }))
    }

    /// First world (by id) in which the address owns a city.
    pub async fn get_player_world(&self, address: Address) -> Result<Option<WorldId>> {
        let worlds = self.ledger.all_worlds().await?;
        for world in worlds {
            if self
                .ledger
                .player_location(world.id, address)
                .await?
                .is_some()
            {
                return Ok(Some(world.id));
            }
        }
        Ok(None)
    }

    // ==================== WRITES ====================

    pub async fn create_world(
        &self,
        from: Address,
        name: &str,
        x: u64,
        y: u64,
        fee: Wei,
    ) -> Result<TxOutcome> {
        if x == 0 || y == 0 {
            return Err(AppError::InvalidParameters(
                "World dimensions must be positive".into(),
            ));
        }
        if fee.is_zero() {
            return Err(AppError::InvalidParameters("World fee must be positive".into()));
        }
        tracing::info!("Creating world '{}' ({}x{}) with fee {} wei", name, x, y, fee);
        self.execute(
            from,
            LedgerCall::CreateWorld {
                name: name.trim().to_string(),
                x: U256::from(x),
                y: U256::from(y),
                fee,
            },
        )
        .await
    }

    pub async fn register_user(&self, from: Address, username: &str) -> Result<TxOutcome> {
        validate_username(username)?;
        self.execute(
            from,
            LedgerCall::RegisterUser {
                username: username.trim().to_string(),
            },
        )
        .await
    }

    pub async fn join_world(
        &self,
        from: Address,
        world_id: WorldId,
        username: &str,
        paid_fee: Wei,
    ) -> Result<TxOutcome> {
        self.execute(
            from,
            LedgerCall::JoinWorld {
                world_id,
                username: username.to_string(),
                value: paid_fee,
            },
        )
        .await
    }

    pub async fn attack_city(
        &self,
        from: Address,
        world_id: WorldId,
        defender: Address,
        troops: u64,
    ) -> Result<TxOutcome> {
        if troops == 0 {
            return Err(AppError::InvalidParameters("Troops must be positive".into()));
        }
        self.execute(
            from,
            LedgerCall::AttackCity {
                world_id,
                defender,
                troops: U256::from(troops),
            },
        )
        .await
    }

    pub async fn scout_city(
        &self,
        from: Address,
        world_id: WorldId,
        city_owner: Address,
        fee: Wei,
    ) -> Result<TxOutcome> {
        self.execute(
            from,
            LedgerCall::ScoutCity {
                world_id,
                city_owner,
                value: fee,
            },
        )
        .await
    }

    async fn execute(&self, from: Address, call: LedgerCall) -> Result<TxOutcome> {
        let kind = call.kind();
        let record_id = self.tracker.begin(kind, from).await;
        let recorder = self.recorder();

        let tx_hash = match self.ledger.submit(from, call).await {
            Ok(tx_hash) => tx_hash,
            Err(err) => {
                recorder.failed(record_id, kind, &err).await;
                return Err(err);
            }
        };

        self.tracker.mark_submitted(record_id, tx_hash).await;
        self.events.publish(GameEvent::TxPending {
            record_id,
            kind,
            tx_hash,
        });
        tracing::info!("{} submitted as {:?}", kind, tx_hash);

        match self.settle(record_id, kind, tx_hash).await {
            Ok(settlement) => Ok(recorder.settled(record_id, kind, tx_hash, settlement).await),
            Err(err @ AppError::PendingTooLong { .. }) => {
                self.tracker.mark_stalled(record_id, &err).await;
                tracing::warn!("{} not settled in time: {}", kind, err);
                self.follow_up(record_id, kind, tx_hash);
                Err(err)
            }
            Err(err) => {
                recorder.failed(record_id, kind, &err).await;
                Err(err)
            }
        }
    }

    // Waits for the ledger; warns once, then gives up without resubmitting.
    async fn settle(&self, record_id: u64, kind: TxKind, tx_hash: H256) -> Result<Settlement> {
        let warn_after = self
            .policy
            .pending_warn_after
            .min(self.policy.settlement_timeout);
        let mut settlement = self.ledger.await_settlement(tx_hash);

        if let Ok(result) = timeout(warn_after, &mut settlement).await {
            return result;
        }

        tracing::warn!(
            "{} {:?} still pending after {}s",
            kind,
            tx_hash,
            warn_after.as_secs()
        );
        self.events.publish(GameEvent::PendingTooLong {
            record_id,
            kind,
            tx_hash,
            waited_secs: warn_after.as_secs(),
        });

        let remaining = self.policy.settlement_timeout.saturating_sub(warn_after);
        match timeout(remaining, &mut settlement).await {
            Ok(result) => result,
            Err(_) => Err(AppError::PendingTooLong {
                tx_hash: format!("{:?}", tx_hash),
                waited_secs: self.policy.settlement_timeout.as_secs(),
            }),
        }
    }

    /// The caller stopped waiting, the chain did not: keep watching in the
    /// background so the record and the catalog catch up when it resolves.
    fn follow_up(&self, record_id: u64, kind: TxKind, tx_hash: H256) {
        let ledger = self.ledger.clone();
        let recorder = self.recorder();
        tokio::spawn(async move {
            match ledger.await_settlement(tx_hash).await {
                Ok(settlement) => {
                    recorder.settled(record_id, kind, tx_hash, settlement).await;
                }
                Err(err) => recorder.failed(record_id, kind, &err).await,
            }
        });
    }

    fn recorder(&self) -> SettlementRecorder {
        SettlementRecorder {
            tracker: self.tracker.clone(),
            events: self.events.clone(),
            catalog_epoch: self.catalog_epoch.clone(),
        }
    }
}

/// Final bookkeeping for a write, shared by the waiting caller and the
/// background follow-up.
#[derive(Clone)]
struct SettlementRecorder {
    tracker: TransactionTracker,
    events: EventBus,
    catalog_epoch: Arc<AtomicU64>,
}

impl SettlementRecorder {
    async fn settled(
        &self,
        record_id: u64,
        kind: TxKind,
        tx_hash: H256,
        settlement: Settlement,
    ) -> TxOutcome {
        self.tracker
            .mark_settled(record_id, settlement.block_number)
            .await;
        if matches!(kind, TxKind::CreateWorld | TxKind::JoinWorld) {
            self.catalog_epoch.fetch_add(1, Ordering::SeqCst);
        }
        self.events.publish(GameEvent::TxSettled {
            record_id,
            kind,
            tx_hash,
            block_number: settlement.block_number,
        });
        tracing::info!("{} settled in block {:?}", kind, settlement.block_number);
        TxOutcome {
            record_id,
            kind,
            tx_hash,
            block_number: settlement.block_number,
        }
    }

    async fn failed(&self, record_id: u64, kind: TxKind, err: &AppError) {
        self.tracker.mark_failed(record_id, err).await;
        self.events.publish(GameEvent::TxFailed {
            record_id,
            kind,
            code: err.code().to_string(),
            message: err.to_string(),
        });
        tracing::warn!("{} failed: {}", kind, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::SimulatedLedger;
    use crate::models::TxStatus;
    use crate::services::test_support::{addr, client_with_policy, ether, fast_policy, OWNER};

    #[test]
    fn username_rules() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("abcd").is_ok());
        assert!(matches!(validate_username("ab"), Err(AppError::InvalidUsername(_))));
        assert!(matches!(validate_username("   "), Err(AppError::InvalidUsername(_))));
        assert!(matches!(validate_username(" abc "), Err(AppError::InvalidUsername(_))));
    }

    #[tokio::test]
    async fn short_username_is_rejected_before_submission() {
        let ledger = Arc::new(SimulatedLedger::new(OWNER));
        let client = client_with_policy(ledger.clone(), fast_policy());

        let result = client.register_user(addr(1), "abc").await;
        assert!(matches!(result, Err(AppError::InvalidUsername(_))));
        assert_eq!(ledger.submitted_calls(), 0);
        assert!(client.tracker().list().await.is_empty());
    }

    #[tokio::test]
    async fn zero_dimensions_are_rejected_locally() {
        let ledger = Arc::new(SimulatedLedger::new(OWNER));
        let client = client_with_policy(ledger.clone(), fast_policy());

        let result = client.create_world(OWNER, "Richmond", 0, 10, ether("0.1")).await;
        assert!(matches!(result, Err(AppError::InvalidParameters(_))));
        let result = client.create_world(OWNER, "Richmond", 10, 10, Wei::zero()).await;
        assert!(matches!(result, Err(AppError::InvalidParameters(_))));
        assert_eq!(ledger.submitted_calls(), 0);
    }

    #[tokio::test]
    async fn non_owner_create_is_unauthorized_and_recorded() {
        let ledger = Arc::new(SimulatedLedger::new(OWNER));
        let client = client_with_policy(ledger, fast_policy());

        let result = client
            .create_world(addr(5), "Richmond", 10, 10, ether("0.1"))
            .await;
        assert!(matches!(result, Err(AppError::Unauthorized)));

        let records = client.tracker().list().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, TxStatus::Failed);
        assert_eq!(records[0].error_code.as_deref(), Some("UNAUTHORIZED"));
        assert_eq!(client.catalog_epoch(), 0);
    }

    #[tokio::test]
    async fn owner_create_settles_and_bumps_epoch() {
        let ledger = Arc::new(SimulatedLedger::new(OWNER));
        let client = client_with_policy(ledger, fast_policy());

        let outcome = client
            .create_world(OWNER, "Richmond", 10, 10, ether("0.1"))
            .await
            .expect("create");
        assert_eq!(outcome.kind, TxKind::CreateWorld);
        assert_eq!(client.catalog_epoch(), 1);

        let worlds = client.list_worlds().await.unwrap();
        assert_eq!(worlds.len(), 1);
        assert_eq!(worlds[0].player_count, 0);
        assert!(worlds[0].is_active);
        assert_eq!(worlds[0].fee, ether("0.1"));
        assert_eq!(client.get_owner().await.unwrap(), OWNER);
    }

    #[tokio::test]
    async fn list_worlds_is_idempotent() {
        let ledger = Arc::new(SimulatedLedger::new(OWNER));
        let client = client_with_policy(ledger, fast_policy());
        client.create_world(OWNER, "A", 5, 5, ether("0.1")).await.unwrap();
        client.create_world(OWNER, "B", 6, 6, ether("0.2")).await.unwrap();

        let first = client.list_worlds().await.unwrap();
        let second = client.list_worlds().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn player_lookup_reports_membership() {
        let ledger = Arc::new(SimulatedLedger::new(OWNER));
        let client = client_with_policy(ledger, fast_policy());
        client.create_world(OWNER, "A", 5, 5, ether("0.1")).await.unwrap();
        client.create_world(OWNER, "B", 5, 5, ether("0.1")).await.unwrap();

        assert!(client.get_player(addr(1)).await.unwrap().is_none());

        client.register_user(addr(1), "alice").await.unwrap();
        client.join_world(addr(1), 1, "alice", ether("0.1")).await.unwrap();

        let player = client.get_player(addr(1)).await.unwrap().expect("player");
        assert!(player.is_registered);
        assert_eq!(player.username, "alice");
        assert_eq!(player.current_world, Some(1));
        assert_eq!(client.get_player_world(addr(2)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn slow_settlement_warns_then_times_out_without_resubmitting() {
        let ledger = Arc::new(
            SimulatedLedger::new(OWNER).with_settlement_delay(Duration::from_millis(500)),
        );
        let policy = SettlementPolicy {
            pending_warn_after: Duration::from_millis(20),
            settlement_timeout: Duration::from_millis(80),
        };
        let client = client_with_policy(ledger.clone(), policy);
        let mut events = client.events.subscribe();

        let result = client.create_world(OWNER, "Slow", 5, 5, ether("0.1")).await;
        assert!(matches!(result, Err(AppError::PendingTooLong { .. })));
        assert_eq!(ledger.submitted_calls(), 1);

        let records = client.tracker().list().await;
        assert_eq!(records[0].status, TxStatus::Pending);
        assert_eq!(client.catalog_epoch(), 0);

        let mut saw_warning = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, GameEvent::PendingTooLong { .. }) {
                saw_warning = true;
            }
        }
        assert!(saw_warning);
    }

    #[tokio::test]
    async fn timed_out_write_is_recorded_once_it_lands() {
        let ledger = Arc::new(
            SimulatedLedger::new(OWNER).with_settlement_delay(Duration::from_millis(200)),
        );
        let policy = SettlementPolicy {
            pending_warn_after: Duration::from_millis(20),
            settlement_timeout: Duration::from_millis(50),
        };
        let client = client_with_policy(ledger.clone(), policy);
        let mut events = client.events.subscribe();

        let result = client.create_world(OWNER, "Slow", 5, 5, ether("0.1")).await;
        assert!(matches!(result, Err(AppError::PendingTooLong { .. })));

        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(client.list_worlds().await.unwrap().len(), 1);
        let records = client.tracker().list().await;
        assert_eq!(records[0].status, TxStatus::Settled);
        assert!(records[0].block_number.is_some());
        assert_eq!(client.catalog_epoch(), 1);
        assert_eq!(ledger.submitted_calls(), 1);

        let mut settled = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, GameEvent::TxSettled { .. }) {
                settled = true;
            }
        }
        assert!(settled);
    }

    #[tokio::test]
    async fn timed_out_write_that_reverts_is_marked_failed() {
        let ledger = Arc::new(
            SimulatedLedger::new(OWNER).with_settlement_delay(Duration::from_millis(150)),
        );
        let policy = SettlementPolicy {
            pending_warn_after: Duration::from_millis(10),
            settlement_timeout: Duration::from_millis(30),
        };
        let client = client_with_policy(ledger.clone(), policy);
        let create = ledger
            .submit(
                OWNER,
                LedgerCall::CreateWorld {
                    name: "Richmond".into(),
                    x: U256::from(5),
                    y: U256::from(5),
                    fee: ether("0.1"),
                },
            )
            .await
            .unwrap();
        ledger.await_settlement(create).await.unwrap();

        // An earlier join from the same address is still in flight, so this one
        // passes submission and only reverts once mined.
        let first = ledger
            .submit(
                addr(1),
                LedgerCall::JoinWorld {
                    world_id: 0,
                    username: "alice".into(),
                    value: ether("0.1"),
                },
            )
            .await
            .unwrap();
        let result = client.join_world(addr(1), 0, "alice", ether("0.1")).await;
        assert!(matches!(result, Err(AppError::PendingTooLong { .. })));
        assert!(ledger.await_settlement(first).await.is_ok());

        tokio::time::sleep(Duration::from_millis(500)).await;

        let records = client.tracker().list().await;
        assert_eq!(records[0].status, TxStatus::Failed);
        assert_eq!(records[0].error_code.as_deref(), Some("DUPLICATE_JOIN"));
        assert_eq!(client.catalog_epoch(), 0);
        assert_eq!(client.get_world(0).await.unwrap().player_count, 1);
    }

    #[tokio::test]
    async fn late_settlement_after_warning_still_succeeds() {
        let ledger = Arc::new(
            SimulatedLedger::new(OWNER).with_settlement_delay(Duration::from_millis(60)),
        );
        let policy = SettlementPolicy {
            pending_warn_after: Duration::from_millis(10),
            settlement_timeout: Duration::from_secs(5),
        };
        let client = client_with_policy(ledger, policy);
        let mut events = client.events.subscribe();

        client
            .create_world(OWNER, "Late", 5, 5, ether("0.1"))
            .await
            .expect("settles after warning");

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(event);
        }
        assert!(kinds.iter().any(|e| matches!(e, GameEvent::PendingTooLong { .. })));
        assert!(kinds.iter().any(|e| matches!(e, GameEvent::TxSettled { .. })));
    }

    #[tokio::test]
    async fn declined_signature_maps_to_submission_rejected() {
        let ledger = Arc::new(SimulatedLedger::new(OWNER));
        ledger.refuse_signatures_from(addr(3)).await;
        let client = client_with_policy(ledger, fast_policy());

        let result = client.register_user(addr(3), "carol").await;
        assert!(matches!(result, Err(AppError::SubmissionRejected(_))));
    }
}
