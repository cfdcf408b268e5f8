use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::Instant;

use super::GameLedger;
use crate::{
    error::{AppError, Result},
    models::{CityLocation, LedgerCall, PlayerRecord, Settlement, World, WorldId},
};

/// In-process stand-in for the game contract.
///
/// Enforces the contract's externally visible rules: owner-only world creation,
/// one registration per address, fee checks and single membership. Writes are
/// checked when submitted (like gas estimation would) and checked again when
/// they are mined, so two racing joins cannot both land.
///
/// Mining runs on its own task in submission order. A write lands after the
/// settlement delay whether or not anyone is still awaiting it.
pub struct SimulatedLedger {
    state: Arc<RwLock<ChainState>>,
    settlement_delay: Duration,
    submissions: AtomicUsize,
    blocks: Arc<watch::Sender<u64>>,
    miner: OnceLock<mpsc::UnboundedSender<QueuedWrite>>,
}

#[derive(Default)]
struct ChainState {
    owner: Address,
    worlds: Vec<World>,
    players: HashMap<Address, PlayerRecord>,
    cities: HashMap<(WorldId, Address), CityLocation>,
    current_world: HashMap<Address, WorldId>,
    pending: HashMap<H256, PendingWrite>,
    // Revert reason on failure.
    receipts: HashMap<H256, std::result::Result<Settlement, String>>,
    refusing: HashSet<Address>,
    nonce: u64,
    block: u64,
}

struct PendingWrite {
    from: Address,
    call: LedgerCall,
}

struct QueuedWrite {
    tx_hash: H256,
    ready_at: Instant,
}

impl SimulatedLedger {
    pub fn new(owner: Address) -> Self {
        let (blocks, _) = watch::channel(0);
        Self {
            state: Arc::new(RwLock::new(ChainState {
                owner,
                ..ChainState::default()
            })),
            settlement_delay: Duration::ZERO,
            submissions: AtomicUsize::new(0),
            blocks: Arc::new(blocks),
            miner: OnceLock::new(),
        }
    }

    /// Every write waits this long before it is mined.
    pub fn with_settlement_delay(mut self, delay: Duration) -> Self {
        self.settlement_delay = delay;
        self
    }

    /// Simulates a wallet that declines to sign for `address`.
    #[cfg(test)]
    pub async fn refuse_signatures_from(&self, address: Address) {
        self.state.write().await.refusing.insert(address);
    }

    /// Number of writes that reached the ledger, accepted or not.
    pub fn submitted_calls(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    // Started on first submit so construction needs no runtime.
    fn miner(&self) -> &mpsc::UnboundedSender<QueuedWrite> {
        self.miner.get_or_init(|| {
            let (sender, queue) = mpsc::unbounded_channel();
            tokio::spawn(mine(self.state.clone(), self.blocks.clone(), queue));
            sender
        })
    }
}

async fn mine(
    state: Arc<RwLock<ChainState>>,
    blocks: Arc<watch::Sender<u64>>,
    mut queue: mpsc::UnboundedReceiver<QueuedWrite>,
) {
    while let Some(write) = queue.recv().await {
        tokio::time::sleep_until(write.ready_at).await;
        let block = state.write().await.mine(write.tx_hash);
        blocks.send_replace(block);
    }
    tracing::debug!("Simulated miner stopped");
}

#[async_trait::async_trait]
impl GameLedger for SimulatedLedger {
    async fn owner(&self) -> Result<Address> {
        Ok(self.state.read().await.owner)
    }

    async fn all_worlds(&self) -> Result<Vec<World>> {
        Ok(self.state.read().await.worlds.clone())
    }

    async fn world(&self, world_id: WorldId) -> Result<World> {
        self.state
            .read()
            .await
            .worlds
            .get(world_id as usize)
            .cloned()
            .ok_or(AppError::WorldNotFound)
    }

    async fn player(&self, address: Address) -> Result<PlayerRecord> {
        Ok(self
            .state
            .read()
            .await
            .players
            .get(&address)
            .cloned()
            .unwrap_or_default())
    }

    async fn player_location(
        &self,
        world_id: WorldId,
        address: Address,
    ) -> Result<Option<CityLocation>> {
        Ok(self
            .state
            .read()
            .await
            .cities
            .get(&(world_id, address))
            .copied())
    }

    async fn submit(&self, from: Address, call: LedgerCall) -> Result<H256> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.write().await;

        if state.refusing.contains(&from) {
            return Err(AppError::SubmissionRejected(
                "User rejected the request.".to_string(),
            ));
        }
        state.check(from, &call).map_err(AppError::from_revert_reason)?;

        state.nonce += 1;
        let mut seed = state.nonce.to_be_bytes().to_vec();
        seed.extend_from_slice(from.as_bytes());
        let tx_hash = H256::from(keccak256(seed));

        tracing::debug!("Simulated {} from {:?} pending as {:?}", call.kind(), from, tx_hash);
        state.pending.insert(tx_hash, PendingWrite { from, call });

        let queued = QueuedWrite {
            tx_hash,
            ready_at: Instant::now() + self.settlement_delay,
        };
        if self.miner().send(queued).is_err() {
            state.pending.remove(&tx_hash);
            return Err(AppError::BlockchainRPC("Simulated miner stopped".into()));
        }
        Ok(tx_hash)
    }

    async fn await_settlement(&self, tx_hash: H256) -> Result<Settlement> {
        // Subscribe before looking so a block mined in between still wakes us.
        let mut blocks = self.blocks.subscribe();
        loop {
            {
                let state = self.state.read().await;
                if let Some(receipt) = state.receipts.get(&tx_hash) {
                    return receipt
                        .clone()
                        .map_err(|reason| AppError::from_revert_reason(&reason));
                }
                if !state.pending.contains_key(&tx_hash) {
                    return Err(AppError::BlockchainRPC(format!(
                        "Unknown transaction {:?}",
                        tx_hash
                    )));
                }
            }
            if blocks.changed().await.is_err() {
                return Err(AppError::BlockchainRPC("Simulated miner stopped".into()));
            }
        }
    }
}

impl ChainState {
    /// Re-checks and applies one pending write, recording its receipt.
    fn mine(&mut self, tx_hash: H256) -> u64 {
        let Some(write) = self.pending.remove(&tx_hash) else {
            return self.block;
        };
        self.block += 1;
        let receipt = match self.check(write.from, &write.call) {
            Ok(()) => {
                self.apply(write.from, write.call);
                Ok(Settlement {
                    tx_hash,
                    block_number: Some(self.block),
                })
            }
            Err(reason) => Err(reason.to_string()),
        };
        self.receipts.insert(tx_hash, receipt);
        self.block
    }

    fn active_world(&self, world_id: WorldId) -> std::result::Result<&World, &'static str> {
        self.worlds
            .get(world_id as usize)
            .filter(|world| world.is_active)
            .ok_or("World does not exist.")
    }

    fn check(&self, from: Address, call: &LedgerCall) -> std::result::Result<(), &'static str> {
        match call {
            LedgerCall::CreateWorld { name, x, y, fee } => {
                if from != self.owner {
                    return Err("Only owner can call this.");
                }
                if name.trim().is_empty() || x.is_zero() || y.is_zero() || fee.is_zero() {
                    return Err("Invalid world parameters.");
                }
            }
            LedgerCall::RegisterUser { username } => {
                if username.trim().is_empty() {
                    return Err("Username cannot be empty.");
                }
                if self
                    .players
                    .get(&from)
                    .map(|player| player.is_registered)
                    .unwrap_or(false)
                {
                    return Err("User already registered.");
                }
            }
            LedgerCall::JoinWorld {
                world_id, value, ..
            } => {
                let world = self.active_world(*world_id)?;
                if *value < world.fee {
                    return Err("Insufficient fee.");
                }
                if self.cities.contains_key(&(*world_id, from)) {
                    return Err("Already joined this world.");
                }
                if self.current_world.contains_key(&from) {
                    return Err("Already joined another world.");
                }
            }
            LedgerCall::AttackCity {
                world_id,
                defender,
                troops,
            } => {
                self.active_world(*world_id)?;
                if !self.cities.contains_key(&(*world_id, from))
                    || !self.cities.contains_key(&(*world_id, *defender))
                {
                    return Err("City does not exist.");
                }
                if from == *defender {
                    return Err("Cannot attack your own city.");
                }
                if troops.is_zero() {
                    return Err("Invalid troops.");
                }
            }
            LedgerCall::ScoutCity {
                world_id,
                city_owner,
                ..
            } => {
                self.active_world(*world_id)?;
                if !self.cities.contains_key(&(*world_id, *city_owner)) {
                    return Err("City does not exist.");
                }
            }
        }
        Ok(())
    }

    fn apply(&mut self, from: Address, call: LedgerCall) {
        match call {
            LedgerCall::CreateWorld { name, x, y, fee } => {
                let id = self.worlds.len() as WorldId;
                self.worlds.push(World {
                    id,
                    name,
                    x: x.min(U256::from(u64::MAX)).as_u64(),
                    y: y.min(U256::from(u64::MAX)).as_u64(),
                    fee,
                    owner: from,
                    player_count: 0,
                    is_active: true,
                });
            }
            LedgerCall::RegisterUser { username } => {
                self.players.insert(
                    from,
                    PlayerRecord {
                        username,
                        is_registered: true,
                    },
                );
            }
            LedgerCall::JoinWorld {
                world_id, username, ..
            } => {
                let Some(world) = self.worlds.get_mut(world_id as usize) else {
                    return;
                };
                let slot = world.player_count;
                let location = CityLocation {
                    x: slot % world.x.max(1),
                    y: (slot / world.x.max(1)) % world.y.max(1),
                };
                world.player_count += 1;
                self.cities.insert((world_id, from), location);
                self.current_world.insert(from, world_id);
                self.players.entry(from).or_insert(PlayerRecord {
                    username,
                    is_registered: false,
                });
            }
            // Combat resolution lives in the contract; nothing to mirror here.
            LedgerCall::AttackCity { .. } | LedgerCall::ScoutCity { .. } => {}
        }
    }
}
