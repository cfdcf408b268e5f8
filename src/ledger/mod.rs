//! Boundary to the game contract.
//!
//! Everything the gateway knows about worlds, players and memberships comes
//! through a [`GameLedger`]. Writes are two-phase: `submit` hands the call to
//! the chain and returns its hash, `await_settlement` resolves once the chain
//! has confirmed (or rejected) it.

pub mod evm;
pub mod simulated;

use ethers::types::{Address, H256};

use crate::error::Result;
use crate::models::{CityLocation, LedgerCall, PlayerRecord, Settlement, World, WorldId};

pub use evm::EvmLedger;
pub use simulated::SimulatedLedger;

#[async_trait::async_trait]
pub trait GameLedger: Send + Sync {
    /// Privileged owner of the contract.
    async fn owner(&self) -> Result<Address>;

    /// All worlds in creation order; the index is the world id.
    async fn all_worlds(&self) -> Result<Vec<World>>;

    async fn world(&self, world_id: WorldId) -> Result<World>;

    /// Raw `players(address)` entry. Unknown addresses yield a default record.
    async fn player(&self, address: Address) -> Result<PlayerRecord>;

    /// `None` when the address has no city in that world.
    async fn player_location(
        &self,
        world_id: WorldId,
        address: Address,
    ) -> Result<Option<CityLocation>>;

    /// Hands a write to the chain. Pre-flight reverts surface here.
    async fn submit(&self, from: Address, call: LedgerCall) -> Result<H256>;

    /// Resolves once the write is confirmed; a reverted receipt is an error.
    async fn await_settlement(&self, tx_hash: H256) -> Result<Settlement>;
}
