use ethers::{
    contract::{abigen, ContractCall, ContractError},
    middleware::SignerMiddleware,
    providers::{Http, Middleware, PendingTransaction, Provider},
    signers::{LocalWallet, Signer},
    types::{Address, BlockNumber, H256, U256, U64},
};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::GameLedger;
use crate::{
    config::Config,
    error::{AppError, Result},
    models::{u256_to_u64, CityLocation, LedgerCall, PlayerRecord, Settlement, Wei, World, WorldId},
};

abigen!(MmoGame, "abi/MMOGame.json");

type GameClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Contract ledger on an EVM chain, signing with a single local wallet.
pub struct EvmLedger {
    contract: MmoGame<GameClient>,
    client: Arc<GameClient>,
    signer: Address,
    confirmations: usize,
    // Sent but not yet settled, kept to replay a revert for its reason.
    in_flight: Mutex<HashMap<H256, LedgerCall>>,
}

impl EvmLedger {
    pub fn from_config(config: &Config) -> Result<Self> {
        let provider = Provider::<Http>::try_from(config.rpc_url.as_str())
            .map_err(|e| AppError::Internal(format!("Invalid RPC URL: {}", e)))?;

        let key = config
            .wallet_private_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| AppError::Internal("Wallet private key not configured".into()))?;
        let wallet = LocalWallet::from_str(key)
            .map_err(|e| AppError::Internal(format!("Invalid wallet key: {}", e)))?
            .with_chain_id(config.chain_id);
        let signer = wallet.address();

        let contract_address = Address::from_str(config.game_contract_address.trim())
            .map_err(|e| AppError::Internal(format!("Invalid contract address: {}", e)))?;

        let client = Arc::new(SignerMiddleware::new(provider, wallet));
        let contract = MmoGame::new(contract_address, client.clone());

        tracing::info!(
            "EVM ledger ready: contract {:?}, signer {:?}, chain {}",
            contract_address,
            signer,
            config.chain_id
        );

        Ok(Self {
            contract,
            client,
            signer,
            confirmations: config.tx_confirmations.max(1),
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    pub fn signer_address(&self) -> Address {
        self.signer
    }

    fn build_call(&self, call: LedgerCall) -> ContractCall<GameClient, ()> {
        match call {
            LedgerCall::CreateWorld { name, x, y, fee } => {
                self.contract.create_world(name, x, y, fee.raw())
            }
            LedgerCall::RegisterUser { username } => self.contract.register_user(username),
            LedgerCall::JoinWorld {
                world_id,
                username,
                value,
            } => self
                .contract
                .join_world(U256::from(world_id), username)
                .value(value.raw()),
            LedgerCall::AttackCity {
                world_id,
                defender,
                troops,
            } => self
                .contract
                .attack_city(U256::from(world_id), defender, troops),
            LedgerCall::ScoutCity {
                world_id,
                city_owner,
                value,
            } => self
                .contract
                .scout_city(U256::from(world_id), city_owner)
                .value(value.raw()),
        }
    }

    /// Re-runs a reverted write as `eth_call` against the block it was mined
    /// in, so the contract's reason string can be decoded.
    async fn revert_reason(&self, tx_hash: H256, block: Option<U64>) -> AppError {
        let call = self.in_flight.lock().await.remove(&tx_hash);
        let (Some(call), Some(block)) = (call, block) else {
            return settlement_failure(tx_hash, Ok(()));
        };
        let replay = self
            .build_call(call)
            .from(self.signer)
            .block(BlockNumber::Number(block))
            .call()
            .await
            .map_err(map_contract_error);
        settlement_failure(tx_hash, replay)
    }
}

#[async_trait::async_trait]
impl GameLedger for EvmLedger {
    async fn owner(&self) -> Result<Address> {
        self.contract.owner().call().await.map_err(map_contract_error)
    }

    async fn all_worlds(&self) -> Result<Vec<World>> {
        let records = self
            .contract
            .get_all_worlds()
            .call()
            .await
            .map_err(map_contract_error)?;
        records
            .into_iter()
            .enumerate()
            .map(|(index, record)| world_from_record(index as WorldId, record))
            .collect()
    }

    async fn world(&self, world_id: WorldId) -> Result<World> {
        let record = self
            .contract
            .get_world(U256::from(world_id))
            .call()
            .await
            .map_err(map_contract_error)?;
        world_from_record(world_id, record)
    }

    async fn player(&self, address: Address) -> Result<PlayerRecord> {
        let (username, is_registered) = self
            .contract
            .players(address)
            .call()
            .await
            .map_err(map_contract_error)?;
        Ok(PlayerRecord {
            username,
            is_registered,
        })
    }

    async fn player_location(
        &self,
        world_id: WorldId,
        address: Address,
    ) -> Result<Option<CityLocation>> {
        let result = self
            .contract
            .get_player_location_in_world(U256::from(world_id), address)
            .call()
            .await;
        match result {
            Ok((x, y)) => Ok(Some(CityLocation {
                x: u256_to_u64(x, "location.x")?,
                y: u256_to_u64(y, "location.y")?,
            })),
            // Non-members revert instead of returning a sentinel.
            Err(err) if err.is_revert() => Ok(None),
            Err(err) => Err(map_contract_error(err)),
        }
    }

    async fn submit(&self, from: Address, call: LedgerCall) -> Result<H256> {
        if from != self.signer {
            return Err(AppError::SubmissionRejected(format!(
                "Wallet {:?} cannot sign for {:?}",
                self.signer, from
            )));
        }

        let kind = call.kind();
        let tx = self.build_call(call.clone());

        let pending = tx.send().await.map_err(map_contract_error)?;
        let tx_hash = pending.tx_hash();
        self.in_flight.lock().await.insert(tx_hash, call);
        tracing::debug!("Submitted {} as {:?}", kind, tx_hash);
        Ok(tx_hash)
    }

    async fn await_settlement(&self, tx_hash: H256) -> Result<Settlement> {
        let receipt = PendingTransaction::new(tx_hash, self.client.provider())
            .confirmations(self.confirmations)
            .await
            .map_err(|e| AppError::BlockchainRPC(e.to_string()))?;
        let Some(receipt) = receipt else {
            self.in_flight.lock().await.remove(&tx_hash);
            return Err(AppError::Reverted(format!(
                "Transaction {:?} was dropped",
                tx_hash
            )));
        };

        if receipt.status != Some(U64::from(1)) {
            return Err(self.revert_reason(tx_hash, receipt.block_number).await);
        }
        self.in_flight.lock().await.remove(&tx_hash);

        Ok(Settlement {
            tx_hash,
            block_number: receipt.block_number.map(|block| block.as_u64()),
        })
    }
}

fn world_from_record(id: WorldId, record: WorldRecord) -> Result<World> {
    Ok(World {
        id,
        name: record.name,
        x: u256_to_u64(record.x, "world.x")?,
        y: u256_to_u64(record.y, "world.y")?,
        fee: Wei(record.fee),
        owner: record.world_owner,
        player_count: u256_to_u64(record.player_count, "world.playerCount")?,
        is_active: record.is_active,
    })
}

// A replay that fails for transport reasons says nothing about the revert.
fn settlement_failure(tx_hash: H256, replay: Result<()>) -> AppError {
    match replay {
        Err(AppError::BlockchainRPC(message)) => {
            tracing::warn!("Could not replay reverted {:?}: {}", tx_hash, message);
            AppError::Reverted(format!("Transaction {:?} reverted on-chain", tx_hash))
        }
        Err(err) => err,
        Ok(()) => AppError::Reverted(format!("Transaction {:?} reverted on-chain", tx_hash)),
    }
}

// Reverts carry the contract's reason string; everything else is transport.
fn map_contract_error<M: Middleware>(err: ContractError<M>) -> AppError {
    if let Some(reason) = err.decode_revert::<String>() {
        return AppError::from_revert_reason(&reason);
    }
    let message = err.to_string();
    AppError::classify_revert(&message).unwrap_or(AppError::BlockchainRPC(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerMode;

    fn rpc_config(key: Option<&str>) -> Config {
        Config {
            host: "127.0.0.1".into(),
            port: 3000,
            environment: "test".into(),
            ledger_mode: LedgerMode::Rpc,
            rpc_url: "http://127.0.0.1:8545".into(),
            chain_id: 1115,
            game_contract_address: "0xffF8088c6a2B96D970C77B70c5F68375643C95b4".into(),
            wallet_private_key: key.map(str::to_string),
            simulated_owner_address: String::new(),
            tx_confirmations: 0,
            pending_warn_secs: 5,
            settlement_timeout_secs: 30,
            cors_allowed_origins: "*".into(),
        }
    }

    const TEST_KEY: &str = "0x0101010101010101010101010101010101010101010101010101010101010101";

    #[test]
    fn missing_key_is_rejected() {
        match EvmLedger::from_config(&rpc_config(None)) {
            Err(AppError::Internal(msg)) => assert!(msg.contains("private key")),
            Err(other) => panic!("expected Internal, got {other:?}"),
            Ok(_) => panic!("expected error"),
        }
    }

    #[test]
    fn signer_address_is_derived_from_key() {
        let ledger = EvmLedger::from_config(&rpc_config(Some(TEST_KEY))).expect("ledger");
        let wallet = LocalWallet::from_str(TEST_KEY).expect("wallet");
        assert_eq!(ledger.signer_address(), wallet.address());
        assert_eq!(ledger.confirmations, 1);
    }

    #[tokio::test]
    async fn foreign_sender_is_rejected_before_submission() {
        let ledger = EvmLedger::from_config(&rpc_config(Some(TEST_KEY))).expect("ledger");
        let stranger = Address::from_low_u64_be(7);
        let result = ledger
            .submit(
                stranger,
                LedgerCall::RegisterUser {
                    username: "alice".into(),
                },
            )
            .await;
        assert!(matches!(result, Err(AppError::SubmissionRejected(_))));
    }

    fn revert_data(reason: &str) -> ethers::types::Bytes {
        let mut data = vec![0x08, 0xc3, 0x79, 0xa0];
        data.extend(ethers::abi::encode(&[ethers::abi::Token::String(reason.into())]));
        data.into()
    }

    #[test]
    fn revert_data_maps_to_domain_errors() {
        let err = ContractError::<GameClient>::Revert(revert_data("Already joined another world."));
        assert!(matches!(map_contract_error(err), AppError::DuplicateJoin));

        let err = ContractError::<GameClient>::Revert(revert_data("Insufficient fee."));
        assert!(matches!(map_contract_error(err), AppError::InsufficientFee));
    }

    #[test]
    fn failed_receipt_reports_replayed_reason() {
        let tx_hash = H256::repeat_byte(0x42);

        assert!(matches!(
            settlement_failure(tx_hash, Err(AppError::DuplicateJoin)),
            AppError::DuplicateJoin
        ));
        // Replay passing or unreachable: only the generic revert is known.
        assert!(matches!(
            settlement_failure(tx_hash, Ok(())),
            AppError::Reverted(_)
        ));
        assert!(matches!(
            settlement_failure(tx_hash, Err(AppError::BlockchainRPC("timeout".into()))),
            AppError::Reverted(_)
        ));
    }

    #[test]
    fn paid_calls_carry_their_fee_as_value() {
        let ledger = EvmLedger::from_config(&rpc_config(Some(TEST_KEY))).expect("ledger");
        let fee = U256::from(100_000_000_000_000_000u128);

        let join = ledger.build_call(LedgerCall::JoinWorld {
            world_id: 2,
            username: "alice".into(),
            value: Wei(fee),
        });
        assert_eq!(join.tx.value(), Some(&fee));

        let register = ledger.build_call(LedgerCall::RegisterUser {
            username: "alice".into(),
        });
        assert!(register.tx.value().map_or(true, |value| value.is_zero()));
    }

    #[tokio::test]
    async fn unknown_reverted_hash_falls_back_to_generic_revert() {
        let ledger = EvmLedger::from_config(&rpc_config(Some(TEST_KEY))).expect("ledger");
        let err = ledger
            .revert_reason(H256::repeat_byte(0x07), Some(U64::from(10)))
            .await;
        assert!(matches!(err, AppError::Reverted(_)));
    }

    #[test]
    fn record_conversion_keeps_raw_fee() {
        let fee = U256::from(100_000_000_000_000_000u128);
        let record = WorldRecord {
            name: "Richmond".into(),
            x: U256::from(10),
            y: U256::from(12),
            fee,
            world_owner: Address::from_low_u64_be(1),
            player_count: U256::from(3),
            is_active: true,
        };
        let world = world_from_record(4, record).expect("conversion");
        assert_eq!(world.id, 4);
        assert_eq!(world.fee.raw(), fee);
        assert_eq!(world.cells(), 120);
        assert_eq!(world.player_count, 3);
    }
}
