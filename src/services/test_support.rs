use ethers::types::Address;
use std::sync::Arc;
use std::time::Duration;

use super::contract_client::{ContractClient, SettlementPolicy};
use super::event_bus::EventBus;
use super::transaction_tracker::TransactionTracker;
use crate::ledger::SimulatedLedger;
use crate::models::Wei;

pub const OWNER: Address = Address::repeat_byte(0xa1);

pub fn addr(n: u64) -> Address {
    Address::from_low_u64_be(0x1000 + n)
}

pub fn fast_policy() -> SettlementPolicy {
    SettlementPolicy {
        pending_warn_after: Duration::from_secs(5),
        settlement_timeout: Duration::from_secs(10),
    }
}

pub fn client_with_policy(ledger: Arc<SimulatedLedger>, policy: SettlementPolicy) -> ContractClient {
    ContractClient::new(ledger, TransactionTracker::new(), EventBus::new(), policy)
}

pub fn client(ledger: Arc<SimulatedLedger>) -> Arc<ContractClient> {
    Arc::new(client_with_policy(ledger, fast_policy()))
}

pub fn ether(value: &str) -> Wei {
    Wei::from_ether_str(value).unwrap_or_default()
}
