/// Application constants

// Chain units
pub const CHAIN_UNIT_DECIMALS: u32 = 18; // 1 CORE = 10^18 wei
pub const DISPLAY_CURRENCY: &str = "CORE";

// Player rules
pub const MIN_USERNAME_LEN: usize = 4;

// Settlement policy
pub const DEFAULT_TX_CONFIRMATIONS: usize = 1;
pub const DEFAULT_PENDING_WARN_SECS: u64 = 30;
pub const DEFAULT_SETTLEMENT_TIMEOUT_SECS: u64 = 300;
pub const MAX_TX_RECORDS: usize = 1000;

// Simulated ledger
pub const SIMULATED_CHAIN_ID: u64 = 31337;
pub const SIMULATED_OWNER_ADDRESS: &str = "0x00000000000000000000000000000000000000a1";

// Core DAO testnet
pub const DEFAULT_CHAIN_ID: u64 = 1115;
pub const DEFAULT_RPC_URL: &str = "https://rpc.test.btcs.network";

// Event bus
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

// API version
pub const API_VERSION: &str = "v1";

// WebSocket configuration
pub const WS_HEARTBEAT_INTERVAL_SECS: u64 = 30;
pub const WS_CLIENT_TIMEOUT_SECS: u64 = 60;
