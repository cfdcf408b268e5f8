pub mod game;

pub use game::{
    u256_to_u64, ApiResponse, CityLocation, JoinOutcome, LedgerCall, MembershipState, Player,
    PlayerRecord, SessionSnapshot, SessionState, Settlement, SignUpProgress, SignUpStep, TxKind,
    TxOutcome, TxRecord, TxStatus, Wei, World, WorldDraft, WorldEntry, WorldId,
};
