use ethers::types::{Address, H256};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::constants::EVENT_CHANNEL_CAPACITY;
use crate::models::{SessionState, TxKind, WorldId};

/// Everything the front end would have shown as a toast.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    TxPending {
        record_id: u64,
        kind: TxKind,
        tx_hash: H256,
    },
    TxSettled {
        record_id: u64,
        kind: TxKind,
        tx_hash: H256,
        block_number: Option<u64>,
    },
    TxFailed {
        record_id: u64,
        kind: TxKind,
        code: String,
        message: String,
    },
    PendingTooLong {
        record_id: u64,
        kind: TxKind,
        tx_hash: H256,
        waited_secs: u64,
    },
    SessionChanged {
        state: SessionState,
        address: Option<Address>,
        current_world: Option<WorldId>,
    },
    CatalogRefreshed {
        worlds: usize,
    },
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<GameEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, event: GameEvent) {
        // No subscribers is fine; the log still has it.
        if self.sender.send(event).is_err() {
            tracing::trace!("Game event dropped: no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(GameEvent::CatalogRefreshed { worlds: 3 });

        match rx.recv().await {
            Ok(GameEvent::CatalogRefreshed { worlds }) => assert_eq!(worlds, 3),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn publishing_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(GameEvent::CatalogRefreshed { worlds: 0 });
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_string(&GameEvent::CatalogRefreshed { worlds: 1 }).unwrap();
        assert!(json.contains("\"type\":\"catalog_refreshed\""));
    }
}
