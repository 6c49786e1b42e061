//! Allocator Events
//!
//! Notifications for weight changes, whitelisting, deposits, rebalances and
//! stranded-fund resolutions, fanned out over a tokio broadcast channel. Publishing with no subscribers
//! is fine; the event is still logged.

use alloy::primitives::{Address, U256};
use chrono::{DateTime, Utc};
use tokio::sync::broadcast::{self, Receiver, Sender};
use tracing::{debug, info};

use crate::types::{StrandedResolution, Weights};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocatorEvent {
    WeightsUpdated {
        previous: Weights,
        current: Weights,
    },
    PoolWhitelisted {
        pool: Address,
    },
    Deposited {
        caller: Address,
        pool: Address,
        amount: U256,
    },
    Rebalanced {
        amount: U256,
        from_pool: Address,
        to_pool: Address,
    },
    StrandedResolved {
        amount: U256,
        resolution: StrandedResolution,
    },
}

/// Event plus the time it was published
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub event: AllocatorEvent,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: Sender<EventRecord>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> Receiver<EventRecord> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: AllocatorEvent) {
        info!("Event: {:?}", event);
        let record = EventRecord {
            event,
            at: Utc::now(),
        };
        if self.sender.send(record).is_err() {
            debug!("Event dropped: no subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
