//! Broadcast of things the UI shell reacts to: cached views to refetch,
//! settled payments, shift changes and voice announcements.

use tokio::sync::broadcast;
use tracing::debug;

use crate::models::{Money, PaymentMethod};

const EVENT_CAPACITY: usize = 64;

/// Cached read views that may go stale after a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Inventory,
    Products,
    Customers,
    Invoices,
    CurrentShift,
    Shifts,
}

/// Views touched by a completed sale.
pub const SALE_INVALIDATES: &[CacheKey] = &[
    CacheKey::Inventory,
    CacheKey::Products,
    CacheKey::Invoices,
    CacheKey::CurrentShift,
];

/// Views touched by opening or closing a shift.
pub const SHIFT_INVALIDATES: &[CacheKey] = &[CacheKey::CurrentShift, CacheKey::Shifts];

#[derive(Debug, Clone, PartialEq)]
pub enum PosEvent {
    Invalidated(CacheKey),
    PaymentSettled {
        transaction_id: String,
        order_id: String,
        method: PaymentMethod,
        total: Money,
    },
    PaymentAnnounced {
        amount: Money,
        audio_url: String,
    },
    ShiftOpened(i64),
    ShiftClosed(i64),
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PosEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CAPACITY);
        EventBus { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PosEvent> {
        self.tx.subscribe()
    }

    /// Publish to current subscribers. Having none is not an error.
    pub fn publish(&self, event: PosEvent) {
        if self.tx.send(event).is_err() {
            debug!("event dropped, no subscribers");
        }
    }

    pub fn invalidate(&self, keys: &[CacheKey]) {
        for key in keys {
            self.publish(PosEvent::Invalidated(*key));
        }
    }
}
