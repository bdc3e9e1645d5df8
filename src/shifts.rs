//! Cash-register shift lifecycle.
//!
//! `NoOpenShift -> Open -> Closed`, one way only. The backend is the source
//! of truth for whether a shift is open; the local phase is a cache of the
//! last answer used by the checkout guard.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{info, warn};

use crate::backend::ShiftBackend;
use crate::error::{PosError, Result};
use crate::events::{EventBus, PosEvent, SHIFT_INVALIDATES};
use crate::models::{Money, Page, Shift, ShiftStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShiftPhase {
    NoOpenShift,
    Open(Shift),
    Closed(Shift),
}

/// Fill in the reconciliation fields the server left out: the counted end
/// cash, the expected drawer amount (opening cash plus cash sales) and their
/// difference.
pub fn reconcile(shift: &mut Shift, end_cash: Money) {
    let end = *shift.end_cash.get_or_insert(end_cash);
    let expected = *shift
        .expected_cash
        .get_or_insert(shift.start_cash + shift.cash_revenue);
    shift.cash_difference.get_or_insert(end - expected);
    shift.status = ShiftStatus::Closed;
}

pub struct ShiftLifecycle<B> {
    backend: Arc<B>,
    events: EventBus,
    phase: Mutex<ShiftPhase>,
}

impl<B: ShiftBackend> ShiftLifecycle<B> {
    pub fn new(backend: Arc<B>, events: EventBus) -> Self {
        ShiftLifecycle {
            backend,
            events,
            phase: Mutex::new(ShiftPhase::NoOpenShift),
        }
    }

    pub fn phase(&self) -> ShiftPhase {
        self.phase
            .lock()
            .map(|p| p.clone())
            .unwrap_or(ShiftPhase::NoOpenShift)
    }

    fn set_phase(&self, next: ShiftPhase) {
        match self.phase.lock() {
            Ok(mut phase) => *phase = next,
            Err(e) => warn!("shift phase lock poisoned: {e}"),
        }
    }

    /// Ask the backend for the open shift and update the local phase.
    pub async fn current_shift(&self) -> Result<Option<Shift>> {
        let current = self.backend.current_shift().await?;
        match &current {
            Some(shift) => self.set_phase(ShiftPhase::Open(shift.clone())),
            None => {
                if let ShiftPhase::Open(_) = self.phase() {
                    self.set_phase(ShiftPhase::NoOpenShift);
                }
            }
        }
        Ok(current)
    }

    pub async fn open_shift(&self, start_cash: Money, note: Option<&str>) -> Result<Shift> {
        if start_cash < 0 {
            return Err(PosError::validation("Opening cash cannot be negative"));
        }
        if let Some(open) = self.current_shift().await? {
            return Err(PosError::ShiftAlreadyOpen(open.id));
        }

        let shift = self.backend.open_shift(start_cash, note).await?;
        info!(shift_id = shift.id, start_cash, "shift opened");
        self.set_phase(ShiftPhase::Open(shift.clone()));
        self.events.publish(PosEvent::ShiftOpened(shift.id));
        self.events.invalidate(SHIFT_INVALIDATES);
        Ok(shift)
    }

    pub async fn close_shift(&self, end_cash: Money, note: Option<&str>) -> Result<Shift> {
        if end_cash < 0 {
            return Err(PosError::validation("Closing cash cannot be negative"));
        }
        let Some(open) = self.current_shift().await? else {
            return Err(PosError::NoOpenShift);
        };

        let mut closed = self.backend.close_shift(end_cash, note).await?;
        if closed.start_cash == 0 {
            closed.start_cash = open.start_cash;
        }
        reconcile(&mut closed, end_cash);
        info!(
            shift_id = closed.id,
            end_cash,
            expected = ?closed.expected_cash,
            difference = ?closed.cash_difference,
            "shift closed"
        );
        self.set_phase(ShiftPhase::Closed(closed.clone()));
        self.events.publish(PosEvent::ShiftClosed(closed.id));
        self.events.invalidate(SHIFT_INVALIDATES);
        Ok(closed)
    }

    /// Guard for recording sales: succeeds only while a shift is open.
    pub async fn require_open_shift(&self) -> Result<Shift> {
        if let ShiftPhase::Open(shift) = self.phase() {
            return Ok(shift);
        }
        self.current_shift().await?.ok_or(PosError::NoOpenShift)
    }

    pub async fn shift_detail(&self, id: i64) -> Result<Shift> {
        self.backend.shift_detail(id).await
    }

    pub async fn shift_orders(&self, id: i64, page: u32, limit: u32) -> Result<Page<Value>> {
        self.backend.shift_orders(id, page, limit).await
    }

    pub async fn shifts(&self, page: u32, limit: u32) -> Result<Page<Shift>> {
        self.backend.list_shifts(page, limit).await
    }
}
