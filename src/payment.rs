//! Payment orchestration for a finished cart.
//!
//! Cash settles with a single order-creation call. Transfer payments show a
//! VietQR code carrying a reference code and then race three triggers:
//! a bank feed poll finding the transfer, the overall deadline, and the
//! cashier closing the QR dialog. The race runs inside one future
//! ([`TransferAttempt::wait`]), so exactly one outcome is produced and the
//! order is submitted at most once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{BankFeed, BankTransaction, SalesBackend, SpeechSynth};
use crate::config::{BankAccountConfig, PAYMENT_POLL_INTERVAL, PAYMENT_TIMEOUT};
use crate::data_helpers::normalize_reference;
use crate::error::{PosError, Result};
use crate::events::{EventBus, PosEvent};
use crate::models::{Money, OrderReceipt, OrderRequest, PaymentMethod, Transaction};
use crate::qr::build_qr_url;
use crate::voice::spawn_announcement;

const GUEST_REFERENCE: &str = "GUEST";

/// Orchestrator-level state, observable by the checkout screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentState {
    Idle,
    AwaitingMethodDispatch,
    CashSettling,
    TransferAwaitingScan,
    Success,
    Failed,
    Cancelled,
    TimedOut,
}

/// How a payment attempt ended when it did not fail outright.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentOutcome {
    Success(OrderReceipt),
    Cancelled,
    TimedOut,
}

/// What the QR dialog shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    AwaitingScan,
    Settling,
    Paid,
    /// Deadline passed. The dialog stays up until the cashier dismisses it.
    Expired,
    Cancelled,
    Failed,
}

/// Result of dispatching on the cart's payment method.
pub enum Dispatched<B> {
    Settled(OrderReceipt),
    AwaitingTransfer(TransferAttempt<B>),
}

// ---------------------------------------------------------------------------
// QR session
// ---------------------------------------------------------------------------

/// UI handle on one transfer attempt. Cheap to clone; closing it from any
/// clone cancels the attempt if it has not resolved yet.
#[derive(Debug, Clone)]
pub struct QrSession {
    reference: String,
    amount: Money,
    qr_url: String,
    deadline: Instant,
    closed: CancellationToken,
    status: watch::Receiver<SessionStatus>,
}

impl QrSession {
    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn qr_url(&self) -> &str {
        &self.qr_url
    }

    pub fn is_open(&self) -> bool {
        !self.closed.is_cancelled()
    }

    /// Close the dialog. Before resolution this cancels the payment; after
    /// it, it only dismisses.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Countdown shown under the QR code.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// Holds the orchestrator's single transfer slot until dropped.
struct BusyGuard(Arc<AtomicBool>);

impl BusyGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| PosError::PaymentBusy)?;
        Ok(BusyGuard(flag.clone()))
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// A feed row pays the session when it carries at least the requested amount
/// and its description contains the reference (hyphens ignored, any case).
pub fn is_payment_match(row: &BankTransaction, amount: Money, reference: &str) -> bool {
    let wanted = normalize_reference(reference);
    !wanted.is_empty()
        && row.amount >= amount
        && normalize_reference(&row.description).contains(&wanted)
}

pub fn find_payment_match<'a>(
    rows: &'a [BankTransaction],
    amount: Money,
    reference: &str,
) -> Option<&'a BankTransaction> {
    rows.iter().find(|r| is_payment_match(r, amount, reference))
}

/// `<prefix>-<unix millis>-<customer id | GUEST>`, alphanumerics only in the
/// customer part so banks do not mangle it.
pub fn mint_reference(prefix: &str, customer_id: Option<&str>) -> String {
    let customer: String = customer_id
        .unwrap_or(GUEST_REFERENCE)
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    let customer = if customer.is_empty() {
        GUEST_REFERENCE.to_string()
    } else {
        customer
    };
    format!("{prefix}-{}-{customer}", Utc::now().timestamp_millis())
}

/// Amount owed for a cart, from its lines and discount.
pub fn amount_due(tx: &Transaction) -> Money {
    let lines: Money = tx.items.iter().map(|i| i.price * i.quantity).sum();
    (lines - tx.discount).max(0)
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct PaymentOrchestrator<B> {
    backend: Arc<B>,
    bank: BankAccountConfig,
    reference_prefix: String,
    events: EventBus,
    transfer_busy: Arc<AtomicBool>,
    state: Arc<watch::Sender<PaymentState>>,
}

impl<B> PaymentOrchestrator<B>
where
    B: SalesBackend + BankFeed + SpeechSynth + 'static,
{
    pub fn new(
        backend: Arc<B>,
        bank: BankAccountConfig,
        reference_prefix: impl Into<String>,
        events: EventBus,
    ) -> Self {
        let (state, _rx) = watch::channel(PaymentState::Idle);
        PaymentOrchestrator {
            backend,
            bank,
            reference_prefix: reference_prefix.into(),
            events,
            transfer_busy: Arc::new(AtomicBool::new(false)),
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> PaymentState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<PaymentState> {
        self.state.subscribe()
    }

    pub fn transfer_in_progress(&self) -> bool {
        self.transfer_busy.load(Ordering::Acquire)
    }

    fn validate(tx: &Transaction) -> Result<()> {
        if tx.items.is_empty() {
            return Err(PosError::validation("Cart is empty"));
        }
        Ok(())
    }

    /// Route the cart to the flow its payment method selects.
    pub async fn dispatch(&self, tx: &Transaction) -> Result<Dispatched<B>> {
        Self::validate(tx)?;
        set_state(&self.state, PaymentState::AwaitingMethodDispatch);
        match tx.payment_method {
            PaymentMethod::Cash => self.pay_cash(tx).await.map(Dispatched::Settled),
            PaymentMethod::Transfer => self.begin_transfer(tx).map(Dispatched::AwaitingTransfer),
        }
    }

    /// Settle a cash sale. On error the cart is left as it was so the
    /// cashier can retry.
    pub async fn pay_cash(&self, tx: &Transaction) -> Result<OrderReceipt> {
        Self::validate(tx)?;
        set_state(&self.state, PaymentState::CashSettling);
        let order = OrderRequest::from_transaction(tx, PaymentMethod::Cash);
        match self.backend.create_order(&order).await {
            Ok(receipt) => {
                set_state(&self.state, PaymentState::Success);
                self.events.publish(PosEvent::PaymentSettled {
                    transaction_id: tx.id.clone(),
                    order_id: receipt.order_id.clone(),
                    method: PaymentMethod::Cash,
                    total: receipt.total,
                });
                Ok(receipt)
            }
            Err(e) => {
                set_state(&self.state, PaymentState::Failed);
                warn!(transaction_id = %tx.id, error = %e, "cash settlement failed");
                Err(e)
            }
        }
    }

    /// Open a QR session for a transfer payment. Call
    /// [`TransferAttempt::wait`] to run it to an outcome.
    pub fn begin_transfer(&self, tx: &Transaction) -> Result<TransferAttempt<B>> {
        Self::validate(tx)?;
        let amount = amount_due(tx);
        if amount <= 0 {
            return Err(PosError::validation("Nothing to pay by transfer"));
        }
        let busy = BusyGuard::acquire(&self.transfer_busy)?;

        let reference = mint_reference(
            &self.reference_prefix,
            tx.customer.as_ref().map(|c| c.id.as_str()),
        );
        let qr_url = build_qr_url(&self.bank, amount, &reference)?;
        let deadline = Instant::now() + PAYMENT_TIMEOUT;
        let (status_tx, status_rx) = watch::channel(SessionStatus::AwaitingScan);

        set_state(&self.state, PaymentState::TransferAwaitingScan);
        info!(transaction_id = %tx.id, %reference, amount, "transfer QR opened");

        Ok(TransferAttempt {
            backend: self.backend.clone(),
            events: self.events.clone(),
            state: self.state.clone(),
            transaction_id: tx.id.clone(),
            order: OrderRequest::from_transaction(tx, PaymentMethod::Transfer),
            session: QrSession {
                reference,
                amount,
                qr_url,
                deadline,
                closed: CancellationToken::new(),
                status: status_rx,
            },
            status: status_tx,
            _busy: busy,
        })
    }
}

fn set_state(state: &watch::Sender<PaymentState>, next: PaymentState) {
    let prev = state.send_replace(next);
    debug!(?prev, ?next, "payment state");
}

// ---------------------------------------------------------------------------
// Transfer attempt
// ---------------------------------------------------------------------------

pub struct TransferAttempt<B> {
    backend: Arc<B>,
    events: EventBus,
    state: Arc<watch::Sender<PaymentState>>,
    transaction_id: String,
    order: OrderRequest,
    session: QrSession,
    status: watch::Sender<SessionStatus>,
    _busy: BusyGuard,
}

impl<B> TransferAttempt<B>
where
    B: SalesBackend + BankFeed + SpeechSynth + 'static,
{
    pub fn session(&self) -> &QrSession {
        &self.session
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    /// Run the poll / deadline / close race to a single outcome. Dropping
    /// this future tears everything down as well; the busy slot is released
    /// when the attempt itself is dropped.
    pub async fn wait(self) -> Result<PaymentOutcome> {
        let amount = self.session.amount;
        let closed = self.session.closed.clone();
        let deadline = tokio::time::sleep_until(self.session.deadline);
        tokio::pin!(deadline);
        let mut ticker = tokio::time::interval_at(
            Instant::now() + PAYMENT_POLL_INTERVAL,
            PAYMENT_POLL_INTERVAL,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let matched = loop {
            tokio::select! {
                biased;
                _ = closed.cancelled() => return Ok(self.resolve_cancelled()),
                _ = &mut deadline => return Ok(self.resolve_timed_out()),
                _ = ticker.tick() => {}
            }

            // A response still in flight when the dialog closes or the
            // deadline passes is dropped unread.
            let polled = tokio::select! {
                biased;
                _ = closed.cancelled() => return Ok(self.resolve_cancelled()),
                _ = &mut deadline => return Ok(self.resolve_timed_out()),
                rows = self.backend.latest_transactions() => rows,
            };

            match polled {
                Ok(rows) => {
                    if let Some(row) = find_payment_match(&rows, amount, &self.session.reference) {
                        break row.clone();
                    }
                }
                Err(e) => warn!(
                    reference = %self.session.reference,
                    error = %e,
                    "bank feed poll failed"
                ),
            }
        };

        info!(
            reference = %self.session.reference,
            bank_tx = %matched.id,
            received = matched.amount,
            "transfer matched"
        );
        self.status.send_replace(SessionStatus::Settling);

        match self.backend.create_order(&self.order).await {
            Ok(receipt) => {
                self.status.send_replace(SessionStatus::Paid);
                set_state(&self.state, PaymentState::Success);
                self.session.closed.cancel();
                self.events.publish(PosEvent::PaymentSettled {
                    transaction_id: self.transaction_id.clone(),
                    order_id: receipt.order_id.clone(),
                    method: PaymentMethod::Transfer,
                    total: receipt.total,
                });
                spawn_announcement(self.backend.clone(), self.events.clone(), matched.amount);
                Ok(PaymentOutcome::Success(receipt))
            }
            Err(e) => {
                self.status.send_replace(SessionStatus::Failed);
                set_state(&self.state, PaymentState::Failed);
                warn!(
                    reference = %self.session.reference,
                    error = %e,
                    "transfer received but order creation failed"
                );
                Err(e)
            }
        }
    }

    fn resolve_cancelled(&self) -> PaymentOutcome {
        self.status.send_replace(SessionStatus::Cancelled);
        set_state(&self.state, PaymentState::Cancelled);
        info!(reference = %self.session.reference, "transfer cancelled");
        PaymentOutcome::Cancelled
    }

    fn resolve_timed_out(&self) -> PaymentOutcome {
        self.status.send_replace(SessionStatus::Expired);
        set_state(&self.state, PaymentState::TimedOut);
        info!(reference = %self.session.reference, "transfer QR expired");
        PaymentOutcome::TimedOut
    }
}

/// An attempt dropped before it resolved (never awaited, or its `wait`
/// future was dropped) reports its session as cancelled.
impl<B> Drop for TransferAttempt<B> {
    fn drop(&mut self) {
        let unresolved = match *self.status.borrow() {
            SessionStatus::AwaitingScan => SessionStatus::Cancelled,
            SessionStatus::Settling => SessionStatus::Failed,
            _ => return,
        };
        self.status.send_replace(unresolved);
        self.session.closed.cancel();
        let next = if unresolved == SessionStatus::Cancelled {
            PaymentState::Cancelled
        } else {
            PaymentState::Failed
        };
        set_state(&self.state, next);
        info!(reference = %self.session.reference, ?unresolved, "transfer attempt dropped");
    }
}
