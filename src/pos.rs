//! Point-of-sale facade: the one object the UI shell holds.
//!
//! Wires the draft store, search, payment orchestrator and shift lifecycle
//! together and owns the post-sale bookkeeping (retire the draft, drop
//! stale caches, tell the shell what to refetch).

use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tracing::{info, warn};

use crate::api::ApiClient;
use crate::backend::{BankFeed, BankTransaction, SalesBackend, ShiftBackend, SpeechSynth};
use crate::bank_feed::BankFeedClient;
use crate::config::PosConfig;
use crate::error::{PosError, Result};
use crate::events::{EventBus, SALE_INVALIDATES};
use crate::models::{
    Customer, Money, OrderReceipt, OrderRequest, Page, Product, Shift, Transaction,
};
use crate::payment::{Dispatched, PaymentOrchestrator, PaymentOutcome, TransferAttempt};
use crate::search::SearchService;
use crate::shifts::ShiftLifecycle;
use crate::transactions::TransactionStore;
use crate::voice::TtsClient;

// ---------------------------------------------------------------------------
// HTTP backend
// ---------------------------------------------------------------------------

/// Production backend: REST API, bank feed and (optional) speech service.
pub struct HttpBackend {
    api: ApiClient,
    bank_feed: BankFeedClient,
    voice: Option<TtsClient>,
}

impl HttpBackend {
    pub fn from_config(config: &PosConfig) -> Result<Self> {
        Ok(HttpBackend {
            api: ApiClient::from_config(config)?,
            bank_feed: BankFeedClient::new(&config.bank_feed)?,
            voice: config.voice.as_ref().map(TtsClient::new).transpose()?,
        })
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }
}

impl SalesBackend for HttpBackend {
    async fn create_order(&self, order: &OrderRequest) -> Result<OrderReceipt> {
        self.api.create_order(order).await
    }

    async fn search_products(&self, keyword: &str, page: u32, limit: u32) -> Result<Page<Product>> {
        self.api.search_products(keyword, page, limit).await
    }

    async fn search_customers(
        &self,
        keyword: &str,
        page: u32,
        limit: u32,
    ) -> Result<Page<Customer>> {
        self.api.search_customers(keyword, page, limit).await
    }

    async fn find_customer_by_phone(&self, phone: &str) -> Result<Option<Customer>> {
        self.api.find_customer_by_phone(phone).await
    }
}

impl ShiftBackend for HttpBackend {
    async fn open_shift(&self, start_cash: Money, note: Option<&str>) -> Result<Shift> {
        self.api.open_shift(start_cash, note).await
    }

    async fn close_shift(&self, end_cash: Money, note: Option<&str>) -> Result<Shift> {
        self.api.close_shift(end_cash, note).await
    }

    async fn current_shift(&self) -> Result<Option<Shift>> {
        self.api.current_shift().await
    }

    async fn shift_detail(&self, id: i64) -> Result<Shift> {
        self.api.shift_detail(id).await
    }

    async fn shift_orders(&self, id: i64, page: u32, limit: u32) -> Result<Page<Value>> {
        self.api.shift_orders(id, page, limit).await
    }

    async fn list_shifts(&self, page: u32, limit: u32) -> Result<Page<Shift>> {
        self.api.list_shifts(page, limit).await
    }
}

impl BankFeed for HttpBackend {
    async fn latest_transactions(&self) -> Result<Vec<BankTransaction>> {
        self.bank_feed.latest_transactions().await
    }
}

impl SpeechSynth for HttpBackend {
    async fn synthesize(&self, text: &str) -> Result<String> {
        match &self.voice {
            Some(tts) => tts.synthesize(text).await,
            None => Err(PosError::Config("voice announcements are not configured".into())),
        }
    }
}

// ---------------------------------------------------------------------------
// Facade
// ---------------------------------------------------------------------------

/// Result of [`PointOfSale::checkout`].
pub enum Checkout<B> {
    /// Cash sale recorded; the draft has been retired.
    Paid {
        receipt: OrderReceipt,
        transaction: Transaction,
    },
    /// QR shown; hand the attempt to [`PointOfSale::finish_transfer`].
    AwaitingTransfer(TransferAttempt<B>),
}

pub struct PointOfSale<B> {
    store: Mutex<TransactionStore>,
    search: SearchService<B>,
    payments: PaymentOrchestrator<B>,
    shifts: ShiftLifecycle<B>,
    events: EventBus,
}

impl PointOfSale<HttpBackend> {
    pub fn connect(config: &PosConfig) -> Result<Self> {
        let backend = Arc::new(HttpBackend::from_config(config)?);
        info!(api_url = %config.api_url, "point of sale connected");
        Ok(Self::new(backend, config))
    }
}

impl<B> PointOfSale<B>
where
    B: SalesBackend + ShiftBackend + BankFeed + SpeechSynth + 'static,
{
    pub fn new(backend: Arc<B>, config: &PosConfig) -> Self {
        let events = EventBus::new();
        PointOfSale {
            store: Mutex::new(TransactionStore::new()),
            search: SearchService::new(backend.clone(), config.search_page_size),
            payments: PaymentOrchestrator::new(
                backend.clone(),
                config.bank.clone(),
                config.reference_prefix.clone(),
                events.clone(),
            ),
            shifts: ShiftLifecycle::new(backend, events.clone()),
            events,
        }
    }

    /// Lock the draft store. Do not hold the guard across an `.await`.
    pub fn store(&self) -> MutexGuard<'_, TransactionStore> {
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn active_transaction(&self) -> Option<Transaction> {
        self.store().active().cloned()
    }

    pub fn search(&self) -> &SearchService<B> {
        &self.search
    }

    pub fn payments(&self) -> &PaymentOrchestrator<B> {
        &self.payments
    }

    pub fn shifts(&self) -> &ShiftLifecycle<B> {
        &self.shifts
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Pay the active draft with its selected method. Requires an open shift.
    /// The draft is frozen from here until the payment resolves, so edits
    /// made while a QR is up cannot be lost on settlement.
    pub async fn checkout(&self) -> Result<Checkout<B>> {
        let (transaction_id, empty) = {
            let store = self.store();
            let tx = store
                .active()
                .ok_or_else(|| PosError::validation("No active transaction"))?;
            (tx.id.clone(), tx.is_empty())
        };
        if empty {
            return Err(PosError::validation("Cart is empty"));
        }
        self.shifts.require_open_shift().await?;

        let tx = self.store().begin_payment(&transaction_id)?;
        match self.payments.dispatch(&tx).await {
            Ok(Dispatched::Settled(receipt)) => {
                let transaction = self.settle(&tx.id).unwrap_or(tx);
                Ok(Checkout::Paid {
                    receipt,
                    transaction,
                })
            }
            Ok(Dispatched::AwaitingTransfer(attempt)) => Ok(Checkout::AwaitingTransfer(attempt)),
            Err(e) => {
                self.store().release_payment(&transaction_id);
                Err(e)
            }
        }
    }

    /// Run a transfer attempt to its outcome and retire the draft on success.
    /// Any other outcome hands the draft back to the cashier unchanged.
    pub async fn finish_transfer(&self, attempt: TransferAttempt<B>) -> Result<PaymentOutcome> {
        let transaction_id = attempt.transaction_id().to_string();
        let result = attempt.wait().await;
        match &result {
            Ok(PaymentOutcome::Success(_)) => {
                self.settle(&transaction_id);
            }
            _ => self.store().release_payment(&transaction_id),
        }
        result
    }

    /// Drop a transfer attempt without waiting for it and unfreeze its draft.
    pub fn abandon_transfer(&self, attempt: TransferAttempt<B>) {
        let transaction_id = attempt.transaction_id().to_string();
        drop(attempt);
        self.store().release_payment(&transaction_id);
    }

    fn settle(&self, transaction_id: &str) -> Option<Transaction> {
        let done = self.store().complete_transaction(transaction_id);
        if done.is_none() {
            warn!(transaction_id, "settled draft was already closed");
        }
        self.search.invalidate();
        self.events.invalidate(SALE_INVALIDATES);
        done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BankAccountConfig, BankFeedConfig, Secret};
    use crate::events::{CacheKey, PosEvent};
    use crate::models::{PaymentMethod, ShiftStatus, TransactionStatus};
    use crate::payment::{PaymentState, SessionStatus};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::broadcast;

    #[derive(Default)]
    struct Shop {
        shift_open: AtomicBool,
        orders: Mutex<Vec<OrderRequest>>,
        fail_orders: AtomicBool,
        feed: Mutex<Vec<BankTransaction>>,
    }

    fn open_shift_record() -> Shift {
        Shift {
            id: 1,
            operator: None,
            start_time: None,
            end_time: None,
            start_cash: 0,
            end_cash: None,
            expected_cash: None,
            cash_difference: None,
            status: ShiftStatus::Open,
            total_revenue: 0,
            cash_revenue: 0,
            transfer_revenue: 0,
            order_count: 0,
            note: None,
        }
    }

    impl SalesBackend for Shop {
        async fn create_order(&self, order: &OrderRequest) -> Result<OrderReceipt> {
            if self.fail_orders.load(Ordering::SeqCst) {
                return Err(PosError::Api {
                    status: 500,
                    message: "Server error".into(),
                });
            }
            let mut orders = self.orders.lock().unwrap();
            orders.push(order.clone());
            Ok(OrderReceipt {
                order_id: orders.len().to_string(),
                code: Some(format!("HD{:04}", orders.len())),
                total: order.total,
                payment_method: order.payment_method,
                raw: Value::Null,
            })
        }

        async fn search_products(&self, _: &str, page: u32, limit: u32) -> Result<Page<Product>> {
            Ok(Page::empty(page, limit))
        }

        async fn search_customers(&self, _: &str, page: u32, limit: u32) -> Result<Page<Customer>> {
            Ok(Page::empty(page, limit))
        }

        async fn find_customer_by_phone(&self, _: &str) -> Result<Option<Customer>> {
            Ok(None)
        }
    }

    impl ShiftBackend for Shop {
        async fn open_shift(&self, _: Money, _: Option<&str>) -> Result<Shift> {
            self.shift_open.store(true, Ordering::SeqCst);
            Ok(open_shift_record())
        }

        async fn close_shift(&self, _: Money, _: Option<&str>) -> Result<Shift> {
            self.shift_open.store(false, Ordering::SeqCst);
            Ok(Shift {
                status: ShiftStatus::Closed,
                ..open_shift_record()
            })
        }

        async fn current_shift(&self) -> Result<Option<Shift>> {
            Ok(self
                .shift_open
                .load(Ordering::SeqCst)
                .then(open_shift_record))
        }

        async fn shift_detail(&self, _: i64) -> Result<Shift> {
            Ok(open_shift_record())
        }

        async fn shift_orders(&self, _: i64, page: u32, limit: u32) -> Result<Page<Value>> {
            Ok(Page::empty(page, limit))
        }

        async fn list_shifts(&self, page: u32, limit: u32) -> Result<Page<Shift>> {
            Ok(Page::empty(page, limit))
        }
    }

    impl BankFeed for Shop {
        async fn latest_transactions(&self) -> Result<Vec<BankTransaction>> {
            Ok(self.feed.lock().unwrap().clone())
        }
    }

    impl SpeechSynth for Shop {
        async fn synthesize(&self, _: &str) -> Result<String> {
            Err(PosError::Config("voice announcements are not configured".into()))
        }
    }

    fn config() -> PosConfig {
        PosConfig {
            api_url: "https://pos.example".into(),
            api_token: Secret::new("token"),
            bank: BankAccountConfig {
                bank_id: "VCB".into(),
                account_no: "0011223344".into(),
                account_name: "TAP HOA".into(),
                template: "compact2".into(),
            },
            bank_feed: BankFeedConfig {
                url: "https://feed.example/transactions".into(),
                token: Secret::new(""),
            },
            voice: None,
            reference_prefix: "TXN".into(),
            search_page_size: 20,
        }
    }

    fn product(id: i64, price: Money) -> Product {
        Product {
            id,
            name: format!("SP {id}"),
            image: None,
            sell_price: price,
            quantity: 100,
        }
    }

    fn shop() -> (Arc<Shop>, PointOfSale<Shop>) {
        let backend = Arc::new(Shop::default());
        let pos = PointOfSale::new(backend.clone(), &config());
        (backend, pos)
    }

    fn drain(rx: &mut broadcast::Receiver<PosEvent>) -> Vec<PosEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[tokio::test]
    async fn checkout_requires_open_shift() {
        let (backend, pos) = shop();
        pos.store().add_product(&product(1, 10_000));

        let err = pos.checkout().await.err().unwrap();
        assert_eq!(err, PosError::NoOpenShift);
        assert_eq!(pos.active_transaction().unwrap().items.len(), 1);
        assert!(backend.orders.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_cart_is_rejected_before_shift_check() {
        let (_, pos) = shop();
        assert!(pos.checkout().await.err().unwrap().is_validation());
    }

    #[tokio::test]
    async fn cash_checkout_retires_draft_and_invalidates() {
        let (backend, pos) = shop();
        pos.shifts().open_shift(200_000, None).await.unwrap();
        let mut rx = pos.events().subscribe();
        let sold_id = {
            let mut store = pos.store();
            store.add_product(&product(1, 10_000));
            store.add_product(&product(1, 10_000));
            store.set_discount(5_000);
            store.active_id().map(str::to_string).unwrap()
        };

        let Checkout::Paid {
            receipt,
            transaction,
        } = pos.checkout().await.unwrap()
        else {
            panic!("cash checkout should settle immediately");
        };
        assert_eq!(receipt.code.as_deref(), Some("HD0001"));
        assert_eq!(receipt.total, 15_000);
        assert_eq!(transaction.status, TransactionStatus::Completed);
        assert_eq!(transaction.total, 15_000);

        let store = pos.store();
        assert_eq!(store.len(), 1);
        assert_ne!(store.active_id(), Some(sold_id.as_str()));
        assert!(store.active().unwrap().is_empty());
        drop(store);

        let events = drain(&mut rx);
        assert!(matches!(
            events[0],
            PosEvent::PaymentSettled {
                method: PaymentMethod::Cash,
                total: 15_000,
                ..
            }
        ));
        for key in SALE_INVALIDATES {
            assert!(events.contains(&PosEvent::Invalidated(*key)));
        }
        assert!(!events.contains(&PosEvent::Invalidated(CacheKey::Shifts)));
        assert_eq!(backend.orders.lock().unwrap()[0].items[0].quantity, 2);
    }

    #[tokio::test]
    async fn failed_cash_checkout_keeps_the_cart() {
        let (backend, pos) = shop();
        pos.shifts().open_shift(0, None).await.unwrap();
        backend.fail_orders.store(true, Ordering::SeqCst);
        pos.store().add_product(&product(2, 7_000));

        assert!(matches!(pos.checkout().await, Err(PosError::Api { status: 500, .. })));
        let tx = pos.active_transaction().unwrap();
        assert_eq!(tx.total, 7_000);
        assert_eq!(tx.status, TransactionStatus::Draft);
    }

    #[tokio::test(start_paused = true)]
    async fn transfer_checkout_completes_after_match() {
        let (backend, pos) = shop();
        pos.shifts().open_shift(0, None).await.unwrap();
        {
            let mut store = pos.store();
            store.add_product(&product(3, 45_000));
            store.set_payment_method(PaymentMethod::Transfer);
        }

        let Checkout::AwaitingTransfer(attempt) = pos.checkout().await.unwrap() else {
            panic!("transfer checkout should wait for the bank");
        };
        let session = attempt.session().clone();
        assert!(session.qr_url().starts_with("https://img.vietqr.io/image/VCB-0011223344-"));
        backend.feed.lock().unwrap().push(BankTransaction {
            id: "ft1".into(),
            amount: 45_000,
            description: format!("IBFT {}", session.reference()),
            occurred_at: None,
        });

        let outcome = pos.finish_transfer(attempt).await.unwrap();
        assert!(matches!(outcome, PaymentOutcome::Success(_)));
        assert!(pos.active_transaction().unwrap().is_empty());
        assert_eq!(backend.orders.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_transfer_keeps_the_cart() {
        let (backend, pos) = shop();
        pos.shifts().open_shift(0, None).await.unwrap();
        {
            let mut store = pos.store();
            store.add_product(&product(3, 45_000));
            store.set_payment_method(PaymentMethod::Transfer);
        }
        let Checkout::AwaitingTransfer(attempt) = pos.checkout().await.unwrap() else {
            panic!("transfer checkout should wait for the bank");
        };
        let session = attempt.session().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            session.close();
        });

        assert_eq!(pos.finish_transfer(attempt).await.unwrap(), PaymentOutcome::Cancelled);
        assert_eq!(pos.active_transaction().unwrap().total, 45_000);
        assert!(backend.orders.lock().unwrap().is_empty());

        pos.store().add_product(&product(4, 5_000));
        let tx = pos.active_transaction().unwrap();
        assert_eq!(tx.status, TransactionStatus::Draft);
        assert_eq!(tx.total, 50_000);
    }

    #[tokio::test(start_paused = true)]
    async fn edits_while_qr_is_up_are_not_lost() {
        let (backend, pos) = shop();
        pos.shifts().open_shift(0, None).await.unwrap();
        {
            let mut store = pos.store();
            store.add_product(&product(3, 45_000));
            store.set_payment_method(PaymentMethod::Transfer);
        }
        let Checkout::AwaitingTransfer(attempt) = pos.checkout().await.unwrap() else {
            panic!("transfer checkout should wait for the bank");
        };
        let tab = attempt.transaction_id().to_string();
        assert_eq!(pos.active_transaction().unwrap().status, TransactionStatus::Pending);
        assert_eq!(pos.checkout().await.err(), Some(PosError::PaymentBusy));

        pos.store().add_product(&product(4, 9_000));
        pos.store().set_discount(1_000);
        let frozen = pos.store().get(&tab).cloned().unwrap();
        assert_eq!(frozen.items.len(), 1);
        assert_eq!(frozen.total, 45_000);

        backend.feed.lock().unwrap().push(BankTransaction {
            id: "ft2".into(),
            amount: 45_000,
            description: attempt.session().reference().to_string(),
            occurred_at: None,
        });
        assert!(matches!(
            pos.finish_transfer(attempt).await.unwrap(),
            PaymentOutcome::Success(_)
        ));

        let orders = backend.orders.lock().unwrap().clone();
        assert_eq!(orders.len(), 1);
        let ordered: Vec<i64> = orders[0].items.iter().map(|l| l.product_id).collect();
        assert_eq!(ordered, vec![3]);
        assert!(pos.store().get(&tab).is_none());
    }

    #[tokio::test]
    async fn abandoned_transfer_unfreezes_the_draft() {
        let (_, pos) = shop();
        pos.shifts().open_shift(0, None).await.unwrap();
        {
            let mut store = pos.store();
            store.add_product(&product(3, 45_000));
            store.set_payment_method(PaymentMethod::Transfer);
        }
        let Checkout::AwaitingTransfer(attempt) = pos.checkout().await.unwrap() else {
            panic!("transfer checkout should wait for the bank");
        };
        let session = attempt.session().clone();
        pos.abandon_transfer(attempt);

        assert_eq!(pos.active_transaction().unwrap().status, TransactionStatus::Draft);
        assert_eq!(session.status(), SessionStatus::Cancelled);
        assert!(!pos.payments().transfer_in_progress());
        assert_eq!(pos.payments().state(), PaymentState::Cancelled);
    }
}
