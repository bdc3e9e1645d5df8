//! Draft transaction ("tab") store for the sales counter.
//!
//! Holds every open draft invoice in tab order plus the id of the active one.
//! All mutations are synchronous and recompute totals before returning, so a
//! caller never observes a transaction whose `subtotal`/`total` disagree with
//! its lines. Keep it that way: nothing in here may await.

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::data_helpers::normalize_phone;
use crate::error::{PosError, Result};
use crate::models::{
    Customer, Money, PaymentMethod, Product, Transaction, TransactionItem, TransactionStatus,
};

#[derive(Debug, Clone)]
pub struct TransactionStore {
    transactions: Vec<Transaction>,
    active_id: Option<String>,
}

impl Default for TransactionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionStore {
    /// Create a store with one empty draft already active.
    pub fn new() -> Self {
        let mut store = Self::empty();
        store.create_transaction();
        store
    }

    /// Create a store with no drafts at all.
    pub fn empty() -> Self {
        TransactionStore {
            transactions: Vec::new(),
            active_id: None,
        }
    }

    // -----------------------------------------------------------------------
    // Tabs
    // -----------------------------------------------------------------------

    /// Insert an empty draft and make it active. Returns its id.
    pub fn create_transaction(&mut self) -> String {
        let id = Uuid::new_v4().to_string();
        self.transactions.push(Transaction {
            id: id.clone(),
            items: Vec::new(),
            customer: None,
            payment_method: PaymentMethod::Cash,
            subtotal: 0,
            discount: 0,
            total: 0,
            payment_amount: 0,
            status: TransactionStatus::Draft,
            created_at: Utc::now(),
        });
        self.active_id = Some(id.clone());
        debug!(transaction_id = %id, tabs = self.transactions.len(), "draft created");
        id
    }

    pub fn set_active(&mut self, id: &str) -> Result<()> {
        if self.get(id).is_none() {
            return Err(PosError::NotFound(format!("transaction {id}")));
        }
        self.active_id = Some(id.to_string());
        Ok(())
    }

    /// Delete a draft. When it was the active one, the first remaining draft
    /// becomes active (or none when the store is now empty).
    pub fn remove_transaction(&mut self, id: &str) -> Option<Transaction> {
        let idx = self.transactions.iter().position(|t| t.id == id)?;
        let removed = self.transactions.remove(idx);
        if self.active_id.as_deref() == Some(id) {
            self.active_id = self.transactions.first().map(|t| t.id.clone());
        }
        debug!(transaction_id = %id, tabs = self.transactions.len(), "draft removed");
        Some(removed)
    }

    /// Close a tab from the counter. The last remaining tab cannot be closed.
    pub fn close_tab(&mut self, id: &str) -> Result<Transaction> {
        if self.get(id).is_none() {
            return Err(PosError::NotFound(format!("transaction {id}")));
        }
        if self.get(id).is_some_and(|t| t.status == TransactionStatus::Pending) {
            return Err(PosError::PaymentBusy);
        }
        if self.transactions.len() <= 1 {
            return Err(PosError::validation(
                "At least one open transaction is required",
            ));
        }
        self.remove_transaction(id)
            .ok_or_else(|| PosError::NotFound(format!("transaction {id}")))
    }

    /// Retire a settled draft. A fresh empty draft is created when this was
    /// the last one so the counter always has a tab to work in.
    pub fn complete_transaction(&mut self, id: &str) -> Option<Transaction> {
        let mut done = self.remove_transaction(id)?;
        done.status = TransactionStatus::Completed;
        if self.transactions.is_empty() {
            self.create_transaction();
        }
        info!(transaction_id = %id, total = done.total, "draft completed");
        Some(done)
    }

    /// Freeze a draft for checkout and return the snapshot being paid. Edits
    /// to a pending draft are ignored until [`Self::release_payment`].
    pub fn begin_payment(&mut self, id: &str) -> Result<Transaction> {
        let tx = self
            .transactions
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| PosError::NotFound(format!("transaction {id}")))?;
        if tx.status == TransactionStatus::Pending {
            return Err(PosError::PaymentBusy);
        }
        tx.status = TransactionStatus::Pending;
        debug!(transaction_id = %id, total = tx.total, "draft frozen for payment");
        Ok(tx.clone())
    }

    /// Make a pending draft editable again after a payment that did not go
    /// through.
    pub fn release_payment(&mut self, id: &str) {
        if let Some(tx) = self
            .transactions
            .iter_mut()
            .find(|t| t.id == id && t.status == TransactionStatus::Pending)
        {
            tx.status = TransactionStatus::Draft;
            debug!(transaction_id = %id, "draft released");
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn active_id(&self) -> Option<&str> {
        self.active_id.as_deref()
    }

    pub fn active(&self) -> Option<&Transaction> {
        let id = self.active_id.as_deref()?;
        self.get(id)
    }

    pub fn get(&self, id: &str) -> Option<&Transaction> {
        self.transactions.iter().find(|t| t.id == id)
    }

    /// Drafts in tab order.
    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    // -----------------------------------------------------------------------
    // Active-draft mutations (no-op without an active draft, or while the
    // active draft is pending payment)
    // -----------------------------------------------------------------------

    fn active_mut(&mut self) -> Option<&mut Transaction> {
        let id = self.active_id.clone()?;
        let tx = self.transactions.iter_mut().find(|t| t.id == id)?;
        if tx.status == TransactionStatus::Pending {
            warn!(transaction_id = %id, "draft is awaiting payment, edit ignored");
            return None;
        }
        Some(tx)
    }

    pub fn add_product(&mut self, product: &Product) {
        let Some(tx) = self.active_mut() else {
            return;
        };
        match tx.items.iter_mut().find(|i| i.product_id == product.id) {
            Some(line) => {
                line.quantity += 1;
                line.total = line.price * line.quantity;
            }
            None => tx.items.push(TransactionItem {
                id: Uuid::new_v4().to_string(),
                product_id: product.id,
                name: product.name.clone(),
                image: product.image.clone(),
                quantity: 1,
                price: product.sell_price,
                total: product.sell_price,
            }),
        }
        recompute(tx);
    }

    /// Set a line's quantity. Zero or less removes the line.
    pub fn update_quantity(&mut self, product_id: i64, quantity: i64) {
        if quantity <= 0 {
            self.remove_product(product_id);
            return;
        }
        let Some(tx) = self.active_mut() else {
            return;
        };
        if let Some(line) = tx.items.iter_mut().find(|i| i.product_id == product_id) {
            line.quantity = quantity;
            line.total = line.price * quantity;
            recompute(tx);
        }
    }

    pub fn remove_product(&mut self, product_id: i64) {
        let Some(tx) = self.active_mut() else {
            return;
        };
        tx.items.retain(|i| i.product_id != product_id);
        recompute(tx);
    }

    pub fn set_customer(&mut self, customer: Option<Customer>) {
        if let Some(tx) = self.active_mut() {
            tx.customer = customer;
        }
    }

    pub fn set_payment_method(&mut self, method: PaymentMethod) {
        if let Some(tx) = self.active_mut() {
            tx.payment_method = method;
        }
    }

    pub fn set_discount(&mut self, discount: Money) {
        if let Some(tx) = self.active_mut() {
            tx.discount = discount.max(0);
            recompute(tx);
        }
    }

    pub fn set_payment_amount(&mut self, amount: Money) {
        if let Some(tx) = self.active_mut() {
            tx.payment_amount = amount.max(0);
        }
    }
}

fn recompute(tx: &mut Transaction) {
    tx.subtotal = tx.items.iter().map(|i| i.total).sum();
    tx.total = (tx.subtotal - tx.discount).max(0);
}

/// Build a customer typed in at the counter. No backend record is created;
/// the id is the current unix time in milliseconds and `local` is set so the
/// order request leaves it out.
pub fn create_walk_in_customer(name: &str, phone: &str) -> Result<Customer> {
    let name = name.trim();
    let phone = normalize_phone(phone);
    if name.is_empty() {
        return Err(PosError::validation("Customer name is required"));
    }
    if phone.is_empty() {
        return Err(PosError::validation("Customer phone is required"));
    }
    Ok(Customer {
        id: Utc::now().timestamp_millis().to_string(),
        name: name.to_string(),
        phone,
        email: None,
        address: None,
        local: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn product(id: i64, price: Money) -> Product {
        Product {
            id,
            name: format!("product-{id}"),
            image: None,
            sell_price: price,
            quantity: 100,
        }
    }

    fn assert_totals(tx: &Transaction) {
        let expected: Money = tx.items.iter().map(|i| i.quantity * i.price).sum();
        assert_eq!(tx.subtotal, expected);
        assert_eq!(tx.total, (tx.subtotal - tx.discount).max(0));
        for line in &tx.items {
            assert!(line.quantity >= 1);
            assert_eq!(line.total, line.price * line.quantity);
        }
    }

    #[test]
    fn new_store_bootstraps_one_active_draft() {
        let store = TransactionStore::new();
        assert_eq!(store.len(), 1);
        let active = store.active().expect("active draft");
        assert!(active.is_empty());
        assert_eq!(active.status, TransactionStatus::Draft);
    }

    #[test]
    fn add_twice_merges_and_discount_applies() {
        let mut store = TransactionStore::new();
        let p = product(1, 10_000);

        store.add_product(&p);
        let tx = store.active().unwrap();
        assert_eq!(tx.items.len(), 1);
        assert_eq!(tx.items[0].quantity, 1);
        assert_eq!(tx.items[0].total, 10_000);
        assert_eq!(tx.subtotal, 10_000);

        store.add_product(&p);
        let tx = store.active().unwrap();
        assert_eq!(tx.items.len(), 1);
        assert_eq!(tx.items[0].quantity, 2);
        assert_eq!(tx.items[0].total, 20_000);
        assert_eq!(tx.subtotal, 20_000);

        store.set_discount(5_000);
        assert_eq!(store.active().unwrap().total, 15_000);
    }

    #[test]
    fn discount_larger_than_subtotal_floors_at_zero() {
        let mut store = TransactionStore::new();
        store.add_product(&product(1, 10_000));
        store.set_discount(50_000);
        assert_eq!(store.active().unwrap().total, 0);
        store.set_discount(-10);
        assert_eq!(store.active().unwrap().discount, 0);
    }

    #[test]
    fn price_snapshot_survives_catalog_change() {
        let mut store = TransactionStore::new();
        store.add_product(&product(1, 10_000));
        store.add_product(&product(1, 12_000));
        let tx = store.active().unwrap();
        assert_eq!(tx.items[0].price, 10_000);
        assert_eq!(tx.subtotal, 20_000);
    }

    #[test]
    fn zero_quantity_removes_line() {
        let mut store = TransactionStore::new();
        store.add_product(&product(1, 10_000));
        store.add_product(&product(2, 3_000));
        store.update_quantity(1, 4);
        assert_eq!(store.active().unwrap().subtotal, 43_000);
        store.update_quantity(1, 0);
        let tx = store.active().unwrap();
        assert_eq!(tx.items.len(), 1);
        assert_eq!(tx.subtotal, 3_000);
    }

    #[test]
    fn mutations_without_active_draft_are_noops() {
        let mut store = TransactionStore::empty();
        store.add_product(&product(1, 10_000));
        store.set_discount(100);
        store.set_payment_method(PaymentMethod::Transfer);
        assert!(store.is_empty());
        assert!(store.active().is_none());
    }

    #[test]
    fn removing_active_rotates_to_first_remaining() {
        let mut store = TransactionStore::new();
        let first = store.active_id().unwrap().to_string();
        let second = store.create_transaction();
        let third = store.create_transaction();
        assert_eq!(store.active_id(), Some(third.as_str()));

        store.remove_transaction(&third);
        assert_eq!(store.active_id(), Some(first.as_str()));

        store.set_active(&second).unwrap();
        store.remove_transaction(&first);
        assert_eq!(store.active_id(), Some(second.as_str()));

        store.remove_transaction(&second);
        assert!(store.active_id().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn removing_inactive_keeps_active() {
        let mut store = TransactionStore::new();
        let first = store.active_id().unwrap().to_string();
        let second = store.create_transaction();
        store.remove_transaction(&first);
        assert_eq!(store.active_id(), Some(second.as_str()));
    }

    #[test]
    fn close_tab_refuses_last_draft() {
        let mut store = TransactionStore::new();
        let only = store.active_id().unwrap().to_string();
        assert!(store.close_tab(&only).unwrap_err().is_validation());
        let other = store.create_transaction();
        store.close_tab(&other).unwrap();
        assert_eq!(store.len(), 1);
        assert!(matches!(store.close_tab("missing"), Err(PosError::NotFound(_))));
    }

    #[test]
    fn completing_last_draft_bootstraps_a_new_one() {
        let mut store = TransactionStore::new();
        store.add_product(&product(1, 10_000));
        let id = store.active_id().unwrap().to_string();
        let done = store.complete_transaction(&id).unwrap();
        assert_eq!(done.status, TransactionStatus::Completed);
        assert_eq!(store.len(), 1);
        let fresh = store.active().unwrap();
        assert_ne!(fresh.id, id);
        assert!(fresh.is_empty());
    }

    #[test]
    fn setters_touch_only_the_active_draft() {
        let mut store = TransactionStore::new();
        let first = store.active_id().unwrap().to_string();
        store.create_transaction();
        store.set_payment_method(PaymentMethod::Transfer);
        store.set_payment_amount(200_000);
        assert_eq!(store.get(&first).unwrap().payment_method, PaymentMethod::Cash);
        assert_eq!(store.active().unwrap().payment_amount, 200_000);
        assert!(store.set_active("nope").is_err());
    }

    #[test]
    fn walk_in_customer_requires_name_and_phone() {
        let c = create_walk_in_customer(" Minh ", "090-123-4567").unwrap();
        assert!(c.local);
        assert_eq!(c.name, "Minh");
        assert_eq!(c.phone, "0901234567");
        assert!(create_walk_in_customer("", "0901").is_err());
        assert!(create_walk_in_customer("Minh", "abc").is_err());
    }

    #[test]
    fn pending_draft_is_frozen_until_released() {
        let mut store = TransactionStore::new();
        store.add_product(&product(1, 10_000));
        let id = store.active_id().unwrap().to_string();
        store.create_transaction();
        store.set_active(&id).unwrap();

        let snapshot = store.begin_payment(&id).unwrap();
        assert_eq!(snapshot.status, TransactionStatus::Pending);
        assert_eq!(store.begin_payment(&id).unwrap_err(), PosError::PaymentBusy);
        assert_eq!(store.close_tab(&id).unwrap_err(), PosError::PaymentBusy);

        store.add_product(&product(2, 5_000));
        store.update_quantity(1, 3);
        store.set_discount(1_000);
        let frozen = store.get(&id).unwrap();
        assert_eq!(frozen.items, snapshot.items);
        assert_eq!(frozen.total, 10_000);

        store.release_payment(&id);
        store.add_product(&product(2, 5_000));
        let edited = store.get(&id).unwrap();
        assert_eq!(edited.status, TransactionStatus::Draft);
        assert_eq!(edited.total, 15_000);
        assert!(matches!(store.begin_payment("missing"), Err(PosError::NotFound(_))));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(i64),
        Update(i64, i64),
        Remove(i64),
        Discount(Money),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1i64..6).prop_map(Op::Add),
            (1i64..6, -2i64..8).prop_map(|(p, q)| Op::Update(p, q)),
            (1i64..6).prop_map(Op::Remove),
            (-5_000i64..80_000).prop_map(Op::Discount),
        ]
    }

    proptest! {
        #[test]
        fn totals_hold_after_every_operation(ops in prop::collection::vec(op_strategy(), 0..40)) {
            let mut store = TransactionStore::new();
            for op in ops {
                match op {
                    Op::Add(id) => store.add_product(&product(id, id * 1_000)),
                    Op::Update(id, q) => store.update_quantity(id, q),
                    Op::Remove(id) => store.remove_product(id),
                    Op::Discount(d) => store.set_discount(d),
                }
                assert_totals(store.active().unwrap());
            }
        }
    }
}
