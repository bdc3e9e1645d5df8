//! Seams between the sales flows and the remote services they call.
//!
//! The HTTP implementations live in [`crate::api`], [`crate::bank_feed`] and
//! [`crate::voice`]; tests substitute in-memory fakes.

use std::future::Future;

use serde_json::Value;

use crate::error::Result;
use crate::models::{Customer, Money, OrderReceipt, OrderRequest, Page, Product, Shift};

/// Order creation plus the catalog/customer lookups feeding the cart.
pub trait SalesBackend: Send + Sync {
    fn create_order(&self, order: &OrderRequest)
        -> impl Future<Output = Result<OrderReceipt>> + Send;

    fn search_products(
        &self,
        keyword: &str,
        page: u32,
        limit: u32,
    ) -> impl Future<Output = Result<Page<Product>>> + Send;

    fn search_customers(
        &self,
        keyword: &str,
        page: u32,
        limit: u32,
    ) -> impl Future<Output = Result<Page<Customer>>> + Send;

    /// `Ok(None)` when no customer has that phone number.
    fn find_customer_by_phone(
        &self,
        phone: &str,
    ) -> impl Future<Output = Result<Option<Customer>>> + Send;
}

pub trait ShiftBackend: Send + Sync {
    fn open_shift(
        &self,
        start_cash: Money,
        note: Option<&str>,
    ) -> impl Future<Output = Result<Shift>> + Send;

    fn close_shift(
        &self,
        end_cash: Money,
        note: Option<&str>,
    ) -> impl Future<Output = Result<Shift>> + Send;

    /// `Ok(None)` when no shift is open.
    fn current_shift(&self) -> impl Future<Output = Result<Option<Shift>>> + Send;

    fn shift_detail(&self, id: i64) -> impl Future<Output = Result<Shift>> + Send;

    fn shift_orders(
        &self,
        id: i64,
        page: u32,
        limit: u32,
    ) -> impl Future<Output = Result<Page<Value>>> + Send;

    fn list_shifts(&self, page: u32, limit: u32)
        -> impl Future<Output = Result<Page<Shift>>> + Send;
}

/// One incoming transfer as reported by the bank feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankTransaction {
    pub id: String,
    pub amount: Money,
    pub description: String,
    pub occurred_at: Option<String>,
}

/// Third-party feed of the most recent incoming transfers.
pub trait BankFeed: Send + Sync {
    fn latest_transactions(&self) -> impl Future<Output = Result<Vec<BankTransaction>>> + Send;
}

/// Text-to-speech service. Returns a playable audio URL.
pub trait SpeechSynth: Send + Sync {
    fn synthesize(&self, text: &str) -> impl Future<Output = Result<String>> + Send;
}
