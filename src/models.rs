//! Wire and domain types shared by the store, the API client and the
//! payment/shift flows.
//!
//! Money is whole đồng carried as `i64`. Backend payloads are camelCase and
//! not always consistent about numeric encodings, so ids and amounts go
//! through tolerant deserializers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub type Money = i64;

// ---------------------------------------------------------------------------
// Tolerant field decoding
// ---------------------------------------------------------------------------

/// Read a money amount from a JSON number (integer or float) or a numeric
/// string. Fractions are rounded to the nearest đồng.
pub(crate) fn money_from_value(v: &Value) -> Option<Money> {
    match v {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| trimmed.parse::<f64>().ok().map(|f| f.round() as i64))
        }
        _ => None,
    }
}

/// Read an id that the backend may send either as a number or a string.
pub(crate) fn id_from_value(v: &Value) -> Option<String> {
    match v {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

fn de_money<'de, D: Deserializer<'de>>(d: D) -> Result<Money, D::Error> {
    let v = Value::deserialize(d)?;
    if v.is_null() {
        return Ok(0);
    }
    money_from_value(&v).ok_or_else(|| serde::de::Error::custom(format!("invalid amount: {v}")))
}

fn de_opt_money<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Money>, D::Error> {
    let v = Value::deserialize(d)?;
    if v.is_null() {
        return Ok(None);
    }
    money_from_value(&v)
        .map(Some)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid amount: {v}")))
}

fn de_id<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    let v = Value::deserialize(d)?;
    id_from_value(&v).ok_or_else(|| serde::de::Error::custom(format!("invalid id: {v}")))
}

// ---------------------------------------------------------------------------
// Catalog and customers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(deserialize_with = "de_money", alias = "price")]
    pub sell_price: Money,
    /// Units on hand.
    #[serde(default)]
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(alias = "fullName")]
    pub name: String,
    #[serde(alias = "phoneNumber")]
    pub phone: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    /// Created at the counter without a backend record.
    #[serde(default)]
    pub local: bool,
}

// ---------------------------------------------------------------------------
// Draft transactions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    #[default]
    Cash,
    Transfer,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "CASH",
            PaymentMethod::Transfer => "TRANSFER",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    #[default]
    Draft,
    /// Checkout in progress; the cart is frozen until the payment resolves.
    Pending,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionItem {
    pub id: String,
    pub product_id: i64,
    pub name: String,
    pub image: Option<String>,
    pub quantity: i64,
    /// Unit price captured when the product was added.
    pub price: Money,
    pub total: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub items: Vec<TransactionItem>,
    pub customer: Option<Customer>,
    pub payment_method: PaymentMethod,
    pub subtotal: Money,
    pub discount: Money,
    pub total: Money,
    /// Cash handed over by the customer.
    pub payment_amount: Money,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn item_count(&self) -> i64 {
        self.items.iter().map(|i| i.quantity).sum()
    }

    pub fn change_due(&self) -> Money {
        (self.payment_amount - self.total).max(0)
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub product_id: i64,
    pub quantity: i64,
    pub sell_price: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    pub payment_method: PaymentMethod,
    pub items: Vec<OrderLine>,
    /// Amount owed after discount. The backend derives its own, so this is
    /// not sent; it is the receipt total when the response omits one.
    #[serde(skip)]
    pub total: Money,
}

impl OrderRequest {
    /// Build the order-creation body for a draft. Counter-created customers
    /// have no backend record, so their id is not sent.
    pub fn from_transaction(tx: &Transaction, method: PaymentMethod) -> Self {
        let customer_id = tx
            .customer
            .as_ref()
            .filter(|c| !c.local)
            .map(|c| c.id.clone());
        OrderRequest {
            customer_id,
            payment_method: method,
            items: tx
                .items
                .iter()
                .map(|i| OrderLine {
                    product_id: i.product_id,
                    quantity: i.quantity,
                    sell_price: i.price,
                })
                .collect(),
            total: tx.total,
        }
    }
}

/// Result of a successful settlement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderReceipt {
    pub order_id: String,
    pub code: Option<String>,
    pub total: Money,
    pub payment_method: PaymentMethod,
    pub raw: Value,
}

// ---------------------------------------------------------------------------
// Shifts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ShiftStatus {
    Open,
    Closed,
}

impl From<String> for ShiftStatus {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "OPEN" | "ACTIVE" | "OPENED" => ShiftStatus::Open,
            _ => ShiftStatus::Closed,
        }
    }
}

impl From<ShiftStatus> for String {
    fn from(status: ShiftStatus) -> String {
        match status {
            ShiftStatus::Open => "OPEN".into(),
            ShiftStatus::Closed => "CLOSED".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shift {
    pub id: i64,
    #[serde(default, alias = "userName", alias = "staffName")]
    pub operator: Option<String>,
    #[serde(default, alias = "startedAt")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, alias = "endedAt")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "de_money")]
    pub start_cash: Money,
    #[serde(default, deserialize_with = "de_opt_money")]
    pub end_cash: Option<Money>,
    #[serde(default, deserialize_with = "de_opt_money")]
    pub expected_cash: Option<Money>,
    #[serde(default, deserialize_with = "de_opt_money")]
    pub cash_difference: Option<Money>,
    pub status: ShiftStatus,
    #[serde(default, deserialize_with = "de_money")]
    pub total_revenue: Money,
    #[serde(default, deserialize_with = "de_money")]
    pub cash_revenue: Money,
    #[serde(default, deserialize_with = "de_money")]
    pub transfer_revenue: Money,
    #[serde(default, alias = "totalOrders")]
    pub order_count: i64,
    #[serde(default)]
    pub note: Option<String>,
}

impl Shift {
    pub fn is_open(&self) -> bool {
        self.status == ShiftStatus::Open
    }
}

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn empty(page: u32, page_size: u32) -> Self {
        Page {
            items: Vec::new(),
            page,
            page_size,
            total: 0,
        }
    }

    pub fn has_next_page(&self) -> bool {
        (self.page as u64) * (self.page_size as u64) < self.total
    }
}
