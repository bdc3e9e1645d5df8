//! Retail POS core.
//!
//! Headless engine behind the counter UI: multi-tab draft carts, debounced
//! catalog and customer search, cash and bank-transfer (VietQR) checkout
//! with polling, timeout and cancellation, and the cash-register shift
//! lifecycle. The UI shell drives [`PointOfSale`] and listens on its
//! [`EventBus`] for views to refetch, settled payments and audio to play.

pub mod api;
pub mod backend;
pub mod bank_feed;
pub mod config;
mod data_helpers;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod payment;
pub mod pos;
pub mod qr;
pub mod search;
pub mod shifts;
pub mod storage;
pub mod transactions;
pub mod voice;

pub use config::PosConfig;
pub use error::{PosError, Result};
pub use events::{CacheKey, EventBus, PosEvent};
pub use logging::init_logging;
pub use models::{
    Customer, Money, OrderReceipt, PaymentMethod, Product, Shift, ShiftStatus, Transaction,
    TransactionItem, TransactionStatus,
};
pub use payment::{PaymentOutcome, PaymentState, QrSession, SessionStatus, TransferAttempt};
pub use pos::{Checkout, HttpBackend, PointOfSale};
pub use search::{keyword_channel, SearchResults};
pub use shifts::ShiftPhase;
pub use transactions::{create_walk_in_customer, TransactionStore};
