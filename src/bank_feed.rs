//! Client for the bank's "latest transactions" feed (SePay-style user API).
//!
//! The feed is polled while a transfer QR is on screen. Providers disagree on
//! field names, so rows are read through alias lists rather than a fixed
//! struct.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::api::{api_error, friendly_error};
use crate::backend::{BankFeed, BankTransaction};
use crate::config::{BankFeedConfig, Secret};
use crate::data_helpers::{value_id, value_money, value_str};
use crate::error::{PosError, Result};

const FEED_TIMEOUT: Duration = Duration::from_secs(10);
const FEED_LIMIT: u32 = 20;

const AMOUNT_KEYS: &[&str] = &["amount_in", "amountIn", "amount", "transferAmount"];
const DESCRIPTION_KEYS: &[&str] = &["transaction_content", "content", "description"];
const ID_KEYS: &[&str] = &["id", "reference_number", "referenceCode", "tid"];
const DATE_KEYS: &[&str] = &["transaction_date", "transactionDate", "when"];

#[derive(Clone)]
pub struct BankFeedClient {
    http: Client,
    url: String,
    token: Secret,
}

impl BankFeedClient {
    pub fn new(config: &BankFeedConfig) -> Result<Self> {
        if config.url.trim().is_empty() {
            return Err(PosError::Config("bankFeed.url is required".into()));
        }
        let http = Client::builder()
            .timeout(FEED_TIMEOUT)
            .build()
            .map_err(|e| PosError::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(BankFeedClient {
            http,
            url: config.url.trim().to_string(),
            token: config.token.clone(),
        })
    }
}

impl BankFeed for BankFeedClient {
    async fn latest_transactions(&self) -> Result<Vec<BankTransaction>> {
        let mut req = self
            .http
            .get(&self.url)
            .query(&[("limit", FEED_LIMIT.to_string())]);
        if !self.token.is_empty() {
            req = req.bearer_auth(self.token.expose());
        }
        let resp = req.send().await.map_err(|e| friendly_error(&self.url, &e))?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(api_error(status, &text));
        }
        let body: Value = serde_json::from_str(&text)
            .map_err(|e| PosError::invalid_response("bank feed", e))?;
        let rows = parse_bank_transactions(&body)?;
        debug!(rows = rows.len(), "bank feed fetched");
        Ok(rows)
    }
}

/// Extract feed rows from `{transactions: [...]}`, `{data: [...]}`,
/// `{data: {records: [...]}}` or a bare array. Rows without an amount are
/// skipped.
pub fn parse_bank_transactions(body: &Value) -> Result<Vec<BankTransaction>> {
    let rows = body
        .get("transactions")
        .or_else(|| body.get("data").and_then(|d| d.get("records")))
        .or_else(|| body.get("data"))
        .unwrap_or(body);
    let rows = rows
        .as_array()
        .ok_or_else(|| PosError::invalid_response("bank feed", "no transaction list"))?;

    Ok(rows
        .iter()
        .filter_map(|row| {
            let amount = value_money(row, AMOUNT_KEYS)?;
            Some(BankTransaction {
                id: value_id(row, ID_KEYS).unwrap_or_default(),
                amount,
                description: value_str(row, DESCRIPTION_KEYS).unwrap_or_default(),
                occurred_at: value_str(row, DATE_KEYS),
            })
        })
        .collect())
}
