//! Store backend API client.
//!
//! Provides authenticated HTTP communication with the store's REST backend:
//! order creation, catalog and customer search, and the shift endpoints.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::backend::{SalesBackend, ShiftBackend};
use crate::config::{PosConfig, Secret};
use crate::data_helpers::{normalize_phone, unwrap_data, value_id, value_money, value_str};
use crate::error::{PosError, Result};
use crate::models::{Customer, Money, OrderReceipt, OrderRequest, Page, Product, Shift};

/// Default timeout for API requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout used specifically for the lightweight connectivity test.
const CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the backend base URL:
/// - strip trailing slashes
/// - strip a trailing `/api` segment
/// - ensure a scheme is present (https, or http for localhost)
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();
    if url.is_empty() {
        return url;
    }

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }

    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

fn decode_connection_string_payload(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') {
        return serde_json::from_str::<Value>(trimmed).ok();
    }

    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.len() < 20 {
        return None;
    }

    let base64 = compact.replace('-', "+").replace('_', "/");
    let padded = format!(
        "{}{}",
        base64,
        "=".repeat((4usize.wrapping_sub(base64.len() % 4)) % 4)
    );
    let decoded = BASE64_STANDARD.decode(padded).ok()?;
    serde_json::from_slice::<Value>(&decoded).ok()
}

pub fn extract_token_from_connection_string(raw: &str) -> Option<String> {
    decode_connection_string_payload(raw).and_then(|v| value_str(&v, &["key", "token"]))
}

pub fn extract_url_from_connection_string(raw: &str) -> Option<String> {
    decode_connection_string_payload(raw)
        .and_then(|v| value_str(&v, &["url", "apiUrl"]))
        .map(|u| normalize_base_url(&u))
        .filter(|s| !s.is_empty())
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a user-friendly error.
pub(crate) fn friendly_error(url: &str, err: &reqwest::Error) -> PosError {
    if err.is_connect() {
        return PosError::Network(format!("Cannot reach {url}"));
    }
    if err.is_timeout() {
        return PosError::Network(format!("Connection to {url} timed out"));
    }
    if err.is_builder() {
        return PosError::Network(format!("Invalid URL: {url}"));
    }
    PosError::Network(format!("Network error communicating with {url}: {err}"))
}

/// Convert an HTTP status code into a user-friendly message.
pub(crate) fn status_message(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "Session expired, please sign in again".to_string(),
        403 => "You do not have permission for this action".to_string(),
        404 => "Endpoint not found".to_string(),
        s if s >= 500 => format!("Server error (HTTP {s})"),
        s => format!("Unexpected response (HTTP {s})"),
    }
}

/// Build the error for a non-success response, preserving the backend's own
/// `message`/`error` text when it sent one.
pub(crate) fn api_error(status: StatusCode, body_text: &str) -> PosError {
    let message = serde_json::from_str::<Value>(body_text)
        .ok()
        .and_then(|json| {
            let msg = json.get("message").or_else(|| json.get("error"))?;
            match msg {
                Value::String(s) => Some(s.clone()),
                Value::Array(parts) => Some(
                    parts
                        .iter()
                        .filter_map(Value::as_str)
                        .collect::<Vec<_>>()
                        .join("; "),
                ),
                _ => None,
            }
        })
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| status_message(status));
    PosError::Api {
        status: status.as_u16(),
        message,
    }
}

// ---------------------------------------------------------------------------
// Response shapes
// ---------------------------------------------------------------------------

/// Parse a paginated listing. Accepts a bare array, `{data: [...], meta}`,
/// `{items, total}` and `{data: {items, total}}`.
pub(crate) fn parse_page<T: DeserializeOwned>(body: Value, page: u32, limit: u32) -> Result<Page<T>> {
    let (rows, meta) = match body {
        Value::Array(rows) => (rows, Value::Null),
        Value::Object(mut obj) => {
            let rows = match obj.remove("data").or_else(|| obj.remove("items")) {
                Some(Value::Array(rows)) => rows,
                Some(Value::Object(mut inner)) => {
                    let rows = match inner.remove("items").or_else(|| inner.remove("data")) {
                        Some(Value::Array(rows)) => rows,
                        _ => Vec::new(),
                    };
                    for (k, v) in inner {
                        obj.entry(k).or_insert(v);
                    }
                    rows
                }
                _ => Vec::new(),
            };
            let meta = match obj.remove("meta") {
                Some(meta) => meta,
                None => match obj.remove("pagination") {
                    Some(meta) => meta,
                    None => Value::Object(obj),
                },
            };
            (rows, meta)
        }
        Value::Null => (Vec::new(), Value::Null),
        other => {
            return Err(PosError::invalid_response(
                "store backend",
                format!("expected a list, got {other}"),
            ))
        }
    };

    let count = rows.len() as u64;
    let items = rows
        .into_iter()
        .map(serde_json::from_value::<T>)
        .collect::<std::result::Result<Vec<T>, _>>()
        .map_err(|e| PosError::invalid_response("store backend", e))?;

    let total = ["total", "totalItems", "totalCount", "count"]
        .iter()
        .find_map(|k| meta.get(*k).and_then(Value::as_u64))
        .unwrap_or_else(|| (page.saturating_sub(1) as u64) * limit as u64 + count);
    let page = ["page", "currentPage"]
        .iter()
        .find_map(|k| meta.get(*k).and_then(Value::as_u64))
        .map(|p| p as u32)
        .unwrap_or(page);

    Ok(Page {
        items,
        page,
        page_size: limit,
        total,
    })
}

fn parse_receipt(body: Value, order: &OrderRequest) -> Result<OrderReceipt> {
    let data = unwrap_data(body);
    let target = data.get("order").cloned().unwrap_or_else(|| data.clone());
    let order_id = value_id(&target, &["id", "orderId", "_id"]).ok_or_else(|| {
        PosError::invalid_response("store backend", "created order has no id")
    })?;
    Ok(OrderReceipt {
        order_id,
        code: value_str(&target, &["code", "invoiceCode", "orderCode"]),
        total: value_money(&target, &["total", "totalAmount", "finalAmount"]).unwrap_or(order.total),
        payment_method: order.payment_method,
        raw: data,
    })
}

fn parse_shift(body: Value) -> Result<Shift> {
    serde_json::from_value(unwrap_data(body))
        .map_err(|e| PosError::invalid_response("store backend", e))
}

// ---------------------------------------------------------------------------
// Connectivity test
// ---------------------------------------------------------------------------

/// Result of a connectivity test.
#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    token: Secret,
}

impl ApiClient {
    pub fn new(base_url: &str, token: Secret) -> Result<Self> {
        let base_url = normalize_base_url(base_url);
        if base_url.is_empty() {
            return Err(PosError::Config("missing API URL".into()));
        }
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| PosError::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(ApiClient {
            http,
            base_url,
            token,
        })
    }

    pub fn from_config(config: &PosConfig) -> Result<Self> {
        Self::new(&config.api_url, config.api_token.clone())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Lightweight health check against `/api/health`.
    pub async fn test_connectivity(&self) -> ConnectivityResult {
        let start = Instant::now();
        let resp = match self
            .http
            .get(format!("{}/api/health", self.base_url))
            .timeout(CONNECTIVITY_TIMEOUT)
            .bearer_auth(self.token.expose())
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return ConnectivityResult {
                    success: false,
                    latency_ms: None,
                    error: Some(friendly_error(&self.base_url, &e).to_string()),
                };
            }
        };

        let latency = start.elapsed().as_millis() as u64;
        let status = resp.status();
        if status.is_success() {
            info!(latency_ms = latency, "connectivity test passed");
            ConnectivityResult {
                success: true,
                latency_ms: Some(latency),
                error: None,
            }
        } else {
            ConnectivityResult {
                success: false,
                latency_ms: Some(latency),
                error: Some(status_message(status)),
            }
        }
    }

    /// Perform an authenticated request. `path` includes the leading slash,
    /// e.g. `/api/orders`. Returns `Value::Null` for empty bodies.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value> {
        let full_url = format!("{}{path}", self.base_url);
        let mut req = self
            .http
            .request(method.clone(), &full_url)
            .header("Accept", "application/json");
        if !self.token.is_empty() {
            req = req.bearer_auth(self.token.expose());
        }
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(b) = body {
            req = req.json(b);
        }

        let started = Instant::now();
        let resp = req
            .send()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();
        debug!(
            %method,
            path,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "backend request"
        );

        if !status.is_success() {
            return Err(api_error(status, &body_text));
        }
        if body_text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body_text)
            .map_err(|e| PosError::invalid_response("store backend", e))
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        self.request(Method::GET, path, query, None).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        self.request(Method::POST, path, &[], Some(body)).await
    }
}

fn search_query(keyword: &str, page: u32, limit: u32) -> Vec<(&'static str, String)> {
    vec![
        ("keyword", keyword.trim().to_string()),
        ("page", page.to_string()),
        ("limit", limit.to_string()),
    ]
}

fn page_query(page: u32, limit: u32) -> Vec<(&'static str, String)> {
    vec![("page", page.to_string()), ("limit", limit.to_string())]
}

fn shift_body(cash_key: &str, cash: Money, note: Option<&str>) -> Value {
    let mut body = serde_json::Map::new();
    body.insert(cash_key.to_string(), Value::from(cash));
    if let Some(note) = note.map(str::trim).filter(|n| !n.is_empty()) {
        body.insert("note".to_string(), Value::String(note.to_string()));
    }
    Value::Object(body)
}

impl SalesBackend for ApiClient {
    async fn create_order(&self, order: &OrderRequest) -> Result<OrderReceipt> {
        let body = serde_json::to_value(order)
            .map_err(|e| PosError::validation(format!("order body: {e}")))?;
        let resp = self.post("/api/orders", &body).await?;
        let receipt = parse_receipt(resp, order)?;
        info!(
            order_id = %receipt.order_id,
            method = order.payment_method.as_str(),
            total = receipt.total,
            "order created"
        );
        Ok(receipt)
    }

    async fn search_products(&self, keyword: &str, page: u32, limit: u32) -> Result<Page<Product>> {
        let resp = self
            .get("/api/products", &search_query(keyword, page, limit))
            .await?;
        parse_page(resp, page, limit)
    }

    async fn search_customers(
        &self,
        keyword: &str,
        page: u32,
        limit: u32,
    ) -> Result<Page<Customer>> {
        let resp = self
            .get("/api/customers", &search_query(keyword, page, limit))
            .await?;
        parse_page(resp, page, limit)
    }

    async fn find_customer_by_phone(&self, phone: &str) -> Result<Option<Customer>> {
        let phone = normalize_phone(phone);
        if phone.is_empty() {
            return Err(PosError::validation("Missing phone"));
        }
        match self.get(&format!("/api/customers/phone/{phone}"), &[]).await {
            Ok(Value::Null) => Ok(None),
            Ok(body) => match unwrap_data(body) {
                Value::Null => Ok(None),
                data => serde_json::from_value(data)
                    .map(Some)
                    .map_err(|e| PosError::invalid_response("store backend", e)),
            },
            Err(PosError::Api { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl ShiftBackend for ApiClient {
    async fn open_shift(&self, start_cash: Money, note: Option<&str>) -> Result<Shift> {
        let resp = self
            .post("/api/shifts/open", &shift_body("startCash", start_cash, note))
            .await?;
        parse_shift(resp)
    }

    async fn close_shift(&self, end_cash: Money, note: Option<&str>) -> Result<Shift> {
        let resp = self
            .post("/api/shifts/close", &shift_body("endCash", end_cash, note))
            .await?;
        parse_shift(resp)
    }

    async fn current_shift(&self) -> Result<Option<Shift>> {
        match self.get("/api/shifts/current", &[]).await {
            Ok(body) => match unwrap_data(body) {
                Value::Null => Ok(None),
                data => {
                    let shift: Shift = serde_json::from_value(data)
                        .map_err(|e| PosError::invalid_response("store backend", e))?;
                    Ok(shift.is_open().then_some(shift))
                }
            },
            Err(PosError::Api { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn shift_detail(&self, id: i64) -> Result<Shift> {
        let resp = self.get(&format!("/api/shifts/{id}"), &[]).await?;
        parse_shift(resp)
    }

    async fn shift_orders(&self, id: i64, page: u32, limit: u32) -> Result<Page<Value>> {
        let resp = self
            .get(&format!("/api/shifts/{id}/orders"), &page_query(page, limit))
            .await?;
        parse_page(resp, page, limit)
    }

    async fn list_shifts(&self, page: u32, limit: u32) -> Result<Page<Shift>> {
        let resp = self.get("/api/shifts", &page_query(page, limit)).await?;
        parse_page(resp, page, limit)
    }
}
