//! Search-as-you-type for products and customers.
//!
//! Keystrokes go through [`keyword_channel`], which only releases a keyword
//! once typing pauses. Pages are cached per normalised keyword for a short
//! freshness window; errors are returned as-is and never cached.

use std::future::Future;
use std::sync::Arc;

use moka::sync::Cache;
use tokio::sync::watch;
use tracing::debug;

use crate::backend::SalesBackend;
use crate::config::{SEARCH_CACHE_CAPACITY, SEARCH_CACHE_TTL, SEARCH_DEBOUNCE};
use crate::error::Result;
use crate::models::{Customer, Page, Product};

// ---------------------------------------------------------------------------
// Debounce
// ---------------------------------------------------------------------------

/// Writer side, fed from the search box.
#[derive(Clone)]
pub struct KeywordInput(Arc<watch::Sender<String>>);

impl KeywordInput {
    pub fn set(&self, keyword: &str) {
        self.0.send_replace(keyword.to_string());
    }
}

/// Reader side, yields keywords after typing settles.
pub struct DebouncedKeywords(watch::Receiver<String>);

pub fn keyword_channel() -> (KeywordInput, DebouncedKeywords) {
    let (tx, rx) = watch::channel(String::new());
    (KeywordInput(Arc::new(tx)), DebouncedKeywords(rx))
}

impl DebouncedKeywords {
    /// Wait for the next keyword that stayed unchanged for the debounce
    /// delay. A keyword still settling when the input closes is delivered
    /// right away; after that, `None`.
    pub async fn next(&mut self) -> Option<String> {
        self.0.changed().await.ok()?;
        loop {
            tokio::select! {
                changed = self.0.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(SEARCH_DEBOUNCE) => break,
            }
        }
        let keyword = self.0.borrow_and_update().trim().to_string();
        Some(keyword)
    }
}

// ---------------------------------------------------------------------------
// Incremental results
// ---------------------------------------------------------------------------

/// Accumulated pages for one keyword.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResults<T> {
    pub keyword: String,
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
}

impl<T: Clone> SearchResults<T> {
    fn from_page(keyword: &str, page: Page<T>) -> Self {
        SearchResults {
            keyword: keyword.to_string(),
            items: page.items,
            page: page.page,
            page_size: page.page_size,
            total: page.total,
        }
    }

    fn append(&mut self, page: Page<T>) {
        self.items.extend(page.items);
        self.page = page.page;
        self.total = page.total;
    }

    pub fn has_next_page(&self) -> bool {
        (self.page as u64) * (self.page_size as u64) < self.total
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

type PageKey = (String, u32);

fn cache_key(keyword: &str, page: u32) -> PageKey {
    (keyword.trim().to_lowercase(), page)
}

fn new_cache<T: Clone + Send + Sync + 'static>() -> Cache<PageKey, Page<T>> {
    Cache::builder()
        .max_capacity(SEARCH_CACHE_CAPACITY)
        .time_to_live(SEARCH_CACHE_TTL)
        .build()
}

async fn cached_page<T, F, Fut>(
    cache: &Cache<PageKey, Page<T>>,
    keyword: &str,
    page: u32,
    fetch: F,
) -> Result<Page<T>>
where
    T: Clone + Send + Sync + 'static,
    F: FnOnce(String, u32) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    let key = cache_key(keyword, page);
    if let Some(hit) = cache.get(&key) {
        debug!(keyword = %key.0, page, "search cache hit");
        return Ok(hit);
    }
    let fresh = fetch(keyword.trim().to_string(), page).await?;
    cache.insert(key, fresh.clone());
    Ok(fresh)
}

pub struct SearchService<B> {
    backend: Arc<B>,
    page_size: u32,
    products: Cache<PageKey, Page<Product>>,
    customers: Cache<PageKey, Page<Customer>>,
}

impl<B: SalesBackend> SearchService<B> {
    pub fn new(backend: Arc<B>, page_size: u32) -> Self {
        SearchService {
            backend,
            page_size: page_size.max(1),
            products: new_cache(),
            customers: new_cache(),
        }
    }

    /// First page of products for `keyword`; `None` for a blank keyword
    /// (no request is made).
    pub async fn products(&self, keyword: &str) -> Result<Option<SearchResults<Product>>> {
        if keyword.trim().is_empty() {
            return Ok(None);
        }
        let page = self.product_page(keyword, 1).await?;
        Ok(Some(SearchResults::from_page(keyword.trim(), page)))
    }

    /// Append the next page. Returns `false` when there was none.
    pub async fn next_products(&self, results: &mut SearchResults<Product>) -> Result<bool> {
        if !results.has_next_page() {
            return Ok(false);
        }
        let page = self.product_page(&results.keyword, results.page + 1).await?;
        results.append(page);
        Ok(true)
    }

    pub async fn customers(&self, keyword: &str) -> Result<Option<SearchResults<Customer>>> {
        if keyword.trim().is_empty() {
            return Ok(None);
        }
        let page = self.customer_page(keyword, 1).await?;
        Ok(Some(SearchResults::from_page(keyword.trim(), page)))
    }

    pub async fn next_customers(&self, results: &mut SearchResults<Customer>) -> Result<bool> {
        if !results.has_next_page() {
            return Ok(false);
        }
        let page = self.customer_page(&results.keyword, results.page + 1).await?;
        results.append(page);
        Ok(true)
    }

    /// Exact phone lookup, uncached.
    pub async fn customer_by_phone(&self, phone: &str) -> Result<Option<Customer>> {
        if phone.trim().is_empty() {
            return Ok(None);
        }
        self.backend.find_customer_by_phone(phone).await
    }

    /// Drop every cached page, e.g. after a sale changed stock levels.
    pub fn invalidate(&self) {
        self.products.invalidate_all();
        self.customers.invalidate_all();
    }

    async fn product_page(&self, keyword: &str, page: u32) -> Result<Page<Product>> {
        let backend = &self.backend;
        let limit = self.page_size;
        cached_page(&self.products, keyword, page, |kw, page| async move {
            backend.search_products(&kw, page, limit).await
        })
        .await
    }

    async fn customer_page(&self, keyword: &str, page: u32) -> Result<Page<Customer>> {
        let backend = &self.backend;
        let limit = self.page_size;
        cached_page(&self.customers, keyword, page, |kw, page| async move {
            backend.search_customers(&kw, page, limit).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PosError;
    use crate::models::{OrderReceipt, OrderRequest};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Catalog {
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    impl SalesBackend for Catalog {
        async fn create_order(&self, _: &OrderRequest) -> Result<OrderReceipt> {
            Err(PosError::validation("not used"))
        }

        async fn search_products(&self, keyword: &str, page: u32, limit: u32) -> Result<Page<Product>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(PosError::Network("offline".into()));
            }
            let start = (page as i64 - 1) * limit as i64;
            let items = (start..(start + limit as i64).min(5))
                .map(|i| Product {
                    id: i + 1,
                    name: format!("{keyword} {}", i + 1),
                    image: None,
                    sell_price: 1_000,
                    quantity: 10,
                })
                .collect();
            Ok(Page {
                items,
                page,
                page_size: limit,
                total: 5,
            })
        }

        async fn search_customers(&self, _: &str, page: u32, limit: u32) -> Result<Page<Customer>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Page::empty(page, limit))
        }

        async fn find_customer_by_phone(&self, phone: &str) -> Result<Option<Customer>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok((phone == "0901234567").then(|| Customer {
                id: "8".into(),
                name: "Hoa".into(),
                phone: phone.into(),
                email: None,
                address: None,
                local: false,
            }))
        }
    }

    fn service() -> (Arc<Catalog>, SearchService<Catalog>) {
        let backend = Arc::new(Catalog::default());
        (backend.clone(), SearchService::new(backend, 2))
    }

    #[tokio::test]
    async fn blank_keyword_sends_nothing() {
        let (backend, svc) = service();
        assert!(svc.products("   ").await.unwrap().is_none());
        assert!(svc.customers("").await.unwrap().is_none());
        assert!(svc.customer_by_phone(" ").await.unwrap().is_none());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn identical_query_is_served_from_cache() {
        let (backend, svc) = service();
        let first = svc.products("sữa").await.unwrap().unwrap();
        let second = svc.products(" SỮA ").await.unwrap().unwrap();
        assert_eq!(first.items, second.items);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

        svc.invalidate();
        svc.products("sữa").await.unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn next_page_appends_until_exhausted() {
        let (_, svc) = service();
        let mut results = svc.products("mì").await.unwrap().unwrap();
        assert_eq!(results.items.len(), 2);
        assert!(svc.next_products(&mut results).await.unwrap());
        assert!(svc.next_products(&mut results).await.unwrap());
        assert_eq!(results.items.len(), 5);
        assert_eq!(results.items[4].id, 5);
        assert!(!results.has_next_page());
        assert!(!svc.next_products(&mut results).await.unwrap());
    }

    #[tokio::test]
    async fn errors_surface_and_are_not_cached() {
        let (backend, svc) = service();
        backend.fail.store(true, Ordering::SeqCst);
        assert!(matches!(svc.products("bia").await, Err(PosError::Network(_))));
        backend.fail.store(false, Ordering::SeqCst);
        assert!(svc.products("bia").await.unwrap().is_some());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn phone_lookup_passes_through() {
        let (_, svc) = service();
        assert_eq!(svc.customer_by_phone("0901234567").await.unwrap().unwrap().id, "8");
        assert!(svc.customer_by_phone("0900000000").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_releases_only_the_settled_keyword() {
        let (input, mut keywords) = keyword_channel();
        let reader = tokio::spawn(async move { keywords.next().await });

        input.set("s");
        tokio::time::sleep(Duration::from_millis(100)).await;
        input.set("sa");
        tokio::time::sleep(Duration::from_millis(100)).await;
        input.set("sach ");

        let started = tokio::time::Instant::now();
        assert_eq!(reader.await.unwrap().as_deref(), Some("sach"));
        assert!(started.elapsed() >= SEARCH_DEBOUNCE);
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_ends_when_input_is_dropped() {
        let (input, mut keywords) = keyword_channel();
        drop(input);
        assert!(keywords.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn keyword_typed_before_input_closes_is_still_delivered() {
        let (input, mut keywords) = keyword_channel();
        let reader = tokio::spawn(async move {
            let first = keywords.next().await;
            let second = keywords.next().await;
            (first, second)
        });

        input.set("nước mắm");
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(input);

        let (first, second) = reader.await.unwrap();
        assert_eq!(first.as_deref(), Some("nước mắm"));
        assert!(second.is_none());
    }
}
