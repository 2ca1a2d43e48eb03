//! Data-fetch seam between the poller and the BaaS.
//!
//! Each resource type is served by one [`ResourceFetcher`] registered in a
//! [`FetcherRegistry`]. The scheduler looks fetchers up by tag, so adding a
//! resource type never touches the scheduler itself.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use super::types::{FetchFilter, ResourceType, Row};
use crate::error::AppError;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
pub trait ResourceFetcher: Send + Sync + 'static {
    /// Fetch every row admitted by `filter`. An unfiltered filter means all rows.
    async fn fetch(&self, filter: &FetchFilter) -> Result<Vec<Row>, AppError>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Lookup table `ResourceType -> fetcher`. Cheap to clone.
#[derive(Clone, Default)]
pub struct FetcherRegistry {
    fetchers: HashMap<ResourceType, Arc<dyn ResourceFetcher>>,
}

impl FetcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration.
    pub fn with(mut self, resource_type: ResourceType, fetcher: Arc<dyn ResourceFetcher>) -> Self {
        self.register(resource_type, fetcher);
        self
    }

    /// Register (or replace) the fetcher for a resource type.
    pub fn register(&mut self, resource_type: ResourceType, fetcher: Arc<dyn ResourceFetcher>) {
        if self.fetchers.insert(resource_type, fetcher).is_some() {
            tracing::debug!(resource_type = %resource_type, "Replaced registered fetcher");
        }
    }

    pub fn get(&self, resource_type: ResourceType) -> Option<Arc<dyn ResourceFetcher>> {
        self.fetchers.get(&resource_type).cloned()
    }

    pub fn contains(&self, resource_type: ResourceType) -> bool {
        self.fetchers.contains_key(&resource_type)
    }

    pub fn resource_types(&self) -> Vec<ResourceType> {
        let mut types: Vec<_> = self.fetchers.keys().copied().collect();
        types.sort();
        types
    }
}

// ---------------------------------------------------------------------------
// Response envelope
// ---------------------------------------------------------------------------

/// `{ success, data, error }` envelope returned by the dashboard's unified API
/// client. Hosts wrapping such a client map it through [`ApiResponse::into_result`];
/// the error text is only ever logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default)]
    pub data: Option<T>,
    #[serde(default)]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }

    pub fn into_result(self) -> Result<T, AppError> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            (true, None) => Err(AppError::Fetch("response marked success but carried no data".into())),
            (false, _) => Err(AppError::Fetch(
                self.error.unwrap_or_else(|| "request failed".into()),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory fetcher
// ---------------------------------------------------------------------------

/// Fetcher over an in-memory row set. Applies the filter like the BaaS would,
/// counts calls, and can simulate outages. Used for offline demos and tests.
#[derive(Default)]
pub struct MemoryFetcher {
    rows: Mutex<Vec<Row>>,
    calls: AtomicUsize,
    fail_next: AtomicUsize,
    failing: AtomicBool,
    last_filter: Mutex<Option<FetchFilter>>,
}

impl MemoryFetcher {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows: Mutex::new(rows),
            ..Default::default()
        }
    }

    pub fn set_rows(&self, rows: Vec<Row>) {
        *self.rows.lock().unwrap_or_else(|e| e.into_inner()) = rows;
    }

    /// Fail the next `n` calls, then recover.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Fail every call until switched off.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_filter(&self) -> Option<FetchFilter> {
        self.last_filter.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn should_fail(&self) -> bool {
        if self.failing.load(Ordering::SeqCst) {
            return true;
        }
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait::async_trait]
impl ResourceFetcher for MemoryFetcher {
    async fn fetch(&self, filter: &FetchFilter) -> Result<Vec<Row>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_filter.lock().unwrap_or_else(|e| e.into_inner()) = Some(filter.clone());

        if self.should_fail() {
            return Err(AppError::Fetch("simulated outage".into()));
        }

        let rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        Ok(rows.iter().filter(|r| filter.admits(r)).cloned().collect())
    }
}
