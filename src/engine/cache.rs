use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::types::{FetchFilter, ResourceType, Row};

/// Most recent batch fetch for one resource type.
struct CacheEntry {
    rows: Arc<Vec<Row>>,
    /// Filter the rows were fetched with; a reuse must be covered by it.
    filter: FetchFilter,
    fetched_at: Instant,
}

/// Per-resource-type batch cache with a fixed TTL.
///
/// Keyed by resource type, not by predicate: one entry holds the union of
/// rows needed by every subscriber of that type.
pub struct BatchCache {
    ttl: Duration,
    entries: HashMap<ResourceType, CacheEntry>,
    /// Bumped on every invalidation of a type.
    epochs: HashMap<ResourceType, u64>,
}

impl BatchCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
            epochs: HashMap::new(),
        }
    }

    /// Invalidation generation of `resource_type`. Capture it before a fetch
    /// and hand it back to [`store`](Self::store).
    pub fn epoch(&self, resource_type: ResourceType) -> u64 {
        self.epochs.get(&resource_type).copied().unwrap_or(0)
    }

    /// Return cached rows if the entry is younger than the TTL and was fetched
    /// with a filter that admits everything `filter` asks for.
    pub fn lookup(&self, resource_type: ResourceType, filter: &FetchFilter) -> Option<Arc<Vec<Row>>> {
        let entry = self.entries.get(&resource_type)?;
        if entry.fetched_at.elapsed() >= self.ttl {
            return None;
        }
        if !entry.filter.covers(filter) {
            return None;
        }
        Some(entry.rows.clone())
    }

    /// Cache a fetch result taken at invalidation generation `epoch`.
    ///
    /// Rows fetched before an invalidation that landed mid-fetch are not
    /// cached. Returns whether the entry was stored.
    pub fn store(
        &mut self,
        resource_type: ResourceType,
        filter: FetchFilter,
        rows: Arc<Vec<Row>>,
        epoch: u64,
    ) -> bool {
        if epoch != self.epoch(resource_type) {
            return false;
        }
        self.entries.insert(
            resource_type,
            CacheEntry {
                rows,
                filter,
                fetched_at: Instant::now(),
            },
        );
        true
    }

    /// Forcibly expire one entry regardless of its age. Returns whether one existed.
    pub fn invalidate(&mut self, resource_type: ResourceType) -> bool {
        *self.epochs.entry(resource_type).or_default() += 1;
        self.entries.remove(&resource_type).is_some()
    }

    pub fn invalidate_all(&mut self) -> usize {
        for rt in ResourceType::ALL {
            *self.epochs.entry(rt).or_default() += 1;
        }
        let n = self.entries.len();
        self.entries.clear();
        n
    }

    pub fn contains(&self, resource_type: ResourceType) -> bool {
        self.entries.contains_key(&resource_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::Predicate;
    use serde_json::json;

    fn rows() -> Arc<Vec<Row>> {
        Arc::new(vec![json!({"project_id": "p1"}).as_object().cloned().unwrap()])
    }

    fn p1() -> FetchFilter {
        FetchFilter::from_predicate(&Predicate::eq("project_id", "p1"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_entry_is_reused() {
        let mut cache = BatchCache::new(Duration::from_secs(30));
        cache.store(ResourceType::Leads, p1(), rows(), 0);
        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(cache.lookup(ResourceType::Leads, &p1()).unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_not_used() {
        let mut cache = BatchCache::new(Duration::from_secs(30));
        cache.store(ResourceType::Leads, p1(), rows(), 0);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(cache.lookup(ResourceType::Leads, &p1()).is_none());
        assert!(cache.contains(ResourceType::Leads));
    }

    #[tokio::test(start_paused = true)]
    async fn test_narrower_entry_does_not_serve_broader_filter() {
        let mut cache = BatchCache::new(Duration::from_secs(30));
        cache.store(ResourceType::Leads, p1(), rows(), 0);
        assert!(cache.lookup(ResourceType::Leads, &FetchFilter::unfiltered()).is_none());

        cache.store(ResourceType::Leads, FetchFilter::unfiltered(), rows(), 0);
        assert!(cache.lookup(ResourceType::Leads, &p1()).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_is_per_type() {
        let mut cache = BatchCache::new(Duration::from_secs(30));
        cache.store(ResourceType::Leads, p1(), rows(), 0);
        cache.store(ResourceType::Projects, FetchFilter::unfiltered(), rows(), 0);
        assert!(cache.invalidate(ResourceType::Leads));
        assert!(!cache.invalidate(ResourceType::Leads));
        assert!(cache.lookup(ResourceType::Projects, &FetchFilter::unfiltered()).is_some());
        assert_eq!(cache.invalidate_all(), 1);
        assert!(!cache.contains(ResourceType::Projects));
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_after_mid_fetch_invalidation_is_dropped() {
        let mut cache = BatchCache::new(Duration::from_secs(30));
        let epoch = cache.epoch(ResourceType::Leads);
        // Nothing cached yet; the invalidation still moves the generation.
        assert!(!cache.invalidate(ResourceType::Leads));
        assert!(!cache.store(ResourceType::Leads, p1(), rows(), epoch));
        assert!(cache.lookup(ResourceType::Leads, &p1()).is_none());

        let epoch = cache.epoch(ResourceType::Leads);
        assert!(cache.store(ResourceType::Leads, p1(), rows(), epoch));
        assert!(cache.lookup(ResourceType::Leads, &p1()).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_all_moves_every_epoch() {
        let mut cache = BatchCache::new(Duration::from_secs(30));
        let before = cache.epoch(ResourceType::Clients);
        cache.invalidate_all();
        assert_ne!(cache.epoch(ResourceType::Clients), before);
    }
}
