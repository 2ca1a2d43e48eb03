//! Subscription multiplexer and batch poller.
//!
//! Many logical subscriptions share one timer. Each tick groups the active
//! subscriptions by resource type, performs at most one fetch per type (with
//! the group's predicates merged into a single filter, or served from the
//! batch cache), and fans the rows back out, each subscriber seeing only rows
//! that match its own predicate.
//!
//! Shared state (registry, cache, breaker) sits behind one `std::sync::Mutex`
//! that is never held across an `.await` or a callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures_util::future::join_all;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::bus::{BusBinding, EventBus, InvalidationKind};
use super::cache::BatchCache;
use super::failover::{CircuitBreaker, ConnectionStatus, FailureOutcome, GroupHealth};
use super::fetcher::FetcherRegistry;
use super::subscription::{Subscription, SubscriptionId, SubscriptionInfo, SubscriptionRegistry};
use super::types::{FetchFilter, Predicate, ResourceType, Row};
use crate::config::RealtimeConfig;
use crate::error::AppError;

// =============================================================================
// Stats & reports
// =============================================================================

#[derive(Default)]
struct Counters {
    ticks: AtomicU64,
    fetches: AtomicU64,
    cache_hits: AtomicU64,
    fetch_failures: AtomicU64,
    deliveries: AtomicU64,
    circuit_trips: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RealtimeStats {
    pub running: bool,
    pub status: ConnectionStatus,
    pub reconnect_attempts: u32,
    pub active_subscriptions: usize,
    pub ticks: u64,
    pub fetches: u64,
    pub cache_hits: u64,
    pub fetch_failures: u64,
    pub deliveries: u64,
    pub circuit_trips: u64,
}

/// Where a batch group's rows came from on one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupSource {
    Fetched,
    Cached,
    Failed,
    Tripped,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupOutcome {
    pub resource_type: ResourceType,
    pub source: GroupSource,
    /// Callbacks invoked (success) or subscriptions dropped (trip).
    pub subscribers: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    pub groups: Vec<GroupOutcome>,
}

impl TickReport {
    pub fn outcome(&self, resource_type: ResourceType) -> Option<&GroupOutcome> {
        self.groups.iter().find(|g| g.resource_type == resource_type)
    }
}

// =============================================================================
// Service
// =============================================================================

struct State {
    registry: SubscriptionRegistry,
    cache: BatchCache,
    breaker: CircuitBreaker,
}

struct Timer {
    cancel: CancellationToken,
    _task: JoinHandle<()>,
}

struct Inner {
    config: RealtimeConfig,
    fetchers: FetcherRegistry,
    state: Mutex<State>,
    /// Serializes whole ticks so a forced tick and the timer never interleave.
    tick_lock: tokio::sync::Mutex<()>,
    timer: Mutex<Option<Timer>>,
    counters: Counters,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().unwrap_or_else(|e| e.into_inner()).take() {
            timer.cancel.cancel();
        }
    }
}

/// Handle to the batch poller. Construct one per application root and clone
/// it into whatever needs to subscribe; clones share all state.
#[derive(Clone)]
pub struct RealtimeService {
    inner: Arc<Inner>,
}

impl RealtimeService {
    pub fn new(config: RealtimeConfig, fetchers: FetcherRegistry) -> Result<Self, AppError> {
        config.validate()?;
        let state = State {
            registry: SubscriptionRegistry::new(),
            cache: BatchCache::new(config.cache_ttl),
            breaker: CircuitBreaker::new(&config),
        };
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                fetchers,
                state: Mutex::new(state),
                tick_lock: tokio::sync::Mutex::new(()),
                timer: Mutex::new(None),
                counters: Counters::default(),
            }),
        })
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.inner.config
    }

    pub fn fetchers(&self) -> &FetcherRegistry {
        &self.inner.fetchers
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // -------------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------------

    /// Register interest in `resource_type` rows matching `predicate`.
    ///
    /// Returns immediately; the first rows arrive on the next tick. Fails fast
    /// on a malformed predicate, an unregistered resource type, or when called
    /// outside a tokio runtime (the shared timer could not be started).
    pub fn subscribe<F>(
        &self,
        resource_type: ResourceType,
        predicate: Predicate,
        callback: F,
    ) -> Result<SubscriptionId, AppError>
    where
        F: Fn(&[Row]) + Send + Sync + 'static,
    {
        predicate.validate()?;
        if !self.inner.fetchers.contains(resource_type) {
            return Err(AppError::NoFetcher(resource_type.to_string()));
        }
        let runtime = Handle::try_current().map_err(|_| {
            AppError::Internal("realtime subscriptions require a running tokio runtime".into())
        })?;

        let sub = {
            let mut state = self.state();
            if state.breaker.is_disabled(resource_type) {
                tracing::info!(resource_type = %resource_type, "Re-enabling live updates after new subscription");
            }
            state.breaker.reset(resource_type);
            state.registry.insert(resource_type, predicate, Arc::new(callback))
        };

        tracing::debug!(
            subscription_id = %sub.id,
            resource_type = %resource_type,
            "Subscription registered"
        );
        self.ensure_timer(&runtime);
        Ok(sub.id.clone())
    }

    /// Like [`subscribe`](Self::subscribe), taking the resource type by name
    /// and the predicate as a JSON object.
    pub fn subscribe_named<F>(
        &self,
        resource_type: &str,
        predicate: &serde_json::Value,
        callback: F,
    ) -> Result<SubscriptionId, AppError>
    where
        F: Fn(&[Row]) + Send + Sync + 'static,
    {
        let resource_type: ResourceType = resource_type.parse()?;
        let predicate = Predicate::from_json(predicate)?;
        self.subscribe(resource_type, predicate, callback)
    }

    /// Remove one subscription. Stops the shared timer when none remain.
    pub fn unsubscribe(&self, id: &str) -> bool {
        let (removed, now_empty) = {
            let mut state = self.state();
            let removed = state.registry.remove(id);
            if let Some(sub) = &removed {
                if state.registry.count_for(sub.resource_type) == 0 {
                    state.breaker.forget(sub.resource_type);
                }
            }
            (removed, state.registry.is_empty())
        };

        let Some(sub) = removed else {
            return false;
        };
        sub.deactivate();
        tracing::debug!(subscription_id = %id, resource_type = %sub.resource_type, "Unsubscribed");

        if now_empty {
            self.stop_timer();
        }
        true
    }

    /// Teardown: drop every subscription and stop the timer.
    pub fn unsubscribe_all(&self) -> usize {
        let removed = {
            let mut state = self.state();
            state.breaker.forget_all();
            state.registry.drain()
        };
        for sub in &removed {
            sub.deactivate();
        }
        self.stop_timer();
        tracing::debug!(count = removed.len(), "All subscriptions removed");
        removed.len()
    }

    pub fn is_subscribed(&self, id: &str) -> bool {
        self.state().registry.get(id).is_some_and(|s| s.is_active())
    }

    pub fn active_count(&self, resource_type: ResourceType) -> usize {
        self.state().registry.count_for(resource_type)
    }

    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.state().registry.infos()
    }

    // -------------------------------------------------------------------------
    // Cache invalidation
    // -------------------------------------------------------------------------

    /// Force the next tick to refetch `resource_type` regardless of cache age.
    pub fn invalidate(&self, resource_type: ResourceType) -> bool {
        let expired = self.state().cache.invalidate(resource_type);
        if expired {
            tracing::debug!(resource_type = %resource_type, "Batch cache entry invalidated");
        }
        expired
    }

    pub fn invalidate_all(&self) -> usize {
        self.state().cache.invalidate_all()
    }

    pub fn is_cached(&self, resource_type: ResourceType) -> bool {
        self.state().cache.contains(resource_type)
    }

    /// Expire batch cache entries whenever an invalidation signal is published
    /// on `bus`. Listeners are removed when the returned binding is dropped.
    pub fn bind_invalidation(&self, bus: &EventBus) -> BusBinding {
        let mut binding = BusBinding::new(bus.clone());
        for kind in InvalidationKind::ALL {
            let weak: Weak<Inner> = Arc::downgrade(&self.inner);
            binding.listen(kind, move |event| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let service = RealtimeService { inner };
                let affected = event.kind.affected_resources();
                for rt in affected {
                    service.invalidate(*rt);
                }
                tracing::debug!(event = %event.kind, affected = affected.len(), "Invalidation applied to batch cache");
            });
        }
        binding
    }

    // -------------------------------------------------------------------------
    // Diagnostics
    // -------------------------------------------------------------------------

    /// Whether the shared timer is currently scheduled.
    pub fn is_running(&self) -> bool {
        self.inner
            .timer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|t| !t.cancel.is_cancelled())
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.state().breaker.status()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_status() == ConnectionStatus::Connected
    }

    pub fn is_disabled(&self, resource_type: ResourceType) -> bool {
        self.state().breaker.is_disabled(resource_type)
    }

    pub fn group_health(&self, resource_type: ResourceType) -> Option<GroupHealth> {
        self.state().breaker.health(resource_type)
    }

    pub fn stats(&self) -> RealtimeStats {
        let (status, reconnect_attempts, active_subscriptions) = {
            let state = self.state();
            (
                state.breaker.status(),
                state.breaker.reconnect_attempts(),
                state.registry.len(),
            )
        };
        let c = &self.inner.counters;
        RealtimeStats {
            running: self.is_running(),
            status,
            reconnect_attempts,
            active_subscriptions,
            ticks: c.ticks.load(Ordering::Relaxed),
            fetches: c.fetches.load(Ordering::Relaxed),
            cache_hits: c.cache_hits.load(Ordering::Relaxed),
            fetch_failures: c.fetch_failures.load(Ordering::Relaxed),
            deliveries: c.deliveries.load(Ordering::Relaxed),
            circuit_trips: c.circuit_trips.load(Ordering::Relaxed),
        }
    }

    // -------------------------------------------------------------------------
    // Timer
    // -------------------------------------------------------------------------

    fn ensure_timer(&self, runtime: &Handle) {
        let mut timer = self.inner.timer.lock().unwrap_or_else(|e| e.into_inner());
        if timer.as_ref().is_some_and(|t| !t.cancel.is_cancelled()) {
            return;
        }
        let cancel = CancellationToken::new();
        let task = runtime.spawn(run_timer(
            Arc::downgrade(&self.inner),
            self.inner.config.poll_interval,
            cancel.clone(),
        ));
        *timer = Some(Timer { cancel, _task: task });
        tracing::info!(
            interval_secs = self.inner.config.poll_interval.as_secs_f64(),
            "Realtime poll timer started"
        );
    }

    /// Cancel the timer. An in-flight tick is left to finish; it may be the
    /// caller itself when a circuit trip empties the registry.
    fn stop_timer(&self) {
        let timer = self.inner.timer.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(timer) = timer {
            timer.cancel.cancel();
            tracing::info!("Realtime poll timer stopped");
        }
    }

    // -------------------------------------------------------------------------
    // Tick
    // -------------------------------------------------------------------------

    /// Run one poll cycle over every active batch group.
    ///
    /// Driven by the shared timer; public so hosts can force an immediate cycle.
    pub async fn tick(&self) -> TickReport {
        let _serial = self.inner.tick_lock.lock().await;
        self.inner.counters.ticks.fetch_add(1, Ordering::Relaxed);

        let groups = self.state().registry.groups();
        if groups.is_empty() {
            return TickReport::default();
        }

        let outcomes = join_all(
            groups
                .into_iter()
                .map(|(resource_type, subs)| self.run_group(resource_type, subs)),
        )
        .await;

        TickReport {
            groups: outcomes.into_iter().flatten().collect(),
        }
    }

    async fn run_group(
        &self,
        resource_type: ResourceType,
        subs: Vec<Arc<Subscription>>,
    ) -> Option<GroupOutcome> {
        let Some(fetcher) = self.inner.fetchers.get(resource_type) else {
            tracing::warn!(resource_type = %resource_type, "No fetcher for batch group, skipping");
            return None;
        };
        let counters = &self.inner.counters;
        let filter = FetchFilter::merge(subs.iter().map(|s| &s.predicate));

        let (cached, epoch) = {
            let state = self.state();
            (
                state.cache.lookup(resource_type, &filter),
                state.cache.epoch(resource_type),
            )
        };
        let (rows, source) = match cached {
            Some(rows) => {
                counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(resource_type = %resource_type, rows = rows.len(), "Serving batch from cache");
                (rows, GroupSource::Cached)
            }
            None => {
                counters.fetches.fetch_add(1, Ordering::Relaxed);
                let started = Instant::now();
                let result = fetcher.fetch(&filter).await;
                match result {
                    Ok(rows) => {
                        let rows = Arc::new(rows);
                        let cached = {
                            let mut state = self.state();
                            state.breaker.record_success(resource_type);
                            state.cache.store(resource_type, filter, rows.clone(), epoch)
                        };
                        tracing::debug!(
                            resource_type = %resource_type,
                            rows = rows.len(),
                            subscribers = subs.len(),
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            cached,
                            "Batch fetched"
                        );
                        (rows, GroupSource::Fetched)
                    }
                    Err(e) => return Some(self.handle_failure(resource_type, &e)),
                }
            }
        };

        let delivered = subs.iter().filter(|sub| sub.deliver(&rows)).count();
        counters.deliveries.fetch_add(delivered as u64, Ordering::Relaxed);

        Some(GroupOutcome {
            resource_type,
            source,
            subscribers: delivered,
        })
    }

    fn handle_failure(&self, resource_type: ResourceType, error: &AppError) -> GroupOutcome {
        self.inner.counters.fetch_failures.fetch_add(1, Ordering::Relaxed);
        let outcome = self
            .state()
            .breaker
            .record_failure(resource_type, &error.to_string());

        match outcome {
            FailureOutcome::Retry { attempt, delay } => {
                tracing::warn!(
                    resource_type = %resource_type,
                    attempt,
                    retry_delay_ms = delay.as_millis() as u64,
                    "Batch fetch failed, retrying on next tick: {}", error
                );
                GroupOutcome {
                    resource_type,
                    source: GroupSource::Failed,
                    subscribers: 0,
                }
            }
            FailureOutcome::Trip { attempt } => {
                let (removed, now_empty) = {
                    let mut state = self.state();
                    let removed = state.registry.remove_group(resource_type);
                    state.cache.invalidate(resource_type);
                    (removed, state.registry.is_empty())
                };
                let dropped = removed.iter().filter(|sub| sub.deactivate()).count();
                self.inner.counters.circuit_trips.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    resource_type = %resource_type,
                    attempt,
                    unsubscribed = dropped,
                    "Batch fetch kept failing, live updates disabled for resource type: {}", error
                );
                if now_empty {
                    self.stop_timer();
                }
                GroupOutcome {
                    resource_type,
                    source: GroupSource::Tripped,
                    subscribers: dropped,
                }
            }
        }
    }
}

/// Shared timer loop. Holds only a weak reference so dropping the last
/// service handle also ends the loop.
async fn run_timer(inner: Weak<Inner>, period: std::time::Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let report = RealtimeService { inner }.tick().await;
        tracing::trace!(groups = report.groups.len(), "Poll tick finished");
    }
    tracing::debug!("Realtime poll timer exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fetcher::MemoryFetcher;
    use serde_json::json;
    use std::time::Duration;

    fn lead(project: &str) -> Row {
        json!({"id": uuid::Uuid::new_v4().to_string(), "project_id": project})
            .as_object()
            .cloned()
            .unwrap()
    }

    fn service_with(fetcher: Arc<MemoryFetcher>) -> RealtimeService {
        let registry = FetcherRegistry::new().with(ResourceType::Leads, fetcher);
        RealtimeService::new(RealtimeConfig::default(), registry).unwrap()
    }

    #[tokio::test]
    async fn test_subscribe_rejects_unknown_fetcher() {
        let service = service_with(Arc::new(MemoryFetcher::default()));
        let err = service
            .subscribe(ResourceType::Clients, Predicate::all(), |_| {})
            .unwrap_err();
        assert!(matches!(err, AppError::NoFetcher(_)));
        assert!(!service.is_running());
    }

    #[tokio::test]
    async fn test_subscribe_named_validates() {
        let service = service_with(Arc::new(MemoryFetcher::default()));
        assert!(matches!(
            service.subscribe_named("invoices", &serde_json::Value::Null, |_| {}),
            Err(AppError::UnknownResource(_))
        ));
        assert!(matches!(
            service.subscribe_named("leads", &json!({"project_id": ["a", "b"]}), |_| {}),
            Err(AppError::Validation(_))
        ));
        assert!(service
            .subscribe_named("leads", &json!({"project_id": "a"}), |_| {})
            .is_ok());
    }

    #[test]
    fn test_subscribe_outside_runtime_fails_fast() {
        let service = service_with(Arc::new(MemoryFetcher::default()));
        let err = service
            .subscribe(ResourceType::Leads, Predicate::all(), |_| {})
            .unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
        assert!(service.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_timer_follows_registry() {
        let service = service_with(Arc::new(MemoryFetcher::default()));
        assert!(!service.is_running());
        let a = service.subscribe(ResourceType::Leads, Predicate::all(), |_| {}).unwrap();
        let b = service.subscribe(ResourceType::Leads, Predicate::all(), |_| {}).unwrap();
        assert!(service.is_running());
        assert!(service.unsubscribe(&a));
        assert!(service.is_running());
        assert!(service.unsubscribe(&b));
        assert!(!service.is_running());
        assert!(!service.unsubscribe(&b));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_fetch_at_subscribe_time() {
        let fetcher = Arc::new(MemoryFetcher::new(vec![lead("p1")]));
        let service = service_with(fetcher.clone());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        service
            .subscribe(ResourceType::Leads, Predicate::all(), move |rows| {
                sink.lock().unwrap().push(rows.len())
            })
            .unwrap();
        tokio::task::yield_now().await;
        assert_eq!(fetcher.calls(), 0);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_unsubscribe_during_dispatch_is_honoured() {
        let fetcher = Arc::new(MemoryFetcher::new(vec![lead("p1")]));
        let service = service_with(fetcher);
        let second_calls = Arc::new(AtomicU64::new(0));

        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let (svc, target) = (service.clone(), slot.clone());
        service
            .subscribe(ResourceType::Leads, Predicate::all(), move |_| {
                if let Some(id) = target.lock().unwrap().take() {
                    svc.unsubscribe(&id);
                }
            })
            .unwrap();
        let counter = second_calls.clone();
        let second = service
            .subscribe(ResourceType::Leads, Predicate::all(), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        *slot.lock().unwrap() = Some(second);

        let report = service.tick().await;
        assert_eq!(report.outcome(ResourceType::Leads).unwrap().subscribers, 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_last_delivered_recorded() {
        let fetcher = Arc::new(MemoryFetcher::new(vec![lead("p1")]));
        let service = service_with(fetcher);
        let id = service.subscribe(ResourceType::Leads, Predicate::all(), |_| {}).unwrap();
        assert!(service.subscriptions()[0].last_delivered.is_none());
        service.tick().await;
        let info = service.subscriptions().into_iter().find(|s| s.id == id).unwrap();
        assert!(info.last_delivered.is_some());
        assert!(info.active);
    }

    #[tokio::test]
    async fn test_broader_subscriber_forces_refetch_within_ttl() {
        let fetcher = Arc::new(MemoryFetcher::new(vec![lead("p1"), lead("p2")]));
        let service = service_with(fetcher.clone());
        service
            .subscribe(ResourceType::Leads, Predicate::eq("project_id", "p1"), |_| {})
            .unwrap();
        service.tick().await;
        assert_eq!(fetcher.calls(), 1);

        let seen = Arc::new(Mutex::new(0usize));
        let sink = seen.clone();
        service
            .subscribe(ResourceType::Leads, Predicate::all(), move |rows| {
                *sink.lock().unwrap() = rows.len()
            })
            .unwrap();
        let report = service.tick().await;
        assert_eq!(report.outcome(ResourceType::Leads).unwrap().source, GroupSource::Fetched);
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(*seen.lock().unwrap(), 2);
        assert!(fetcher.last_filter().unwrap().is_unfiltered());
    }

    #[tokio::test]
    async fn test_recovery_resets_attempts() {
        let fetcher = Arc::new(MemoryFetcher::new(vec![lead("p1")]));
        let service = service_with(fetcher.clone());
        service.subscribe(ResourceType::Leads, Predicate::all(), |_| {}).unwrap();

        fetcher.fail_next(3);
        for _ in 0..3 {
            service.tick().await;
        }
        assert_eq!(service.stats().reconnect_attempts, 3);
        assert_eq!(service.connection_status(), ConnectionStatus::Reconnecting);

        service.tick().await;
        assert!(service.is_connected());
        assert_eq!(service.stats().reconnect_attempts, 0);
        assert!(service.group_health(ResourceType::Leads).is_none());
    }

    #[tokio::test]
    async fn test_new_subscription_revives_disabled_type() {
        let fetcher = Arc::new(MemoryFetcher::new(vec![lead("p1")]));
        let registry = FetcherRegistry::new().with(ResourceType::Leads, fetcher.clone());
        let config = RealtimeConfig {
            max_reconnect_attempts: 1,
            ..RealtimeConfig::default()
        };
        let service = RealtimeService::new(config, registry).unwrap();
        service.subscribe(ResourceType::Leads, Predicate::all(), |_| {}).unwrap();

        fetcher.set_failing(true);
        service.tick().await;
        let report = service.tick().await;
        assert_eq!(report.outcome(ResourceType::Leads).unwrap().source, GroupSource::Tripped);
        assert!(service.is_disabled(ResourceType::Leads));
        assert!(!service.is_running());

        fetcher.set_failing(false);
        service.subscribe(ResourceType::Leads, Predicate::all(), |_| {}).unwrap();
        assert!(!service.is_disabled(ResourceType::Leads));
        assert!(service.is_running());
        let report = service.tick().await;
        assert_eq!(report.outcome(ResourceType::Leads).unwrap().source, GroupSource::Fetched);
        assert!(service.is_connected());
    }

    #[tokio::test]
    async fn test_stats_serialize() {
        let service = service_with(Arc::new(MemoryFetcher::default()));
        let json = serde_json::to_value(service.stats()).unwrap();
        assert_eq!(json["status"], "connected");
        assert_eq!(json["running"], false);
    }
}
