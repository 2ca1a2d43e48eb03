//! Long-lived dashboard view over one resource type.
//!
//! A view keeps its own row set fed by two sources: the shared realtime
//! subscription (every poll tick) and out-of-band reloads triggered by
//! invalidation signals. Either source may land last; the latest write wins.
//! A failed reload never empties the view: the last known rows stay visible
//! with an error indicator.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::watch;

use super::bus::{BusBinding, EventBus, InvalidationEvent, InvalidationKind};
use super::fetcher::FetcherRegistry;
use super::realtime::RealtimeService;
use super::subscription::SubscriptionId;
use super::types::{FetchFilter, Predicate, ResourceType, Row};
use crate::error::AppError;

/// Field a project scope filters on for `resource_type`.
fn scope_field(resource_type: ResourceType) -> &'static str {
    match resource_type {
        ResourceType::Projects => "id",
        _ => "project_id",
    }
}

fn scope_predicate(resource_type: ResourceType, scope: Option<&str>) -> Predicate {
    match scope {
        Some(project) => Predicate::eq(scope_field(resource_type), project),
        None => Predicate::all(),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ViewSnapshot {
    pub resource_type: ResourceType,
    pub scope: Option<String>,
    pub rows: Vec<Row>,
    pub loading: bool,
    pub error: Option<String>,
    /// False once the realtime subscription was dropped (circuit breaker or detach).
    pub live_updates: bool,
}

#[derive(Default)]
struct ViewState {
    scope: Option<String>,
    rows: Vec<Row>,
    last_known: Vec<Row>,
    loading: bool,
    error: Option<String>,
    subscription: Option<SubscriptionId>,
    detached: bool,
}

struct ViewInner {
    resource_type: ResourceType,
    fetchers: FetcherRegistry,
    service: RealtimeService,
    runtime: Handle,
    state: Mutex<ViewState>,
    binding: Mutex<Option<BusBinding>>,
    reload_seq: AtomicU64,
    settled: watch::Sender<u64>,
}

impl ViewInner {
    fn state(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register the realtime subscription for `scope`, replacing any previous one.
    fn subscribe_live(self: &Arc<Self>, scope: Option<&str>) -> Result<(), AppError> {
        let previous = self.state().subscription.take();
        if let Some(id) = previous {
            self.service.unsubscribe(&id);
        }

        // Bus handlers may run on a thread outside the runtime.
        let _runtime = self.runtime.enter();
        let weak: Weak<ViewInner> = Arc::downgrade(self);
        let id = self.service.subscribe(
            self.resource_type,
            scope_predicate(self.resource_type, scope),
            move |rows| {
                if let Some(view) = weak.upgrade() {
                    view.apply_live(rows);
                }
            },
        )?;
        self.state().subscription = Some(id);
        Ok(())
    }

    fn apply_live(&self, rows: &[Row]) {
        let mut state = self.state();
        if state.detached {
            return;
        }
        state.rows = rows.to_vec();
        state.error = None;
    }

    /// Every kind reaches every view. Only the project scope narrows it.
    fn on_invalidation(self: &Arc<Self>, event: &InvalidationEvent) {
        let current_scope = self.state().scope.clone();
        let rescope = match (event.kind, event.project_id(), current_scope.as_deref()) {
            (InvalidationKind::ProjectChanged, Some(next), Some(current)) if next != current => {
                Some(next.to_string())
            }
            (InvalidationKind::ProjectChanged | InvalidationKind::ForceDashboardRefresh, _, _) => None,
            (_, Some(target), Some(current)) if target != current => {
                tracing::trace!(
                    resource_type = %self.resource_type,
                    event = %event.kind,
                    "Ignoring invalidation scoped to another project"
                );
                return;
            }
            _ => None,
        };

        if let Some(project) = rescope {
            tracing::debug!(resource_type = %self.resource_type, project_id = %project, "Re-scoping dashboard view");
            {
                let mut state = self.state();
                state.scope = Some(project.clone());
                state.last_known.clear();
                state.rows.clear();
            }
            if let Err(e) = self.subscribe_live(Some(&project)) {
                tracing::warn!(resource_type = %self.resource_type, "Failed to re-subscribe after project change: {}", e);
            }
        } else {
            let mut state = self.state();
            if !state.rows.is_empty() {
                state.last_known = std::mem::take(&mut state.rows);
            }
        }

        self.start_reload();
    }

    /// Kick off one out-of-band fetch through the fetcher registry.
    fn start_reload(self: &Arc<Self>) -> u64 {
        let seq = self.reload_seq.fetch_add(1, Ordering::AcqRel) + 1;
        let filter = {
            let mut state = self.state();
            state.loading = true;
            FetchFilter::from_predicate(&scope_predicate(self.resource_type, state.scope.as_deref()))
        };

        let Some(fetcher) = self.fetchers.get(self.resource_type) else {
            self.apply_reload(
                seq,
                Err(AppError::NoFetcher(self.resource_type.to_string())),
            );
            return seq;
        };

        let weak = Arc::downgrade(self);
        self.runtime.spawn(async move {
            let result = fetcher.fetch(&filter).await;
            if let Some(view) = weak.upgrade() {
                view.apply_reload(seq, result);
            }
        });
        seq
    }

    fn apply_reload(&self, seq: u64, result: Result<Vec<Row>, AppError>) {
        {
            let mut state = self.state();
            if seq != self.reload_seq.load(Ordering::Acquire) {
                tracing::trace!(resource_type = %self.resource_type, seq, "Discarding superseded reload");
                return;
            }
            state.loading = false;
            match result {
                Ok(rows) => {
                    state.rows = rows;
                    state.last_known.clear();
                    state.error = None;
                }
                Err(e) => {
                    tracing::warn!(resource_type = %self.resource_type, "Dashboard reload failed, keeping last known rows: {}", e);
                    if state.rows.is_empty() {
                        state.rows = std::mem::take(&mut state.last_known);
                    }
                    state.error = Some(e.to_string());
                }
            }
        }
        self.settled.send_replace(seq);
    }

    fn detach(&self) {
        if let Some(mut binding) = self.binding.lock().unwrap_or_else(|e| e.into_inner()).take() {
            binding.unbind();
        }
        let subscription = {
            let mut state = self.state();
            state.detached = true;
            state.subscription.take()
        };
        if let Some(id) = subscription {
            self.service.unsubscribe(&id);
        }
    }
}

/// Dashboard-side consumer of the realtime service and the invalidation bus.
/// Detaches itself on drop.
pub struct DashboardView {
    inner: Arc<ViewInner>,
}

impl DashboardView {
    /// Subscribe for live updates, listen for invalidation signals, and start
    /// the initial load. Must be called from within a tokio runtime.
    pub fn attach(
        resource_type: ResourceType,
        scope: Option<String>,
        fetchers: FetcherRegistry,
        service: RealtimeService,
        bus: &EventBus,
    ) -> Result<Self, AppError> {
        let runtime = Handle::try_current()
            .map_err(|_| AppError::Internal("dashboard views require a running tokio runtime".into()))?;
        if !fetchers.contains(resource_type) {
            return Err(AppError::NoFetcher(resource_type.to_string()));
        }

        let (settled, _) = watch::channel(0);
        let inner = Arc::new(ViewInner {
            resource_type,
            fetchers,
            service,
            runtime,
            state: Mutex::new(ViewState {
                scope: scope.clone(),
                ..ViewState::default()
            }),
            binding: Mutex::new(None),
            reload_seq: AtomicU64::new(0),
            settled,
        });

        inner.subscribe_live(scope.as_deref())?;

        let mut binding = BusBinding::new(bus.clone());
        for kind in InvalidationKind::ALL {
            let weak = Arc::downgrade(&inner);
            binding.listen(kind, move |event| {
                if let Some(view) = weak.upgrade() {
                    view.on_invalidation(event);
                }
            });
        }
        *inner.binding.lock().unwrap_or_else(|e| e.into_inner()) = Some(binding);

        inner.start_reload();
        tracing::debug!(resource_type = %resource_type, scope = ?scope, "Dashboard view attached");
        Ok(Self { inner })
    }

    pub fn resource_type(&self) -> ResourceType {
        self.inner.resource_type
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        let (scope, rows, loading, error, subscription) = {
            let state = self.inner.state();
            (
                state.scope.clone(),
                state.rows.clone(),
                state.loading,
                state.error.clone(),
                state.subscription.clone(),
            )
        };
        ViewSnapshot {
            resource_type: self.inner.resource_type,
            scope,
            rows,
            loading,
            error,
            live_updates: subscription.is_some_and(|id| self.inner.service.is_subscribed(&id)),
        }
    }

    /// Manual refresh. Returns the reload sequence number.
    pub fn reload(&self) -> u64 {
        self.inner.start_reload()
    }

    /// Wait until the most recently started reload has been applied.
    pub async fn settled(&self) {
        let mut rx = self.inner.settled.subscribe();
        let target = self.inner.reload_seq.load(Ordering::Acquire);
        // The sender lives in `inner`, which we hold, so this cannot close.
        let _ = rx.wait_for(|applied| *applied >= target).await;
    }

    pub fn detach(&self) {
        self.inner.detach();
    }
}

impl Drop for DashboardView {
    fn drop(&mut self) {
        self.inner.detach();
    }
}
