//! In-process invalidation bus.
//!
//! UI actions (project switch, manual refresh, a write completing) publish a
//! named invalidation signal; every listener currently registered for that
//! kind runs synchronously, in registration order. Signals are fire-and-forget:
//! nothing is queued or replayed for listeners that register later.
//!
//! Each published event is also mirrored onto a `tokio::sync::broadcast`
//! channel for async consumers.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::types::ResourceType;
use crate::error::AppError;

const BUS_CAPACITY: usize = 256;

// =============================================================================
// Event types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvalidationKind {
    ProjectChanged,
    ProjectDataInvalidated,
    ForceDashboardRefresh,
    LeadsDataRefresh,
    ProjectDataRefresh,
}

impl InvalidationKind {
    pub const ALL: [InvalidationKind; 5] = [
        InvalidationKind::ProjectChanged,
        InvalidationKind::ProjectDataInvalidated,
        InvalidationKind::ForceDashboardRefresh,
        InvalidationKind::LeadsDataRefresh,
        InvalidationKind::ProjectDataRefresh,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidationKind::ProjectChanged => "project-changed",
            InvalidationKind::ProjectDataInvalidated => "project-data-invalidated",
            InvalidationKind::ForceDashboardRefresh => "force-dashboard-refresh",
            InvalidationKind::LeadsDataRefresh => "leads-data-refresh",
            InvalidationKind::ProjectDataRefresh => "project-data-refresh",
        }
    }

    /// Resource types whose cached rows go stale on this signal.
    pub fn affected_resources(&self) -> &'static [ResourceType] {
        match self {
            InvalidationKind::LeadsDataRefresh => &[ResourceType::Leads],
            InvalidationKind::ProjectChanged
            | InvalidationKind::ProjectDataInvalidated
            | InvalidationKind::ProjectDataRefresh => &[ResourceType::Projects, ResourceType::Leads],
            InvalidationKind::ForceDashboardRefresh => &ResourceType::ALL,
        }
    }
}

impl fmt::Display for InvalidationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvalidationKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InvalidationKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| AppError::Validation(format!("unknown invalidation event '{s}'")))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationDetail {
    /// Scope of the signal; `None` means every project.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidationEvent {
    pub kind: InvalidationKind,
    #[serde(default)]
    pub detail: InvalidationDetail,
    pub emitted_at: DateTime<Utc>,
}

impl InvalidationEvent {
    pub fn new(kind: InvalidationKind, project_id: Option<String>) -> Self {
        Self {
            kind,
            detail: InvalidationDetail { project_id },
            emitted_at: Utc::now(),
        }
    }

    pub fn project_id(&self) -> Option<&str> {
        self.detail.project_id.as_deref()
    }
}

// =============================================================================
// Bus
// =============================================================================

pub type ListenerId = u64;

type Handler = Arc<dyn Fn(&InvalidationEvent) + Send + Sync>;

struct BusInner {
    listeners: Mutex<HashMap<InvalidationKind, Vec<(ListenerId, Handler)>>>,
    next_id: AtomicU64,
    tx: broadcast::Sender<InvalidationEvent>,
}

/// Process-local publish/subscribe for invalidation signals. Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            inner: Arc::new(BusInner {
                listeners: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                tx,
            }),
        }
    }

    fn listeners(&self) -> std::sync::MutexGuard<'_, HashMap<InvalidationKind, Vec<(ListenerId, Handler)>>> {
        self.inner.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribe<F>(&self, kind: InvalidationKind, handler: F) -> ListenerId
    where
        F: Fn(&InvalidationEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    pub fn unsubscribe(&self, kind: InvalidationKind, id: ListenerId) -> bool {
        let mut listeners = self.listeners();
        let Some(handlers) = listeners.get_mut(&kind) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(lid, _)| *lid != id);
        before != handlers.len()
    }

    pub fn listener_count(&self, kind: InvalidationKind) -> usize {
        self.listeners().get(&kind).map_or(0, Vec::len)
    }

    fn is_registered(&self, kind: InvalidationKind, id: ListenerId) -> bool {
        self.listeners()
            .get(&kind)
            .is_some_and(|handlers| handlers.iter().any(|(lid, _)| *lid == id))
    }

    /// Run every handler for `event.kind` synchronously and mirror the event
    /// onto the broadcast stream. Returns the number of handlers invoked.
    ///
    /// Handlers run without the listener lock held, so they may subscribe or
    /// unsubscribe. A handler removed by an earlier handler in the same
    /// publish is skipped.
    pub fn publish(&self, event: InvalidationEvent) -> usize {
        let snapshot: Vec<(ListenerId, Handler)> = self
            .listeners()
            .get(&event.kind)
            .cloned()
            .unwrap_or_default();

        let mut invoked = 0;
        for (id, handler) in snapshot {
            if !self.is_registered(event.kind, id) {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                tracing::error!(event = %event.kind, listener_id = id, "Invalidation listener panicked");
                continue;
            }
            invoked += 1;
        }

        tracing::debug!(
            event = %event.kind,
            project_id = event.project_id().unwrap_or("*"),
            listeners = invoked,
            "Invalidation published"
        );

        // No stream receivers is the normal case.
        let _ = self.inner.tx.send(event);
        invoked
    }

    /// Build and publish an event in one call.
    pub fn emit(&self, kind: InvalidationKind, project_id: Option<String>) -> usize {
        self.publish(InvalidationEvent::new(kind, project_id))
    }

    /// Receive every event published from now on.
    pub fn subscribe_stream(&self) -> broadcast::Receiver<InvalidationEvent> {
        self.inner.tx.subscribe()
    }
}

// =============================================================================
// Binding
// =============================================================================

/// A set of bus listeners removed together on [`unbind`](Self::unbind) or drop.
pub struct BusBinding {
    bus: EventBus,
    listeners: Vec<(InvalidationKind, ListenerId)>,
}

impl BusBinding {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            listeners: Vec::new(),
        }
    }

    pub fn listen<F>(&mut self, kind: InvalidationKind, handler: F) -> ListenerId
    where
        F: Fn(&InvalidationEvent) + Send + Sync + 'static,
    {
        let id = self.bus.subscribe(kind, handler);
        self.listeners.push((kind, id));
        id
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn unbind(&mut self) -> usize {
        let mut removed = 0;
        for (kind, id) in self.listeners.drain(..) {
            if self.bus.unsubscribe(kind, id) {
                removed += 1;
            }
        }
        removed
    }
}

impl Drop for BusBinding {
    fn drop(&mut self) {
        self.unbind();
    }
}
