//! Subscription registry for the batch poller.
//!
//! A [`Subscription`] is a logical interest registration: one resource type,
//! one equality [`Predicate`], one callback. The registry keeps them in
//! registration order so dispatch within a batch group is stable.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::types::{Predicate, ResourceType, Row};

pub type SubscriptionId = String;

/// Receives the full set of rows matching the subscriber's predicate, once per tick.
pub type Callback = Arc<dyn Fn(&[Row]) + Send + Sync>;

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

pub struct Subscription {
    pub id: SubscriptionId,
    pub resource_type: ResourceType,
    pub predicate: Predicate,
    callback: Callback,
    active: AtomicBool,
    last_delivered: Mutex<Option<DateTime<Utc>>>,
}

impl Subscription {
    fn new(resource_type: ResourceType, predicate: Predicate, callback: Callback) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            resource_type,
            predicate,
            callback,
            active: AtomicBool::new(true),
            last_delivered: Mutex::new(None),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Mark inactive. Returns `true` only for the call that flipped the flag.
    pub fn deactivate(&self) -> bool {
        self.active.swap(false, Ordering::AcqRel)
    }

    pub fn last_delivered(&self) -> Option<DateTime<Utc>> {
        *self.last_delivered.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Filter a batch down to this subscriber's rows and invoke the callback.
    ///
    /// `active` is re-checked here, not only at snapshot time, so an
    /// unsubscribe that lands while the batch fetch is in flight is honoured.
    /// Returns whether the callback ran to completion.
    pub fn deliver(&self, batch: &[Row]) -> bool {
        if !self.is_active() {
            return false;
        }
        let matching: Vec<Row> = batch
            .iter()
            .filter(|row| self.predicate.matches(row))
            .cloned()
            .collect();

        let callback = &self.callback;
        if catch_unwind(AssertUnwindSafe(|| callback(matching.as_slice()))).is_err() {
            tracing::error!(
                subscription_id = %self.id,
                resource_type = %self.resource_type,
                "Subscription callback panicked"
            );
            return false;
        }

        *self.last_delivered.lock().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
        true
    }

    pub fn info(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            id: self.id.clone(),
            resource_type: self.resource_type,
            predicate: self.predicate.clone(),
            active: self.is_active(),
            last_delivered: self.last_delivered(),
        }
    }
}

/// Diagnostic view of one subscription.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionInfo {
    pub id: SubscriptionId,
    pub resource_type: ResourceType,
    pub predicate: Predicate,
    pub active: bool,
    pub last_delivered: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: Vec<Arc<Subscription>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        resource_type: ResourceType,
        predicate: Predicate,
        callback: Callback,
    ) -> Arc<Subscription> {
        let sub = Arc::new(Subscription::new(resource_type, predicate, callback));
        self.entries.push(sub.clone());
        sub
    }

    pub fn remove(&mut self, id: &str) -> Option<Arc<Subscription>> {
        let pos = self.entries.iter().position(|s| s.id == id)?;
        Some(self.entries.remove(pos))
    }

    /// Remove every subscription of one resource type.
    pub fn remove_group(&mut self, resource_type: ResourceType) -> Vec<Arc<Subscription>> {
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|s| s.resource_type == resource_type);
        self.entries = kept;
        removed
    }

    pub fn drain(&mut self) -> Vec<Arc<Subscription>> {
        std::mem::take(&mut self.entries)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Subscription>> {
        self.entries.iter().find(|s| s.id == id).cloned()
    }

    /// Active subscriptions grouped by resource type, registration order kept.
    pub fn groups(&self) -> BTreeMap<ResourceType, Vec<Arc<Subscription>>> {
        let mut groups: BTreeMap<ResourceType, Vec<Arc<Subscription>>> = BTreeMap::new();
        for sub in self.entries.iter().filter(|s| s.is_active()) {
            groups.entry(sub.resource_type).or_default().push(sub.clone());
        }
        groups
    }

    pub fn count_for(&self, resource_type: ResourceType) -> usize {
        self.entries
            .iter()
            .filter(|s| s.resource_type == resource_type && s.is_active())
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn infos(&self) -> Vec<SubscriptionInfo> {
        self.entries.iter().map(|s| s.info()).collect()
    }
}
