//! Realtime batch polling and cache invalidation for the lead dashboard.
//!
//! [`RealtimeService`] multiplexes many logical subscriptions onto one shared
//! poll timer, issuing at most one fetch per resource type per tick.
//! [`EventBus`] carries in-process invalidation signals that force dashboard
//! views (and, when bound, the batch cache) to reload ahead of the cadence.

pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod supabase;

use std::sync::Arc;

pub use config::RealtimeConfig;
pub use engine::{
    ConnectionStatus, DashboardView, EventBus, FetchFilter, FetcherRegistry, InvalidationBinding,
    InvalidationEvent, InvalidationKind, Predicate, RealtimeService, ResourceFetcher, ResourceType,
    Row,
};
pub use error::AppError;
pub use supabase::{SupabaseClient, SupabaseConfig};

/// Application root: one realtime service and one invalidation bus, wired
/// together so bus signals also expire the batch cache.
pub struct SyncContext {
    pub fetchers: FetcherRegistry,
    pub realtime: RealtimeService,
    pub bus: EventBus,
    _binding: InvalidationBinding,
}

impl SyncContext {
    pub fn new(config: RealtimeConfig, fetchers: FetcherRegistry) -> Result<Self, AppError> {
        let realtime = RealtimeService::new(config, fetchers.clone())?;
        let bus = EventBus::new();
        let binding = realtime.bind_invalidation(&bus);
        Ok(Self {
            fetchers,
            realtime,
            bus,
            _binding: binding,
        })
    }

    /// Realtime settings and Supabase credentials from the environment.
    pub fn from_env() -> Result<Self, AppError> {
        let config = RealtimeConfig::from_env()?;
        let client = Arc::new(SupabaseClient::from_env()?);
        tracing::info!(
            poll_secs = config.poll_interval.as_secs(),
            cache_ttl_secs = config.cache_ttl.as_secs(),
            "Starting leadboard sync v{}",
            env!("CARGO_PKG_VERSION")
        );
        Self::new(config, client.registry())
    }

    pub fn open_dashboard(
        &self,
        resource_type: ResourceType,
        project_id: Option<String>,
    ) -> Result<DashboardView, AppError> {
        DashboardView::attach(
            resource_type,
            project_id,
            self.fetchers.clone(),
            self.realtime.clone(),
            &self.bus,
        )
    }

    /// Tear down every subscription and stop the poll timer.
    pub fn shutdown(&self) -> usize {
        self.realtime.unsubscribe_all()
    }
}
