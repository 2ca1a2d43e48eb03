pub mod bus;
pub mod cache;
pub mod dashboard;
pub mod failover;
pub mod fetcher;
pub mod realtime;
pub mod subscription;
pub mod types;

pub use bus::{BusBinding, EventBus, InvalidationDetail, InvalidationEvent, InvalidationKind, ListenerId};
pub use dashboard::{DashboardView, ViewSnapshot};
pub use failover::{ConnectionStatus, GroupHealth};
pub use fetcher::{ApiResponse, FetcherRegistry, MemoryFetcher, ResourceFetcher};
pub use realtime::{GroupOutcome, GroupSource, RealtimeService, RealtimeStats, TickReport};
pub use subscription::{SubscriptionId, SubscriptionInfo};
pub use types::{FetchFilter, Predicate, ResourceType, Row};

/// Listener set returned by [`RealtimeService::bind_invalidation`].
pub type InvalidationBinding = BusBinding;
