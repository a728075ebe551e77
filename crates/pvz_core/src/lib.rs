//! Core domain logic for pickup-point (PVZ) operations.
//! This crate is the single source of truth for reception and item invariants.

pub mod config;
pub mod context;
pub mod db;
pub mod model;
pub mod repo;
pub mod service;
pub mod telemetry;

pub use config::{ConfigError, PvzConfig};
pub use context::{DoneReason, RequestContext};
pub use db::{DbError, DbResult};
pub use model::item::{Category, Item, ItemId, NewItem};
pub use model::pickup_point::{
    PickupPoint, PickupPointId, PickupPointWithReceptions, ALLOWED_CITIES,
};
pub use model::reception::{Reception, ReceptionId, ReceptionStatus, ReceptionWithItems};
pub use model::ValidationError;
pub use repo::error::{
    ConflictKind, Entity, ErrorKind, NotFoundKind, PreconditionKind, RepoError, RepoResult,
};
pub use repo::memory_repo::InMemoryPvzRepository;
pub use repo::pvz_repo::{PickupPointListQuery, PvzRepository, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
pub use repo::sqlite_repo::SqlitePvzRepository;
pub use service::pvz_service::{ListRequest, PvzService, ServiceError, ServiceResult};
pub use telemetry::{default_log_level, MetricEvent, Metrics, MetricsSnapshot, Telemetry};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
