//! # Repository Module
//!
//! Repository pattern implementations for domain entity persistence.

pub mod memory_impl;
#[cfg(feature = "scylla")]
pub mod scylla_impl;
pub mod traits;

pub use memory_impl::InMemoryStore;
#[cfg(feature = "scylla")]
pub use scylla_impl::{ScyllaClient, ScyllaConfig, ScyllaStore};
pub use traits::{
    AssignmentCommit, AssignmentRecord, DeliveryRepository, DroneRepository, LocationRepository,
    MetricsRepository, RouteRepository, StepCommit, StepRecord, TelemetryRepository, UnitOfWork,
};
