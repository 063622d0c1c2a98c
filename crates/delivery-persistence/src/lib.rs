//! # Delivery Persistence Library
//!
//! Storage and notification transport for the drone delivery engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Dispatch / Simulation                     │
//! └─────────────────────────────────────────────────────────────┘
//!                │                                │
//!                ▼                                ▼
//! ┌──────────────────────────────┐  ┌──────────────────────────┐
//! │   UnitOfWork + Repositories  │  │     NotificationBus      │
//! │  (conditional status writes) │  │  (best-effort publish)   │
//! └──────────────────────────────┘  └──────────────────────────┘
//!        │               │                 │              │
//!        ▼               ▼                 ▼              ▼
//! ┌─────────────┐ ┌─────────────┐  ┌─────────────┐ ┌─────────────┐
//! │  In-memory  │ │  ScyllaDB   │  │  broadcast  │ │ Redis PUB   │
//! └─────────────┘ └─────────────┘  └─────────────┘ └─────────────┘
//! ```
//!
//! ## Features
//!
//! - `scylla`: Enable ScyllaDB backend (default)
//! - `redis`: Enable Redis pub/sub bus (default)

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod bus;
pub mod error;
pub mod repository;

// Re-export commonly used types
pub use bus::{BroadcastBus, NotificationBus, SharedBus, TopicSubscription};
#[cfg(feature = "redis")]
pub use bus::{RedisBus, RedisBusConfig};
pub use error::{BusError, PersistenceError, Result};
pub use repository::{
    AssignmentCommit, AssignmentRecord, DeliveryRepository, DroneRepository, InMemoryStore,
    LocationRepository, MetricsRepository, RouteRepository, StepCommit, StepRecord,
    TelemetryRepository, UnitOfWork,
};
#[cfg(feature = "scylla")]
pub use repository::{ScyllaClient, ScyllaConfig, ScyllaStore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
