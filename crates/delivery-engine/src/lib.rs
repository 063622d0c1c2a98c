//! # Delivery Engine
//!
//! Dispatch and flight simulation for autonomous drone delivery.
//!
//! ## Components
//!
//! - [`FleetRegistry`]: drone lookups, conditional status writes, per-drone work locks
//! - [`DispatchEngine`]: nearest idle drone within range, committed atomically with the route
//! - [`state_machine`]: one tick of movement, battery policy and arrival
//! - [`Simulation`] / [`Scheduler`]: periodic ticks across the active fleet
//! - [`TelemetryRecorder`]: sample storage and `drone.<id>` publishing
//! - [`MetricsAggregator`]: the daily rollup
//! - [`DeliveryService`]: the facade the API layer and the scheduler call

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod fleet;
pub mod metrics;
pub mod scheduler;
pub mod service;
pub mod simulation;
pub mod state_machine;
pub mod telemetry;

pub use clock::{Clock, ManualClock, SystemClock, TelemetryNoise};
pub use config::{BusBackend, EngineConfig, LogFormat, StorageBackend};
pub use dispatch::{AssignmentOutcome, DispatchEngine};
pub use error::{EngineError, Result};
pub use fleet::FleetRegistry;
pub use metrics::MetricsAggregator;
pub use scheduler::Scheduler;
pub use service::{DeliveryService, DispatchSummary};
pub use simulation::{Simulation, TickReport};
pub use state_machine::{FlightParams, StepOutcome};
pub use telemetry::TelemetryRecorder;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
