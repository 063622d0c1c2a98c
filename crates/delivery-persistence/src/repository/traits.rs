//! # Repository Traits
//!
//! Abstract repository interfaces for domain entities.
//! Implementations can be swapped for different backends (ScyllaDB, in-memory, etc.)
//!
//! Status writes are conditional: every mutation that moves a drone or a
//! delivery between statuses names the status it expects to overwrite and
//! reports whether it won. Callers never assume a blind write landed.

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::error::Result;
use delivery_domain::{
    DailyMetrics, DeliveryRequest, DeliveryStatus, Drone, DroneStatus, Location, Route,
    TelemetrySample, TimeRange,
};

// =============================================================================
// LOCATION REPOSITORY
// =============================================================================

/// Repository for Location entity operations
#[async_trait]
pub trait LocationRepository: Send + Sync {
    /// Get location by ID
    async fn get_by_id(&self, location_id: Uuid) -> Result<Option<Location>>;

    /// Create a new location
    async fn create(&self, location: &Location) -> Result<()>;

    /// All locations flagged as depots
    async fn list_depots(&self) -> Result<Vec<Location>>;
}

// =============================================================================
// DRONE REPOSITORY
// =============================================================================

/// Repository for Drone entity operations
#[async_trait]
pub trait DroneRepository: Send + Sync {
    /// Get drone by ID
    async fn get_by_id(&self, drone_id: Uuid) -> Result<Option<Drone>>;

    /// Get drones whose status is any of `statuses`
    async fn get_by_status(&self, statuses: &[DroneStatus]) -> Result<Vec<Drone>>;

    /// Create a new drone
    async fn create(&self, drone: &Drone) -> Result<()>;

    /// Set status to `next` only if it is still `expected`
    async fn compare_and_set_status(
        &self,
        drone_id: Uuid,
        expected: DroneStatus,
        next: DroneStatus,
    ) -> Result<bool>;

    /// Write status, battery and position only if the stored status is still `expected`
    async fn save_state(&self, drone: &Drone, expected: DroneStatus) -> Result<bool>;
}

// =============================================================================
// DELIVERY REPOSITORY
// =============================================================================

/// Repository for DeliveryRequest entity operations
#[async_trait]
pub trait DeliveryRepository: Send + Sync {
    /// Get delivery by ID
    async fn get_by_id(&self, delivery_id: Uuid) -> Result<Option<DeliveryRequest>>;

    /// Create a new delivery
    async fn create(&self, delivery: &DeliveryRequest) -> Result<()>;

    /// The delivery currently occupying a drone (assigned, in progress or returning)
    async fn get_active_for_drone(&self, drone_id: Uuid) -> Result<Option<DeliveryRequest>>;

    /// Deliveries still waiting for a drone, most urgent first
    async fn get_pending(&self, limit: Option<usize>) -> Result<Vec<DeliveryRequest>>;

    /// Deliveries created inside `range`
    async fn list_created_between(&self, range: TimeRange) -> Result<Vec<DeliveryRequest>>;

    /// Write the mutable fields only if the stored status is still `expected`
    async fn save_state(&self, delivery: &DeliveryRequest, expected: DeliveryStatus) -> Result<bool>;
}

// =============================================================================
// ROUTE REPOSITORY
// =============================================================================

/// Repository for Route entity operations
#[async_trait]
pub trait RouteRepository: Send + Sync {
    /// Get the route of a delivery
    async fn get_by_delivery(&self, delivery_id: Uuid) -> Result<Option<Route>>;
}

// =============================================================================
// TELEMETRY REPOSITORY
// =============================================================================

/// Repository for Telemetry entity operations
#[async_trait]
pub trait TelemetryRepository: Send + Sync {
    /// Latest samples for a drone, newest first
    async fn get_latest(&self, drone_id: Uuid, limit: usize) -> Result<Vec<TelemetrySample>>;

    /// Append a telemetry sample
    async fn insert(&self, sample: &TelemetrySample) -> Result<()>;
}

// =============================================================================
// METRICS REPOSITORY
// =============================================================================

/// Repository for DailyMetrics operations
#[async_trait]
pub trait MetricsRepository: Send + Sync {
    /// Get the rollup for a date
    async fn get_by_date(&self, date: NaiveDate) -> Result<Option<DailyMetrics>>;

    /// Insert or replace the rollup for `metrics.date`
    async fn upsert(&self, metrics: &DailyMetrics) -> Result<()>;
}

// =============================================================================
// UNIT OF WORK
// =============================================================================

/// Everything a successful dispatch writes, committed as one unit
#[derive(Debug, Clone)]
pub struct AssignmentRecord {
    pub drone_id: Uuid,
    /// Delivery already carrying `assigned` status, drone, distance and estimate
    pub delivery: DeliveryRequest,
    pub route: Route,
}

/// Result of an assignment commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentCommit {
    /// Drone claimed, delivery assigned, route stored
    Committed,
    /// The drone was no longer idle; nothing was written
    DroneUnavailable,
    /// The delivery was no longer pending; nothing was written
    DeliveryUnavailable,
}

/// A drone and its delivery as read before a simulation step and as left after it
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub drone_before: Drone,
    pub drone: Drone,
    pub delivery_before: DeliveryRequest,
    pub delivery: DeliveryRequest,
}

impl StepRecord {
    /// The delivery row only needs writing when the step touched it
    #[must_use]
    pub fn delivery_changed(&self) -> bool {
        self.delivery != self.delivery_before
    }
}

/// Result of a step commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepCommit {
    /// Both records written
    Committed,
    /// The drone's status moved since it was read; nothing was written
    DroneChanged,
    /// The delivery's status moved since it was read; nothing was written
    DeliveryChanged,
}

/// Unit of Work pattern for transactional operations
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    /// Get location repository
    fn locations(&self) -> &dyn LocationRepository;

    /// Get drone repository
    fn drones(&self) -> &dyn DroneRepository;

    /// Get delivery repository
    fn deliveries(&self) -> &dyn DeliveryRepository;

    /// Get route repository
    fn routes(&self) -> &dyn RouteRepository;

    /// Get telemetry repository
    fn telemetry(&self) -> &dyn TelemetryRepository;

    /// Get metrics repository
    fn metrics(&self) -> &dyn MetricsRepository;

    /// Claim the drone (idle -> in_transit), assign the delivery
    /// (pending -> assigned) and store the route, all or nothing.
    async fn commit_assignment(&self, assignment: &AssignmentRecord) -> Result<AssignmentCommit>;

    /// Write a step's drone and delivery, each conditional on the status it
    /// was read with, all or nothing.
    async fn commit_step(&self, step: &StepRecord) -> Result<StepCommit>;
}
