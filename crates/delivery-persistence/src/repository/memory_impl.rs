//! In-memory repository implementation.
//!
//! All tables sit behind a single `RwLock`, so each conditional write and
//! the assignment commit are atomic with respect to every other operation.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::traits::{
    AssignmentCommit, AssignmentRecord, DeliveryRepository, DroneRepository, LocationRepository,
    MetricsRepository, RouteRepository, StepCommit, StepRecord, TelemetryRepository, UnitOfWork,
};
use crate::error::{PersistenceError, Result};
use delivery_domain::{
    DailyMetrics, DeliveryRequest, DeliveryStatus, Drone, DroneStatus, Location, Route,
    TelemetrySample, TimeRange,
};

#[derive(Default)]
struct Tables {
    locations: HashMap<Uuid, Location>,
    drones: HashMap<Uuid, Drone>,
    deliveries: HashMap<Uuid, DeliveryRequest>,
    routes: HashMap<Uuid, Route>,
    telemetry: HashMap<Uuid, Vec<TelemetrySample>>,
    metrics: HashMap<NaiveDate, DailyMetrics>,
}

/// Process-local store implementing every repository
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

// =============================================================================
// LOCATION REPOSITORY
// =============================================================================

#[async_trait]
impl LocationRepository for InMemoryStore {
    async fn get_by_id(&self, location_id: Uuid) -> Result<Option<Location>> {
        Ok(self.tables.read().await.locations.get(&location_id).cloned())
    }

    async fn create(&self, location: &Location) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.locations.contains_key(&location.location_id) {
            return Err(PersistenceError::duplicate("Location", location.location_id));
        }
        tables.locations.insert(location.location_id, location.clone());
        Ok(())
    }

    async fn list_depots(&self) -> Result<Vec<Location>> {
        let tables = self.tables.read().await;
        Ok(tables
            .locations
            .values()
            .filter(|l| l.is_depot)
            .cloned()
            .collect())
    }
}

// =============================================================================
// DRONE REPOSITORY
// =============================================================================

#[async_trait]
impl DroneRepository for InMemoryStore {
    async fn get_by_id(&self, drone_id: Uuid) -> Result<Option<Drone>> {
        Ok(self.tables.read().await.drones.get(&drone_id).cloned())
    }

    async fn get_by_status(&self, statuses: &[DroneStatus]) -> Result<Vec<Drone>> {
        let tables = self.tables.read().await;
        Ok(tables
            .drones
            .values()
            .filter(|d| statuses.contains(&d.status))
            .cloned()
            .collect())
    }

    async fn create(&self, drone: &Drone) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.drones.contains_key(&drone.drone_id) {
            return Err(PersistenceError::duplicate("Drone", drone.drone_id));
        }
        tables.drones.insert(drone.drone_id, drone.clone());
        Ok(())
    }

    async fn compare_and_set_status(
        &self,
        drone_id: Uuid,
        expected: DroneStatus,
        next: DroneStatus,
    ) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let drone = tables
            .drones
            .get_mut(&drone_id)
            .ok_or_else(|| PersistenceError::not_found("Drone", drone_id))?;

        if drone.status != expected {
            return Ok(false);
        }
        drone.status = next;
        Ok(true)
    }

    async fn save_state(&self, drone: &Drone, expected: DroneStatus) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .drones
            .get_mut(&drone.drone_id)
            .ok_or_else(|| PersistenceError::not_found("Drone", drone.drone_id))?;

        if stored.status != expected {
            return Ok(false);
        }
        apply_drone(stored, drone);
        Ok(true)
    }
}

fn apply_drone(stored: &mut Drone, drone: &Drone) {
    stored.status = drone.status;
    stored.battery_level = drone.battery_level;
    stored.current_location = drone.current_location;
    stored.updated_at = drone.updated_at;
}

fn apply_delivery(stored: &mut DeliveryRequest, delivery: &DeliveryRequest) {
    stored.status = delivery.status;
    stored.assigned_drone = delivery.assigned_drone;
    stored.distance_m = delivery.distance_m;
    stored.estimated_duration_min = delivery.estimated_duration_min;
    stored.actual_duration_min = delivery.actual_duration_min;
}

// =============================================================================
// DELIVERY REPOSITORY
// =============================================================================

#[async_trait]
impl DeliveryRepository for InMemoryStore {
    async fn get_by_id(&self, delivery_id: Uuid) -> Result<Option<DeliveryRequest>> {
        Ok(self.tables.read().await.deliveries.get(&delivery_id).cloned())
    }

    async fn create(&self, delivery: &DeliveryRequest) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.deliveries.contains_key(&delivery.delivery_id) {
            return Err(PersistenceError::duplicate("DeliveryRequest", delivery.delivery_id));
        }
        tables.deliveries.insert(delivery.delivery_id, delivery.clone());
        Ok(())
    }

    async fn get_active_for_drone(&self, drone_id: Uuid) -> Result<Option<DeliveryRequest>> {
        let tables = self.tables.read().await;
        Ok(tables
            .deliveries
            .values()
            .filter(|d| d.assigned_drone == Some(drone_id) && d.status.is_active())
            .max_by_key(|d| d.created_at)
            .cloned())
    }

    async fn get_pending(&self, limit: Option<usize>) -> Result<Vec<DeliveryRequest>> {
        let tables = self.tables.read().await;
        let mut pending: Vec<DeliveryRequest> = tables
            .deliveries
            .values()
            .filter(|d| d.status == DeliveryStatus::Pending)
            .cloned()
            .collect();

        pending.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        if let Some(limit) = limit {
            pending.truncate(limit);
        }
        Ok(pending)
    }

    async fn list_created_between(&self, range: TimeRange) -> Result<Vec<DeliveryRequest>> {
        let tables = self.tables.read().await;
        Ok(tables
            .deliveries
            .values()
            .filter(|d| range.contains(&d.created_at))
            .cloned()
            .collect())
    }

    async fn save_state(&self, delivery: &DeliveryRequest, expected: DeliveryStatus) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .deliveries
            .get_mut(&delivery.delivery_id)
            .ok_or_else(|| PersistenceError::not_found("DeliveryRequest", delivery.delivery_id))?;

        if stored.status != expected {
            return Ok(false);
        }
        apply_delivery(stored, delivery);
        Ok(true)
    }
}

// =============================================================================
// ROUTE / TELEMETRY / METRICS REPOSITORIES
// =============================================================================

#[async_trait]
impl RouteRepository for InMemoryStore {
    async fn get_by_delivery(&self, delivery_id: Uuid) -> Result<Option<Route>> {
        Ok(self.tables.read().await.routes.get(&delivery_id).cloned())
    }
}

#[async_trait]
impl TelemetryRepository for InMemoryStore {
    async fn get_latest(&self, drone_id: Uuid, limit: usize) -> Result<Vec<TelemetrySample>> {
        let tables = self.tables.read().await;
        let Some(samples) = tables.telemetry.get(&drone_id) else {
            return Ok(Vec::new());
        };

        // Newest insert wins ties on equal timestamps
        let mut latest: Vec<TelemetrySample> = samples.iter().rev().cloned().collect();
        latest.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        latest.truncate(limit);
        Ok(latest)
    }

    async fn insert(&self, sample: &TelemetrySample) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables
            .telemetry
            .entry(sample.drone_id)
            .or_default()
            .push(sample.clone());
        Ok(())
    }
}

#[async_trait]
impl MetricsRepository for InMemoryStore {
    async fn get_by_date(&self, date: NaiveDate) -> Result<Option<DailyMetrics>> {
        Ok(self.tables.read().await.metrics.get(&date).cloned())
    }

    async fn upsert(&self, metrics: &DailyMetrics) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.metrics.insert(metrics.date, metrics.clone());
        Ok(())
    }
}

// =============================================================================
// UNIT OF WORK
// =============================================================================

#[async_trait]
impl UnitOfWork for InMemoryStore {
    fn locations(&self) -> &dyn LocationRepository {
        self
    }

    fn drones(&self) -> &dyn DroneRepository {
        self
    }

    fn deliveries(&self) -> &dyn DeliveryRepository {
        self
    }

    fn routes(&self) -> &dyn RouteRepository {
        self
    }

    fn telemetry(&self) -> &dyn TelemetryRepository {
        self
    }

    fn metrics(&self) -> &dyn MetricsRepository {
        self
    }

    async fn commit_assignment(&self, assignment: &AssignmentRecord) -> Result<AssignmentCommit> {
        let mut tables = self.tables.write().await;
        let delivery_id = assignment.delivery.delivery_id;

        let drone_idle = tables
            .drones
            .get(&assignment.drone_id)
            .ok_or_else(|| PersistenceError::not_found("Drone", assignment.drone_id))?
            .status
            == DroneStatus::Idle;
        if !drone_idle {
            return Ok(AssignmentCommit::DroneUnavailable);
        }

        let delivery_pending = tables
            .deliveries
            .get(&delivery_id)
            .ok_or_else(|| PersistenceError::not_found("DeliveryRequest", delivery_id))?
            .status
            == DeliveryStatus::Pending;
        if !delivery_pending || tables.routes.contains_key(&delivery_id) {
            return Ok(AssignmentCommit::DeliveryUnavailable);
        }

        if let Some(drone) = tables.drones.get_mut(&assignment.drone_id) {
            drone.status = DroneStatus::InTransit;
        }
        tables.deliveries.insert(delivery_id, assignment.delivery.clone());
        tables.routes.insert(delivery_id, assignment.route.clone());

        Ok(AssignmentCommit::Committed)
    }

    async fn commit_step(&self, step: &StepRecord) -> Result<StepCommit> {
        let mut tables = self.tables.write().await;
        let drone_id = step.drone.drone_id;
        let delivery_id = step.delivery.delivery_id;

        let drone_status = tables
            .drones
            .get(&drone_id)
            .ok_or_else(|| PersistenceError::not_found("Drone", drone_id))?
            .status;
        if drone_status != step.drone_before.status {
            return Ok(StepCommit::DroneChanged);
        }

        let write_delivery = step.delivery_changed();
        if write_delivery {
            let delivery_status = tables
                .deliveries
                .get(&delivery_id)
                .ok_or_else(|| PersistenceError::not_found("DeliveryRequest", delivery_id))?
                .status;
            if delivery_status != step.delivery_before.status {
                return Ok(StepCommit::DeliveryChanged);
            }
        }

        if let Some(stored) = tables.drones.get_mut(&drone_id) {
            apply_drone(stored, &step.drone);
        }
        if write_delivery {
            if let Some(stored) = tables.deliveries.get_mut(&delivery_id) {
                apply_delivery(stored, &step.delivery);
            }
        }

        Ok(StepCommit::Committed)
    }
}
