//! # Delivery Service
//!
//! Entry points for the CRUD/API layer and the scheduler: locations, fleet,
//! deliveries, dispatch, ticks, telemetry and read queries.

use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use delivery_domain::{
    DailyMetrics, DeliveryRequest, Drone, GeoPoint, Location, Route, TelemetrySample,
};
use delivery_persistence::{SharedBus, UnitOfWork};

use crate::clock::{Clock, TelemetryNoise};
use crate::config::EngineConfig;
use crate::dispatch::{AssignmentOutcome, DispatchEngine};
use crate::error::{EngineError, Result};
use crate::fleet::FleetRegistry;
use crate::metrics::MetricsAggregator;
use crate::simulation::{Simulation, TickReport};
use crate::telemetry::TelemetryRecorder;

/// Result of sweeping the pending queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub assigned: usize,
    pub waiting: usize,
    pub rejected: usize,
}

/// Facade over dispatch and simulation
pub struct DeliveryService {
    store: Arc<dyn UnitOfWork>,
    fleet: Arc<FleetRegistry>,
    dispatcher: DispatchEngine,
    simulation: Arc<Simulation>,
    recorder: Arc<TelemetryRecorder>,
    clock: Arc<dyn Clock>,
}

impl DeliveryService {
    pub fn new(
        store: Arc<dyn UnitOfWork>,
        bus: SharedBus,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> Self {
        let fleet = Arc::new(FleetRegistry::new(Arc::clone(&store)));
        let recorder = Arc::new(TelemetryRecorder::new(
            Arc::clone(&store),
            Arc::clone(&bus),
            TelemetryNoise::new(config.sim_seed),
        ));
        let metrics = Arc::new(MetricsAggregator::new(
            Arc::clone(&store),
            config.cost_per_delivery,
        ));
        let dispatcher = DispatchEngine::new(
            Arc::clone(&store),
            Arc::clone(&fleet),
            Arc::clone(&clock),
            config.search_radius_m(),
            config.cruise_speed_mps,
        );
        let simulation = Arc::new(Simulation::new(
            Arc::clone(&store),
            Arc::clone(&fleet),
            Arc::clone(&recorder),
            metrics,
            bus,
            Arc::clone(&clock),
            config.flight,
        ));

        Self {
            store,
            fleet,
            dispatcher,
            simulation,
            recorder,
            clock,
        }
    }

    // =========================================================================
    // LOCATIONS & FLEET
    // =========================================================================

    pub async fn create_location(
        &self,
        name: &str,
        coordinates: GeoPoint,
        is_depot: bool,
        address: Option<String>,
    ) -> Result<Location> {
        coordinates
            .validate()
            .map_err(|e| EngineError::InvalidInput(e.to_string()))?;

        let location = Location {
            is_depot,
            address,
            ..Location::new(name, coordinates)
        };
        self.store.locations().create(&location).await?;

        tracing::info!(
            location_id = %location.location_id,
            name = %location.name,
            is_depot,
            "Location created"
        );
        Ok(location)
    }

    pub async fn list_depots(&self) -> Result<Vec<Location>> {
        Ok(self.store.locations().list_depots().await?)
    }

    /// Register an idle drone at `at`
    pub async fn register_drone(
        &self,
        name: &str,
        max_payload_g: f64,
        at: GeoPoint,
        battery_level: f64,
    ) -> Result<Drone> {
        at.validate()
            .map_err(|e| EngineError::InvalidInput(e.to_string()))?;
        if !(0.0..=100.0).contains(&battery_level) {
            return Err(EngineError::InvalidInput(format!(
                "battery level {battery_level} outside 0..=100"
            )));
        }
        if max_payload_g <= 0.0 {
            return Err(EngineError::InvalidInput(format!(
                "max payload {max_payload_g}g"
            )));
        }

        let mut drone = Drone::new(name, max_payload_g, Some(at), self.clock.now());
        drone.battery_level = battery_level;
        self.fleet.register(&drone).await?;
        Ok(drone)
    }

    // =========================================================================
    // DELIVERIES & DISPATCH
    // =========================================================================

    /// Create a pending delivery. Does not dispatch.
    pub async fn create_delivery(
        &self,
        pickup_id: Uuid,
        dropoff_id: Uuid,
        weight_g: f64,
        priority: i32,
    ) -> Result<DeliveryRequest> {
        if !(weight_g.is_finite() && weight_g > 0.0) {
            return Err(EngineError::InvalidInput(format!("weight {weight_g}g")));
        }

        let pickup = self.location(pickup_id).await?;
        let dropoff = self.location(dropoff_id).await?;

        let delivery = DeliveryRequest::new(pickup, dropoff, weight_g, priority, self.clock.now());
        self.store.deliveries().create(&delivery).await?;

        tracing::info!(
            delivery_id = %delivery.delivery_id,
            weight_g,
            priority,
            "Delivery created"
        );
        Ok(delivery)
    }

    pub async fn dispatch(&self, delivery_id: Uuid) -> Result<AssignmentOutcome> {
        self.dispatcher.assign(delivery_id).await
    }

    /// Try to dispatch every pending delivery, most urgent first
    pub async fn dispatch_pending(&self) -> Result<DispatchSummary> {
        let pending = self.store.deliveries().get_pending(None).await?;
        let mut summary = DispatchSummary::default();

        for delivery in pending {
            match self.dispatcher.assign(delivery.delivery_id).await {
                Ok(AssignmentOutcome::Assigned { .. }) => summary.assigned += 1,
                Ok(AssignmentOutcome::NoDroneAvailable) => summary.waiting += 1,
                Err(e) if e.is_conflict() => {}
                Err(EngineError::InvalidAssignment(reason)) => {
                    tracing::debug!(delivery_id = %delivery.delivery_id, %reason, "Not dispatchable yet");
                    summary.rejected += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(summary)
    }

    // =========================================================================
    // SIMULATION & TELEMETRY
    // =========================================================================

    pub async fn tick(&self) -> Result<TickReport> {
        self.simulation.tick().await
    }

    /// Accept a sample from outside the simulation, e.g. a hardware feed
    pub async fn record_telemetry(&self, drone_id: Uuid, sample: TelemetrySample) -> Result<()> {
        if sample.drone_id != drone_id {
            return Err(EngineError::InvalidTelemetry(format!(
                "sample for {} submitted as {drone_id}",
                sample.drone_id
            )));
        }
        if self.fleet.get(drone_id).await?.is_none() {
            return Err(EngineError::not_found("Drone", drone_id));
        }
        self.recorder.record(&sample).await
    }

    // =========================================================================
    // READ QUERIES
    // =========================================================================

    pub async fn get_delivery(&self, delivery_id: Uuid) -> Result<Option<DeliveryRequest>> {
        Ok(self.store.deliveries().get_by_id(delivery_id).await?)
    }

    pub async fn get_drone(&self, drone_id: Uuid) -> Result<Option<Drone>> {
        self.fleet.get(drone_id).await
    }

    pub async fn get_route(&self, delivery_id: Uuid) -> Result<Option<Route>> {
        Ok(self.store.routes().get_by_delivery(delivery_id).await?)
    }

    /// Newest first
    pub async fn latest_telemetry(&self, drone_id: Uuid, limit: usize) -> Result<Vec<TelemetrySample>> {
        Ok(self.store.telemetry().get_latest(drone_id, limit).await?)
    }

    pub async fn metrics_for(&self, date: NaiveDate) -> Result<Option<DailyMetrics>> {
        Ok(self.store.metrics().get_by_date(date).await?)
    }

    async fn location(&self, location_id: Uuid) -> Result<Location> {
        self.store
            .locations()
            .get_by_id(location_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Location", location_id))
    }
}
