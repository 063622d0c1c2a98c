//! # Simulation
//!
//! One `tick()` advances every drone that is in transit or returning by a
//! single state machine step. Drones are stepped concurrently; each step
//! holds that drone's work lock, so a drone still busy from a previous tick
//! or a dispatch claim is skipped until the next one.

use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinSet;
use uuid::Uuid;

use delivery_domain::{BusMessage, DeliveryStatus, DeliveryUpdate, Topic};
use delivery_persistence::{SharedBus, StepCommit, StepRecord, UnitOfWork};

use crate::clock::Clock;
use crate::error::{EngineError, Result};
use crate::fleet::FleetRegistry;
use crate::metrics::MetricsAggregator;
use crate::state_machine::{self, FlightParams, StepOutcome};
use crate::telemetry::{TelemetryRecorder, publish_best_effort};

/// Per-tick tally
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Drones found active when the tick began
    pub active: usize,
    pub moved: usize,
    pub holding: usize,
    pub delivered: usize,
    pub returning_to_charge: usize,
    pub docked: usize,
    pub emergency_landings: usize,
    /// Locked by other work, or no longer active once locked
    pub skipped: usize,
    pub conflicts: usize,
    pub errors: usize,
}

impl TickReport {
    fn count(&mut self, result: &Result<Option<StepOutcome>>) {
        match result {
            Ok(Some(StepOutcome::Moved)) => self.moved += 1,
            Ok(Some(StepOutcome::Holding)) => self.holding += 1,
            Ok(Some(StepOutcome::Delivered)) => self.delivered += 1,
            Ok(Some(StepOutcome::ReturningToCharge)) => self.returning_to_charge += 1,
            Ok(Some(StepOutcome::Docked { .. })) => self.docked += 1,
            Ok(Some(StepOutcome::EmergencyLanding)) => self.emergency_landings += 1,
            Ok(None) => self.skipped += 1,
            Err(e) if e.is_conflict() => self.conflicts += 1,
            Err(_) => self.errors += 1,
        }
    }
}

/// Drives the state machine across the fleet
pub struct Simulation {
    store: Arc<dyn UnitOfWork>,
    fleet: Arc<FleetRegistry>,
    recorder: Arc<TelemetryRecorder>,
    metrics: Arc<MetricsAggregator>,
    bus: SharedBus,
    clock: Arc<dyn Clock>,
    params: FlightParams,
}

impl Simulation {
    pub fn new(
        store: Arc<dyn UnitOfWork>,
        fleet: Arc<FleetRegistry>,
        recorder: Arc<TelemetryRecorder>,
        metrics: Arc<MetricsAggregator>,
        bus: SharedBus,
        clock: Arc<dyn Clock>,
        params: FlightParams,
    ) -> Self {
        Self {
            store,
            fleet,
            recorder,
            metrics,
            bus,
            clock,
            params,
        }
    }

    /// Step every active drone once. A no-op when nothing is flying.
    pub async fn tick(self: &Arc<Self>) -> Result<TickReport> {
        let active = self.fleet.active_drones().await?;
        let mut report = TickReport {
            active: active.len(),
            ..TickReport::default()
        };
        if active.is_empty() {
            return Ok(report);
        }

        let mut steps = JoinSet::new();
        for drone in active {
            let sim = Arc::clone(self);
            steps.spawn(async move {
                let drone_id = drone.drone_id;
                (drone_id, sim.step_drone(drone_id).await)
            });
        }

        while let Some(joined) = steps.join_next().await {
            match joined {
                Ok((drone_id, result)) => {
                    if let Err(e) = &result {
                        if e.is_conflict() {
                            tracing::warn!(drone_id = %drone_id, error = %e, "Tick lost a race, retrying next cycle");
                        } else {
                            tracing::error!(drone_id = %drone_id, error = %e, "Tick failed");
                        }
                    }
                    report.count(&result);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Tick task aborted");
                    report.errors += 1;
                }
            }
        }

        tracing::debug!(?report, "Tick complete");
        Ok(report)
    }

    /// One state machine step for one drone, holding its work lock.
    /// `Ok(None)` when the drone is busy or no longer active.
    pub async fn step_drone(&self, drone_id: Uuid) -> Result<Option<StepOutcome>> {
        let Some(_guard) = self.fleet.try_lock(drone_id) else {
            tracing::debug!(drone_id = %drone_id, "Drone busy, skipping this tick");
            return Ok(None);
        };

        // Re-read under the lock; maintenance may have been set externally
        let Some(mut drone) = self.fleet.get(drone_id).await? else {
            return Ok(None);
        };
        if !drone.status.is_active() {
            return Ok(None);
        }

        let Some(mut delivery) = self.store.deliveries().get_active_for_drone(drone_id).await? else {
            tracing::warn!(drone_id = %drone_id, status = %drone.status, "Active drone has no delivery");
            return Ok(None);
        };

        let depot = match (delivery.status, drone.current_location) {
            (DeliveryStatus::Returning, Some(at)) => self
                .fleet
                .nearest_depot(&at)
                .await?
                .map(|depot| depot.coordinates),
            _ => None,
        };

        let drone_before = drone.clone();
        let delivery_before = delivery.clone();
        let now = self.clock.now();

        let outcome = state_machine::advance(&mut drone, &mut delivery, depot, &self.params, now)?;

        // Drone and delivery land together or not at all
        let step = StepRecord {
            drone_before,
            drone,
            delivery_before,
            delivery,
        };
        match self.store.commit_step(&step).await? {
            StepCommit::Committed => {}
            StepCommit::DroneChanged => return Err(EngineError::conflict("Drone", drone_id)),
            StepCommit::DeliveryChanged => {
                return Err(EngineError::conflict("DeliveryRequest", step.delivery.delivery_id));
            }
        }
        let StepRecord { drone, delivery, .. } = step;

        tracing::debug!(
            drone_id = %drone_id,
            delivery_id = %delivery.delivery_id,
            ?outcome,
            battery = drone.battery_level,
            "Drone stepped"
        );

        if outcome.emits_telemetry() {
            self.recorder.record_tick(&drone, now).await?;
        }

        if outcome.completes_delivery() {
            self.metrics.record_completion(&delivery, now).await?;
        }

        if let Some(event) = outcome.event() {
            tracing::info!(
                drone_id = %drone_id,
                delivery_id = %delivery.delivery_id,
                event = ?event,
                "Delivery status changed"
            );
            publish_best_effort(
                &self.bus,
                Topic::Delivery(delivery.delivery_id),
                BusMessage::Delivery(DeliveryUpdate {
                    status: event,
                    timestamp: now,
                }),
            )
            .await;
        }

        Ok(Some(outcome))
    }
}
