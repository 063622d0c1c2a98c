//! # Dispatch Engine
//!
//! Matches a pending delivery to the nearest idle drone that can carry it
//! and commits the claim, the assignment and the route as one unit.

use std::sync::Arc;
use uuid::Uuid;

use delivery_domain::{DeliveryRequest, DeliveryStatus, Drone, DroneStatus, Route};
use delivery_persistence::{AssignmentCommit, AssignmentRecord, UnitOfWork};

use crate::clock::Clock;
use crate::error::{EngineError, Result};
use crate::fleet::FleetRegistry;

/// Result of a dispatch attempt
#[derive(Debug, Clone)]
pub enum AssignmentOutcome {
    Assigned {
        drone: Drone,
        route: Route,
        delivery: DeliveryRequest,
    },
    /// No idle drone in range; the delivery stays pending untouched
    NoDroneAvailable,
}

impl AssignmentOutcome {
    #[must_use]
    pub const fn is_assigned(&self) -> bool {
        matches!(self, Self::Assigned { .. })
    }
}

/// Dispatch engine
pub struct DispatchEngine {
    store: Arc<dyn UnitOfWork>,
    fleet: Arc<FleetRegistry>,
    clock: Arc<dyn Clock>,
    search_radius_m: f64,
    cruise_speed_mps: f64,
}

impl DispatchEngine {
    pub fn new(
        store: Arc<dyn UnitOfWork>,
        fleet: Arc<FleetRegistry>,
        clock: Arc<dyn Clock>,
        search_radius_m: f64,
        cruise_speed_mps: f64,
    ) -> Self {
        Self {
            store,
            fleet,
            clock,
            search_radius_m,
            cruise_speed_mps,
        }
    }

    /// Assign `delivery_id` to a drone.
    ///
    /// Candidates are tried nearest first. A candidate whose lock is held or
    /// whose claim is lost to a concurrent writer is skipped. Losing the
    /// delivery itself to another dispatcher is a conflict.
    pub async fn assign(&self, delivery_id: Uuid) -> Result<AssignmentOutcome> {
        let delivery = self
            .store
            .deliveries()
            .get_by_id(delivery_id)
            .await?
            .ok_or_else(|| EngineError::not_found("DeliveryRequest", delivery_id))?;

        if delivery.status != DeliveryStatus::Pending {
            return Err(EngineError::InvalidAssignment(format!(
                "delivery {delivery_id} is {}, not pending",
                delivery.status
            )));
        }

        let pickup = delivery.pickup.coordinates;
        let in_range = self.fleet.idle_within(&pickup, self.search_radius_m).await?;
        if in_range.is_empty() {
            tracing::info!(delivery_id = %delivery_id, pickup = %pickup, "No idle drone in range");
            return Ok(AssignmentOutcome::NoDroneAvailable);
        }

        let capable: Vec<_> = in_range
            .into_iter()
            .filter(|c| c.drone.can_carry(delivery.weight_g))
            .collect();
        if capable.is_empty() {
            return Err(EngineError::InvalidAssignment(format!(
                "weight {}g exceeds the payload of every drone in range",
                delivery.weight_g
            )));
        }

        for candidate in capable {
            let drone_id = candidate.drone.drone_id;
            let Some(_guard) = self.fleet.try_lock(drone_id) else {
                tracing::debug!(drone_id = %drone_id, "Drone busy, trying next");
                continue;
            };

            let record = self.assignment_for(&delivery, drone_id);
            match self.store.commit_assignment(&record).await? {
                AssignmentCommit::Committed => {
                    tracing::info!(
                        delivery_id = %delivery_id,
                        drone_id = %drone_id,
                        distance_to_pickup_m = candidate.distance_m,
                        route_m = ?record.delivery.distance_m,
                        "Delivery assigned"
                    );

                    let mut drone = candidate.drone;
                    drone.status = DroneStatus::InTransit;
                    return Ok(AssignmentOutcome::Assigned {
                        drone,
                        route: record.route,
                        delivery: record.delivery,
                    });
                }
                AssignmentCommit::DroneUnavailable => {
                    tracing::debug!(drone_id = %drone_id, "Lost drone claim, trying next");
                }
                AssignmentCommit::DeliveryUnavailable => {
                    return Err(EngineError::conflict("DeliveryRequest", delivery_id));
                }
            }
        }

        tracing::info!(delivery_id = %delivery_id, "Every candidate was claimed concurrently");
        Ok(AssignmentOutcome::NoDroneAvailable)
    }

    /// Estimated duration is `distance_m / cruise_speed_mps / 60` minutes, not the
    /// older `(km / 15) * 60` form, which mixed kilometres with metres per second.
    fn assignment_for(&self, delivery: &DeliveryRequest, drone_id: Uuid) -> AssignmentRecord {
        let now = self.clock.now();
        let route = Route::direct(
            delivery.delivery_id,
            delivery.pickup.coordinates,
            delivery.dropoff.coordinates,
            now,
        );
        let distance_m = route.length_m();

        let mut assigned = delivery.clone();
        assigned.status = DeliveryStatus::Assigned;
        assigned.assigned_drone = Some(drone_id);
        assigned.distance_m = Some(distance_m);
        assigned.estimated_duration_min = Some(distance_m / self.cruise_speed_mps / 60.0);

        AssignmentRecord {
            drone_id,
            delivery: assigned,
            route,
        }
    }
}
