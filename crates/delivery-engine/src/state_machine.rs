//! # Drone State Machine
//!
//! One step per tick for a drone that is in transit or returning.
//!
//! [`advance`] is pure: it mutates the drone and its active delivery in place
//! and reports what happened. Persisting, telemetry and notifications belong
//! to the caller.
//!
//! Order of evaluation:
//!
//! 1. `assigned` deliveries start (`in_progress`)
//! 2. target is the dropoff, or the nearest depot once returning
//! 3. already within the arrival threshold: arrive without moving
//! 4. move one fixed step (clamped to the target), drain battery
//! 5. reached the target during the move: arrive
//! 6. battery below critical: emergency landing; below low: return to charge

use chrono::{DateTime, Utc};
use delivery_domain::geo::{planar_distance_deg, step_toward};
use delivery_domain::{
    DeliveryEvent, DeliveryRequest, DeliveryStatus, Drone, DroneStatus, GeoPoint,
};

use crate::error::{EngineError, Result};

// =============================================================================
// PARAMETERS
// =============================================================================

/// Per-tick movement and battery policy.
///
/// Distances are in raw coordinate degrees, so the effective speed and the
/// arrival radius shrink in longitude toward the poles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlightParams {
    pub step_deg: f64,
    pub arrival_threshold_deg: f64,
    pub battery_drain_per_tick: f64,
    pub low_battery_pct: f64,
    pub critical_battery_pct: f64,
}

impl Default for FlightParams {
    fn default() -> Self {
        Self {
            step_deg: 0.0001,
            arrival_threshold_deg: 0.0001,
            battery_drain_per_tick: 0.1,
            low_battery_pct: 20.0,
            critical_battery_pct: 1.0,
        }
    }
}

// =============================================================================
// OUTCOMES
// =============================================================================

/// What one tick did to a drone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepOutcome {
    /// Moved toward its target
    Moved,
    /// Returning but no depot exists; stayed put and kept draining
    Holding,
    /// Reached the dropoff; delivery delivered, drone idle
    Delivered,
    /// Battery fell below the low threshold; drone and delivery now returning
    ReturningToCharge,
    /// Reached a depot and started charging
    Docked { moved: bool },
    /// Battery depleted; drone in maintenance, delivery failed
    EmergencyLanding,
}

impl StepOutcome {
    /// Everything except docking without moving produces a telemetry sample
    #[must_use]
    pub const fn emits_telemetry(&self) -> bool {
        !matches!(self, Self::Docked { moved: false })
    }

    /// The delivery reached delivered or failed on this step
    #[must_use]
    pub const fn completes_delivery(&self) -> bool {
        matches!(self, Self::Delivered | Self::EmergencyLanding)
    }

    /// Notification announced on the delivery topic
    #[must_use]
    pub const fn event(&self) -> Option<DeliveryEvent> {
        match self {
            Self::Delivered => Some(DeliveryEvent::Delivered),
            Self::ReturningToCharge => Some(DeliveryEvent::ReturningToCharge),
            Self::EmergencyLanding => Some(DeliveryEvent::EmergencyLanding),
            Self::Moved | Self::Holding | Self::Docked { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Target {
    Dropoff(GeoPoint),
    Depot(GeoPoint),
}

impl Target {
    const fn point(&self) -> GeoPoint {
        match self {
            Self::Dropoff(p) | Self::Depot(p) => *p,
        }
    }
}

// =============================================================================
// STEP
// =============================================================================

/// Advance `drone` and its active `delivery` by one tick.
///
/// `depot` is the nearest depot to the drone, only consulted while the
/// delivery is returning.
pub fn advance(
    drone: &mut Drone,
    delivery: &mut DeliveryRequest,
    depot: Option<GeoPoint>,
    params: &FlightParams,
    now: DateTime<Utc>,
) -> Result<StepOutcome> {
    let Some(position) = drone.current_location else {
        return Err(EngineError::InvalidState(format!(
            "drone {} is {} without a position",
            drone.drone_id, drone.status
        )));
    };

    if delivery.status == DeliveryStatus::Assigned {
        set_delivery_status(delivery, DeliveryStatus::InProgress)?;
    }

    let target = match delivery.status {
        DeliveryStatus::InProgress => Some(Target::Dropoff(delivery.dropoff.coordinates)),
        DeliveryStatus::Returning => depot.map(Target::Depot),
        other => {
            return Err(EngineError::InvalidState(format!(
                "delivery {} is {other}, not in flight",
                delivery.delivery_id
            )));
        }
    };

    let next = match target {
        Some(target) => {
            if planar_distance_deg(&position, &target.point()) < params.arrival_threshold_deg {
                return arrive(drone, delivery, target, false, now);
            }
            step_toward(&position, &target.point(), params.step_deg)
        }
        None => position,
    };

    drone.current_location = Some(next);
    drone.battery_level = (drone.battery_level - params.battery_drain_per_tick).max(0.0);
    drone.updated_at = now;

    if let Some(target) = target {
        if planar_distance_deg(&next, &target.point()) < params.arrival_threshold_deg {
            return arrive(drone, delivery, target, true, now);
        }
    }

    if drone.battery_level < params.critical_battery_pct {
        set_drone_status(drone, DroneStatus::Maintenance)?;
        delivery.complete(DeliveryStatus::Failed, now)?;
        return Ok(StepOutcome::EmergencyLanding);
    }

    if drone.battery_level < params.low_battery_pct && delivery.status != DeliveryStatus::Returning {
        set_delivery_status(delivery, DeliveryStatus::Returning)?;
        set_drone_status(drone, DroneStatus::Returning)?;
        return Ok(StepOutcome::ReturningToCharge);
    }

    Ok(if target.is_some() {
        StepOutcome::Moved
    } else {
        StepOutcome::Holding
    })
}

fn arrive(
    drone: &mut Drone,
    delivery: &mut DeliveryRequest,
    target: Target,
    moved: bool,
    now: DateTime<Utc>,
) -> Result<StepOutcome> {
    drone.updated_at = now;
    match target {
        Target::Dropoff(_) => {
            delivery.complete(DeliveryStatus::Delivered, now)?;
            set_drone_status(drone, DroneStatus::Idle)?;
            Ok(StepOutcome::Delivered)
        }
        Target::Depot(_) => {
            set_drone_status(drone, DroneStatus::Charging)?;
            Ok(StepOutcome::Docked { moved })
        }
    }
}

fn set_drone_status(drone: &mut Drone, next: DroneStatus) -> Result<()> {
    drone.status.ensure_transition(next)?;
    drone.status = next;
    Ok(())
}

fn set_delivery_status(delivery: &mut DeliveryRequest, next: DeliveryStatus) -> Result<()> {
    delivery.status.ensure_transition(next)?;
    delivery.status = next;
    Ok(())
}
