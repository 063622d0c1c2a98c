//! # Drone Delivery Dispatch - Domain Model
//!
//! Core domain entities, value objects, and status enums for autonomous
//! drone delivery. These types are the single source of truth across
//! all layers: persistence, notification bus, and the dispatch engine.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub mod geo;

// =============================================================================
// VALUE OBJECTS
// =============================================================================

/// Geographic point (WGS84 degrees)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    #[serde(rename = "lon")]
    pub longitude: f64,
    #[serde(rename = "lat")]
    pub latitude: f64,
}

impl GeoPoint {
    pub const fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }

    /// Great-circle distance to another point in meters
    #[must_use]
    pub fn distance_to_m(&self, other: &Self) -> f64 {
        geo::haversine_m(self, other)
    }

    /// Reject points outside the WGS84 range
    pub fn validate(&self) -> Result<(), DomainError> {
        let in_range = (-180.0..=180.0).contains(&self.longitude)
            && (-90.0..=90.0).contains(&self.latitude);
        if in_range {
            Ok(())
        } else {
            Err(DomainError::InvalidCoordinates {
                lon: self.longitude,
                lat: self.latitude,
            })
        }
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.longitude, self.latitude)
    }
}

// =============================================================================
// ENUMS
// =============================================================================

/// Drone operational status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DroneStatus {
    Idle,
    InTransit,
    Returning,
    Charging,
    Maintenance,
}

impl DroneStatus {
    pub const ALL: [Self; 5] = [
        Self::Idle,
        Self::InTransit,
        Self::Returning,
        Self::Charging,
        Self::Maintenance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::InTransit => "in_transit",
            Self::Returning => "returning",
            Self::Charging => "charging",
            Self::Maintenance => "maintenance",
        }
    }

    /// Statuses the simulation advances every tick
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::InTransit | Self::Returning)
    }

    /// No automatic ticking happens from these; recovery is an operator action
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Charging | Self::Maintenance)
    }

    /// Transition table for drone status
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        match (self, next) {
            (Self::Idle, Self::InTransit)
            | (Self::InTransit, Self::Idle | Self::Returning | Self::Maintenance)
            | (Self::Returning, Self::Charging | Self::Maintenance)
            // operational recovery, performed outside the engine
            | (Self::Charging | Self::Maintenance, Self::Idle) => true,
            _ => false,
        }
    }

    pub fn ensure_transition(&self, next: Self) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(DomainError::InvalidTransition {
                entity_type: "drone",
                from: self.as_str(),
                to: next.as_str(),
            })
        }
    }
}

impl fmt::Display for DroneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DroneStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::UnknownStatus(s.to_string()))
    }
}

/// Delivery request status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Assigned,
    InProgress,
    Returning,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    pub const ALL: [Self; 6] = [
        Self::Pending,
        Self::Assigned,
        Self::InProgress,
        Self::Returning,
        Self::Delivered,
        Self::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::Returning => "returning",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }

    /// A delivery that currently occupies its drone
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Assigned | Self::InProgress | Self::Returning)
    }

    /// Delivery outcome is final and counted in metrics
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }

    /// Transition table for delivery status
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::Assigned)
            | (Self::Assigned, Self::InProgress)
            | (Self::InProgress, Self::Delivered | Self::Returning | Self::Failed)
            | (Self::Returning, Self::Failed) => true,
            _ => false,
        }
    }

    pub fn ensure_transition(&self, next: Self) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(DomainError::InvalidTransition {
                entity_type: "delivery",
                from: self.as_str(),
                to: next.as_str(),
            })
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::UnknownStatus(s.to_string()))
    }
}

// =============================================================================
// ENTITY TYPES
// =============================================================================

/// Named place: pickup, dropoff, or charging depot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub location_id: Uuid,
    pub name: String,
    pub coordinates: GeoPoint,
    pub is_depot: bool,
    pub address: Option<String>,
}

impl Location {
    pub fn new(name: &str, coordinates: GeoPoint) -> Self {
        Self {
            location_id: Uuid::new_v4(),
            name: name.to_string(),
            coordinates,
            is_depot: false,
            address: None,
        }
    }

    pub fn depot(name: &str, coordinates: GeoPoint) -> Self {
        Self {
            is_depot: true,
            ..Self::new(name, coordinates)
        }
    }
}

/// Drone entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drone {
    pub drone_id: Uuid,
    pub name: String,
    pub status: DroneStatus,
    /// Percent, 0..=100
    pub battery_level: f64,
    pub max_payload_g: f64,
    /// Unset only before the drone has ever been placed
    pub current_location: Option<GeoPoint>,
    pub last_maintenance: Option<NaiveDate>,
    pub updated_at: DateTime<Utc>,
}

impl Drone {
    pub fn new(name: &str, max_payload_g: f64, at: Option<GeoPoint>, now: DateTime<Utc>) -> Self {
        Self {
            drone_id: Uuid::new_v4(),
            name: name.to_string(),
            status: DroneStatus::Idle,
            battery_level: 100.0,
            max_payload_g,
            current_location: at,
            last_maintenance: None,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn can_carry(&self, weight_g: f64) -> bool {
        weight_g <= self.max_payload_g
    }

    /// Active drones must have a position
    #[must_use]
    pub const fn location_invariant_holds(&self) -> bool {
        !self.status.is_active() || self.current_location.is_some()
    }
}

/// Delivery request entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRequest {
    pub delivery_id: Uuid,
    pub pickup: Location,
    pub dropoff: Location,
    pub weight_g: f64,
    pub status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
    pub assigned_drone: Option<Uuid>,
    /// Higher is more urgent
    pub priority: i32,

    // Set once the route exists
    pub distance_m: Option<f64>,
    pub estimated_duration_min: Option<f64>,

    // Set once the delivery is delivered or failed
    pub actual_duration_min: Option<f64>,
}

impl DeliveryRequest {
    pub fn new(
        pickup: Location,
        dropoff: Location,
        weight_g: f64,
        priority: i32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            delivery_id: Uuid::new_v4(),
            pickup,
            dropoff,
            weight_g,
            status: DeliveryStatus::Pending,
            created_at: now,
            assigned_drone: None,
            priority,
            distance_m: None,
            estimated_duration_min: None,
            actual_duration_min: None,
        }
    }

    /// Wall time since creation, in minutes
    #[must_use]
    pub fn elapsed_minutes(&self, now: DateTime<Utc>) -> f64 {
        let elapsed = now.signed_duration_since(self.created_at);
        elapsed.num_milliseconds().max(0) as f64 / 60_000.0
    }

    /// Close the delivery as delivered or failed, stamping its duration
    pub fn complete(&mut self, outcome: DeliveryStatus, now: DateTime<Utc>) -> Result<(), DomainError> {
        if !outcome.is_complete() {
            return Err(DomainError::InvalidTransition {
                entity_type: "delivery",
                from: self.status.as_str(),
                to: outcome.as_str(),
            });
        }
        self.status.ensure_transition(outcome)?;
        self.status = outcome;
        self.actual_duration_min = Some(self.elapsed_minutes(now));
        Ok(())
    }
}

/// Route entity - one per assigned delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub delivery_id: Uuid,
    /// At least two points
    pub path: Vec<GeoPoint>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Route {
    /// Straight-line route between two points
    pub fn direct(delivery_id: Uuid, from: GeoPoint, to: GeoPoint, now: DateTime<Utc>) -> Self {
        Self {
            delivery_id,
            path: vec![from, to],
            created_at: now,
            updated_at: now,
        }
    }

    /// Geodesic length in meters
    #[must_use]
    pub fn length_m(&self) -> f64 {
        geo::path_length_m(&self.path)
    }
}

/// Telemetry entity - append-only time series per drone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub drone_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub location: GeoPoint,
    pub battery_level: f64,
    pub speed_mps: f64,
    pub altitude_m: f64,
}

/// Daily delivery rollup, unique per calendar date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMetrics {
    pub date: NaiveDate,
    pub total_deliveries: i64,
    pub successful_deliveries: i64,
    pub average_delivery_time_min: f64,
    pub average_cost_per_km: f64,
    pub total_distance_km: f64,
}

impl DailyMetrics {
    pub const fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            total_deliveries: 0,
            successful_deliveries: 0,
            average_delivery_time_min: 0.0,
            average_cost_per_km: 0.0,
            total_distance_km: 0.0,
        }
    }

    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total_deliveries > 0 {
            self.successful_deliveries as f64 / self.total_deliveries as f64 * 100.0
        } else {
            0.0
        }
    }
}

// =============================================================================
// NOTIFICATION MESSAGES
// =============================================================================

/// Pub/sub topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Drone(Uuid),
    Delivery(Uuid),
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drone(id) => write!(f, "drone.{id}"),
            Self::Delivery(id) => write!(f, "delivery.{id}"),
        }
    }
}

/// Telemetry message published to `drone.<id>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryMessage {
    pub location: GeoPoint,
    pub battery_level: f64,
    pub speed: f64,
    pub altitude: f64,
    pub timestamp: DateTime<Utc>,
}

impl From<&TelemetrySample> for TelemetryMessage {
    fn from(sample: &TelemetrySample) -> Self {
        Self {
            location: sample.location,
            battery_level: sample.battery_level,
            speed: sample.speed_mps,
            altitude: sample.altitude_m,
            timestamp: sample.timestamp,
        }
    }
}

/// Delivery lifecycle events announced on `delivery.<id>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryEvent {
    Delivered,
    ReturningToCharge,
    EmergencyLanding,
}

/// Delivery status message published to `delivery.<id>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryUpdate {
    pub status: DeliveryEvent,
    pub timestamp: DateTime<Utc>,
}

/// Anything the core publishes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BusMessage {
    Telemetry(TelemetryMessage),
    Delivery(DeliveryUpdate),
}

// =============================================================================
// QUERY/FILTER TYPES
// =============================================================================

/// Time range filter for queries, end exclusive
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// The UTC calendar day `date`
    #[must_use]
    pub fn for_date(date: NaiveDate) -> Self {
        let start = date.and_time(chrono::NaiveTime::MIN).and_utc();
        Self {
            start,
            end: start + Duration::days(1),
        }
    }

    #[must_use]
    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        *ts >= self.start && *ts < self.end
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Domain-level errors
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("Invalid coordinates: lon={lon}, lat={lat}")]
    InvalidCoordinates { lon: f64, lat: f64 },

    #[error("Unknown status: {0}")]
    UnknownStatus(String),

    #[error("Invalid {entity_type} transition: {from} -> {to}")]
    InvalidTransition {
        entity_type: &'static str,
        from: &'static str,
        to: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, h, m, 0).unwrap()
    }

    #[test]
    fn test_status_round_trip_through_str() {
        for status in DroneStatus::ALL {
            assert_eq!(status.as_str().parse::<DroneStatus>().unwrap(), status);
        }
        for status in DeliveryStatus::ALL {
            assert_eq!(status.as_str().parse::<DeliveryStatus>().unwrap(), status);
        }
        assert!("landed".parse::<DroneStatus>().is_err());
    }

    #[test]
    fn test_drone_transition_table() {
        assert!(DroneStatus::Idle.can_transition_to(DroneStatus::InTransit));
        assert!(DroneStatus::InTransit.can_transition_to(DroneStatus::Returning));
        assert!(DroneStatus::Returning.can_transition_to(DroneStatus::Charging));
        assert!(DroneStatus::Returning.can_transition_to(DroneStatus::Maintenance));
        assert!(!DroneStatus::Idle.can_transition_to(DroneStatus::Returning));
        assert!(!DroneStatus::Returning.can_transition_to(DroneStatus::Idle));
        assert!(!DroneStatus::Maintenance.can_transition_to(DroneStatus::InTransit));
    }

    #[test]
    fn test_delivery_transition_table() {
        assert!(DeliveryStatus::Pending.can_transition_to(DeliveryStatus::Assigned));
        assert!(DeliveryStatus::InProgress.can_transition_to(DeliveryStatus::Returning));
        assert!(DeliveryStatus::Returning.can_transition_to(DeliveryStatus::Failed));
        assert!(!DeliveryStatus::Returning.can_transition_to(DeliveryStatus::Returning));
        assert!(!DeliveryStatus::Delivered.can_transition_to(DeliveryStatus::Failed));
        assert!(!DeliveryStatus::Pending.can_transition_to(DeliveryStatus::InProgress));
    }

    #[test]
    fn test_complete_sets_actual_duration() {
        let mut delivery = DeliveryRequest::new(
            Location::new("A", GeoPoint::new(0.0, 0.0)),
            Location::new("B", GeoPoint::new(0.01, 0.0)),
            500.0,
            1,
            ts(9, 0),
        );
        delivery.status = DeliveryStatus::InProgress;
        delivery.complete(DeliveryStatus::Delivered, ts(9, 10)).unwrap();

        assert_eq!(delivery.status, DeliveryStatus::Delivered);
        assert!((delivery.actual_duration_min.unwrap() - 10.0).abs() < 1e-9);

        assert!(delivery.complete(DeliveryStatus::Failed, ts(9, 20)).is_err());
    }

    #[test]
    fn test_success_rate() {
        let mut metrics = DailyMetrics::empty(ts(0, 0).date_naive());
        assert_eq!(metrics.success_rate(), 0.0);
        metrics.total_deliveries = 4;
        metrics.successful_deliveries = 3;
        assert!((metrics.success_rate() - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_topic_names() {
        let id = Uuid::nil();
        assert_eq!(
            Topic::Drone(id).to_string(),
            "drone.00000000-0000-0000-0000-000000000000"
        );
        assert!(Topic::Delivery(id).to_string().starts_with("delivery."));
    }

    #[test]
    fn test_telemetry_message_wire_shape() {
        let msg = BusMessage::Telemetry(TelemetryMessage {
            location: GeoPoint::new(1.5, 2.5),
            battery_level: 88.0,
            speed: 10.0,
            altitude: 120.0,
            timestamp: ts(12, 0),
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["location"]["lon"], 1.5);
        assert_eq!(json["location"]["lat"], 2.5);
        assert_eq!(json["battery_level"], 88.0);
        assert_eq!(json["timestamp"], "2026-03-14T12:00:00Z");
    }

    #[test]
    fn test_delivery_update_wire_shape() {
        let msg = BusMessage::Delivery(DeliveryUpdate {
            status: DeliveryEvent::ReturningToCharge,
            timestamp: ts(12, 0),
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["status"], "returning_to_charge");
    }

    #[test]
    fn test_time_range_for_date() {
        let range = TimeRange::for_date(ts(0, 0).date_naive());
        assert!(range.contains(&ts(0, 0)));
        assert!(range.contains(&ts(23, 59)));
        assert!(!range.contains(&(ts(0, 0) + Duration::days(1))));
    }
}
