//! ScyllaDB repository implementation.
//!
//! Conditional status writes use lightweight transactions (`... IF status = ?`).
//! Scylla has no multi-partition transactions, so the assignment and step
//! commits write the drone first and undo earlier steps when a later one
//! loses its race.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use scylla::frame::response::result::Row;
use scylla::{QueryResult, Session, SessionBuilder};
use std::sync::Arc;
use uuid::Uuid;

use super::traits::{
    AssignmentCommit, AssignmentRecord, DeliveryRepository, DroneRepository, LocationRepository,
    MetricsRepository, RouteRepository, StepCommit, StepRecord, TelemetryRepository, UnitOfWork,
};
use crate::error::{PersistenceError, Result};
use delivery_domain::{
    DailyMetrics, DeliveryRequest, DeliveryStatus, Drone, DroneStatus, GeoPoint, Location, Route,
    TelemetrySample, TimeRange,
};

// =============================================================================
// SCYLLA CONFIGURATION
// =============================================================================

/// ScyllaDB connection configuration.
#[derive(Debug, Clone)]
pub struct ScyllaConfig {
    pub hosts: Vec<String>,
    pub keyspace: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for ScyllaConfig {
    fn default() -> Self {
        Self {
            hosts: vec!["127.0.0.1:9042".to_string()],
            keyspace: "drone_delivery".to_string(),
            username: None,
            password: None,
        }
    }
}

const SCHEMA: &[&str] = &[
    r"CREATE TABLE IF NOT EXISTS locations (
        location_id uuid PRIMARY KEY,
        name text,
        longitude double,
        latitude double,
        is_depot boolean,
        address text
    )",
    r"CREATE TABLE IF NOT EXISTS drones (
        drone_id uuid PRIMARY KEY,
        name text,
        status text,
        battery_level double,
        max_payload_g double,
        longitude double,
        latitude double,
        last_maintenance text,
        updated_at timestamp
    )",
    r"CREATE TABLE IF NOT EXISTS deliveries (
        delivery_id uuid PRIMARY KEY,
        pickup text,
        dropoff text,
        weight_g double,
        status text,
        created_at timestamp,
        assigned_drone uuid,
        priority int,
        distance_m double,
        estimated_duration_min double,
        actual_duration_min double
    )",
    r"CREATE TABLE IF NOT EXISTS deliveries_by_date (
        created_date text,
        delivery_id uuid,
        PRIMARY KEY (created_date, delivery_id)
    )",
    r"CREATE TABLE IF NOT EXISTS routes (
        delivery_id uuid PRIMARY KEY,
        path text,
        created_at timestamp,
        updated_at timestamp
    )",
    r"CREATE TABLE IF NOT EXISTS telemetry (
        drone_id uuid,
        recorded_at timestamp,
        longitude double,
        latitude double,
        battery_level double,
        speed_mps double,
        altitude_m double,
        PRIMARY KEY ((drone_id), recorded_at)
    ) WITH CLUSTERING ORDER BY (recorded_at DESC)",
    r"CREATE TABLE IF NOT EXISTS daily_metrics (
        date text PRIMARY KEY,
        total_deliveries bigint,
        successful_deliveries bigint,
        average_delivery_time_min double,
        average_cost_per_km double,
        total_distance_km double
    )",
];

// =============================================================================
// SCYLLA CLIENT
// =============================================================================

/// ScyllaDB client wrapper.
pub struct ScyllaClient {
    session: Arc<Session>,
    pub config: ScyllaConfig,
}

impl ScyllaClient {
    /// Connect, create the keyspace and tables if missing, and switch to the keyspace.
    pub async fn new(config: ScyllaConfig) -> Result<Self> {
        let mut builder = SessionBuilder::new().known_nodes(&config.hosts);

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.user(user, pass);
        }

        let session = builder.build().await?;

        session
            .query_unpaged(
                format!(
                    "CREATE KEYSPACE IF NOT EXISTS {} WITH replication = \
                     {{'class': 'SimpleStrategy', 'replication_factor': 1}}",
                    config.keyspace
                ),
                (),
            )
            .await?;
        session
            .query_unpaged(format!("USE {}", config.keyspace), ())
            .await?;

        for statement in SCHEMA {
            session.query_unpaged(*statement, ()).await?;
        }

        tracing::info!(keyspace = %config.keyspace, "ScyllaDB schema ready");

        Ok(Self {
            session: Arc::new(session),
            config,
        })
    }

    /// Get session reference.
    pub fn session(&self) -> &Session {
        &self.session
    }
}

fn scylla_err(err: impl std::fmt::Display) -> PersistenceError {
    PersistenceError::Scylla(err.to_string())
}

/// Read the `[applied]` column of an LWT response
fn was_applied(result: QueryResult) -> Result<bool> {
    let rows = result.into_rows_result().map_err(scylla_err)?;
    let row: Row = rows.first_row().map_err(scylla_err)?;
    Ok(row
        .columns
        .first()
        .and_then(|c| c.as_ref())
        .and_then(|v| v.as_boolean())
        .unwrap_or(false))
}

fn point_from(lon: Option<f64>, lat: Option<f64>) -> Option<GeoPoint> {
    match (lon, lat) {
        (Some(lon), Some(lat)) => Some(GeoPoint::new(lon, lat)),
        _ => None,
    }
}

type LocationRow = (Uuid, String, f64, f64, bool, Option<String>);
type DroneRow = (
    Uuid,
    String,
    String,
    f64,
    f64,
    Option<f64>,
    Option<f64>,
    Option<String>,
    DateTime<Utc>,
);
type DeliveryRow = (
    Uuid,
    String,
    String,
    f64,
    String,
    DateTime<Utc>,
    Option<Uuid>,
    i32,
    Option<f64>,
    Option<f64>,
    Option<f64>,
);
type TelemetryRow = (Uuid, DateTime<Utc>, f64, f64, f64, f64, f64);
type MetricsRow = (String, i64, i64, f64, f64, f64);

const DRONE_COLUMNS: &str = "drone_id, name, status, battery_level, max_payload_g, \
                             longitude, latitude, last_maintenance, updated_at";
const DELIVERY_COLUMNS: &str = "delivery_id, pickup, dropoff, weight_g, status, created_at, \
                                assigned_drone, priority, distance_m, estimated_duration_min, \
                                actual_duration_min";

fn location_from_row(row: LocationRow) -> Location {
    let (location_id, name, lon, lat, is_depot, address) = row;
    Location {
        location_id,
        name,
        coordinates: GeoPoint::new(lon, lat),
        is_depot,
        address,
    }
}

fn drone_from_row(row: DroneRow) -> Result<Drone> {
    let (drone_id, name, status, battery_level, max_payload_g, lon, lat, maintenance, updated_at) =
        row;
    let last_maintenance = maintenance
        .map(|d| d.parse::<NaiveDate>())
        .transpose()
        .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;

    Ok(Drone {
        drone_id,
        name,
        status: status.parse()?,
        battery_level,
        max_payload_g,
        current_location: point_from(lon, lat),
        last_maintenance,
        updated_at,
    })
}

fn delivery_from_row(row: DeliveryRow) -> Result<DeliveryRequest> {
    let (
        delivery_id,
        pickup,
        dropoff,
        weight_g,
        status,
        created_at,
        assigned_drone,
        priority,
        distance_m,
        estimated_duration_min,
        actual_duration_min,
    ) = row;

    Ok(DeliveryRequest {
        delivery_id,
        pickup: serde_json::from_str(&pickup)?,
        dropoff: serde_json::from_str(&dropoff)?,
        weight_g,
        status: status.parse()?,
        created_at,
        assigned_drone,
        priority,
        distance_m,
        estimated_duration_min,
        actual_duration_min,
    })
}

// =============================================================================
// SCYLLA STORE
// =============================================================================

/// Repository set backed by a single ScyllaDB session.
pub struct ScyllaStore {
    client: Arc<ScyllaClient>,
}

impl ScyllaStore {
    pub fn new(client: Arc<ScyllaClient>) -> Self {
        Self { client }
    }

    fn session(&self) -> &Session {
        self.client.session()
    }

    async fn release_drone(&self, drone_id: Uuid) {
        let result = self
            .session()
            .query_unpaged(
                "UPDATE drones SET status = ? WHERE drone_id = ? IF status = ?",
                (
                    DroneStatus::Idle.as_str(),
                    drone_id,
                    DroneStatus::InTransit.as_str(),
                ),
            )
            .await;
        if let Err(e) = result {
            tracing::error!(drone_id = %drone_id, error = %e, "Failed to release drone claim");
        }
    }

    async fn drop_route(&self, delivery_id: Uuid) {
        let result = self
            .session()
            .query_unpaged("DELETE FROM routes WHERE delivery_id = ?", (delivery_id,))
            .await;
        if let Err(e) = result {
            tracing::error!(delivery_id = %delivery_id, error = %e, "Failed to drop orphaned route");
        }
    }

    /// Put a stepped drone back the way it was read
    async fn restore_drone(&self, step: &StepRecord) {
        let restored = DroneRepository::save_state(self, &step.drone_before, step.drone.status).await;
        match restored {
            Ok(true) => {}
            Ok(false) => tracing::error!(
                drone_id = %step.drone.drone_id,
                "Drone changed again before its step could be undone"
            ),
            Err(e) => tracing::error!(
                drone_id = %step.drone.drone_id,
                error = %e,
                "Failed to undo drone step"
            ),
        }
    }

    async fn assign_route_and_delivery(&self, assignment: &AssignmentRecord) -> Result<AssignmentCommit> {
        let route = &assignment.route;
        let delivery = &assignment.delivery;

        let inserted = was_applied(
            self.session()
                .query_unpaged(
                    "INSERT INTO routes (delivery_id, path, created_at, updated_at) \
                     VALUES (?, ?, ?, ?) IF NOT EXISTS",
                    (
                        route.delivery_id,
                        serde_json::to_string(&route.path)?,
                        route.created_at,
                        route.updated_at,
                    ),
                )
                .await?,
        )?;
        if !inserted {
            return Ok(AssignmentCommit::DeliveryUnavailable);
        }

        let assigned = was_applied(
            self.session()
                .query_unpaged(
                    "UPDATE deliveries SET status = ?, assigned_drone = ?, distance_m = ?, \
                     estimated_duration_min = ? WHERE delivery_id = ? IF status = ?",
                    (
                        delivery.status.as_str(),
                        delivery.assigned_drone,
                        delivery.distance_m,
                        delivery.estimated_duration_min,
                        delivery.delivery_id,
                        DeliveryStatus::Pending.as_str(),
                    ),
                )
                .await?,
        )?;
        if !assigned {
            self.drop_route(delivery.delivery_id).await;
            return Ok(AssignmentCommit::DeliveryUnavailable);
        }

        Ok(AssignmentCommit::Committed)
    }
}

// =============================================================================
// LOCATION REPOSITORY
// =============================================================================

#[async_trait]
impl LocationRepository for ScyllaStore {
    async fn get_by_id(&self, location_id: Uuid) -> Result<Option<Location>> {
        let result = self
            .session()
            .query_unpaged(
                "SELECT location_id, name, longitude, latitude, is_depot, address \
                 FROM locations WHERE location_id = ?",
                (location_id,),
            )
            .await?;

        let rows = result.into_rows_result().map_err(scylla_err)?;
        let row = rows.maybe_first_row::<LocationRow>().map_err(scylla_err)?;
        Ok(row.map(location_from_row))
    }

    async fn create(&self, location: &Location) -> Result<()> {
        let created = was_applied(
            self.session()
                .query_unpaged(
                    "INSERT INTO locations (location_id, name, longitude, latitude, is_depot, address) \
                     VALUES (?, ?, ?, ?, ?, ?) IF NOT EXISTS",
                    (
                        location.location_id,
                        &location.name,
                        location.coordinates.longitude,
                        location.coordinates.latitude,
                        location.is_depot,
                        location.address.as_deref(),
                    ),
                )
                .await?,
        )?;

        if created {
            Ok(())
        } else {
            Err(PersistenceError::duplicate("Location", location.location_id))
        }
    }

    async fn list_depots(&self) -> Result<Vec<Location>> {
        // Depot count is small; filter server-side without an index
        let result = self
            .session()
            .query_unpaged(
                "SELECT location_id, name, longitude, latitude, is_depot, address \
                 FROM locations WHERE is_depot = true ALLOW FILTERING",
                (),
            )
            .await?;

        let rows = result.into_rows_result().map_err(scylla_err)?;
        let mut depots = Vec::new();
        for row in rows.rows::<LocationRow>().map_err(scylla_err)? {
            depots.push(location_from_row(row.map_err(scylla_err)?));
        }
        Ok(depots)
    }
}

// =============================================================================
// DRONE REPOSITORY
// =============================================================================

#[async_trait]
impl DroneRepository for ScyllaStore {
    async fn get_by_id(&self, drone_id: Uuid) -> Result<Option<Drone>> {
        let result = self
            .session()
            .query_unpaged(
                format!("SELECT {DRONE_COLUMNS} FROM drones WHERE drone_id = ?"),
                (drone_id,),
            )
            .await?;

        let rows = result.into_rows_result().map_err(scylla_err)?;
        rows.maybe_first_row::<DroneRow>()
            .map_err(scylla_err)?
            .map(drone_from_row)
            .transpose()
    }

    async fn get_by_status(&self, statuses: &[DroneStatus]) -> Result<Vec<Drone>> {
        // Full scan; fleets are small and status changes every tick
        let result = self
            .session()
            .query_unpaged(format!("SELECT {DRONE_COLUMNS} FROM drones"), ())
            .await?;

        let rows = result.into_rows_result().map_err(scylla_err)?;
        let mut drones = Vec::new();
        for row in rows.rows::<DroneRow>().map_err(scylla_err)? {
            let drone = drone_from_row(row.map_err(scylla_err)?)?;
            if statuses.contains(&drone.status) {
                drones.push(drone);
            }
        }
        Ok(drones)
    }

    async fn create(&self, drone: &Drone) -> Result<()> {
        let location = drone.current_location;
        let created = was_applied(
            self.session()
                .query_unpaged(
                    format!("INSERT INTO drones ({DRONE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) IF NOT EXISTS"),
                    (
                        drone.drone_id,
                        &drone.name,
                        drone.status.as_str(),
                        drone.battery_level,
                        drone.max_payload_g,
                        location.map(|p| p.longitude),
                        location.map(|p| p.latitude),
                        drone.last_maintenance.map(|d| d.to_string()),
                        drone.updated_at,
                    ),
                )
                .await?,
        )?;

        if created {
            Ok(())
        } else {
            Err(PersistenceError::duplicate("Drone", drone.drone_id))
        }
    }

    async fn compare_and_set_status(
        &self,
        drone_id: Uuid,
        expected: DroneStatus,
        next: DroneStatus,
    ) -> Result<bool> {
        was_applied(
            self.session()
                .query_unpaged(
                    "UPDATE drones SET status = ? WHERE drone_id = ? IF status = ?",
                    (next.as_str(), drone_id, expected.as_str()),
                )
                .await?,
        )
    }

    async fn save_state(&self, drone: &Drone, expected: DroneStatus) -> Result<bool> {
        let location = drone.current_location;
        was_applied(
            self.session()
                .query_unpaged(
                    "UPDATE drones SET status = ?, battery_level = ?, longitude = ?, latitude = ?, \
                     updated_at = ? WHERE drone_id = ? IF status = ?",
                    (
                        drone.status.as_str(),
                        drone.battery_level,
                        location.map(|p| p.longitude),
                        location.map(|p| p.latitude),
                        drone.updated_at,
                        drone.drone_id,
                        expected.as_str(),
                    ),
                )
                .await?,
        )
    }
}

// =============================================================================
// DELIVERY REPOSITORY
// =============================================================================

impl ScyllaStore {
    async fn query_deliveries(&self, filter: &str) -> Result<Vec<DeliveryRequest>> {
        let result = self
            .session()
            .query_unpaged(
                format!("SELECT {DELIVERY_COLUMNS} FROM deliveries {filter}"),
                (),
            )
            .await?;

        let rows = result.into_rows_result().map_err(scylla_err)?;
        let mut deliveries = Vec::new();
        for row in rows.rows::<DeliveryRow>().map_err(scylla_err)? {
            deliveries.push(delivery_from_row(row.map_err(scylla_err)?)?);
        }
        Ok(deliveries)
    }
}

#[async_trait]
impl DeliveryRepository for ScyllaStore {
    async fn get_by_id(&self, delivery_id: Uuid) -> Result<Option<DeliveryRequest>> {
        let result = self
            .session()
            .query_unpaged(
                format!("SELECT {DELIVERY_COLUMNS} FROM deliveries WHERE delivery_id = ?"),
                (delivery_id,),
            )
            .await?;

        let rows = result.into_rows_result().map_err(scylla_err)?;
        rows.maybe_first_row::<DeliveryRow>()
            .map_err(scylla_err)?
            .map(delivery_from_row)
            .transpose()
    }

    async fn create(&self, delivery: &DeliveryRequest) -> Result<()> {
        let created = was_applied(
            self.session()
                .query_unpaged(
                    format!(
                        "INSERT INTO deliveries ({DELIVERY_COLUMNS}) \
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) IF NOT EXISTS"
                    ),
                    (
                        delivery.delivery_id,
                        serde_json::to_string(&delivery.pickup)?,
                        serde_json::to_string(&delivery.dropoff)?,
                        delivery.weight_g,
                        delivery.status.as_str(),
                        delivery.created_at,
                        delivery.assigned_drone,
                        delivery.priority,
                        delivery.distance_m,
                        delivery.estimated_duration_min,
                        delivery.actual_duration_min,
                    ),
                )
                .await?,
        )?;
        if !created {
            return Err(PersistenceError::duplicate("DeliveryRequest", delivery.delivery_id));
        }

        self.session()
            .query_unpaged(
                "INSERT INTO deliveries_by_date (created_date, delivery_id) VALUES (?, ?)",
                (
                    delivery.created_at.date_naive().to_string(),
                    delivery.delivery_id,
                ),
            )
            .await?;
        Ok(())
    }

    async fn get_active_for_drone(&self, drone_id: Uuid) -> Result<Option<DeliveryRequest>> {
        let result = self
            .session()
            .query_unpaged(
                format!(
                    "SELECT {DELIVERY_COLUMNS} FROM deliveries WHERE assigned_drone = ? ALLOW FILTERING"
                ),
                (drone_id,),
            )
            .await?;

        let rows = result.into_rows_result().map_err(scylla_err)?;
        let mut active: Option<DeliveryRequest> = None;
        for row in rows.rows::<DeliveryRow>().map_err(scylla_err)? {
            let delivery = delivery_from_row(row.map_err(scylla_err)?)?;
            let newer = active
                .as_ref()
                .is_none_or(|current| delivery.created_at > current.created_at);
            if delivery.status.is_active() && newer {
                active = Some(delivery);
            }
        }
        Ok(active)
    }

    async fn get_pending(&self, limit: Option<usize>) -> Result<Vec<DeliveryRequest>> {
        let mut pending = self
            .query_deliveries("WHERE status = 'pending' ALLOW FILTERING")
            .await?;

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
        let mut deliveries = Vec::new();
        let mut day = range.start.date_naive();
        let last = range.end.date_naive();

        while day <= last {
            let result = self
                .session()
                .query_unpaged(
                    "SELECT delivery_id FROM deliveries_by_date WHERE created_date = ?",
                    (day.to_string(),),
                )
                .await?;
            let rows = result.into_rows_result().map_err(scylla_err)?;
            for row in rows.rows::<(Uuid,)>().map_err(scylla_err)? {
                let (delivery_id,) = row.map_err(scylla_err)?;
                let found = DeliveryRepository::get_by_id(self, delivery_id).await?;
                if let Some(delivery) = found.filter(|d| range.contains(&d.created_at)) {
                    deliveries.push(delivery);
                }
            }

            let Some(next) = day.succ_opt() else { break };
            day = next;
        }
        Ok(deliveries)
    }

    async fn save_state(&self, delivery: &DeliveryRequest, expected: DeliveryStatus) -> Result<bool> {
        was_applied(
            self.session()
                .query_unpaged(
                    "UPDATE deliveries SET status = ?, assigned_drone = ?, distance_m = ?, \
                     estimated_duration_min = ?, actual_duration_min = ? \
                     WHERE delivery_id = ? IF status = ?",
                    (
                        delivery.status.as_str(),
                        delivery.assigned_drone,
                        delivery.distance_m,
                        delivery.estimated_duration_min,
                        delivery.actual_duration_min,
                        delivery.delivery_id,
                        expected.as_str(),
                    ),
                )
                .await?,
        )
    }
}

// =============================================================================
// ROUTE / TELEMETRY / METRICS REPOSITORIES
// =============================================================================

#[async_trait]
impl RouteRepository for ScyllaStore {
    async fn get_by_delivery(&self, delivery_id: Uuid) -> Result<Option<Route>> {
        let result = self
            .session()
            .query_unpaged(
                "SELECT delivery_id, path, created_at, updated_at FROM routes WHERE delivery_id = ?",
                (delivery_id,),
            )
            .await?;

        let rows = result.into_rows_result().map_err(scylla_err)?;
        let Some((delivery_id, path, created_at, updated_at)) = rows
            .maybe_first_row::<(Uuid, String, DateTime<Utc>, DateTime<Utc>)>()
            .map_err(scylla_err)?
        else {
            return Ok(None);
        };

        Ok(Some(Route {
            delivery_id,
            path: serde_json::from_str(&path)?,
            created_at,
            updated_at,
        }))
    }
}

#[async_trait]
impl TelemetryRepository for ScyllaStore {
    async fn get_latest(&self, drone_id: Uuid, limit: usize) -> Result<Vec<TelemetrySample>> {
        let limit = i32::try_from(limit).unwrap_or(i32::MAX);
        let result = self
            .session()
            .query_unpaged(
                "SELECT drone_id, recorded_at, longitude, latitude, battery_level, speed_mps, altitude_m \
                 FROM telemetry WHERE drone_id = ? LIMIT ?",
                (drone_id, limit),
            )
            .await?;

        let rows = result.into_rows_result().map_err(scylla_err)?;
        let mut samples = Vec::new();
        for row in rows.rows::<TelemetryRow>().map_err(scylla_err)? {
            let (drone_id, timestamp, lon, lat, battery_level, speed_mps, altitude_m) =
                row.map_err(scylla_err)?;
            samples.push(TelemetrySample {
                drone_id,
                timestamp,
                location: GeoPoint::new(lon, lat),
                battery_level,
                speed_mps,
                altitude_m,
            });
        }
        Ok(samples)
    }

    async fn insert(&self, sample: &TelemetrySample) -> Result<()> {
        self.session()
            .query_unpaged(
                "INSERT INTO telemetry (drone_id, recorded_at, longitude, latitude, battery_level, \
                 speed_mps, altitude_m) VALUES (?, ?, ?, ?, ?, ?, ?)",
                (
                    sample.drone_id,
                    sample.timestamp,
                    sample.location.longitude,
                    sample.location.latitude,
                    sample.battery_level,
                    sample.speed_mps,
                    sample.altitude_m,
                ),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MetricsRepository for ScyllaStore {
    async fn get_by_date(&self, date: NaiveDate) -> Result<Option<DailyMetrics>> {
        let result = self
            .session()
            .query_unpaged(
                "SELECT date, total_deliveries, successful_deliveries, average_delivery_time_min, \
                 average_cost_per_km, total_distance_km FROM daily_metrics WHERE date = ?",
                (date.to_string(),),
            )
            .await?;

        let rows = result.into_rows_result().map_err(scylla_err)?;
        let Some(row) = rows.maybe_first_row::<MetricsRow>().map_err(scylla_err)? else {
            return Ok(None);
        };
        let (_, total, successful, avg_time, cost_per_km, distance_km) = row;

        Ok(Some(DailyMetrics {
            date,
            total_deliveries: total,
            successful_deliveries: successful,
            average_delivery_time_min: avg_time,
            average_cost_per_km: cost_per_km,
            total_distance_km: distance_km,
        }))
    }

    async fn upsert(&self, metrics: &DailyMetrics) -> Result<()> {
        self.session()
            .query_unpaged(
                "INSERT INTO daily_metrics (date, total_deliveries, successful_deliveries, \
                 average_delivery_time_min, average_cost_per_km, total_distance_km) \
                 VALUES (?, ?, ?, ?, ?, ?)",
                (
                    metrics.date.to_string(),
                    metrics.total_deliveries,
                    metrics.successful_deliveries,
                    metrics.average_delivery_time_min,
                    metrics.average_cost_per_km,
                    metrics.total_distance_km,
                ),
            )
            .await?;
        Ok(())
    }
}

// =============================================================================
// UNIT OF WORK
// =============================================================================

#[async_trait]
impl UnitOfWork for ScyllaStore {
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
        let claimed = self
            .compare_and_set_status(
                assignment.drone_id,
                DroneStatus::Idle,
                DroneStatus::InTransit,
            )
            .await?;
        if !claimed {
            return Ok(AssignmentCommit::DroneUnavailable);
        }

        match self.assign_route_and_delivery(assignment).await {
            Ok(AssignmentCommit::Committed) => Ok(AssignmentCommit::Committed),
            Ok(other) => {
                self.release_drone(assignment.drone_id).await;
                Ok(other)
            }
            Err(e) => {
                tracing::warn!(
                    drone_id = %assignment.drone_id,
                    delivery_id = %assignment.delivery.delivery_id,
                    error = %e,
                    "Assignment failed mid-commit, rolling back"
                );
                self.drop_route(assignment.delivery.delivery_id).await;
                self.release_drone(assignment.drone_id).await;
                Err(e)
            }
        }
    }

    async fn commit_step(&self, step: &StepRecord) -> Result<StepCommit> {
        let drone_saved =
            DroneRepository::save_state(self, &step.drone, step.drone_before.status).await?;
        if !drone_saved {
            return Ok(StepCommit::DroneChanged);
        }
        if !step.delivery_changed() {
            return Ok(StepCommit::Committed);
        }

        match DeliveryRepository::save_state(self, &step.delivery, step.delivery_before.status).await {
            Ok(true) => Ok(StepCommit::Committed),
            Ok(false) => {
                self.restore_drone(step).await;
                Ok(StepCommit::DeliveryChanged)
            }
            Err(e) => {
                tracing::warn!(
                    drone_id = %step.drone.drone_id,
                    delivery_id = %step.delivery.delivery_id,
                    error = %e,
                    "Step failed mid-commit, rolling back"
                );
                self.restore_drone(step).await;
                Err(e)
            }
        }
    }
}
