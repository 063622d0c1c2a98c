//! End-to-end delivery scenarios against the in-memory store, a manual
//! clock, seeded telemetry noise and the in-process bus.

use chrono::{DateTime, Duration, TimeZone, Utc};
use fake::Fake;
use fake::faker::name::en::Name;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use delivery_domain::geo::planar_distance_deg;
use delivery_domain::{
    BusMessage, DeliveryEvent, DeliveryRequest, DeliveryStatus, Drone, DroneStatus, GeoPoint,
    Location, Topic,
};
use delivery_engine::{
    AssignmentOutcome, DeliveryService, EngineConfig, EngineError, FlightParams, ManualClock,
};
use delivery_persistence::{BroadcastBus, InMemoryStore, UnitOfWork};

// =============================================================================
// HARNESS
// =============================================================================

struct World {
    service: Arc<DeliveryService>,
    store: Arc<InMemoryStore>,
    clock: Arc<ManualClock>,
    bus: BroadcastBus,
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap()
}

fn world(flight: FlightParams) -> World {
    let store = Arc::new(InMemoryStore::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let bus = BroadcastBus::new();
    let config = EngineConfig {
        flight,
        sim_seed: Some(11),
        ..EngineConfig::default()
    };
    let service = Arc::new(DeliveryService::new(
        store.clone(),
        Arc::new(bus.clone()),
        clock.clone(),
        &config,
    ));
    World {
        service,
        store,
        clock,
        bus,
    }
}

/// Large steps so a one-degree trip takes a handful of ticks
fn coarse() -> FlightParams {
    FlightParams {
        step_deg: 0.25,
        arrival_threshold_deg: 1e-6,
        battery_drain_per_tick: 0.0,
        ..FlightParams::default()
    }
}

impl World {
    async fn stop(&self, lon: f64, lat: f64) -> Location {
        let name: String = Name().fake();
        self.service
            .create_location(&name, GeoPoint::new(lon, lat), false, None)
            .await
            .unwrap()
    }

    async fn depot(&self, lon: f64, lat: f64) -> Location {
        self.service
            .create_location("Depot", GeoPoint::new(lon, lat), true, None)
            .await
            .unwrap()
    }

    async fn drone(&self, lon: f64, lat: f64, battery: f64) -> Drone {
        let name: String = Name().fake();
        self.service
            .register_drone(&name, 2_000.0, GeoPoint::new(lon, lat), battery)
            .await
            .unwrap()
    }

    async fn order(&self, from: (f64, f64), to: (f64, f64)) -> DeliveryRequest {
        let pickup = self.stop(from.0, from.1).await;
        let dropoff = self.stop(to.0, to.1).await;
        self.service
            .create_delivery(pickup.location_id, dropoff.location_id, 500.0, 1)
            .await
            .unwrap()
    }

    async fn drone_now(&self, drone_id: Uuid) -> Drone {
        self.service.get_drone(drone_id).await.unwrap().unwrap()
    }

    async fn delivery_now(&self, delivery_id: Uuid) -> DeliveryRequest {
        self.service.get_delivery(delivery_id).await.unwrap().unwrap()
    }
}

fn drain_events(sub: &mut delivery_persistence::TopicSubscription) -> Vec<DeliveryEvent> {
    let mut events = Vec::new();
    while let Some(message) = sub.try_recv() {
        if let BusMessage::Delivery(update) = message {
            events.push(update.status);
        }
    }
    events
}

// =============================================================================
// SCENARIOS
// =============================================================================

#[tokio::test]
async fn delivers_after_ceil_distance_over_step_ticks() {
    let w = world(coarse());
    let drone = w.drone(0.0, 0.0, 100.0).await;
    let delivery = w.order((0.0, 0.0), (1.0, 0.0)).await;
    let mut drone_feed = w.bus.subscribe(Topic::Drone(drone.drone_id));
    let mut delivery_feed = w.bus.subscribe(Topic::Delivery(delivery.delivery_id));

    let outcome = w.service.dispatch(delivery.delivery_id).await.unwrap();
    assert!(outcome.is_assigned());

    let ticks = (1.0_f64 / coarse().step_deg).ceil() as usize;
    for _ in 0..ticks - 1 {
        w.clock.advance(Duration::minutes(1));
        w.service.tick().await.unwrap();
    }
    assert_eq!(w.delivery_now(delivery.delivery_id).await.status, DeliveryStatus::InProgress);

    w.clock.advance(Duration::minutes(1));
    let report = w.service.tick().await.unwrap();
    assert_eq!(report.delivered, 1);

    let delivered = w.delivery_now(delivery.delivery_id).await;
    let landed = w.drone_now(drone.drone_id).await;
    assert_eq!(delivered.status, DeliveryStatus::Delivered);
    assert!((delivered.actual_duration_min.unwrap() - ticks as f64).abs() < 1e-9);
    assert_eq!(landed.status, DroneStatus::Idle);
    assert_eq!(landed.current_location, Some(GeoPoint::new(1.0, 0.0)));

    // One sample per tick, on storage and on the drone's topic
    let samples = w.service.latest_telemetry(drone.drone_id, 100).await.unwrap();
    assert_eq!(samples.len(), ticks);
    assert!(samples.windows(2).all(|s| s[0].timestamp > s[1].timestamp));
    let mut published = 0;
    while let Some(BusMessage::Telemetry(msg)) = drone_feed.try_recv() {
        assert!((5.0..=15.0).contains(&msg.speed));
        assert!((50.0..=150.0).contains(&msg.altitude));
        published += 1;
    }
    assert_eq!(published, ticks);
    assert_eq!(drain_events(&mut delivery_feed), vec![DeliveryEvent::Delivered]);

    let metrics = w.service.metrics_for(t0().date_naive()).await.unwrap().unwrap();
    assert_eq!(metrics.total_deliveries, 1);
    assert_eq!(metrics.successful_deliveries, 1);
}

#[tokio::test]
async fn one_tick_moves_exactly_one_step_toward_target() {
    let params = FlightParams::default();
    let w = world(params);
    let drone = w.drone(10.0, 20.0, 100.0).await;
    let delivery = w.order((10.0, 20.0), (10.03, 20.04)).await;
    w.service.dispatch(delivery.delivery_id).await.unwrap();

    w.service.tick().await.unwrap();

    let start = GeoPoint::new(10.0, 20.0);
    let at = w.drone_now(drone.drone_id).await.current_location.unwrap();
    let moved = planar_distance_deg(&start, &at);
    assert!((moved - params.step_deg).abs() < 1e-12);
    assert!(((at.longitude - start.longitude) / moved - 0.6).abs() < 1e-6);
    assert!(((at.latitude - start.latitude) / moved - 0.8).abs() < 1e-6);
}

#[tokio::test]
async fn low_battery_diverts_exactly_once() {
    let w = world(FlightParams::default());
    w.depot(-0.01, 0.0).await;
    let drone = w.drone(0.0, 0.0, 22.0).await;
    let delivery = w.order((0.0, 0.0), (1.0, 0.0)).await;
    let mut feed = w.bus.subscribe(Topic::Delivery(delivery.delivery_id));
    w.service.dispatch(delivery.delivery_id).await.unwrap();

    let mut diversions = 0;
    let mut last_battery = 22.0;
    for _ in 0..40 {
        w.clock.advance(Duration::seconds(5));
        diversions += w.service.tick().await.unwrap().returning_to_charge;

        let now = w.drone_now(drone.drone_id).await;
        assert!(now.battery_level <= last_battery);
        assert!(now.battery_level >= 0.0);
        last_battery = now.battery_level;
    }

    assert_eq!(diversions, 1);
    assert_eq!(drain_events(&mut feed), vec![DeliveryEvent::ReturningToCharge]);
    assert_eq!(w.delivery_now(delivery.delivery_id).await.status, DeliveryStatus::Returning);
    assert_eq!(w.drone_now(drone.drone_id).await.status, DroneStatus::Returning);
}

#[tokio::test]
async fn returning_drone_docks_at_nearest_depot() {
    let w = world(FlightParams {
        step_deg: 0.004,
        battery_drain_per_tick: 1.0,
        ..FlightParams::default()
    });
    let near = w.depot(-0.01, 0.0).await;
    w.depot(0.5, 0.5).await;
    let drone = w.drone(0.0, 0.0, 20.5).await;
    let delivery = w.order((0.0, 0.0), (1.0, 0.0)).await;
    w.service.dispatch(delivery.delivery_id).await.unwrap();

    // Diverts on the first tick, then flies ~0.014 deg back at 0.004 per tick
    let mut docked = 0;
    for _ in 0..6 {
        docked += w.service.tick().await.unwrap().docked;
    }

    let drone = w.drone_now(drone.drone_id).await;
    assert_eq!(docked, 1);
    assert_eq!(drone.status, DroneStatus::Charging);
    assert_eq!(drone.current_location, Some(near.coordinates));
    assert_eq!(w.delivery_now(delivery.delivery_id).await.status, DeliveryStatus::Returning);

    // Charging drones are not ticked
    assert_eq!(w.service.tick().await.unwrap().active, 0);
}

#[tokio::test]
async fn depleted_battery_lands_and_stops_ticking() {
    let w = world(FlightParams::default());
    let drone = w.drone(0.0, 0.0, 80.0).await;
    let delivery = w.order((0.0, 0.0), (1.0, 0.0)).await;
    let mut feed = w.bus.subscribe(Topic::Delivery(delivery.delivery_id));
    w.service.dispatch(delivery.delivery_id).await.unwrap();
    w.service.tick().await.unwrap();

    // Force the battery down mid-transit
    let mut flying = w.drone_now(drone.drone_id).await;
    flying.battery_level = 0.5;
    assert!(w.store.drones().save_state(&flying, DroneStatus::InTransit).await.unwrap());

    let report = w.service.tick().await.unwrap();
    assert_eq!(report.emergency_landings, 1);

    let landed = w.drone_now(drone.drone_id).await;
    let failed = w.delivery_now(delivery.delivery_id).await;
    assert_eq!(landed.status, DroneStatus::Maintenance);
    assert_eq!(failed.status, DeliveryStatus::Failed);
    assert!(failed.actual_duration_min.is_some());
    assert_eq!(drain_events(&mut feed), vec![DeliveryEvent::EmergencyLanding]);

    let samples = w.service.latest_telemetry(drone.drone_id, 100).await.unwrap().len();
    for _ in 0..3 {
        assert_eq!(w.service.tick().await.unwrap().active, 0);
    }
    assert_eq!(w.drone_now(drone.drone_id).await, landed);
    assert_eq!(w.service.latest_telemetry(drone.drone_id, 100).await.unwrap().len(), samples);
}

#[tokio::test]
async fn daily_metrics_count_only_delivered_durations() {
    let w = world(coarse());
    w.drone(0.0, 0.0, 100.0).await;
    w.drone(5.0, 5.0, 0.5).await;
    let quick = w.order((0.0, 0.0), (0.1, 0.0)).await;
    let doomed = w.order((5.0, 5.0), (6.0, 5.0)).await;

    assert!(w.service.dispatch(quick.delivery_id).await.unwrap().is_assigned());
    assert!(w.service.dispatch(doomed.delivery_id).await.unwrap().is_assigned());

    w.clock.advance(Duration::minutes(10));
    let report = w.service.tick().await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(report.emergency_landings, 1);

    let metrics = w.service.metrics_for(t0().date_naive()).await.unwrap().unwrap();
    assert_eq!(metrics.total_deliveries, 2);
    assert_eq!(metrics.successful_deliveries, 1);
    assert!((metrics.average_delivery_time_min - 10.0).abs() < 1e-9);
    assert!(metrics.total_distance_km > 0.0);
}

#[tokio::test]
async fn no_drone_available_leaves_delivery_untouched() {
    let w = world(FlightParams::default());
    w.drone(0.5, 0.5, 100.0).await; // ~78 km away
    let delivery = w.order((0.0, 0.0), (0.01, 0.0)).await;

    let outcome = w.service.dispatch(delivery.delivery_id).await.unwrap();
    assert!(matches!(outcome, AssignmentOutcome::NoDroneAvailable));

    let after = w.delivery_now(delivery.delivery_id).await;
    assert_eq!(after.status, DeliveryStatus::Pending);
    assert_eq!(after.assigned_drone, None);
    assert_eq!(after.distance_m, None);
    assert_eq!(after.estimated_duration_min, None);
    assert!(w.service.get_route(delivery.delivery_id).await.unwrap().is_none());
}

// =============================================================================
// CONCURRENCY
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_dispatch_of_one_delivery_assigns_once() {
    let w = world(FlightParams::default());
    let drone = w.drone(0.0, 0.0, 100.0).await;
    let delivery = w.order((0.0, 0.0), (0.01, 0.0)).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = Arc::clone(&w.service);
        let id = delivery.delivery_id;
        handles.push(tokio::spawn(async move { service.dispatch(id).await }));
    }

    let mut assigned = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(AssignmentOutcome::Assigned { drone: claimed, .. }) => {
                assert_eq!(claimed.drone_id, drone.drone_id);
                assigned += 1;
            }
            Ok(AssignmentOutcome::NoDroneAvailable)
            | Err(EngineError::InvalidAssignment(_) | EngineError::ConcurrentClaimConflict { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(assigned, 1);
    let stored = w.delivery_now(delivery.delivery_id).await;
    assert_eq!(stored.assigned_drone, Some(drone.drone_id));
    assert_eq!(w.drone_now(drone.drone_id).await.status, DroneStatus::InTransit);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_dispatch_never_double_books_a_drone() {
    let w = world(FlightParams::default());
    let mut drones = Vec::new();
    for i in 0..3 {
        drones.push(w.drone(0.001 * f64::from(i), 0.0, 100.0).await);
    }
    let mut deliveries = Vec::new();
    for _ in 0..10 {
        deliveries.push(w.order((0.0, 0.0), (0.02, 0.0)).await);
    }

    let mut handles = Vec::new();
    for delivery in &deliveries {
        let service = Arc::clone(&w.service);
        let id = delivery.delivery_id;
        handles.push(tokio::spawn(async move { service.dispatch(id).await }));
    }
    for handle in handles {
        let _ = handle.await.unwrap();
    }

    let mut active_per_drone: HashMap<Uuid, usize> = HashMap::new();
    for delivery in &deliveries {
        let stored = w.delivery_now(delivery.delivery_id).await;
        if let Some(drone_id) = stored.assigned_drone {
            assert!(stored.status.is_active());
            *active_per_drone.entry(drone_id).or_default() += 1;
        } else {
            assert_eq!(stored.status, DeliveryStatus::Pending);
        }
    }
    assert!(!active_per_drone.is_empty());
    assert!(active_per_drone.values().all(|&n| n == 1));
    for drone_id in active_per_drone.keys() {
        assert_eq!(w.drone_now(*drone_id).await.status, DroneStatus::InTransit);
    }
}

#[tokio::test]
async fn active_drones_always_have_a_position() {
    let w = world(FlightParams {
        step_deg: 0.002,
        battery_drain_per_tick: 2.0,
        ..FlightParams::default()
    });
    w.depot(0.0, 0.01).await;
    let mut fleet = Vec::new();
    for i in 0..4 {
        fleet.push(w.drone(0.002 * f64::from(i), 0.0, 60.0).await.drone_id);
    }
    for i in 0..4 {
        let lon = 0.002 * f64::from(i);
        w.order((lon, 0.0), (lon + 0.03, 0.02)).await;
    }
    let summary = w.service.dispatch_pending().await.unwrap();
    assert_eq!(summary.assigned, 4);

    for _ in 0..40 {
        w.clock.advance(Duration::seconds(5));
        w.service.tick().await.unwrap();
        for drone_id in &fleet {
            assert!(w.drone_now(*drone_id).await.location_invariant_holds());
        }
    }
}
