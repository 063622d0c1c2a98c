//! # Fleet Registry
//!
//! Owns drone records: registration, lookups and a per-drone
//! exclusive lock shared by dispatch claims and simulation ticks.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use delivery_domain::{Drone, DroneStatus, GeoPoint, Location};
use delivery_persistence::UnitOfWork;

use crate::error::Result;

/// Idle drone considered for a dispatch, with its distance to the pickup
#[derive(Debug, Clone)]
pub struct Candidate {
    pub drone: Drone,
    pub distance_m: f64,
}

/// Registry of drones and their work locks
pub struct FleetRegistry {
    store: Arc<dyn UnitOfWork>,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl FleetRegistry {
    pub fn new(store: Arc<dyn UnitOfWork>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    pub async fn register(&self, drone: &Drone) -> Result<()> {
        self.store.drones().create(drone).await?;
        tracing::info!(drone_id = %drone.drone_id, name = %drone.name, "Drone registered");
        Ok(())
    }

    pub async fn get(&self, drone_id: Uuid) -> Result<Option<Drone>> {
        Ok(self.store.drones().get_by_id(drone_id).await?)
    }

    /// Take the drone's work lock without waiting. `None` means another
    /// tick or claim holds it.
    pub fn try_lock(&self, drone_id: Uuid) -> Option<OwnedMutexGuard<()>> {
        let lock = self
            .locks
            .entry(drone_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.try_lock_owned().ok()
    }

    /// Idle, positioned drones within `radius_m` of `point`, nearest first
    pub async fn idle_within(&self, point: &GeoPoint, radius_m: f64) -> Result<Vec<Candidate>> {
        let idle = self.store.drones().get_by_status(&[DroneStatus::Idle]).await?;

        let mut candidates: Vec<Candidate> = idle
            .into_iter()
            .filter_map(|drone| {
                let distance_m = drone.current_location?.distance_to_m(point);
                (distance_m <= radius_m).then_some(Candidate { drone, distance_m })
            })
            .collect();

        candidates.sort_by(|a, b| {
            a.distance_m
                .total_cmp(&b.distance_m)
                .then_with(|| a.drone.drone_id.cmp(&b.drone.drone_id))
        });
        Ok(candidates)
    }

    /// Drones the simulation advances this tick
    pub async fn active_drones(&self) -> Result<Vec<Drone>> {
        Ok(self
            .store
            .drones()
            .get_by_status(&[DroneStatus::InTransit, DroneStatus::Returning])
            .await?)
    }

    /// Nearest depot to `from`; ties go to the lowest location id
    pub async fn nearest_depot(&self, from: &GeoPoint) -> Result<Option<Location>> {
        let depots = self.store.locations().list_depots().await?;

        Ok(depots.into_iter().min_by(|a, b| {
            let da = a.coordinates.distance_to_m(from);
            let db = b.coordinates.distance_to_m(from);
            da.total_cmp(&db).then_with(|| a.location_id.cmp(&b.location_id))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use delivery_persistence::InMemoryStore;
    use fake::Fake;
    use fake::faker::name::en::Name;

    fn drone_at(lon: f64, lat: f64) -> Drone {
        let name: String = Name().fake();
        Drone::new(&name, 2_000.0, Some(GeoPoint::new(lon, lat)), Utc::now())
    }

    #[tokio::test]
    async fn test_idle_within_sorted_and_bounded() {
        let fleet = FleetRegistry::new(Arc::new(InMemoryStore::new()));
        let near = drone_at(0.01, 0.0);
        let nearer = drone_at(0.001, 0.0);
        let far = drone_at(1.0, 0.0);
        let mut busy = drone_at(0.0, 0.0);
        busy.status = DroneStatus::InTransit;
        let unplaced = Drone::new("Ghost", 2_000.0, None, Utc::now());

        for drone in [&near, &nearer, &far, &busy, &unplaced] {
            fleet.register(drone).await.unwrap();
        }

        let candidates = fleet
            .idle_within(&GeoPoint::new(0.0, 0.0), 10_000.0)
            .await
            .unwrap();
        let ids: Vec<Uuid> = candidates.iter().map(|c| c.drone.drone_id).collect();
        assert_eq!(ids, vec![nearer.drone_id, near.drone_id]);
    }

    #[tokio::test]
    async fn test_try_lock_is_exclusive_per_drone() {
        let fleet = FleetRegistry::new(Arc::new(InMemoryStore::new()));
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let guard = fleet.try_lock(a).unwrap();
        assert!(fleet.try_lock(a).is_none());
        assert!(fleet.try_lock(b).is_some());

        drop(guard);
        assert!(fleet.try_lock(a).is_some());
    }

    #[tokio::test]
    async fn test_nearest_depot() {
        let store = Arc::new(InMemoryStore::new());
        let fleet = FleetRegistry::new(store.clone());
        let west = Location::depot("West", GeoPoint::new(-0.5, 0.0));
        let east = Location::depot("East", GeoPoint::new(0.2, 0.0));
        let shop = Location::new("Shop", GeoPoint::new(0.0, 0.0));
        for location in [&west, &east, &shop] {
            store.locations().create(location).await.unwrap();
        }

        let depot = fleet
            .nearest_depot(&GeoPoint::new(0.0, 0.0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(depot.location_id, east.location_id);
    }
}
