//! # Telemetry Recorder
//!
//! Appends telemetry samples and publishes them on the drone's topic.
//! Storage failures propagate; publish failures are logged and dropped.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};

use delivery_domain::{BusMessage, Drone, TelemetryMessage, TelemetrySample, Topic};
use delivery_persistence::{SharedBus, UnitOfWork};

use crate::clock::TelemetryNoise;
use crate::error::{EngineError, Result};

/// Publish and swallow transport errors
pub async fn publish_best_effort(bus: &SharedBus, topic: Topic, message: BusMessage) {
    if let Err(e) = bus.publish(topic, &message).await {
        tracing::warn!(topic = %topic, error = %e, "Notification dropped");
    }
}

/// Persists and broadcasts telemetry
pub struct TelemetryRecorder {
    store: Arc<dyn UnitOfWork>,
    bus: SharedBus,
    noise: Mutex<TelemetryNoise>,
}

impl TelemetryRecorder {
    pub fn new(store: Arc<dyn UnitOfWork>, bus: SharedBus, noise: TelemetryNoise) -> Self {
        Self {
            store,
            bus,
            noise: Mutex::new(noise),
        }
    }

    /// Sample a simulated drone after its tick
    pub async fn record_tick(&self, drone: &Drone, now: DateTime<Utc>) -> Result<TelemetrySample> {
        let location = drone.current_location.ok_or_else(|| {
            EngineError::InvalidState(format!("drone {} has no position", drone.drone_id))
        })?;

        let (speed_mps, altitude_m) = {
            let mut noise = self.noise.lock().unwrap_or_else(PoisonError::into_inner);
            (noise.speed_mps(), noise.altitude_m())
        };

        let sample = TelemetrySample {
            drone_id: drone.drone_id,
            timestamp: now,
            location,
            battery_level: drone.battery_level,
            speed_mps,
            altitude_m,
        };
        self.record(&sample).await?;
        Ok(sample)
    }

    /// Validate, append and publish a sample
    pub async fn record(&self, sample: &TelemetrySample) -> Result<()> {
        validate(sample)?;
        self.store.telemetry().insert(sample).await?;

        tracing::debug!(
            drone_id = %sample.drone_id,
            location = %sample.location,
            battery = sample.battery_level,
            "Telemetry recorded"
        );

        publish_best_effort(
            &self.bus,
            Topic::Drone(sample.drone_id),
            BusMessage::Telemetry(TelemetryMessage::from(sample)),
        )
        .await;
        Ok(())
    }
}

fn validate(sample: &TelemetrySample) -> Result<()> {
    sample
        .location
        .validate()
        .map_err(|e| EngineError::InvalidTelemetry(e.to_string()))?;

    if !(0.0..=100.0).contains(&sample.battery_level) {
        return Err(EngineError::InvalidTelemetry(format!(
            "battery level {} outside 0..=100",
            sample.battery_level
        )));
    }
    if !sample.speed_mps.is_finite() || sample.speed_mps < 0.0 {
        return Err(EngineError::InvalidTelemetry(format!(
            "speed {} m/s",
            sample.speed_mps
        )));
    }
    if !sample.altitude_m.is_finite() {
        return Err(EngineError::InvalidTelemetry(format!(
            "altitude {} m",
            sample.altitude_m
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use delivery_domain::GeoPoint;
    use delivery_persistence::{BroadcastBus, BusError, InMemoryStore, NotificationBus};

    struct DownBus;

    #[async_trait]
    impl NotificationBus for DownBus {
        async fn publish(&self, _topic: Topic, _message: &BusMessage) -> std::result::Result<(), BusError> {
            Err(BusError::Unavailable("connection refused".to_string()))
        }
    }

    fn flying_drone() -> Drone {
        let mut drone = Drone::new("Heron", 1_500.0, Some(GeoPoint::new(3.0, 4.0)), Utc::now());
        drone.battery_level = 64.0;
        drone
    }

    #[tokio::test]
    async fn test_record_tick_persists_and_publishes() {
        let store = Arc::new(InMemoryStore::new());
        let bus = BroadcastBus::new();
        let drone = flying_drone();
        let mut sub = bus.subscribe(Topic::Drone(drone.drone_id));
        let recorder = TelemetryRecorder::new(store.clone(), Arc::new(bus), TelemetryNoise::new(Some(7)));

        let sample = recorder.record_tick(&drone, Utc::now()).await.unwrap();
        assert!((5.0..=15.0).contains(&sample.speed_mps));
        assert!((50.0..=150.0).contains(&sample.altitude_m));

        let stored = store.telemetry().get_latest(drone.drone_id, 10).await.unwrap();
        assert_eq!(stored, vec![sample.clone()]);

        let Some(BusMessage::Telemetry(msg)) = sub.try_recv() else {
            panic!("expected telemetry message");
        };
        assert_eq!(msg.location, sample.location);
        assert!((msg.battery_level - 64.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_bus_failure_does_not_fail_recording() {
        let store = Arc::new(InMemoryStore::new());
        let recorder = TelemetryRecorder::new(store.clone(), Arc::new(DownBus), TelemetryNoise::new(Some(1)));
        let drone = flying_drone();

        recorder.record_tick(&drone, Utc::now()).await.unwrap();
        assert_eq!(store.telemetry().get_latest(drone.drone_id, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_out_of_range_battery() {
        let recorder = TelemetryRecorder::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(BroadcastBus::new()),
            TelemetryNoise::new(Some(1)),
        );
        let sample = TelemetrySample {
            drone_id: uuid::Uuid::new_v4(),
            timestamp: Utc::now(),
            location: GeoPoint::new(0.0, 0.0),
            battery_level: 140.0,
            speed_mps: 10.0,
            altitude_m: 80.0,
        };
        let err = recorder.record(&sample).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidTelemetry(_)));
    }
}
