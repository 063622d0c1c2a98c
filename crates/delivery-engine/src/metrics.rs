//! # Metrics Aggregator
//!
//! Maintains the daily delivery rollup as deliveries complete.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

use delivery_domain::{DailyMetrics, DeliveryRequest, DeliveryStatus, TimeRange};
use delivery_persistence::UnitOfWork;

use crate::error::{EngineError, Result};

/// Daily metrics aggregator
pub struct MetricsAggregator {
    store: Arc<dyn UnitOfWork>,
    cost_per_delivery: f64,
    /// Serializes the read-modify-write of the daily row
    write_lock: Mutex<()>,
}

impl MetricsAggregator {
    pub fn new(store: Arc<dyn UnitOfWork>, cost_per_delivery: f64) -> Self {
        Self {
            store,
            cost_per_delivery,
            write_lock: Mutex::new(()),
        }
    }

    /// Fold one delivered or failed delivery into the row for `now`'s date.
    ///
    /// Counters are incremental. Averages and distance are recomputed from
    /// every delivery created that day, so the completed delivery must
    /// already be persisted.
    pub async fn record_completion(
        &self,
        delivery: &DeliveryRequest,
        now: DateTime<Utc>,
    ) -> Result<DailyMetrics> {
        if !delivery.status.is_complete() {
            return Err(EngineError::InvalidState(format!(
                "delivery {} is {}, not complete",
                delivery.delivery_id, delivery.status
            )));
        }

        let _guard = self.write_lock.lock().await;
        let date = now.date_naive();

        let mut metrics = self
            .store
            .metrics()
            .get_by_date(date)
            .await?
            .unwrap_or_else(|| DailyMetrics::empty(date));

        metrics.total_deliveries += 1;
        if delivery.status == DeliveryStatus::Delivered {
            metrics.successful_deliveries += 1;
        }

        let today = self
            .store
            .deliveries()
            .list_created_between(TimeRange::for_date(date))
            .await?;

        let durations: Vec<f64> = today
            .iter()
            .filter(|d| d.status == DeliveryStatus::Delivered)
            .filter_map(|d| d.actual_duration_min)
            .collect();
        metrics.average_delivery_time_min = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<f64>() / durations.len() as f64
        };

        metrics.total_distance_km = today.iter().filter_map(|d| d.distance_m).sum::<f64>() / 1000.0;

        // Flat cost per delivery created today, spread over today's distance
        metrics.average_cost_per_km = if metrics.total_distance_km > 0.0 {
            today.len() as f64 * self.cost_per_delivery / metrics.total_distance_km
        } else {
            0.0
        };

        self.store.metrics().upsert(&metrics).await?;

        tracing::info!(
            date = %date,
            delivery_id = %delivery.delivery_id,
            status = %delivery.status,
            total = metrics.total_deliveries,
            successful = metrics.successful_deliveries,
            avg_time_min = metrics.average_delivery_time_min,
            "Daily metrics updated"
        );
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use delivery_domain::{GeoPoint, Location};
    use delivery_persistence::InMemoryStore;

    fn nine_am() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap()
    }

    async fn finished(
        store: &InMemoryStore,
        outcome: DeliveryStatus,
        after: Duration,
        distance_m: f64,
    ) -> DeliveryRequest {
        let mut delivery = DeliveryRequest::new(
            Location::new("From", GeoPoint::new(0.0, 0.0)),
            Location::new("To", GeoPoint::new(0.01, 0.0)),
            400.0,
            0,
            nine_am(),
        );
        delivery.distance_m = Some(distance_m);
        delivery.status = DeliveryStatus::InProgress;
        delivery.complete(outcome, nine_am() + after).unwrap();
        store.deliveries().create(&delivery).await.unwrap();
        delivery
    }

    #[tokio::test]
    async fn test_one_delivered_one_failed() {
        let store = Arc::new(InMemoryStore::new());
        let aggregator = MetricsAggregator::new(store.clone(), 10.0);

        let ok = finished(&store, DeliveryStatus::Delivered, Duration::minutes(10), 1_500.0).await;
        let failed = finished(&store, DeliveryStatus::Failed, Duration::minutes(25), 500.0).await;

        aggregator.record_completion(&ok, nine_am() + Duration::minutes(10)).await.unwrap();
        let metrics = aggregator
            .record_completion(&failed, nine_am() + Duration::minutes(25))
            .await
            .unwrap();

        assert_eq!(metrics.total_deliveries, 2);
        assert_eq!(metrics.successful_deliveries, 1);
        assert!((metrics.average_delivery_time_min - 10.0).abs() < 1e-9);
        assert!((metrics.total_distance_km - 2.0).abs() < 1e-9);
        assert!((metrics.average_cost_per_km - 10.0).abs() < 1e-9);
        assert!((metrics.success_rate() - 50.0).abs() < 1e-9);

        let stored = store.metrics().get_by_date(nine_am().date_naive()).await.unwrap();
        assert_eq!(stored, Some(metrics));
    }

    #[tokio::test]
    async fn test_no_distance_means_zero_cost() {
        let store = Arc::new(InMemoryStore::new());
        let aggregator = MetricsAggregator::new(store.clone(), 10.0);
        let failed = finished(&store, DeliveryStatus::Failed, Duration::minutes(3), 0.0).await;

        let metrics = aggregator.record_completion(&failed, nine_am()).await.unwrap();
        assert_eq!(metrics.average_cost_per_km, 0.0);
        assert_eq!(metrics.average_delivery_time_min, 0.0);
    }

    #[tokio::test]
    async fn test_rejects_incomplete_delivery() {
        let store = Arc::new(InMemoryStore::new());
        let aggregator = MetricsAggregator::new(store, 10.0);
        let pending = DeliveryRequest::new(
            Location::new("From", GeoPoint::new(0.0, 0.0)),
            Location::new("To", GeoPoint::new(0.01, 0.0)),
            400.0,
            0,
            nine_am(),
        );
        assert!(aggregator.record_completion(&pending, nine_am()).await.is_err());
    }
}
