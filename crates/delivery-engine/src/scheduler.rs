//! # Simulation Scheduler
//!
//! Fixed-period driver for [`DeliveryService::tick`]. Missed periods are
//! skipped rather than queued, and a tick in progress always finishes
//! before shutdown is observed.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use crate::service::DeliveryService;

/// Periodic tick driver
pub struct Scheduler {
    service: Arc<DeliveryService>,
    period: Duration,
    max_ticks: Option<u64>,
    retry_pending: bool,
}

impl Scheduler {
    pub const fn new(service: Arc<DeliveryService>, period: Duration) -> Self {
        Self {
            service,
            period,
            max_ticks: None,
            retry_pending: false,
        }
    }

    /// Stop after `ticks` firings
    #[must_use]
    pub const fn with_max_ticks(mut self, ticks: u64) -> Self {
        self.max_ticks = Some(ticks);
        self
    }

    /// Sweep the pending queue before every tick
    #[must_use]
    pub const fn retry_pending(mut self, enabled: bool) -> Self {
        self.retry_pending = enabled;
        self
    }

    /// Run until shutdown or the tick limit. Returns the number of ticks run.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> u64 {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            period_ms = self.period.as_millis(),
            max_ticks = ?self.max_ticks,
            "Simulation scheduler started"
        );

        let mut ticks: u64 = 0;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.fire(ticks).await;
                    ticks += 1;
                    if self.max_ticks.is_some_and(|max| ticks >= max) {
                        break;
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Simulation scheduler shutting down");
                    break;
                }
            }
        }

        tracing::info!(ticks, "Simulation scheduler stopped");
        ticks
    }

    async fn fire(&self, tick: u64) {
        if self.retry_pending {
            match self.service.dispatch_pending().await {
                Ok(summary) if summary.assigned > 0 => {
                    tracing::info!(tick, assigned = summary.assigned, waiting = summary.waiting, "Dispatched pending deliveries");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(tick, error = %e, "Pending sweep failed"),
            }
        }

        match self.service.tick().await {
            Ok(report) => tracing::info!(
                tick,
                active = report.active,
                delivered = report.delivered,
                returning = report.returning_to_charge,
                landings = report.emergency_landings,
                skipped = report.skipped,
                "Tick"
            ),
            Err(e) => tracing::error!(tick, error = %e, "Tick failed"),
        }
    }
}
