//! Wall-clock source and telemetry noise.
//!
//! Both are injected so simulations can be replayed: tests drive a
//! [`ManualClock`] and seed [`TelemetryNoise`].

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Mutex, PoisonError};

/// Source of "now"
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub const fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Randomized speed and altitude for simulated telemetry
#[derive(Debug)]
pub struct TelemetryNoise {
    rng: StdRng,
}

impl TelemetryNoise {
    pub const SPEED_MPS: (f64, f64) = (5.0, 15.0);
    pub const ALTITUDE_M: (f64, f64) = (50.0, 150.0);

    /// Seeded when `seed` is set, otherwise from OS entropy
    pub fn new(seed: Option<u64>) -> Self {
        let rng = seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        Self { rng }
    }

    pub fn speed_mps(&mut self) -> f64 {
        self.rng.gen_range(Self::SPEED_MPS.0..=Self::SPEED_MPS.1)
    }

    pub fn altitude_m(&mut self) -> f64 {
        self.rng.gen_range(Self::ALTITUDE_M.0..=Self::ALTITUDE_M.1)
    }
}
