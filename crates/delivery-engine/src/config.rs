//! # Engine Configuration
//!
//! Environment-based configuration for dispatch and simulation. Every
//! variable has a default; unparsable values fall back to it.

use clap::ValueEnum;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::state_machine::FlightParams;

/// Where records live
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackend {
    Memory,
    Scylla,
}

/// Where notifications go
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BusBackend {
    Broadcast,
    Redis,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Self as ValueEnum>::from_str(s, true)
    }
}

impl FromStr for BusBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Self as ValueEnum>::from_str(s, true)
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Self as ValueEnum>::from_str(s, true)
    }
}

/// ScyllaDB connection settings
#[derive(Debug, Clone)]
pub struct ScyllaSettings {
    pub hosts: Vec<String>,
    pub keyspace: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Scheduler period
    pub tick_interval: Duration,

    /// Dispatch search radius around the pickup
    pub search_radius_km: f64,

    /// Nominal speed for duration estimates
    pub cruise_speed_mps: f64,

    /// Per-tick movement and battery policy
    pub flight: FlightParams,

    /// Flat cost per delivery used by the cost-per-km rollup
    pub cost_per_delivery: f64,

    /// Seed for telemetry noise; entropy when unset
    pub sim_seed: Option<u64>,

    pub storage: StorageBackend,
    pub bus: BusBackend,
    pub scylla: ScyllaSettings,
    pub redis_url: String,

    /// Logging level
    pub log_level: String,
    pub log_format: LogFormat,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let flight = defaults.flight;

        Self {
            tick_interval: Duration::from_millis(env_or("TICK_INTERVAL_MS", 5000)),
            search_radius_km: env_or("SEARCH_RADIUS_KM", defaults.search_radius_km),
            cruise_speed_mps: env_or("CRUISE_SPEED_MPS", defaults.cruise_speed_mps),
            flight: FlightParams {
                step_deg: env_or("STEP_DEG", flight.step_deg),
                arrival_threshold_deg: env_or("ARRIVAL_THRESHOLD_DEG", flight.arrival_threshold_deg),
                battery_drain_per_tick: env_or("BATTERY_DRAIN_PER_TICK", flight.battery_drain_per_tick),
                low_battery_pct: env_or("LOW_BATTERY_PCT", flight.low_battery_pct),
                critical_battery_pct: env_or("CRITICAL_BATTERY_PCT", flight.critical_battery_pct),
            },
            cost_per_delivery: env_or("COST_PER_DELIVERY", defaults.cost_per_delivery),
            sim_seed: env::var("SIM_SEED").ok().and_then(|v| v.parse().ok()),

            storage: env_or("STORAGE_BACKEND", defaults.storage),
            bus: env_or("BUS_BACKEND", defaults.bus),

            scylla: ScyllaSettings {
                hosts: env::var("SCYLLA_HOSTS")
                    .map(|v| v.split(',').map(|h| h.trim().to_string()).collect())
                    .unwrap_or(defaults.scylla.hosts),
                keyspace: env::var("SCYLLA_KEYSPACE").unwrap_or(defaults.scylla.keyspace),
                username: env::var("SCYLLA_USERNAME").ok(),
                password: env::var("SCYLLA_PASSWORD").ok(),
            },
            redis_url: env::var("REDIS_URL").unwrap_or(defaults.redis_url),

            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format: env_or("LOG_FORMAT", defaults.log_format),
        }
    }

    /// Search radius in meters
    #[must_use]
    pub fn search_radius_m(&self) -> f64 {
        self.search_radius_km * 1000.0
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            search_radius_km: 10.0,
            cruise_speed_mps: 15.0,
            flight: FlightParams::default(),
            cost_per_delivery: 10.0,
            sim_seed: None,
            storage: StorageBackend::Memory,
            bus: BusBackend::Broadcast,
            scylla: ScyllaSettings {
                hosts: vec!["127.0.0.1:9042".to_string()],
                keyspace: "drone_delivery".to_string(),
                username: None,
                password: None,
            },
            redis_url: "redis://127.0.0.1:6379".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.tick_interval, Duration::from_secs(5));
        assert!((config.search_radius_m() - 10_000.0).abs() < f64::EPSILON);
        assert!((config.flight.step_deg - 0.0001).abs() < f64::EPSILON);
        assert!((config.flight.low_battery_pct - 20.0).abs() < f64::EPSILON);
        assert_eq!(config.storage, StorageBackend::Memory);
    }

    #[test]
    fn test_backend_names_parse_case_insensitively() {
        assert_eq!("Scylla".parse::<StorageBackend>().unwrap(), StorageBackend::Scylla);
        assert_eq!("redis".parse::<BusBackend>().unwrap(), BusBackend::Redis);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("postgres".parse::<StorageBackend>().is_err());
    }
}
