//! Drone Delivery Simulator CLI
//!
//! Seeds depots, a fleet and a batch of deliveries, then runs dispatch and
//! the flight simulation until the tick limit or Ctrl+C.

use anyhow::Result;
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

use delivery_domain::{GeoPoint, Location, Topic};
use delivery_engine::{
    BusBackend, DeliveryService, EngineConfig, LogFormat, Scheduler, StorageBackend, SystemClock,
};
use delivery_persistence::{
    BroadcastBus, InMemoryStore, RedisBus, RedisBusConfig, ScyllaClient, ScyllaConfig, ScyllaStore,
    SharedBus, UnitOfWork,
};

/// Simulation area center (San Francisco)
const CENTER: GeoPoint = GeoPoint::new(-122.4194, 37.7749);

#[derive(Parser, Debug)]
#[command(name = "delivery-sim")]
#[command(about = "Simulate drone delivery dispatch")]
struct Args {
    /// Number of drones
    #[arg(short, long, default_value = "6")]
    drones: usize,

    /// Number of deliveries
    #[arg(short = 'n', long, default_value = "12")]
    deliveries: usize,

    /// Stop after this many ticks (default: run until Ctrl+C)
    #[arg(long)]
    ticks: Option<u64>,

    /// Tick interval in milliseconds
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Seed for scenario layout and telemetry noise
    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, value_enum)]
    storage: Option<StorageBackend>,

    #[arg(long, value_enum)]
    bus: Option<BusBackend>,

    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let mut config = EngineConfig::from_env();
    if let Some(ms) = args.tick_ms {
        config.tick_interval = Duration::from_millis(ms);
    }
    if let Some(seed) = args.seed {
        config.sim_seed = Some(seed);
    }
    config.storage = args.storage.unwrap_or(config.storage);
    config.bus = args.bus.unwrap_or(config.bus);
    config.log_format = args.log_format.unwrap_or(config.log_format);

    init_tracing(&config);

    info!(
        version = delivery_engine::VERSION,
        storage = ?config.storage,
        bus = ?config.bus,
        tick_ms = config.tick_interval.as_millis(),
        "Starting drone delivery simulation"
    );

    let store = build_store(&config).await?;
    let (bus, local_bus) = build_bus(&config).await?;
    let service = Arc::new(DeliveryService::new(
        store,
        bus,
        Arc::new(SystemClock),
        &config,
    ));

    let mut rng = config
        .sim_seed
        .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
    let first_delivery = seed_scenario(&service, &mut rng, args.drones, args.deliveries).await?;

    if let (Some(bus), Some(delivery_id)) = (local_bus, first_delivery) {
        let mut updates = bus.subscribe(Topic::Delivery(delivery_id));
        tokio::spawn(async move {
            while let Some(message) = updates.recv().await {
                info!(delivery_id = %delivery_id, ?message, "Watched delivery update");
            }
        });
    }

    let summary = service.dispatch_pending().await?;
    info!(
        assigned = summary.assigned,
        waiting = summary.waiting,
        rejected = summary.rejected,
        "Initial dispatch"
    );

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(());
    });

    let mut scheduler = Scheduler::new(Arc::clone(&service), config.tick_interval).retry_pending(true);
    if let Some(ticks) = args.ticks {
        scheduler = scheduler.with_max_ticks(ticks);
    }
    let ticks = scheduler.run(shutdown_rx).await;

    let today = chrono::Utc::now().date_naive();
    match service.metrics_for(today).await? {
        Some(metrics) => {
            let rollup = serde_json::to_string(&metrics)?;
            info!(
                ticks,
                success_rate = metrics.success_rate(),
                metrics = %rollup,
                "Final daily metrics"
            );
        }
        None => info!(ticks, "No deliveries completed"),
    }

    Ok(())
}

fn init_tracing(config: &EngineConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.log_level.clone().into());
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).init(),
    }
}

async fn build_store(config: &EngineConfig) -> Result<Arc<dyn UnitOfWork>> {
    match config.storage {
        StorageBackend::Memory => Ok(Arc::new(InMemoryStore::new())),
        StorageBackend::Scylla => {
            info!(
                hosts = ?config.scylla.hosts,
                keyspace = %config.scylla.keyspace,
                "Connecting to ScyllaDB"
            );
            let client = ScyllaClient::new(ScyllaConfig {
                hosts: config.scylla.hosts.clone(),
                keyspace: config.scylla.keyspace.clone(),
                username: config.scylla.username.clone(),
                password: config.scylla.password.clone(),
            })
            .await?;
            Ok(Arc::new(ScyllaStore::new(Arc::new(client))))
        }
    }
}

/// The shared bus, plus the concrete broadcast bus when running in-process
async fn build_bus(config: &EngineConfig) -> Result<(SharedBus, Option<BroadcastBus>)> {
    match config.bus {
        BusBackend::Broadcast => {
            let bus = BroadcastBus::new();
            Ok((Arc::new(bus.clone()), Some(bus)))
        }
        BusBackend::Redis => {
            let bus = RedisBus::new(RedisBusConfig {
                url: config.redis_url.clone(),
            })
            .await?;
            Ok((Arc::new(bus), None))
        }
    }
}

fn scatter(rng: &mut StdRng, spread_deg: f64) -> GeoPoint {
    GeoPoint::new(
        CENTER.longitude + rng.gen_range(-spread_deg..spread_deg),
        CENTER.latitude + rng.gen_range(-spread_deg..spread_deg),
    )
}

/// Depots, drones, stops and pending deliveries. Returns the first delivery id.
async fn seed_scenario(
    service: &DeliveryService,
    rng: &mut StdRng,
    drones: usize,
    deliveries: usize,
) -> Result<Option<uuid::Uuid>> {
    service
        .create_location("North Depot", GeoPoint::new(CENTER.longitude, CENTER.latitude + 0.02), true, None)
        .await?;
    service
        .create_location("South Depot", GeoPoint::new(CENTER.longitude, CENTER.latitude - 0.02), true, None)
        .await?;

    for i in 0..drones {
        let battery = rng.gen_range(40.0..=100.0);
        service
            .register_drone(&format!("DR-{:02}", i + 1), 2_500.0, scatter(rng, 0.02), battery)
            .await?;
    }

    let mut stops: Vec<Location> = Vec::with_capacity(deliveries * 2);
    for i in 0..deliveries * 2 {
        let point = scatter(rng, 0.03);
        stops.push(service.create_location(&format!("Stop {}", i + 1), point, false, None).await?);
    }

    let mut first = None;
    for pair in stops.chunks(2).take(deliveries) {
        let [pickup, dropoff] = pair else { continue };
        let weight = rng.gen_range(200.0..3_000.0);
        let priority = rng.gen_range(0..=3);
        let delivery = service
            .create_delivery(pickup.location_id, dropoff.location_id, weight, priority)
            .await?;
        first.get_or_insert(delivery.delivery_id);
    }

    info!(drones, deliveries, "Scenario seeded");
    Ok(first)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        () = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
