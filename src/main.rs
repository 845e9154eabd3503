use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use ulid::Ulid;

use parkalloc::allocator::Allocator;
use parkalloc::compactor::run_compactor;
use parkalloc::config::Config;
use parkalloc::model::{Category, CategoryCounts, SpotStatus};
use parkalloc::simulation::{FleetMix, JobState, SimulationManager, generate_fleet, register_fleet};
use parkalloc::store::{Store, StoreError};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    parkalloc::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;
    let wal_path = config.data_dir.join("parkalloc.wal");
    let store = Arc::new(Store::open(wal_path.clone())?);
    info!("parkalloc starting");
    info!("  wal: {}", wal_path.display());
    info!("  mode: {:?}", config.allocator.mode);
    info!("  pacing: {}ms", config.simulation.pacing.as_millis());
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    tokio::spawn(run_compactor(
        store.clone(),
        config.compact_threshold,
        Duration::from_secs(5),
    ));

    let (left, right) = demo_site(&store).await?;
    let seed = config.seed.unwrap_or_else(rand::random);
    let fleet = generate_fleet(&FleetMix::with_total(config.fleet_size), left, right, seed);
    register_fleet(&store, &fleet).await?;
    info!(seed, vehicles = fleet.len(), "fleet ready");

    let allocator = Arc::new(Allocator::new(store.clone(), config.allocator));
    let simulation = SimulationManager::new(allocator, config.simulation.clone());
    simulation.start(fleet).await?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut progress = tokio::time::interval(Duration::from_secs(2));

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                warn!("interrupted, resetting simulation");
                simulation.reset().await;
                break;
            }
            _ = progress.tick() => {
                let status = simulation.status().await;
                info!(
                    processed = status.processed,
                    total = status.total,
                    queued = status.queued,
                    "progress {:.0}%",
                    status.progress
                );
                if status.state == JobState::Finished {
                    break;
                }
            }
        }
    }

    let status = simulation.status().await;
    println!("{}", serde_json::to_string_pretty(&status)?);

    let stats = store.occupancy_stats().await;
    info!(
        occupied = stats.occupied,
        free = stats.free,
        "occupancy {:.1}%",
        stats.occupancy_rate
    );
    info!("parkalloc stopped");
    Ok(())
}

/// The two lots the simulation runs against. A store that already holds
/// lots gets its first two reused with occupancy cleared; an empty one gets
/// a fresh layout.
async fn demo_site(store: &Store) -> Result<(Ulid, Ulid), StoreError> {
    let lots = store.list_lots().await;
    if let [left, right, ..] = lots.as_slice() {
        store.reset_occupancy(left.id).await?;
        store.reset_occupancy(right.id).await?;
        info!("reusing lots {} and {}", left.id, right.id);
        return Ok((left.id, right.id));
    }

    let left = provision_lot(store, "Left", 'A', CategoryCounts::new(70, 10, 10, 10)).await?;
    let right = provision_lot(store, "Right", 'B', CategoryCounts::new(60, 10, 15, 15)).await?;
    info!("provisioned demo lots {left} and {right}");
    Ok((left, right))
}

/// One lot whose spot rows match its capacity, numbered `A001`, `A002`, ...
async fn provision_lot(
    store: &Store,
    name: &str,
    prefix: char,
    capacity: CategoryCounts,
) -> Result<Ulid, StoreError> {
    let lot_id = Ulid::new();
    store.create_lot(lot_id, Some(name.into()), capacity).await?;
    let mut n = 0;
    for category in Category::ALL {
        for _ in 0..capacity.get(category) {
            n += 1;
            store
                .add_spot(
                    Ulid::new(),
                    lot_id,
                    Some(format!("{prefix}{n:03}")),
                    category,
                    SpotStatus::Free,
                )
                .await?;
        }
    }
    Ok(lot_id)
}
