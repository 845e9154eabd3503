use std::net::SocketAddr;

use metrics_exporter_prometheus::BuildError;

use crate::allocator::AllocationResult;

// ── Allocation path ─────────────────────────────────────────────

/// Counter: allocate calls. Labels: category, outcome.
pub const ALLOCATIONS_TOTAL: &str = "parkalloc_allocations_total";

/// Histogram: allocate latency in seconds, lookups through commit.
pub const ALLOCATION_DURATION_SECONDS: &str = "parkalloc_allocation_duration_seconds";

/// Counter: commits that incremented a counter with no spot behind it.
pub const GHOST_ALLOCATIONS_TOTAL: &str = "parkalloc_ghost_allocations_total";

/// Counter: commits refused in strict mode.
pub const STRICT_REJECTIONS_TOTAL: &str = "parkalloc_strict_rejections_total";

// ── Store ───────────────────────────────────────────────────────

/// Gauge: lots held by the store.
pub const LOTS: &str = "parkalloc_lots";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "parkalloc_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "parkalloc_wal_flush_batch_size";

// ── Simulation ──────────────────────────────────────────────────

/// Counter: simulation tasks drained. Labels: status.
pub const SIMULATION_TASKS_TOTAL: &str = "parkalloc_simulation_tasks_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for an allocation result.
pub fn outcome_label(result: &AllocationResult) -> &'static str {
    match result {
        AllocationResult::Allocated(a) if a.is_ghost() => "ghost",
        AllocationResult::Allocated(_) => "allocated",
        AllocationResult::NoSpot { .. } => "no_spot",
    }
}
