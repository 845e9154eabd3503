use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::allocator::AllocatorConfig;
use crate::simulation::fleet::DEFAULT_FLEET_SIZE;
use crate::simulation::{SimulationConfig, StartPolicy};
use crate::store::CommitMode;

/// Process configuration, read from `PARKALLOC_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    pub allocator: AllocatorConfig,
    pub simulation: SimulationConfig,
    /// Fleet seed; a fresh one per run when unset.
    pub seed: Option<u64>,
    pub fleet_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            allocator: AllocatorConfig::default(),
            simulation: SimulationConfig::default(),
            seed: None,
            fleet_size: DEFAULT_FLEET_SIZE,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset or unparsable values keep their
    /// defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| -> Option<u64> { parse(&lookup, key) };
        let flag = |key: &str| lookup(key).is_some_and(|v| is_truthy(&v));
        let mut config = Config::default();

        if let Some(dir) = lookup("PARKALLOC_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        config.metrics_port = parse(&lookup, "PARKALLOC_METRICS_PORT");
        if let Some(n) = parsed("PARKALLOC_COMPACT_THRESHOLD") {
            config.compact_threshold = n;
        }
        if flag("PARKALLOC_STRICT") {
            config.allocator.mode = CommitMode::Strict;
        }
        if let Some(ms) = parsed("PARKALLOC_COMMIT_TIMEOUT_MS") {
            config.allocator.commit_timeout = Duration::from_millis(ms.max(1));
        }
        if let Some(ms) = parsed("PARKALLOC_PACING_MS") {
            config.simulation.pacing = Duration::from_millis(ms.max(1));
        }
        if let Some(n) = parse(&lookup, "PARKALLOC_LOG_TAIL") {
            config.simulation.log_tail = n;
        }
        if flag("PARKALLOC_RESTART_ON_START") {
            config.simulation.start_policy = StartPolicy::Restart;
        }
        config.seed = parsed("PARKALLOC_SEED");
        if let Some(n) = parse(&lookup, "PARKALLOC_FLEET_SIZE") {
            config.fleet_size = n;
        }
        config
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("ignoring unparsable {key}={raw}");
            None
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
