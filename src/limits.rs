/// Lots per store.
pub const MAX_LOTS: usize = 1_024;

/// Physical spots per lot.
pub const MAX_SPOTS_PER_LOT: usize = 10_000;

/// Registered vehicles per store.
pub const MAX_VEHICLES: usize = 1_000_000;

/// Lot names and spot numbers.
pub const MAX_NAME_LEN: usize = 256;

/// Vehicles accepted by a single simulation run.
pub const MAX_SIMULATION_VEHICLES: usize = 100_000;

/// Log entries a simulation run retains before dropping the oldest.
pub const MAX_SIMULATION_LOG: usize = 10_000;
