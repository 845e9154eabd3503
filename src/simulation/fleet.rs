//! Synthetic morning arrivals for the two-lot site.
//!
//! Seeded with `ChaCha8Rng`, so the same seed yields the same fleet on any
//! platform.

use rand::seq::SliceRandom;
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use ulid::Ulid;

use crate::model::{Category, Side};
use crate::store::{Store, StoreError};

/// Default fleet size.
pub const DEFAULT_FLEET_SIZE: usize = 175;

/// One arriving vehicle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimVehicle {
    /// Position in arrival order.
    pub seq: usize,
    pub vehicle_id: Ulid,
    pub category: Category,
    pub preferred: Side,
    /// Minutes since midnight.
    pub arrival_minutes: u16,
    pub left_lot: Ulid,
    pub right_lot: Ulid,
}

impl SimVehicle {
    pub fn arrival(&self) -> String {
        format_clock(self.arrival_minutes)
    }
}

/// Composition of a generated fleet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetMix {
    pub total: usize,
    pub motorcycle: usize,
    pub electric: usize,
    pub disabled: usize,
    pub prefer_left: usize,
    pub prefer_right: usize,
    /// Arrival window in minutes since midnight, inclusive.
    pub arrival_from: u16,
    pub arrival_to: u16,
}

impl FleetMix {
    /// The default proportions scaled to `total` vehicles: roughly 10%
    /// motorcycles, 6% electric, 7% disabled; 60% prefer LEFT, 25% RIGHT,
    /// and the rest pick a side at random. Arrivals spread over 07:30–09:00.
    pub fn with_total(total: usize) -> Self {
        let share = |n: usize| (total * n + DEFAULT_FLEET_SIZE / 2) / DEFAULT_FLEET_SIZE;
        let percent = |p: usize| (total * p + 50) / 100;
        Self {
            total,
            motorcycle: share(18),
            electric: share(10),
            disabled: share(12),
            prefer_left: percent(60),
            prefer_right: percent(25),
            arrival_from: 7 * 60 + 30,
            arrival_to: 9 * 60,
        }
    }

    fn categories(&self) -> Vec<Category> {
        let mut out = Vec::with_capacity(self.total);
        for (category, n) in [
            (Category::Motorcycle, self.motorcycle),
            (Category::Electric, self.electric),
            (Category::Disabled, self.disabled),
        ] {
            out.extend(std::iter::repeat_n(category, n));
        }
        out.truncate(self.total);
        out.resize(self.total, Category::General);
        out
    }
}

impl Default for FleetMix {
    fn default() -> Self {
        Self::with_total(DEFAULT_FLEET_SIZE)
    }
}

/// Build a fleet bound for `left`/`right`, sorted by arrival time.
pub fn generate_fleet(mix: &FleetMix, left: Ulid, right: Ulid, seed: u64) -> Vec<SimVehicle> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let mut categories = mix.categories();
    categories.shuffle(&mut rng);

    let mut sides: Vec<Side> = Vec::with_capacity(mix.total);
    sides.extend(std::iter::repeat_n(Side::Left, mix.prefer_left));
    sides.extend(std::iter::repeat_n(Side::Right, mix.prefer_right));
    sides.truncate(mix.total);
    while sides.len() < mix.total {
        sides.push(if rng.gen_bool(0.5) { Side::Left } else { Side::Right });
    }
    sides.shuffle(&mut rng);

    let (from, to) = if mix.arrival_from <= mix.arrival_to {
        (mix.arrival_from, mix.arrival_to)
    } else {
        (mix.arrival_to, mix.arrival_from)
    };

    let mut fleet: Vec<SimVehicle> = categories
        .into_iter()
        .zip(sides)
        .enumerate()
        .map(|(i, (category, preferred))| {
            let random = (u128::from(rng.next_u64()) << 64) | u128::from(rng.next_u64());
            SimVehicle {
                seq: 0,
                // Stable per seed: the timestamp part is the draw index.
                vehicle_id: Ulid::from_parts(i as u64, random),
                category,
                preferred,
                arrival_minutes: rng.gen_range(from..=to),
                left_lot: left,
                right_lot: right,
            }
        })
        .collect();

    fleet.sort_by_key(|v| v.arrival_minutes);
    for (seq, vehicle) in fleet.iter_mut().enumerate() {
        vehicle.seq = seq;
    }
    fleet
}

/// Register every vehicle of the fleet with its category. Vehicles already
/// known (same seed as an earlier run) are updated in place.
pub async fn register_fleet(store: &Store, fleet: &[SimVehicle]) -> Result<(), StoreError> {
    for vehicle in fleet {
        match store.get_vehicle_category(&vehicle.vehicle_id) {
            None => {
                store
                    .register_vehicle(vehicle.vehicle_id, vehicle.category)
                    .await?
            }
            Some(c) if c != vehicle.category => {
                store
                    .set_vehicle_category(vehicle.vehicle_id, vehicle.category)
                    .await?
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// `HH:MM` for minutes since midnight.
pub fn format_clock(minutes: u16) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}
