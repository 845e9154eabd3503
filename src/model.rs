use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds.
pub type Ms = i64;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Vehicle and spot classification. A vehicle's category decides which
/// priority chain the decision engine runs; a spot's category is what a
/// committed allocation consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    General,
    Disabled,
    Electric,
    Motorcycle,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::General,
        Category::Disabled,
        Category::Electric,
        Category::Motorcycle,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::General => "general",
            Category::Disabled => "disabled",
            Category::Electric => "electric",
            Category::Motorcycle => "motorcycle",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the two lots, relative to the worker's commute direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpotStatus {
    Free,
    Occupied,
    Reserved,
}

/// One number per category. Used both for a lot's capacity and for its
/// committed-allocation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCounts {
    pub general: u32,
    pub disabled: u32,
    pub electric: u32,
    pub motorcycle: u32,
}

impl CategoryCounts {
    pub fn new(general: u32, disabled: u32, electric: u32, motorcycle: u32) -> Self {
        Self {
            general,
            disabled,
            electric,
            motorcycle,
        }
    }

    pub fn get(&self, category: Category) -> u32 {
        match category {
            Category::General => self.general,
            Category::Disabled => self.disabled,
            Category::Electric => self.electric,
            Category::Motorcycle => self.motorcycle,
        }
    }

    pub fn get_mut(&mut self, category: Category) -> &mut u32 {
        match category {
            Category::General => &mut self.general,
            Category::Disabled => &mut self.disabled,
            Category::Electric => &mut self.electric,
            Category::Motorcycle => &mut self.motorcycle,
        }
    }

    pub fn total(&self) -> u32 {
        self.general + self.disabled + self.electric + self.motorcycle
    }
}

/// A physical parking spot. Owned by exactly one lot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spot {
    pub id: Ulid,
    pub lot_id: Ulid,
    pub number: Option<String>,
    pub category: Category,
    pub status: SpotStatus,
}

/// Read-only view of a lot: capacity and allocation counters, no spots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lot {
    pub id: Ulid,
    pub name: Option<String>,
    pub capacity: CategoryCounts,
    pub allocated: CategoryCounts,
}

#[derive(Debug, Clone)]
pub struct LotState {
    pub id: Ulid,
    pub name: Option<String>,
    pub capacity: CategoryCounts,
    /// Committed allocations per category. Not bounded by `capacity`
    /// unless the store runs commits in strict mode.
    pub allocated: CategoryCounts,
    /// Physical spots in provisioning order.
    pub spots: Vec<Spot>,
}

impl LotState {
    pub fn new(id: Ulid, name: Option<String>, capacity: CategoryCounts) -> Self {
        Self {
            id,
            name,
            capacity,
            allocated: CategoryCounts::default(),
            spots: Vec::new(),
        }
    }

    pub fn info(&self) -> Lot {
        Lot {
            id: self.id,
            name: self.name.clone(),
            capacity: self.capacity,
            allocated: self.allocated,
        }
    }

    /// First FREE spot of the category, in provisioning order.
    pub fn find_free(&self, category: Category) -> Option<&Spot> {
        self.spots
            .iter()
            .find(|s| s.category == category && s.status == SpotStatus::Free)
    }

    pub fn spot(&self, id: &Ulid) -> Option<&Spot> {
        self.spots.iter().find(|s| s.id == *id)
    }

    pub fn spot_mut(&mut self, id: &Ulid) -> Option<&mut Spot> {
        self.spots.iter_mut().find(|s| s.id == *id)
    }
}

/// Store mutations, one per WAL record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    LotCreated {
        id: Ulid,
        name: Option<String>,
        capacity: CategoryCounts,
    },
    SpotAdded {
        id: Ulid,
        lot_id: Ulid,
        number: Option<String>,
        category: Category,
        status: SpotStatus,
    },
    SpotStatusSet {
        id: Ulid,
        lot_id: Ulid,
        status: SpotStatus,
    },
    VehicleRegistered {
        id: Ulid,
        category: Category,
    },
    VehicleCategoryChanged {
        id: Ulid,
        category: Category,
    },
    /// Counter increment and (when present) the spot flip to OCCUPIED,
    /// as one record.
    AllocationCommitted {
        lot_id: Ulid,
        category: Category,
        spot_id: Option<Ulid>,
    },
    /// Zero all counters and free every spot of the lot.
    OccupancyReset {
        lot_id: Ulid,
    },
    /// Written by compaction only: the lot's counters as they stood.
    CountersRestored {
        lot_id: Ulid,
        allocated: CategoryCounts,
    },
}

impl Event {
    /// Lot this event mutates, if any.
    pub fn lot_id(&self) -> Option<Ulid> {
        match self {
            Event::LotCreated { id, .. } => Some(*id),
            Event::SpotAdded { lot_id, .. }
            | Event::SpotStatusSet { lot_id, .. }
            | Event::AllocationCommitted { lot_id, .. }
            | Event::OccupancyReset { lot_id }
            | Event::CountersRestored { lot_id, .. } => Some(*lot_id),
            Event::VehicleRegistered { .. } | Event::VehicleCategoryChanged { .. } => None,
        }
    }
}

/// Why an allocation ended without a committed spot or counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoSpotReason {
    /// Neither lot has free capacity relevant to the vehicle's category.
    NoCapacity,
    /// Strict mode: the counters allowed it but no FREE spot row matched.
    NoPhysicalSpot,
    /// Strict mode: the category counter already reached capacity.
    CapacityExhausted,
}

impl NoSpotReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoSpotReason::NoCapacity => "no spot available",
            NoSpotReason::NoPhysicalSpot => "no free physical spot of the chosen category",
            NoSpotReason::CapacityExhausted => "category capacity exhausted",
        }
    }
}

impl fmt::Display for NoSpotReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OccupancyStats {
    pub total: u32,
    pub free: u32,
    pub occupied: u32,
    pub reserved: u32,
    /// Spot count per category, across all lots.
    pub by_category: CategoryCounts,
    /// Occupied share of all spots, in percent. Zero when no spots exist.
    pub occupancy_rate: f64,
}
