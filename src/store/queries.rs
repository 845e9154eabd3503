use ulid::Ulid;

use crate::model::*;

use super::{Store, StoreError};

/// Optional filters for `list_spots`; `None` matches everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpotFilter {
    pub lot_id: Option<Ulid>,
    pub category: Option<Category>,
    pub status: Option<SpotStatus>,
}

impl SpotFilter {
    fn matches(&self, spot: &Spot) -> bool {
        self.category.is_none_or(|c| c == spot.category)
            && self.status.is_none_or(|s| s == spot.status)
    }
}

impl Store {
    pub fn lot_count(&self) -> usize {
        self.lots.len()
    }

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    pub fn get_vehicle_category(&self, id: &Ulid) -> Option<Category> {
        self.vehicles.get(id).map(|e| *e.value())
    }

    /// Capacity and counters of one lot.
    pub async fn get_lot(&self, id: Ulid) -> Result<Lot, StoreError> {
        let shared = self.require_lot(id)?;
        let lot = shared.read().await;
        Ok(lot.info())
    }

    /// Every lot, ordered by id.
    pub async fn list_lots(&self) -> Vec<Lot> {
        let lots: Vec<_> = self.lots.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(lots.len());
        for shared in lots {
            out.push(shared.read().await.info());
        }
        out.sort_by_key(|lot| lot.id);
        out
    }

    pub async fn get_spot(&self, id: Ulid) -> Result<Spot, StoreError> {
        let lot_id = self
            .spot_to_lot
            .get(&id)
            .map(|e| *e.value())
            .ok_or(StoreError::NotFound(id))?;
        let shared = self.require_lot(lot_id)?;
        let lot = shared.read().await;
        lot.spot(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    /// Spots matching `filter`, grouped by lot id then provisioning order.
    pub async fn list_spots(&self, filter: SpotFilter) -> Result<Vec<Spot>, StoreError> {
        let lot_ids: Vec<Ulid> = match filter.lot_id {
            Some(id) => {
                self.require_lot(id)?;
                vec![id]
            }
            None => {
                let mut ids: Vec<Ulid> = self.lots.iter().map(|e| *e.key()).collect();
                ids.sort();
                ids
            }
        };

        let mut spots = Vec::new();
        for id in lot_ids {
            let Some(shared) = self.get_lot_state(&id) else { continue };
            let lot = shared.read().await;
            spots.extend(lot.spots.iter().filter(|s| filter.matches(s)).cloned());
        }
        Ok(spots)
    }

    /// Spot counts by status and category across every lot.
    pub async fn occupancy_stats(&self) -> OccupancyStats {
        let mut stats = OccupancyStats {
            total: 0,
            free: 0,
            occupied: 0,
            reserved: 0,
            by_category: CategoryCounts::default(),
            occupancy_rate: 0.0,
        };
        let lots: Vec<_> = self.lots.iter().map(|e| e.value().clone()).collect();
        for shared in lots {
            let lot = shared.read().await;
            for spot in &lot.spots {
                stats.total += 1;
                *stats.by_category.get_mut(spot.category) += 1;
                match spot.status {
                    SpotStatus::Free => stats.free += 1,
                    SpotStatus::Occupied => stats.occupied += 1,
                    SpotStatus::Reserved => stats.reserved += 1,
                }
            }
        }
        if stats.total > 0 {
            stats.occupancy_rate = f64::from(stats.occupied) * 100.0 / f64::from(stats.total);
        }
        stats
    }
}
