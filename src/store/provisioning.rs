use std::sync::Arc;

use tokio::sync::RwLock;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Store, StoreError};

fn check_name(name: Option<&str>, what: &'static str) -> Result<(), StoreError> {
    match name {
        Some(n) if n.len() > MAX_NAME_LEN => Err(StoreError::LimitExceeded(what)),
        _ => Ok(()),
    }
}

impl Store {
    pub async fn create_lot(
        &self,
        id: Ulid,
        name: Option<String>,
        capacity: CategoryCounts,
    ) -> Result<(), StoreError> {
        check_name(name.as_deref(), "lot name too long")?;
        let _gate = self.compaction_gate.read().await;
        if self.lots.len() >= MAX_LOTS {
            return Err(StoreError::LimitExceeded("too many lots"));
        }
        let _claim = self.reserve_id(id, || self.lots.contains_key(&id))?;

        let event = Event::LotCreated {
            id,
            name: name.clone(),
            capacity,
        };
        self.wal_append(&event).await?;
        self.lots
            .insert(id, Arc::new(RwLock::new(LotState::new(id, name, capacity))));
        metrics::gauge!(crate::observability::LOTS).set(self.lots.len() as f64);
        Ok(())
    }

    /// Provision a physical spot. Capacity counters are not touched: a lot's
    /// capacity is declared at creation and may differ from its spot rows.
    pub async fn add_spot(
        &self,
        id: Ulid,
        lot_id: Ulid,
        number: Option<String>,
        category: Category,
        status: SpotStatus,
    ) -> Result<(), StoreError> {
        check_name(number.as_deref(), "spot number too long")?;
        let _gate = self.compaction_gate.read().await;
        let _claim = self.reserve_id(id, || self.spot_to_lot.contains_key(&id))?;
        let shared = self.require_lot(lot_id)?;
        let mut lot = shared.write().await;
        if lot.spots.len() >= MAX_SPOTS_PER_LOT {
            return Err(StoreError::LimitExceeded("too many spots in lot"));
        }

        let event = Event::SpotAdded {
            id,
            lot_id,
            number,
            category,
            status,
        };
        self.persist_and_apply(&mut lot, &event).await
    }

    /// Write path for the device-event collaborator (arrival/departure
    /// sensors). Returns the owning lot.
    pub async fn set_spot_status(&self, id: Ulid, status: SpotStatus) -> Result<Ulid, StoreError> {
        let _gate = self.compaction_gate.read().await;
        let lot_id = self
            .spot_to_lot
            .get(&id)
            .map(|e| *e.value())
            .ok_or(StoreError::NotFound(id))?;
        let shared = self.require_lot(lot_id)?;
        let mut lot = shared.write().await;
        if lot.spot(&id).is_none() {
            return Err(StoreError::NotFound(id));
        }

        let event = Event::SpotStatusSet { id, lot_id, status };
        self.persist_and_apply(&mut lot, &event).await?;
        Ok(lot_id)
    }

    /// Zero every counter of the lot and mark all its spots FREE.
    pub async fn reset_occupancy(&self, lot_id: Ulid) -> Result<(), StoreError> {
        let _gate = self.compaction_gate.read().await;
        let shared = self.require_lot(lot_id)?;
        let mut lot = shared.write().await;
        self.persist_and_apply(&mut lot, &Event::OccupancyReset { lot_id })
            .await
    }

    pub async fn register_vehicle(&self, id: Ulid, category: Category) -> Result<(), StoreError> {
        let _gate = self.compaction_gate.read().await;
        if self.vehicles.len() >= MAX_VEHICLES {
            return Err(StoreError::LimitExceeded("too many vehicles"));
        }
        let _claim = self.reserve_id(id, || self.vehicles.contains_key(&id))?;
        self.persist_vehicle(id, category, &Event::VehicleRegistered { id, category })
            .await
    }

    pub async fn set_vehicle_category(&self, id: Ulid, category: Category) -> Result<(), StoreError> {
        let _gate = self.compaction_gate.read().await;
        if !self.vehicles.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        self.persist_vehicle(id, category, &Event::VehicleCategoryChanged { id, category })
            .await
    }
}
