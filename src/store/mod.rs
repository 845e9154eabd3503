mod commit;
mod error;
mod provisioning;
mod queries;
#[cfg(test)]
mod tests;

pub use commit::{CommitMode, CommitOutcome};
pub use error::StoreError;
pub use queries::SpotFilter;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedLotState = Arc<RwLock<LotState>>;

/// What the allocator needs from persistence. `Store` is the in-crate
/// implementation; anything else (a SQL-backed store, a test double) plugs
/// in here.
#[async_trait]
pub trait ParkingStore: Send + Sync {
    async fn vehicle_category(&self, vehicle_id: Ulid) -> Result<Category, StoreError>;

    /// Both lots or `NotFound` naming the first unresolved id.
    async fn get_lots(&self, left: Ulid, right: Ulid) -> Result<(Lot, Lot), StoreError>;

    async fn find_free_spot(
        &self,
        lot_id: Ulid,
        category: Category,
    ) -> Result<Option<Spot>, StoreError>;

    /// Increment the lot's counter for `category` and, when a FREE spot of
    /// that category exists, flip it to OCCUPIED. All or nothing.
    async fn commit_allocation(
        &self,
        lot_id: Ulid,
        category: Category,
        candidate: Option<Ulid>,
        mode: CommitMode,
    ) -> Result<CommitOutcome, StoreError>;
}

// ── Group-commit WAL channel ─────────────────────────────

type Reply<T> = oneshot::Sender<io::Result<T>>;

pub(super) enum WalCommand {
    Append { event: Event, response: Reply<()> },
    Rewrite { events: Vec<Event>, response: Reply<()> },
    AppendsSinceCompact { response: oneshot::Sender<u64> },
}

/// Owns the WAL. Appends that are already queued when the first one
/// arrives ride along in the same batch and share a single fsync; any
/// other command closes the batch and runs after it.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    let mut batch: Vec<(Event, Reply<()>)> = Vec::new();
    while let Some(cmd) = rx.recv().await {
        let mut control = match cmd {
            WalCommand::Append { event, response } => {
                batch.push((event, response));
                None
            }
            other => Some(other),
        };
        while control.is_none() {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => control = Some(other),
                Err(_) => break,
            }
        }
        if !batch.is_empty() {
            commit_batch(&mut wal, &mut batch);
        }
        if let Some(cmd) = control {
            run_control(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, Reply<()>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes do not leak
    // into the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, response) in batch.drain(..) {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = response.send(reply);
    }
}

fn run_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Rewrite { events, response } => {
            let _ = response.send(wal.rewrite(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched"),
    }
}

/// In-memory parking state backed by a write-ahead log.
///
/// Each lot sits behind its own `RwLock`; a lot's write lock is the
/// transaction boundary for everything that touches its counters or spots.
pub struct Store {
    pub(super) lots: DashMap<Ulid, SharedLotState>,
    pub(super) vehicles: DashMap<Ulid, Category>,
    /// Reverse lookup: spot id → owning lot id.
    pub(super) spot_to_lot: DashMap<Ulid, Ulid>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Mutations hold it shared; compaction holds it exclusively so no
    /// append can land between the snapshot and the rewrite.
    pub(super) compaction_gate: RwLock<()>,
    /// Ids being provisioned: claimed before the WAL append, released once
    /// the id is visible in its own map.
    pub(super) pending_ids: DashMap<Ulid, ()>,
}

/// Claim on an id between the duplicate check and the insert that
/// publishes it. Released on drop.
pub(super) struct IdReservation<'a> {
    pending: &'a DashMap<Ulid, ()>,
    id: Ulid,
}

impl Drop for IdReservation<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

/// Apply a lot-scoped event. Caller holds the lot's write lock.
fn apply_to_lot(lot: &mut LotState, event: &Event, spot_index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::SpotAdded {
            id,
            lot_id,
            number,
            category,
            status,
        } => {
            lot.spots.push(Spot {
                id: *id,
                lot_id: *lot_id,
                number: number.clone(),
                category: *category,
                status: *status,
            });
            spot_index.insert(*id, *lot_id);
        }
        Event::SpotStatusSet { id, status, .. } => {
            if let Some(spot) = lot.spot_mut(id) {
                spot.status = *status;
            }
        }
        Event::AllocationCommitted {
            category, spot_id, ..
        } => {
            let counter = lot.allocated.get_mut(*category);
            *counter = counter.saturating_add(1);
            if let Some(spot) = spot_id.and_then(|id| lot.spot_mut(&id)) {
                spot.status = SpotStatus::Occupied;
            }
        }
        Event::OccupancyReset { .. } => {
            lot.allocated = CategoryCounts::default();
            for spot in &mut lot.spots {
                spot.status = SpotStatus::Free;
            }
        }
        Event::CountersRestored { allocated, .. } => {
            lot.allocated = *allocated;
        }
        // Handled at the map level.
        Event::LotCreated { .. }
        | Event::VehicleRegistered { .. }
        | Event::VehicleCategoryChanged { .. } => {}
    }
}

impl Store {
    /// Replay the WAL at `wal_path` and start the background writer.
    /// Must be called from within a tokio runtime.
    pub fn open(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Self {
            lots: DashMap::new(),
            vehicles: DashMap::new(),
            spot_to_lot: DashMap::new(),
            wal_tx,
            compaction_gate: RwLock::new(()),
            pending_ids: DashMap::new(),
        };

        // Nobody else holds these Arcs yet, so try_write never contends.
        for event in &events {
            match event {
                Event::LotCreated { id, name, capacity } => {
                    let lot = LotState::new(*id, name.clone(), *capacity);
                    store.lots.insert(*id, Arc::new(RwLock::new(lot)));
                }
                Event::VehicleRegistered { id, category }
                | Event::VehicleCategoryChanged { id, category } => {
                    store.vehicles.insert(*id, *category);
                }
                other => {
                    let Some(lot_id) = other.lot_id() else { continue };
                    let Some(shared) = store.get_lot_state(&lot_id) else { continue };
                    if let Ok(mut guard) = shared.try_write() {
                        apply_to_lot(&mut guard, other, &store.spot_to_lot);
                    }
                }
            }
        }

        metrics::gauge!(crate::observability::LOTS).set(store.lots.len() as f64);
        Ok(store)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))
    }

    /// Claim `id` unless another call holds it or `taken` reports it
    /// already published.
    pub(super) fn reserve_id(
        &self,
        id: Ulid,
        taken: impl FnOnce() -> bool,
    ) -> Result<IdReservation<'_>, StoreError> {
        match self.pending_ids.entry(id) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                if taken() {
                    return Err(StoreError::AlreadyExists(id));
                }
                slot.insert(());
                Ok(IdReservation {
                    pending: &self.pending_ids,
                    id,
                })
            }
        }
    }

    pub(super) fn get_lot_state(&self, id: &Ulid) -> Option<SharedLotState> {
        self.lots.get(id).map(|e| e.value().clone())
    }

    pub(super) fn require_lot(&self, id: Ulid) -> Result<SharedLotState, StoreError> {
        self.get_lot_state(&id).ok_or(StoreError::NotFound(id))
    }

    /// WAL-append then apply. The caller holds the compaction gate and the
    /// lot's write lock, so the in-memory change lands only once durable.
    pub(super) async fn persist_and_apply(
        &self,
        lot: &mut LotState,
        event: &Event,
    ) -> Result<(), StoreError> {
        self.wal_append(event).await?;
        apply_to_lot(lot, event, &self.spot_to_lot);
        Ok(())
    }

    /// Append a vehicle-scoped event and update the vehicle map.
    pub(super) async fn persist_vehicle(&self, id: Ulid, category: Category, event: &Event) -> Result<(), StoreError> {
        self.wal_append(event).await?;
        self.vehicles.insert(id, category);
        Ok(())
    }

    /// Rewrite the WAL as the minimal event list that rebuilds current state.
    pub async fn compact_wal(&self) -> Result<(), StoreError> {
        let _gate = self.compaction_gate.write().await;

        let mut events = Vec::new();
        let mut lot_ids: Vec<Ulid> = self.lots.iter().map(|e| *e.key()).collect();
        lot_ids.sort();
        for id in lot_ids {
            let Some(shared) = self.get_lot_state(&id) else { continue };
            let lot = shared.read().await;
            events.push(Event::LotCreated {
                id: lot.id,
                name: lot.name.clone(),
                capacity: lot.capacity,
            });
            for spot in &lot.spots {
                events.push(Event::SpotAdded {
                    id: spot.id,
                    lot_id: lot.id,
                    number: spot.number.clone(),
                    category: spot.category,
                    status: spot.status,
                });
            }
            if lot.allocated != CategoryCounts::default() {
                events.push(Event::CountersRestored {
                    lot_id: lot.id,
                    allocated: lot.allocated,
                });
            }
        }
        for entry in self.vehicles.iter() {
            events.push(Event::VehicleRegistered {
                id: *entry.key(),
                category: *entry.value(),
            });
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Rewrite { events, response: tx })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl ParkingStore for Store {
    async fn vehicle_category(&self, vehicle_id: Ulid) -> Result<Category, StoreError> {
        self.get_vehicle_category(&vehicle_id)
            .ok_or(StoreError::NotFound(vehicle_id))
    }

    async fn get_lots(&self, left: Ulid, right: Ulid) -> Result<(Lot, Lot), StoreError> {
        let left = self.get_lot(left).await?;
        let right = self.get_lot(right).await?;
        Ok((left, right))
    }

    async fn find_free_spot(
        &self,
        lot_id: Ulid,
        category: Category,
    ) -> Result<Option<Spot>, StoreError> {
        let shared = self.require_lot(lot_id)?;
        let lot = shared.read().await;
        Ok(lot.find_free(category).cloned())
    }

    async fn commit_allocation(
        &self,
        lot_id: Ulid,
        category: Category,
        candidate: Option<Ulid>,
        mode: CommitMode,
    ) -> Result<CommitOutcome, StoreError> {
        Store::commit_allocation(self, lot_id, category, candidate, mode).await
    }
}
