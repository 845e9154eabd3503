use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::decision;
use crate::model::*;
use crate::snapshot::CapacitySnapshot;
use crate::store::{CommitMode, CommitOutcome, ParkingStore, StoreError};

/// One arrival: who parks, between which two lots, and under which conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRequest {
    pub vehicle_id: Ulid,
    pub left_lot: Ulid,
    pub right_lot: Ulid,
    pub preferred: Side,
    pub congestion: bool,
}

impl AllocationRequest {
    fn lot_at(&self, side: Side) -> Ulid {
        match side {
            Side::Left => self.left_lot,
            Side::Right => self.right_lot,
        }
    }
}

/// A committed allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Allocation {
    pub side: Side,
    pub lot_id: Ulid,
    pub category: Category,
    /// `None` for a ghost: the counter moved but no physical spot did.
    pub spot_id: Option<Ulid>,
}

impl Allocation {
    pub fn is_ghost(&self) -> bool {
        self.spot_id.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AllocationResult {
    Allocated(Allocation),
    /// An expected outcome, not a fault. Nothing was written.
    NoSpot { reason: NoSpotReason },
}

impl AllocationResult {
    pub fn success(&self) -> bool {
        matches!(self, AllocationResult::Allocated(_))
    }

    /// Set on ghost allocations.
    pub fn warning(&self) -> bool {
        matches!(self, AllocationResult::Allocated(a) if a.is_ghost())
    }

    pub fn allocation(&self) -> Option<&Allocation> {
        match self {
            AllocationResult::Allocated(a) => Some(a),
            AllocationResult::NoSpot { .. } => None,
        }
    }
}

#[derive(Debug)]
pub enum AllocError {
    /// Vehicle or lot id unresolved. Nothing was written.
    NotFound(Ulid),
    Store(StoreError),
    /// A store call outlived the configured bound. A commit that was
    /// already running finishes in the background and may still land.
    Timeout,
}

impl std::fmt::Display for AllocError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocError::NotFound(id) => write!(f, "not found: {id}"),
            AllocError::Store(e) => write!(f, "store error: {e}"),
            AllocError::Timeout => write!(f, "store call timed out"),
        }
    }
}

impl std::error::Error for AllocError {}

impl From<StoreError> for AllocError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => AllocError::NotFound(id),
            other => AllocError::Store(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorConfig {
    pub mode: CommitMode,
    /// Upper bound on each store call made by `allocate`.
    pub commit_timeout: Duration,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            mode: CommitMode::Lenient,
            commit_timeout: Duration::from_secs(5),
        }
    }
}

/// Resolves inputs, runs the decision engine and commits the result.
///
/// Holds no lock of its own; two concurrent `allocate` calls are kept
/// apart by the store's commit transaction.
pub struct Allocator {
    store: Arc<dyn ParkingStore>,
    config: AllocatorConfig,
}

impl Allocator {
    pub fn new(store: Arc<dyn ParkingStore>, config: AllocatorConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, AllocError> {
        match tokio::time::timeout(self.config.commit_timeout, call).await {
            Ok(result) => result.map_err(AllocError::from),
            Err(_) => Err(AllocError::Timeout),
        }
    }

    pub async fn allocate(&self, req: &AllocationRequest) -> Result<AllocationResult, AllocError> {
        let started = Instant::now();

        let vehicle = self.bounded(self.store.vehicle_category(req.vehicle_id)).await?;
        let (left, right) = self
            .bounded(self.store.get_lots(req.left_lot, req.right_lot))
            .await?;
        let left = CapacitySnapshot::from_lot(&left);
        let right = CapacitySnapshot::from_lot(&right);

        let result = match decision::decide(vehicle, req.preferred, req.congestion, &left, &right) {
            None => AllocationResult::NoSpot {
                reason: NoSpotReason::NoCapacity,
            },
            Some(choice) => {
                debug!(
                    vehicle_id = %req.vehicle_id,
                    side = %choice.side,
                    category = %choice.category,
                    "decision"
                );
                self.commit(req, choice).await?
            }
        };

        metrics::counter!(
            crate::observability::ALLOCATIONS_TOTAL,
            "category" => vehicle.as_str(),
            "outcome" => crate::observability::outcome_label(&result),
        )
        .increment(1);
        metrics::histogram!(crate::observability::ALLOCATION_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        Ok(result)
    }

    async fn commit(
        &self,
        req: &AllocationRequest,
        choice: decision::Decision,
    ) -> Result<AllocationResult, AllocError> {
        let lot_id = req.lot_at(choice.side);
        let candidate = self
            .bounded(self.store.find_free_spot(lot_id, choice.category))
            .await?
            .map(|spot| spot.id);

        // The commit runs on its own task so that hitting the timeout only
        // abandons the wait, never a half-finished transaction.
        let store = self.store.clone();
        let mode = self.config.mode;
        let task = tokio::spawn(async move {
            store
                .commit_allocation(lot_id, choice.category, candidate, mode)
                .await
        });
        let outcome = match tokio::time::timeout(self.config.commit_timeout, task).await {
            Ok(Ok(outcome)) => outcome?,
            Ok(Err(join)) => return Err(AllocError::Store(StoreError::WalError(join.to_string()))),
            Err(_) => return Err(AllocError::Timeout),
        };

        Ok(match outcome {
            CommitOutcome::Committed { spot_id } => AllocationResult::Allocated(Allocation {
                side: choice.side,
                lot_id,
                category: choice.category,
                spot_id: Some(spot_id),
            }),
            CommitOutcome::Ghost => {
                warn!(
                    vehicle_id = %req.vehicle_id,
                    %lot_id,
                    category = %choice.category,
                    "counter updated but no free physical spot of this category"
                );
                metrics::counter!(crate::observability::GHOST_ALLOCATIONS_TOTAL).increment(1);
                AllocationResult::Allocated(Allocation {
                    side: choice.side,
                    lot_id,
                    category: choice.category,
                    spot_id: None,
                })
            }
            CommitOutcome::Rejected(reason) => AllocationResult::NoSpot { reason },
        })
    }
}
