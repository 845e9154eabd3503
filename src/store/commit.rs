use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::model::*;

use super::{Store, StoreError};

/// How a commit treats a lot whose counters and physical spots disagree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitMode {
    /// Always increment the counter; commit a ghost when no FREE spot
    /// matches. Counters may grow past capacity.
    #[default]
    Lenient,
    /// Refuse the commit when the counter is already at capacity or no
    /// FREE spot matches. Nothing is written on refusal.
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Counter incremented and the spot flipped to OCCUPIED.
    Committed { spot_id: Ulid },
    /// Counter incremented with no physical spot behind it.
    Ghost,
    /// Strict mode refused; no state changed.
    Rejected(NoSpotReason),
}

impl Store {
    /// One allocation transaction, run under the lot's write lock.
    ///
    /// `candidate` is the spot the caller saw FREE before committing. If a
    /// concurrent commit took it in the meantime, the FREE lookup is redone
    /// here, inside the lock, so two commits never hand out the same spot.
    pub async fn commit_allocation(
        &self,
        lot_id: Ulid,
        category: Category,
        candidate: Option<Ulid>,
        mode: CommitMode,
    ) -> Result<CommitOutcome, StoreError> {
        let _gate = self.compaction_gate.read().await;
        let shared = self.require_lot(lot_id)?;
        let mut lot = shared.write().await;

        let still_free = candidate.filter(|id| {
            lot.spot(id)
                .is_some_and(|s| s.category == category && s.status == SpotStatus::Free)
        });
        if candidate.is_some() && still_free.is_none() {
            debug!(%lot_id, %category, "candidate spot taken, retrying lookup");
        }
        let spot_id = still_free.or_else(|| lot.find_free(category).map(|s| s.id));

        if mode == CommitMode::Strict {
            if lot.allocated.get(category) >= lot.capacity.get(category) {
                warn!(%lot_id, %category, "strict commit refused: capacity exhausted");
                metrics::counter!(crate::observability::STRICT_REJECTIONS_TOTAL).increment(1);
                return Ok(CommitOutcome::Rejected(NoSpotReason::CapacityExhausted));
            }
            if spot_id.is_none() {
                warn!(%lot_id, %category, "strict commit refused: no free spot row");
                metrics::counter!(crate::observability::STRICT_REJECTIONS_TOTAL).increment(1);
                return Ok(CommitOutcome::Rejected(NoSpotReason::NoPhysicalSpot));
            }
        }

        let event = Event::AllocationCommitted {
            lot_id,
            category,
            spot_id,
        };
        self.persist_and_apply(&mut lot, &event).await?;

        Ok(match spot_id {
            Some(spot_id) => CommitOutcome::Committed { spot_id },
            None => CommitOutcome::Ghost,
        })
    }
}
