//! Paced replay of an arrival batch through the allocator.
//!
//! A pacer task releases one vehicle per tick onto a FIFO queue; a single
//! drainer task runs the queued allocations one after another. Ticks only
//! enqueue, so a slow store never causes two simulation allocations to
//! overlap. Live traffic may still call the allocator concurrently.

pub mod fleet;

pub use fleet::{FleetMix, SimVehicle, format_clock, generate_fleet, register_fleet};

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use ulid::Ulid;

use crate::allocator::{AllocationRequest, AllocationResult, Allocator};
use crate::limits::{MAX_SIMULATION_LOG, MAX_SIMULATION_VEHICLES};
use crate::model::{Category, CategoryCounts, Ms, NoSpotReason, Side, now_ms};

// ── Configuration ────────────────────────────────────────

/// What `start` does while a job is already running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StartPolicy {
    #[default]
    Reject,
    /// Cancel the running job and start the new one.
    Restart,
}

/// Arrival minutes that count as congestion, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RushWindow {
    pub start: u16,
    pub end: u16,
}

impl RushWindow {
    pub fn contains(&self, minutes: u16) -> bool {
        (self.start..=self.end).contains(&minutes)
    }
}

impl Default for RushWindow {
    /// 08:00 through 08:17.
    fn default() -> Self {
        Self {
            start: 8 * 60,
            end: 8 * 60 + 17,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub pacing: Duration,
    /// Entries returned by `status`.
    pub log_tail: usize,
    /// Entries retained in memory.
    pub log_capacity: usize,
    pub start_policy: StartPolicy,
    pub rush: RushWindow,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            pacing: Duration::from_millis(350),
            log_tail: 20,
            log_capacity: 500,
            start_policy: StartPolicy::Reject,
            rush: RushWindow::default(),
        }
    }
}

// ── Errors ───────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
pub enum SimulationError {
    AlreadyRunning,
    LimitExceeded(&'static str),
}

impl std::fmt::Display for SimulationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimulationError::AlreadyRunning => write!(f, "simulation already running"),
            SimulationError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
        }
    }
}

impl std::error::Error for SimulationError {}

// ── Status ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Running,
    Finished,
}

/// What happened to one queued vehicle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Allocated {
        side: Side,
        lot_id: Ulid,
        category: Category,
        spot_id: Option<Ulid>,
        ghost: bool,
    },
    NoSpot {
        reason: NoSpotReason,
    },
    /// The store failed or timed out; the batch carried on.
    Failed {
        error: String,
    },
}

impl TaskOutcome {
    fn label(&self) -> &'static str {
        match self {
            TaskOutcome::Allocated { ghost: true, .. } => "ghost",
            TaskOutcome::Allocated { .. } => "allocated",
            TaskOutcome::NoSpot { .. } => "no_spot",
            TaskOutcome::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub seq: usize,
    pub vehicle_id: Ulid,
    pub category: Category,
    /// Arrival as `HH:MM`.
    pub arrival: String,
    pub congestion: bool,
    pub success: bool,
    pub outcome: TaskOutcome,
}

/// Running totals for the current batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub allocated_left: u32,
    pub allocated_right: u32,
    /// Committed spot categories per side.
    pub left: CategoryCounts,
    pub right: CategoryCounts,
    pub no_spot: u32,
    pub ghosts: u32,
    pub failed: u32,
}

impl BatchSummary {
    fn record(&mut self, outcome: &TaskOutcome) {
        match outcome {
            TaskOutcome::Allocated {
                side,
                category,
                ghost,
                ..
            } => {
                let (count, by_category) = match side {
                    Side::Left => (&mut self.allocated_left, &mut self.left),
                    Side::Right => (&mut self.allocated_right, &mut self.right),
                };
                *count += 1;
                *by_category.get_mut(*category) += 1;
                if *ghost {
                    self.ghosts += 1;
                }
            }
            TaskOutcome::NoSpot { .. } => self.no_spot += 1,
            TaskOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationStatus {
    pub run_id: Option<Ulid>,
    pub state: JobState,
    pub total: usize,
    pub processed: usize,
    /// Released by the pacer but not yet picked up by the drainer.
    pub queued: usize,
    /// Processed share of the batch, 0–100.
    pub progress: f64,
    /// Most recent entries, oldest first.
    pub logs: Vec<LogEntry>,
    pub started_at: Option<Ms>,
    pub finished_at: Option<Ms>,
    pub summary: BatchSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StartReceipt {
    pub run_id: Ulid,
    pub total: usize,
}

// ── Job state ────────────────────────────────────────────

struct Job {
    run_id: Option<Ulid>,
    state: JobState,
    total: usize,
    processed: usize,
    queued: usize,
    logs: VecDeque<LogEntry>,
    started_at: Option<Ms>,
    finished_at: Option<Ms>,
    summary: BatchSummary,
    cancel: CancellationToken,
}

impl Job {
    fn idle() -> Self {
        Self {
            run_id: None,
            state: JobState::Idle,
            total: 0,
            processed: 0,
            queued: 0,
            logs: VecDeque::new(),
            started_at: None,
            finished_at: None,
            summary: BatchSummary::default(),
            cancel: CancellationToken::new(),
        }
    }

    fn owns(&self, run_id: Ulid) -> bool {
        self.run_id == Some(run_id)
    }

    fn record(&mut self, entry: LogEntry, capacity: usize) {
        self.summary.record(&entry.outcome);
        self.processed += 1;
        if self.logs.len() >= capacity {
            self.logs.pop_front();
        }
        self.logs.push_back(entry);
    }
}

struct AllocationTask {
    vehicle: SimVehicle,
    congestion: bool,
}

/// Handle to the simulation job. Clones share the same job.
#[derive(Clone)]
pub struct SimulationManager {
    job: Arc<Mutex<Job>>,
    allocator: Arc<Allocator>,
    config: Arc<SimulationConfig>,
    /// One permit: the single simulation allocation allowed in flight,
    /// across runs.
    in_flight: Arc<Semaphore>,
}

impl SimulationManager {
    pub fn new(allocator: Arc<Allocator>, config: SimulationConfig) -> Self {
        Self {
            job: Arc::new(Mutex::new(Job::idle())),
            allocator,
            config: Arc::new(config),
            in_flight: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Begin replaying `vehicles` in order, one per pacing tick.
    pub async fn start(&self, vehicles: Vec<SimVehicle>) -> Result<StartReceipt, SimulationError> {
        if vehicles.len() > MAX_SIMULATION_VEHICLES {
            return Err(SimulationError::LimitExceeded("too many vehicles in batch"));
        }

        let mut job = self.job.lock().await;
        if job.state == JobState::Running {
            match self.config.start_policy {
                StartPolicy::Reject => return Err(SimulationError::AlreadyRunning),
                StartPolicy::Restart => {
                    info!(run_id = ?job.run_id, "restarting running simulation");
                    job.cancel.cancel();
                }
            }
        }

        let run_id = Ulid::new();
        let total = vehicles.len();
        *job = Job::idle();
        job.run_id = Some(run_id);
        job.state = JobState::Running;
        job.total = total;
        job.started_at = Some(now_ms());
        let cancel = job.cancel.clone();
        drop(job);

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(pace(
            vehicles,
            tx,
            cancel.clone(),
            self.job.clone(),
            run_id,
            self.config.clone(),
        ));
        tokio::spawn(drain(rx, cancel, self.clone(), run_id));

        info!(%run_id, total, pacing_ms = self.config.pacing.as_millis() as u64, "simulation started");
        Ok(StartReceipt { run_id, total })
    }

    /// Stop pacing, drop whatever is queued and return to idle. An
    /// allocation already inside the store runs to completion; its log
    /// entry is discarded.
    pub async fn reset(&self) {
        let mut job = self.job.lock().await;
        job.cancel.cancel();
        if let Some(run_id) = job.run_id {
            info!(%run_id, processed = job.processed, "simulation reset");
        }
        *job = Job::idle();
    }

    pub async fn status(&self) -> SimulationStatus {
        let job = self.job.lock().await;
        let progress = if job.total > 0 {
            job.processed as f64 * 100.0 / job.total as f64
        } else if job.state == JobState::Finished {
            100.0
        } else {
            0.0
        };
        let tail = job.logs.len().saturating_sub(self.config.log_tail);
        SimulationStatus {
            run_id: job.run_id,
            state: job.state,
            total: job.total,
            processed: job.processed,
            queued: job.queued,
            progress,
            logs: job.logs.iter().skip(tail).cloned().collect(),
            started_at: job.started_at,
            finished_at: job.finished_at,
            summary: job.summary.clone(),
        }
    }
}

/// Release one vehicle per tick. Dropping `tx` on return tells the drainer
/// no more work is coming.
async fn pace(
    vehicles: Vec<SimVehicle>,
    tx: mpsc::UnboundedSender<AllocationTask>,
    cancel: CancellationToken,
    job: Arc<Mutex<Job>>,
    run_id: Ulid,
    config: Arc<SimulationConfig>,
) {
    let mut interval = tokio::time::interval(config.pacing);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    for vehicle in vehicles {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {}
        }
        let congestion = config.rush.contains(vehicle.arrival_minutes);
        {
            let mut job = job.lock().await;
            if !job.owns(run_id) {
                return;
            }
            job.queued += 1;
        }
        if tx.send(AllocationTask { vehicle, congestion }).is_err() {
            return;
        }
    }
    debug!(%run_id, "pacer exhausted input");
}

/// Run queued tasks strictly one at a time, then mark the job finished
/// once the pacer is done and the queue is empty.
async fn drain(
    mut rx: mpsc::UnboundedReceiver<AllocationTask>,
    cancel: CancellationToken,
    manager: SimulationManager,
    run_id: Ulid,
) {
    let capacity = manager.config.log_capacity.clamp(1, MAX_SIMULATION_LOG);
    loop {
        let task = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            task = rx.recv() => match task {
                Some(task) => task,
                None => break,
            },
        };

        let Ok(_permit) = manager.in_flight.acquire().await else {
            return;
        };
        {
            let mut job = manager.job.lock().await;
            if cancel.is_cancelled() || !job.owns(run_id) {
                return;
            }
            job.queued = job.queued.saturating_sub(1);
        }

        let entry = run_task(&manager.allocator, &task).await;
        metrics::counter!(crate::observability::SIMULATION_TASKS_TOTAL, "status" => entry.outcome.label())
            .increment(1);

        let mut job = manager.job.lock().await;
        if !job.owns(run_id) {
            return;
        }
        job.record(entry, capacity);
    }

    let mut job = manager.job.lock().await;
    if job.owns(run_id) && job.state == JobState::Running {
        job.state = JobState::Finished;
        job.finished_at = Some(now_ms());
        info!(
            %run_id,
            processed = job.processed,
            no_spot = job.summary.no_spot,
            ghosts = job.summary.ghosts,
            failed = job.summary.failed,
            "simulation finished"
        );
    }
}

async fn run_task(allocator: &Allocator, task: &AllocationTask) -> LogEntry {
    let vehicle = &task.vehicle;
    let request = AllocationRequest {
        vehicle_id: vehicle.vehicle_id,
        left_lot: vehicle.left_lot,
        right_lot: vehicle.right_lot,
        preferred: vehicle.preferred,
        congestion: task.congestion,
    };

    let outcome = match allocator.allocate(&request).await {
        Ok(AllocationResult::Allocated(a)) => TaskOutcome::Allocated {
            side: a.side,
            lot_id: a.lot_id,
            category: a.category,
            spot_id: a.spot_id,
            ghost: a.is_ghost(),
        },
        Ok(AllocationResult::NoSpot { reason }) => {
            debug!(vehicle_id = %vehicle.vehicle_id, seq = vehicle.seq, "no spot: {reason}");
            TaskOutcome::NoSpot { reason }
        }
        Err(e) => {
            error!(vehicle_id = %vehicle.vehicle_id, seq = vehicle.seq, "simulated allocation failed: {e}");
            TaskOutcome::Failed {
                error: e.to_string(),
            }
        }
    };

    LogEntry {
        seq: vehicle.seq,
        vehicle_id: vehicle.vehicle_id,
        category: vehicle.category,
        arrival: vehicle.arrival(),
        congestion: task.congestion,
        success: matches!(outcome, TaskOutcome::Allocated { .. }),
        outcome,
    }
}
