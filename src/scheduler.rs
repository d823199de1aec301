//! Scheduler Layer
//!
//! A single actor task owns every piece of mutable scheduling state: the active
//! job set, the device source, the pass record and the deadline clock. Collection
//! jobs, config fetches and merges run as spawned tasks and report back through
//! the actor's bounded mailbox.
//!
//! - [`Scheduler`]: the actor; `run` drives passes until shutdown or, in
//!   single-pass mode, until the pass completes
//! - [`SchedulerHandle`]: pushes configuration changes into a running actor
//! - [`PassReport`]: what one pass did

mod actor;
mod cycle;
mod job;
mod merger;
mod slots;

use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::events::DaemonStats;
use crate::hub::DeviceSelection;

pub use actor::Scheduler;
pub use cycle::{CyclePhase, PassReport};
pub use job::{CollectionJob, JobId, JobState};
pub use merger::{MergeError, MergeSummary, ResultMerger};
pub use slots::SlotScheduler;

pub(crate) use actor::Message;

// =============================================================================
// Constants
// =============================================================================

/// How often job deadlines are checked.
pub const DEADLINE_TICK: Duration = Duration::from_secs(1);

pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);
pub const DEFAULT_BACKLOG_THRESHOLD: usize = 64;
pub const DEFAULT_MAILBOX_CAPACITY: usize = 1024;

// =============================================================================
// Configuration
// =============================================================================

/// Whether the scheduler keeps cycling or stops after one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleMode {
    /// Run one pass and return its report.
    SinglePass,
    /// Start a new pass every interval.
    Continuous(Duration),
}

/// Runtime settings for one scheduler instance.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum device draws in flight.
    pub parallel: usize,
    pub mode: CycleMode,
    pub selection: DeviceSelection,
    /// How long a cancelled client may keep running before it is abandoned.
    pub stop_grace: Duration,
    /// Mailbox depth at which drawing pauses.
    pub backlog_threshold: usize,
    pub mailbox_capacity: usize,
}

impl SchedulerConfig {
    pub fn new(selection: DeviceSelection, mode: CycleMode) -> Self {
        Self {
            parallel: 1,
            mode,
            selection,
            stop_grace: DEFAULT_STOP_GRACE,
            backlog_threshold: DEFAULT_BACKLOG_THRESHOLD,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
        }
    }

    pub fn with_parallel(mut self, parallel: usize) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn with_backlog_threshold(mut self, threshold: usize) -> Self {
        self.backlog_threshold = threshold;
        self
    }

    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }
}

// =============================================================================
// Handle
// =============================================================================

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler is not running")]
    Closed,
}

/// Sends configuration updates to a running [`Scheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<Message>,
}

impl SchedulerHandle {
    pub(crate) fn new(tx: mpsc::Sender<Message>) -> Self {
        Self { tx }
    }

    /// Change the continuous-mode interval from the next reschedule on.
    pub async fn set_cycle_interval(&self, interval: Duration) -> Result<(), SchedulerError> {
        self.tx
            .send(Message::SetCycleInterval(interval))
            .await
            .map_err(|_| SchedulerError::Closed)
    }

    /// Replace the statistics used for gauge events.
    pub async fn update_stats(&self, stats: DaemonStats) -> Result<(), SchedulerError> {
        self.tx
            .send(Message::UpdateStats(stats))
            .await
            .map_err(|_| SchedulerError::Closed)
    }
}
