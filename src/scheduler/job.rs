//! In-flight collection job bookkeeping.

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::collector::Protocol;

/// Unique job identifier.
pub type JobId = Uuid;

/// Lifecycle state of an active job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum JobState {
    /// Client is collecting.
    Running,
    /// Client reported completion; results are being merged.
    Merging,
}

/// One protocol attempt against one device, owned by the active set.
#[derive(Debug)]
pub struct CollectionJob {
    pub id: JobId,
    pub device_id: String,
    pub protocol: Protocol,
    pub plugins: Vec<String>,
    pub deadline: Instant,
    pub cancel: CancellationToken,
    pub state: JobState,
    pub timed_out: bool,
}

impl CollectionJob {
    pub fn new(
        device_id: impl Into<String>,
        protocol: Protocol,
        plugins: Vec<String>,
        deadline: Instant,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_id: device_id.into(),
            protocol,
            plugins,
            deadline,
            cancel: CancellationToken::new(),
            state: JobState::Running,
            timed_out: false,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline <= now
    }

    /// Mark timed out and signal the client to stop.
    pub fn time_out(&mut self) {
        self.timed_out = true;
        self.cancel.cancel();
    }
}
