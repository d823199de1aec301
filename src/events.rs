//! Events Layer
//!
//! Daemon events (heartbeats, gauges, threshold violations) flow from any task
//! through a non-blocking [`EventWriter`] into a single forwarder task that batches
//! them and ships them to the hub with `send_events`.
//!
//! # Architecture
//!
//! - [`Event`]: structured event record
//! - [`EventWriter`]: clone-able, `try_send` based facade with a dropped counter
//! - `EventForwarder`: actor owning the batch buffer
//! - [`DaemonStats`]: gauge and collector-threshold evaluation

mod forwarder;
mod stats;
mod types;
mod writer;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;

pub(crate) use forwarder::EventForwarder;
pub use stats::DaemonStats;
pub use types::{Event, EventKind, EventSeverity};
pub use writer::EventWriter;

use crate::hub::ModelerService;

/// Errors raised by the events pipeline.
#[derive(Debug, Error)]
pub enum EventError {
    /// The forwarder channel is full or closed.
    #[error("event channel full or closed")]
    ChannelSend,
}

/// Spawn the forwarder and return its task handle with a writer attached to it.
pub fn spawn_pipeline(
    service: Arc<dyn ModelerService>,
    channel_capacity: usize,
    batch_size: usize,
    flush_interval: Duration,
) -> (JoinHandle<()>, EventWriter) {
    let (handle, tx) =
        EventForwarder::spawn(service, channel_capacity, batch_size, flush_interval);
    (handle, EventWriter::new(tx))
}
