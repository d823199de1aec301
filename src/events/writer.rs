//! Non-blocking event writer facade.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use super::forwarder::Command;
use super::{Event, EventError};

/// Non-blocking event writer.
///
/// Uses `try_send`: events are dropped (and counted) when the channel is full.
#[derive(Clone)]
pub struct EventWriter {
    tx: mpsc::Sender<Command>,
    dropped_events: Arc<AtomicU64>,
}

impl std::fmt::Debug for EventWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventWriter")
            .field("dropped_events", &self.dropped_events())
            .finish_non_exhaustive()
    }
}

impl EventWriter {
    pub(crate) fn new(tx: mpsc::Sender<Command>) -> Self {
        Self {
            tx,
            dropped_events: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Total count of events dropped because the channel was full or closed.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Queue an event for delivery.
    pub fn send(&self, event: Event) -> Result<(), EventError> {
        if self.tx.try_send(Command::Event(event)).is_err() {
            tracing::warn!("Event channel full, dropping event");
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
            return Err(EventError::ChannelSend);
        }
        Ok(())
    }

    /// Queue several events, counting each one that cannot be queued.
    pub fn send_all(&self, events: impl IntoIterator<Item = Event>) {
        for event in events {
            let _ = self.send(event);
        }
    }

    /// Ask the forwarder to ship buffered events immediately.
    pub fn flush(&self) -> Result<(), EventError> {
        self.tx
            .try_send(Command::Flush)
            .map_err(|_| EventError::ChannelSend)
    }

    /// Flush and stop the forwarder. Waits for channel capacity.
    pub async fn shutdown(&self) -> Result<(), EventError> {
        self.tx
            .send(Command::Shutdown)
            .await
            .map_err(|_| EventError::ChannelSend)
    }
}
