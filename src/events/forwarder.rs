//! Event forwarder actor with batch buffering.
//!
//! Single-consumer pattern: one tokio task owns the buffer and ships batches to the
//! hub with `send_events`. Flushes when the buffer reaches `batch_size` items or
//! `flush_interval` has elapsed since the first buffered event.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::Event;
use crate::hub::ModelerService;

// =============================================================================
// Commands
// =============================================================================

/// Commands sent to the forwarder actor.
#[derive(Debug)]
pub(crate) enum Command {
    /// Buffer an event.
    Event(Event),
    /// Ship all buffered events now.
    Flush,
    /// Flush and stop.
    Shutdown,
}

// =============================================================================
// Buffer
// =============================================================================

/// Buffer for batched delivery with time-based and size-based flushing.
struct BatchBuffer<T> {
    items: Vec<T>,
    first_push: Instant,
    batch_size: usize,
    flush_interval: Duration,
}

impl<T> BatchBuffer<T> {
    fn new(batch_size: usize, flush_interval: Duration) -> Self {
        Self {
            items: Vec::with_capacity(batch_size),
            first_push: Instant::now(),
            batch_size,
            flush_interval,
        }
    }

    fn push(&mut self, item: T) {
        // Start the flush timer on first item so an idle buffer is never overdue
        if self.items.is_empty() {
            self.first_push = Instant::now();
        }
        self.items.push(item);
    }

    fn should_flush(&self) -> bool {
        self.items.len() >= self.batch_size
            || (!self.items.is_empty() && self.first_push.elapsed() >= self.flush_interval)
    }

    fn deadline(&self) -> Option<Instant> {
        (!self.items.is_empty()).then(|| self.first_push + self.flush_interval)
    }

    fn take(&mut self) -> Vec<T> {
        std::mem::take(&mut self.items)
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// =============================================================================
// Actor
// =============================================================================

/// Event forwarding actor.
pub(crate) struct EventForwarder {
    service: Arc<dyn ModelerService>,
    rx: mpsc::Receiver<Command>,
    buffer: BatchBuffer<Event>,
}

impl EventForwarder {
    /// Spawn the forwarder task.
    ///
    /// Returns the task handle and the command sender used by
    /// [`EventWriter`](super::EventWriter).
    pub(crate) fn spawn(
        service: Arc<dyn ModelerService>,
        channel_capacity: usize,
        batch_size: usize,
        flush_interval: Duration,
    ) -> (JoinHandle<()>, mpsc::Sender<Command>) {
        let (tx, rx) = mpsc::channel(channel_capacity.max(1));
        let actor = Self {
            service,
            rx,
            buffer: BatchBuffer::new(batch_size.max(1), flush_interval),
        };
        let handle = tokio::spawn(actor.run());
        (handle, tx)
    }

    async fn run(mut self) {
        tracing::debug!("Event forwarder started");

        loop {
            let deadline = self.buffer.deadline();
            let cmd = tokio::select! {
                cmd = self.rx.recv() => cmd,
                _ = sleep_until_opt(deadline) => {
                    self.flush().await;
                    continue;
                }
            };

            match cmd {
                Some(Command::Event(event)) => {
                    self.buffer.push(event);
                    if self.buffer.should_flush() {
                        self.flush().await;
                    }
                }
                Some(Command::Flush) => self.flush().await,
                Some(Command::Shutdown) => {
                    self.flush().await;
                    break;
                }
                None => {
                    tracing::warn!("Event channel disconnected, shutting down");
                    self.flush().await;
                    break;
                }
            }
        }

        tracing::debug!("Event forwarder stopped");
    }

    async fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let batch = self.buffer.take();
        let count = batch.len();
        match self.service.send_events(batch).await {
            Ok(()) => tracing::debug!(count, "Events delivered"),
            Err(e) => tracing::error!(error = %e, count, "Event delivery failed"),
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
