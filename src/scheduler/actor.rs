//! Scheduler actor: the single owner of all scheduling state.
//!
//! The loop selects over shutdown, the mailbox, the deadline tick and the pass
//! timer. Every handler ends with a refill attempt, which draws at most one
//! device and then checks whether the pass is complete.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::cycle::{CycleController, PassReport};
use super::job::{CollectionJob, JobId, JobState};
use super::merger::{MergeError, MergeSummary, ResultMerger};
use super::slots::SlotScheduler;
use super::{CycleMode, DEADLINE_TICK, SchedulerConfig, SchedulerHandle};
use crate::collector::{ClientOutcome, Protocol, ProtocolClient, ProtocolDispatcher};
use crate::events::{DaemonStats, EventWriter};
use crate::hub::{DeviceSnapshot, HubError, ModelerService};

// =============================================================================
// Messages
// =============================================================================

/// Everything that reaches the actor's mailbox.
#[derive(Debug)]
pub(crate) enum Message {
    /// Result of resolving the device selection.
    DeviceList(Result<Vec<String>, HubError>),
    /// Result of one device-config fetch started by a draw.
    DeviceConfig {
        device_id: String,
        result: Result<Vec<DeviceSnapshot>, HubError>,
    },
    /// A client returned, possibly after its job was evicted.
    JobFinished {
        id: JobId,
        device: Arc<DeviceSnapshot>,
        protocol: Protocol,
        outcome: ClientOutcome,
    },
    /// A cancelled client ignored the stop request past the grace period.
    JobAbandoned {
        id: JobId,
        device_id: String,
        protocol: Protocol,
    },
    Merged {
        id: JobId,
        device_id: String,
        result: Result<MergeSummary, MergeError>,
    },
    SetCycleInterval(Duration),
    UpdateStats(DaemonStats),
}

// =============================================================================
// Actor
// =============================================================================

/// Collection scheduler.
///
/// Build with [`Scheduler::new`], then drive with [`Scheduler::run`].
pub struct Scheduler {
    config: SchedulerConfig,
    service: Arc<dyn ModelerService>,
    dispatcher: ProtocolDispatcher,
    merger: ResultMerger,
    slots: SlotScheduler,
    cycle: CycleController,
    tx: mpsc::Sender<Message>,
    rx: mpsc::Receiver<Message>,
    events: Option<EventWriter>,
    stats: Option<DaemonStats>,
    reported_running: usize,
    last_report: Option<PassReport>,
    done: bool,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("slots", &self.slots)
            .field("phase", &self.cycle.phase())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Create the actor and a handle for pushing configuration updates into it.
    pub fn new(
        config: SchedulerConfig,
        service: Arc<dyn ModelerService>,
        dispatcher: ProtocolDispatcher,
    ) -> (Self, SchedulerHandle) {
        let (tx, rx) = mpsc::channel(config.mailbox_capacity.max(1));
        let handle = SchedulerHandle::new(tx.clone());
        let scheduler = Self {
            slots: SlotScheduler::new(config.parallel),
            cycle: CycleController::new(config.mode),
            merger: ResultMerger::new(service.clone()),
            config,
            service,
            dispatcher,
            tx,
            rx,
            events: None,
            stats: None,
            reported_running: 0,
            last_report: None,
            done: false,
        };
        (scheduler, handle)
    }

    /// Emit `cycleTime`, `devices` and `timedOut` gauges after every pass.
    pub fn with_events(mut self, writer: EventWriter, stats: DaemonStats) -> Self {
        self.events = Some(writer);
        self.stats = Some(stats);
        self
    }

    /// Run until `shutdown` fires or, in single-pass mode, until the pass completes.
    ///
    /// Returns the report of the last completed pass.
    pub async fn run(mut self, shutdown: CancellationToken) -> Option<PassReport> {
        tracing::info!(
            parallel = self.config.parallel,
            mode = ?self.config.mode,
            selection = %self.config.selection,
            "Scheduler started"
        );

        let mut tick = tokio::time::interval(DEADLINE_TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.done {
            let next_fire = self.cycle.next_fire();
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    self.shutdown();
                    break;
                }
                Some(message) = self.rx.recv() => self.handle(message),
                _ = tick.tick() => self.on_tick(),
                _ = sleep_until_opt(next_fire) => self.on_cycle_timer(),
            }
        }

        tracing::info!("Scheduler stopped");
        self.last_report
    }

    fn handle(&mut self, message: Message) {
        match message {
            Message::DeviceList(result) => self.on_device_list(result),
            Message::DeviceConfig { device_id, result } => {
                self.slots.draw_finished();
                match result {
                    Ok(snapshots) => match snapshots.into_iter().find(|d| d.id == device_id) {
                        Some(device) => self.start_jobs(device),
                        None => tracing::warn!(device = %device_id, "No configuration returned for device"),
                    },
                    Err(e) => {
                        tracing::error!(device = %device_id, error = %e, "Unable to fetch device configuration")
                    }
                }
            }
            Message::JobFinished {
                id,
                device,
                protocol,
                outcome,
            } => self.on_job_finished(id, device, protocol, outcome),
            Message::JobAbandoned {
                id,
                device_id,
                protocol,
            } => {
                tracing::warn!(
                    device = %device_id,
                    protocol = %protocol,
                    job = %id,
                    "Client ignored stop request, results discarded"
                );
            }
            Message::Merged {
                id,
                device_id,
                result,
            } => self.on_merged(id, &device_id, result),
            Message::SetCycleInterval(interval) => self.cycle.set_interval(interval),
            Message::UpdateStats(stats) => self.stats = Some(stats),
        }
        self.refill();
    }

    fn on_device_list(&mut self, result: Result<Vec<String>, HubError>) {
        match result {
            Ok(devices) => {
                tracing::info!(devices = devices.len(), "Device list received");
                self.slots.load(Box::new(devices.into_iter()));
                self.cycle.running();
            }
            Err(e) => {
                tracing::error!(error = %e, "Unable to fetch device list");
                self.slots.exhaust();
            }
        }
    }

    fn start_jobs(&mut self, device: DeviceSnapshot) {
        let device = Arc::new(device);
        let jobs = self.dispatcher.dispatch(&device, Utc::now());
        if jobs.is_empty() {
            tracing::debug!(device = %device.id, "No collection jobs for device");
            return;
        }

        let now = Instant::now();
        for dispatched in jobs {
            let job = CollectionJob::new(
                device.id.clone(),
                dispatched.protocol,
                dispatched.plugins,
                now + dispatched.timeout,
            );
            tracing::debug!(
                device = %device.id,
                protocol = %job.protocol,
                plugins = ?job.plugins,
                job = %job.id,
                "Starting client"
            );
            tokio::spawn(run_job(
                job.id,
                dispatched.client,
                device.clone(),
                dispatched.protocol,
                job.cancel.clone(),
                self.config.stop_grace,
                self.tx.clone(),
            ));
            self.slots.insert(job);
        }
    }

    fn on_job_finished(
        &mut self,
        id: JobId,
        device: Arc<DeviceSnapshot>,
        protocol: Protocol,
        outcome: ClientOutcome,
    ) {
        match self.slots.get_mut(&id) {
            Some(job) => {
                tracing::debug!(device = %device.id, protocol = %protocol, "Client finished");
                job.state = JobState::Merging;
            }
            None => {
                tracing::debug!(device = %device.id, protocol = %protocol, "Evicted client finished, merging late results");
            }
        }

        let merger = self.merger.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = merger.merge(&device, outcome).await;
            let message = Message::Merged {
                id,
                device_id: device.id.clone(),
                result,
            };
            if tx.send(message).await.is_err() {
                tracing::debug!(device = %device.id, "Scheduler stopped before merge completed");
            }
        });
    }

    fn on_merged(&mut self, id: JobId, device_id: &str, result: Result<MergeSummary, MergeError>) {
        if let Err(e) = &result {
            tracing::error!(device = %device_id, error = %e, "Unable to save collected data");
        }
        match self.slots.remove(&id) {
            Some(job) => self.cycle.record_finished(&job.device_id, job.protocol, false),
            None => tracing::warn!(device = %device_id, job = %id, "Job not found in active set"),
        }
    }

    fn on_tick(&mut self) {
        for mut job in self.slots.take_expired(Instant::now()) {
            job.time_out();
            tracing::warn!(
                device = %job.device_id,
                protocol = %job.protocol,
                state = %job.state,
                job = %job.id,
                "Client timed out"
            );
            self.cycle.record_finished(&job.device_id, job.protocol, true);
        }
        self.refill();
    }

    fn on_cycle_timer(&mut self) {
        self.cycle.fire(Instant::now());
        if !self.cycle.try_start(!self.slots.is_idle()) {
            return;
        }
        self.slots.begin_loading();

        let selection = self.config.selection.clone();
        let service = self.service.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = selection.resolve(service.as_ref()).await;
            let _ = tx.send(Message::DeviceList(result)).await;
        });
    }

    /// Draw at most one device, then check for pass completion.
    fn refill(&mut self) {
        if !self.cycle.is_active() {
            return;
        }
        self.slots
            .set_under_load(self.rx.len() >= self.config.backlog_threshold);

        if let Some(device_id) = self.slots.next_draw() {
            self.cycle.record_draw();
            tracing::debug!(device = %device_id, "Fetching device configuration");
            let service = self.service.clone();
            let tx = self.tx.clone();
            tokio::spawn(async move {
                let result = service.device_config(std::slice::from_ref(&device_id)).await;
                let _ = tx.send(Message::DeviceConfig { device_id, result }).await;
            });
        }

        let running = self.slots.active_len();
        if running != self.reported_running {
            tracing::info!(clients = running, "Running clients");
            self.reported_running = running;
        }

        if self.slots.is_exhausted() {
            self.cycle.draining();
        }
        if self.slots.is_drained() {
            self.complete_pass();
        }
    }

    fn complete_pass(&mut self) {
        let Some(report) = self.cycle.finish() else {
            return;
        };
        if let (Some(writer), Some(stats)) = (&self.events, &self.stats) {
            let step = self.cycle.cycle_time();
            writer.send_all(stats.gauge("cycleTime", step, report.elapsed.as_secs_f64()));
            writer.send_all(stats.gauge("devices", step, report.devices as f64));
            writer.send_all(stats.gauge("timedOut", step, report.timed_out as f64));
        }
        if self.cycle.mode() == CycleMode::SinglePass {
            self.done = true;
        }
        self.last_report = Some(report);
    }

    fn shutdown(&mut self) {
        let cancelled = self.slots.cancel_all();
        tracing::info!(cancelled, "Scheduler shutting down");
    }
}

// =============================================================================
// Tasks
// =============================================================================

/// Drive one client. After cancellation the client gets `stop_grace` to return.
async fn run_job(
    id: JobId,
    mut client: Box<dyn ProtocolClient>,
    device: Arc<DeviceSnapshot>,
    protocol: Protocol,
    cancel: CancellationToken,
    stop_grace: Duration,
    tx: mpsc::Sender<Message>,
) {
    let stopped = cancel.clone();
    let outcome = tokio::select! {
        outcome = client.collect(cancel) => Some(outcome),
        _ = async move {
            stopped.cancelled().await;
            tokio::time::sleep(stop_grace).await;
        } => None,
    };

    let message = match outcome {
        Some(outcome) => Message::JobFinished {
            id,
            device,
            protocol,
            outcome,
        },
        None => Message::JobAbandoned {
            id,
            device_id: device.id.clone(),
            protocol,
        },
    };
    if tx.send(message).await.is_err() {
        tracing::debug!(job = %id, "Scheduler stopped before job reported");
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
