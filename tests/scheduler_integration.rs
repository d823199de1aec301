//! End-to-end scheduler scenarios against the in-memory inventory hub.
//!
//! Clients are scripted so that timing is driven entirely by tokio's paused clock.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use modeler::collector::{
    ClientOutcome, ClientRegistry, CollectorError, DispatchSettings, Plugin, PluginError,
    PluginFilter, PluginRegistry, PluginResult, Protocol, ProtocolClient, ProtocolDispatcher,
    RawResult, RecencyGate, Transport,
};
use modeler::events::{DaemonStats, spawn_pipeline};
use modeler::hub::{DeviceSelection, DeviceSnapshot, InventoryHub, PluginDescriptor, UpdateDescription};
use modeler::scheduler::{CycleMode, Scheduler, SchedulerConfig};
use serde_json::json;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Scripted collaborators
// =============================================================================

const PLUGIN: &str = "test.Inventory";

struct InventoryPlugin;

impl Plugin for InventoryPlugin {
    fn name(&self) -> &str {
        PLUGIN
    }

    fn transport(&self) -> Transport {
        Transport::Python
    }

    fn process(
        &self,
        _device: &DeviceSnapshot,
        raw: RawResult,
    ) -> Result<Vec<UpdateDescription>, PluginError> {
        Ok(vec![UpdateDescription::new(
            json!({"modname": PLUGIN, "data": raw}),
        )])
    }
}

#[derive(Debug, Clone, Copy)]
enum Behavior {
    Immediate,
    /// Sleep, returning early on cancellation.
    Delay(Duration),
    /// Sleep without watching the cancellation token.
    Stubborn(Duration),
    /// Never return.
    Hang,
}

#[derive(Debug, Default)]
struct Tracker {
    started: AtomicUsize,
    current: AtomicUsize,
    max: AtomicUsize,
}

impl Tracker {
    fn enter(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

struct ScriptedClient {
    device: Arc<DeviceSnapshot>,
    plugins: Vec<Arc<dyn Plugin>>,
    behavior: Behavior,
    tracker: Arc<Tracker>,
}

#[async_trait::async_trait]
impl ProtocolClient for ScriptedClient {
    fn protocol(&self) -> Protocol {
        Protocol::Python
    }

    async fn collect(&mut self, cancel: CancellationToken) -> ClientOutcome {
        self.tracker.enter();
        let completed = match self.behavior {
            Behavior::Immediate => true,
            Behavior::Delay(delay) => tokio::select! {
                _ = cancel.cancelled() => false,
                _ = tokio::time::sleep(delay) => true,
            },
            Behavior::Stubborn(delay) => {
                tokio::time::sleep(delay).await;
                true
            }
            Behavior::Hang => {
                std::future::pending::<()>().await;
                false
            }
        };
        self.tracker.exit();

        if !completed {
            return ClientOutcome::failed(CollectorError::Cancelled);
        }
        ClientOutcome {
            results: self
                .plugins
                .iter()
                .map(|plugin| PluginResult {
                    plugin: plugin.clone(),
                    raw: Some(json!({"hostname": self.device.id})),
                })
                .collect(),
            error: None,
        }
    }
}

fn dispatcher(behavior: Behavior, tracker: Arc<Tracker>) -> ProtocolDispatcher {
    let mut plugins = PluginRegistry::new();
    plugins.register(PLUGIN, |_| Ok(Arc::new(InventoryPlugin) as Arc<dyn Plugin>));

    let mut clients = ClientRegistry::new();
    clients.register(Protocol::Python, move |req| {
        Ok(Box::new(ScriptedClient {
            device: req.device,
            plugins: req.plugins,
            behavior,
            tracker: tracker.clone(),
        }) as Box<dyn ProtocolClient>)
    });

    ProtocolDispatcher::new(
        plugins,
        clients,
        PluginFilter::All,
        RecencyGate::new(Duration::ZERO),
        DispatchSettings::default(),
    )
}

fn device(id: &str) -> DeviceSnapshot {
    DeviceSnapshot::new(id, "127.0.0.1")
        .with_plugin(PluginDescriptor::new(PLUGIN, Transport::Python))
}

fn hub(ids: &[&str]) -> Arc<InventoryHub> {
    Arc::new(InventoryHub::from_devices(ids.iter().map(|id| device(id)).collect()))
}

fn config(mode: CycleMode, parallel: usize) -> SchedulerConfig {
    SchedulerConfig::new(DeviceSelection::Organizer("/Devices".to_string()), mode)
        .with_parallel(parallel)
}

fn cancel_after(delay: Duration) -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        child.cancel();
    });
    token
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_single_pass_all_devices_succeed() {
    let hub = hub(&["a", "b", "c"]);
    let tracker = Arc::new(Tracker::default());
    let (forwarder, writer) = spawn_pipeline(hub.clone(), 64, 100, Duration::from_secs(5));

    let (scheduler, _handle) = Scheduler::new(
        config(CycleMode::SinglePass, 2),
        hub.clone(),
        dispatcher(Behavior::Immediate, tracker.clone()),
    );
    let report = scheduler
        .with_events(writer.clone(), DaemonStats::new("modeler", "localhost"))
        .run(CancellationToken::new())
        .await
        .expect("single pass report");

    assert_eq!(report.devices, 3);
    assert_eq!(report.devices_drawn, 3);
    assert_eq!(report.timed_out, 0);
    assert_eq!(hub.commits().await.len(), 3);
    assert_eq!(hub.collections().await.len(), 3);
    assert!(tracker.max.load(Ordering::SeqCst) <= 2);

    writer.shutdown().await.unwrap();
    forwarder.await.unwrap();
    let events = hub.events().await;
    let gauge = |metric: &str| {
        events
            .iter()
            .filter_map(|e| e.payload.as_ref())
            .find(|p| p["metric"] == metric)
            .map(|p| p["value"].clone())
    };
    assert_eq!(gauge("devices"), Some(json!(3.0)));
    assert_eq!(gauge("timedOut"), Some(json!(0.0)));
    assert!(gauge("cycleTime").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_hung_job_is_evicted() {
    let hub = Arc::new(InventoryHub::from_devices(vec![
        device("slow").with_client_timeout(Duration::from_secs(1)),
    ]));
    let tracker = Arc::new(Tracker::default());

    let (scheduler, _handle) = Scheduler::new(
        config(CycleMode::SinglePass, 1),
        hub.clone(),
        dispatcher(Behavior::Hang, tracker.clone()),
    );
    let started = tokio::time::Instant::now();
    let report = scheduler.run(CancellationToken::new()).await.unwrap();

    assert_eq!(report.timed_out, 1);
    assert_eq!(report.jobs_finished, 1);
    assert!(started.elapsed() <= Duration::from_secs(2));
    assert!(hub.commits().await.is_empty());
    assert!(hub.collections().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_parallelism_bound() {
    let hub = hub(&["a", "b", "c", "d", "e", "f"]);
    let tracker = Arc::new(Tracker::default());

    let (scheduler, _handle) = Scheduler::new(
        config(CycleMode::SinglePass, 2),
        hub.clone(),
        dispatcher(Behavior::Delay(Duration::from_millis(500)), tracker.clone()),
    );
    let report = scheduler.run(CancellationToken::new()).await.unwrap();

    assert_eq!(report.devices, 6);
    assert_eq!(tracker.started.load(Ordering::SeqCst), 6);
    assert_eq!(tracker.max.load(Ordering::SeqCst), 2);
    assert_eq!(hub.commits().await.len(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_pass_is_skipped() {
    let hub = hub(&["a"]);
    let tracker = Arc::new(Tracker::default());

    let (scheduler, _handle) = Scheduler::new(
        config(CycleMode::Continuous(Duration::from_secs(1)), 1),
        hub.clone(),
        dispatcher(Behavior::Delay(Duration::from_millis(2500)), tracker.clone()),
    );
    let report = scheduler
        .run(cancel_after(Duration::from_millis(3200)))
        .await
        .expect("first pass completed");

    // Firings at 1s and 2s found the first job still active; the 3s firing started pass two.
    assert_eq!(tracker.started.load(Ordering::SeqCst), 2);
    assert_eq!(tracker.max.load(Ordering::SeqCst), 1);
    assert_eq!(report.devices, 1);
    assert_eq!(hub.commits().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_evicted_job_results_still_merged() {
    let hub = Arc::new(InventoryHub::from_devices(vec![
        device("late").with_client_timeout(Duration::from_secs(1)),
    ]));
    let tracker = Arc::new(Tracker::default());

    let (scheduler, _handle) = Scheduler::new(
        config(CycleMode::Continuous(Duration::from_secs(60)), 1),
        hub.clone(),
        dispatcher(Behavior::Stubborn(Duration::from_millis(1500)), tracker),
    );
    let report = scheduler
        .run(cancel_after(Duration::from_secs(3)))
        .await
        .unwrap();

    assert_eq!(report.timed_out, 1);
    assert_eq!(hub.commits().await.len(), 1);
    assert_eq!(hub.collections().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_commit_failure_is_isolated() {
    let hub = hub(&["a", "b", "c"]);
    hub.fail_commits_for("b").await;
    let tracker = Arc::new(Tracker::default());

    let (scheduler, _handle) = Scheduler::new(
        config(CycleMode::SinglePass, 3),
        hub.clone(),
        dispatcher(Behavior::Immediate, tracker),
    );
    let report = scheduler.run(CancellationToken::new()).await.unwrap();

    assert_eq!(report.jobs_finished, 3);
    assert_eq!(report.timed_out, 0);
    let committed: Vec<_> = hub.commits().await.into_iter().map(|c| c.device_id).collect();
    assert_eq!(committed.len(), 2);
    assert!(!committed.contains(&"b".to_string()));
    assert_eq!(hub.collections().await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_device_completes_pass() {
    let hub = hub(&["a"]);
    let tracker = Arc::new(Tracker::default());

    let (scheduler, _handle) = Scheduler::new(
        SchedulerConfig::new(
            DeviceSelection::Device("missing".to_string()),
            CycleMode::SinglePass,
        ),
        hub.clone(),
        dispatcher(Behavior::Immediate, tracker.clone()),
    );
    let report = scheduler.run(CancellationToken::new()).await.unwrap();

    assert_eq!(report.devices_drawn, 1);
    assert_eq!(report.devices, 0);
    assert_eq!(tracker.started.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cycle_interval_update() {
    let hub = hub(&["a"]);
    let tracker = Arc::new(Tracker::default());

    let (scheduler, handle) = Scheduler::new(
        config(CycleMode::Continuous(Duration::from_secs(600)), 1),
        hub.clone(),
        dispatcher(Behavior::Immediate, tracker.clone()),
    );
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(scheduler.run(shutdown.clone()));

    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.set_cycle_interval(Duration::from_secs(5)).await.unwrap();
    // The pending 600s firing still stands; later passes use the new interval.
    tokio::time::sleep(Duration::from_secs(600 + 11)).await;
    shutdown.cancel();
    task.await.unwrap();

    assert_eq!(tracker.started.load(Ordering::SeqCst), 4);
}
