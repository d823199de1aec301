//! Pass timing, overlap protection and per-pass accounting.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use super::CycleMode;
use crate::collector::Protocol;

/// Phase of the modeling cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum CyclePhase {
    Idle,
    /// Device list requested.
    Starting,
    /// Drawing devices.
    Running,
    /// Source exhausted, waiting for the active set to empty.
    Draining,
}

/// Summary of one completed pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassReport {
    pub started_at: DateTime<Utc>,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    /// Devices drawn from the source.
    pub devices_drawn: usize,
    /// Distinct devices with at least one finished job.
    pub devices: usize,
    /// Jobs retired, including timed out ones.
    pub jobs_finished: usize,
    pub timed_out: usize,
}

#[derive(Debug)]
struct FinishedJob {
    device_id: String,
    timed_out: bool,
}

#[derive(Debug)]
struct PassState {
    started: Instant,
    started_at: DateTime<Utc>,
    devices_drawn: usize,
    finished: Vec<FinishedJob>,
}

/// Owns the pass timer and the record of the pass in progress.
#[derive(Debug)]
pub struct CycleController {
    mode: CycleMode,
    phase: CyclePhase,
    next_fire: Option<Instant>,
    pass: Option<PassState>,
}

impl CycleController {
    /// The first pass fires immediately.
    pub fn new(mode: CycleMode) -> Self {
        Self {
            mode,
            phase: CyclePhase::Idle,
            next_fire: Some(Instant::now()),
            pass: None,
        }
    }

    pub fn mode(&self) -> CycleMode {
        self.mode
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    /// When the pass timer next fires, if ever.
    pub fn next_fire(&self) -> Option<Instant> {
        self.next_fire
    }

    /// Change the interval used from the next reschedule on. Ignored in single-pass mode.
    ///
    /// A zero interval is rejected and the current one kept.
    pub fn set_interval(&mut self, interval: Duration) {
        if interval.is_zero() {
            tracing::warn!("Ignoring zero modeling cycle interval");
            return;
        }
        if let CycleMode::Continuous(current) = &mut self.mode
            && *current != interval
        {
            tracing::info!(interval = ?interval, "Modeling cycle interval updated");
            *current = interval;
        }
    }

    /// Consume a timer firing and schedule the next one.
    pub fn fire(&mut self, now: Instant) {
        self.next_fire = match self.mode {
            CycleMode::Continuous(interval) => Some(now + interval),
            CycleMode::SinglePass => None,
        };
    }

    /// Begin a pass unless the previous one is still running.
    ///
    /// `busy` reports whether jobs or config fetches are still outstanding.
    pub fn try_start(&mut self, busy: bool) -> bool {
        if self.phase != CyclePhase::Idle || busy {
            tracing::error!(phase = %self.phase, "Modeling cycle taking too long");
            return false;
        }
        self.phase = CyclePhase::Starting;
        self.pass = Some(PassState {
            started: Instant::now(),
            started_at: Utc::now(),
            devices_drawn: 0,
            finished: Vec::new(),
        });
        tracing::info!("Starting modeling pass");
        true
    }

    /// The device list has arrived.
    pub fn running(&mut self) {
        if self.phase == CyclePhase::Starting {
            self.phase = CyclePhase::Running;
        }
    }

    /// The device source is exhausted.
    pub fn draining(&mut self) {
        if matches!(self.phase, CyclePhase::Starting | CyclePhase::Running) {
            tracing::debug!("Device source exhausted, draining active jobs");
            self.phase = CyclePhase::Draining;
        }
    }

    pub fn is_active(&self) -> bool {
        self.phase != CyclePhase::Idle
    }

    pub fn record_draw(&mut self) {
        if let Some(pass) = &mut self.pass {
            pass.devices_drawn += 1;
        }
    }

    pub fn record_finished(&mut self, device_id: &str, protocol: Protocol, timed_out: bool) {
        if let Some(pass) = &mut self.pass {
            tracing::trace!(device = %device_id, protocol = %protocol, timed_out, "Job retired");
            pass.finished.push(FinishedJob {
                device_id: device_id.to_string(),
                timed_out,
            });
        }
    }

    /// Close the pass and return to idle.
    pub fn finish(&mut self) -> Option<PassReport> {
        let pass = self.pass.take()?;
        self.phase = CyclePhase::Idle;

        let devices: HashSet<&str> = pass.finished.iter().map(|j| j.device_id.as_str()).collect();
        let report = PassReport {
            started_at: pass.started_at,
            elapsed: pass.started.elapsed(),
            devices_drawn: pass.devices_drawn,
            devices: devices.len(),
            jobs_finished: pass.finished.len(),
            timed_out: pass.finished.iter().filter(|j| j.timed_out).count(),
        };
        tracing::info!(
            elapsed = ?report.elapsed,
            devices = report.devices,
            jobs = report.jobs_finished,
            timed_out = report.timed_out,
            "Modeling pass complete"
        );
        Some(report)
    }

    /// Interval reported with gauges.
    pub fn cycle_time(&self) -> Duration {
        match self.mode {
            CycleMode::Continuous(interval) => interval,
            CycleMode::SinglePass => Duration::ZERO,
        }
    }
}
