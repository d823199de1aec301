//! Daemon statistics: gauge events and collector threshold evaluation.

use std::time::Duration;

use super::{Event, EventKind, EventSeverity};
use crate::hub::CollectorThreshold;

/// Builds gauge and threshold events for one daemon instance.
#[derive(Debug, Clone)]
pub struct DaemonStats {
    source: String,
    monitor: String,
    thresholds: Vec<CollectorThreshold>,
    threshold_classes: Vec<String>,
    command_template: String,
}

impl DaemonStats {
    /// Create statistics for the daemon `source` running on `monitor`.
    pub fn new(source: impl Into<String>, monitor: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            monitor: monitor.into(),
            thresholds: Vec::new(),
            threshold_classes: Vec::new(),
            command_template: String::new(),
        }
    }

    /// Replace the configuration fetched from the hub.
    pub fn configure(
        &mut self,
        threshold_classes: Vec<String>,
        command_template: String,
        thresholds: Vec<CollectorThreshold>,
    ) {
        tracing::debug!(
            classes = threshold_classes.len(),
            thresholds = thresholds.len(),
            "Daemon statistics configured"
        );
        self.threshold_classes = threshold_classes;
        self.command_template = command_template;
        self.thresholds = thresholds;
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn thresholds(&self) -> &[CollectorThreshold] {
        &self.thresholds
    }

    /// Heartbeat for this daemon.
    pub fn heartbeat(&self, timeout: Duration) -> Event {
        Event::heartbeat(&self.source, timeout).with_payload("monitor", self.monitor.as_str())
    }

    /// Gauge sample plus one threshold event per violated threshold on `metric`.
    ///
    /// `cycle_time` is the sampling step the gauge is recorded at.
    pub fn gauge(&self, metric: &str, cycle_time: Duration, value: f64) -> Vec<Event> {
        let mut events = vec![
            Event::new(
                &self.source,
                EventKind::Metric,
                EventSeverity::Debug,
                format!("{} = {}", metric, value),
            )
            .with_payload("metric", metric)
            .with_payload("value", value)
            .with_payload("cycle_time_secs", cycle_time.as_secs())
            .with_payload("monitor", self.monitor.as_str()),
        ];

        for threshold in self.thresholds.iter().filter(|t| t.metric == metric) {
            if !self.threshold_classes.contains(&threshold.class) {
                tracing::trace!(metric, class = %threshold.class, "Threshold class not loaded");
                continue;
            }
            let violation = match (threshold.min, threshold.max) {
                (Some(min), _) if value < min => Some(format!("{} below minimum {}", value, min)),
                (_, Some(max)) if value > max => Some(format!("{} above maximum {}", value, max)),
                _ => None,
            };
            if let Some(detail) = violation {
                tracing::warn!(metric, value, "Collector threshold violated");
                events.push(
                    Event::new(
                        &self.source,
                        EventKind::Threshold,
                        threshold.severity,
                        self.threshold_message(metric, threshold.severity, value, &detail),
                    )
                    .with_payload("metric", metric)
                    .with_payload("value", value)
                    .with_payload("monitor", self.monitor.as_str()),
                );
            }
        }

        events
    }

    /// Render the hub's command template, or a plain message when none was published.
    ///
    /// Placeholders: `${here/id}` (monitor), `${metric}`, `${severity}`, `${current}`.
    fn threshold_message(
        &self,
        metric: &str,
        severity: EventSeverity,
        value: f64,
        detail: &str,
    ) -> String {
        if self.command_template.is_empty() {
            return format!("threshold of {} exceeded: {}", metric, detail);
        }
        self.command_template
            .replace("${here/id}", &self.monitor)
            .replace("${metric}", metric)
            .replace("${severity}", severity.as_ref())
            .replace("${current}", &value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::MIN_MAX_THRESHOLD;

    fn threshold(metric: &str, min: Option<f64>, max: Option<f64>) -> CollectorThreshold {
        CollectorThreshold {
            metric: metric.to_string(),
            min,
            max,
            class: MIN_MAX_THRESHOLD.to_string(),
            severity: EventSeverity::Warn,
        }
    }

    #[test]
    fn test_gauge_without_thresholds() {
        let stats = DaemonStats::new("modeler", "localhost");
        let events = stats.gauge("devices", Duration::from_secs(60), 3.0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Metric);
        assert_eq!(events[0].payload.as_ref().unwrap()["metric"], "devices");
    }

    #[test]
    fn test_gauge_threshold_violation() {
        let mut stats = DaemonStats::new("modeler", "localhost");
        stats.configure(
            vec!["MinMaxThreshold".to_string()],
            String::new(),
            vec![
                threshold("cycleTime", None, Some(300.0)),
                threshold("timedOut", None, Some(0.0)),
            ],
        );

        let events = stats.gauge("cycleTime", Duration::from_secs(60), 450.0);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind, EventKind::Threshold);
        assert_eq!(events[1].severity, EventSeverity::Warn);

        let within = stats.gauge("cycleTime", Duration::from_secs(60), 120.0);
        assert_eq!(within.len(), 1);
    }

    #[test]
    fn test_gauge_below_minimum() {
        let mut stats = DaemonStats::new("modeler", "localhost");
        stats.configure(
            vec![MIN_MAX_THRESHOLD.to_string()],
            String::new(),
            vec![threshold("devices", Some(1.0), None)],
        );
        let events = stats.gauge("devices", Duration::from_secs(60), 0.0);
        assert_eq!(events.len(), 2);
        assert!(events[1].message.contains("below minimum"));
    }

    #[test]
    fn test_unloaded_threshold_class_is_skipped() {
        let mut stats = DaemonStats::new("modeler", "localhost");
        stats.configure(vec![], String::new(), vec![threshold("devices", Some(1.0), None)]);
        assert_eq!(stats.gauge("devices", Duration::from_secs(60), 0.0).len(), 1);
    }

    #[test]
    fn test_threshold_message_uses_command_template() {
        let mut stats = DaemonStats::new("modeler", "collector1");
        stats.configure(
            vec![MIN_MAX_THRESHOLD.to_string()],
            "Threshold of ${metric} on ${here/id} ${severity} exceeded: current value ${current}"
                .to_string(),
            vec![threshold("timedOut", None, Some(0.0))],
        );
        let events = stats.gauge("timedOut", Duration::from_secs(60), 2.0);
        assert_eq!(
            events[1].message,
            "Threshold of timedOut on collector1 warn exceeded: current value 2"
        );
    }
}
