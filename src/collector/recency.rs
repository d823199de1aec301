//! Recency gate: skip degraded devices that were collected recently.

use chrono::{DateTime, Utc};

use crate::hub::DeviceSnapshot;

/// Decides whether a device may be skipped this pass.
///
/// A device is skipped iff its status severity is above zero and it was last
/// collected within the window. Devices never collected are never skipped.
#[derive(Debug, Clone, Copy)]
pub struct RecencyGate {
    window: chrono::Duration,
}

impl RecencyGate {
    pub fn new(window: std::time::Duration) -> Self {
        Self {
            window: chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX),
        }
    }

    pub fn window(&self) -> chrono::Duration {
        self.window
    }

    /// Gate decision from the raw inputs.
    pub fn should_skip(
        &self,
        status_severity: u32,
        last_collection: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        if status_severity == 0 {
            return false;
        }
        match last_collection {
            Some(last) => last
                .checked_add_signed(self.window)
                .is_none_or(|until| until >= now),
            None => false,
        }
    }

    /// Gate decision for a device snapshot.
    pub fn skip_device(&self, device: &DeviceSnapshot, now: DateTime<Utc>) -> bool {
        self.should_skip(device.status_severity, device.last_collection, now)
    }
}
