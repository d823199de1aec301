//! Bounded set of in-flight jobs plus the lazy device source.

use std::collections::HashMap;

use tokio::time::Instant;

use super::job::{CollectionJob, JobId};

/// Lazy sequence of device ids for the current pass.
pub type DeviceIter = Box<dyn Iterator<Item = String> + Send>;

enum DeviceSource {
    /// Device list requested but not received yet.
    Loading,
    Active(DeviceIter),
    Exhausted,
}

/// Active job set, device source and single-step draw logic.
pub struct SlotScheduler {
    parallel: usize,
    active: HashMap<JobId, CollectionJob>,
    source: DeviceSource,
    pending_draws: usize,
    under_load: bool,
}

impl std::fmt::Debug for SlotScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotScheduler")
            .field("parallel", &self.parallel)
            .field("active", &self.active.len())
            .field("pending_draws", &self.pending_draws)
            .field("exhausted", &self.is_exhausted())
            .field("under_load", &self.under_load)
            .finish()
    }
}

impl SlotScheduler {
    pub fn new(parallel: usize) -> Self {
        Self {
            parallel: parallel.max(1),
            active: HashMap::new(),
            source: DeviceSource::Exhausted,
            pending_draws: 0,
            under_load: false,
        }
    }

    /// Mark the source as awaiting its device list.
    pub fn begin_loading(&mut self) {
        self.source = DeviceSource::Loading;
    }

    /// Install the device sequence for a new pass.
    pub fn load(&mut self, devices: DeviceIter) {
        self.source = DeviceSource::Active(devices);
    }

    /// Drop whatever is left of the device sequence.
    pub fn exhaust(&mut self) {
        self.source = DeviceSource::Exhausted;
    }

    pub fn set_under_load(&mut self, under_load: bool) {
        if under_load != self.under_load {
            tracing::debug!(under_load, "Scheduler load flag changed");
        }
        self.under_load = under_load;
    }

    /// Draw at most one device. Counts the draw as pending until [`draw_finished`](Self::draw_finished).
    ///
    /// No-op while `active + pending >= parallel`, under load, or when the source
    /// has nothing to give.
    pub fn next_draw(&mut self) -> Option<String> {
        if self.active.len() + self.pending_draws >= self.parallel || self.under_load {
            return None;
        }
        let DeviceSource::Active(devices) = &mut self.source else {
            return None;
        };
        match devices.next() {
            Some(device_id) => {
                self.pending_draws += 1;
                Some(device_id)
            }
            None => {
                self.source = DeviceSource::Exhausted;
                None
            }
        }
    }

    /// A device-config fetch started by `next_draw` has completed.
    pub fn draw_finished(&mut self) {
        self.pending_draws = self.pending_draws.saturating_sub(1);
    }

    pub fn insert(&mut self, job: CollectionJob) {
        self.active.insert(job.id, job);
    }

    pub fn get_mut(&mut self, id: &JobId) -> Option<&mut CollectionJob> {
        self.active.get_mut(id)
    }

    pub fn remove(&mut self, id: &JobId) -> Option<CollectionJob> {
        self.active.remove(id)
    }

    /// Remove and return every job whose deadline has passed.
    pub fn take_expired(&mut self, now: Instant) -> Vec<CollectionJob> {
        let expired: Vec<JobId> = self
            .active
            .values()
            .filter(|job| job.is_expired(now))
            .map(|job| job.id)
            .collect();
        expired
            .iter()
            .filter_map(|id| self.active.remove(id))
            .collect()
    }

    /// Cancel every active job and clear the set.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.active.len();
        for job in self.active.values() {
            job.cancel.cancel();
        }
        self.active.clear();
        count
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn pending_draws(&self) -> usize {
        self.pending_draws
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.source, DeviceSource::Exhausted)
    }

    /// Source exhausted, nothing active, no config fetch outstanding.
    pub fn is_drained(&self) -> bool {
        self.is_exhausted() && self.active.is_empty() && self.pending_draws == 0
    }

    /// Nothing active and nothing pending.
    pub fn is_idle(&self) -> bool {
        self.active.is_empty() && self.pending_draws == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::Protocol;
    use std::time::Duration;

    fn devices(ids: &[&str]) -> DeviceIter {
        Box::new(
            ids.iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .into_iter(),
        )
    }

    fn job(device: &str, deadline: Instant) -> CollectionJob {
        CollectionJob::new(device, Protocol::Portscan, vec![], deadline)
    }

    #[test]
    fn test_single_draw_respects_parallel() {
        let mut slots = SlotScheduler::new(2);
        slots.load(devices(&["a", "b", "c"]));

        assert_eq!(slots.next_draw().as_deref(), Some("a"));
        assert_eq!(slots.next_draw().as_deref(), Some("b"));
        // two pending draws fill both slots
        assert_eq!(slots.next_draw(), None);

        slots.draw_finished();
        slots.insert(job("a", Instant::now() + Duration::from_secs(60)));
        assert_eq!(slots.next_draw(), None);

        slots.draw_finished();
        assert_eq!(slots.next_draw().as_deref(), Some("c"));
    }

    #[test]
    fn test_exhaustion_and_drain() {
        let mut slots = SlotScheduler::new(1);
        slots.load(devices(&["a"]));
        assert!(!slots.is_drained());

        assert_eq!(slots.next_draw().as_deref(), Some("a"));
        slots.draw_finished();
        let j = job("a", Instant::now() + Duration::from_secs(60));
        let id = j.id;
        slots.insert(j);

        slots.remove(&id);
        assert!(!slots.is_exhausted());
        assert_eq!(slots.next_draw(), None);
        assert!(slots.is_exhausted());
        assert!(slots.is_drained());
    }

    #[test]
    fn test_loading_is_not_drained() {
        let mut slots = SlotScheduler::new(1);
        assert!(slots.is_drained());
        slots.begin_loading();
        assert!(!slots.is_drained());
        assert_eq!(slots.next_draw(), None);
    }

    #[test]
    fn test_under_load_suppresses_draws() {
        let mut slots = SlotScheduler::new(4);
        slots.load(devices(&["a"]));
        slots.set_under_load(true);
        assert_eq!(slots.next_draw(), None);
        slots.set_under_load(false);
        assert_eq!(slots.next_draw().as_deref(), Some("a"));
    }

    #[test]
    fn test_take_expired() {
        let now = Instant::now();
        let mut slots = SlotScheduler::new(4);
        slots.insert(job("old", now - Duration::from_secs(1)));
        slots.insert(job("new", now + Duration::from_secs(60)));

        let expired = slots.take_expired(now);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].device_id, "old");
        assert_eq!(slots.active_len(), 1);
        assert!(slots.take_expired(now).is_empty());
    }
}
