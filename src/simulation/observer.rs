//! Observer interface injected into every component, plus a recorder.
//!
//! Components never write statistics themselves. They report data-loss
//! conditions, buffer depths, the age of the data they consume and task state
//! changes to an [`Observer`] handed to them at construction. [`Recorder`]
//! keeps counters, age statistics and a bounded transition trace so tests and
//! the run report can inspect them afterwards.

use embassy_time::{Duration, Instant};
use serde::Serialize;
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use crate::kernel::task_state::TaskState;

use super::types::{BusId, FrameKey};

/// Maximum number of task transitions kept by a [`Recorder`]. The oldest
/// entries are dropped first.
pub const TRACE_CAPACITY: usize = 100_000;

/// Shared observer handle. Everything runs on the single event thread.
pub type ObserverHandle = Rc<dyn Observer>;

/// Callbacks a component may fire. All default to doing nothing.
pub trait Observer {
    /// A value that was never read got overwritten.
    fn overrun(&self, _key: &FrameKey) {}
    /// The same value was read more than once.
    fn underrun(&self, _key: &FrameKey) {}
    /// Current depth of a software buffer; `bus` is `None` for buffers that
    /// are not split per bus.
    fn buffer_depth(&self, _bus: Option<&BusId>, _depth: usize) {}
    /// The scheduler saw or caused a task state change.
    fn task_transition(&self, _at: Instant, _task: &str, _state: TaskState) {}
    /// An arbitration completed; `chosen` is `None` when nothing was eligible.
    fn arbitration(&self, _at: Instant, _candidates: usize, _chosen: Option<&str>) {}
    /// A periodic activation found its task still busy.
    fn activation_overrun(&self, _at: Instant, _task: &str) {}
    /// `task` consumed a real value of `key`. `since_generation` is the time
    /// since its producer created it, `since_origin` the time since the oldest
    /// data it was computed from entered the node.
    fn frame_age(&self, _task: &str, _key: &FrameKey, _since_generation: Duration, _since_origin: Duration) {}
}

/// Observer that ignores everything.
pub struct NullObserver;

impl Observer for NullObserver {}

pub fn null_observer() -> ObserverHandle {
    Rc::new(NullObserver)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KeyCounters {
    pub overruns: u64,
    pub underruns: u64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DepthGauge {
    pub current: usize,
    pub max: usize,
}

/// Running statistics over a series of ages, in microseconds.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AgeStats {
    pub count: u64,
    pub min_us: u64,
    pub max_us: u64,
    pub total_us: u64,
}

impl AgeStats {
    fn record(&mut self, age: Duration) {
        let us = age.as_micros();
        if self.count == 0 {
            self.min_us = us;
            self.max_us = us;
        } else {
            self.min_us = self.min_us.min(us);
            self.max_us = self.max_us.max(us);
        }
        self.count += 1;
        self.total_us += us;
    }

    pub fn mean_us(&self) -> Option<f64> {
        (self.count > 0).then(|| self.total_us as f64 / self.count as f64)
    }
}

/// Ages of one key as seen by one consuming task.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameAges {
    pub since_generation: AgeStats,
    pub since_origin: AgeStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionRecord {
    pub at_us: u64,
    pub task: String,
    pub state: TaskState,
}

#[derive(Default)]
struct Records {
    keys: BTreeMap<FrameKey, KeyCounters>,
    depths: BTreeMap<Option<BusId>, DepthGauge>,
    ages: BTreeMap<(String, FrameKey), FrameAges>,
    transitions: VecDeque<TransitionRecord>,
    dispatches: u64,
    idle_arbitrations: u64,
    activation_overruns: BTreeMap<String, u64>,
}

/// Recording observer. Cloning yields another handle to the same records.
#[derive(Clone, Default)]
pub struct Recorder {
    records: Rc<RefCell<Records>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> ObserverHandle {
        Rc::new(self.clone())
    }

    pub fn counters(&self, key: &FrameKey) -> KeyCounters {
        self.records.borrow().keys.get(key).copied().unwrap_or_default()
    }

    pub fn all_counters(&self) -> Vec<(FrameKey, KeyCounters)> {
        self.records.borrow().keys.iter().map(|(k, c)| (k.clone(), *c)).collect()
    }

    pub fn total_overruns(&self) -> u64 {
        self.records.borrow().keys.values().map(|c| c.overruns).sum()
    }

    pub fn total_underruns(&self) -> u64 {
        self.records.borrow().keys.values().map(|c| c.underruns).sum()
    }

    pub fn depth(&self, bus: Option<&BusId>) -> DepthGauge {
        self.records.borrow().depths.get(&bus.cloned()).copied().unwrap_or_default()
    }

    pub fn all_depths(&self) -> Vec<(Option<BusId>, DepthGauge)> {
        self.records.borrow().depths.iter().map(|(b, g)| (b.clone(), *g)).collect()
    }

    pub fn ages(&self, task: &str, key: &FrameKey) -> FrameAges {
        self.records
            .borrow()
            .ages
            .get(&(task.to_string(), key.clone()))
            .copied()
            .unwrap_or_default()
    }

    /// Every (task, key) pair with recorded ages, ordered by task then key.
    pub fn all_ages(&self) -> Vec<(String, FrameKey, FrameAges)> {
        self.records
            .borrow()
            .ages
            .iter()
            .map(|((task, key), ages)| (task.clone(), key.clone(), *ages))
            .collect()
    }

    pub fn transitions(&self) -> Vec<TransitionRecord> {
        self.records.borrow().transitions.iter().cloned().collect()
    }

    /// Transitions of one task, oldest first.
    pub fn transitions_of(&self, task: &str) -> Vec<TransitionRecord> {
        self.records.borrow().transitions.iter().filter(|t| t.task == task).cloned().collect()
    }

    pub fn dispatches(&self) -> u64 {
        self.records.borrow().dispatches
    }

    pub fn idle_arbitrations(&self) -> u64 {
        self.records.borrow().idle_arbitrations
    }

    pub fn activation_overruns(&self) -> BTreeMap<String, u64> {
        self.records.borrow().activation_overruns.clone()
    }
}

impl Observer for Recorder {
    fn overrun(&self, key: &FrameKey) {
        log::warn!("Overrun on frame {}", key);
        self.records.borrow_mut().keys.entry(key.clone()).or_default().overruns += 1;
    }

    fn underrun(&self, key: &FrameKey) {
        log::debug!("Underrun on frame {}", key);
        self.records.borrow_mut().keys.entry(key.clone()).or_default().underruns += 1;
    }

    fn buffer_depth(&self, bus: Option<&BusId>, depth: usize) {
        let mut records = self.records.borrow_mut();
        let gauge = records.depths.entry(bus.cloned()).or_default();
        gauge.current = depth;
        gauge.max = gauge.max.max(depth);
    }

    fn task_transition(&self, at: Instant, task: &str, state: TaskState) {
        let mut records = self.records.borrow_mut();
        if records.transitions.len() >= TRACE_CAPACITY {
            records.transitions.pop_front();
        }
        records.transitions.push_back(TransitionRecord {
            at_us: at.as_micros(),
            task: task.to_string(),
            state,
        });
    }

    fn arbitration(&self, _at: Instant, _candidates: usize, chosen: Option<&str>) {
        let mut records = self.records.borrow_mut();
        match chosen {
            Some(_) => records.dispatches += 1,
            None => records.idle_arbitrations += 1,
        }
    }

    fn activation_overrun(&self, at: Instant, task: &str) {
        log::warn!("Activation overrun of {} at {} us", task, at.as_micros());
        *self.records.borrow_mut().activation_overruns.entry(task.to_string()).or_default() += 1;
    }

    fn frame_age(&self, task: &str, key: &FrameKey, since_generation: Duration, since_origin: Duration) {
        let mut records = self.records.borrow_mut();
        let ages = records.ages.entry((task.to_string(), key.clone())).or_default();
        ages.since_generation.record(since_generation);
        ages.since_origin.record(since_origin);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorder_handles_share_records() {
        let recorder = Recorder::new();
        let handle = recorder.handle();
        let key = FrameKey::new("B1", 42);
        handle.overrun(&key);
        handle.underrun(&key);
        handle.underrun(&key);
        assert_eq!(recorder.counters(&key), KeyCounters { overruns: 1, underruns: 2 });
        assert_eq!(recorder.total_underruns(), 2);
    }

    #[test]
    fn depth_gauge_tracks_maximum() {
        let recorder = Recorder::new();
        let bus = BusId::new("B1");
        recorder.buffer_depth(Some(&bus), 3);
        recorder.buffer_depth(Some(&bus), 1);
        assert_eq!(recorder.depth(Some(&bus)), DepthGauge { current: 1, max: 3 });
        assert_eq!(recorder.depth(None), DepthGauge::default());
    }

    #[test]
    fn trace_is_bounded() {
        let recorder = Recorder::new();
        for i in 0..(TRACE_CAPACITY as u64 + 10) {
            recorder.task_transition(Instant::from_micros(i), "t", TaskState::Ready);
        }
        let trace = recorder.transitions();
        assert_eq!(trace.len(), TRACE_CAPACITY);
        assert_eq!(trace[0].at_us, 10);
    }

    #[test]
    fn ages_are_kept_per_task_and_key() {
        let recorder = Recorder::new();
        let key = FrameKey::new("B1", 42);
        recorder.frame_age("brake", &key, Duration::from_micros(300), Duration::from_micros(900));
        recorder.frame_age("brake", &key, Duration::from_micros(100), Duration::from_micros(1_500));
        recorder.frame_age("dash", &key, Duration::from_micros(50), Duration::from_micros(50));

        let ages = recorder.ages("brake", &key);
        assert_eq!(
            ages.since_generation,
            AgeStats {
                count: 2,
                min_us: 100,
                max_us: 300,
                total_us: 400
            }
        );
        assert_eq!(ages.since_origin.mean_us(), Some(1_200.0));
        assert_eq!(recorder.ages("dash", &key).since_origin.count, 1);
        assert_eq!(recorder.ages("other", &key).since_generation.mean_us(), None);
        assert_eq!(recorder.all_ages().len(), 2);
    }
}
