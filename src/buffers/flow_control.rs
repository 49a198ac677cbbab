//! Transmission-side cascade of a per-key software buffer in front of a
//! capacity-bounded hardware stage, one stage per bus.
//!
//! The queue keeps its own count of what sits in each hardware stage. The
//! count goes up whenever a frame is forwarded and is reconciled against the
//! stage's occupancy reports, which carry the stage's length and the number of
//! frames it has accepted. Frames forwarded but not yet accepted are added on
//! top of the reported length, so a report that was sent before the latest
//! forwards never understates occupancy.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::SimError;
use crate::simulation::observer::ObserverHandle;
use crate::simulation::types::{BusId, FrameKey};

/// What `submit` did with a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission<F> {
    /// Hardware had room: hand this frame to the stage now.
    Forward(F),
    /// Stored in the software buffer.
    Buffered,
    /// Stored in the software buffer, discarding a value that was still pending.
    Replaced,
}

#[derive(Debug)]
struct Stage<F> {
    capacity: usize,
    occupancy: usize,
    forwarded: u64,
    pending: BTreeMap<u32, F>,
}

impl<F> Stage<F> {
    fn has_room(&self) -> bool {
        self.occupancy < self.capacity
    }
}

pub struct FlowControlledQueue<F> {
    owner: String,
    stages: BTreeMap<BusId, Stage<F>>,
    outputs: BTreeSet<FrameKey>,
    observer: ObserverHandle,
}

impl<F> FlowControlledQueue<F> {
    pub fn new(owner: &str, observer: ObserverHandle) -> Self {
        FlowControlledQueue {
            owner: owner.to_string(),
            stages: BTreeMap::new(),
            outputs: BTreeSet::new(),
            observer,
        }
    }

    /// Declare the hardware stage of `bus` and its capacity.
    pub fn add_stage(&mut self, bus: BusId, capacity: usize) -> Result<(), SimError> {
        if capacity == 0 {
            return Err(SimError::Configuration(format!("{}: hardware buffer of {} has no capacity", self.owner, bus)));
        }
        if self.stages.contains_key(&bus) {
            return Err(SimError::Configuration(format!("{}: bus {} declared twice", self.owner, bus)));
        }
        self.stages.insert(
            bus,
            Stage {
                capacity,
                occupancy: 0,
                forwarded: 0,
                pending: BTreeMap::new(),
            },
        );
        Ok(())
    }

    /// Bind `key` to the hardware stage of its bus.
    pub fn register_output(&mut self, key: FrameKey) -> Result<(), SimError> {
        if !self.stages.contains_key(&key.bus) {
            return Err(SimError::UnknownBus {
                component: self.owner.clone(),
                bus: key.bus,
            });
        }
        self.outputs.insert(key);
        Ok(())
    }

    pub fn is_registered(&self, key: &FrameKey) -> bool {
        self.outputs.contains(key)
    }

    fn stage_mut(&mut self, bus: &BusId) -> Result<&mut Stage<F>, SimError> {
        match self.stages.get_mut(bus) {
            Some(stage) => Ok(stage),
            None => Err(SimError::UnknownBus {
                component: self.owner.clone(),
                bus: bus.clone(),
            }),
        }
    }

    /// Forward `frame` if its stage has room and nothing is pending for `key`,
    /// otherwise keep it as the pending value of `key`.
    pub fn submit(&mut self, key: &FrameKey, frame: F) -> Result<Submission<F>, SimError> {
        if !self.outputs.contains(key) {
            return Err(SimError::UnregisteredFrame {
                component: self.owner.clone(),
                key: key.clone(),
            });
        }
        let stage = self.stage_mut(&key.bus)?;
        if stage.has_room() && !stage.pending.contains_key(&key.id) {
            stage.occupancy += 1;
            stage.forwarded += 1;
            return Ok(Submission::Forward(frame));
        }
        let replaced = stage.pending.insert(key.id, frame).is_some();
        let depth = stage.pending.len();
        if replaced {
            self.observer.overrun(key);
        }
        self.observer.buffer_depth(Some(&key.bus), depth);
        Ok(if replaced { Submission::Replaced } else { Submission::Buffered })
    }

    /// Apply an occupancy report of the stage on `bus`. Returns whether the
    /// stage now has room for frames that are pending on it.
    pub fn update_occupancy(&mut self, bus: &BusId, length: usize, accepted: u64) -> Result<bool, SimError> {
        let owner = self.owner.clone();
        let stage = self.stage_mut(bus)?;
        if length > stage.capacity {
            return Err(SimError::CapacityViolation {
                component: owner,
                bus: bus.clone(),
                capacity: stage.capacity,
            });
        }
        let Some(in_flight) = stage.forwarded.checked_sub(accepted) else {
            return Err(SimError::protocol(
                &owner,
                format!("{} reports {} accepted frames but only {} were forwarded", bus, accepted, stage.forwarded),
            ));
        };
        let occupancy = length + in_flight as usize;
        if occupancy > stage.capacity {
            return Err(SimError::CapacityViolation {
                component: owner,
                bus: bus.clone(),
                capacity: stage.capacity,
            });
        }
        stage.occupancy = occupancy;
        Ok(stage.has_room() && !stage.pending.is_empty())
    }

    /// Forward pending frames while their stages have room, bus by bus in
    /// ascending order and within a bus by ascending identifier.
    pub fn drain(&mut self) -> Vec<(FrameKey, F)> {
        let mut forwarded = Vec::new();
        for (bus, stage) in self.stages.iter_mut() {
            let before = stage.pending.len();
            while stage.has_room() {
                let Some((id, frame)) = stage.pending.pop_first() else {
                    break;
                };
                stage.occupancy += 1;
                stage.forwarded += 1;
                forwarded.push((FrameKey { bus: bus.clone(), id }, frame));
            }
            if stage.pending.len() != before {
                self.observer.buffer_depth(Some(bus), stage.pending.len());
            }
        }
        forwarded
    }

    /// Frames pending across every bus.
    pub fn pending(&self) -> usize {
        self.stages.values().map(|stage| stage.pending.len()).sum()
    }

    pub fn pending_on(&self, bus: &BusId) -> usize {
        self.stages.get(bus).map(|stage| stage.pending.len()).unwrap_or(0)
    }

    /// Believed occupancy of the hardware stage on `bus`.
    pub fn occupancy(&self, bus: &BusId) -> Option<usize> {
        self.stages.get(bus).map(|stage| stage.occupancy)
    }

    pub fn capacity(&self, bus: &BusId) -> Option<usize> {
        self.stages.get(bus).map(|stage| stage.capacity)
    }
}
