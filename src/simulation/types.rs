//! Type definitions for the simulation.
//!
//! Contains the data structures exchanged between components:
//! - Bus and frame identities
//! - The frame value carried across buses and buffers
//! - The message vocabulary delivered by the engine

use embassy_time::Instant;
use serde::{Deserialize, Serialize};

use crate::kernel::task_state::TaskState;

/// Name of a communication bus, e.g. `"B1"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusId(pub String);

impl BusId {
    pub fn new(name: &str) -> Self {
        BusId(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BusId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a frame: the bus it travels on and its numeric identifier.
///
/// Ordering is by bus name first, then identifier. Buffers rely on this order
/// when they drain, so it must stay stable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FrameKey {
    pub bus: BusId,
    pub id: u32,
}

impl FrameKey {
    pub fn new(bus: &str, id: u32) -> Self {
        FrameKey { bus: BusId::new(bus), id }
    }
}

impl std::fmt::Display for FrameKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bus, self.id)
    }
}

/// One unit of bus traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub key: FrameKey,
    /// Per-producer sequence number, starting at 1.
    pub sequence: u64,
    /// Virtual time the producer created this frame.
    pub generation_time: Instant,
    /// Earliest generation time of the data this frame was computed from.
    pub origin_time: Instant,
    /// Set for frames served before any real value was received.
    pub placeholder: bool,
}

impl Frame {
    pub fn new(key: FrameKey, sequence: u64, now: Instant) -> Self {
        Frame {
            key,
            sequence,
            generation_time: now,
            origin_time: now,
            placeholder: false,
        }
    }

    /// Value served for a registered key that has not been written yet.
    pub fn placeholder(key: FrameKey) -> Self {
        Frame {
            key,
            sequence: 0,
            generation_time: Instant::from_ticks(0),
            origin_time: Instant::from_ticks(0),
            placeholder: true,
        }
    }
}

/// Which of a component's timers fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Scheduler arbitration tick.
    Tick,
    /// A task's execution budget ran out.
    ExecutionFinished,
    /// Periodic task activation.
    Activation,
    /// Source task reconsidering its pending software buffer.
    Rewake,
    /// Transmit buffer finished putting a frame on the bus.
    Transmit,
    /// Traffic generator emitting its next frame.
    Traffic,
}

/// Everything the engine can deliver to a component.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Task state notification, in both directions between task and scheduler.
    Scheduler(TaskState),
    /// A data frame.
    Frame(Frame),
    /// Ask a sink for the latest value of a key.
    FrameRequest(FrameKey),
    /// Answer to a `FrameRequest`.
    FrameReply(Frame),
    /// Current length of a hardware transmit buffer, together with how many
    /// frames it has accepted in total so the producer can account for frames
    /// still in flight.
    Occupancy { bus: BusId, length: usize, accepted: u64 },
    /// A timer scheduled by the receiving component.
    Timer(super::engine::TimerId, TimerKind),
}
