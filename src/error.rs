//! Error taxonomy shared by the kernel, the buffers and the applications.
//!
//! Every variant is fatal: the engine stops at the first `Err` a component
//! returns. Data-loss conditions (overrun, underrun) are not errors, they are
//! reported through the observer and the run continues.

use crate::kernel::task_state::TaskState;
use crate::simulation::types::{BusId, FrameKey};

/// A task state change that is not part of the task state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: TaskState,
    pub to: TaskState,
}

impl std::fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "illegal task state transition {:?} -> {:?}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// Fatal simulation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    /// Task and scheduler disagree about a task's state, or a component got a
    /// message it can never legally receive.
    ProtocolViolation { component: String, detail: String },
    /// A frame key was used at runtime without being registered first.
    UnregisteredFrame { component: String, key: FrameKey },
    /// A registration referenced a bus with no hardware stage behind it.
    UnknownBus { component: String, bus: BusId },
    /// A frame was pushed into a hardware buffer that had no room left.
    CapacityViolation { component: String, bus: BusId, capacity: usize },
    /// Static wiring or parameter problem detected while building a bench.
    Configuration(String),
}

impl SimError {
    pub fn protocol(component: &str, detail: impl Into<String>) -> Self {
        SimError::ProtocolViolation {
            component: component.to_string(),
            detail: detail.into(),
        }
    }

    pub fn transition(component: &str, err: IllegalTransition) -> Self {
        SimError::protocol(component, err.to_string())
    }
}

impl std::fmt::Display for SimError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimError::ProtocolViolation { component, detail } => write!(f, "Protocol violation in {}: {}", component, detail),
            SimError::UnregisteredFrame { component, key } => write!(f, "{} used unregistered frame {}", component, key),
            SimError::UnknownBus { component, bus } => write!(f, "{} failed to find bus \"{}\"", component, bus),
            SimError::CapacityViolation { component, bus, capacity } => {
                write!(f, "{} overfilled the hardware buffer of bus \"{}\" (capacity {})", component, bus, capacity)
            }
            SimError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for SimError {}
