//! Task state vocabulary shared by the scheduler and every task.
//!
//! ```text
//!            new work               dispatch
//!  Blocked ───────────► Ready ───────────────► Running ◄──┐
//!     ▲                                         │   │      │ resume
//!     └──────────── yield (no more work) ───────┘   ▼      │
//!                                                 Paused ──┘
//!                                      preempt
//! ```

use serde::Serialize;

use crate::error::IllegalTransition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TaskState {
    Blocked,
    Ready,
    Running,
    Paused,
}

impl TaskState {
    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_become(self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (TaskState::Blocked, TaskState::Ready)
                | (TaskState::Ready, TaskState::Running)
                | (TaskState::Running, TaskState::Paused)
                | (TaskState::Paused, TaskState::Running)
                | (TaskState::Running, TaskState::Blocked)
        )
    }

    /// Validate and perform a transition.
    pub fn transition(self, next: TaskState) -> Result<TaskState, IllegalTransition> {
        if self.can_become(next) {
            Ok(next)
        } else {
            Err(IllegalTransition { from: self, to: next })
        }
    }
}
