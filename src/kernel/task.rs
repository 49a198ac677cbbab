//! Task-side half of the scheduling protocol.
//!
//! Every application task embeds a [`TaskCore`]. It owns the task's state, the
//! execution timer and the remaining execution budget, and it is the only
//! place that talks to the scheduler on the task's behalf.

use embassy_time::Duration;

use crate::error::SimError;
use crate::simulation::engine::{ComponentId, Context, TimerId, TimerSlot};
use crate::simulation::types::{Message, TimerKind};

use super::task_state::TaskState;

/// Capability every schedulable task provides to the scheduler.
pub trait Schedulable {
    /// Higher value wins arbitration.
    fn priority(&self) -> i64;
    /// Activation period. Informational for the scheduler.
    fn period(&self) -> Duration;
    /// The scheduler dispatched (`Running`) or preempted (`Paused`) the task.
    fn on_scheduler_event(&mut self, state: TaskState, ctx: &mut Context<'_>) -> Result<(), SimError>;
}

/// What a `Running` notification meant for the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Ready -> Running: a new activation with a full budget.
    Started,
    /// Paused -> Running: continue with whatever budget was left.
    Resumed,
}

#[derive(Debug)]
pub struct TaskCore {
    name: String,
    scheduler: ComponentId,
    state: TaskState,
    execution_time: Duration,
    remaining: Duration,
    execution: TimerSlot,
}

impl TaskCore {
    pub fn new(name: &str, scheduler: ComponentId, execution_time: Duration) -> Self {
        TaskCore {
            name: name.to_string(),
            scheduler,
            state: TaskState::Blocked,
            execution_time,
            remaining: execution_time,
            execution: TimerSlot::new(TimerKind::ExecutionFinished),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scheduler(&self) -> ComponentId {
        self.scheduler
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Budget left for the current activation.
    pub fn remaining(&self) -> Duration {
        self.remaining
    }

    fn set_state(&mut self, next: TaskState) -> Result<(), SimError> {
        self.state = self.state.transition(next).map_err(|e| SimError::transition(&self.name, e))?;
        Ok(())
    }

    /// Blocked -> Ready, telling the scheduler there is work to do.
    pub fn request_ready(&mut self, ctx: &mut Context<'_>) -> Result<(), SimError> {
        self.set_state(TaskState::Ready)?;
        ctx.send(self.scheduler, Message::Scheduler(TaskState::Ready));
        Ok(())
    }

    /// Running -> Blocked, yielding the processor until new work arrives.
    pub fn block(&mut self, ctx: &mut Context<'_>) -> Result<(), SimError> {
        self.set_state(TaskState::Blocked)?;
        self.execution.disarm(ctx);
        ctx.send(self.scheduler, Message::Scheduler(TaskState::Blocked));
        Ok(())
    }

    /// Apply a notification from the scheduler. Returns the kind of
    /// activation on `Running`, `None` on `Paused`.
    pub fn on_scheduler_event(&mut self, state: TaskState, ctx: &mut Context<'_>) -> Result<Option<Activation>, SimError> {
        match state {
            TaskState::Running => self.resume(ctx).map(Some),
            TaskState::Paused => {
                self.pause(ctx)?;
                Ok(None)
            }
            TaskState::Ready | TaskState::Blocked => {
                Err(SimError::protocol(&self.name, format!("received illegal task state {:?} from scheduler", state)))
            }
        }
    }

    fn resume(&mut self, ctx: &mut Context<'_>) -> Result<Activation, SimError> {
        let activation = match self.state {
            TaskState::Ready => {
                self.remaining = self.execution_time;
                Activation::Started
            }
            TaskState::Paused => Activation::Resumed,
            other => {
                return Err(SimError::protocol(&self.name, format!("received resume while state was {:?}", other)));
            }
        };
        self.set_state(TaskState::Running)?;
        self.execution.arm(ctx, self.remaining);
        log::debug!("{} {:?} with {} us left", self.name, activation, self.remaining.as_micros());
        Ok(activation)
    }

    fn pause(&mut self, ctx: &mut Context<'_>) -> Result<(), SimError> {
        if self.state != TaskState::Running {
            return Err(SimError::protocol(&self.name, format!("received pause while state was {:?}", self.state)));
        }
        let elapsed = ctx.now() - self.execution.armed_at();
        self.remaining = self.remaining.checked_sub(elapsed).unwrap_or(Duration::from_ticks(0));
        self.execution.disarm(ctx);
        self.set_state(TaskState::Paused)?;
        log::debug!("{} paused with {} us left", self.name, self.remaining.as_micros());
        Ok(())
    }

    /// Consume the execution timer. Returns `Ok(false)` for timers that are
    /// not this task's pending execution timer.
    pub fn execution_finished(&mut self, timer: TimerId) -> Result<bool, SimError> {
        if !self.execution.fired(timer) {
            return Ok(false);
        }
        if self.state != TaskState::Running {
            return Err(SimError::protocol(&self.name, "execution finished while not in running state"));
        }
        self.remaining = Duration::from_ticks(0);
        Ok(true)
    }
}
