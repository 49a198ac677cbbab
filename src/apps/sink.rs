//! Reception task.
//!
//! Frames delivered by the bus are collected while the task waits for the
//! processor. When its execution completes the whole batch is committed to the
//! mailbox at once, and logicals read the latest values through frame
//! requests that are answered immediately.

use embassy_time::Duration;
use std::collections::BTreeSet;

use crate::buffers::BufferedMailbox;
use crate::error::SimError;
use crate::kernel::task::{Schedulable, TaskCore};
use crate::kernel::task_state::TaskState;
use crate::simulation::engine::{Component, ComponentId, Context};
use crate::simulation::observer::ObserverHandle;
use crate::simulation::types::{BusId, Frame, FrameKey, Message, TimerKind};

use super::TaskParams;

pub struct SinkApp {
    core: TaskCore,
    priority: i64,
    period: Duration,
    buses: BTreeSet<BusId>,
    mailbox: BufferedMailbox<Frame>,
    received: Vec<Frame>,
    observer: ObserverHandle,
    commits: u64,
}

impl SinkApp {
    pub fn new(name: &str, scheduler: ComponentId, params: TaskParams, observer: ObserverHandle) -> Self {
        SinkApp {
            core: TaskCore::new(name, scheduler, params.execution_time),
            priority: params.priority,
            period: params.period,
            buses: BTreeSet::new(),
            mailbox: BufferedMailbox::new(name, observer.clone()),
            received: Vec::new(),
            observer,
            commits: 0,
        }
    }

    /// Attach the task to `bus`.
    pub fn add_bus(&mut self, bus: BusId) {
        self.buses.insert(bus);
    }

    /// Declare that frames with `key` are received by this task. The key's
    /// bus must have been added first.
    pub fn register_reception(&mut self, key: FrameKey) -> Result<(), SimError> {
        if !self.buses.contains(&key.bus) {
            return Err(SimError::UnknownBus {
                component: self.core.name().to_string(),
                bus: key.bus,
            });
        }
        log::debug!("{} receives {}", self.core.name(), key);
        self.mailbox.register(key);
        Ok(())
    }

    pub fn mailbox(&self) -> &BufferedMailbox<Frame> {
        &self.mailbox
    }

    pub fn state(&self) -> TaskState {
        self.core.state()
    }

    /// Frames received but not committed yet.
    pub fn pending(&self) -> usize {
        self.received.len()
    }

    /// Number of completed reception cycles.
    pub fn commits(&self) -> u64 {
        self.commits
    }

    fn on_frame(&mut self, frame: Frame, ctx: &mut Context<'_>) -> Result<(), SimError> {
        if !self.mailbox.is_registered(&frame.key) {
            return Err(SimError::UnregisteredFrame {
                component: self.core.name().to_string(),
                key: frame.key,
            });
        }
        self.received.push(frame);
        self.observer.buffer_depth(None, self.received.len());
        if self.core.state() == TaskState::Blocked {
            self.core.request_ready(ctx)?;
        }
        Ok(())
    }

    fn on_request(&mut self, from: Option<ComponentId>, key: FrameKey, ctx: &mut Context<'_>) -> Result<(), SimError> {
        let Some(requester) = from else {
            return Err(SimError::protocol(self.core.name(), format!("frame request for {} without a sender", key)));
        };
        let frame = self.mailbox.read_or_else(&key, || Frame::placeholder(key.clone()))?;
        ctx.send(requester, Message::FrameReply(frame));
        Ok(())
    }

    fn on_execution_finished(&mut self, ctx: &mut Context<'_>) -> Result<(), SimError> {
        if self.received.is_empty() {
            return Err(SimError::protocol(self.core.name(), "executed without any received frame"));
        }
        let batch = std::mem::take(&mut self.received);
        let size = batch.len();
        let overruns = self.mailbox.write_batch(batch.into_iter().map(|frame| (frame.key.clone(), frame)))?;
        self.commits += 1;
        self.observer.buffer_depth(None, 0);
        log::debug!("{} committed {} frames ({} overruns)", self.core.name(), size, overruns);
        self.core.block(ctx)
    }
}

impl Schedulable for SinkApp {
    fn priority(&self) -> i64 {
        self.priority
    }

    fn period(&self) -> Duration {
        self.period
    }

    fn on_scheduler_event(&mut self, state: TaskState, ctx: &mut Context<'_>) -> Result<(), SimError> {
        self.core.on_scheduler_event(state, ctx).map(|_| ())
    }
}

impl Component for SinkApp {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn handle(&mut self, from: Option<ComponentId>, message: Message, ctx: &mut Context<'_>) -> Result<(), SimError> {
        match message {
            Message::Frame(frame) => self.on_frame(frame, ctx),
            Message::FrameRequest(key) => self.on_request(from, key, ctx),
            Message::Scheduler(state) if from == Some(self.core.scheduler()) => self.on_scheduler_event(state, ctx),
            Message::Timer(timer, TimerKind::ExecutionFinished) => {
                if self.core.execution_finished(timer)? {
                    self.on_execution_finished(ctx)?;
                }
                Ok(())
            }
            other => Err(SimError::protocol(self.core.name(), format!("unexpected message {:?}", other))),
        }
    }

    fn as_task(&self) -> Option<&dyn Schedulable> {
        Some(self)
    }
}
