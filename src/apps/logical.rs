//! Periodic compute task.
//!
//! Every period the task asks to run. When an activation starts it requests
//! the latest value of each input from the reception task; when it completes
//! it hands one fresh frame per output to the transmission task. The age of
//! every real input it reads is reported to the observer.

use embassy_time::{Duration, Instant};
use std::collections::BTreeMap;

use crate::error::SimError;
use crate::kernel::task::{Activation, Schedulable, TaskCore};
use crate::kernel::task_state::TaskState;
use crate::simulation::engine::{Component, ComponentId, Context, TimerSlot};
use crate::simulation::observer::ObserverHandle;
use crate::simulation::types::{Frame, FrameKey, Message, TimerKind};

use super::TaskParams;

pub struct LogicalApp {
    core: TaskCore,
    priority: i64,
    period: Duration,
    offset: Duration,
    sink: ComponentId,
    source: ComponentId,
    inputs: Vec<FrameKey>,
    outputs: Vec<FrameKey>,
    activation: TimerSlot,
    received: BTreeMap<FrameKey, Frame>,
    sequence: u64,
    completed: u64,
    observer: ObserverHandle,
}

impl LogicalApp {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        scheduler: ComponentId,
        params: TaskParams,
        offset: Duration,
        sink: ComponentId,
        source: ComponentId,
        inputs: Vec<FrameKey>,
        outputs: Vec<FrameKey>,
        observer: ObserverHandle,
    ) -> Self {
        LogicalApp {
            core: TaskCore::new(name, scheduler, params.execution_time),
            priority: params.priority,
            period: params.period,
            offset,
            sink,
            source,
            inputs,
            outputs,
            activation: TimerSlot::new(TimerKind::Activation),
            received: BTreeMap::new(),
            sequence: 0,
            completed: 0,
            observer,
        }
    }

    pub fn state(&self) -> TaskState {
        self.core.state()
    }

    /// Number of activations that ran to completion.
    pub fn completed(&self) -> u64 {
        self.completed
    }

    fn on_activation(&mut self, ctx: &mut Context<'_>) -> Result<(), SimError> {
        if self.core.state() == TaskState::Blocked {
            self.core.request_ready(ctx)?;
        } else {
            self.observer.activation_overrun(ctx.now(), self.core.name());
        }
        self.activation.arm(ctx, self.period);
        Ok(())
    }

    fn request_inputs(&mut self, ctx: &mut Context<'_>) {
        self.received.clear();
        for key in &self.inputs {
            ctx.send(self.sink, Message::FrameRequest(key.clone()));
        }
    }

    fn on_reply(&mut self, from: Option<ComponentId>, frame: Frame, now: Instant) -> Result<(), SimError> {
        if from != Some(self.sink) || !self.inputs.contains(&frame.key) {
            return Err(SimError::protocol(self.core.name(), format!("unsolicited frame reply for {}", frame.key)));
        }
        if !matches!(self.core.state(), TaskState::Running | TaskState::Paused) {
            return Err(SimError::protocol(
                self.core.name(),
                format!("frame reply for {} while {:?}", frame.key, self.core.state()),
            ));
        }
        if !frame.placeholder {
            self.observer.frame_age(
                self.core.name(),
                &frame.key,
                now.saturating_duration_since(frame.generation_time),
                now.saturating_duration_since(frame.origin_time),
            );
        }
        self.received.insert(frame.key.clone(), frame);
        Ok(())
    }

    /// Earliest origin among the real inputs of this activation.
    fn origin_time(&self, now: Instant) -> Instant {
        self.received
            .values()
            .filter(|frame| !frame.placeholder)
            .map(|frame| frame.origin_time)
            .min()
            .unwrap_or(now)
    }

    fn on_execution_finished(&mut self, ctx: &mut Context<'_>) -> Result<(), SimError> {
        let now = ctx.now();
        let origin = self.origin_time(now);
        for key in &self.outputs {
            self.sequence += 1;
            let mut frame = Frame::new(key.clone(), self.sequence, now);
            frame.origin_time = origin;
            ctx.send(self.source, Message::Frame(frame));
        }
        self.received.clear();
        self.completed += 1;
        self.core.block(ctx)
    }
}

impl Schedulable for LogicalApp {
    fn priority(&self) -> i64 {
        self.priority
    }

    fn period(&self) -> Duration {
        self.period
    }

    fn on_scheduler_event(&mut self, state: TaskState, ctx: &mut Context<'_>) -> Result<(), SimError> {
        if self.core.on_scheduler_event(state, ctx)? == Some(Activation::Started) {
            self.request_inputs(ctx);
        }
        Ok(())
    }
}

impl Component for LogicalApp {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn initialize(&mut self, stage: u8, ctx: &mut Context<'_>) -> Result<(), SimError> {
        if stage == 0 {
            self.activation.arm(ctx, self.offset);
        }
        Ok(())
    }

    fn handle(&mut self, from: Option<ComponentId>, message: Message, ctx: &mut Context<'_>) -> Result<(), SimError> {
        match message {
            Message::Scheduler(state) if from == Some(self.core.scheduler()) => self.on_scheduler_event(state, ctx),
            Message::FrameReply(frame) => self.on_reply(from, frame, ctx.now()),
            Message::Timer(timer, TimerKind::Activation) if self.activation.fired(timer) => self.on_activation(ctx),
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
