//! Transmission task.
//!
//! Logicals hand their output frames to this task. A frame goes straight to
//! the bus's transmit buffer when there is room and nothing is waiting for the
//! same key; otherwise it waits in the software buffer until the task runs
//! and drains what fits.

use embassy_time::Duration;
use std::collections::BTreeMap;

use crate::buffers::{FlowControlledQueue, Submission};
use crate::error::SimError;
use crate::kernel::task::{Schedulable, TaskCore};
use crate::kernel::task_state::TaskState;
use crate::simulation::engine::{Component, ComponentId, Context, TimerSlot};
use crate::simulation::observer::ObserverHandle;
use crate::simulation::types::{BusId, Frame, FrameKey, Message, TimerKind};

use super::TaskParams;

pub struct SourceApp {
    core: TaskCore,
    priority: i64,
    period: Duration,
    queue: FlowControlledQueue<Frame>,
    hardware: BTreeMap<BusId, ComponentId>,
    rewake: TimerSlot,
    forwarded: u64,
}

impl SourceApp {
    pub fn new(name: &str, scheduler: ComponentId, params: TaskParams, observer: ObserverHandle) -> Self {
        SourceApp {
            core: TaskCore::new(name, scheduler, params.execution_time),
            priority: params.priority,
            period: params.period,
            queue: FlowControlledQueue::new(name, observer),
            hardware: BTreeMap::new(),
            rewake: TimerSlot::new(TimerKind::Rewake),
            forwarded: 0,
        }
    }

    /// Connect the transmit buffer `endpoint` of `bus`, which holds at most
    /// `capacity` frames.
    pub fn add_bus(&mut self, bus: BusId, capacity: usize, endpoint: ComponentId) -> Result<(), SimError> {
        self.queue.add_stage(bus.clone(), capacity)?;
        self.hardware.insert(bus, endpoint);
        Ok(())
    }

    /// Declare that frames with `key` are transmitted by this task.
    pub fn register_transmission(&mut self, key: FrameKey) -> Result<(), SimError> {
        log::debug!("{} transmits {}", self.core.name(), key);
        self.queue.register_output(key)
    }

    pub fn queue(&self) -> &FlowControlledQueue<Frame> {
        &self.queue
    }

    pub fn state(&self) -> TaskState {
        self.core.state()
    }

    /// Frames handed to transmit buffers so far.
    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    fn forward(&mut self, key: &FrameKey, frame: Frame, ctx: &mut Context<'_>) -> Result<(), SimError> {
        let Some(endpoint) = self.hardware.get(&key.bus) else {
            return Err(SimError::UnknownBus {
                component: self.core.name().to_string(),
                bus: key.bus.clone(),
            });
        };
        log::debug!("{} forwarding {} #{}", self.core.name(), key, frame.sequence);
        ctx.send(*endpoint, Message::Frame(frame));
        self.forwarded += 1;
        Ok(())
    }

    fn wake(&mut self, ctx: &mut Context<'_>) -> Result<(), SimError> {
        self.rewake.disarm(ctx);
        self.core.request_ready(ctx)
    }

    fn on_frame(&mut self, frame: Frame, ctx: &mut Context<'_>) -> Result<(), SimError> {
        let key = frame.key.clone();
        match self.queue.submit(&key, frame)? {
            Submission::Forward(frame) => self.forward(&key, frame, ctx),
            Submission::Buffered | Submission::Replaced => {
                if self.core.state() == TaskState::Blocked {
                    self.wake(ctx)?;
                }
                Ok(())
            }
        }
    }

    fn on_occupancy(&mut self, bus: BusId, length: usize, accepted: u64, ctx: &mut Context<'_>) -> Result<(), SimError> {
        let room = self.queue.update_occupancy(&bus, length, accepted)?;
        if room && self.core.state() == TaskState::Blocked {
            log::debug!("{} woken by free space on {}", self.core.name(), bus);
            self.wake(ctx)?;
        }
        Ok(())
    }

    fn on_execution_finished(&mut self, ctx: &mut Context<'_>) -> Result<(), SimError> {
        for (key, frame) in self.queue.drain() {
            self.forward(&key, frame, ctx)?;
        }
        self.core.block(ctx)?;
        if self.queue.pending() > 0 {
            self.rewake.arm(ctx, self.period);
        }
        Ok(())
    }

    /// Every other way out of Blocked disarms the rewake, so it always finds
    /// the task waiting.
    fn on_rewake(&mut self, ctx: &mut Context<'_>) -> Result<(), SimError> {
        if self.core.state() != TaskState::Blocked {
            return Err(SimError::protocol(
                self.core.name(),
                format!("rewake while {:?}", self.core.state()),
            ));
        }
        self.core.request_ready(ctx)
    }
}

impl Schedulable for SourceApp {
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

impl Component for SourceApp {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn handle(&mut self, from: Option<ComponentId>, message: Message, ctx: &mut Context<'_>) -> Result<(), SimError> {
        match message {
            Message::Frame(frame) => self.on_frame(frame, ctx),
            Message::Occupancy { bus, length, accepted } => self.on_occupancy(bus, length, accepted, ctx),
            Message::Scheduler(state) if from == Some(self.core.scheduler()) => self.on_scheduler_event(state, ctx),
            Message::Timer(timer, TimerKind::ExecutionFinished) => {
                if self.core.execution_finished(timer)? {
                    self.on_execution_finished(ctx)?;
                }
                Ok(())
            }
            Message::Timer(timer, TimerKind::Rewake) if self.rewake.fired(timer) => self.on_rewake(ctx),
            other => Err(SimError::protocol(self.core.name(), format!("unexpected message {:?}", other))),
        }
    }

    fn as_task(&self) -> Option<&dyn Schedulable> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::engine::Effect;
    use crate::simulation::observer::Recorder;
    use embassy_time::Instant;

    const SCHEDULER: ComponentId = ComponentId(0);
    const HARDWARE: ComponentId = ComponentId(9);

    fn source(recorder: &Recorder, capacity: usize) -> SourceApp {
        let params = TaskParams {
            priority: 4,
            period: Duration::from_micros(2_000),
            execution_time: Duration::from_micros(20),
        };
        let mut source = SourceApp::new("source", SCHEDULER, params, recorder.handle());
        source.add_bus(BusId::new("B1"), capacity, HARDWARE).unwrap();
        for id in [1, 2] {
            source.register_transmission(FrameKey::new("B1", id)).unwrap();
        }
        source
    }

    fn frame(id: u32, sequence: u64) -> Message {
        Message::Frame(Frame::new(FrameKey::new("B1", id), sequence, Instant::from_ticks(0)))
    }

    fn occupancy(length: usize, accepted: u64) -> Message {
        Message::Occupancy {
            bus: BusId::new("B1"),
            length,
            accepted,
        }
    }

    fn to_hardware(ctx: &Context<'_>) -> Vec<u64> {
        ctx.sent()
            .into_iter()
            .filter_map(|(to, m)| match (to, m) {
                (HARDWARE, Message::Frame(f)) => Some(f.sequence),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn forwards_directly_until_the_hardware_is_full() {
        let recorder = Recorder::new();
        let mut source = source(&recorder, 1);
        let mut counter = 0;
        let mut ctx = Context::new(ComponentId(1), Instant::from_ticks(0), &mut counter, &[]);
        source.handle(None, frame(1, 1), &mut ctx).unwrap();
        source.handle(None, frame(2, 2), &mut ctx).unwrap();
        assert_eq!(to_hardware(&ctx), vec![1]);
        assert!(ctx.sent().contains(&(SCHEDULER, &Message::Scheduler(TaskState::Ready))));
        assert_eq!(source.state(), TaskState::Ready);
        assert_eq!(source.queue().pending(), 1);
    }

    #[test]
    fn free_space_wakes_a_blocked_task_with_pending_frames() {
        let recorder = Recorder::new();
        let mut source = source(&recorder, 1);
        let mut counter = 0;

        // Fill the hardware, buffer one frame, run once without room to drain.
        let timer = {
            let mut ctx = Context::new(ComponentId(1), Instant::from_ticks(0), &mut counter, &[]);
            source.handle(None, frame(1, 1), &mut ctx).unwrap();
            source.handle(None, frame(2, 2), &mut ctx).unwrap();
            source.handle(Some(SCHEDULER), Message::Scheduler(TaskState::Running), &mut ctx).unwrap();
            match ctx.into_effects().pop() {
                Some(Effect::Schedule { timer, .. }) => timer,
                other => panic!("expected an execution timer, got {:?}", other),
            }
        };
        {
            let mut ctx = Context::new(ComponentId(1), Instant::from_micros(20), &mut counter, &[]);
            source.handle(None, Message::Timer(timer, TimerKind::ExecutionFinished), &mut ctx).unwrap();
            assert!(to_hardware(&ctx).is_empty());
            assert_eq!(source.state(), TaskState::Blocked);
            let rewake_at: Vec<Instant> = ctx
                .effects()
                .iter()
                .filter_map(|e| match e {
                    Effect::Schedule {
                        at,
                        kind: TimerKind::Rewake,
                        ..
                    } => Some(*at),
                    _ => None,
                })
                .collect();
            assert_eq!(rewake_at, vec![Instant::from_micros(2_020)]);
        }

        // A report that still shows a full buffer changes nothing.
        let mut ctx = Context::new(ComponentId(1), Instant::from_micros(30), &mut counter, &[]);
        source.handle(None, occupancy(1, 1), &mut ctx).unwrap();
        assert!(ctx.sent().is_empty());
        source.handle(None, occupancy(0, 1), &mut ctx).unwrap();
        assert_eq!(ctx.sent(), vec![(SCHEDULER, &Message::Scheduler(TaskState::Ready))]);
        // The pending rewake is no longer needed.
        assert!(ctx.effects().iter().any(|e| matches!(e, Effect::Cancel(_))));
    }

    #[test]
    fn completion_drains_what_fits_in_key_order() {
        let recorder = Recorder::new();
        let mut source = source(&recorder, 2);
        let mut counter = 0;
        let timer = {
            let mut ctx = Context::new(ComponentId(1), Instant::from_ticks(0), &mut counter, &[]);
            source.handle(None, frame(1, 1), &mut ctx).unwrap();
            source.handle(None, frame(2, 2), &mut ctx).unwrap();
            source.handle(None, frame(2, 3), &mut ctx).unwrap();
            source.handle(None, frame(1, 4), &mut ctx).unwrap();
            source.handle(None, frame(1, 5), &mut ctx).unwrap();
            assert_eq!(to_hardware(&ctx), vec![1, 2]);
            source.handle(None, occupancy(0, 2), &mut ctx).unwrap();
            source.handle(Some(SCHEDULER), Message::Scheduler(TaskState::Running), &mut ctx).unwrap();
            match ctx.into_effects().pop() {
                Some(Effect::Schedule { timer, .. }) => timer,
                other => panic!("expected an execution timer, got {:?}", other),
            }
        };
        assert_eq!(recorder.counters(&FrameKey::new("B1", 1)).overruns, 1);

        let mut ctx = Context::new(ComponentId(1), Instant::from_micros(20), &mut counter, &[]);
        source.handle(None, Message::Timer(timer, TimerKind::ExecutionFinished), &mut ctx).unwrap();
        assert_eq!(to_hardware(&ctx), vec![5, 3]);
        assert_eq!(source.queue().pending(), 0);
        assert_eq!(source.forwarded(), 4);
        assert!(!ctx.effects().iter().any(|e| matches!(e, Effect::Schedule { kind: TimerKind::Rewake, .. })));
    }

    #[test]
    fn unregistered_output_is_fatal() {
        let recorder = Recorder::new();
        let mut source = source(&recorder, 1);
        let mut counter = 0;
        let mut ctx = Context::new(ComponentId(1), Instant::from_ticks(0), &mut counter, &[]);
        assert!(matches!(
            source.handle(None, frame(3, 1), &mut ctx),
            Err(SimError::UnregisteredFrame { .. })
        ));
        assert!(matches!(
            source.register_transmission(FrameKey::new("B7", 1)),
            Err(SimError::UnknownBus { .. })
        ));
    }

    #[test]
    fn rewake_requests_ready_and_only_fires_on_a_waiting_task() {
        let recorder = Recorder::new();
        let mut source = source(&recorder, 1);
        let mut counter = 0;
        let finish = |source: &mut SourceApp, counter: &mut u64, at: u64| {
            let timer = {
                let mut ctx = Context::new(ComponentId(1), Instant::from_micros(at), counter, &[]);
                source.handle(Some(SCHEDULER), Message::Scheduler(TaskState::Running), &mut ctx).unwrap();
                match ctx.into_effects().pop() {
                    Some(Effect::Schedule { timer, .. }) => timer,
                    other => panic!("expected an execution timer, got {:?}", other),
                }
            };
            let mut ctx = Context::new(ComponentId(1), Instant::from_micros(at + 20), counter, &[]);
            source.handle(None, Message::Timer(timer, TimerKind::ExecutionFinished), &mut ctx).unwrap();
            ctx.effects()
                .iter()
                .find_map(|e| match e {
                    Effect::Schedule {
                        timer,
                        kind: TimerKind::Rewake,
                        ..
                    } => Some(*timer),
                    _ => None,
                })
                .unwrap()
        };

        {
            let mut ctx = Context::new(ComponentId(1), Instant::from_ticks(0), &mut counter, &[]);
            source.handle(None, frame(1, 1), &mut ctx).unwrap();
            source.handle(None, frame(2, 2), &mut ctx).unwrap();
        }
        let rewake = finish(&mut source, &mut counter, 0);
        {
            let mut ctx = Context::new(ComponentId(1), Instant::from_micros(2_020), &mut counter, &[]);
            source.handle(None, Message::Timer(rewake, TimerKind::Rewake), &mut ctx).unwrap();
            assert_eq!(ctx.sent(), vec![(SCHEDULER, &Message::Scheduler(TaskState::Ready))]);
        }

        // Still no room: the next rewake is armed again. Leaving Blocked
        // behind the timer's back is a coordination bug.
        let rewake = finish(&mut source, &mut counter, 2_100);
        let mut ctx = Context::new(ComponentId(1), Instant::from_micros(2_200), &mut counter, &[]);
        source.core.request_ready(&mut ctx).unwrap();
        let err = source.handle(None, Message::Timer(rewake, TimerKind::Rewake), &mut ctx).unwrap_err();
        assert!(matches!(err, SimError::ProtocolViolation { .. }));
        assert!(recorder.activation_overruns().is_empty());
    }
}
