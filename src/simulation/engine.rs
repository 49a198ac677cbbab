//! Discrete-event engine driving every component of a bench.
//!
//! Components never touch the queue directly. Each event is handed to its
//! target together with a [`Context`] that records what the component wants
//! to happen next (send a message, arm a timer, cancel a timer). The engine
//! applies those effects once the handler returns.
//!
//! Ordering: events are keyed by `(virtual time, lane, insertion sequence)`.
//! At one instant every message is delivered before any timer fires, and
//! within a lane events keep the order they were queued in. A message sent
//! while handling an event is therefore delivered at the same instant, ahead
//! of timers still due at that instant.
//!
//! Two timers due at the same instant fire in the order they were armed. When
//! a task's execution timer and the scheduler's tick coincide, the one armed
//! earlier wins. If the execution timer fires first, the task's Blocked report
//! reaches the scheduler before the tick. If the tick fires first, its Paused
//! notification reaches the task before the execution timer, which the pause
//! cancels; the task is left paused with no budget and finishes as soon as it
//! is resumed.

use embassy_time::{Duration, Instant};
use std::collections::{BTreeMap, HashMap};

use crate::error::SimError;
use crate::kernel::task::Schedulable;

use super::types::{Message, TimerKind};

/// Endpoint address of a component inside one [`Simulation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentId(pub usize);

impl std::fmt::Display for ComponentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle of a scheduled timer. Only meaningful to the component that armed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// Static description of a task as seen by the scheduler it is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskProfile {
    pub id: ComponentId,
    pub name: String,
    pub priority: i64,
    pub period: Duration,
}

/// A simulated module. Handlers run to completion; they must not block.
pub trait Component {
    fn name(&self) -> &str;

    /// Called once per initialization stage, in component insertion order.
    /// Stage 0 runs for every component before stage 1 runs for any.
    fn initialize(&mut self, _stage: u8, _ctx: &mut Context<'_>) -> Result<(), SimError> {
        Ok(())
    }

    fn handle(&mut self, from: Option<ComponentId>, message: Message, ctx: &mut Context<'_>) -> Result<(), SimError>;

    /// Components that can be scheduled expose their task capability here.
    fn as_task(&self) -> Option<&dyn Schedulable> {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Send { to: ComponentId, message: Message },
    Schedule { timer: TimerId, at: Instant, kind: TimerKind },
    Cancel(TimerId),
}

/// Per-event view of the engine handed to a component.
pub struct Context<'a> {
    me: ComponentId,
    now: Instant,
    next_timer: &'a mut u64,
    roster: &'a [TaskProfile],
    effects: Vec<Effect>,
}

impl<'a> Context<'a> {
    pub fn new(me: ComponentId, now: Instant, next_timer: &'a mut u64, roster: &'a [TaskProfile]) -> Self {
        Context {
            me,
            now,
            next_timer,
            roster,
            effects: Vec::new(),
        }
    }

    pub fn me(&self) -> ComponentId {
        self.me
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    /// Tasks attached to this component (only populated for schedulers).
    pub fn attached_tasks(&self) -> &[TaskProfile] {
        self.roster
    }

    pub fn send(&mut self, to: ComponentId, message: Message) {
        self.effects.push(Effect::Send { to, message });
    }

    pub fn schedule_at(&mut self, at: Instant, kind: TimerKind) -> TimerId {
        let timer = TimerId(*self.next_timer);
        *self.next_timer += 1;
        let at = at.max(self.now);
        self.effects.push(Effect::Schedule { timer, at, kind });
        timer
    }

    pub fn schedule_after(&mut self, delay: Duration, kind: TimerKind) -> TimerId {
        let at = self.now + delay;
        self.schedule_at(at, kind)
    }

    /// Cancelling a timer that already fired or was already cancelled is a no-op.
    pub fn cancel(&mut self, timer: TimerId) {
        self.effects.push(Effect::Cancel(timer));
    }

    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    /// Messages sent so far, in order.
    pub fn sent(&self) -> Vec<(ComponentId, &Message)> {
        self.effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::Send { to, message } => Some((*to, message)),
                _ => None,
            })
            .collect()
    }

    pub fn into_effects(self) -> Vec<Effect> {
        self.effects
    }
}

/// A component's reusable timer, the equivalent of a self-message that is
/// rescheduled over and over.
#[derive(Debug)]
pub struct TimerSlot {
    kind: TimerKind,
    pending: Option<TimerId>,
    armed_at: Instant,
}

impl TimerSlot {
    pub fn new(kind: TimerKind) -> Self {
        TimerSlot {
            kind,
            pending: None,
            armed_at: Instant::from_ticks(0),
        }
    }

    /// Cancel any pending instance, then schedule a fresh one `delay` from now.
    pub fn arm(&mut self, ctx: &mut Context<'_>, delay: Duration) {
        self.disarm(ctx);
        self.pending = Some(ctx.schedule_after(delay, self.kind));
        self.armed_at = ctx.now();
    }

    pub fn disarm(&mut self, ctx: &mut Context<'_>) {
        if let Some(timer) = self.pending.take() {
            ctx.cancel(timer);
        }
    }

    /// Consume a timer event. Returns false when `timer` is not the pending
    /// instance of this slot.
    pub fn fired(&mut self, timer: TimerId) -> bool {
        if self.pending == Some(timer) {
            self.pending = None;
            true
        } else {
            false
        }
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    /// Virtual time of the last `arm` call.
    pub fn armed_at(&self) -> Instant {
        self.armed_at
    }
}

/// Delivery class of an event at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Lane {
    Message,
    Timer,
}

type EventKey = (Instant, Lane, u64);

struct Pending {
    from: Option<ComponentId>,
    to: ComponentId,
    message: Message,
}

/// The event queue plus every component of a bench.
pub struct Simulation {
    components: Vec<Box<dyn Component>>,
    rosters: HashMap<ComponentId, Vec<TaskProfile>>,
    queue: BTreeMap<EventKey, Pending>,
    timers: HashMap<TimerId, EventKey>,
    sequence: u64,
    next_timer: u64,
    now: Instant,
    initialized: bool,
    processed: u64,
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulation {
    pub fn new() -> Self {
        Simulation {
            components: Vec::new(),
            rosters: HashMap::new(),
            queue: BTreeMap::new(),
            timers: HashMap::new(),
            sequence: 0,
            next_timer: 0,
            now: Instant::from_ticks(0),
            initialized: false,
            processed: 0,
        }
    }

    /// Id the next added component will get.
    pub fn next_id(&self) -> ComponentId {
        ComponentId(self.components.len())
    }

    pub fn add(&mut self, component: Box<dyn Component>) -> ComponentId {
        let id = ComponentId(self.components.len());
        log::debug!("Added component {} as {}", component.name(), id);
        self.components.push(component);
        id
    }

    /// Attach a schedulable component to a scheduler. The scheduler discovers
    /// its tasks during initialization stage 1.
    pub fn attach(&mut self, scheduler: ComponentId, task: ComponentId) -> Result<(), SimError> {
        if scheduler.0 >= self.components.len() {
            return Err(SimError::Configuration(format!("scheduler {} does not exist", scheduler)));
        }
        let component = self
            .components
            .get(task.0)
            .ok_or_else(|| SimError::Configuration(format!("task {} does not exist", task)))?;
        let profile = match component.as_task() {
            Some(schedulable) => TaskProfile {
                id: task,
                name: component.name().to_string(),
                priority: schedulable.priority(),
                period: schedulable.period(),
            },
            None => {
                return Err(SimError::Configuration(format!("{} is not a schedulable task", component.name())));
            }
        };
        let roster = self.rosters.entry(scheduler).or_default();
        if roster.iter().any(|p| p.id == task) {
            return Err(SimError::Configuration(format!("{} attached twice to the same scheduler", profile.name)));
        }
        roster.push(profile);
        Ok(())
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    /// Number of events handled so far.
    pub fn processed_events(&self) -> u64 {
        self.processed
    }

    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    /// Queue an externally originated message.
    pub fn inject(&mut self, at: Instant, to: ComponentId, message: Message) {
        let at = at.max(self.now);
        self.push(at, Lane::Message, None, to, message);
    }

    pub fn initialize(&mut self) -> Result<(), SimError> {
        if self.initialized {
            return Ok(());
        }
        self.initialized = true;
        for stage in 0..2u8 {
            for index in 0..self.components.len() {
                let id = ComponentId(index);
                let roster = self.rosters.get(&id).map(Vec::as_slice).unwrap_or(&[]);
                let mut ctx = Context::new(id, self.now, &mut self.next_timer, roster);
                self.components[index].initialize(stage, &mut ctx)?;
                let effects = ctx.into_effects();
                self.apply(id, effects);
            }
        }
        Ok(())
    }

    /// Process every event scheduled at or before `end`, then park the clock
    /// at `end`. The first error returned by a component aborts the run.
    pub fn run_until(&mut self, end: Instant) -> Result<(), SimError> {
        self.initialize()?;
        while let Some((&(at, _, _), _)) = self.queue.first_key_value() {
            if at > end {
                break;
            }
            let Some((key, pending)) = self.queue.pop_first() else {
                break;
            };
            if let Message::Timer(timer, _) = &pending.message {
                if self.timers.remove(timer) != Some(key) {
                    log::warn!("Timer {:?} fired without being registered", timer);
                }
            }
            self.now = at;
            self.dispatch(pending)?;
        }
        if end > self.now {
            self.now = end;
        }
        Ok(())
    }

    fn dispatch(&mut self, pending: Pending) -> Result<(), SimError> {
        let Pending { from, to, message } = pending;
        let Some(component) = self.components.get_mut(to.0) else {
            return Err(SimError::Configuration(format!("message addressed to unknown component {}", to)));
        };
        let roster = self.rosters.get(&to).map(Vec::as_slice).unwrap_or(&[]);
        let mut ctx = Context::new(to, self.now, &mut self.next_timer, roster);
        component.handle(from, message, &mut ctx)?;
        let effects = ctx.into_effects();
        self.processed += 1;
        self.apply(to, effects);
        Ok(())
    }

    fn apply(&mut self, me: ComponentId, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Send { to, message } => {
                    let now = self.now;
                    self.push(now, Lane::Message, Some(me), to, message);
                }
                Effect::Schedule { timer, at, kind } => {
                    let key = self.push(at, Lane::Timer, Some(me), me, Message::Timer(timer, kind));
                    self.timers.insert(timer, key);
                }
                Effect::Cancel(timer) => {
                    if let Some(key) = self.timers.remove(&timer) {
                        self.queue.remove(&key);
                    }
                }
            }
        }
    }

    fn push(&mut self, at: Instant, lane: Lane, from: Option<ComponentId>, to: ComponentId, message: Message) -> EventKey {
        let key = (at, lane, self.sequence);
        self.sequence += 1;
        self.queue.insert(key, Pending { from, to, message });
        key
    }
}
