//! Bus-side collaborators of the frame tasks.
//!
//! - [`TransmitBuffer`]: the bus controller's bounded FIFO, putting one frame
//!   on the bus per frame time and reporting its length to the task feeding it
//! - [`TrafficGenerator`]: periodic frames coming from other nodes, with
//!   normally distributed jitter on the period

use embassy_time::Duration;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use std::collections::{BTreeMap, VecDeque};

use crate::error::SimError;

use super::engine::{Component, ComponentId, Context, TimerSlot};
use super::observer::ObserverHandle;
use super::types::{BusId, Frame, FrameKey, Message, TimerKind};

pub struct TransmitBuffer {
    name: String,
    bus: BusId,
    capacity: usize,
    frame_time: Duration,
    queue: VecDeque<Frame>,
    feeder: Option<ComponentId>,
    listeners: BTreeMap<FrameKey, Vec<ComponentId>>,
    transmit: TimerSlot,
    accepted: u64,
    transmitted: u64,
    observer: ObserverHandle,
}

impl TransmitBuffer {
    pub fn new(bus: BusId, capacity: usize, frame_time: Duration, observer: ObserverHandle) -> Self {
        TransmitBuffer {
            name: format!("txbuf-{}", bus),
            bus,
            capacity,
            frame_time,
            queue: VecDeque::with_capacity(capacity),
            feeder: None,
            listeners: BTreeMap::new(),
            transmit: TimerSlot::new(TimerKind::Transmit),
            accepted: 0,
            transmitted: 0,
            observer,
        }
    }

    /// The task that fills this buffer and receives its occupancy reports.
    pub fn set_feeder(&mut self, feeder: ComponentId) {
        self.feeder = Some(feeder);
    }

    /// Deliver transmitted frames with `key` to `listener`.
    pub fn add_listener(&mut self, key: FrameKey, listener: ComponentId) {
        let listeners = self.listeners.entry(key).or_default();
        if !listeners.contains(&listener) {
            listeners.push(listener);
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn transmitted(&self) -> u64 {
        self.transmitted
    }

    fn report(&self, ctx: &mut Context<'_>) {
        self.observer.buffer_depth(Some(&self.bus), self.queue.len());
        if let Some(feeder) = self.feeder {
            ctx.send(
                feeder,
                Message::Occupancy {
                    bus: self.bus.clone(),
                    length: self.queue.len(),
                    accepted: self.accepted,
                },
            );
        }
    }

    fn on_frame(&mut self, frame: Frame, ctx: &mut Context<'_>) -> Result<(), SimError> {
        if frame.key.bus != self.bus {
            return Err(SimError::UnknownBus {
                component: self.name.clone(),
                bus: frame.key.bus,
            });
        }
        if self.queue.len() >= self.capacity {
            return Err(SimError::CapacityViolation {
                component: self.name.clone(),
                bus: self.bus.clone(),
                capacity: self.capacity,
            });
        }
        self.queue.push_back(frame);
        self.accepted += 1;
        if !self.transmit.is_armed() {
            self.transmit.arm(ctx, self.frame_time);
        }
        self.report(ctx);
        Ok(())
    }

    fn on_transmitted(&mut self, ctx: &mut Context<'_>) {
        let Some(frame) = self.queue.pop_front() else {
            return;
        };
        self.transmitted += 1;
        if let Some(listeners) = self.listeners.get(&frame.key) {
            for listener in listeners {
                ctx.send(*listener, Message::Frame(frame.clone()));
            }
        }
        if !self.queue.is_empty() {
            self.transmit.arm(ctx, self.frame_time);
        }
        self.report(ctx);
    }
}

impl Component for TransmitBuffer {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&mut self, _from: Option<ComponentId>, message: Message, ctx: &mut Context<'_>) -> Result<(), SimError> {
        match message {
            Message::Frame(frame) => self.on_frame(frame, ctx),
            Message::Timer(timer, TimerKind::Transmit) if self.transmit.fired(timer) => {
                self.on_transmitted(ctx);
                Ok(())
            }
            other => Err(SimError::protocol(&self.name, format!("unexpected message {:?}", other))),
        }
    }
}

/// Periodic source of one frame key, standing in for another node on the bus.
pub struct TrafficGenerator {
    name: String,
    key: FrameKey,
    period: Duration,
    offset: Duration,
    jitter: Option<Normal<f64>>,
    targets: Vec<ComponentId>,
    rng: StdRng,
    timer: TimerSlot,
    sequence: u64,
}

impl TrafficGenerator {
    /// `jitter_us` is the standard deviation of the period in microseconds;
    /// zero disables jitter.
    pub fn new(key: FrameKey, period: Duration, jitter_us: f64, offset: Duration, rng: StdRng) -> Result<Self, SimError> {
        if period.as_micros() == 0 {
            return Err(SimError::Configuration(format!("traffic for {} needs a positive period", key)));
        }
        let jitter = if jitter_us > 0.0 {
            let normal = Normal::new(period.as_micros() as f64, jitter_us)
                .map_err(|e| SimError::Configuration(format!("traffic for {}: {}", key, e)))?;
            Some(normal)
        } else if jitter_us == 0.0 {
            None
        } else {
            return Err(SimError::Configuration(format!("traffic for {}: negative jitter", key)));
        };
        Ok(TrafficGenerator {
            name: format!("traffic-{}", key),
            key,
            period,
            offset,
            jitter,
            targets: Vec::new(),
            rng,
            timer: TimerSlot::new(TimerKind::Traffic),
            sequence: 0,
        })
    }

    pub fn add_target(&mut self, target: ComponentId) {
        if !self.targets.contains(&target) {
            self.targets.push(target);
        }
    }

    pub fn emitted(&self) -> u64 {
        self.sequence
    }

    fn next_delay(&mut self) -> Duration {
        match &self.jitter {
            Some(normal) => {
                let sample = normal.sample(&mut self.rng).max(0.0);
                Duration::from_micros(sample.round() as u64)
            }
            None => self.period,
        }
    }

    fn emit(&mut self, ctx: &mut Context<'_>) {
        self.sequence += 1;
        let frame = Frame::new(self.key.clone(), self.sequence, ctx.now());
        for target in &self.targets {
            ctx.send(*target, Message::Frame(frame.clone()));
        }
        let delay = self.next_delay();
        self.timer.arm(ctx, delay);
    }
}

impl Component for TrafficGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self, stage: u8, ctx: &mut Context<'_>) -> Result<(), SimError> {
        if stage == 0 {
            self.timer.arm(ctx, self.offset);
        }
        Ok(())
    }

    fn handle(&mut self, _from: Option<ComponentId>, message: Message, ctx: &mut Context<'_>) -> Result<(), SimError> {
        match message {
            Message::Timer(timer, TimerKind::Traffic) if self.timer.fired(timer) => {
                self.emit(ctx);
                Ok(())
            }
            other => Err(SimError::protocol(&self.name, format!("unexpected message {:?}", other))),
        }
    }
}
