//! Assembly of a runnable node from a scenario, and the report of a run.
//!
//! Component layout of a bench:
//!
//! ```text
//!                      +-----------+
//!        Ready/Blocked |           | Running/Paused
//!       +------------->| scheduler |-------------+
//!       |              +-----------+             |
//!       |                                        v
//!  traffic ---> sink <--- FrameRequest --- logicals ---> source ---> txbuf per bus
//!                 ^                                        ^            |
//!                 |                                        +-Occupancy--+
//!                 +---------- loopback of consumed keys ---------------+
//! ```

use embassy_time::{Duration, Instant};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::apps::{LogicalApp, SinkApp, SourceApp};
use crate::common::scenario::Scenario;
use crate::error::SimError;
use crate::kernel::scheduler::TaskScheduler;

use super::engine::{ComponentId, Simulation};
use super::observer::{AgeStats, DepthGauge, FrameAges, KeyCounters, Recorder};
use super::transmit::{TrafficGenerator, TransmitBuffer};
use super::types::{BusId, Frame, Message};

/// One recorder per concern, so counters of the same key stay apart.
#[derive(Clone, Default)]
pub struct Recorders {
    /// Scheduler arbitrations, task transitions, activation overruns and the
    /// age of the data logicals read.
    pub kernel: Recorder,
    /// Mailbox overruns and underruns, pending reception batch.
    pub sink: Recorder,
    /// Software buffer overruns and depths.
    pub source: Recorder,
    /// Transmit buffer depths.
    pub hardware: Recorder,
}

pub struct Bench {
    sim: Simulation,
    recorders: Recorders,
    run_time: Duration,
    scheduler: ComponentId,
    sink: ComponentId,
    source: ComponentId,
    logicals: Vec<(String, ComponentId)>,
}

impl Bench {
    pub fn build(scenario: &Scenario) -> Result<Self, SimError> {
        let recorders = Recorders::default();
        let mut sim = Simulation::new();

        let scheduler = TaskScheduler::new(
            "scheduler",
            Duration::from_micros(scenario.scheduler.execution_time_us),
            Duration::from_micros(scenario.scheduler.interarrival_time_us),
            StdRng::seed_from_u64(scenario.seed),
            recorders.kernel.handle(),
        )?;
        let scheduler_id = sim.add(Box::new(scheduler));

        let mut sink = SinkApp::new("sink", scheduler_id, scenario.sink.params(), recorders.sink.handle());
        for bus in scenario.bus_ids() {
            sink.add_bus(bus);
        }
        for logical in &scenario.logicals {
            for input in &logical.inputs {
                sink.register_reception(input.key())?;
            }
        }
        let sink_id = sim.add(Box::new(sink));

        // Transmit buffers go in first so the source can be wired to them;
        // the source takes the id right after the last buffer.
        let source_id = ComponentId(sim.next_id().0 + scenario.buses.len());
        let mut source = SourceApp::new("source", scheduler_id, scenario.source.params(), recorders.source.handle());
        for bus in &scenario.buses {
            let bus_id = BusId::new(&bus.name);
            let mut txbuf = TransmitBuffer::new(
                bus_id.clone(),
                bus.hardware_buffer_size,
                Duration::from_micros(bus.frame_time_us),
                recorders.hardware.handle(),
            );
            txbuf.set_feeder(source_id);
            for logical in &scenario.logicals {
                for input in logical.inputs.iter().filter(|input| input.bus == bus.name) {
                    txbuf.add_listener(input.key(), sink_id);
                }
            }
            let txbuf_id = sim.add(Box::new(txbuf));
            source.add_bus(bus_id, bus.hardware_buffer_size, txbuf_id)?;
        }
        for logical in &scenario.logicals {
            for output in &logical.outputs {
                source.register_transmission(output.key())?;
            }
        }
        let added = sim.add(Box::new(source));
        debug_assert_eq!(added, source_id);

        let mut logicals = Vec::with_capacity(scenario.logicals.len());
        for config in &scenario.logicals {
            let logical = LogicalApp::new(
                &config.name,
                scheduler_id,
                config.params(),
                Duration::from_micros(config.offset_us),
                sink_id,
                source_id,
                config.inputs.iter().map(|input| input.key()).collect(),
                config.outputs.iter().map(|output| output.key()).collect(),
                recorders.kernel.handle(),
            );
            let id = sim.add(Box::new(logical));
            logicals.push((config.name.clone(), id));
        }

        for (index, traffic) in scenario.traffic.iter().enumerate() {
            let rng = StdRng::seed_from_u64(scenario.seed.wrapping_add(1 + index as u64));
            let mut generator = TrafficGenerator::new(
                traffic.key(),
                Duration::from_micros(traffic.period_us),
                traffic.jitter_us,
                Duration::from_micros(traffic.offset_us),
                rng,
            )?;
            generator.add_target(sink_id);
            sim.add(Box::new(generator));
        }

        sim.attach(scheduler_id, sink_id)?;
        sim.attach(scheduler_id, source_id)?;
        for (_, id) in &logicals {
            sim.attach(scheduler_id, *id)?;
        }

        log::debug!(
            "Bench built: {} logicals, {} buses, {} traffic sources",
            logicals.len(),
            scenario.buses.len(),
            scenario.traffic.len()
        );

        Ok(Bench {
            sim,
            recorders,
            run_time: Duration::from_micros(scenario.run_time_us),
            scheduler: scheduler_id,
            sink: sink_id,
            source: source_id,
            logicals,
        })
    }

    pub fn recorders(&self) -> &Recorders {
        &self.recorders
    }

    pub fn scheduler(&self) -> ComponentId {
        self.scheduler
    }

    pub fn sink(&self) -> ComponentId {
        self.sink
    }

    pub fn source(&self) -> ComponentId {
        self.source
    }

    pub fn logical(&self, name: &str) -> Option<ComponentId> {
        self.logicals.iter().find(|(n, _)| n == name).map(|(_, id)| *id)
    }

    /// Deliver `frame` to the reception task at `at`, as if it came off the bus.
    pub fn inject_reception(&mut self, at: Instant, frame: Frame) {
        self.sim.inject(at, self.sink, Message::Frame(frame));
    }

    pub fn now(&self) -> Instant {
        self.sim.now()
    }

    /// Run for the scenario's run time, or until the first fatal error.
    pub fn run(&mut self) -> Result<RunReport, SimError> {
        let end = Instant::from_ticks(0) + self.run_time;
        log::info!("Running until {} us", end.as_micros());
        self.sim.run_until(end)?;
        log::info!("Finished after {} events", self.sim.processed_events());
        Ok(self.report())
    }

    pub fn report(&self) -> RunReport {
        let key_reports = |recorder: &Recorder| {
            recorder
                .all_counters()
                .into_iter()
                .map(|(key, counters)| KeyReport::new(key.to_string(), counters))
                .collect()
        };
        let depth_reports = |recorder: &Recorder| {
            recorder
                .all_depths()
                .into_iter()
                .filter_map(|(bus, gauge)| bus.map(|bus| DepthReport::new(bus.to_string(), gauge)))
                .collect()
        };
        RunReport {
            end_time_us: self.sim.now().as_micros(),
            processed_events: self.sim.processed_events(),
            dispatches: self.recorders.kernel.dispatches(),
            idle_arbitrations: self.recorders.kernel.idle_arbitrations(),
            sink_frames: key_reports(&self.recorders.sink),
            source_frames: key_reports(&self.recorders.source),
            reception_batch_max: self.recorders.sink.depth(None).max,
            software_buffers: depth_reports(&self.recorders.source),
            hardware_buffers: depth_reports(&self.recorders.hardware),
            activation_overruns: self.recorders.kernel.activation_overruns(),
            frame_ages: self
                .recorders
                .kernel
                .all_ages()
                .into_iter()
                .map(|(task, key, ages)| AgeReport::new(task, key.to_string(), ages))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyReport {
    pub key: String,
    pub overruns: u64,
    pub underruns: u64,
}

impl KeyReport {
    fn new(key: String, counters: KeyCounters) -> Self {
        KeyReport {
            key,
            overruns: counters.overruns,
            underruns: counters.underruns,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepthReport {
    pub bus: String,
    pub max: usize,
}

impl DepthReport {
    fn new(bus: String, gauge: DepthGauge) -> Self {
        DepthReport { bus, max: gauge.max }
    }
}

/// Minimum, mean and maximum of one age series (us).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgeSummary {
    pub min_us: u64,
    pub mean_us: f64,
    pub max_us: u64,
}

impl From<AgeStats> for AgeSummary {
    fn from(stats: AgeStats) -> Self {
        AgeSummary {
            min_us: stats.min_us,
            mean_us: stats.mean_us().unwrap_or(0.0),
            max_us: stats.max_us,
        }
    }
}

/// Age of one key at the moments a logical read it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgeReport {
    pub task: String,
    pub key: String,
    pub reads: u64,
    pub since_generation: AgeSummary,
    pub since_origin: AgeSummary,
}

impl AgeReport {
    fn new(task: String, key: String, ages: FrameAges) -> Self {
        AgeReport {
            task,
            key,
            reads: ages.since_generation.count,
            since_generation: ages.since_generation.into(),
            since_origin: ages.since_origin.into(),
        }
    }
}

/// Outcome of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub end_time_us: u64,
    pub processed_events: u64,
    pub dispatches: u64,
    pub idle_arbitrations: u64,
    pub sink_frames: Vec<KeyReport>,
    pub source_frames: Vec<KeyReport>,
    pub reception_batch_max: usize,
    pub software_buffers: Vec<DepthReport>,
    pub hardware_buffers: Vec<DepthReport>,
    pub activation_overruns: BTreeMap<String, u64>,
    pub frame_ages: Vec<AgeReport>,
}

impl RunReport {
    pub fn log(&self) {
        log::info!(
            "Run ended at {} us: {} events, {} dispatches, {} idle arbitrations",
            self.end_time_us,
            self.processed_events,
            self.dispatches,
            self.idle_arbitrations
        );
        for frame in &self.sink_frames {
            log::info!("Sink {}: {} overruns, {} underruns", frame.key, frame.overruns, frame.underruns);
        }
        for frame in &self.source_frames {
            log::info!("Source {}: {} overruns", frame.key, frame.overruns);
        }
        log::info!("Largest reception batch: {}", self.reception_batch_max);
        for depth in &self.software_buffers {
            log::info!("Software buffer {}: max depth {}", depth.bus, depth.max);
        }
        for depth in &self.hardware_buffers {
            log::info!("Hardware buffer {}: max depth {}", depth.bus, depth.max);
        }
        for (task, count) in &self.activation_overruns {
            log::warn!("Task {} missed {} activations", task, count);
        }
        for age in &self.frame_ages {
            log::info!(
                "{} reading {}: {} reads, age {:.1} us mean ({}..{}), {:.1} us since origin ({}..{})",
                age.task,
                age.key,
                age.reads,
                age.since_generation.mean_us,
                age.since_generation.min_us,
                age.since_generation.max_us,
                age.since_origin.mean_us,
                age.since_origin.min_us,
                age.since_origin.max_us
            );
        }
    }
}
