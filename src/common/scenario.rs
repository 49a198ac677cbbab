//! Scenario loading, parsing, and validation logic.
//!
//! A scenario describes one simulated node: its scheduler, the reception and
//! transmission tasks, the buses it is attached to, the logical tasks it runs
//! and the traffic other nodes put on its buses. Scenarios are TOML files.

use anyhow::Context;
use embassy_time::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;

use crate::apps::TaskParams;
use crate::simulation::types::{BusId, FrameKey};

/// Error type for scenario loading failures.
#[derive(Debug)]
pub enum ScenarioLoadError {
    FileReadError(String),
    ParseError(String),
    ValidationError(String),
}

impl std::fmt::Display for ScenarioLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScenarioLoadError::FileReadError(msg) => write!(f, "Failed to read file: {}", msg),
            ScenarioLoadError::ParseError(msg) => write!(f, "Failed to parse TOML: {}", msg),
            ScenarioLoadError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ScenarioLoadError {}

/// Timing of the scheduler itself.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    /// Cost of one arbitration (us).
    pub execution_time_us: u64,
    /// Distance between two regular arbitration ticks (us).
    pub interarrival_time_us: u64,
}

/// Scheduling parameters of the sink or source task.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskConfig {
    pub priority: i64,
    pub period_us: u64,
    pub execution_time_us: u64,
}

impl TaskConfig {
    pub fn params(&self) -> TaskParams {
        TaskParams {
            priority: self.priority,
            period: Duration::from_micros(self.period_us),
            execution_time: Duration::from_micros(self.execution_time_us),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BusConfig {
    pub name: String,
    /// Frames the bus controller's transmit FIFO can hold.
    pub hardware_buffer_size: usize,
    /// Time one frame occupies the bus (us).
    pub frame_time_us: u64,
}

/// A frame identity as written in a scenario file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct FrameRef {
    pub bus: String,
    pub id: u32,
}

impl FrameRef {
    pub fn key(&self) -> FrameKey {
        FrameKey::new(&self.bus, self.id)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogicalConfig {
    pub name: String,
    pub priority: i64,
    pub period_us: u64,
    pub execution_time_us: u64,
    /// Delay of the first activation (us).
    #[serde(default)]
    pub offset_us: u64,
    #[serde(default)]
    pub inputs: Vec<FrameRef>,
    #[serde(default)]
    pub outputs: Vec<FrameRef>,
}

impl LogicalConfig {
    pub fn params(&self) -> TaskParams {
        TaskParams {
            priority: self.priority,
            period: Duration::from_micros(self.period_us),
            execution_time: Duration::from_micros(self.execution_time_us),
        }
    }
}

/// Periodic frames sent by another node.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrafficConfig {
    pub bus: String,
    pub id: u32,
    pub period_us: u64,
    /// Standard deviation of the period (us).
    #[serde(default)]
    pub jitter_us: f64,
    #[serde(default)]
    pub offset_us: u64,
}

impl TrafficConfig {
    pub fn key(&self) -> FrameKey {
        FrameKey::new(&self.bus, self.id)
    }
}

fn default_run_time_us() -> u64 {
    1_000_000
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Scenario {
    /// Seed of every random source in the run.
    #[serde(default)]
    pub seed: u64,
    /// Simulated time to run (us).
    #[serde(default = "default_run_time_us")]
    pub run_time_us: u64,
    pub scheduler: SchedulerConfig,
    pub sink: TaskConfig,
    pub source: TaskConfig,
    pub buses: Vec<BusConfig>,
    #[serde(default)]
    pub logicals: Vec<LogicalConfig>,
    #[serde(default)]
    pub traffic: Vec<TrafficConfig>,
}

impl Scenario {
    pub fn bus_ids(&self) -> Vec<BusId> {
        self.buses.iter().map(|bus| BusId::new(&bus.name)).collect()
    }
}

/// Parse and validate a scenario held in memory.
pub fn parse_scenario(data: &str) -> Result<Scenario, ScenarioLoadError> {
    let scenario: Scenario = toml::from_str(data)
        .context("Invalid TOML format")
        .map_err(|e| ScenarioLoadError::ParseError(format!("{:#}", e)))?;

    validate_scenario(&scenario).map_err(ScenarioLoadError::ValidationError)?;

    Ok(scenario)
}

/// Load a scenario from a TOML file and validate it.
pub fn load_scenario(path: &str) -> Result<Scenario, ScenarioLoadError> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path))
        .map_err(|e| ScenarioLoadError::FileReadError(e.to_string()))?;

    parse_scenario(&data)
}

/// Validate scenario consistency.
pub fn validate_scenario(scenario: &Scenario) -> Result<(), String> {
    let scheduler = &scenario.scheduler;
    if scheduler.interarrival_time_us == 0 {
        return Err("Scheduler interarrival_time_us must be positive".to_string());
    }
    if scheduler.execution_time_us > scheduler.interarrival_time_us {
        return Err(format!(
            "Scheduler execution_time_us {} exceeds interarrival_time_us {}",
            scheduler.execution_time_us, scheduler.interarrival_time_us
        ));
    }
    if scenario.run_time_us == 0 {
        return Err("run_time_us must be positive".to_string());
    }

    if scenario.buses.is_empty() {
        return Err("Scenario must contain at least one bus".to_string());
    }
    let mut bus_names = HashSet::new();
    for bus in &scenario.buses {
        if !bus_names.insert(bus.name.as_str()) {
            return Err(format!("Duplicate bus name found: {}", bus.name));
        }
        if bus.hardware_buffer_size == 0 {
            return Err(format!("Bus {} hardware_buffer_size must be positive", bus.name));
        }
        if bus.frame_time_us == 0 {
            return Err(format!("Bus {} frame_time_us must be positive", bus.name));
        }
    }

    let mut task_names: HashSet<&str> = HashSet::from(["sink", "source"]);
    for (name, task) in [("sink", &scenario.sink), ("source", &scenario.source)] {
        if task.period_us == 0 {
            return Err(format!("Task {} period_us must be positive", name));
        }
    }

    let mut produced = HashSet::new();
    let mut consumed = HashSet::new();
    for logical in &scenario.logicals {
        if !task_names.insert(logical.name.as_str()) {
            return Err(format!("Duplicate task name found: {}", logical.name));
        }
        if logical.period_us == 0 {
            return Err(format!("Task {} period_us must be positive", logical.name));
        }
        for frame in logical.inputs.iter().chain(&logical.outputs) {
            if !bus_names.contains(frame.bus.as_str()) {
                return Err(format!("Task {} references unknown bus {}", logical.name, frame.bus));
            }
        }
        for frame in &logical.inputs {
            consumed.insert(frame.clone());
        }
        for frame in &logical.outputs {
            if !produced.insert(frame.clone()) {
                return Err(format!("Frame {}/{} is produced by more than one task", frame.bus, frame.id));
            }
        }
    }

    for traffic in &scenario.traffic {
        if !bus_names.contains(traffic.bus.as_str()) {
            return Err(format!("Traffic {}/{} references unknown bus", traffic.bus, traffic.id));
        }
        if traffic.period_us == 0 {
            return Err(format!("Traffic {}/{} period_us must be positive", traffic.bus, traffic.id));
        }
        if !traffic.jitter_us.is_finite() || traffic.jitter_us < 0.0 {
            return Err(format!("Traffic {}/{} jitter_us must be a non-negative number", traffic.bus, traffic.id));
        }
        let frame = FrameRef {
            bus: traffic.bus.clone(),
            id: traffic.id,
        };
        if !consumed.contains(&frame) {
            return Err(format!("Traffic {}/{} is not consumed by any task", traffic.bus, traffic.id));
        }
    }

    Ok(())
}
