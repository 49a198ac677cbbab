//! Shared configuration types.

pub mod scenario;

pub use scenario::{Scenario, ScenarioLoadError, load_scenario, parse_scenario, validate_scenario};
