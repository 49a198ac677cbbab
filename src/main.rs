use anyhow::Context;
use env_logger::Builder;
use log::{LevelFilter, error, info};
use std::process::ExitCode;

use rtos_bus_simulator::common::load_scenario;
use rtos_bus_simulator::simulation::Bench;

const USAGE: &str = "usage: rtos-bus-simulator <scenario.toml> [--json]";

fn run(path: &str, json: bool) -> anyhow::Result<()> {
    let scenario = load_scenario(path).with_context(|| format!("Loading scenario {}", path))?;
    info!(
        "Loaded {}: {} logical tasks, {} buses, seed {}",
        path,
        scenario.logicals.len(),
        scenario.buses.len(),
        scenario.seed
    );

    let mut bench = Bench::build(&scenario).context("Building the simulated node")?;
    let report = bench.run().context("Simulation aborted")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report).context("Serializing the run report")?);
    } else {
        report.log();
    }
    Ok(())
}

fn main() -> ExitCode {
    // Logging setup
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("rtos_bus_simulator"), LevelFilter::Debug)
        .parse_default_env()
        .init();

    let mut path = None;
    let mut json = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--json" => json = true,
            _ if path.is_none() => path = Some(arg),
            _ => {
                error!("{}", USAGE);
                return ExitCode::FAILURE;
            }
        }
    }
    let Some(path) = path else {
        error!("{}", USAGE);
        return ExitCode::FAILURE;
    };

    match run(&path, json) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
