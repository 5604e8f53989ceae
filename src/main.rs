mod common;
mod config;
mod error;
mod map;
mod planner;
mod search;
mod sim;
mod stat;
mod task;
mod token;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use config::{Cli, Config};
use map::Map;
use planner::Policy;
use sim::Simulation;
use task::load_tasks;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {path}"))?;
            Config::from_yaml_str(&raw)?
        }
        None => Config::default(),
    }
    .override_from_command_line(&cli)?;

    let map = Map::from_file(&cli.map_file)?;
    let tasks = load_tasks(&cli.task_file, &map)?;

    for (policy, suffix) in [(Policy::Totp, "_tp"), (Policy::Tptr, "_tptr")] {
        let mut sim = Simulation::new(
            map.clone(),
            tasks.clone(),
            policy,
            config.check_constraints,
        );
        sim.run()?;
        sim.save_paths(&format!("{}{}_path", cli.task_file, suffix))?;
        if config.write_throughput {
            sim.save_throughput(&format!("{}{}.throughput", cli.task_file, suffix))?;
        }
        sim.summarize();
    }

    Ok(())
}
