use anyhow::{Context, Result};
use darkforest_core::{DarkForestConfig, TickReport, WorldState};
use std::env;
use std::fs;
use tracing::info;

const DEFAULT_TICKS: u64 = 200;
const PROGRESS_INTERVAL: u64 = 50;

fn main() -> Result<()> {
    init_tracing();
    let config = load_config()?;
    let ticks = tick_horizon()?;
    let mut world = WorldState::new(config)?;
    info!(ticks, "starting dark-forest run");

    for _ in 0..ticks {
        let report = world.step();
        if report.tick.0 % PROGRESS_INTERVAL == 0 {
            log_report(&report, "progress");
        }
    }

    log_report(&world.report(), "run complete");
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// First argument selects an optional TOML configuration file; without one
/// the reference scenario runs.
fn load_config() -> Result<DarkForestConfig> {
    match env::args().nth(1) {
        Some(path) => {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("reading configuration from {path}"))?;
            DarkForestConfig::from_toml_str(&raw)
                .with_context(|| format!("parsing configuration from {path}"))
        }
        None => Ok(DarkForestConfig::default()),
    }
}

/// Second argument overrides the number of ticks to run.
fn tick_horizon() -> Result<u64> {
    match env::args().nth(2) {
        Some(raw) => raw
            .parse::<u64>()
            .with_context(|| format!("parsing tick count {raw:?}")),
        None => Ok(DEFAULT_TICKS),
    }
}

fn log_report(report: &TickReport, stage: &str) {
    info!(
        tick = report.tick.0,
        alive = report.alive,
        aggressors = report.aggressors,
        agg_survival = report.agg_survival,
        peace_survival = report.peace_survival,
        deaths = report.deaths,
        collaborations = report.collaborations,
        "{stage}"
    );
}
