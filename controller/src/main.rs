use std::{
    path::PathBuf,
    thread,
    time::{Duration, Instant},
};

use anyhow::Context;
use clap::Parser;
use glam::dvec3;
use nalgebra::DVector;
use rotor_math::{energy::PowerStatistics, Wrench, WrenchAxes};
use tracing::{info, span, warn, Level};

use crate::{config::VehicleConfig, control_loop::ControlLoop};

pub mod config;
pub mod control_loop;
pub mod worker;

#[derive(Parser)]
struct Args {
    /// Vehicle configuration
    #[arg(short, long, default_value = "vehicle_config.toml")]
    config: PathBuf,
    /// Number of control cycles to run
    #[arg(short = 'n', long, default_value_t = 1000)]
    cycles: u64,
    /// Commanded vertical force
    #[arg(long, default_value_t = 10.0)]
    vertical_force: f64,
    #[arg(long, default_value_t = Level::INFO)]
    log_level: Level,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .init();
    info!("---------- Starting Controller ----------");

    let config = VehicleConfig::load(&args.config).context("Load config")?;
    let mut control = ControlLoop::new(&config).context("Start control loop")?;

    let interval = Duration::from_secs_f64(1.0 / config.control_rate_hz);
    let mut deadline = Instant::now();

    let mut thrusts = DVector::zeros(control.shared().load().geometry().rotor_count());
    let mut saturated = 0u64;
    let mut overruns = 0u64;

    for cycle in 0..args.cycles {
        let span = span!(Level::DEBUG, "Control cycle", cycle).entered();

        let wrench = command(args.vertical_force, cycle, config.control_rate_hz);
        let observation = observation(&wrench, &thrusts, config.observation_dim);

        let report = control.step(&observation, wrench).context("Allocate")?;
        if report.allocation.is_saturated() {
            saturated += 1;
        }
        thrusts = report.allocation.thrusts;

        span.exit();

        deadline += interval;
        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline - now);
        } else {
            overruns += 1;
            deadline = now;
        }
    }

    info!(
        cycles = control.cycles(),
        fallbacks = control.fallbacks(),
        saturated,
        overruns,
        "Run complete"
    );

    let monitor = control.monitor();
    if let Some(stats) = monitor.statistics() {
        log_statistics("Allocated power", &stats);
    }
    if let Some(stats) = monitor.baseline_statistics() {
        log_statistics("Baseline power", &stats);
    }
    match monitor.savings_percent() {
        Some(savings) => info!("Power savings over pseudo inverse: {savings:.2}%"),
        None => warn!("No baseline power to compare against"),
    }

    control.shutdown();
    info!("Controller stopped");

    Ok(())
}

/// Hover with a slow yaw and surge oscillation on top
fn command(vertical_force: f64, cycle: u64, rate_hz: f64) -> Wrench {
    let time = cycle as f64 / rate_hz;

    Wrench {
        force: dvec3(0.5 * (0.7 * time).sin(), 0.0, vertical_force),
        torque: dvec3(0.0, 0.0, 0.05 * (0.3 * time).sin()),
    }
}

/// Commanded wrench followed by the previous thrusts, zero padded or truncated to `dim`
fn observation(wrench: &Wrench, thrusts: &DVector<f64>, dim: usize) -> DVector<f64> {
    let wrench = wrench.to_vector(&WrenchAxes::full());

    DVector::from_iterator(
        dim,
        wrench
            .iter()
            .chain(thrusts.iter())
            .copied()
            .chain(std::iter::repeat(0.0))
            .take(dim),
    )
}

fn log_statistics(label: &str, stats: &PowerStatistics) {
    info!(
        samples = stats.count,
        mean = stats.mean,
        std = stats.std,
        min = stats.min,
        median = stats.median,
        max = stats.max,
        "{label}"
    );
}
