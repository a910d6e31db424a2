//! CLI entry point for ndscan.
//!
//! Two subcommands:
//! - `run`: execute a scan against simulated hardware and print per-step
//!   status (useful for trying trajectories and timing settings without
//!   devices attached)
//! - `plan`: materialize a trajectory and print the targets without moving
//!   anything
//!
//! # Usage
//!
//! ```bash
//! ndscan run --spec demos/line.toml --config config/ndscan.toml --average 4
//! ndscan plan --spec demos/spiral.toml
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use ndscan::config::EngineConfig;
use ndscan::engine::{ScanCoordinator, ScanRequest};
use ndscan::hardware::{MemorySink, MockActuator, MockDetector};
use ndscan::scan::{self, ScanSpec};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "ndscan")]
#[command(about = "N-dimensional scan coordination engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scan against simulated hardware
    Run {
        /// Scan specification (TOML). Defaults to a 0..10 line scan.
        #[arg(long)]
        spec: Option<PathBuf>,

        /// Engine configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Software averaging repeats per step
        #[arg(long, default_value = "1")]
        average: usize,
    },

    /// Print the trajectory for a scan specification
    Plan {
        /// Scan specification (TOML)
        #[arg(long)]
        spec: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            spec,
            config,
            average,
        } => run_simulated(spec, config, average).await,
        Commands::Plan { spec } => plan(spec),
    }
}

fn load_spec(path: Option<PathBuf>) -> Result<ScanSpec> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading scan spec {}", path.display()))?;
            toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
        }
        None => Ok(ScanSpec::linear_1d(0.0, 10.0, 1.0)),
    }
}

async fn run_simulated(
    spec: Option<PathBuf>,
    config: Option<PathBuf>,
    average: usize,
) -> Result<()> {
    let config = match config {
        Some(path) => EngineConfig::load_from(path)?,
        None => EngineConfig::default(),
    };
    config.validate().map_err(anyhow::Error::msg)?;
    ndscan::logging::init_from_config(&config.logging)?;

    let spec = load_spec(spec)?;
    println!("🔬 ndscan simulated run: {:?}/{:?}", spec.scan_type, spec.subtype);

    // One mock stage per axis; the detector responds to the first stage.
    let stages: Vec<Arc<MockActuator>> = (0..spec.n_axes())
        .map(|i| Arc::new(MockActuator::new(format!("stage{i}"), Duration::from_millis(1))))
        .collect();
    let detector = Arc::new(MockDetector::scalar(
        "photodiode",
        stages
            .first()
            .context("scan spec has no actuator axes")?
            .position_handle(),
        |x| x * x,
    ));
    let sink = Arc::new(MemorySink::new());

    let coordinator = ScanCoordinator::new(
        config,
        stages
            .iter()
            .map(|s| Arc::clone(s) as Arc<dyn ndscan::hardware::Actuator>)
            .collect(),
        vec![detector as Arc<dyn ndscan::hardware::Detector>],
        Arc::clone(&sink) as Arc<dyn ndscan::hardware::PersistenceSink>,
    );

    let mut status_rx = coordinator.subscribe_status();
    let printer = tokio::spawn(async move {
        while let Ok(status) = status_rx.recv().await {
            match status.error {
                Some(error) => println!("❌ scan failed after step {}: {error}", status.step_index),
                None => {
                    let value = status
                        .containers
                        .first()
                        .and_then(|c| c.data().first())
                        .and_then(|a| a.first().copied());
                    println!(
                        "step {:>4}/{} nav {:?} -> {:?}",
                        status.step_index + 1,
                        status.n_steps,
                        status.nav_index,
                        value
                    );
                }
            }
        }
    });

    coordinator
        .start(ScanRequest::new(spec).with_averaging(average))
        .await?;
    let completed = coordinator.wait().await?;
    printer.abort();

    println!("✅ {completed} steps completed, {} records stored", sink.len().await);
    Ok(())
}

fn plan(spec: PathBuf) -> Result<()> {
    let spec = load_spec(Some(spec))?;
    let trajectory = scan::generate(&spec, None)?;
    println!(
        "{} steps over {} axes, scan shape {:?}",
        trajectory.n_steps(),
        trajectory.n_axes(),
        trajectory.scan_shape()
    );
    for (step, position) in trajectory.positions().iter().enumerate() {
        println!("{step:>6}: {position:?} (nav {:?})", trajectory.nav_index_at(step));
    }
    Ok(())
}
