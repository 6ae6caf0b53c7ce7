use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use agbot_gantry::config::AgBotConfig;
use agbot_gantry::motion::{Bounds, Millimeters};
use agbot_gantry::runtime::{self, RunOptions};

/// AgBot gantry runtime: motion worker behind a zenoh command bus
#[derive(Parser, Debug)]
#[command(name = "agbot-gantry")]
#[command(version)]
struct Args {
    /// Calibration TOML; defaults are used when omitted
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Workspace width from an earlier find_size (mm); skips re-measuring
    #[arg(long, requires = "y_max")]
    x_max: Option<f64>,

    /// Workspace depth from an earlier find_size (mm)
    #[arg(long, requires = "x_max")]
    y_max: Option<f64>,

    /// Simulated workspace width (mm)
    #[arg(long, default_value_t = 385.0)]
    sim_width_mm: f64,

    /// Simulated workspace depth (mm)
    #[arg(long, default_value_t = 265.0)]
    sim_depth_mm: f64,

    /// Simulated probe travel before it hits soil (mm)
    #[arg(long, default_value_t = 15.0)]
    sim_probe_throw_mm: f64,

    /// Moisture reading reported by the simulated probe
    #[arg(long, default_value_t = 50.0)]
    sim_moisture: f64,
}

fn options(args: &Args) -> Result<RunOptions, Box<dyn std::error::Error + Send + Sync>> {
    let config = match &args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            AgBotConfig::load(path)?
        }
        None => AgBotConfig::default(),
    };
    let stored_bounds = match (args.x_max, args.y_max) {
        (Some(x), Some(y)) => Some(Bounds::new(Millimeters(x), Millimeters(y))?),
        _ => None,
    };
    Ok(RunOptions {
        config,
        stored_bounds,
        sim_width_mm: args.sim_width_mm,
        sim_depth_mm: args.sim_depth_mm,
        sim_probe_throw_mm: args.sim_probe_throw_mm,
        sim_moisture: args.sim_moisture,
    })
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Setup logging (set RUST_LOG=info or debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let options = match options(&args) {
        Ok(options) => options,
        Err(e) => {
            error!("Startup error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime::run(options).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
