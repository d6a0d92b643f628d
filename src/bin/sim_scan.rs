//! Fully simulated energy scan.
//!
//! Dry-run driver: wires a simulated grating axis, pre-mirror readback,
//! energy-request signal, and acquisition session into the scan coordinator
//! and runs one duration scan. Useful for checking trajectories and request
//! streams without any beamline hardware.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mono_scan::hardware::sim::{SimDaq, SimSignal, SimulatedAxis};
use mono_scan::hardware::MotionAxis;
use mono_scan::{
    BeamlineConfig, DurationScanParams, MonoCalibration, ScanCoordinator, ScanDevices,
    StepSequencer,
};

/// Pre-mirror readback used for simulated scans (live value on the day the
/// calibration was taken).
const SIM_MIRROR_URAD: f64 = 143_253.0;

#[derive(Parser, Debug)]
#[command(name = "sim_scan", about = "Run a fully simulated mono energy scan")]
struct Args {
    /// Scan bounds in eV (exclusive with --urad-bounds).
    #[arg(long, num_args = 2, value_names = ["LOW", "HIGH"])]
    ev_bounds: Option<Vec<f64>>,

    /// Scan bounds in grating µrad (exclusive with --ev-bounds).
    #[arg(long, num_args = 2, value_names = ["LOW", "HIGH"])]
    urad_bounds: Option<Vec<f64>>,

    /// Scan duration in seconds.
    #[arg(long, default_value_t = 5.0)]
    duration: f64,

    /// Grating sweep speed in µrad/sec (default from config).
    #[arg(long)]
    speed: Option<f64>,

    /// Extra interior steps between the bounds.
    #[arg(long, default_value_t = 0)]
    steps: usize,

    /// Skip the (simulated) DAQ entirely.
    #[arg(long)]
    no_daq: bool,

    /// Do not record the simulated run.
    #[arg(long)]
    no_record: bool,

    /// Configuration file (defaults to mono-scan.toml if present).
    #[arg(long)]
    config: Option<PathBuf>,
}

fn pair(values: &Option<Vec<f64>>) -> Option<[f64; 2]> {
    values.as_ref().map(|v| [v[0], v[1]])
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => BeamlineConfig::from_file(path)?,
        None => BeamlineConfig::load()?,
    };
    let calib: MonoCalibration = config.calibration;

    let grating = SimulatedAxis::new("mono_g_pi", 50.0).with_tick(config.scan.sim_tick);
    let mirror = Arc::new(SimSignal::new("pre_mirror", SIM_MIRROR_URAD));
    let request = Arc::new(SimSignal::new("energy_request", 0.0));
    let daq = SimDaq::new();

    let devices = ScanDevices {
        grating: Arc::new(grating.clone()),
        pre_mirror: mirror,
        energy_request: request.clone(),
        acquisition: if args.no_daq {
            None
        } else {
            Some(Arc::new(daq.clone()))
        },
    };

    let coordinator = ScanCoordinator::new(devices, calib, Arc::new(StepSequencer::new()))
        .with_request_tolerance(config.scan.request_tolerance_ev);

    coordinator
        .run_duration_scan(DurationScanParams {
            ev_bounds: pair(&args.ev_bounds),
            urad_bounds: pair(&args.urad_bounds),
            duration: Duration::from_secs_f64(args.duration),
            grating_speed: args.speed.unwrap_or(config.scan.grating_speed),
            extra_steps: args.steps,
            settle: config.scan.settle,
            record: !args.no_record,
            use_acquisition: !args.no_daq,
        })
        .await?;

    let history = request.history().await;
    info!(
        requests = history.len(),
        first = history.first().copied().unwrap_or(f64::NAN),
        last = history.last().copied().unwrap_or(f64::NAN),
        final_pitch = grating.position().unwrap_or(f64::NAN),
        "simulated scan complete"
    );
    Ok(())
}
