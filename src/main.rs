use std::process::ExitCode;

use chrono::Local;
use clap::Parser;
use iq_slurper::{
    args::Args,
    capture::{CancelToken, CaptureConfig, CaptureController},
    device::{SdrDriver, SimulatedDriver},
    monitoring::{init_logging, log_capture_session},
    rtlsdr::RtlSdrDriver,
    CaptureError,
};
use tracing::{error, info, warn};

fn banner() {
    println!("{}", "=".repeat(70));
    println!("IQ SLURPER - SDR CAPTURE AND SIGNAL ANALYSIS");
    println!("{}", "=".repeat(70));
    println!("Only capture signals you are authorized to receive and record.");
    println!("{}", "=".repeat(70));
}

fn run<D: SdrDriver>(
    driver: D,
    cancel: CancelToken,
    config: &CaptureConfig,
) -> Result<(), CaptureError> {
    let mut controller = CaptureController::new(driver, cancel);
    controller.run_session(config)?;
    info!("Output saved to: {}", config.output_path.display());
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    let log_dir = args.log_dir.clone();
    if let Err(e) = init_logging(args.level_filter(), &log_dir) {
        eprintln!("Couldn't set up logging in {}: {}", log_dir.display(), e);
        return ExitCode::FAILURE;
    }
    banner();

    let simulate = args.simulate;
    let config = args.into_config(&Local::now());
    log_capture_session(&config);

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\nStopping signal capture...");
        handler_token.cancel();
    }) {
        warn!("Couldn't install the Ctrl-C handler: {}", e);
    }

    let result = if simulate {
        info!("Using the simulated radio");
        run(SimulatedDriver::default(), cancel.clone(), &config)
    } else {
        info!("Initializing RTL-SDR device {}", config.device_index);
        RtlSdrDriver::load(cancel.clone())
            .map_err(CaptureError::from)
            .and_then(|driver| run(driver, cancel.clone(), &config))
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_cancelled() => {
            info!("Capture interrupted by user");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error during capture: {}", e);
            ExitCode::FAILURE
        }
    }
}
