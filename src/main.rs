#![cfg_attr(target_arch = "powerpc64", feature(asm_experimental_arch))]

mod calibrate;
mod cli;
mod clock;
mod config;
mod context;
mod error;
mod experiment;
mod histogram;
mod logging;
mod output;
mod timer;
mod topology;
mod worker;

use std::process;

use clap::Parser;

use calibrate::{FrequencyCalibrator, MonotonicRaw};
use cli::Cli;
use clock::Tsc;
use config::JitterConfig;
use error::Error;
use experiment::Experiment;
use timer::AlarmTimer;
use worker::WorkerSettings;

/// Build a JitterConfig by layering: defaults → TOML file → CLI overrides.
fn build_config(cli: &Cli) -> Result<JitterConfig, Error> {
    let mut cfg = match config::load_config(cli.config_file.as_deref()) {
        Ok(c) => c.jitter,
        Err(e) => {
            log::warn!("{}", e);
            JitterConfig::default()
        }
    };

    // Apply CLI overrides (only if explicitly set)
    if let Some(v) = cli.runtime {
        cfg.runtime_secs = v;
    }
    if let Some(ref v) = cli.cpu_list {
        cfg.cpu_list = Some(v.clone());
    }
    if let Some(v) = cli.rtprio {
        cfg.rtprio = Some(v);
    }
    if let Some(v) = cli.bucket_size {
        cfg.bucket_size = v;
    }
    if cli.verbose {
        cfg.verbose = true;
    }

    cfg.validate()?;
    Ok(cfg)
}

fn run(cfg: &JitterConfig) -> Result<(), Error> {
    let cpus = topology::select_cpus(cfg.cpu_list.as_deref())?;
    log::info!(
        "measuring cpus {:?}: runtime={}s buckets={} rtprio={:?}",
        cpus,
        cfg.runtime_secs,
        cfg.bucket_size,
        cfg.rtprio
    );

    timer::install_signal_handlers()?;

    let calibrator = FrequencyCalibrator::new(Tsc, MonotonicRaw, cfg.calibration_window());
    let settings = WorkerSettings {
        rtprio: cfg.rtprio,
        bucket_count: cfg.bucket_size,
    };
    let experiment = Experiment::new(cpus, Tsc, calibrator, settings)?;

    let mut timer = AlarmTimer::new();
    let outcome = experiment.run_with_warmup(cfg.warmup(), cfg.runtime(), &mut timer)?;

    output::write_output(&outcome.reports, cfg.verbose)?;
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    logging::init(&cli.log);

    let cfg = match build_config(&cli) {
        Ok(cfg) => cfg,
        Err(e) => {
            log::error!("{}", e);
            process::exit(1);
        }
    };

    if let Err(e) = run(&cfg) {
        log::error!("{}", e);
        process::exit(1);
    }
}
