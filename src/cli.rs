use std::path::PathBuf;

use clap::Parser;

use crate::logging::LogArgs;

#[derive(Debug, Parser)]
#[command(
    name = "sysjitter",
    about = "Measure OS-induced execution jitter on each CPU core"
)]
pub struct Cli {
    /// Length of the timed run in seconds (default: 70)
    #[arg(long)]
    pub runtime: Option<u64>,

    /// CPUs to measure, e.g. "0,2,5" or "0-3" (default: all allowed CPUs)
    #[arg(long = "cpu-list")]
    pub cpu_list: Option<String>,

    /// Run workers under SCHED_FIFO at this priority
    #[arg(long)]
    pub rtprio: Option<i32>,

    /// Number of 1us histogram buckets, 1-1024 (default: 32)
    #[arg(long = "bucket-size")]
    pub bucket_size: Option<usize>,

    /// Also print raw start/stop counter values
    #[arg(long)]
    pub verbose: bool,

    /// Configuration file path (default: /etc/sysjitter.toml)
    #[arg(long = "config")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub log: LogArgs,
}
