use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::Error;
use crate::histogram::MAX_BUCKETS;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/sysjitter.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct JitterConfig {
    /// Length of the timed run in seconds.
    pub runtime_secs: u64,
    /// Length of the discarded warm-up run in seconds.
    pub warmup_secs: u64,
    pub bucket_size: usize,
    pub rtprio: Option<i32>,
    pub cpu_list: Option<String>,
    pub verbose: bool,
    /// Wall-clock length of one calibration measurement.
    pub calibration_ms: u64,
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            runtime_secs: 70,
            warmup_secs: 1,
            bucket_size: 32,
            rtprio: None,
            cpu_list: None,
            verbose: false,
            calibration_ms: 1000,
        }
    }
}

impl JitterConfig {
    /// Rejects values the measurement cannot run with.
    pub fn validate(&self) -> Result<(), Error> {
        if self.bucket_size == 0 || self.bucket_size > MAX_BUCKETS {
            return Err(Error::InvalidArgs(format!(
                "bucket size {} not in 1..={}",
                self.bucket_size, MAX_BUCKETS
            )));
        }
        // alarm(0) cancels instead of firing, so zero-length runs never end.
        if self.runtime_secs == 0 || self.warmup_secs == 0 {
            return Err(Error::InvalidArgs("runtime and warm-up must be at least 1s".into()));
        }
        if self.runtime_secs > u32::MAX as u64 || self.warmup_secs > u32::MAX as u64 {
            return Err(Error::InvalidArgs("runtime too long".into()));
        }
        if self.calibration_ms == 0 {
            return Err(Error::InvalidArgs("calibration window must be non-zero".into()));
        }
        if let Some(prio) = self.rtprio {
            let (min, max) = fifo_priority_range();
            if prio < min || prio > max {
                return Err(Error::InvalidArgs(format!(
                    "rtprio {} not in {}..={}",
                    prio, min, max
                )));
            }
        }
        Ok(())
    }

    pub fn runtime(&self) -> Duration {
        Duration::from_secs(self.runtime_secs)
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_secs(self.warmup_secs)
    }

    pub fn calibration_window(&self) -> Duration {
        Duration::from_millis(self.calibration_ms)
    }
}

fn fifo_priority_range() -> (i32, i32) {
    let (min, max) = unsafe {
        (
            libc::sched_get_priority_min(libc::SCHED_FIFO),
            libc::sched_get_priority_max(libc::SCHED_FIFO),
        )
    };
    if min < 0 || max < 0 {
        (1, 99)
    } else {
        (min, max)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub jitter: JitterConfig,
}

/// Load configuration from a TOML file.
///
/// - If `explicit_path` is `Some` and the file is missing, returns an error.
/// - If `explicit_path` is `None`, tries `/etc/sysjitter.toml`; if missing, returns defaults.
pub fn load_config(explicit_path: Option<&Path>) -> Result<Config, Error> {
    let path = match explicit_path {
        Some(p) => {
            if !p.exists() {
                return Err(Error::InvalidArgs(format!(
                    "config file not found: {}",
                    p.display()
                )));
            }
            p.to_path_buf()
        }
        None => {
            let default = Path::new(DEFAULT_CONFIG_PATH);
            if !default.exists() {
                return Ok(Config::default());
            }
            default.to_path_buf()
        }
    };

    let contents = std::fs::read_to_string(&path).map_err(|e| {
        Error::InvalidArgs(format!("failed to read config {}: {}", path.display(), e))
    })?;

    let config: Config = toml::from_str(&contents).map_err(|e| {
        Error::InvalidArgs(format!("failed to parse config {}: {}", path.display(), e))
    })?;

    Ok(config)
}
