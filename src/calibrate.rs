use std::time::Duration;

use crate::clock::CycleClock;
use crate::error::Error;

/// Wall-clock source used as the reference during calibration.
pub trait WallClock {
    fn now(&self) -> Duration;
}

/// `CLOCK_MONOTONIC_RAW`: not slewed by NTP, so it measures the counter
/// against real elapsed time.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicRaw;

impl WallClock for MonotonicRaw {
    fn now(&self) -> Duration {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        unsafe {
            libc::clock_gettime(libc::CLOCK_MONOTONIC_RAW, &mut ts);
        }
        Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calibration {
    /// Counter ticks per microsecond, i.e. the counter rate in MHz.
    pub cycles_per_us: u64,
    /// Number of measurements taken before two consecutive ones agreed.
    pub attempts: u32,
}

pub trait Calibrate {
    fn calibrate(&self) -> Result<Calibration, Error>;
}

/// Measures the counter rate against a wall clock, repeating until two
/// consecutive measurements agree within 0.1%.
pub struct FrequencyCalibrator<C, W> {
    clock: C,
    wall: W,
    window: Duration,
}

impl<C: CycleClock, W: WallClock> FrequencyCalibrator<C, W> {
    pub fn new(clock: C, wall: W, window: Duration) -> Self {
        Self {
            clock,
            wall,
            window,
        }
    }

    /// One estimate of the counter rate in ticks per second.
    fn measure_hz(&self) -> u64 {
        let wall_start = self.wall.now();
        let start = self.clock.read();
        let (end, elapsed) = loop {
            let end = self.clock.read();
            let elapsed = self.wall.now().saturating_sub(wall_start);
            if elapsed >= self.window {
                break (end, elapsed);
            }
        };
        let ticks = end.wrapping_sub(start) as u128;
        let hz = ticks * 1_000_000_000 / elapsed.as_nanos().max(1);
        hz.min(u64::MAX as u128) as u64
    }
}

impl<C: CycleClock, W: WallClock> Calibrate for FrequencyCalibrator<C, W> {
    fn calibrate(&self) -> Result<Calibration, Error> {
        let mut prev = self.measure_hz();
        let mut attempts = 1;
        let hz = loop {
            let m = self.measure_hz();
            attempts += 1;
            let d = m.abs_diff(prev);
            if d <= m / 1000 {
                break m;
            }
            log::debug!(
                "calibration not converged: {} Hz vs {} Hz (attempt {})",
                m,
                prev,
                attempts
            );
            prev = m;
        };

        let cycles_per_us = hz / 1_000_000;
        if cycles_per_us == 0 {
            return Err(Error::Internal(format!(
                "cycle counter runs at {} Hz, below 1 tick per microsecond",
                hz
            )));
        }
        Ok(Calibration {
            cycles_per_us,
            attempts,
        })
    }
}

/// A calibrator that always reports the same rate.
#[cfg(test)]
#[derive(Debug, Clone, Copy)]
pub struct FixedRate(pub u64);

#[cfg(test)]
impl Calibrate for FixedRate {
    fn calibrate(&self) -> Result<Calibration, Error> {
        if self.0 == 0 {
            return Err(Error::Internal("fixed rate of 0 cycles/us".into()));
        }
        Ok(Calibration {
            cycles_per_us: self.0,
            attempts: 1,
        })
    }
}
