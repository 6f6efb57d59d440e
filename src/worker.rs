use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::calibrate::Calibrate;
use crate::clock::CycleClock;
use crate::context::{Command, ExperimentContext, Phase};
use crate::error::Error;
use crate::histogram::Histogram;
use crate::timer;
use crate::topology;

/// Poll interval while waiting for Go. The core is still idle at this point.
const GO_POLL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub rtprio: Option<i32>,
    pub bucket_count: usize,
}

/// What a worker hands back to the orchestrator once joined.
#[derive(Debug, Clone)]
pub struct WorkerReport {
    pub cpu: usize,
    pub cycles_per_us: u64,
    pub calibration_attempts: u32,
    pub frc_start: u64,
    pub frc_stop: u64,
    pub runtime_cycles: u64,
    pub histogram: Histogram,
}

impl WorkerReport {
    pub fn runtime_secs(&self) -> f64 {
        self.runtime_cycles as f64 / (self.cycles_per_us as f64 * 1e6)
    }

    pub fn max_jitter_us(&self) -> f64 {
        self.histogram.max_delta_us()
    }
}

/// One measuring thread, bound to a single CPU for its whole life.
pub struct Worker<C, K> {
    cpu: usize,
    ctx: Arc<ExperimentContext>,
    clock: Arc<C>,
    calibrator: Arc<K>,
    settings: WorkerSettings,
}

impl<C: CycleClock, K: Calibrate> Worker<C, K> {
    pub fn new(
        cpu: usize,
        ctx: Arc<ExperimentContext>,
        clock: Arc<C>,
        calibrator: Arc<K>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            cpu,
            ctx,
            clock,
            calibrator,
            settings,
        }
    }

    /// Runs the worker to completion on the calling thread.
    ///
    /// Once the core starts spinning it keeps spinning until every worker is
    /// done, so no core changes frequency or drops into a low power state
    /// while its siblings are still measuring.
    pub fn run(self) -> Result<WorkerReport, Error> {
        let ctx = &*self.ctx;
        let clock = &*self.clock;

        topology::pin_to_cpu(self.cpu)?;
        timer::block_stop_signals()?;
        if let Some(priority) = self.settings.rtprio {
            set_fifo_priority(priority)?;
        }

        ctx.arrive(Phase::Started);
        while ctx.command() == Command::Wait {
            thread::sleep(GO_POLL);
        }

        // Calibrate and allocate after pinning so both reflect this core.
        let calibration = self.calibrator.calibrate()?;
        let mut histogram =
            Histogram::new(self.settings.bucket_count, calibration.cycles_per_us)?;
        ctx.arrive(Phase::Ready);

        ctx.arrive(Phase::Running);
        ctx.spin_until_all(Phase::Running);

        let frc_start = clock.read();
        sample(clock, ctx, &mut histogram)?;
        let frc_stop = clock.read();

        ctx.arrive(Phase::Finished);
        ctx.spin_until_all(Phase::Finished);

        Ok(WorkerReport {
            cpu: self.cpu,
            cycles_per_us: calibration.cycles_per_us,
            calibration_attempts: calibration.attempts,
            frc_start,
            frc_stop,
            runtime_cycles: frc_stop.wrapping_sub(frc_start),
            histogram,
        })
    }
}

/// The measurement loop. Two reads per iteration, each closing one gap:
/// the one leading into the iteration and the one spanning its body.
#[inline(never)]
fn sample<C: CycleClock>(
    clock: &C,
    ctx: &ExperimentContext,
    histogram: &mut Histogram,
) -> Result<(), Error> {
    let mut ts2 = clock.read();
    loop {
        let ts1 = clock.read();
        histogram.record(ts1.wrapping_sub(ts2))?;
        ts2 = clock.read();
        histogram.record(ts2.wrapping_sub(ts1))?;
        if ctx.command() != Command::Go {
            return Ok(());
        }
    }
}

/// Switches the calling thread to SCHED_FIFO at `priority`.
pub fn set_fifo_priority(priority: i32) -> Result<(), Error> {
    let ret = unsafe {
        let mut param: libc::sched_param = std::mem::zeroed();
        param.sched_priority = priority;
        libc::sched_setscheduler(0, libc::SCHED_FIFO, &param)
    };
    if ret != 0 {
        return Err(Error::Priority {
            priority,
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibrate::FixedRate;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Shared counter that also checks, on every read, whether all workers
    /// were past the running barrier.
    struct BarrierProbe {
        ctx: Arc<ExperimentContext>,
        ticks: AtomicU64,
        early_reads: AtomicU64,
    }

    impl CycleClock for BarrierProbe {
        fn read(&self) -> u64 {
            if !self.ctx.all_arrived(Phase::Running) {
                self.early_reads.fetch_add(1, Ordering::SeqCst);
            }
            self.ticks.fetch_add(1000, Ordering::SeqCst)
        }
    }

    fn settings() -> WorkerSettings {
        WorkerSettings {
            rtprio: None,
            bucket_count: 32,
        }
    }

    #[test]
    fn test_no_sample_before_everyone_is_running() {
        let n = 3;
        let cpus = topology::allowed_cpus().unwrap();
        let ctx = Arc::new(ExperimentContext::new(n));
        let clock = Arc::new(BarrierProbe {
            ctx: Arc::clone(&ctx),
            ticks: AtomicU64::new(0),
            early_reads: AtomicU64::new(0),
        });
        let calibrator = Arc::new(FixedRate(1000));

        // Already stopped: each worker takes exactly one sample pair.
        ctx.set_command(Command::Stop);

        let handles: Vec<_> = (0..n)
            .map(|i| {
                let worker = Worker::new(
                    cpus[i % cpus.len()],
                    Arc::clone(&ctx),
                    Arc::clone(&clock),
                    Arc::clone(&calibrator),
                    settings(),
                );
                thread::spawn(move || worker.run())
            })
            .collect();
        let reports: Vec<WorkerReport> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();

        assert_eq!(clock.early_reads.load(Ordering::SeqCst), 0);
        assert_eq!(ctx.count(Phase::Finished), n);

        let starts: Vec<u64> = reports.iter().map(|r| r.frc_start).collect();
        let skew = starts.iter().max().unwrap() - starts.iter().min().unwrap();
        // Five reads per worker in total bounds how far apart starts can be.
        assert!(skew < (5 * n as u64) * 1000, "skew {}", skew);

        for r in &reports {
            assert_eq!(r.histogram.total(), 2);
            assert_eq!(r.cycles_per_us, 1000);
            assert!(r.frc_stop > r.frc_start);
        }
    }

    #[test]
    fn test_invalid_cpu_fails_before_starting() {
        let ctx = Arc::new(ExperimentContext::new(1));
        let worker = Worker::new(
            libc::CPU_SETSIZE as usize,
            Arc::clone(&ctx),
            Arc::new(crate::clock::Tsc),
            Arc::new(FixedRate(1000)),
            settings(),
        );
        let err = thread::spawn(move || worker.run()).join().unwrap().unwrap_err();
        assert!(matches!(err, Error::Affinity { .. }));
        assert_eq!(ctx.count(Phase::Started), 0);
    }

    #[test]
    fn test_fifo_priority_zero_is_rejected() {
        // SCHED_FIFO priorities start at 1, so this fails with or without root.
        let err = thread::spawn(|| set_fifo_priority(0))
            .join()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, Error::Priority { priority: 0, .. }));
    }

    #[test]
    fn test_report_conversions() {
        let mut histogram = Histogram::new(4, 2000).unwrap();
        histogram.record(7000).unwrap();
        let report = WorkerReport {
            cpu: 2,
            cycles_per_us: 2000,
            calibration_attempts: 2,
            frc_start: 1_000,
            frc_stop: 1_000 + 4_000_000_000,
            runtime_cycles: 4_000_000_000,
            histogram,
        };
        assert!((report.runtime_secs() - 2.0).abs() < 1e-9);
        assert!((report.max_jitter_us() - 3.5).abs() < 1e-9);
    }
}
