use std::process;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::calibrate::Calibrate;
use crate::clock::CycleClock;
use crate::context::{Command, ExperimentContext, Phase};
use crate::error::Error;
use crate::timer::StopTimer;
use crate::worker::{Worker, WorkerReport, WorkerSettings};

/// Poll interval while waiting for every worker to start.
const START_POLL: Duration = Duration::from_millis(1);

pub struct RunOutcome {
    /// One report per selected CPU, in selection order.
    pub reports: Vec<WorkerReport>,
    pub elapsed: Duration,
    pub interrupted: bool,
}

/// Spawns one worker per CPU, releases them together and stops them when the
/// timer fires.
pub struct Experiment<C, K> {
    cpus: Vec<usize>,
    ctx: Arc<ExperimentContext>,
    clock: Arc<C>,
    calibrator: Arc<K>,
    settings: WorkerSettings,
}

impl<C, K> Experiment<C, K>
where
    C: CycleClock + Send + Sync + 'static,
    K: Calibrate + Send + Sync + 'static,
{
    pub fn new(
        cpus: Vec<usize>,
        clock: C,
        calibrator: K,
        settings: WorkerSettings,
    ) -> Result<Self, Error> {
        if cpus.is_empty() {
            return Err(Error::InvalidArgs("no cpus to measure".into()));
        }
        Ok(Self {
            ctx: Arc::new(ExperimentContext::new(cpus.len())),
            cpus,
            clock: Arc::new(clock),
            calibrator: Arc::new(calibrator),
            settings,
        })
    }

    /// One complete run of `duration`. Returns once every worker has passed
    /// the finish barrier and been joined.
    pub fn run(&self, duration: Duration, timer: &mut dyn StopTimer) -> Result<RunOutcome, Error> {
        let ctx = &self.ctx;
        ctx.reset();

        let mut handles = Vec::with_capacity(self.cpus.len());
        for &cpu in &self.cpus {
            let worker = Worker::new(
                cpu,
                Arc::clone(ctx),
                Arc::clone(&self.clock),
                Arc::clone(&self.calibrator),
                self.settings,
            );
            let handle = thread::Builder::new()
                .name(format!("jitter-cpu{}", cpu))
                .spawn(move || match worker.run() {
                    Ok(report) => report,
                    Err(e) => fatal(cpu, e),
                })
                .map_err(|source| Error::Spawn { cpu, source })?;
            handles.push((cpu, handle));
        }

        while !ctx.all_arrived(Phase::Started) {
            thread::sleep(START_POLL);
        }
        let t0 = Instant::now();
        ctx.set_command(Command::Go);

        let armed = timer.arm(ctx, duration);
        if armed.is_err() {
            ctx.stop();
        }

        let mut reports = Vec::with_capacity(handles.len());
        for (cpu, handle) in handles {
            let report = handle
                .join()
                .map_err(|_| Error::Internal(format!("worker for cpu {} panicked", cpu)))?;
            reports.push(report);
        }
        timer.disarm();
        armed?;

        Ok(RunOutcome {
            reports,
            elapsed: t0.elapsed(),
            interrupted: timer.interrupted(),
        })
    }

    /// A short warm-up run whose results are thrown away, then the timed run.
    ///
    /// Both timers start at Go, before the workers calibrate. With the default
    /// one second calibration window the warm-up ends during calibration and
    /// the reported runtime of the timed run is roughly two seconds short of
    /// `runtime`.
    pub fn run_with_warmup(
        &self,
        warmup: Duration,
        runtime: Duration,
        timer: &mut dyn StopTimer,
    ) -> Result<RunOutcome, Error> {
        log::info!("warm-up run: {:?} on {} cpu(s)", warmup, self.cpus.len());
        let warm = self.run(warmup, timer)?;
        if warm.interrupted {
            return Err(Error::Interrupted);
        }
        log::debug!("warm-up finished in {:.3}s", warm.elapsed.as_secs_f64());
        drop(warm);

        log::info!("timed run: {:?}", runtime);
        let outcome = self.run(runtime, timer)?;
        if outcome.interrupted {
            log::warn!(
                "interrupted after {:.1}s, reporting partial results",
                outcome.elapsed.as_secs_f64()
            );
        } else {
            log::info!("timed run finished in {:.3}s", outcome.elapsed.as_secs_f64());
        }
        for r in &outcome.reports {
            log::debug!(
                "cpu {}: {} MHz after {} calibration attempts, {} samples, max gap {} cycles",
                r.cpu,
                r.cycles_per_us,
                r.calibration_attempts,
                r.histogram.total(),
                r.histogram.max_delta()
            );
        }
        Ok(outcome)
    }
}

/// Precondition failures make the whole measurement meaningless.
fn fatal(cpu: usize, err: Error) -> ! {
    log::error!("cpu {}: {}", cpu, err);
    log::logger().flush();
    process::exit(1);
}
