use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use crate::clock::relax;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Wait = 0,
    Go = 1,
    Stop = 2,
}

impl Command {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Command::Wait,
            1 => Command::Go,
            _ => Command::Stop,
        }
    }
}

/// Rendezvous points a worker passes through once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Started,
    Ready,
    Running,
    Finished,
}

/// State shared between the orchestrator, its workers and the stop timer.
///
/// The command is written by the orchestrator (reset, Wait -> Go) and by the
/// stop timer (Go -> Stop), never concurrently. Each phase counter is bumped
/// once per worker per run and only reset while no worker is alive.
#[derive(Debug)]
pub struct ExperimentContext {
    n_workers: usize,
    cmd: AtomicU8,
    started: AtomicUsize,
    ready: AtomicUsize,
    running: AtomicUsize,
    finished: AtomicUsize,
}

impl ExperimentContext {
    pub fn new(n_workers: usize) -> Self {
        Self {
            n_workers,
            cmd: AtomicU8::new(Command::Wait as u8),
            started: AtomicUsize::new(0),
            ready: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
        }
    }

    /// Read on every sampling pair, so kept relaxed.
    #[inline(always)]
    pub fn command(&self) -> Command {
        Command::from_u8(self.cmd.load(Ordering::Relaxed))
    }

    pub fn set_command(&self, cmd: Command) {
        self.cmd.store(cmd as u8, Ordering::Release);
    }

    /// Async-signal-safe: a single atomic store.
    #[inline]
    pub fn stop(&self) {
        self.cmd.store(Command::Stop as u8, Ordering::Release);
    }

    pub fn reset(&self) {
        for phase in [Phase::Started, Phase::Ready, Phase::Running, Phase::Finished] {
            self.counter(phase).store(0, Ordering::Release);
        }
        self.set_command(Command::Wait);
    }

    fn counter(&self, phase: Phase) -> &AtomicUsize {
        match phase {
            Phase::Started => &self.started,
            Phase::Ready => &self.ready,
            Phase::Running => &self.running,
            Phase::Finished => &self.finished,
        }
    }

    pub fn count(&self, phase: Phase) -> usize {
        self.counter(phase).load(Ordering::Acquire)
    }

    /// Returns the number of workers that have now arrived, including this one.
    pub fn arrive(&self, phase: Phase) -> usize {
        self.counter(phase).fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Spins on the pause hint until every worker has arrived at `phase`.
    /// Never sleeps: the waiting core must stay busy.
    pub fn spin_until_all(&self, phase: Phase) {
        let counter = self.counter(phase);
        while counter.load(Ordering::Acquire) != self.n_workers {
            relax();
        }
    }

    pub fn all_arrived(&self, phase: Phase) -> bool {
        self.count(phase) == self.n_workers
    }
}
