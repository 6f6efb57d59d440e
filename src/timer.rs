use std::io;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::context::ExperimentContext;
use crate::error::Error;

/// Context the signal handlers stop. Null while no run is armed.
static ARMED: AtomicPtr<ExperimentContext> = AtomicPtr::new(ptr::null_mut());
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Ends a run after a wall-clock timeout by setting the context to Stop.
pub trait StopTimer {
    fn arm(&mut self, ctx: &Arc<ExperimentContext>, duration: Duration) -> Result<(), Error>;
    fn disarm(&mut self);
    /// True when the run was cut short rather than timing out.
    fn interrupted(&self) -> bool;
}

/// One-shot `alarm(2)` timer. The SIGALRM handler only performs an atomic
/// load and an atomic store: no allocation, no locks.
#[derive(Default)]
pub struct AlarmTimer {
    // Keeps the armed context alive while the handler may dereference it.
    armed: Option<Arc<ExperimentContext>>,
}

impl AlarmTimer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StopTimer for AlarmTimer {
    fn arm(&mut self, ctx: &Arc<ExperimentContext>, duration: Duration) -> Result<(), Error> {
        let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
        let secs = u32::try_from(secs.max(1))
            .map_err(|_| Error::InvalidArgs(format!("timeout of {}s is too long", secs)))?;

        self.disarm();
        ARMED.store(Arc::as_ptr(ctx) as *mut ExperimentContext, Ordering::Release);
        self.armed = Some(Arc::clone(ctx));
        if INTERRUPTED.load(Ordering::Relaxed) {
            ctx.stop();
        }
        unsafe {
            libc::alarm(secs);
        }
        Ok(())
    }

    fn disarm(&mut self) {
        unsafe {
            libc::alarm(0);
        }
        ARMED.store(ptr::null_mut(), Ordering::Release);
        self.armed = None;
    }

    fn interrupted(&self) -> bool {
        interrupted()
    }
}

impl Drop for AlarmTimer {
    fn drop(&mut self) {
        if self.armed.is_some() {
            self.disarm();
        }
    }
}

fn stop_armed() {
    let ctx = ARMED.load(Ordering::Acquire);
    if !ctx.is_null() {
        // SAFETY: non-null only while an AlarmTimer holds an Arc to it.
        unsafe { (*ctx).stop() };
    }
}

extern "C" fn on_alarm(_sig: libc::c_int) {
    stop_armed();
}

extern "C" fn on_interrupt(_sig: libc::c_int) {
    INTERRUPTED.store(true, Ordering::Relaxed);
    stop_armed();
}

/// True once SIGINT or SIGTERM has been received.
pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

fn install(sig: libc::c_int, handler: extern "C" fn(libc::c_int)) -> Result<(), Error> {
    let ret = unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = handler as *const () as usize;
        sa.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(sig, &sa, ptr::null_mut())
    };
    if ret != 0 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(())
}

/// SIGALRM ends the current run; SIGINT and SIGTERM end it early and are
/// remembered so the caller can tell the run was cut short.
pub fn install_signal_handlers() -> Result<(), Error> {
    install(libc::SIGALRM, on_alarm)?;
    install(libc::SIGINT, on_interrupt)?;
    install(libc::SIGTERM, on_interrupt)?;
    Ok(())
}

/// Blocks the stop signals on the calling thread, so they are delivered to
/// the orchestrator instead of interrupting a measuring core.
pub fn block_stop_signals() -> Result<(), Error> {
    let ret = unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, libc::SIGALRM);
        libc::sigaddset(&mut set, libc::SIGINT);
        libc::sigaddset(&mut set, libc::SIGTERM);
        libc::pthread_sigmask(libc::SIG_BLOCK, &set, ptr::null_mut())
    };
    if ret != 0 {
        return Err(io::Error::from_raw_os_error(ret).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Command;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_alarm_stops_armed_context() {
        install_signal_handlers().unwrap();
        let ctx = Arc::new(ExperimentContext::new(1));
        ctx.set_command(Command::Go);

        let mut timer = AlarmTimer::new();
        timer.arm(&ctx, Duration::from_millis(10)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while ctx.command() == Command::Go && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        timer.disarm();

        assert_eq!(ctx.command(), Command::Stop);
        assert!(ARMED.load(Ordering::Acquire).is_null());
    }

    #[test]
    fn test_block_stop_signals_on_spawned_thread() {
        thread::spawn(block_stop_signals).join().unwrap().unwrap();
    }
}
