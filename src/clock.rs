//! Hardware cycle counter access.
//!
//! Every supported architecture provides `read_cycles()`; anything else fails
//! to build. None of the asm blocks are marked `nomem`, so the compiler treats
//! each read as a memory clobber and keeps it ordered against surrounding
//! loads and stores.

/// A monotonically increasing tick source.
pub trait CycleClock {
    fn read(&self) -> u64;
}

/// The CPU's own cycle/time-base counter.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tsc;

impl CycleClock for Tsc {
    #[inline(always)]
    fn read(&self) -> u64 {
        read_cycles()
    }
}

/// CPU pause hint for spin loops.
#[inline(always)]
pub fn relax() {
    core::hint::spin_loop();
}

// ---------------------------------------------------------------------------
// x86_64 implementation
// ---------------------------------------------------------------------------

#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub fn read_cycles() -> u64 {
    let low: u32;
    let high: u32;
    // SAFETY: RDTSC is unprivileged on every x86_64 Linux configuration.
    unsafe {
        core::arch::asm!(
            "rdtsc",
            out("eax") low,
            out("edx") high,
            options(nostack, preserves_flags),
        );
    }
    ((high as u64) << 32) | low as u64
}

// ---------------------------------------------------------------------------
// x86 (32-bit) implementation
// ---------------------------------------------------------------------------

#[cfg(target_arch = "x86")]
#[inline(always)]
pub fn read_cycles() -> u64 {
    let low: u32;
    let high: u32;
    // SAFETY: RDTSC is unprivileged on Linux.
    unsafe {
        core::arch::asm!(
            "rdtsc",
            out("eax") low,
            out("edx") high,
            options(nostack, preserves_flags),
        );
    }
    ((high as u64) << 32) | low as u64
}

// ---------------------------------------------------------------------------
// aarch64 implementation
// ---------------------------------------------------------------------------

#[cfg(target_arch = "aarch64")]
#[inline(always)]
pub fn read_cycles() -> u64 {
    let ticks: u64;
    // SAFETY: the kernel enables EL0 access to the virtual counter.
    unsafe {
        core::arch::asm!(
            "mrs {}, cntvct_el0",
            out(reg) ticks,
            options(nostack, preserves_flags),
        );
    }
    ticks
}

// ---------------------------------------------------------------------------
// powerpc64 implementation
// ---------------------------------------------------------------------------

#[cfg(target_arch = "powerpc64")]
#[inline(always)]
pub fn read_cycles() -> u64 {
    let ticks: u64;
    // SAFETY: SPR 268 (time base) is readable from user mode.
    unsafe {
        core::arch::asm!(
            "mfspr {}, 268",
            out(reg) ticks,
            options(nostack, preserves_flags),
        );
    }
    ticks
}

#[cfg(not(any(
    target_arch = "x86_64",
    target_arch = "x86",
    target_arch = "aarch64",
    target_arch = "powerpc64"
)))]
compile_error!("sysjitter needs a cycle counter reader for this architecture");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_is_monotonic() {
        let clock = Tsc;
        let mut prev = clock.read();
        for _ in 0..10_000 {
            let now = clock.read();
            assert!(now >= prev, "counter went backwards: {} < {}", now, prev);
            prev = now;
        }
    }

    #[test]
    fn test_counter_advances() {
        let start = read_cycles();
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(read_cycles() > start);
    }
}
