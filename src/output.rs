use std::fmt::Display;
use std::io::{self, Write};

use crate::worker::WorkerReport;

/// Writes the per-CPU summary to stdout.
pub fn write_output(reports: &[WorkerReport], verbose: bool) -> io::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    write_summary(reports, verbose, &mut out)?;
    out.flush()
}

/// One column per CPU, one row per field, then one row per bucket.
pub fn write_summary(
    reports: &[WorkerReport],
    verbose: bool,
    out: &mut dyn Write,
) -> io::Result<()> {
    put_row(out, "core_i", reports.iter().map(|r| r.cpu), "")?;
    put_row(out, "cpu_mhz", reports.iter().map(|r| r.cycles_per_us), "")?;

    let n_buckets = reports
        .iter()
        .map(|r| r.histogram.bucket_count())
        .max()
        .unwrap_or(0);
    for i in 0..n_buckets {
        write!(out, "    {:03} (us):\t", i + 1)?;
        for r in reports {
            write!(out, " {}", r.histogram.buckets().get(i).copied().unwrap_or(0))?;
        }
        writeln!(out)?;
    }

    put_row(
        out,
        "max_jitter",
        // Rounded to the nearest microsecond, not truncated.
        reports.iter().map(|r| format!("{:.0}", r.max_jitter_us())),
        " (us)",
    )?;
    put_row(
        out,
        "runtime",
        reports.iter().map(|r| format!("{:.3}", r.runtime_secs())),
        " (sec)",
    )?;

    if verbose {
        put_row(
            out,
            "frc_start",
            reports.iter().map(|r| format!("{:x}", r.frc_start)),
            "",
        )?;
        put_row(
            out,
            "frc_stop",
            reports.iter().map(|r| format!("{:x}", r.frc_stop)),
            "",
        )?;
    }
    Ok(())
}

fn put_row<T: Display>(
    out: &mut dyn Write,
    label: &str,
    values: impl Iterator<Item = T>,
    unit: &str,
) -> io::Result<()> {
    write!(out, "{:>12}:\t", label)?;
    for v in values {
        write!(out, " {}", v)?;
    }
    writeln!(out, "{}", unit)
}
