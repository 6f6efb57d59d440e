use std::collections::BTreeSet;
use std::io;

use crate::error::Error;

/// Number of CPUs the system is configured with, online or not.
pub fn configured_cpus() -> usize {
    let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_CONF) };
    if n < 1 {
        1
    } else {
        n as usize
    }
}

/// CPUs the current process is allowed to run on.
pub fn allowed_cpus() -> Result<Vec<usize>, Error> {
    let set = unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        if libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut set) != 0 {
            return Err(io::Error::last_os_error().into());
        }
        set
    };
    Ok((0..libc::CPU_SETSIZE as usize)
        .filter(|&cpu| unsafe { libc::CPU_ISSET(cpu, &set) })
        .collect())
}

/// Binds the calling thread to exactly one CPU.
pub fn pin_to_cpu(cpu: usize) -> Result<(), Error> {
    if cpu >= libc::CPU_SETSIZE as usize {
        return Err(Error::Affinity {
            cpu,
            source: io::Error::from_raw_os_error(libc::EINVAL),
        });
    }
    let ret = unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set)
    };
    if ret != 0 {
        return Err(Error::Affinity {
            cpu,
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

/// Parses a list like `0,2,5` or `0-3,8`. Indices must be below `n_cpus`.
/// The result is sorted and free of duplicates.
pub fn parse_cpu_list(list: &str, n_cpus: usize) -> Result<Vec<usize>, Error> {
    let bad = |why: String| Error::InvalidArgs(format!("bad cpu list '{}': {}", list, why));

    if list.trim().is_empty() {
        return Err(bad("empty".into()));
    }
    if let Some(c) = list.chars().find(|c| !c.is_ascii_digit() && *c != ',' && *c != '-') {
        return Err(bad(format!("unexpected character '{}'", c)));
    }

    let parse_index = |s: &str| -> Result<usize, Error> {
        let cpu: usize = s
            .parse()
            .map_err(|_| bad(format!("'{}' is not a cpu index", s)))?;
        if cpu >= n_cpus {
            return Err(bad(format!("cpu {} out of range (0-{})", cpu, n_cpus - 1)));
        }
        Ok(cpu)
    };

    let mut cpus = BTreeSet::new();
    for item in list.split(',') {
        match item.split_once('-') {
            Some((lo, hi)) => {
                let (lo, hi) = (parse_index(lo)?, parse_index(hi)?);
                if lo > hi {
                    return Err(bad(format!("descending range {}-{}", lo, hi)));
                }
                cpus.extend(lo..=hi);
            }
            None => {
                cpus.insert(parse_index(item)?);
            }
        }
    }
    Ok(cpus.into_iter().collect())
}

/// Resolves the CPUs to measure. Without a list every CPU in the affinity
/// mask is used; with one, listed CPUs outside the mask are skipped.
pub fn select_cpus(list: Option<&str>) -> Result<Vec<usize>, Error> {
    let allowed = allowed_cpus()?;
    let cpus = match list {
        None => allowed,
        Some(list) => {
            let requested = parse_cpu_list(list, configured_cpus())?;
            filter_allowed(requested, &allowed)
        }
    };
    if cpus.is_empty() {
        return Err(Error::InvalidArgs("no usable cpus selected".into()));
    }
    Ok(cpus)
}

fn filter_allowed(requested: Vec<usize>, allowed: &[usize]) -> Vec<usize> {
    requested
        .into_iter()
        .filter(|cpu| {
            let ok = allowed.contains(cpu);
            if !ok {
                log::warn!("cpu {} is not in the affinity mask, skipping", cpu);
            }
            ok
        })
        .collect()
}
