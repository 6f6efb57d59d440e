use crate::error::Error;

pub const MAX_BUCKETS: usize = 1024;

/// Per-worker latency histogram.
///
/// Bucket `i` counts deltas in `(i, i+1]` microseconds. The last bucket also
/// absorbs every delta of `bucket_count()` microseconds or more. A zero delta is
/// counted in bucket 0.
#[derive(Debug, Clone)]
pub struct Histogram {
    buckets: Vec<u64>,
    cycles_per_us: u64,
    /// Largest delta seen, in raw counter ticks.
    max_delta: u64,
}

impl Histogram {
    pub fn new(bucket_count: usize, cycles_per_us: u64) -> Result<Self, Error> {
        if bucket_count == 0 || bucket_count > MAX_BUCKETS {
            return Err(Error::InvalidArgs(format!(
                "bucket count {} not in 1..={}",
                bucket_count, MAX_BUCKETS
            )));
        }
        if cycles_per_us == 0 {
            return Err(Error::Internal("histogram needs a non-zero cycle rate".into()));
        }

        let mut buckets = Vec::new();
        buckets.try_reserve_exact(bucket_count).map_err(|e| {
            Error::Internal(format!("cannot allocate {} buckets: {}", bucket_count, e))
        })?;
        buckets.resize(bucket_count, 0);

        Ok(Self {
            buckets,
            cycles_per_us,
            max_delta: 0,
        })
    }

    #[inline(always)]
    pub fn record(&mut self, delta: u64) -> Result<(), Error> {
        if delta > self.max_delta {
            self.max_delta = delta;
        }

        let last = self.buckets.len() - 1;
        let us = delta.div_ceil(self.cycles_per_us).max(1);
        let index = if us >= self.buckets.len() as u64 {
            last
        } else {
            (us - 1) as usize
        };

        let Some(slot) = self.buckets.get_mut(index) else {
            return Err(Error::Internal(format!(
                "bucket index {} out of range for delta {}",
                index, delta
            )));
        };
        *slot = slot
            .checked_add(1)
            .ok_or_else(|| Error::Internal(format!("bucket {} overflowed", index)))?;
        Ok(())
    }

    pub fn buckets(&self) -> &[u64] {
        &self.buckets
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn max_delta(&self) -> u64 {
        self.max_delta
    }

    pub fn max_delta_us(&self) -> f64 {
        self.max_delta as f64 / self.cycles_per_us as f64
    }

    /// Total number of samples recorded.
    pub fn total(&self) -> u64 {
        self.buckets.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_four_bucket_example() {
        let mut h = Histogram::new(4, 1000).unwrap();
        for us in [1, 3, 5, 5] {
            h.record(us * 1000).unwrap();
        }
        assert_eq!(h.buckets(), &[1, 0, 1, 2]);
        assert_eq!(h.max_delta(), 5000);
        assert_eq!(h.max_delta_us(), 5.0);
    }

    #[test]
    fn test_bucket_bounds_are_half_open_below() {
        let mut h = Histogram::new(8, 1000).unwrap();
        h.record(1).unwrap(); // (0,1]
        h.record(1000).unwrap(); // (0,1]
        h.record(1001).unwrap(); // (1,2]
        h.record(2000).unwrap(); // (1,2]
        assert_eq!(&h.buckets()[..3], &[2, 2, 0]);
    }

    #[test]
    fn test_zero_delta_lands_in_first_bucket() {
        let mut h = Histogram::new(4, 2400).unwrap();
        h.record(0).unwrap();
        assert_eq!(h.buckets(), &[1, 0, 0, 0]);
        assert_eq!(h.max_delta(), 0);
    }

    #[test]
    fn test_outliers_only_in_last_bucket() {
        let mut h = Histogram::new(16, 3000).unwrap();
        let threshold = 16 * 3000;
        for delta in [threshold, threshold + 1, threshold * 10, u64::MAX] {
            h.record(delta).unwrap();
        }
        assert_eq!(h.buckets()[15], 4);
        assert_eq!(h.total(), 4);
        assert_eq!(h.max_delta(), u64::MAX);
    }

    #[test]
    fn test_single_bucket_takes_everything() {
        let mut h = Histogram::new(1, 100).unwrap();
        for delta in [0, 50, 100, 101, 1_000_000] {
            h.record(delta).unwrap();
        }
        assert_eq!(h.buckets(), &[5]);
    }

    #[test]
    fn test_total_matches_samples_recorded() {
        let mut h = Histogram::new(32, 2000).unwrap();
        let mut n = 0u64;
        let mut delta = 7u64;
        for _ in 0..10_000 {
            delta = delta.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            h.record(delta % 100_000).unwrap();
            n += 1;
        }
        assert_eq!(h.total(), n);
    }

    #[test]
    fn test_max_covers_every_non_outlier_bucket() {
        let mut h = Histogram::new(32, 1000).unwrap();
        for delta in [10, 2_500, 17_000, 900, 31_999] {
            h.record(delta).unwrap();
        }
        let highest = h
            .buckets()
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c > 0)
            .map(|(i, _)| i as f64)
            .fold(0.0, f64::max);
        assert!(h.max_delta_us() >= highest);
    }

    #[test]
    fn test_overflow_is_fatal() {
        let mut h = Histogram::new(4, 1000).unwrap();
        h.buckets[0] = u64::MAX;
        let err = h.record(500).unwrap_err();
        assert!(matches!(err, Error::Internal(ref m) if m.contains("overflowed")));
        assert_eq!(h.buckets[0], u64::MAX);
    }

    #[test]
    fn test_rejects_bad_sizes() {
        assert!(Histogram::new(0, 1000).is_err());
        assert!(Histogram::new(MAX_BUCKETS + 1, 1000).is_err());
        assert!(Histogram::new(MAX_BUCKETS, 1000).is_ok());
        assert!(Histogram::new(4, 0).is_err());
    }
}
