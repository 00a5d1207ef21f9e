//! Running statistics over the sample stream.

use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::sample::Sample;

/// Count, sums and maxima of every sample folded so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningStats {
    pub count: u64,
    pub sum_power: f64,
    pub max_power: f64,
    pub sum_util: f64,
    pub max_util: f64,
    pub sum_mem: f64,
    pub max_mem: f64,
}

impl RunningStats {
    /// Fold one sample in O(1).
    pub fn fold(&mut self, sample: &Sample) {
        // Maxima are seeded by the first sample.
        if self.count == 0 {
            self.max_power = sample.power_watts;
            self.max_util = sample.utilization_pct;
            self.max_mem = sample.memory_used_mib;
        } else {
            self.max_power = self.max_power.max(sample.power_watts);
            self.max_util = self.max_util.max(sample.utilization_pct);
            self.max_mem = self.max_mem.max(sample.memory_used_mib);
        }
        self.count += 1;
        self.sum_power += sample.power_watts;
        self.sum_util += sample.utilization_pct;
        self.sum_mem += sample.memory_used_mib;
    }

    /// Mean power in watts, 0 when nothing was folded.
    pub fn avg_power(&self) -> f64 {
        self.sum_power / self.divisor()
    }

    /// Mean GPU utilization in percent, 0 when nothing was folded.
    pub fn avg_util(&self) -> f64 {
        self.sum_util / self.divisor()
    }

    /// Mean memory used in MiB, 0 when nothing was folded.
    pub fn avg_mem(&self) -> f64 {
        self.sum_mem / self.divisor()
    }

    fn divisor(&self) -> f64 {
        self.count.max(1) as f64
    }
}

/// Mutex-guarded [`RunningStats`] shared by the capture thread (writer) and
/// `stop()` (reader).
#[derive(Debug, Default)]
pub struct Aggregator {
    inner: Mutex<RunningStats>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fold(&self, sample: &Sample) {
        // fold only writes plain floats; a poisoned guard is still whole.
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fold(sample);
    }

    /// Point-in-time copy.
    pub fn snapshot(&self) -> RunningStats {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn sample(power: f64, util: f64, mem: f64) -> Sample {
        Sample {
            local_elapsed_seconds: 0.0,
            device_timestamp: "t".to_string(),
            power_watts: power,
            utilization_pct: util,
            memory_used_mib: mem,
            memory_total_mib: 8000.0,
        }
    }

    #[test]
    fn empty_stats_average_to_zero() {
        let stats = RunningStats::default();
        assert_eq!(stats.count, 0);
        assert_eq!(stats.avg_power(), 0.0);
        assert_eq!(stats.avg_util(), 0.0);
        assert_eq!(stats.avg_mem(), 0.0);
    }

    #[test]
    fn fold_tracks_sums_and_maxima() {
        let mut stats = RunningStats::default();
        for (p, u, m) in [
            (100.0, 50.0, 1000.0),
            (110.0, 55.0, 1000.0),
            (120.0, 60.0, 1100.0),
            (130.0, 65.0, 1100.0),
        ] {
            stats.fold(&sample(p, u, m));
        }
        assert_eq!(stats.count, 4);
        assert!((stats.sum_power - 460.0).abs() < 1e-9);
        assert_eq!(stats.max_power, 130.0);
        assert_eq!(stats.max_util, 65.0);
        assert_eq!(stats.max_mem, 1100.0);
        assert!((stats.avg_power() - 115.0).abs() < 1e-9);
        assert!((stats.avg_util() - 57.5).abs() < 1e-9);
        assert!((stats.avg_mem() - 1050.0).abs() < 1e-9);
    }

    #[test]
    fn max_is_true_maximum_for_non_increasing_stream() {
        let mut stats = RunningStats::default();
        stats.fold(&sample(0.0, 0.0, 0.0));
        stats.fold(&sample(0.0, 0.0, 0.0));
        assert_eq!(stats.max_power, 0.0);
        assert_eq!(stats.count, 2);
    }

    #[test]
    fn concurrent_folds_never_tear_snapshots() {
        // Every sample has power == 1.0, so a consistent snapshot always has
        // sum_power == count.
        let agg = Arc::new(Aggregator::new());
        let writers: Vec<_> = (0..4)
            .map(|_| {
                let agg = Arc::clone(&agg);
                thread::spawn(move || {
                    for _ in 0..5_000 {
                        agg.fold(&sample(1.0, 2.0, 3.0));
                    }
                })
            })
            .collect();

        let reader = {
            let agg = Arc::clone(&agg);
            thread::spawn(move || {
                for _ in 0..5_000 {
                    let snap = agg.snapshot();
                    assert_eq!(snap.sum_power, snap.count as f64);
                    assert_eq!(snap.sum_util, 2.0 * snap.count as f64);
                    assert_eq!(snap.sum_mem, 3.0 * snap.count as f64);
                }
            })
        };

        for w in writers {
            w.join().unwrap();
        }
        reader.join().unwrap();

        let snap = agg.snapshot();
        assert_eq!(snap.count, 20_000);
        assert_eq!(snap.sum_power, 20_000.0);
    }
}
