//! A histogram snapshot over a fixed set of samples.

use crate::registry::{HistogramSnapshot, MeterSnapshot, TimerSnapshot};

/// A [`HistogramSnapshot`] computed from a set of recorded samples.
///
/// This is useful for registries that keep raw samples, such as a uniform or exponentially-decaying reservoir, and
/// want to hand the reporter an immutable copy of them.
///
/// Percentiles are estimated by linear interpolation between the two samples closest to rank `q * (n + 1)`, clamped
/// to the smallest and largest samples. All statistics of an empty snapshot are zero.
#[derive(Clone, Debug, Default)]
pub struct SampleSnapshot {
    count: i64,
    values: Vec<i64>,
}

impl SampleSnapshot {
    /// Creates a snapshot of the given samples.
    ///
    /// The count is the number of samples.
    pub fn new(values: Vec<i64>) -> Self {
        let count = values.len() as i64;
        Self::with_count(count, values)
    }

    /// Creates a snapshot of the given samples, where `count` is the total number of values ever recorded.
    ///
    /// Reservoirs only hold a subset of what was recorded, so the count reported may be larger than the number of
    /// samples the statistics are computed from.
    pub fn with_count(count: i64, mut values: Vec<i64>) -> Self {
        values.sort_unstable();
        Self { count, values }
    }

    /// Returns the samples, in ascending order.
    pub fn values(&self) -> &[i64] {
        &self.values
    }

    fn sum(&self) -> f64 {
        self.values.iter().map(|v| *v as f64).sum()
    }

    fn percentile(&self, quantile: f64) -> f64 {
        let len = self.values.len();
        if len == 0 {
            return 0.0;
        }

        // NaN sorts below every sample.
        let quantile = if quantile.is_nan() { 0.0 } else { quantile.clamp(0.0, 1.0) };
        let pos = quantile * (len as f64 + 1.0);
        if pos < 1.0 {
            self.values[0] as f64
        } else if pos >= len as f64 {
            self.values[len - 1] as f64
        } else {
            let lower = self.values[pos as usize - 1] as f64;
            let upper = self.values[pos as usize] as f64;
            lower + (pos - pos.floor()) * (upper - lower)
        }
    }
}

impl HistogramSnapshot for SampleSnapshot {
    fn count(&self) -> i64 {
        self.count
    }

    fn min(&self) -> i64 {
        self.values.first().copied().unwrap_or(0)
    }

    fn max(&self) -> i64 {
        self.values.last().copied().unwrap_or(0)
    }

    fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.sum() / self.values.len() as f64
    }

    fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    fn variance(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }

        let mean = self.mean();
        let squares: f64 = self
            .values
            .iter()
            .map(|v| {
                let delta = *v as f64 - mean;
                delta * delta
            })
            .sum();
        squares / self.values.len() as f64
    }

    fn percentiles(&self, quantiles: &[f64]) -> Vec<f64> {
        quantiles.iter().map(|q| self.percentile(*q)).collect()
    }
}

/// A [`TimerSnapshot`] built from a sample snapshot of durations and a meter snapshot of their rate.
#[derive(Clone, Debug, Default)]
pub struct SampleTimerSnapshot {
    durations: SampleSnapshot,
    rates: MeterSnapshot,
}

impl SampleTimerSnapshot {
    /// Creates a timer snapshot from its parts.
    pub fn new(durations: SampleSnapshot, rates: MeterSnapshot) -> Self {
        Self { durations, rates }
    }
}

impl HistogramSnapshot for SampleTimerSnapshot {
    fn count(&self) -> i64 {
        self.durations.count()
    }

    fn min(&self) -> i64 {
        self.durations.min()
    }

    fn max(&self) -> i64 {
        self.durations.max()
    }

    fn mean(&self) -> f64 {
        self.durations.mean()
    }

    fn std_dev(&self) -> f64 {
        self.durations.std_dev()
    }

    fn variance(&self) -> f64 {
        self.durations.variance()
    }

    fn percentiles(&self, quantiles: &[f64]) -> Vec<f64> {
        self.durations.percentiles(quantiles)
    }
}

impl TimerSnapshot for SampleTimerSnapshot {
    fn rates(&self) -> MeterSnapshot {
        self.rates
    }
}

#[cfg(test)]
mod tests {
    use super::SampleSnapshot;
    use crate::registry::HistogramSnapshot as _;

    #[test]
    fn empty_snapshot_is_all_zeroes() {
        let snapshot = SampleSnapshot::default();
        assert_eq!(snapshot.count(), 0);
        assert_eq!(snapshot.min(), 0);
        assert_eq!(snapshot.max(), 0);
        assert_eq!(snapshot.mean(), 0.0);
        assert_eq!(snapshot.variance(), 0.0);
        assert_eq!(snapshot.percentiles(&[0.5, 0.99]), vec![0.0, 0.0]);
    }

    #[test]
    fn statistics() {
        let snapshot = SampleSnapshot::new(vec![4, 2, 8, 6]);
        assert_eq!(snapshot.values(), &[2, 4, 6, 8]);
        assert_eq!(snapshot.count(), 4);
        assert_eq!(snapshot.min(), 2);
        assert_eq!(snapshot.max(), 8);
        assert_eq!(snapshot.mean(), 5.0);
        assert_eq!(snapshot.variance(), 5.0);
        assert_eq!(snapshot.std_dev(), 5.0_f64.sqrt());
    }

    #[test]
    fn percentiles_interpolate_and_clamp() {
        let snapshot = SampleSnapshot::new((1..=100).collect());
        let ps = snapshot.percentiles(&[0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_eq!(ps, vec![1.0, 25.25, 50.5, 75.75, 100.0]);
    }

    #[test]
    fn out_of_range_quantiles_are_clamped() {
        let snapshot = SampleSnapshot::new(vec![1, 2, 3]);
        let ps = snapshot.percentiles(&[f64::NAN, -0.5, 1.5, f64::INFINITY, f64::NEG_INFINITY]);
        assert_eq!(ps, vec![1.0, 1.0, 3.0, 3.0, 1.0]);
    }

    #[test]
    fn count_may_exceed_samples() {
        let snapshot = SampleSnapshot::with_count(1_000, vec![1, 2, 3]);
        assert_eq!(snapshot.count(), 1_000);
        assert_eq!(snapshot.mean(), 2.0);
    }
}
