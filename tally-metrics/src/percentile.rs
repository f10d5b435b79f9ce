//! Summary statistics over timer samples.

/// Statistics over the samples that fall within a percentile threshold.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PercentileStats {
    /// The configured percentile in the range `(0, 100]`.
    pub percentile: f64,
    /// The largest sample within the threshold.
    pub upper: f64,
    /// The sum of all samples within the threshold.
    pub sum: f64,
    /// The mean of all samples within the threshold.
    pub mean: f64,
}

/// Statistics over all samples of a timer, along with percentile subsets.
#[derive(Clone, Debug, PartialEq)]
pub struct TimerStats {
    /// The largest sample.
    pub upper: f64,
    /// The smallest sample.
    pub lower: f64,
    /// The number of samples.
    pub count: usize,
    /// The sum of all samples.
    pub sum: f64,
    /// The arithmetic mean of all samples.
    pub mean: f64,
    /// Statistics for each configured percentile, in configuration order.
    pub percentiles: Vec<PercentileStats>,
}

impl TimerStats {
    /// Computes statistics from samples sorted in ascending order.
    ///
    /// Returns `None` if there are no samples. The result is unspecified if `sorted` is not
    /// sorted.
    ///
    /// # Example
    ///
    /// ```
    /// use tally_metrics::TimerStats;
    ///
    /// let stats = TimerStats::from_sorted(&[0.0, 5.0, 10.0], &[]).unwrap();
    /// assert_eq!(stats.mean, 5.0);
    /// ```
    pub fn from_sorted(sorted: &[f64], percentiles: &[f64]) -> Option<Self> {
        let (&lower, &upper) = (sorted.first()?, sorted.last()?);

        let cumulative: Vec<f64> = sorted
            .iter()
            .scan(0.0, |sum, value| {
                *sum += value;
                Some(*sum)
            })
            .collect();

        let count = sorted.len();
        let sum = cumulative[count - 1];

        let percentiles = percentiles
            .iter()
            .map(|&percentile| percentile_stats(sorted, &cumulative, percentile))
            .collect();

        Some(Self {
            upper,
            lower,
            count,
            sum,
            mean: sum / count as f64,
            percentiles,
        })
    }
}

/// Returns the number of lowest samples that fall within the given percentile.
///
/// The result is always in `[1, len]`. Ties round to the nearest even number.
fn threshold_count(len: usize, percentile: f64) -> usize {
    let threshold_index = ((100.0 - percentile) / 100.0) * len as f64;
    let count = (len as f64 - threshold_index).round_ties_even();
    (count as usize).clamp(1, len)
}

fn percentile_stats(sorted: &[f64], cumulative: &[f64], percentile: f64) -> PercentileStats {
    let count = threshold_count(sorted.len(), percentile);
    let sum = cumulative[count - 1];

    PercentileStats {
        percentile,
        upper: sorted[count - 1],
        sum,
        mean: sum / count as f64,
    }
}

/// Returns the suffix used in names of percentile series.
///
/// The decimal point is replaced with an underscore, so that `99.5` becomes `99_5`.
pub fn percentile_suffix(percentile: f64) -> String {
    percentile.to_string().replace('.', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(mut samples: Vec<f64>) -> Vec<f64> {
        samples.sort_by(f64::total_cmp);
        samples
    }

    #[test]
    fn test_timer_stats() {
        let samples = sorted(vec![10.0, 0.0, 5.0]);
        let stats = TimerStats::from_sorted(&samples, &[]).unwrap();

        insta::assert_debug_snapshot!(stats, @r###"
        TimerStats {
            upper: 10.0,
            lower: 0.0,
            count: 3,
            sum: 15.0,
            mean: 5.0,
            percentiles: [],
        }
        "###);
    }

    #[test]
    fn test_percentile_fixture() {
        let samples = sorted(vec![
            450.0, 120.0, 553.0, 994.0, 334.0, 844.0, 675.0, 496.0,
        ]);
        let stats = TimerStats::from_sorted(&samples, &[90.0]).unwrap();

        assert_eq!(
            stats.percentiles,
            [PercentileStats {
                percentile: 90.0,
                upper: 844.0,
                sum: 3472.0,
                mean: 496.0,
            }]
        );
    }

    #[test]
    fn test_single_sample() {
        let stats = TimerStats::from_sorted(&[42.0], &[50.0, 90.0, 100.0]).unwrap();

        assert_eq!(stats.upper, 42.0);
        assert_eq!(stats.lower, 42.0);
        for percentile in stats.percentiles {
            assert_eq!(percentile.upper, 42.0);
            assert_eq!(percentile.sum, 42.0);
            assert_eq!(percentile.mean, 42.0);
        }
    }

    #[test]
    fn test_empty() {
        assert_eq!(TimerStats::from_sorted(&[], &[90.0]), None);
    }

    #[test]
    fn test_threshold_count() {
        assert_eq!(threshold_count(8, 100.0), 8);
        assert_eq!(threshold_count(8, 90.0), 7);
        // 4 * 0.5 = 2, 4 - 2 = 2
        assert_eq!(threshold_count(4, 50.0), 2);
        // 5 - 2.5 = 2.5 rounds to even.
        assert_eq!(threshold_count(5, 50.0), 2);
        // Tiny percentiles still include the lowest sample.
        assert_eq!(threshold_count(10, 0.1), 1);
    }

    #[test]
    fn test_percentile_suffix() {
        assert_eq!(percentile_suffix(90.0), "90");
        assert_eq!(percentile_suffix(99.5), "99_5");
        assert_eq!(percentile_suffix(99.99), "99_99");
    }
}
