use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering, fence};
use std::time::Duration;

use arc_swap::ArcSwap;
use hashbrown::HashMap;
use parking_lot::Mutex;
use tally_common::UnixTimestamp;

use crate::client::{SendError, StatsClient};
use crate::config::CollectionConfig;
use crate::percentile::{TimerStats, percentile_suffix};
use crate::protocol::{Metric, MetricValue};
use crate::summary::{StatsSummary, StatsValue};

/// Number of busy spins before yielding while waiting for writers of a retired generation.
const SPINS_BEFORE_YIELD: u32 = 64;

/// Decrements the writer count of a generation when dropped.
struct WriterGuard<'a>(&'a AtomicUsize);

impl Drop for WriterGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Release);
    }
}

/// Measurements of a single flush window.
#[derive(Debug, Default)]
struct Generation {
    /// Number of writers that may still insert into this generation.
    writers: AtomicUsize,
    gauges: Mutex<HashMap<String, f64>>,
    counters: Mutex<HashMap<String, i64>>,
    timers: Mutex<HashMap<String, Vec<f64>>>,
}

impl Generation {
    fn insert(&self, metric: &Metric) {
        let name = metric.name.as_str();

        match metric.value {
            MetricValue::Gauge(value) => {
                *self.gauges.lock().entry_ref(name).or_insert(0.0) = value as f64;
            }
            MetricValue::GaugeDelta(delta) => {
                *self.gauges.lock().entry_ref(name).or_insert(0.0) += delta as f64;
            }
            MetricValue::Counter(value) => {
                let mut counters = self.counters.lock();
                let sum = counters.entry_ref(name).or_insert(0);
                *sum = sum.saturating_add(value);
            }
            MetricValue::Time(value) => {
                self.timers
                    .lock()
                    .entry_ref(name)
                    .or_default()
                    .push(value.as_f64());
            }
        }
    }

    /// Blocks until all writers that entered this generation have left.
    fn wait_for_writers(&self) {
        let mut spins = 0;
        while self.writers.load(Ordering::Acquire) != 0 {
            if spins < SPINS_BEFORE_YIELD {
                std::hint::spin_loop();
                spins += 1;
            } else {
                std::thread::yield_now();
            }
        }
    }

    /// Copies all measurements, leaving the generation intact.
    fn snapshot(&self) -> Snapshot {
        Snapshot::new(
            self.gauges.lock().clone(),
            self.counters.lock().clone(),
            self.timers.lock().clone(),
        )
    }

    /// Moves all measurements out of the generation.
    fn take(&self) -> Snapshot {
        Snapshot::new(
            std::mem::take(&mut *self.gauges.lock()),
            std::mem::take(&mut *self.counters.lock()),
            std::mem::take(&mut *self.timers.lock()),
        )
    }
}

/// Measurements of a generation, sorted by name.
struct Snapshot {
    gauges: Vec<(String, f64)>,
    counters: Vec<(String, i64)>,
    timers: Vec<(String, Vec<f64>)>,
}

fn sorted<V>(map: HashMap<String, V>) -> Vec<(String, V)> {
    let mut entries: Vec<_> = map.into_iter().collect();
    entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));
    entries
}

impl Snapshot {
    fn new(
        gauges: HashMap<String, f64>,
        counters: HashMap<String, i64>,
        timers: HashMap<String, Vec<f64>>,
    ) -> Self {
        Self {
            gauges: sorted(gauges),
            counters: sorted(counters),
            timers: sorted(timers),
        }
    }

    fn summarize(
        self,
        timestamp: UnixTimestamp,
        interval: Duration,
        config: &CollectionConfig,
    ) -> StatsSummary {
        let mut values = Vec::new();

        for (name, value) in self.gauges {
            let value = value * config.scale(&name);
            values.push(StatsValue::new(format!("stats.gauges.{name}"), value));
        }

        for (name, mut samples) in self.timers {
            let scale = config.scale(&name);
            if scale != 1.0 {
                samples.iter_mut().for_each(|sample| *sample *= scale);
            }
            samples.sort_unstable_by(f64::total_cmp);

            let Some(stats) = TimerStats::from_sorted(&samples, &config.percentiles) else {
                continue;
            };

            for percentile in &stats.percentiles {
                let suffix = percentile_suffix(percentile.percentile);
                values.push(StatsValue::new(
                    format!("stats.timers.{name}.mean_{suffix}"),
                    percentile.mean,
                ));
                values.push(StatsValue::new(
                    format!("stats.timers.{name}.upper_{suffix}"),
                    percentile.upper,
                ));
                values.push(StatsValue::new(
                    format!("stats.timers.{name}.sum_{suffix}"),
                    percentile.sum,
                ));
            }

            values.extend([
                StatsValue::new(format!("stats.timers.{name}.upper"), stats.upper),
                StatsValue::new(format!("stats.timers.{name}.lower"), stats.lower),
                StatsValue::new(format!("stats.timers.{name}.count"), stats.count as f64),
                StatsValue::new(format!("stats.timers.{name}.sum"), stats.sum),
                StatsValue::new(format!("stats.timers.{name}.mean"), stats.mean),
            ]);
        }

        // A zero interval reports the plain sum as rate.
        let seconds = interval.as_secs_f64();
        for (name, sum) in self.counters {
            let sum = sum as f64;
            let rate = if seconds > 0.0 { sum / seconds } else { sum };
            values.push(StatsValue::new(format!("stats_counts.{name}"), sum));
            values.push(StatsValue::new(format!("stats.{name}"), rate));
        }

        StatsSummary::new(timestamp, values)
    }
}

/// A concurrent store aggregating gauges, counters and timers over a flush window.
///
/// Any number of threads may [send](StatsClient::send) metrics while another thread calls
/// [`flush`](Self::flush). A flush atomically swaps the active generation for an empty one and
/// summarizes the retired generation. Every metric lands in exactly one flush.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tally_common::UnixTimestamp;
/// use tally_metrics::{StatsClientExt, StatsCollection};
///
/// let collection = StatsCollection::new();
/// collection.counter_by("hits", 5).unwrap();
///
/// let summary = collection.flush(UnixTimestamp::now(), Duration::from_secs(5));
/// assert_eq!(summary.get("stats_counts.hits"), Some(5.0));
/// assert_eq!(summary.get("stats.hits"), Some(1.0));
/// ```
#[derive(Debug)]
pub struct StatsCollection {
    current: ArcSwap<Generation>,
    config: ArcSwap<CollectionConfig>,
}

impl StatsCollection {
    /// Creates an empty collection with default configuration.
    pub fn new() -> Self {
        Self::with_config(CollectionConfig::default())
    }

    /// Creates an empty collection with the given configuration.
    pub fn with_config(config: CollectionConfig) -> Self {
        Self {
            current: ArcSwap::from_pointee(Generation::default()),
            config: ArcSwap::from_pointee(config),
        }
    }

    /// Returns the current configuration.
    pub fn config(&self) -> Arc<CollectionConfig> {
        self.config.load_full()
    }

    /// Replaces the configured percentiles.
    ///
    /// The change applies from the next summary on.
    pub fn set_percentiles(&self, percentiles: Vec<f64>) {
        self.config.rcu(|config| CollectionConfig {
            percentiles: percentiles.clone(),
            ..CollectionConfig::clone(config)
        });
    }

    /// Adds a single percentile to the configuration.
    pub fn add_percentile(&self, percentile: f64) {
        self.config.rcu(|config| {
            let mut config = CollectionConfig::clone(config);
            config.percentiles.push(percentile);
            config
        });
    }

    /// Sets the scale factor for gauges and timers named `name`.
    pub fn set_scale(&self, name: &str, scale: f64) {
        self.config.rcu(|config| {
            let mut config = CollectionConfig::clone(config);
            config.scales.insert(name.to_owned(), scale);
            config
        });
    }

    fn insert(&self, metric: &Metric) {
        loop {
            let generation = self.current.load_full();
            generation.writers.fetch_add(1, Ordering::SeqCst);
            let _guard = WriterGuard(&generation.writers);

            // Pairs with the fence in `flush`. Either the flush observes this writer, or this
            // writer observes the new generation.
            fence(Ordering::SeqCst);

            if Arc::ptr_eq(&generation, &self.current.load()) {
                generation.insert(metric);
                return;
            }
        }
    }

    /// Summarizes the active generation without resetting it.
    ///
    /// Concurrent writes may or may not be reflected in the result.
    pub fn summarize(&self, interval: Duration) -> StatsSummary {
        let snapshot = self.current.load().snapshot();
        snapshot.summarize(UnixTimestamp::now(), interval, &self.config.load())
    }

    /// Rotates the active generation and returns the summary of the retired one.
    ///
    /// `interval` is the length of the flush window, used to compute counter rates.
    pub fn flush(&self, timestamp: UnixTimestamp, interval: Duration) -> StatsSummary {
        let retired = self.current.swap(Arc::new(Generation::default()));
        fence(Ordering::SeqCst);
        retired.wait_for_writers();

        let summary = retired
            .take()
            .summarize(timestamp, interval, &self.config.load());

        tally_log::trace!(values = summary.len(), "flushed stats collection");
        summary
    }
}

impl Default for StatsCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsClient for StatsCollection {
    fn send(&self, metric: &Metric) -> Result<(), SendError> {
        self.insert(metric);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use similar_asserts::assert_eq;

    use super::*;
    use crate::client::StatsClientExt;

    fn flush(collection: &StatsCollection) -> StatsSummary {
        collection.flush(UnixTimestamp::from_secs(4711), Duration::from_secs(5))
    }

    #[test]
    fn test_gauge_last_write_wins() {
        let collection = StatsCollection::new();
        collection.gauge("MyGauge", 1).unwrap();
        collection.gauge("MyGauge", 2).unwrap();

        assert_eq!(flush(&collection).get("stats.gauges.MyGauge"), Some(2.0));
    }

    #[test]
    fn test_gauge_delta() {
        let collection = StatsCollection::new();
        collection.gauge("a", 10).unwrap();
        collection.gauge_delta("a", -3).unwrap();
        collection.gauge_delta("b", 4).unwrap();
        collection.gauge_absolute_value("c", -5).unwrap();

        let summary = flush(&collection);
        assert_eq!(summary.get("stats.gauges.a"), Some(7.0));
        assert_eq!(summary.get("stats.gauges.b"), Some(4.0));
        assert_eq!(summary.get("stats.gauges.c"), Some(-5.0));
    }

    #[test]
    fn test_counter_rate() {
        let collection = StatsCollection::new();
        collection.counter_by("MyCount", 1).unwrap();
        collection.counter_by("MyCount", 4).unwrap();

        let summary = flush(&collection);
        assert_eq!(summary.get("stats_counts.MyCount"), Some(5.0));
        assert_eq!(summary.get("stats.MyCount"), Some(1.0));
    }

    #[test]
    fn test_negative_counter() {
        let collection = StatsCollection::new();
        collection.counter_by("c", 2).unwrap();
        collection.counter_by("c", -7).unwrap();

        assert_eq!(flush(&collection).get("stats_counts.c"), Some(-5.0));
    }

    #[test]
    fn test_timer_summary() {
        let collection = StatsCollection::new();
        for millis in [10, 0, 5] {
            collection
                .timer("MyTimer", Duration::from_millis(millis))
                .unwrap();
        }

        let summary = flush(&collection);
        insta::assert_debug_snapshot!(summary, @r###"
        StatsSummary {
            timestamp: UnixTimestamp(4711),
            values: [
                StatsValue {
                    name: "stats.timers.MyTimer.upper",
                    value: 10.0,
                },
                StatsValue {
                    name: "stats.timers.MyTimer.lower",
                    value: 0.0,
                },
                StatsValue {
                    name: "stats.timers.MyTimer.count",
                    value: 3.0,
                },
                StatsValue {
                    name: "stats.timers.MyTimer.sum",
                    value: 15.0,
                },
                StatsValue {
                    name: "stats.timers.MyTimer.mean",
                    value: 5.0,
                },
            ],
        }
        "###);
    }

    #[test]
    fn test_timer_percentiles() {
        let collection = StatsCollection::new();
        collection.add_percentile(90.0);
        for sample in [450, 120, 553, 994, 334, 844, 675, 496] {
            collection
                .send(&Metric::new("MyTimer", MetricValue::time(sample)))
                .unwrap();
        }

        let summary = flush(&collection);
        let names: Vec<_> = summary.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "stats.timers.MyTimer.mean_90",
                "stats.timers.MyTimer.upper_90",
                "stats.timers.MyTimer.sum_90",
                "stats.timers.MyTimer.upper",
                "stats.timers.MyTimer.lower",
                "stats.timers.MyTimer.count",
                "stats.timers.MyTimer.sum",
                "stats.timers.MyTimer.mean",
            ]
        );
        assert_eq!(summary.get("stats.timers.MyTimer.mean_90"), Some(496.0));
        assert_eq!(summary.get("stats.timers.MyTimer.upper_90"), Some(844.0));
        assert_eq!(summary.get("stats.timers.MyTimer.sum_90"), Some(3472.0));
    }

    #[test]
    fn test_fractional_percentile_name() {
        let collection = StatsCollection::new();
        collection.set_percentiles(vec![99.5]);
        collection.timer("t", Duration::from_millis(1)).unwrap();

        assert_eq!(flush(&collection).get("stats.timers.t.upper_99_5"), Some(1.0));
    }

    #[test]
    fn test_scale() {
        let collection = StatsCollection::new();
        collection.gauge("MyMetric", 100).unwrap();
        collection.timer("MyMetric", Duration::from_millis(100)).unwrap();
        collection.set_scale("MyMetric", 0.01);

        let summary = flush(&collection);
        assert_eq!(summary.get("stats.gauges.MyMetric"), Some(1.0));
        assert_eq!(summary.get("stats.timers.MyMetric.mean"), Some(1.0));
    }

    #[test]
    fn test_summary_order() {
        let collection = StatsCollection::new();
        collection.counter("b.count").unwrap();
        collection.counter("a.count").unwrap();
        collection.timer("z.time", Duration::from_millis(3)).unwrap();
        collection.gauge("y.gauge", 1).unwrap();
        collection.gauge("x.gauge", 2).unwrap();

        let summary = flush(&collection);
        let names: Vec<_> = summary.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "stats.gauges.x.gauge",
                "stats.gauges.y.gauge",
                "stats.timers.z.time.upper",
                "stats.timers.z.time.lower",
                "stats.timers.z.time.count",
                "stats.timers.z.time.sum",
                "stats.timers.z.time.mean",
                "stats_counts.a.count",
                "stats.a.count",
                "stats_counts.b.count",
                "stats.b.count",
            ]
        );
    }

    #[test]
    fn test_flush_rotates() {
        let collection = StatsCollection::new();
        collection.counter("hits").unwrap();

        assert_eq!(flush(&collection).len(), 2);
        assert!(flush(&collection).is_empty());
    }

    #[test]
    fn test_summarize_keeps_values() {
        let collection = StatsCollection::new();
        collection.counter("hits").unwrap();

        let summary = collection.summarize(Duration::from_secs(1));
        assert_eq!(summary.get("stats_counts.hits"), Some(1.0));
        assert_eq!(flush(&collection).get("stats_counts.hits"), Some(1.0));
    }

    #[test]
    fn test_zero_interval_rate() {
        let collection = StatsCollection::new();
        collection.counter_by("hits", 3).unwrap();

        let summary = collection.flush(UnixTimestamp::from_secs(0), Duration::ZERO);
        assert_eq!(summary.get("stats.hits"), Some(3.0));
    }

    #[test]
    fn test_concurrent_flush_loses_nothing() {
        const PRODUCERS: usize = 4;
        const SENDS: i64 = 10_000;

        let collection = StatsCollection::new();
        let mut total = 0.0;

        thread::scope(|scope| {
            let producers: Vec<_> = (0..PRODUCERS)
                .map(|_| {
                    scope.spawn(|| {
                        for _ in 0..SENDS {
                            collection.counter("hits").unwrap();
                        }
                    })
                })
                .collect();

            while producers.iter().any(|p| !p.is_finished()) {
                total += flush(&collection).get("stats_counts.hits").unwrap_or(0.0);
            }
        });

        total += flush(&collection).get("stats_counts.hits").unwrap_or(0.0);
        assert_eq!(total, (PRODUCERS as i64 * SENDS) as f64);
    }
}
