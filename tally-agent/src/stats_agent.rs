use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tally_common::UnixTimestamp;
use tally_metrics::{Metric, MetricValue, StatsClient, StatsCollection, StatsSummary};

use crate::agent::{AgentConfig, SampleAgent};
use crate::error::{AgentError, ErrorSource, HookError, HookResult};
use crate::hooks::{Hooks, guarded};

type ReadFn = dyn Fn() -> Result<MetricValue, HookError> + Send + Sync;

struct Sampler {
    name: String,
    read: Box<ReadFn>,
}

type Samplers = Arc<RwLock<Vec<Sampler>>>;

fn sample_all(samplers: &RwLock<Vec<Sampler>>, hooks: &Weak<Hooks>, collection: &StatsCollection) {
    let samplers = samplers.read();

    for sampler in samplers.iter() {
        let result = guarded(|| {
            let value = (sampler.read)()?;
            collection.send(&Metric::new(sampler.name.as_str(), value))?;
            Ok(())
        });

        if let Err(error) = result {
            tally_log::debug!(sampler = sampler.name, "sampler failed");
            if let Some(hooks) = hooks.upgrade() {
                hooks.report(ErrorSource::Sampler, error);
            }
        }
    }
}

/// A [`SampleAgent`] that polls named samplers on every sampling pass.
///
/// Each sampler produces one reading per pass, which is recorded under the sampler's name. A
/// sampler that fails or panics is reported to the error hooks with [`ErrorSource::Sampler`] and
/// does not affect the other samplers.
///
/// ```
/// use tally_agent::{AgentConfig, StatsAgent};
/// use tally_metrics::UnixTimestamp;
///
/// let agent = StatsAgent::new(AgentConfig::default());
/// agent.add_gauge("threads", || 4);
/// agent.add_timer("gc.pause", || 1.25);
///
/// agent.start().expect("agent should start");
/// // ...
/// agent.stop();
///
/// let summary = agent.flush(UnixTimestamp::now());
/// println!("{summary:?}");
/// ```
pub struct StatsAgent {
    agent: SampleAgent,
    samplers: Samplers,
}

impl StatsAgent {
    /// Creates a stopped agent with an empty collection.
    pub fn new(config: AgentConfig) -> Self {
        Self::from_agent(SampleAgent::new(config))
    }

    /// Creates a stopped agent that flushes the given collection.
    pub fn with_collection(config: AgentConfig, collection: Arc<StatsCollection>) -> Self {
        Self::from_agent(SampleAgent::with_collection(config, collection))
    }

    fn from_agent(agent: SampleAgent) -> Self {
        let samplers = Samplers::default();

        let weak_hooks = Arc::downgrade(agent.hooks());
        let weak_samplers = Arc::downgrade(&samplers);
        agent.on_sample(move |collection| {
            if let Some(samplers) = weak_samplers.upgrade() {
                sample_all(&samplers, &weak_hooks, collection);
            }
            Ok(())
        });

        Self { agent, samplers }
    }

    /// Registers a sampler that reads a metric value.
    pub fn add_sampler<F>(&self, name: impl Into<String>, read: F)
    where
        F: Fn() -> Result<MetricValue, HookError> + Send + Sync + 'static,
    {
        self.samplers.write().push(Sampler {
            name: name.into(),
            read: Box::new(read),
        });
    }

    /// Registers a sampler that reads an absolute gauge value.
    pub fn add_gauge<F>(&self, name: impl Into<String>, read: F)
    where
        F: Fn() -> u64 + Send + Sync + 'static,
    {
        self.add_sampler(name, move || Ok(MetricValue::Gauge(read())));
    }

    /// Registers a sampler that reads a duration in milliseconds.
    pub fn add_timer<F>(&self, name: impl Into<String>, read: F)
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        self.add_sampler(name, move || Ok(MetricValue::time_f64(read())));
    }

    /// Returns the number of registered samplers.
    pub fn sampler_count(&self) -> usize {
        self.samplers.read().len()
    }

    /// Returns the timing parameters.
    pub fn config(&self) -> AgentConfig {
        self.agent.config()
    }

    /// Returns the collection aggregating metrics for this agent.
    pub fn collection(&self) -> &Arc<StatsCollection> {
        self.agent.collection()
    }

    /// See [`SampleAgent::on_sample`].
    pub fn on_sample<F>(&self, hook: F)
    where
        F: Fn(&StatsCollection) -> HookResult + Send + Sync + 'static,
    {
        self.agent.on_sample(hook);
    }

    /// See [`SampleAgent::on_flushing`].
    pub fn on_flushing<F>(&self, hook: F)
    where
        F: Fn(&StatsCollection) -> HookResult + Send + Sync + 'static,
    {
        self.agent.on_flushing(hook);
    }

    /// See [`SampleAgent::on_flushed`].
    pub fn on_flushed<F>(&self, hook: F)
    where
        F: Fn(&StatsSummary) -> HookResult + Send + Sync + 'static,
    {
        self.agent.on_flushed(hook);
    }

    /// See [`SampleAgent::on_error`].
    pub fn on_error<F>(&self, hook: F)
    where
        F: Fn(ErrorSource, &AgentError) + Send + Sync + 'static,
    {
        self.agent.on_error(hook);
    }

    /// See [`SampleAgent::current_stats`].
    pub fn current_stats(&self) -> Arc<StatsSummary> {
        self.agent.current_stats()
    }

    /// See [`SampleAgent::flush`].
    pub fn flush(&self, timestamp: UnixTimestamp) -> Arc<StatsSummary> {
        self.agent.flush(timestamp)
    }

    /// See [`SampleAgent::is_running`].
    pub fn is_running(&self) -> bool {
        self.agent.is_running()
    }

    /// See [`SampleAgent::start`].
    pub fn start(&self) -> Result<(), AgentError> {
        self.agent.start()
    }

    /// See [`SampleAgent::stop`].
    pub fn stop(&self) {
        self.agent.stop();
    }
}

impl fmt::Debug for StatsAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatsAgent")
            .field("agent", &self.agent)
            .field("samplers", &self.sampler_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;

    #[test]
    fn test_samplers_feed_collection() {
        tally_log::init_test!();

        let agent = StatsAgent::new(AgentConfig::default());
        let reads = Arc::new(AtomicU64::new(10));

        let source = reads.clone();
        agent.add_gauge("queue.size", move || source.fetch_add(1, Ordering::SeqCst));
        agent.add_timer("request", || 2.5);
        agent.add_sampler("requests", || Ok(MetricValue::Counter(3)));
        assert_eq!(agent.sampler_count(), 3);

        let hooks = Arc::clone(agent.agent.hooks());
        hooks.sample(agent.collection());
        hooks.sample(agent.collection());

        let summary = agent.flush(UnixTimestamp::from_secs(60));
        assert_eq!(summary.get("stats.gauges.queue.size"), Some(11.0));
        assert_eq!(summary.get("stats.timers.request.count"), Some(2.0));
        assert_eq!(summary.get("stats.timers.request.mean"), Some(2.5));
        assert_eq!(summary.get("stats_counts.requests"), Some(6.0));
    }

    #[test]
    fn test_faulty_sampler_is_isolated() {
        let agent = StatsAgent::new(AgentConfig::default());
        let reported = Arc::new(Mutex::new(Vec::new()));

        let sink = reported.clone();
        agent.on_error(move |source, error| sink.lock().push(format!("{source}: {error}")));

        agent.add_sampler("broken", || Err("device unavailable".into()));
        agent.add_gauge("exploding", || panic!("no reading"));
        agent.add_gauge("healthy", || 1);

        agent.agent.hooks().sample(agent.collection());

        let summary = agent.flush(UnixTimestamp::from_secs(60));
        assert_eq!(summary.get("stats.gauges.healthy"), Some(1.0));
        assert_eq!(summary.get("stats.gauges.exploding"), None);

        insta::assert_debug_snapshot!(*reported.lock(), @r###"
        [
            "sampler: hook failed",
            "sampler: panicked: no reading",
        ]
        "###);
    }

    #[test]
    fn test_running_agent_samples() {
        let agent = StatsAgent::new(AgentConfig {
            sample_interval: Duration::from_millis(5),
            flush_interval: Duration::from_secs(10),
        });
        let (tx, rx) = crossbeam_channel::unbounded();

        agent.add_sampler("heartbeat", move || {
            tx.send(()).ok();
            Ok(MetricValue::Gauge(1))
        });

        agent.start().unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        agent.stop();
    }
}
