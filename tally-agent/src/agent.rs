use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use arc_swap::ArcSwap;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tally_common::{UnixTimestamp, panic_message};
use tally_metrics::{StatsCollection, StatsSummary};

use crate::error::{AgentError, ErrorSource, HookResult};
use crate::hooks::Hooks;
use crate::schedule::FlushSchedule;

/// Timing parameters of a [`SampleAgent`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AgentConfig {
    /// The time between two sampling passes.
    ///
    /// Defaults to `1` second.
    pub sample_interval: Duration,

    /// The length of a flush window.
    ///
    /// Defaults to `10` seconds. Flushes happen at multiples of this interval counted from the
    /// start of the UTC day.
    pub flush_interval: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(1),
            flush_interval: Duration::from_secs(10),
        }
    }
}

/// State shared between the agent handle and its background thread.
#[derive(Debug)]
struct Shared {
    config: AgentConfig,
    collection: Arc<StatsCollection>,
    hooks: Arc<Hooks>,
    current: ArcSwap<StatsSummary>,
    #[cfg(test)]
    fault: AtomicBool,
}

impl Shared {
    fn flush(&self, timestamp: UnixTimestamp) -> Arc<StatsSummary> {
        self.hooks.flushing(&self.collection);

        let summary = Arc::new(
            self.collection
                .flush(timestamp, self.config.flush_interval),
        );
        self.current.store(Arc::clone(&summary));

        self.hooks.flushed(&summary);
        summary
    }

    fn run_loop(&self, stop_rx: &Receiver<()>) {
        let mut schedule = FlushSchedule::new(SystemTime::now(), self.config.flush_interval);

        loop {
            let started = Instant::now();

            #[cfg(test)]
            if self.fault.load(Ordering::SeqCst) {
                panic!("loop fault");
            }

            self.hooks.sample(&self.collection);

            if let Some(boundary) = schedule.poll(SystemTime::now()) {
                let summary = self.flush(UnixTimestamp::from_system(boundary));
                tally_log::trace!(values = summary.len(), "flushed sample agent");
            }

            let sleep = self
                .config
                .sample_interval
                .saturating_sub(started.elapsed());

            match stop_rx.recv_timeout(sleep) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    }

    fn run(&self, stop_rx: Receiver<()>, running: &AtomicBool) {
        tally_log::debug!("sample agent started");

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.run_loop(&stop_rx)));
        if let Err(payload) = result {
            let error = AgentError::Panic(panic_message(payload.as_ref()));
            self.hooks.report(ErrorSource::Worker, error);
        }

        running.store(false, Ordering::SeqCst);
        tally_log::debug!("sample agent stopped");
    }
}

/// Handle to the background thread of an agent.
///
/// The worker stays in its slot until it is joined. A worker whose stop signal was sent from its
/// own thread may still be finishing its last pass.
#[derive(Debug)]
struct Worker {
    stop_tx: Option<Sender<()>>,
    handle: JoinHandle<()>,
    running: Arc<AtomicBool>,
}

impl Worker {
    /// Returns `true` if the loop neither exited nor was asked to stop.
    fn is_running(&self) -> bool {
        self.stop_tx.is_some() && self.running.load(Ordering::SeqCst)
    }

    fn is_current(&self) -> bool {
        self.handle.thread().id() == thread::current().id()
    }

    fn signal(&mut self) {
        // Dropping the sender wakes up the loop if it is sleeping.
        self.stop_tx = None;
    }

    fn join(mut self) {
        self.signal();

        if self.handle.join().is_err() {
            tally_log::error!("sample agent thread panicked");
        }
    }
}

/// Samples and flushes a [`StatsCollection`] on a background thread.
///
/// While running, the agent repeats sampling passes every
/// [`sample_interval`](AgentConfig::sample_interval):
///
///  1. Invoke all [sample hooks](Self::on_sample), which can push readings into the collection.
///  2. If the next flush boundary has passed, invoke all [flushing hooks](Self::on_flushing),
///     [flush](StatsCollection::flush) the collection and pass the summary to all
///     [flushed hooks](Self::on_flushed).
///  3. Sleep for the remainder of the sample interval. If the pass took longer than the interval,
///     the next pass starts right away.
///
/// Every hook runs in its own fault boundary. Errors and panics are reported to the
/// [error hooks](Self::on_error) and never stop the agent.
///
/// # Example
///
/// ```
/// use tally_agent::{AgentConfig, SampleAgent};
/// use tally_metrics::StatsClientExt;
///
/// let agent = SampleAgent::new(AgentConfig::default());
/// agent.on_sample(|stats| Ok(stats.gauge("queue.size", 42)?));
/// agent.on_flushed(|summary| {
///     println!("flushed {} values", summary.len());
///     Ok(())
/// });
///
/// agent.start().expect("agent should start");
/// agent.stop();
/// ```
#[derive(Debug)]
pub struct SampleAgent {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl SampleAgent {
    /// Creates a stopped agent with an empty collection.
    pub fn new(config: AgentConfig) -> Self {
        Self::with_collection(config, Arc::new(StatsCollection::new()))
    }

    /// Creates a stopped agent that flushes the given collection.
    pub fn with_collection(config: AgentConfig, collection: Arc<StatsCollection>) -> Self {
        let shared = Shared {
            config,
            collection,
            hooks: Arc::new(Hooks::default()),
            current: ArcSwap::from_pointee(StatsSummary::empty(UnixTimestamp::now())),
            #[cfg(test)]
            fault: AtomicBool::new(false),
        };

        Self {
            shared: Arc::new(shared),
            worker: Mutex::new(None),
        }
    }

    /// Returns the timing parameters.
    pub fn config(&self) -> AgentConfig {
        self.shared.config
    }

    /// Returns the collection aggregating metrics for this agent.
    ///
    /// Any number of threads may send metrics into the collection while the agent runs.
    pub fn collection(&self) -> &Arc<StatsCollection> {
        &self.shared.collection
    }

    /// Registers a hook invoked at the start of every sampling pass.
    pub fn on_sample<F>(&self, hook: F)
    where
        F: Fn(&StatsCollection) -> HookResult + Send + Sync + 'static,
    {
        self.shared.hooks.add_sample(hook);
    }

    /// Registers a hook invoked right before every flush.
    ///
    /// Metrics sent by this hook still land in the flushing generation.
    pub fn on_flushing<F>(&self, hook: F)
    where
        F: Fn(&StatsCollection) -> HookResult + Send + Sync + 'static,
    {
        self.shared.hooks.add_flushing(hook);
    }

    /// Registers a hook that receives every flushed summary.
    pub fn on_flushed<F>(&self, hook: F)
    where
        F: Fn(&StatsSummary) -> HookResult + Send + Sync + 'static,
    {
        self.shared.hooks.add_flushed(hook);
    }

    /// Registers a hook that receives every fault raised by hooks or the background loop.
    pub fn on_error<F>(&self, hook: F)
    where
        F: Fn(ErrorSource, &AgentError) + Send + Sync + 'static,
    {
        self.shared.hooks.add_error(hook);
    }

    pub(crate) fn hooks(&self) -> &Arc<Hooks> {
        &self.shared.hooks
    }

    /// Returns the most recently flushed summary.
    ///
    /// Before the first flush, this is an empty summary.
    pub fn current_stats(&self) -> Arc<StatsSummary> {
        self.shared.current.load_full()
    }

    /// Flushes the collection right away, running all flushing and flushed hooks.
    ///
    /// This does not move the schedule of the background loop.
    pub fn flush(&self, timestamp: UnixTimestamp) -> Arc<StatsSummary> {
        self.shared.flush(timestamp)
    }

    /// Returns `true` if the background loop is running.
    ///
    /// This turns `false` as soon as [`stop`](Self::stop) is called, even from a hook whose pass
    /// is still in progress.
    pub fn is_running(&self) -> bool {
        self.worker.lock().as_ref().is_some_and(Worker::is_running)
    }

    /// Spawns the background thread.
    ///
    /// If a previous loop was stopped from one of its own hooks, this waits for its last pass to
    /// complete before spawning a new one. Returns [`AgentError::AlreadyRunning`] if the agent is
    /// running already, or if called from a hook of a loop that has not exited yet.
    pub fn start(&self) -> Result<(), AgentError> {
        let previous = {
            let mut slot = self.worker.lock();
            match slot.take() {
                Some(previous) if previous.is_running() || previous.is_current() => {
                    *slot = Some(previous);
                    return Err(AgentError::AlreadyRunning);
                }
                previous => previous,
            }
        };

        // Joined outside of the lock, since the exiting pass may still query the agent.
        if let Some(previous) = previous {
            previous.join();
        }

        let mut slot = self.worker.lock();
        if slot.is_some() {
            return Err(AgentError::AlreadyRunning);
        }

        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let running = Arc::new(AtomicBool::new(true));

        let shared = Arc::clone(&self.shared);
        let flag = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("tally-agent".to_owned())
            .spawn(move || shared.run(stop_rx, &flag))
            .map_err(AgentError::Spawn)?;

        *slot = Some(Worker {
            stop_tx: Some(stop_tx),
            handle,
            running,
        });
        Ok(())
    }

    /// Signals the background thread to stop and waits until it has exited.
    ///
    /// A pass that is in progress runs to completion. When called from a hook, this only signals
    /// the loop, which exits after the current pass. Does nothing if the agent is not running.
    pub fn stop(&self) {
        let mut slot = self.worker.lock();

        if slot.as_ref().is_some_and(Worker::is_current) {
            // A hook stopping its own agent cannot wait for itself.
            if let Some(worker) = slot.as_mut() {
                worker.signal();
            }
            return;
        }

        let worker = slot.take();
        drop(slot);

        if let Some(worker) = worker {
            worker.join();
        }
    }
}

impl Drop for SampleAgent {
    fn drop(&mut self) {
        self.stop();
    }
}
