use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use tally_common::panic_message;
use tally_metrics::{StatsCollection, StatsSummary};

use crate::error::{AgentError, ErrorSource, HookResult};

type CollectionHook = dyn Fn(&StatsCollection) -> HookResult + Send + Sync;
type SummaryHook = dyn Fn(&StatsSummary) -> HookResult + Send + Sync;
type ErrorHook = dyn Fn(ErrorSource, &AgentError) + Send + Sync;

/// Runs `f` in its own fault boundary.
///
/// Returned errors become [`AgentError::Hook`], panics become [`AgentError::Panic`].
pub fn guarded<F>(f: F) -> Result<(), AgentError>
where
    F: FnOnce() -> HookResult,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => Err(AgentError::Hook(error)),
        Err(payload) => Err(AgentError::Panic(panic_message(payload.as_ref()))),
    }
}

/// Ordered lists of registered hooks.
///
/// Every hook runs in its own fault boundary. Faults are reported to the error hooks and never
/// prevent the remaining hooks from running. Hooks may register further hooks while running,
/// which take effect on the next invocation.
#[derive(Default)]
pub struct Hooks {
    sample: RwLock<Vec<Arc<CollectionHook>>>,
    flushing: RwLock<Vec<Arc<CollectionHook>>>,
    flushed: RwLock<Vec<Arc<SummaryHook>>>,
    error: RwLock<Vec<Arc<ErrorHook>>>,
}

impl Hooks {
    pub fn add_sample<F>(&self, hook: F)
    where
        F: Fn(&StatsCollection) -> HookResult + Send + Sync + 'static,
    {
        self.sample.write().push(Arc::new(hook));
    }

    pub fn add_flushing<F>(&self, hook: F)
    where
        F: Fn(&StatsCollection) -> HookResult + Send + Sync + 'static,
    {
        self.flushing.write().push(Arc::new(hook));
    }

    pub fn add_flushed<F>(&self, hook: F)
    where
        F: Fn(&StatsSummary) -> HookResult + Send + Sync + 'static,
    {
        self.flushed.write().push(Arc::new(hook));
    }

    pub fn add_error<F>(&self, hook: F)
    where
        F: Fn(ErrorSource, &AgentError) + Send + Sync + 'static,
    {
        self.error.write().push(Arc::new(hook));
    }

    pub fn sample(&self, collection: &StatsCollection) {
        self.run_collection(&self.sample, ErrorSource::Sample, collection);
    }

    pub fn flushing(&self, collection: &StatsCollection) {
        self.run_collection(&self.flushing, ErrorSource::Flushing, collection);
    }

    pub fn flushed(&self, summary: &StatsSummary) {
        let hooks = self.flushed.read().clone();
        for hook in hooks {
            if let Err(error) = guarded(|| hook(summary)) {
                self.report(ErrorSource::Flushed, error);
            }
        }
    }

    fn run_collection(
        &self,
        hooks: &RwLock<Vec<Arc<CollectionHook>>>,
        source: ErrorSource,
        collection: &StatsCollection,
    ) {
        let hooks = hooks.read().clone();
        for hook in hooks {
            if let Err(error) = guarded(|| hook(collection)) {
                self.report(source, error);
            }
        }
    }

    /// Logs a fault and passes it to every error hook.
    pub fn report(&self, source: ErrorSource, error: AgentError) {
        tally_log::error!(
            error = &error as &dyn std::error::Error,
            source = source.as_str(),
            "sample agent fault"
        );

        let hooks = self.error.read().clone();
        for hook in hooks {
            let result = panic::catch_unwind(AssertUnwindSafe(|| hook(source, &error)));
            if let Err(payload) = result {
                tally_log::error!(
                    panic = panic_message(payload.as_ref()),
                    "error hook panicked"
                );
            }
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("sample", &self.sample.read().len())
            .field("flushing", &self.flushing.read().len())
            .field("flushed", &self.flushed.read().len())
            .field("error", &self.error.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;

    #[test]
    fn test_guarded() {
        assert!(guarded(|| Ok(())).is_ok());

        let error = guarded(|| Err("broken".into())).unwrap_err();
        assert_eq!(error.to_string(), "hook failed");

        let error = guarded(|| panic!("boom")).unwrap_err();
        assert_eq!(error.to_string(), "panicked: boom");
    }

    #[test]
    fn test_faults_are_isolated() {
        let hooks = Hooks::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let reported = Arc::new(Mutex::new(Vec::new()));

        hooks.add_sample(|_| panic!("first"));
        hooks.add_sample(|_| Err("second".into()));
        let counter = calls.clone();
        hooks.add_sample(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        hooks.add_error(|_, _| panic!("observer"));
        let sink = reported.clone();
        hooks.add_error(move |source, error| {
            sink.lock().push(format!("{source}: {error}"));
        });

        hooks.sample(&StatsCollection::new());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            *reported.lock(),
            ["sample: panicked: first", "sample: hook failed"]
        );
    }
}
