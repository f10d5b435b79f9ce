use std::fmt;
use std::io;

/// The error type returned by hooks and samplers.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// The result type returned by hooks and samplers.
pub type HookResult = Result<(), HookError>;

/// Identifies where a fault reported to [error hooks](crate::SampleAgent::on_error) originated.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorSource {
    /// A hook registered with [`on_sample`](crate::SampleAgent::on_sample).
    Sample,
    /// A hook registered with [`on_flushing`](crate::SampleAgent::on_flushing).
    Flushing,
    /// A hook registered with [`on_flushed`](crate::SampleAgent::on_flushed).
    Flushed,
    /// A sampler registered with a [`StatsAgent`](crate::StatsAgent).
    Sampler,
    /// The background loop itself. The agent stops after reporting this fault.
    Worker,
}

impl ErrorSource {
    /// Returns the name of this source for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sample => "sample",
            Self::Flushing => "flushing",
            Self::Flushed => "flushed",
            Self::Sampler => "sampler",
            Self::Worker => "worker",
        }
    }
}

impl fmt::Display for ErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Any error raised by the [`SampleAgent`](crate::SampleAgent) or reported to its error hooks.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// [`start`](crate::SampleAgent::start) was called while the agent is running.
    #[error("sample agent is already running")]
    AlreadyRunning,
    /// A hook or sampler returned an error.
    #[error("hook failed")]
    Hook(#[source] HookError),
    /// A hook, a sampler or the background loop panicked.
    #[error("panicked: {0}")]
    Panic(String),
    /// The background thread could not be spawned.
    #[error("failed to spawn sample agent thread")]
    Spawn(#[source] io::Error),
}
