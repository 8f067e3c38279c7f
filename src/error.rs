//! Error type shared by the random walk, the collectors and the task dispatchers.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T, E = MhrwError> = std::result::Result<T, E>;

/// Everything that can go wrong while setting up, running or collecting random walks.
///
/// Interruption is reported through [`MhrwError::TasksInterrupted`]. It is not a failure of
/// any task; callers usually want to match on it separately (see [`MhrwError::is_interrupted`]).
#[derive(Debug, Error)]
pub enum MhrwError {
    /// Invalid parameters, detected before any iteration is run.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The tasks were interrupted on request.
    #[error("tasks interrupted")]
    TasksInterrupted,

    #[error("walker error: {0}")]
    Walker(String),

    #[error("stats collector error: {0}")]
    StatsCollector(String),

    #[error("controller error: {0}")]
    Controller(String),

    /// A task failed while the dispatcher was configured to abort on the first failure.
    #[error("task #{task} failed: {source}")]
    TaskFailed {
        task: usize,
        #[source]
        source: Box<MhrwError>,
    },

    /// A dispatcher worker thread panicked; its task results are lost.
    #[error("worker #{0} panicked")]
    WorkerPanicked(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[cfg(feature = "csv")]
    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl MhrwError {
    /// Whether this is the interruption condition, possibly wrapped in a task failure.
    pub fn is_interrupted(&self) -> bool {
        match self {
            MhrwError::TasksInterrupted => true,
            MhrwError::TaskFailed { source, .. } => source.is_interrupted(),
            _ => false,
        }
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        MhrwError::Config(msg.into())
    }
}
