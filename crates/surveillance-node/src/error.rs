use thiserror::Error;

/// Errors surfaced by the pipeline controller.
///
/// Steady-state failures (frame reads, detector or embedding errors, full
/// queues) are absorbed inside the workers and never reach this type.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to open frame source: {0:#}")]
    SourceOpen(#[source] anyhow::Error),

    #[error("failed to release frame source: {0:#}")]
    SourceRelease(#[source] anyhow::Error),

    #[error("pipeline already stopped")]
    AlreadyStopped,

    #[error("{0} worker panicked")]
    WorkerPanicked(&'static str),
}

impl PipelineError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
