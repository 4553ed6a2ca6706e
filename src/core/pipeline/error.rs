//! Pipeline error types
//!
//! Job failures are reported to the job's end callback; synchronous submitters
//! only see the submit-level variants (`Timeout`, `Cancelled`, `Closed`,
//! `Discarded`).

use thiserror::Error;

use super::pacer::PacerError;
use super::transport::TransportError;
use crate::core::pool::PoolError;
use crate::core::tts::TTSError;

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    // ─────────────────────────────────────────────────────────────────────────
    // Job errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Missing or invalid provider/voice configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The pool could not provide a provider instance
    #[error("Failed to acquire provider: {0}")]
    PoolAcquisition(#[source] PoolError),

    /// The provider failed to start or produce the stream
    #[error("Synthesis failed: {0}")]
    Synthesis(#[source] TTSError),

    /// Delivering a marker or frame failed
    #[error("Transport error: {0}")]
    Transport(#[source] TransportError),

    // ─────────────────────────────────────────────────────────────────────────
    // Submit errors
    // ─────────────────────────────────────────────────────────────────────────
    /// A synchronous submit waited longer than its bound
    #[error("Timed out after {0:?} waiting for synthesis")]
    Timeout(std::time::Duration),

    /// The submitter's wait was cancelled
    #[error("Submit cancelled")]
    Cancelled,

    /// The session no longer accepts work
    #[error("Session closed")]
    Closed,

    /// The job was cleared from the queue before it started
    #[error("Job discarded before it started")]
    Discarded,
}

impl From<PoolError> for PipelineError {
    fn from(e: PoolError) -> Self {
        Self::PoolAcquisition(e)
    }
}

impl From<TTSError> for PipelineError {
    fn from(e: TTSError) -> Self {
        match e {
            TTSError::InvalidConfiguration(msg) | TTSError::InvalidVoice(msg) => {
                Self::Configuration(msg)
            }
            other => Self::Synthesis(other),
        }
    }
}

impl From<TransportError> for PipelineError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<PacerError> for PipelineError {
    fn from(e: PacerError) -> Self {
        match e {
            PacerError::Transport { source, .. } => Self::Transport(source),
            PacerError::Synthesis { source, .. } => Self::Synthesis(source),
            PacerError::InvalidFrameDuration => Self::Configuration(e.to_string()),
        }
    }
}
