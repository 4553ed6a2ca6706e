use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::error::PipelineResult;

pub type StartCallback = Box<dyn FnOnce() + Send>;
pub type EndCallback = Box<dyn FnOnce(&PipelineResult<()>) + Send>;

/// One sentence waiting for synthesis and delivery.
///
/// Immutable once enqueued. `on_start` runs right before synthesis begins and
/// `on_end` right after it finishes, on every path, with the job outcome.
/// A job cleared from the queue runs neither.
///
/// # Example
///
/// ```rust,ignore
/// let job = SynthesisJob::new("Hello there.")
///     .turn_start(true)
///     .on_end(|result| tracing::info!(ok = result.is_ok(), "sentence done"));
/// manager.submit_job(job, SubmitMode::Async).await?;
/// ```
pub struct SynthesisJob {
    pub(crate) text: String,
    pub(crate) is_start: bool,
    pub(crate) cancel: Option<CancellationToken>,
    pub(crate) on_start: Option<StartCallback>,
    pub(crate) on_end: Option<EndCallback>,
    pub(crate) completion: Option<oneshot::Sender<()>>,
}

impl SynthesisJob {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_start: false,
            cancel: None,
            on_start: None,
            on_end: None,
            completion: None,
        }
    }

    /// Mark the first sentence of a turn; its first frame logs turn latency.
    pub fn turn_start(mut self, is_start: bool) -> Self {
        self.is_start = is_start;
        self
    }

    /// Run the job under `cancel` instead of the session token. Use a child
    /// of [`TtsManager::job_token`](super::TtsManager::job_token) so session
    /// shutdown still reaches it.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn on_start<F>(mut self, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_start = Some(Box::new(f));
        self
    }

    pub fn on_end<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&PipelineResult<()>) + Send + 'static,
    {
        self.on_end = Some(Box::new(f));
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl std::fmt::Debug for SynthesisJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthesisJob")
            .field("text", &self.text)
            .field("is_start", &self.is_start)
            .field("has_on_start", &self.on_start.is_some())
            .field("has_on_end", &self.on_end.is_some())
            .finish()
    }
}
