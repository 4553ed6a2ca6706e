pub mod error;
pub mod history;
pub mod job;
pub mod manager;
pub mod pacer;
pub mod queue;
pub mod transport;

pub use error::{PipelineError, PipelineResult};
pub use history::AudioHistory;
pub use job::{EndCallback, StartCallback, SynthesisJob};
pub use manager::{
    DEFAULT_SYNC_SUBMIT_TIMEOUT, DEFAULT_TTS_QUEUE_SIZE, PipelineState, SessionOptions,
    SessionSpec, SubmitMode, TtsManager,
};
pub use pacer::{DEFAULT_LOOKAHEAD_MS, FramePacer, PacerError, PacerResult, PacingReport};
pub use queue::{JobQueue, QueueError, QueueResult};
pub use transport::{
    AudioTransport, ChannelTransport, TransportError, TransportMessage, TransportResult,
};
