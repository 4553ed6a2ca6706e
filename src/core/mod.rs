pub mod events;
pub mod pipeline;
pub mod pool;
pub mod tts;

// Re-export commonly used types for convenience
pub use tts::{
    BaseTTS, BoxedTTS, OutputAudioFormat, TTSError, TTSResult, TtsSettings, create_tts_provider,
};

pub use pool::{Lease, PoolError, PoolKey, ResourceFactory, ResourceKind, ResourcePool, TtsPool};

pub use pipeline::{
    AudioTransport, ChannelTransport, PipelineError, PipelineResult, PipelineState, SessionOptions,
    SessionSpec, SubmitMode, SynthesisJob, TransportMessage, TtsManager,
};

pub use events::{ChatMessage, ConversationMemory, EventDispatcher, SessionIdentity};
