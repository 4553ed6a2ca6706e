//! Base traits and types for streaming text-to-speech providers.
//!
//! Every provider variant exposes the same small capability surface:
//! open a synthesis stream, switch voice, close, and report validity.
//! Synthesized audio is delivered as a sequence of fixed-duration frames
//! over a bounded channel that closes when synthesis finishes.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One encoded audio slice of `frame_duration_ms`.
pub type AudioFrame = Bytes;

/// Live frame sequence produced by a provider.
///
/// The channel closes after the last frame on normal completion. A provider
/// failing mid-stream sends one `Err` and then closes.
pub type FrameReceiver = mpsc::Receiver<TTSResult<AudioFrame>>;

/// Capacity of the channel between a provider and the frame pacer.
pub const FRAME_CHANNEL_CAPACITY: usize = 100;

/// Errors that can occur during TTS operations
#[derive(Debug, Error)]
pub enum TTSError {
    /// Missing or invalid provider configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Could not reach the provider
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Provider rejected the request or returned malformed audio
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// Voice configuration could not be applied
    #[error("Invalid voice: {0}")]
    InvalidVoice(String),

    /// Provider instance has been closed
    #[error("Provider closed")]
    Closed,
}

pub type TTSResult<T> = Result<T, TTSError>;

/// Output audio format negotiated with the device for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputAudioFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count
    pub channels: u16,
    /// Duration of one frame in milliseconds
    pub frame_duration_ms: u32,
}

impl Default for OutputAudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 24000,
            channels: 1,
            frame_duration_ms: 60,
        }
    }
}

impl OutputAudioFormat {
    pub fn frame_duration(&self) -> Duration {
        Duration::from_millis(u64::from(self.frame_duration_ms))
    }

    /// Size in bytes of one frame of 16-bit little-endian PCM.
    pub fn pcm16_frame_bytes(&self) -> usize {
        let samples = u64::from(self.sample_rate) * u64::from(self.frame_duration_ms) / 1000;
        samples as usize * usize::from(self.channels) * 2
    }
}

/// Capability interface implemented by every TTS provider variant.
///
/// Implementations must be safe to share: a pooled instance may serve
/// several sessions at once unless the pool caps its leases.
#[async_trait]
pub trait BaseTTS: Send + Sync {
    /// Stable provider family name (e.g. "minimax")
    fn provider_name(&self) -> &'static str;

    /// Start synthesizing `text` and return the live frame sequence.
    ///
    /// Setup failures (unreachable provider, rejected request) are returned
    /// directly. Once the receiver is handed out, the sequence closes when
    /// synthesis completes or `cancel` fires; a runtime failure arrives as
    /// a trailing `Err` item.
    async fn text_to_speech_stream(
        &self,
        cancel: &CancellationToken,
        text: &str,
        format: OutputAudioFormat,
    ) -> TTSResult<FrameReceiver>;

    /// Switch the voice used by subsequent synthesis calls.
    fn set_voice(&self, voice_config: &serde_json::Value) -> TTSResult<()>;

    /// Release provider-side resources. Further synthesis fails with `Closed`.
    async fn close(&self) -> TTSResult<()>;

    /// Whether this instance can still synthesize.
    fn is_valid(&self) -> bool;
}

pub type BoxedTTS = Box<dyn BaseTTS>;
