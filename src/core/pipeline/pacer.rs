//! Real-time frame pacing.
//!
//! The pacer keeps the device a fixed look-ahead ahead of playback: the
//! first `cache_frame_count` frames go out immediately, every later frame
//! `i` waits until `start + (i - cache_frame_count) * frame_duration`. When
//! the upstream sequence ends, the pacer waits until everything it sent has
//! had time to play, so the next sentence never overlaps this one.
//!
//! A stalled provider stalls delivery; no filler silence is generated.

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::history::AudioHistory;
use super::transport::{AudioTransport, TransportError};
use crate::core::tts::{FrameReceiver, TTSError};

/// Audio the device should hold in its buffer ahead of playback.
pub const DEFAULT_LOOKAHEAD_MS: u32 = 120;

#[derive(Debug, Error)]
pub enum PacerError {
    #[error("frame duration must be greater than zero")]
    InvalidFrameDuration,

    /// Sending one frame failed; nothing after it was sent
    #[error("failed to send frame {frame_index}: {source}")]
    Transport {
        frame_index: usize,
        #[source]
        source: TransportError,
    },

    /// The provider failed mid-stream; the playback drain was skipped
    #[error("synthesis failed after {frames_sent} frame(s): {source}")]
    Synthesis {
        frames_sent: usize,
        #[source]
        source: TTSError,
    },
}

pub type PacerResult<T> = Result<T, PacerError>;

/// Outcome of one paced delivery.
#[derive(Debug, Clone, Copy)]
pub struct PacingReport {
    pub frames_sent: usize,
    /// Delivery stopped because the session was cancelled
    pub cancelled: bool,
    pub elapsed: Duration,
    /// Time from pacing start to the first frame leaving
    pub first_frame_after: Option<Duration>,
}

#[derive(Debug, Clone, Copy)]
pub struct FramePacer {
    frame_duration: Duration,
    cache_frame_count: usize,
}

impl FramePacer {
    pub fn new(frame_duration_ms: u32, lookahead_ms: u32) -> PacerResult<Self> {
        if frame_duration_ms == 0 {
            return Err(PacerError::InvalidFrameDuration);
        }
        let cache_frame_count = ((lookahead_ms / frame_duration_ms) as usize).max(1);
        Ok(Self {
            frame_duration: Duration::from_millis(u64::from(frame_duration_ms)),
            cache_frame_count,
        })
    }

    pub fn frame_duration(&self) -> Duration {
        self.frame_duration
    }

    /// Frames sent ahead of real time.
    pub fn cache_frame_count(&self) -> usize {
        self.cache_frame_count
    }

    /// Deliver every frame from `frames` to `transport`, copying each one
    /// into `history` after it is sent.
    ///
    /// Cancellation ends delivery at the next suspension point without an
    /// error and without sending another frame.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        frames: &mut FrameReceiver,
        transport: &dyn AudioTransport,
        history: &AudioHistory,
    ) -> PacerResult<PacingReport> {
        let start = Instant::now();
        let mut sent = 0usize;
        let mut first_frame_after = None;

        debug!(
            cache_frames = self.cache_frame_count,
            frame_ms = self.frame_duration.as_millis() as u64,
            "Frame pacing started"
        );

        let report = |sent: usize, cancelled: bool, first: Option<Duration>| PacingReport {
            frames_sent: sent,
            cancelled,
            elapsed: start.elapsed(),
            first_frame_after: first,
        };

        loop {
            if sent > self.cache_frame_count {
                let due = start + self.frame_duration * (sent - self.cache_frame_count) as u32;
                if Instant::now() < due {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            debug!(frames_sent = sent, "Frame pacing cancelled");
                            return Ok(report(sent, true, first_frame_after));
                        }
                        _ = tokio::time::sleep_until(due) => {}
                    }
                }
            }

            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(frames_sent = sent, "Frame pacing cancelled");
                    return Ok(report(sent, true, first_frame_after));
                }
                next = frames.recv() => next,
            };

            let frame = match next {
                Some(Ok(frame)) => frame,
                Some(Err(source)) => {
                    error!(frames_sent = sent, error = %source, "Synthesis stream failed");
                    return Err(PacerError::Synthesis {
                        frames_sent: sent,
                        source,
                    });
                }
                None => break,
            };

            let len = frame.len();
            if let Err(source) = transport.send_audio(frame.clone()).await {
                error!(frame_index = sent, len, error = %source, "Failed to send audio frame");
                return Err(PacerError::Transport {
                    frame_index: sent,
                    source,
                });
            }
            history.append(&frame);

            sent += 1;
            if sent == 1 {
                first_frame_after = Some(start.elapsed());
            }
            if sent % 100 == 0 {
                debug!(frames_sent = sent, "Frame pacing progress");
            }
        }

        // Let the device play out what it has buffered.
        let total = self.frame_duration * sent as u32;
        let elapsed = start.elapsed();
        if total > elapsed {
            let remaining = total - elapsed;
            debug!(
                remaining_ms = remaining.as_millis() as u64,
                frames_sent = sent,
                "Waiting for device playback to drain"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Ok(report(sent, true, first_frame_after));
                }
                _ = tokio::time::sleep(remaining) => {}
            }
        }

        debug!(frames_sent = sent, "Frame pacing finished");
        Ok(report(sent, false, first_frame_after))
    }
}
