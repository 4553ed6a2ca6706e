//! Shared HTTP plumbing for streaming TTS providers.
//!
//! Providers build a request with a [`TTSRequestBuilder`], [`send_checked`]
//! performs it and maps transport/status failures to [`TTSError`], and
//! [`spawn_frame_pump`] cuts the response body into fixed-size PCM frames
//! pushed through a bounded channel.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use once_cell::sync::Lazy;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::base::{
    AudioFrame, FRAME_CHANNEL_CAPACITY, FrameReceiver, OutputAudioFormat, TTSError, TTSResult,
};

/// Maximum number of response-body bytes echoed into an error message.
const ERROR_BODY_LIMIT: usize = 2048;

static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(20)
        .timeout(Duration::from_secs(120))
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Failed to build tuned HTTP client, using defaults");
            reqwest::Client::new()
        })
});

/// Process-wide HTTP client shared by all provider instances.
pub(crate) fn http_client() -> &'static reqwest::Client {
    &HTTP_CLIENT
}

/// Provider-specific request construction.
pub trait TTSRequestBuilder {
    /// Build the HTTP request that synthesizes `text` in `format`.
    fn build_http_request(
        &self,
        client: &reqwest::Client,
        text: &str,
        format: OutputAudioFormat,
    ) -> reqwest::RequestBuilder;
}

/// Send a request and reject non-success responses with their body text.
pub(crate) async fn send_checked(
    provider: &'static str,
    request: reqwest::RequestBuilder,
) -> TTSResult<reqwest::Response> {
    let response = request.send().await.map_err(|e| {
        if e.is_connect() || e.is_timeout() {
            TTSError::ConnectionFailed(format!("{provider}: {e}"))
        } else {
            TTSError::ProviderError(format!("{provider} request failed: {e}"))
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let body: String = body.trim().chars().take(ERROR_BODY_LIMIT).collect();
        return Err(TTSError::ProviderError(format!(
            "{provider} returned status {status}: {body}"
        )));
    }

    Ok(response)
}

/// Accumulates arbitrary byte chunks and emits exact frame-sized buffers.
#[derive(Debug)]
pub(crate) struct PcmFramer {
    frame_bytes: usize,
    pending: BytesMut,
}

impl PcmFramer {
    pub(crate) fn new(frame_bytes: usize) -> Self {
        Self {
            frame_bytes: frame_bytes.max(2),
            pending: BytesMut::with_capacity(frame_bytes.max(2) * 2),
        }
    }

    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<AudioFrame> {
        self.pending.extend_from_slice(chunk);
        let mut frames = Vec::with_capacity(self.pending.len() / self.frame_bytes);
        while self.pending.len() >= self.frame_bytes {
            frames.push(self.pending.split_to(self.frame_bytes).freeze());
        }
        frames
    }

    /// Flush the tail, zero-padded to a whole frame.
    pub(crate) fn finish(mut self) -> Option<AudioFrame> {
        if self.pending.is_empty() {
            return None;
        }
        self.pending.resize(self.frame_bytes, 0);
        Some(self.pending.freeze())
    }
}

/// Drive `body` into a frame channel on a background task.
///
/// The task stops early when `cancel` fires or the receiver is dropped.
/// A body error mid-stream is forwarded as a trailing `Err` and ends the
/// sequence; frames already produced stay delivered.
pub(crate) fn spawn_frame_pump<S, E>(
    provider: &'static str,
    body: S,
    format: OutputAudioFormat,
    cancel: CancellationToken,
) -> FrameReceiver
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut body = body;
        let mut framer = PcmFramer::new(format.pcm16_frame_bytes());
        let mut produced = 0usize;

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(provider, produced, "Synthesis stream cancelled");
                    return;
                }
                chunk = body.next() => chunk,
            };

            match chunk {
                Some(Ok(bytes)) => {
                    for frame in framer.push(&bytes) {
                        if tx.send(Ok(frame)).await.is_err() {
                            return;
                        }
                        produced += 1;
                    }
                }
                Some(Err(e)) => {
                    warn!(provider, error = %e, produced, "Synthesis body stream failed");
                    let _ = tx
                        .send(Err(TTSError::ProviderError(format!(
                            "{provider} stream failed after {produced} frame(s): {e}"
                        ))))
                        .await;
                    return;
                }
                None => break,
            }
        }

        if let Some(frame) = framer.finish() {
            if tx.send(Ok(frame)).await.is_ok() {
                produced += 1;
            }
        }
        debug!(provider, produced, "Synthesis stream finished");
    });

    rx
}
