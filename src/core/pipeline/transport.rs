//! Outbound audio transport seam.

use async_trait::async_trait;
use serde::{Serialize, Serializer};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::core::tts::AudioFrame;

#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer side is gone
    #[error("transport closed")]
    Closed,

    #[error("transport send failed: {0}")]
    SendFailed(String),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Delivers sentence markers and audio frames to one device.
///
/// Calls for one session are issued sequentially from its consumer task.
#[async_trait]
pub trait AudioTransport: Send + Sync {
    async fn send_sentence_start(&self, text: &str) -> TransportResult<()>;

    async fn send_audio(&self, frame: AudioFrame) -> TransportResult<()>;

    async fn send_sentence_end(&self, text: &str) -> TransportResult<()>;
}

/// Message emitted by [`ChannelTransport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportMessage {
    SentenceStart {
        text: String,
    },
    Audio {
        #[serde(serialize_with = "serialize_hex")]
        frame: AudioFrame,
    },
    SentenceEnd {
        text: String,
    },
}

fn serialize_hex<S: Serializer>(frame: &AudioFrame, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(frame))
}

/// Transport backed by a bounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::Sender<TransportMessage>,
}

impl ChannelTransport {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TransportMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    async fn send(&self, message: TransportMessage) -> TransportResult<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl AudioTransport for ChannelTransport {
    async fn send_sentence_start(&self, text: &str) -> TransportResult<()> {
        self.send(TransportMessage::SentenceStart {
            text: text.to_string(),
        })
        .await
    }

    async fn send_audio(&self, frame: AudioFrame) -> TransportResult<()> {
        self.send(TransportMessage::Audio { frame }).await
    }

    async fn send_sentence_end(&self, text: &str) -> TransportResult<()> {
        self.send(TransportMessage::SentenceEnd {
            text: text.to_string(),
        })
        .await
    }
}
