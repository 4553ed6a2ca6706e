//! MiniMax T2A v2 provider.
//!
//! The non-streaming T2A endpoint answers with JSON carrying the whole
//! utterance as hex-encoded PCM. The audio is decoded once and then cut
//! into frames like every other provider.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::base::{BaseTTS, FrameReceiver, OutputAudioFormat, TTSError, TTSResult};
use super::config::MinimaxConfig;
use super::provider::{TTSRequestBuilder, http_client, send_checked, spawn_frame_pump};

pub const MINIMAX_T2A_PATH: &str = "/v1/t2a_v2";

const PROVIDER: &str = "minimax";

#[derive(Debug, Clone)]
struct MinimaxRequestBuilder {
    endpoint: String,
    api_key: String,
    group_id: String,
    model: String,
    voice: String,
}

impl TTSRequestBuilder for MinimaxRequestBuilder {
    fn build_http_request(
        &self,
        client: &reqwest::Client,
        text: &str,
        format: OutputAudioFormat,
    ) -> reqwest::RequestBuilder {
        let body = json!({
            "model": self.model,
            "text": text,
            "stream": false,
            "voice_setting": {
                "voice_id": self.voice,
                "speed": 1.0,
                "vol": 1.0,
                "pitch": 0,
            },
            "audio_setting": {
                "sample_rate": format.sample_rate,
                "format": "pcm",
                "channel": format.channels,
            },
        });

        client
            .post(&self.endpoint)
            .query(&[("GroupId", self.group_id.as_str())])
            .bearer_auth(&self.api_key)
            .json(&body)
    }
}

#[derive(Debug, Deserialize)]
struct T2aResponse {
    #[serde(default)]
    data: Option<T2aData>,
    #[serde(default)]
    base_resp: Option<BaseResp>,
}

#[derive(Debug, Deserialize)]
struct T2aData {
    #[serde(default)]
    audio: String,
}

#[derive(Debug, Deserialize)]
struct BaseResp {
    status_code: i64,
    #[serde(default)]
    status_msg: String,
}

impl T2aResponse {
    /// Decode the audio payload, surfacing API-level failures.
    fn into_audio(self) -> TTSResult<Bytes> {
        if let Some(base) = &self.base_resp {
            if base.status_code != 0 {
                return Err(TTSError::ProviderError(format!(
                    "minimax status {}: {}",
                    base.status_code, base.status_msg
                )));
            }
        }

        let audio = self.data.map(|d| d.audio).unwrap_or_default();
        if audio.is_empty() {
            return Err(TTSError::ProviderError(
                "minimax returned no audio".to_string(),
            ));
        }

        hex::decode(audio.trim())
            .map(Bytes::from)
            .map_err(|e| TTSError::ProviderError(format!("minimax audio is not valid hex: {e}")))
    }
}

/// MiniMax T2A provider
pub struct Minimax {
    request_builder: RwLock<MinimaxRequestBuilder>,
    closed: AtomicBool,
}

impl Minimax {
    pub fn new(config: MinimaxConfig) -> TTSResult<Self> {
        if config.api_key.trim().is_empty() || config.group_id.trim().is_empty() {
            return Err(TTSError::InvalidConfiguration(
                "minimax requires api_key and group_id".to_string(),
            ));
        }

        Ok(Self {
            request_builder: RwLock::new(MinimaxRequestBuilder {
                endpoint: format!(
                    "{}{MINIMAX_T2A_PATH}",
                    config.base_url.trim().trim_end_matches('/')
                ),
                api_key: config.api_key.trim().to_string(),
                group_id: config.group_id.trim().to_string(),
                model: config.model,
                voice: config.voice.trim().to_string(),
            }),
            closed: AtomicBool::new(false),
        })
    }

    pub fn voice(&self) -> String {
        self.request_builder.read().voice.clone()
    }
}

#[async_trait]
impl BaseTTS for Minimax {
    fn provider_name(&self) -> &'static str {
        PROVIDER
    }

    async fn text_to_speech_stream(
        &self,
        cancel: &CancellationToken,
        text: &str,
        format: OutputAudioFormat,
    ) -> TTSResult<FrameReceiver> {
        if !self.is_valid() {
            return Err(TTSError::Closed);
        }

        let request = self
            .request_builder
            .read()
            .build_http_request(http_client(), text, format);
        let response = send_checked(PROVIDER, request).await?;
        let payload: T2aResponse = response
            .json()
            .await
            .map_err(|e| TTSError::ProviderError(format!("minimax response is malformed: {e}")))?;
        let audio = payload.into_audio()?;

        let body = futures::stream::iter(vec![Ok::<Bytes, reqwest::Error>(audio)]);
        Ok(spawn_frame_pump(PROVIDER, body, format, cancel.clone()))
    }

    fn set_voice(&self, voice_config: &serde_json::Value) -> TTSResult<()> {
        let voice = ["voice", "character"]
            .iter()
            .filter_map(|field| voice_config.get(field).and_then(|v| v.as_str()))
            .map(str::trim)
            .find(|v| !v.is_empty())
            .ok_or_else(|| {
                TTSError::InvalidVoice("voice config requires `voice` or `character`".to_string())
            })?;

        self.request_builder.write().voice = voice.to_string();
        Ok(())
    }

    async fn close(&self) -> TTSResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn is_valid(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }
}
