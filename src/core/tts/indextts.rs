//! IndexTTS (vLLM) provider.
//!
//! Talks to the OpenAI-compatible `/audio/speech` endpoint exposed by the
//! IndexTTS vLLM server. Voices must be created beforehand through the
//! server's clone API; the provider only references them by name.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::base::{BaseTTS, FrameReceiver, OutputAudioFormat, TTSError, TTSResult};
use super::config::IndexTtsConfig;
use super::provider::{TTSRequestBuilder, http_client, send_checked, spawn_frame_pump};

pub const INDEXTTS_SPEECH_PATH: &str = "/audio/speech";

const PROVIDER: &str = "indextts_vllm";

#[derive(Debug, Clone)]
struct IndexTtsRequestBuilder {
    endpoint: String,
    api_key: Option<String>,
    model: String,
    voice: String,
}

impl TTSRequestBuilder for IndexTtsRequestBuilder {
    fn build_http_request(
        &self,
        client: &reqwest::Client,
        text: &str,
        format: OutputAudioFormat,
    ) -> reqwest::RequestBuilder {
        let body = json!({
            "model": self.model,
            "input": text,
            "voice": self.voice,
            "response_format": "pcm",
            "sample_rate": format.sample_rate,
            "channels": format.channels,
        });

        let request = client
            .post(&self.endpoint)
            .header("Accept", "audio/pcm,application/octet-stream,*/*")
            .json(&body);

        match &self.api_key {
            Some(key) if !key.trim().is_empty() => request.bearer_auth(key.trim()),
            _ => request,
        }
    }
}

/// IndexTTS vLLM provider
pub struct IndexTtsVllm {
    request_builder: RwLock<IndexTtsRequestBuilder>,
    closed: AtomicBool,
}

impl IndexTtsVllm {
    pub fn new(config: IndexTtsConfig) -> TTSResult<Self> {
        let voice = config.voice.trim().to_string();
        if voice.is_empty() {
            return Err(TTSError::InvalidConfiguration(
                "indextts_vllm requires a voice; create one through the clone API first"
                    .to_string(),
            ));
        }

        let endpoint = format!(
            "{}{INDEXTTS_SPEECH_PATH}",
            config.base_url.trim().trim_end_matches('/')
        );

        Ok(Self {
            request_builder: RwLock::new(IndexTtsRequestBuilder {
                endpoint,
                api_key: config.api_key,
                model: config.model,
                voice,
            }),
            closed: AtomicBool::new(false),
        })
    }

    pub fn voice(&self) -> String {
        self.request_builder.read().voice.clone()
    }

    pub fn endpoint(&self) -> String {
        self.request_builder.read().endpoint.clone()
    }
}

#[async_trait]
impl BaseTTS for IndexTtsVllm {
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

        Ok(spawn_frame_pump(
            PROVIDER,
            Box::pin(response.bytes_stream()),
            format,
            cancel.clone(),
        ))
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
