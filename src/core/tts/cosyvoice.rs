//! CosyVoice provider.
//!
//! Uses the CosyVoice HTTP server's SFT inference endpoint, which streams
//! raw 16-bit PCM for a pre-registered speaker id.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use super::base::{BaseTTS, FrameReceiver, OutputAudioFormat, TTSError, TTSResult};
use super::config::CosyVoiceConfig;
use super::provider::{TTSRequestBuilder, http_client, send_checked, spawn_frame_pump};

pub const COSYVOICE_INFERENCE_PATH: &str = "/inference_sft";

const PROVIDER: &str = "cosyvoice";

#[derive(Debug, Clone)]
struct CosyVoiceRequestBuilder {
    endpoint: String,
    spk_id: String,
    model: Option<String>,
}

impl TTSRequestBuilder for CosyVoiceRequestBuilder {
    fn build_http_request(
        &self,
        client: &reqwest::Client,
        text: &str,
        format: OutputAudioFormat,
    ) -> reqwest::RequestBuilder {
        let sample_rate = format.sample_rate.to_string();
        let channels = format.channels.to_string();
        let mut form = vec![
            ("tts_text", text),
            ("spk_id", self.spk_id.as_str()),
            ("sample_rate", sample_rate.as_str()),
            ("channels", channels.as_str()),
        ];
        if let Some(model) = &self.model {
            form.push(("model", model.as_str()));
        }

        client.post(&self.endpoint).form(&form)
    }
}

/// CosyVoice streaming provider
pub struct CosyVoice {
    request_builder: RwLock<CosyVoiceRequestBuilder>,
    closed: AtomicBool,
}

impl CosyVoice {
    pub fn new(config: CosyVoiceConfig) -> TTSResult<Self> {
        let spk_id = config.spk_id.trim().to_string();
        if spk_id.is_empty() {
            return Err(TTSError::InvalidConfiguration(
                "cosyvoice requires a spk_id".to_string(),
            ));
        }

        Ok(Self {
            request_builder: RwLock::new(CosyVoiceRequestBuilder {
                endpoint: format!(
                    "{}{COSYVOICE_INFERENCE_PATH}",
                    config.base_url.trim().trim_end_matches('/')
                ),
                spk_id,
                model: config.model,
            }),
            closed: AtomicBool::new(false),
        })
    }

    pub fn speaker_id(&self) -> String {
        self.request_builder.read().spk_id.clone()
    }
}

#[async_trait]
impl BaseTTS for CosyVoice {
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
        let spk_id = voice_config
            .get("spk_id")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| TTSError::InvalidVoice("voice config requires `spk_id`".to_string()))?;

        self.request_builder.write().spk_id = spk_id.to_string();
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
