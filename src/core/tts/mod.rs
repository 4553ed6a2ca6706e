mod base;
pub mod config;
pub mod cosyvoice;
pub mod indextts;
pub mod minimax;
pub mod provider;

pub use base::{
    AudioFrame, BaseTTS, BoxedTTS, FRAME_CHANNEL_CAPACITY, FrameReceiver, OutputAudioFormat,
    TTSError, TTSResult,
};
pub use config::{CosyVoiceConfig, IndexTtsConfig, MinimaxConfig, TtsSettings};
pub use cosyvoice::{COSYVOICE_INFERENCE_PATH, CosyVoice};
pub use indextts::{INDEXTTS_SPEECH_PATH, IndexTtsVllm};
pub use minimax::{MINIMAX_T2A_PATH, Minimax};
pub use provider::TTSRequestBuilder;

/// Factory function to create a TTS provider from validated settings.
///
/// # Supported Providers
///
/// - `TtsSettings::CosyVoice` - CosyVoice HTTP server (SFT speakers)
/// - `TtsSettings::Minimax` - MiniMax T2A v2
/// - `TtsSettings::IndexTtsVllm` - IndexTTS served through vLLM
///
/// # Example
///
/// ```rust,ignore
/// use voicebridge::core::tts::{create_tts_provider, TtsSettings};
///
/// let settings = TtsSettings::from_provider_config(
///     "indextts_vllm",
///     &serde_json::json!({"voice": "narrator"}),
/// )?;
/// let provider = create_tts_provider(&settings)?;
/// ```
pub fn create_tts_provider(settings: &TtsSettings) -> TTSResult<BoxedTTS> {
    settings.validate()?;
    match settings {
        TtsSettings::CosyVoice(c) => Ok(Box::new(CosyVoice::new(c.clone())?)),
        TtsSettings::Minimax(c) => Ok(Box::new(Minimax::new(c.clone())?)),
        TtsSettings::IndexTtsVllm(c) => Ok(Box::new(IndexTtsVllm::new(c.clone())?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_each_provider() {
        let cases = [
            ("cosyvoice", json!({"spk_id": "narrator"}), "cosyvoice"),
            (
                "minimax",
                json!({"api_key": "k", "group_id": "g", "voice": "v"}),
                "minimax",
            ),
            ("indextts", json!({"voice": "v"}), "indextts_vllm"),
        ];

        for (provider, config, expected) in cases {
            let settings = TtsSettings::from_provider_config(provider, &config).unwrap();
            let tts = create_tts_provider(&settings).unwrap();
            assert_eq!(tts.provider_name(), expected);
            assert!(tts.is_valid());
        }
    }

    #[test]
    fn test_create_rejects_hand_built_invalid_settings() {
        let settings = TtsSettings::IndexTtsVllm(IndexTtsConfig {
            base_url: config::DEFAULT_INDEXTTS_URL.to_string(),
            api_key: None,
            model: config::DEFAULT_INDEXTTS_MODEL.to_string(),
            voice: String::new(),
        });

        match create_tts_provider(&settings) {
            Err(TTSError::InvalidConfiguration(msg)) => assert!(msg.contains("voice")),
            Err(other) => panic!("Expected InvalidConfiguration error, got: {:?}", other),
            Ok(_) => panic!("Expected error for missing voice"),
        }
    }
}
