//! Typed TTS provider configuration.
//!
//! Device and speaker configuration arrive as a provider name plus a loose
//! JSON map. [`TtsSettings::from_provider_config`] turns that pair into one
//! typed variant per provider family and validates it up front, so a bad
//! voice or missing credential fails when the session is configured rather
//! than in the middle of a sentence.

use serde::{Deserialize, Serialize};

use super::base::{TTSError, TTSResult};

pub const DEFAULT_COSYVOICE_URL: &str = "http://127.0.0.1:50000";
pub const DEFAULT_MINIMAX_URL: &str = "https://api.minimax.chat";
pub const DEFAULT_MINIMAX_MODEL: &str = "speech-02-turbo";
pub const DEFAULT_INDEXTTS_URL: &str = "http://127.0.0.1:7860";
pub const DEFAULT_INDEXTTS_MODEL: &str = "indextts-vllm";

fn default_cosyvoice_url() -> String {
    DEFAULT_COSYVOICE_URL.to_string()
}

fn default_minimax_url() -> String {
    DEFAULT_MINIMAX_URL.to_string()
}

fn default_minimax_model() -> String {
    DEFAULT_MINIMAX_MODEL.to_string()
}

fn default_indextts_url() -> String {
    DEFAULT_INDEXTTS_URL.to_string()
}

fn default_indextts_model() -> String {
    DEFAULT_INDEXTTS_MODEL.to_string()
}

/// CosyVoice HTTP server configuration. Voices are addressed by speaker id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CosyVoiceConfig {
    #[serde(default = "default_cosyvoice_url", alias = "api_url")]
    pub base_url: String,
    #[serde(default)]
    pub spk_id: String,
    #[serde(default)]
    pub model: Option<String>,
}

/// MiniMax T2A configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinimaxConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub group_id: String,
    #[serde(default = "default_minimax_model")]
    pub model: String,
    #[serde(default)]
    pub voice: String,
    #[serde(default = "default_minimax_url", alias = "api_url")]
    pub base_url: String,
}

/// IndexTTS (vLLM) OpenAI-compatible speech endpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexTtsConfig {
    #[serde(default = "default_indextts_url", alias = "api_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_indextts_model")]
    pub model: String,
    #[serde(default)]
    pub voice: String,
}

/// Closed set of supported TTS provider configurations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "provider")]
pub enum TtsSettings {
    #[serde(rename = "cosyvoice")]
    CosyVoice(CosyVoiceConfig),
    #[serde(rename = "minimax")]
    Minimax(MinimaxConfig),
    #[serde(rename = "indextts_vllm")]
    IndexTtsVllm(IndexTtsConfig),
}

impl TtsSettings {
    /// Parse and validate a provider name plus its loose configuration map.
    ///
    /// Provider names are matched case-insensitively and accept the common
    /// aliases (`cosy_voice`, `index-tts`, ...).
    pub fn from_provider_config(provider: &str, config: &serde_json::Value) -> TTSResult<Self> {
        let config = if config.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            config.clone()
        };

        let parse_err = |e: serde_json::Error| {
            TTSError::InvalidConfiguration(format!("{provider} config is malformed: {e}"))
        };

        let settings = match provider.trim().to_lowercase().as_str() {
            "cosyvoice" | "cosy_voice" | "cosy-voice" => {
                Self::CosyVoice(serde_json::from_value(config).map_err(parse_err)?)
            }
            "minimax" | "mini_max" | "mini-max" => {
                Self::Minimax(serde_json::from_value(config).map_err(parse_err)?)
            }
            "indextts_vllm" | "indextts" | "index-tts" | "index_tts" | "indextts-vllm" => {
                Self::IndexTtsVllm(serde_json::from_value(config).map_err(parse_err)?)
            }
            other => {
                return Err(TTSError::InvalidConfiguration(format!(
                    "Unsupported TTS provider: {other}. Supported providers: cosyvoice, minimax, indextts_vllm"
                )));
            }
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Reject configurations that could never synthesize.
    pub fn validate(&self) -> TTSResult<()> {
        let require = |value: &str, field: &str| {
            if value.trim().is_empty() {
                Err(TTSError::InvalidConfiguration(format!(
                    "{} requires a non-empty `{field}`",
                    self.provider_name()
                )))
            } else {
                Ok(())
            }
        };

        match self {
            Self::CosyVoice(c) => {
                require(&c.base_url, "base_url")?;
                require(&c.spk_id, "spk_id")
            }
            Self::Minimax(c) => {
                require(&c.api_key, "api_key")?;
                require(&c.group_id, "group_id")?;
                require(&c.voice, "voice")?;
                require(&c.base_url, "base_url")
            }
            Self::IndexTtsVllm(c) => {
                require(&c.base_url, "base_url")?;
                require(&c.voice, "voice")
            }
        }
    }

    pub fn provider_name(&self) -> &'static str {
        match self {
            Self::CosyVoice(_) => "cosyvoice",
            Self::Minimax(_) => "minimax",
            Self::IndexTtsVllm(_) => "indextts_vllm",
        }
    }

    /// Voice/timbre identifier. CosyVoice addresses speakers by `spk_id`,
    /// every other family uses `voice`.
    pub fn voice_id(&self) -> Option<&str> {
        let voice = match self {
            Self::CosyVoice(c) => c.spk_id.as_str(),
            Self::Minimax(c) => c.voice.as_str(),
            Self::IndexTtsVllm(c) => c.voice.as_str(),
        };
        let voice = voice.trim();
        (!voice.is_empty()).then_some(voice)
    }

    /// Pool instance key: `provider` or `provider:voice`.
    pub fn pool_key(&self) -> String {
        match self.voice_id() {
            Some(voice) => format!("{}:{voice}", self.provider_name()),
            None => self.provider_name().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cosyvoice_reads_spk_id() {
        let settings = TtsSettings::from_provider_config(
            "cosyvoice",
            &json!({"spk_id": "zh_female", "voice": "ignored"}),
        )
        .unwrap();
        assert_eq!(settings.voice_id(), Some("zh_female"));
        assert_eq!(settings.pool_key(), "cosyvoice:zh_female");
    }

    #[test]
    fn test_other_providers_read_voice() {
        let settings = TtsSettings::from_provider_config(
            "indextts_vllm",
            &json!({"voice": "clone-01", "spk_id": "ignored"}),
        )
        .unwrap();
        assert_eq!(settings.voice_id(), Some("clone-01"));
        assert_eq!(settings.pool_key(), "indextts_vllm:clone-01");

        let settings = TtsSettings::from_provider_config(
            "MiniMax",
            &json!({"api_key": "k", "group_id": "g", "voice": "female-shaonv"}),
        )
        .unwrap();
        assert_eq!(settings.pool_key(), "minimax:female-shaonv");
    }

    #[test]
    fn test_defaults_are_applied() {
        let settings =
            TtsSettings::from_provider_config("index-tts", &json!({"voice": "v"})).unwrap();
        match settings {
            TtsSettings::IndexTtsVllm(c) => {
                assert_eq!(c.base_url, DEFAULT_INDEXTTS_URL);
                assert_eq!(c.model, DEFAULT_INDEXTTS_MODEL);
                assert!(c.api_key.is_none());
            }
            other => panic!("Expected IndexTtsVllm, got: {:?}", other),
        }
    }

    #[test]
    fn test_missing_voice_fails_fast() {
        let result = TtsSettings::from_provider_config("indextts_vllm", &json!({}));
        match result {
            Err(TTSError::InvalidConfiguration(msg)) => assert!(msg.contains("voice")),
            other => panic!("Expected InvalidConfiguration error, got: {:?}", other),
        }

        let result = TtsSettings::from_provider_config("minimax", &json!({"voice": "v"}));
        assert!(matches!(result, Err(TTSError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let result = TtsSettings::from_provider_config("edge", &json!({}));
        match result {
            Err(TTSError::InvalidConfiguration(msg)) => {
                assert!(msg.contains("cosyvoice"));
                assert!(msg.contains("indextts_vllm"));
            }
            other => panic!("Expected InvalidConfiguration error, got: {:?}", other),
        }
    }

    #[test]
    fn test_wrong_field_type_is_configuration_error() {
        let result = TtsSettings::from_provider_config("cosyvoice", &json!({"spk_id": 42}));
        assert!(matches!(result, Err(TTSError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_tagged_serde_round_trip() {
        let yaml = "provider: cosyvoice\nspk_id: narrator\n";
        let settings: TtsSettings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.pool_key(), "cosyvoice:narrator");
    }
}
