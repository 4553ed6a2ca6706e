use serde::Deserialize;
use std::path::Path;

use super::ConfigError;

/// Complete YAML configuration structure
///
/// Every field is optional; anything left out keeps the value it already
/// has from the environment or the defaults.
///
/// # Example YAML structure
/// ```yaml
/// audio:
///   sample_rate: 16000
///   channels: 1
///   frame_duration_ms: 60
///
/// pipeline:
///   tts_queue_size: 10
///   sync_submit_timeout_secs: 30
///   lookahead_ms: 120
///
/// tts:
///   provider: "cosyvoice"
///   config:
///     base_url: "http://127.0.0.1:50000"
///     spk_id: "zh_female"
///
/// events:
///   workers: 10
///   queue_size: 1000
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub audio: Option<AudioYaml>,
    pub pipeline: Option<PipelineYaml>,
    pub tts: Option<TtsYaml>,
    pub events: Option<EventsYaml>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AudioYaml {
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub frame_duration_ms: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PipelineYaml {
    pub tts_queue_size: Option<usize>,
    pub sync_submit_timeout_secs: Option<u64>,
    pub lookahead_ms: Option<u32>,
}

/// Default TTS voice. `config` is the provider's loose settings map.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TtsYaml {
    pub provider: Option<String>,
    pub config: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct EventsYaml {
    pub workers: Option<usize>,
    pub queue_size: Option<usize>,
}

impl YamlConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_str(&contents)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }
}
