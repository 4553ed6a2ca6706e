//! Configuration module for voicebridge
//!
//! Configuration comes from .env files, environment variables and an
//! optional YAML file. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Example
//! ```rust,no_run
//! use voicebridge::config::PipelineConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = PipelineConfig::from_env()?;
//!
//! // Load from YAML file with environment variables as the base
//! let config = PipelineConfig::from_file(&PathBuf::from("voicebridge.yaml"))?;
//! println!("frames of {} ms", config.audio.frame_duration_ms);
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

mod env;
mod yaml;

pub use env::{
    ENV_CHANNELS, ENV_EVENT_QUEUE_SIZE, ENV_EVENT_WORKERS, ENV_FRAME_DURATION_MS,
    ENV_LOOKAHEAD_MS, ENV_SAMPLE_RATE, ENV_SYNC_TIMEOUT_SECS, ENV_TTS_CONFIG, ENV_TTS_PROVIDER,
    ENV_TTS_QUEUE_SIZE,
};
pub use yaml::YamlConfig;

use crate::core::events::{DEFAULT_EVENT_QUEUE_SIZE, DEFAULT_EVENT_WORKERS};
use crate::core::pipeline::{
    DEFAULT_LOOKAHEAD_MS, DEFAULT_SYNC_SUBMIT_TIMEOUT, DEFAULT_TTS_QUEUE_SIZE, SessionOptions,
};
use crate::core::tts::{OutputAudioFormat, TTSError, TtsSettings};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid TTS configuration: {0}")]
    Tts(#[from] TTSError),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Process-wide pipeline configuration
///
/// The default TTS voice is kept in its loose form (`tts_provider` plus
/// `tts_config`) while layers are merged, then resolved into `tts` once.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Output format negotiated with devices that do not specify one
    pub audio: OutputAudioFormat,

    pub tts_queue_size: usize,
    pub sync_submit_timeout_secs: u64,
    pub lookahead_ms: u32,

    pub tts_provider: Option<String>,
    pub tts_config: serde_json::Value,
    /// Resolved default voice, present when `tts_provider` is set
    pub tts: Option<TtsSettings>,

    pub event_workers: usize,
    pub event_queue_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            audio: OutputAudioFormat::default(),
            tts_queue_size: DEFAULT_TTS_QUEUE_SIZE,
            sync_submit_timeout_secs: DEFAULT_SYNC_SUBMIT_TIMEOUT.as_secs(),
            lookahead_ms: DEFAULT_LOOKAHEAD_MS,
            tts_provider: None,
            tts_config: serde_json::Value::Object(Default::default()),
            tts: None,
            event_workers: DEFAULT_EVENT_WORKERS,
            event_queue_size: DEFAULT_EVENT_QUEUE_SIZE,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables over defaults.
    ///
    /// .env files are expected to be loaded by the binary at startup.
    pub fn from_env() -> ConfigResult<Self> {
        let mut config = Self::default();
        env::apply(&mut config)?;
        config.resolve()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let yaml = YamlConfig::from_file(path)?;
        let mut config = Self::default();
        env::apply(&mut config)?;
        config.apply_yaml(yaml);
        config.resolve()?;
        Ok(config)
    }

    fn apply_yaml(&mut self, yaml: YamlConfig) {
        if let Some(audio) = yaml.audio {
            if let Some(v) = audio.sample_rate {
                self.audio.sample_rate = v;
            }
            if let Some(v) = audio.channels {
                self.audio.channels = v;
            }
            if let Some(v) = audio.frame_duration_ms {
                self.audio.frame_duration_ms = v;
            }
        }

        if let Some(pipeline) = yaml.pipeline {
            if let Some(v) = pipeline.tts_queue_size {
                self.tts_queue_size = v;
            }
            if let Some(v) = pipeline.sync_submit_timeout_secs {
                self.sync_submit_timeout_secs = v;
            }
            if let Some(v) = pipeline.lookahead_ms {
                self.lookahead_ms = v;
            }
        }

        if let Some(tts) = yaml.tts {
            if let Some(provider) = tts.provider {
                // A new provider never inherits another provider's settings.
                if self.tts_provider.as_deref() != Some(provider.as_str()) {
                    self.tts_config = serde_json::Value::Object(Default::default());
                }
                self.tts_provider = Some(provider);
            }
            if let Some(config) = tts.config {
                self.tts_config = config;
            }
        }

        if let Some(events) = yaml.events {
            if let Some(v) = events.workers {
                self.event_workers = v;
            }
            if let Some(v) = events.queue_size {
                self.event_queue_size = v;
            }
        }
    }

    /// Validate every field and resolve the default voice.
    pub fn resolve(&mut self) -> ConfigResult<()> {
        let zero_checks = [
            (self.audio.sample_rate == 0, "audio.sample_rate"),
            (self.audio.channels == 0, "audio.channels"),
            (self.audio.frame_duration_ms == 0, "audio.frame_duration_ms"),
            (self.tts_queue_size == 0, "pipeline.tts_queue_size"),
            (self.sync_submit_timeout_secs == 0, "pipeline.sync_submit_timeout_secs"),
            (self.event_workers == 0, "events.workers"),
            (self.event_queue_size == 0, "events.queue_size"),
        ];
        if let Some((_, field)) = zero_checks.iter().find(|(is_zero, _)| *is_zero) {
            return Err(ConfigError::Invalid(format!("{field} must be greater than zero")));
        }

        self.tts = match self.tts_provider.as_deref() {
            Some(provider) => Some(TtsSettings::from_provider_config(provider, &self.tts_config)?),
            None => None,
        };
        Ok(())
    }

    pub fn sync_submit_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_submit_timeout_secs)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            tts_queue_size: self.tts_queue_size,
            sync_submit_timeout: self.sync_submit_timeout(),
            lookahead_ms: self.lookahead_ms,
        }
    }
}
