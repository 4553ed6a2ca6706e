use std::env;
use std::str::FromStr;

use super::{ConfigError, PipelineConfig};

pub const ENV_SAMPLE_RATE: &str = "VOICEBRIDGE_SAMPLE_RATE";
pub const ENV_CHANNELS: &str = "VOICEBRIDGE_CHANNELS";
pub const ENV_FRAME_DURATION_MS: &str = "VOICEBRIDGE_FRAME_DURATION_MS";
pub const ENV_TTS_QUEUE_SIZE: &str = "VOICEBRIDGE_TTS_QUEUE_SIZE";
pub const ENV_SYNC_TIMEOUT_SECS: &str = "VOICEBRIDGE_SYNC_TIMEOUT_SECS";
pub const ENV_LOOKAHEAD_MS: &str = "VOICEBRIDGE_LOOKAHEAD_MS";
pub const ENV_TTS_PROVIDER: &str = "VOICEBRIDGE_TTS_PROVIDER";
pub const ENV_TTS_CONFIG: &str = "VOICEBRIDGE_TTS_CONFIG";
pub const ENV_EVENT_WORKERS: &str = "VOICEBRIDGE_EVENT_WORKERS";
pub const ENV_EVENT_QUEUE_SIZE: &str = "VOICEBRIDGE_EVENT_QUEUE_SIZE";

/// Non-empty, trimmed value of `key`.
fn var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    var(key)
        .map(|value| {
            value.parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            })
        })
        .transpose()
}

/// Overlay environment variables onto `config`.
pub(super) fn apply(config: &mut PipelineConfig) -> Result<(), ConfigError> {
    if let Some(v) = parse_var(ENV_SAMPLE_RATE)? {
        config.audio.sample_rate = v;
    }
    if let Some(v) = parse_var(ENV_CHANNELS)? {
        config.audio.channels = v;
    }
    if let Some(v) = parse_var(ENV_FRAME_DURATION_MS)? {
        config.audio.frame_duration_ms = v;
    }
    if let Some(v) = parse_var(ENV_TTS_QUEUE_SIZE)? {
        config.tts_queue_size = v;
    }
    if let Some(v) = parse_var(ENV_SYNC_TIMEOUT_SECS)? {
        config.sync_submit_timeout_secs = v;
    }
    if let Some(v) = parse_var(ENV_LOOKAHEAD_MS)? {
        config.lookahead_ms = v;
    }
    if let Some(v) = parse_var(ENV_EVENT_WORKERS)? {
        config.event_workers = v;
    }
    if let Some(v) = parse_var(ENV_EVENT_QUEUE_SIZE)? {
        config.event_queue_size = v;
    }

    if let Some(provider) = var(ENV_TTS_PROVIDER) {
        config.tts_provider = Some(provider);
    }
    if let Some(raw) = var(ENV_TTS_CONFIG) {
        let value: serde_json::Value =
            serde_json::from_str(&raw).map_err(|_| ConfigError::InvalidValue {
                key: ENV_TTS_CONFIG.to_string(),
                value: raw.clone(),
            })?;
        if !value.is_object() {
            return Err(ConfigError::InvalidValue {
                key: ENV_TTS_CONFIG.to_string(),
                value: raw,
            });
        }
        config.tts_config = value;
    }

    Ok(())
}
