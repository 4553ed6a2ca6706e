//! Process-scoped pipeline context.
//!
//! [`PipelineRuntime`] owns everything shared between sessions: the TTS
//! resource pool and the event dispatcher. It is created once at startup,
//! handed to whatever accepts device connections, and torn down explicitly.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::PipelineConfig;
use crate::core::events::EventDispatcher;
use crate::core::pipeline::{AudioTransport, PipelineError, PipelineResult, SessionSpec, TtsManager};
use crate::core::pool::TtsPool;

pub struct PipelineRuntime {
    config: PipelineConfig,
    tts_pool: Arc<TtsPool>,
    events: Arc<EventDispatcher>,
    shutdown: CancellationToken,
}

impl PipelineRuntime {
    /// Build the runtime with the HTTP provider pool. Must be called from
    /// within a tokio runtime.
    pub fn init(config: PipelineConfig) -> Self {
        Self::with_pool(config, Arc::new(TtsPool::for_tts()))
    }

    /// Build the runtime around an existing TTS pool.
    pub fn with_pool(config: PipelineConfig, tts_pool: Arc<TtsPool>) -> Self {
        let events = Arc::new(EventDispatcher::new(
            config.event_workers,
            config.event_queue_size,
        ));
        info!(
            sample_rate = config.audio.sample_rate,
            frame_ms = config.audio.frame_duration_ms,
            tts_provider = config.tts_provider.as_deref().unwrap_or("none"),
            "Pipeline runtime initialized"
        );

        Self {
            config,
            tts_pool,
            events,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn tts_pool(&self) -> &Arc<TtsPool> {
        &self.tts_pool
    }

    pub fn events(&self) -> &Arc<EventDispatcher> {
        &self.events
    }

    /// Session spec using the configured output format and default voice.
    pub fn default_session_spec(
        &self,
        session_id: impl Into<String>,
        device_id: impl Into<String>,
    ) -> PipelineResult<SessionSpec> {
        let default_tts = self.config.tts.clone().ok_or_else(|| {
            PipelineError::Configuration("no default TTS provider configured".to_string())
        })?;

        Ok(SessionSpec {
            session_id: session_id.into(),
            device_id: device_id.into(),
            format: self.config.audio,
            default_tts,
            speaker_tts: None,
        })
    }

    /// Create and start a session pipeline bound to `transport`.
    pub fn session(
        &self,
        spec: SessionSpec,
        transport: Arc<dyn AudioTransport>,
    ) -> PipelineResult<TtsManager> {
        if self.shutdown.is_cancelled() {
            return Err(PipelineError::Closed);
        }

        let manager = TtsManager::new(
            spec,
            self.config.session_options(),
            self.tts_pool.clone(),
            transport,
            &self.shutdown,
        )?;
        manager.start();
        Ok(manager)
    }

    /// Cancel every session, drain pending events and destroy pooled
    /// providers.
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.events.shutdown().await;
        self.tts_pool.shutdown().await;
        info!("Pipeline runtime shut down");
    }
}
