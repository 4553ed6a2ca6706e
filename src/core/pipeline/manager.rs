//! Per-session synthesis pipeline.
//!
//! A [`TtsManager`] owns one session's job queue, audio history and
//! transport binding. A single consumer task pops jobs in FIFO order and
//! runs each one to completion, pacing included, before touching the next,
//! so sentences can never overlap or reorder.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::{PipelineError, PipelineResult};
use super::history::AudioHistory;
use super::job::SynthesisJob;
use super::pacer::{DEFAULT_LOOKAHEAD_MS, FramePacer};
use super::queue::{JobQueue, QueueError};
use super::transport::AudioTransport;
use crate::core::pool::{Lease, TtsPool};
use crate::core::tts::{AudioFrame, BoxedTTS, OutputAudioFormat, TtsSettings};

pub const DEFAULT_TTS_QUEUE_SIZE: usize = 10;
pub const DEFAULT_SYNC_SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long the consumer waits on an empty queue before re-polling.
const CONSUMER_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Identity and audio configuration of one device session.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub session_id: String,
    pub device_id: String,
    pub format: OutputAudioFormat,
    /// Device default voice
    pub default_tts: TtsSettings,
    /// Speaker-specific override, used instead of the default when set
    pub speaker_tts: Option<TtsSettings>,
}

/// Tunables shared by every session of a runtime.
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub tts_queue_size: usize,
    pub sync_submit_timeout: Duration,
    pub lookahead_ms: u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            tts_queue_size: DEFAULT_TTS_QUEUE_SIZE,
            sync_submit_timeout: DEFAULT_SYNC_SUBMIT_TIMEOUT,
            lookahead_ms: DEFAULT_LOOKAHEAD_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMode {
    /// Return once the job is queued
    Async,
    /// Wait until the job has finished, bounded by the sync timeout
    Sync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Queued,
    Synthesizing,
    Delivering,
    Closed,
}

struct SessionInner {
    session_id: String,
    device_id: String,
    format: OutputAudioFormat,
    options: SessionOptions,
    pacer: FramePacer,
    default_tts: TtsSettings,
    speaker_tts: RwLock<Option<TtsSettings>>,
    pool: Arc<TtsPool>,
    transport: Arc<dyn AudioTransport>,
    queue: JobQueue<SynthesisJob>,
    history: AudioHistory,
    cancel: CancellationToken,
    state: Mutex<PipelineState>,
    in_flight: AtomicBool,
    turn_started_at: Mutex<Option<Instant>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to one session's synthesis pipeline. Cheap to clone.
#[derive(Clone)]
pub struct TtsManager {
    inner: Arc<SessionInner>,
}

impl TtsManager {
    /// Build a session pipeline. The session lives until `parent` is
    /// cancelled or [`close`](Self::close) is called.
    pub fn new(
        spec: SessionSpec,
        options: SessionOptions,
        pool: Arc<TtsPool>,
        transport: Arc<dyn AudioTransport>,
        parent: &CancellationToken,
    ) -> PipelineResult<Self> {
        let pacer = FramePacer::new(spec.format.frame_duration_ms, options.lookahead_ms)?;
        if spec.format.sample_rate == 0 || spec.format.channels == 0 {
            return Err(PipelineError::Configuration(format!(
                "invalid output format: {} Hz, {} channels",
                spec.format.sample_rate, spec.format.channels
            )));
        }
        spec.default_tts.validate()?;
        if let Some(speaker) = &spec.speaker_tts {
            speaker.validate()?;
        }

        Ok(Self {
            inner: Arc::new(SessionInner {
                session_id: spec.session_id,
                device_id: spec.device_id,
                format: spec.format,
                options,
                pacer,
                default_tts: spec.default_tts,
                speaker_tts: RwLock::new(spec.speaker_tts),
                pool,
                transport,
                queue: JobQueue::new(options.tts_queue_size),
                history: AudioHistory::new(),
                cancel: parent.child_token(),
                state: Mutex::new(PipelineState::Idle),
                in_flight: AtomicBool::new(false),
                turn_started_at: Mutex::new(None),
                consumer: Mutex::new(None),
            }),
        })
    }

    /// Spawn the consumer task. Returns `false` if it is already running or
    /// the session is closed.
    pub fn start(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        let mut consumer = self.inner.consumer.lock();
        if consumer.is_some() {
            return false;
        }
        *consumer = Some(tokio::spawn(run_consumer(self.inner.clone())));
        info!(
            session_id = %self.inner.session_id,
            device_id = %self.inner.device_id,
            "TTS pipeline started"
        );
        true
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn format(&self) -> OutputAudioFormat {
        self.inner.format
    }

    pub fn state(&self) -> PipelineState {
        *self.inner.state.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == PipelineState::Closed
    }

    /// Token for per-job contexts; cancelled with the session.
    pub fn job_token(&self) -> CancellationToken {
        self.inner.cancel.child_token()
    }

    /// Number of jobs waiting to start.
    pub fn queued(&self) -> usize {
        self.inner.queue.len()
    }

    /// Queue `text` for synthesis. Empty text is accepted and ignored.
    pub async fn submit(&self, text: &str, mode: SubmitMode) -> PipelineResult<()> {
        if text.is_empty() {
            return Ok(());
        }
        self.submit_job(SynthesisJob::new(text), mode).await
    }

    /// Queue a caller-built job.
    ///
    /// In [`SubmitMode::Sync`] this waits for the job to finish. The wait
    /// reports only completion: the job outcome goes to its `on_end`
    /// callback. A timeout or cancellation ends the wait but not the job.
    pub async fn submit_job(&self, mut job: SynthesisJob, mode: SubmitMode) -> PipelineResult<()> {
        if self.is_closed() {
            return Err(PipelineError::Closed);
        }

        let wait_on = job
            .cancel
            .clone()
            .unwrap_or_else(|| self.inner.cancel.clone());

        let completion = match mode {
            SubmitMode::Async => None,
            SubmitMode::Sync => {
                let (tx, rx) = oneshot::channel();
                job.completion = Some(tx);
                Some(rx)
            }
        };

        match self.inner.queue.push(job, &wait_on).await {
            Ok(()) => {}
            Err(QueueError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(QueueError::Closed | QueueError::Timeout) => return Err(PipelineError::Closed),
        }
        self.inner.enter_queued();

        let Some(completion) = completion else {
            return Ok(());
        };

        let timeout = self.inner.options.sync_submit_timeout;
        tokio::select! {
            biased;
            _ = wait_on.cancelled() => Err(PipelineError::Cancelled),
            done = tokio::time::timeout(timeout, completion) => match done {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(PipelineError::Discarded),
                Err(_) => {
                    warn!(session_id = %self.inner.session_id, ?timeout, "Synchronous TTS submit timed out");
                    Err(PipelineError::Timeout(timeout))
                }
            },
        }
    }

    /// Drop every queued job that has not started. The running job, if any,
    /// is unaffected.
    pub fn clear_queue(&self) -> usize {
        let dropped = self.inner.queue.clear();
        if dropped > 0 {
            debug!(session_id = %self.inner.session_id, dropped, "TTS queue cleared");
        }
        self.inner.settle_state();
        dropped
    }

    pub fn clear_audio_history(&self) {
        self.inner.history.clear();
    }

    /// Take the frames delivered so far and reset the history.
    pub fn take_audio_history(&self) -> Vec<AudioFrame> {
        self.inner.history.drain_and_clear()
    }

    /// Replace the speaker override. `None` restores the device default.
    pub fn set_speaker_tts(&self, settings: Option<TtsSettings>) {
        *self.inner.speaker_tts.write() = settings;
    }

    /// Apply a loose speaker voice map carrying a `provider` field.
    ///
    /// A map without a provider falls back to the device default voice.
    pub fn set_speaker_tts_config(&self, config: &serde_json::Value) -> PipelineResult<()> {
        let provider = config
            .get("provider")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|p| !p.is_empty());

        let Some(provider) = provider else {
            warn!(
                session_id = %self.inner.session_id,
                "Speaker TTS config has no provider, using device default"
            );
            self.set_speaker_tts(None);
            return Ok(());
        };

        let mut fields = config.clone();
        if let Some(map) = fields.as_object_mut() {
            map.remove("provider");
        }
        let settings = TtsSettings::from_provider_config(provider, &fields)?;
        self.set_speaker_tts(Some(settings));
        Ok(())
    }

    /// Settings the next job will synthesize with.
    pub fn active_tts(&self) -> TtsSettings {
        self.inner.resolve_settings()
    }

    /// Record the moment the user's turn ended, for first-frame latency.
    pub fn mark_turn_start(&self) {
        *self.inner.turn_started_at.lock() = Some(Instant::now());
    }

    /// Stop the session: cancel in-flight work, discard queued jobs and
    /// wait for the consumer to exit.
    pub async fn close(&self) {
        let dropped = self.inner.teardown();

        let consumer = self.inner.consumer.lock().take();
        if let Some(handle) = consumer {
            if let Err(e) = handle.await {
                warn!(session_id = %self.inner.session_id, error = %e, "TTS consumer task failed");
            }
        }
        if let Some(dropped) = dropped {
            info!(session_id = %self.inner.session_id, dropped, "TTS pipeline closed");
        }
    }
}

async fn run_consumer(inner: Arc<SessionInner>) {
    loop {
        match inner
            .queue
            .pop(&inner.cancel, Some(CONSUMER_POLL_INTERVAL))
            .await
        {
            Ok(job) => inner.process(job).await,
            Err(QueueError::Timeout) => continue,
            Err(QueueError::Cancelled) => {
                // Parent cancellation ends the session just like close()
                if let Some(dropped) = inner.teardown() {
                    info!(session_id = %inner.session_id, dropped, "TTS pipeline closed by parent");
                }
                break;
            }
            Err(QueueError::Closed) => {
                debug!(session_id = %inner.session_id, "TTS queue closed");
                break;
            }
        }
    }
}

impl SessionInner {
    /// Move to `Closed`, cancel in-flight work and discard queued jobs.
    /// Returns the number of dropped jobs, or `None` if already closed.
    fn teardown(&self) -> Option<usize> {
        {
            let mut state = self.state.lock();
            if *state == PipelineState::Closed {
                return None;
            }
            *state = PipelineState::Closed;
        }
        self.cancel.cancel();
        self.queue.close();
        Some(self.queue.clear())
    }

    fn set_state(&self, next: PipelineState) {
        let mut state = self.state.lock();
        if *state != PipelineState::Closed {
            *state = next;
        }
    }

    fn enter_queued(&self) {
        let mut state = self.state.lock();
        if *state == PipelineState::Idle && !self.queue.is_empty() {
            *state = PipelineState::Queued;
        }
    }

    /// Recompute Idle/Queued once no job is being worked on.
    fn settle_state(&self) {
        if self.in_flight.load(Ordering::Acquire) {
            return;
        }
        let next = if self.queue.is_empty() {
            PipelineState::Idle
        } else {
            PipelineState::Queued
        };
        self.set_state(next);
    }

    fn resolve_settings(&self) -> TtsSettings {
        self.speaker_tts
            .read()
            .clone()
            .unwrap_or_else(|| self.default_tts.clone())
    }

    async fn process(&self, job: SynthesisJob) {
        let SynthesisJob {
            text,
            is_start,
            cancel,
            on_start,
            on_end,
            completion,
        } = job;
        let cancel = cancel.unwrap_or_else(|| self.cancel.clone());

        self.in_flight.store(true, Ordering::Release);
        debug!(session_id = %self.session_id, text = %text, "TTS job started");

        if let Some(on_start) = on_start {
            on_start();
        }
        let result = self.synthesize(&cancel, &text, is_start).await;
        match &result {
            Ok(()) => debug!(session_id = %self.session_id, text = %text, "TTS job finished"),
            Err(e) => warn!(session_id = %self.session_id, text = %text, error = %e, "TTS job failed"),
        }
        if let Some(on_end) = on_end {
            on_end(&result);
        }
        if let Some(completion) = completion {
            let _ = completion.send(());
        }

        self.in_flight.store(false, Ordering::Release);
        self.settle_state();
    }

    async fn synthesize(
        &self,
        cancel: &CancellationToken,
        text: &str,
        is_start: bool,
    ) -> PipelineResult<()> {
        if text.is_empty() || cancel.is_cancelled() {
            return Ok(());
        }

        let settings = self.resolve_settings();
        let key = settings.pool_key();
        self.set_state(PipelineState::Synthesizing);

        let lease = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            lease = self.pool.acquire(&key, &settings) => lease?,
        };

        let result = self.deliver(cancel, &lease, text, is_start).await;
        self.pool.release(lease);
        result
    }

    async fn deliver(
        &self,
        cancel: &CancellationToken,
        tts: &Lease<BoxedTTS>,
        text: &str,
        is_start: bool,
    ) -> PipelineResult<()> {
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            opened = tts.text_to_speech_stream(cancel, text, self.format) => opened,
        };
        let mut frames = opened.map_err(PipelineError::Synthesis)?;

        self.transport.send_sentence_start(text).await?;
        self.set_state(PipelineState::Delivering);

        let pacing_started = Instant::now();
        let report = self
            .pacer
            .run(cancel, &mut frames, self.transport.as_ref(), &self.history)
            .await?;

        if is_start {
            let turn_started = *self.turn_started_at.lock();
            if let (Some(turn_started), Some(first)) = (turn_started, report.first_frame_after) {
                let latency = (pacing_started + first).saturating_duration_since(turn_started);
                debug!(
                    session_id = %self.session_id,
                    latency_ms = latency.as_millis() as u64,
                    "First TTS frame of turn delivered"
                );
            }
        }

        debug!(
            session_id = %self.session_id,
            frames = report.frames_sent,
            elapsed_ms = report.elapsed.as_millis() as u64,
            cancelled = report.cancelled,
            "Sentence delivered"
        );

        self.transport.send_sentence_end(text).await?;
        Ok(())
    }
}
