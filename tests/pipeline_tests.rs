//! Session pipeline tests
//!
//! Drives a real `TtsManager` against a scripted provider served through the
//! resource pool and a channel transport. Frames are short (20 ms) and the
//! look-ahead is two frames so every test finishes well under a second.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use voicebridge::core::pool::BoxError;
use voicebridge::core::tts::{FRAME_CHANNEL_CAPACITY, FrameReceiver};
use voicebridge::{
    BaseTTS, BoxedTTS, ChannelTransport, OutputAudioFormat, PipelineConfig, PipelineError,
    PipelineRuntime, PipelineState, ResourceFactory, ResourceKind, SessionOptions,
    SessionSpec, SubmitMode, SynthesisJob, TTSError, TTSResult, TransportMessage, TtsManager,
    TtsPool, TtsSettings,
};

const FORMAT: OutputAudioFormat = OutputAudioFormat {
    sample_rate: 16000,
    channels: 1,
    frame_duration_ms: 20,
};

/// Shared behaviour and call log of every scripted provider instance.
///
/// Texts starting with `block` wait on `gate` before streaming; texts
/// starting with `fail` are rejected by the provider; texts starting with
/// `break` stream two frames and then fail.
#[derive(Default)]
struct Script {
    frames: usize,
    gate: Notify,
    calls: Mutex<Vec<String>>,
    created: Mutex<Vec<String>>,
    fail_construction: AtomicBool,
}

struct ScriptedTts {
    script: Arc<Script>,
}

#[async_trait]
impl BaseTTS for ScriptedTts {
    fn provider_name(&self) -> &'static str {
        "scripted"
    }

    async fn text_to_speech_stream(
        &self,
        cancel: &CancellationToken,
        text: &str,
        format: OutputAudioFormat,
    ) -> TTSResult<FrameReceiver> {
        self.script.calls.lock().push(text.to_string());

        if text.starts_with("block") {
            tokio::select! {
                _ = cancel.cancelled() => return Err(TTSError::Closed),
                _ = self.script.gate.notified() => {}
            }
        }
        if text.starts_with("fail") {
            return Err(TTSError::ProviderError("scripted failure".to_string()));
        }

        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let frames = self.script.frames;
        let size = format.pcm16_frame_bytes();
        let breaks = text.starts_with("break");
        let cancel = cancel.clone();
        tokio::spawn(async move {
            for i in 0..frames {
                if cancel.is_cancelled() {
                    return;
                }
                if breaks && i == 2 {
                    let failure = TTSError::ProviderError("stream reset".to_string());
                    let _ = tx.send(Err(failure)).await;
                    return;
                }
                if tx.send(Ok(Bytes::from(vec![i as u8; size]))).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }

    fn set_voice(&self, _voice_config: &serde_json::Value) -> TTSResult<()> {
        Ok(())
    }

    async fn close(&self) -> TTSResult<()> {
        Ok(())
    }

    fn is_valid(&self) -> bool {
        true
    }
}

struct ScriptedFactory {
    script: Arc<Script>,
}

#[async_trait]
impl ResourceFactory<BoxedTTS, TtsSettings> for ScriptedFactory {
    async fn create(&self, settings: &TtsSettings) -> Result<BoxedTTS, BoxError> {
        if self.script.fail_construction.load(Ordering::Acquire) {
            return Err("model load failed".into());
        }
        self.script.created.lock().push(settings.pool_key());
        Ok(Box::new(ScriptedTts {
            script: self.script.clone(),
        }))
    }

    fn max_concurrent_leases(&self) -> Option<usize> {
        None
    }
}

fn narrator() -> TtsSettings {
    TtsSettings::from_provider_config("cosyvoice", &json!({"spk_id": "narrator"})).unwrap()
}

fn fast_options() -> SessionOptions {
    SessionOptions {
        tts_queue_size: 10,
        sync_submit_timeout: Duration::from_secs(5),
        lookahead_ms: 40,
    }
}

struct Harness {
    manager: TtsManager,
    pool: Arc<TtsPool>,
    script: Arc<Script>,
    messages: mpsc::Receiver<TransportMessage>,
}

impl Harness {
    fn new(frames: usize, options: SessionOptions) -> Self {
        Self::with_parent(frames, options, &CancellationToken::new())
    }

    fn with_parent(frames: usize, options: SessionOptions, parent: &CancellationToken) -> Self {
        let script = Arc::new(Script {
            frames,
            ..Default::default()
        });
        let pool = Arc::new(TtsPool::new(
            ResourceKind::Tts,
            Arc::new(ScriptedFactory {
                script: script.clone(),
            }),
        ));
        let (transport, messages) = ChannelTransport::new(1024);
        let spec = SessionSpec {
            session_id: "session-1".to_string(),
            device_id: "device-1".to_string(),
            format: FORMAT,
            default_tts: narrator(),
            speaker_tts: None,
        };
        let manager = TtsManager::new(
            spec,
            options,
            pool.clone(),
            Arc::new(transport),
            parent,
        )
        .unwrap();
        assert!(manager.start());

        Self {
            manager,
            pool,
            script,
            messages,
        }
    }

    /// Everything the transport has received so far.
    fn drain(&mut self) -> Vec<TransportMessage> {
        let mut out = Vec::new();
        while let Ok(message) = self.messages.try_recv() {
            out.push(message);
        }
        out
    }

    fn calls(&self) -> Vec<String> {
        self.script.calls.lock().clone()
    }
}

/// Sentence markers as `start:<text>` / `end:<text>`, audio omitted.
fn markers(messages: &[TransportMessage]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|m| match m {
            TransportMessage::SentenceStart { text } => Some(format!("start:{text}")),
            TransportMessage::SentenceEnd { text } => Some(format!("end:{text}")),
            TransportMessage::Audio { .. } => None,
        })
        .collect()
}

fn audio_count(messages: &[TransportMessage]) -> usize {
    messages
        .iter()
        .filter(|m| matches!(m, TransportMessage::Audio { .. }))
        .count()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached within 2s");
}

fn variant(error: &PipelineError) -> &'static str {
    match error {
        PipelineError::Configuration(_) => "configuration",
        PipelineError::PoolAcquisition(_) => "pool_acquisition",
        PipelineError::Synthesis(_) => "synthesis",
        PipelineError::Transport(_) => "transport",
        PipelineError::Timeout(_) => "timeout",
        PipelineError::Cancelled => "cancelled",
        PipelineError::Closed => "closed",
        PipelineError::Discarded => "discarded",
    }
}

/// Job whose outcome (error variant name on failure) is forwarded to the
/// returned receiver.
fn reporting_job(text: &str) -> (SynthesisJob, oneshot::Receiver<Result<(), &'static str>>) {
    let (tx, rx) = oneshot::channel();
    let job = SynthesisJob::new(text).on_end(move |result| {
        let _ = tx.send(result.as_ref().map(|_| ()).map_err(variant));
    });
    (job, rx)
}

#[tokio::test]
async fn test_sentences_delivered_in_submission_order() {
    let mut h = Harness::new(3, fast_options());

    h.manager.submit("one", SubmitMode::Async).await.unwrap();
    h.manager.submit("two", SubmitMode::Async).await.unwrap();
    h.manager.submit("three", SubmitMode::Sync).await.unwrap();

    let messages = h.drain();
    assert_eq!(
        markers(&messages),
        vec![
            "start:one",
            "end:one",
            "start:two",
            "end:two",
            "start:three",
            "end:three"
        ]
    );
    assert_eq!(audio_count(&messages), 9);
    assert_eq!(h.manager.take_audio_history().len(), 9);
    assert!(h.manager.take_audio_history().is_empty());
    assert_eq!(h.calls(), vec!["one", "two", "three"]);
}

#[tokio::test]
async fn test_frames_within_a_sentence_keep_order() {
    let mut h = Harness::new(5, fast_options());
    h.manager.submit("count", SubmitMode::Sync).await.unwrap();

    let firsts: Vec<u8> = h
        .drain()
        .into_iter()
        .filter_map(|m| match m {
            TransportMessage::Audio { frame } => Some(frame[0]),
            _ => None,
        })
        .collect();
    assert_eq!(firsts, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn test_empty_text_is_ignored() {
    let mut h = Harness::new(3, fast_options());
    h.manager.submit("", SubmitMode::Sync).await.unwrap();

    assert_eq!(h.manager.queued(), 0);
    assert!(h.calls().is_empty());
    assert!(h.drain().is_empty());
}

#[tokio::test]
async fn test_clear_queue_drops_only_pending_jobs() {
    let mut h = Harness::new(2, fast_options());
    let ended = Arc::new(AtomicUsize::new(0));

    let counted = |text: &str| {
        let ended = ended.clone();
        SynthesisJob::new(text).on_end(move |_| {
            ended.fetch_add(1, Ordering::SeqCst);
        })
    };

    h.manager
        .submit_job(counted("block-running"), SubmitMode::Async)
        .await
        .unwrap();
    wait_until(|| h.calls().len() == 1).await;

    for text in ["a", "b", "c"] {
        h.manager
            .submit_job(counted(text), SubmitMode::Async)
            .await
            .unwrap();
    }
    assert_eq!(h.manager.queued(), 3);
    assert_eq!(h.manager.clear_queue(), 3);
    assert_eq!(h.manager.queued(), 0);

    h.script.gate.notify_one();
    h.manager.submit("after", SubmitMode::Sync).await.unwrap();

    assert_eq!(ended.load(Ordering::SeqCst), 1);
    assert_eq!(h.calls(), vec!["block-running", "after"]);
    assert_eq!(
        markers(&h.drain()),
        vec![
            "start:block-running",
            "end:block-running",
            "start:after",
            "end:after"
        ]
    );
}

#[tokio::test]
async fn test_cleared_sync_job_reports_discarded() {
    let h = Harness::new(1, fast_options());
    h.manager
        .submit("block-first", SubmitMode::Async)
        .await
        .unwrap();
    wait_until(|| h.calls().len() == 1).await;

    let waiter = {
        let manager = h.manager.clone();
        tokio::spawn(async move { manager.submit("pending", SubmitMode::Sync).await })
    };
    wait_until(|| h.manager.queued() == 1).await;
    assert_eq!(h.manager.clear_queue(), 1);

    match waiter.await.unwrap() {
        Err(PipelineError::Discarded) => {}
        other => panic!("Expected Discarded, got: {:?}", other),
    }
    h.script.gate.notify_one();
}

#[tokio::test]
async fn test_sync_timeout_does_not_abort_job() {
    let options = SessionOptions {
        sync_submit_timeout: Duration::from_millis(50),
        ..fast_options()
    };
    let mut h = Harness::new(2, options);
    let (job, outcome) = reporting_job("block-slow");

    match h.manager.submit_job(job, SubmitMode::Sync).await {
        Err(PipelineError::Timeout(timeout)) => assert_eq!(timeout, Duration::from_millis(50)),
        other => panic!("Expected Timeout, got: {:?}", other),
    }

    h.script.gate.notify_one();
    let result = tokio::time::timeout(Duration::from_secs(2), outcome)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result, Ok(()));
    assert_eq!(
        markers(&h.drain()),
        vec!["start:block-slow", "end:block-slow"]
    );
}

#[tokio::test]
async fn test_failed_job_does_not_stop_later_jobs() {
    let mut h = Harness::new(2, fast_options());
    let (job, outcome) = reporting_job("fail-first");

    h.manager.submit_job(job, SubmitMode::Async).await.unwrap();
    h.manager.submit("second", SubmitMode::Sync).await.unwrap();

    assert_eq!(outcome.await.unwrap(), Err("synthesis"));
    let messages = h.drain();
    assert_eq!(markers(&messages), vec!["start:second", "end:second"]);
    assert_eq!(audio_count(&messages), 2);
    assert_eq!(h.manager.state(), PipelineState::Idle);
}

#[tokio::test]
async fn test_mid_stream_failure_reaches_on_end() {
    let mut h = Harness::new(5, fast_options());
    let (job, outcome) = reporting_job("break-midway");

    h.manager.submit_job(job, SubmitMode::Async).await.unwrap();
    h.manager.submit("after", SubmitMode::Sync).await.unwrap();

    assert_eq!(outcome.await.unwrap(), Err("synthesis"));
    let messages = h.drain();
    // The truncated sentence is never closed; the next one is delivered whole
    assert_eq!(
        markers(&messages),
        vec!["start:break-midway", "start:after", "end:after"]
    );
    assert_eq!(audio_count(&messages), 2 + 5);
    assert_eq!(h.pool.lease_count("cosyvoice:narrator"), Some(0));
}

#[tokio::test]
async fn test_construction_failure_leaves_no_pool_entry() {
    let mut h = Harness::new(2, fast_options());
    h.script.fail_construction.store(true, Ordering::Release);
    let (job, outcome) = reporting_job("hello");

    h.manager.submit_job(job, SubmitMode::Sync).await.unwrap();

    assert_eq!(outcome.await.unwrap(), Err("pool_acquisition"));
    assert!(h.pool.stats().is_empty());
    assert!(h.drain().is_empty());

    // Construction is retried on the next acquisition
    h.script.fail_construction.store(false, Ordering::Release);
    h.manager.submit("again", SubmitMode::Sync).await.unwrap();
    assert_eq!(h.pool.stats().len(), 1);
    assert_eq!(*h.script.created.lock(), vec!["cosyvoice:narrator"]);
}

#[tokio::test]
async fn test_sessions_share_one_pooled_instance() {
    let h = Harness::new(1, fast_options());
    let (transport, _rx) = ChannelTransport::new(64);
    let spec = SessionSpec {
        session_id: "session-2".to_string(),
        device_id: "device-2".to_string(),
        format: FORMAT,
        default_tts: narrator(),
        speaker_tts: None,
    };
    let second = TtsManager::new(
        spec,
        fast_options(),
        h.pool.clone(),
        Arc::new(transport),
        &CancellationToken::new(),
    )
    .unwrap();
    second.start();

    h.manager.submit("first", SubmitMode::Sync).await.unwrap();
    second.submit("second", SubmitMode::Sync).await.unwrap();

    assert_eq!(h.script.created.lock().len(), 1);
    assert_eq!(h.pool.lease_count("cosyvoice:narrator"), Some(0));
    second.close().await;
}

#[tokio::test]
async fn test_speaker_override_selects_voice() {
    let h = Harness::new(1, fast_options());

    h.manager
        .set_speaker_tts_config(&json!({"provider": "cosyvoice", "spk_id": "guest"}))
        .unwrap();
    assert_eq!(h.manager.active_tts().pool_key(), "cosyvoice:guest");
    h.manager.submit("hi", SubmitMode::Sync).await.unwrap();
    assert_eq!(*h.script.created.lock(), vec!["cosyvoice:guest"]);

    // No provider falls back to the device default
    h.manager
        .set_speaker_tts_config(&json!({"spk_id": "ignored"}))
        .unwrap();
    assert_eq!(h.manager.active_tts().pool_key(), "cosyvoice:narrator");

    match h
        .manager
        .set_speaker_tts_config(&json!({"provider": "unknown", "voice": "x"}))
    {
        Err(PipelineError::Configuration(msg)) => assert!(msg.contains("Unsupported")),
        other => panic!("Expected Configuration error, got: {:?}", other),
    }
    assert_eq!(h.manager.active_tts().pool_key(), "cosyvoice:narrator");
}

#[tokio::test]
async fn test_state_follows_job_lifecycle() {
    let h = Harness::new(1, fast_options());
    assert_eq!(h.manager.state(), PipelineState::Idle);

    h.manager
        .submit("block-state", SubmitMode::Async)
        .await
        .unwrap();
    wait_until(|| h.calls().len() == 1).await;
    assert_eq!(h.manager.state(), PipelineState::Synthesizing);

    h.manager.submit("queued", SubmitMode::Async).await.unwrap();
    assert_eq!(h.manager.queued(), 1);

    h.script.gate.notify_one();
    wait_until(|| h.calls().len() == 2).await;
    wait_until(|| h.manager.state() == PipelineState::Idle).await;
}

#[tokio::test]
async fn test_cancelled_job_still_ends_sentence() {
    let mut h = Harness::new(50, fast_options());
    let token = h.manager.job_token();
    let (job, outcome) = reporting_job("long");

    h.manager
        .submit_job(job.with_cancel(token.clone()), SubmitMode::Async)
        .await
        .unwrap();
    wait_until(|| h.manager.state() == PipelineState::Delivering).await;
    tokio::time::sleep(Duration::from_millis(60)).await;
    token.cancel();

    let result = tokio::time::timeout(Duration::from_secs(2), outcome)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result, Ok(()));

    let messages = h.drain();
    assert!(audio_count(&messages) < 50);
    assert_eq!(markers(&messages), vec!["start:long", "end:long"]);
    assert!(matches!(
        messages.last(),
        Some(TransportMessage::SentenceEnd { .. })
    ));

    // The session itself keeps working
    h.manager.submit("next", SubmitMode::Sync).await.unwrap();
}

#[tokio::test]
async fn test_close_rejects_new_work() {
    let h = Harness::new(1, fast_options());
    h.manager.submit("hello", SubmitMode::Sync).await.unwrap();

    h.manager.close().await;
    assert!(h.manager.is_closed());
    assert!(!h.manager.start());

    match h.manager.submit("late", SubmitMode::Async).await {
        Err(PipelineError::Closed) => {}
        other => panic!("Expected Closed, got: {:?}", other),
    }
    // Idempotent
    h.manager.close().await;
    assert_eq!(h.manager.state(), PipelineState::Closed);
}

#[tokio::test]
async fn test_parent_cancel_closes_session() {
    let parent = CancellationToken::new();
    let h = Harness::with_parent(1, fast_options(), &parent);

    h.manager.submit("block-running", SubmitMode::Async).await.unwrap();
    wait_until(|| h.calls().len() == 1).await;
    let (queued_a, outcome_a) = reporting_job("queued-a");
    let (queued_b, outcome_b) = reporting_job("queued-b");
    h.manager.submit_job(queued_a, SubmitMode::Async).await.unwrap();
    h.manager.submit_job(queued_b, SubmitMode::Async).await.unwrap();
    assert_eq!(h.manager.queued(), 2);

    parent.cancel();

    wait_until(|| h.manager.state() == PipelineState::Closed).await;
    assert_eq!(h.manager.queued(), 0);
    // Dropped without running, so on_end never fires
    assert!(outcome_a.await.is_err());
    assert!(outcome_b.await.is_err());
    match h.manager.submit("late", SubmitMode::Async).await {
        Err(PipelineError::Closed) => {}
        other => panic!("Expected Closed, got: {:?}", other),
    }
    assert_eq!(h.calls(), vec!["block-running"]);
    assert!(!h.manager.start());
    h.manager.close().await;
}

#[tokio::test]
async fn test_close_cancels_running_job() {
    let h = Harness::new(1, fast_options());
    let (job, outcome) = reporting_job("block-forever");
    h.manager.submit_job(job, SubmitMode::Async).await.unwrap();
    wait_until(|| h.calls().len() == 1).await;

    tokio::time::timeout(Duration::from_secs(2), h.manager.close())
        .await
        .expect("close must not wait for the blocked provider");

    // Opening the stream was abandoned on cancellation
    assert_eq!(outcome.await.unwrap(), Ok(()));
}

#[test]
fn test_invalid_format_rejected() {
    let script = Arc::new(Script::default());
    let pool = Arc::new(TtsPool::new(
        ResourceKind::Tts,
        Arc::new(ScriptedFactory { script }),
    ));
    let (transport, _rx) = ChannelTransport::new(1);
    let spec = SessionSpec {
        session_id: "s".to_string(),
        device_id: "d".to_string(),
        format: OutputAudioFormat {
            frame_duration_ms: 0,
            ..FORMAT
        },
        default_tts: narrator(),
        speaker_tts: None,
    };

    let result = TtsManager::new(
        spec,
        fast_options(),
        pool,
        Arc::new(transport),
        &CancellationToken::new(),
    );
    match result {
        Err(PipelineError::Configuration(_)) => {}
        Err(other) => panic!("Expected Configuration error, got: {:?}", other),
        Ok(_) => panic!("Expected Configuration error, got a manager"),
    }
}

#[tokio::test]
async fn test_runtime_sessions_and_shutdown() {
    let script = Arc::new(Script {
        frames: 2,
        ..Default::default()
    });
    let pool = Arc::new(TtsPool::new(
        ResourceKind::Tts,
        Arc::new(ScriptedFactory {
            script: script.clone(),
        }),
    ));
    let config = PipelineConfig {
        audio: FORMAT,
        lookahead_ms: 40,
        tts: Some(narrator()),
        ..Default::default()
    };
    let runtime = PipelineRuntime::with_pool(config, pool);

    let spec = runtime.default_session_spec("s-1", "d-1").unwrap();
    assert_eq!(spec.format, FORMAT);
    let (transport, mut rx) = ChannelTransport::new(64);
    let manager = runtime.session(spec, Arc::new(transport)).unwrap();
    manager.submit("hello", SubmitMode::Sync).await.unwrap();

    let mut received = Vec::new();
    while let Ok(message) = rx.try_recv() {
        received.push(message);
    }
    assert_eq!(audio_count(&received), 2);

    runtime.shutdown().await;
    assert!(runtime.tts_pool().is_shut_down());
    wait_until(|| manager.state() == PipelineState::Closed).await;
    match manager.submit("late", SubmitMode::Async).await {
        Err(PipelineError::Closed) => {}
        other => panic!("Expected Closed, got: {:?}", other),
    }

    let (transport, _rx) = ChannelTransport::new(1);
    let spec = SessionSpec {
        session_id: "s-2".to_string(),
        device_id: "d-2".to_string(),
        format: FORMAT,
        default_tts: narrator(),
        speaker_tts: None,
    };
    match runtime.session(spec, Arc::new(transport)) {
        Err(PipelineError::Closed) => {}
        Err(other) => panic!("Expected Closed, got: {:?}", other),
        Ok(_) => panic!("Expected Closed, got a session"),
    }
}

#[tokio::test]
async fn test_runtime_without_default_voice() {
    let runtime = PipelineRuntime::init(PipelineConfig::default());
    match runtime.default_session_spec("s", "d") {
        Err(PipelineError::Configuration(_)) => {}
        other => panic!("Expected Configuration error, got: {:?}", other),
    }
    runtime.shutdown().await;
}
