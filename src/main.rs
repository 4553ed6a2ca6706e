use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

use voicebridge::{
    ChannelTransport, PipelineConfig, PipelineRuntime, SubmitMode, SynthesisJob, TransportMessage,
    core::pipeline::FramePacer,
};

/// voicebridge - paced TTS delivery pipeline
#[derive(Parser, Debug)]
#[command(name = "voicebridge")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load and validate the configuration
    Check,

    /// Synthesize text through one session and write the delivered audio
    Speak {
        /// Text to speak; split into sentences on terminal punctuation
        #[arg(short = 't', long = "text")]
        text: String,

        /// File receiving the raw PCM frames
        #[arg(short = 'o', long = "out", value_name = "FILE")]
        out: PathBuf,

        /// Speaker voice override as JSON, e.g. '{"provider":"cosyvoice","spk_id":"a"}'
        #[arg(long = "speaker")]
        speaker: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let config = if let Some(config_path) = &cli.config {
        info!("Loading configuration from {}", config_path.display());
        PipelineConfig::from_file(config_path)?
    } else {
        PipelineConfig::from_env()?
    };

    match cli.command {
        Commands::Check => check(&config),
        Commands::Speak { text, out, speaker } => speak(config, &text, out, speaker).await,
    }
}

fn check(config: &PipelineConfig) -> anyhow::Result<()> {
    let pacer = FramePacer::new(config.audio.frame_duration_ms, config.lookahead_ms)?;

    println!(
        "audio: {} Hz, {} channel(s), {} ms frames ({} bytes PCM16)",
        config.audio.sample_rate,
        config.audio.channels,
        config.audio.frame_duration_ms,
        config.audio.pcm16_frame_bytes()
    );
    println!(
        "pacer: {} frame(s) look-ahead ({} ms)",
        pacer.cache_frame_count(),
        pacer.cache_frame_count() as u64 * u64::from(config.audio.frame_duration_ms)
    );
    match &config.tts {
        Some(tts) => println!("tts: pool key {}", tts.pool_key()),
        None => println!("tts: no default provider configured"),
    }
    Ok(())
}

fn split_sentences(text: &str) -> Vec<String> {
    text.split_inclusive(['.', '!', '?', '\u{3002}', '\u{FF01}', '\u{FF1F}'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

async fn speak(
    config: PipelineConfig,
    text: &str,
    out: PathBuf,
    speaker: Option<String>,
) -> anyhow::Result<()> {
    let runtime = PipelineRuntime::init(config);
    let spec = runtime.default_session_spec(uuid::Uuid::new_v4().to_string(), "local")?;

    let (transport, mut messages) = ChannelTransport::new(256);
    let manager = runtime.session(spec, Arc::new(transport))?;

    if let Some(speaker) = speaker {
        let value: serde_json::Value =
            serde_json::from_str(&speaker).context("--speaker must be a JSON object")?;
        manager.set_speaker_tts_config(&value)?;
    }

    let mut file = tokio::fs::File::create(&out)
        .await
        .with_context(|| format!("Failed to create {}", out.display()))?;
    let writer = tokio::spawn(async move {
        let mut frames = 0usize;
        let mut bytes = 0usize;
        while let Some(message) = messages.recv().await {
            match &message {
                TransportMessage::Audio { frame } => {
                    file.write_all(frame).await?;
                    frames += 1;
                    bytes += frame.len();
                }
                marker => println!("{}", serde_json::to_string(marker)?),
            }
        }
        file.flush().await?;
        Ok::<_, anyhow::Error>((frames, bytes))
    });

    let failures = Arc::new(Mutex::new(Vec::new()));
    let sentences = split_sentences(text);
    let started = Instant::now();
    manager.mark_turn_start();

    for (i, sentence) in sentences.iter().enumerate() {
        let failures = failures.clone();
        let label = sentence.clone();
        let job = SynthesisJob::new(sentence.as_str())
            .turn_start(i == 0)
            .on_end(move |result| {
                if let Err(e) = result {
                    failures.lock().push(format!("{label}: {e}"));
                }
            });
        let mode = if i + 1 == sentences.len() {
            SubmitMode::Sync
        } else {
            SubmitMode::Async
        };
        manager.submit_job(job, mode).await?;
    }

    manager.close().await;
    drop(manager);
    runtime.shutdown().await;

    let (frames, bytes) = writer.await.map_err(|e| anyhow!("writer task failed: {e}"))??;
    println!(
        "{} sentence(s), {frames} frame(s), {bytes} bytes in {:.2}s -> {}",
        sentences.len(),
        started.elapsed().as_secs_f64(),
        out.display()
    );

    let failures = failures.lock();
    if !failures.is_empty() {
        anyhow::bail!("{} sentence(s) failed: {}", failures.len(), failures.join("; "));
    }
    Ok(())
}
