//! Laughtrack - live performer loop
//!
//! Listens to the room (microphone + screen with the `capture` feature),
//! forwards verdicts to the turn scheduler and speaks generated turns.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use laughtrack::config::Config;
use laughtrack::generator::HttpGenerator;
use laughtrack::playback::Playback;
use laughtrack::recorder::TurnRecorder;
use laughtrack::session::Session;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("laughtrack=info")),
        )
        .init();

    let config = Config::from_env().context("Invalid configuration")?;
    info!("🎤 Starting laughtrack");
    info!("Generator: {}", config.services.generator_url);

    let generator = Arc::new(HttpGenerator::new(
        &config.services.generator_url,
        config.services.generator_timeout,
    ));
    let recorder = TurnRecorder::new(config.services.record, config.engine.speech_sample_rate);
    let session = Session::new(config.engine.clone(), generator, playback()?, recorder);
    let events = session.sender();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    #[cfg(feature = "capture")]
    start_inputs(&config, events.clone(), shutdown_rx.clone())?;
    #[cfg(not(feature = "capture"))]
    {
        let _ = &shutdown_rx;
        tracing::warn!("Built without the `capture` feature: no audience input, fallback turns only");
    }

    let stop = events.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, stopping");
            let _ = stop.send(laughtrack::events::SessionEvent::Stop);
        }
    });

    let stats = session.run().await;
    let _ = shutdown_tx.send(true);
    info!(
        "👋 Done: {} turns delivered, {} failed, {} verdicts",
        stats.completed, stats.failed, stats.verdicts
    );
    Ok(())
}

#[cfg(feature = "capture")]
fn playback() -> Result<Arc<dyn Playback>> {
    Ok(Arc::new(laughtrack::playback::PulsePlayback::new("laughtrack")))
}

#[cfg(not(feature = "capture"))]
fn playback() -> Result<Arc<dyn Playback>> {
    let sink = laughtrack::playback::FileSink::new("speech_out")
        .context("Failed to create speech output directory")?;
    Ok(Arc::new(sink))
}

/// Microphone -> resampler -> audio analyzer, and optionally screen -> visual
/// analyzer. Device failures are fatal.
#[cfg(feature = "capture")]
fn start_inputs(
    config: &Config,
    events: tokio::sync::mpsc::UnboundedSender<laughtrack::events::SessionEvent>,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    use laughtrack::analyzer::{AudioAnalyzerClient, VisualAnalyzerClient};
    use laughtrack::media_in::{self, AudioSource, ScreenSnapshots};
    use tokio::sync::mpsc;

    let (frames_tx, frames_rx) = mpsc::channel(64);
    let (pcm_tx, pcm_rx) = mpsc::channel(64);
    media_in::spawn_audio_capture(frames_tx, AudioSource::Microphone)
        .context("Microphone capture failed")?;
    media_in::spawn_resampler_pump(frames_rx, pcm_tx, config.engine.analyzer_sample_rate);

    let audio = AudioAnalyzerClient::new(
        &config.services.audio_ws_url,
        config.services.reconnect_backoff,
    );
    tokio::spawn(audio.run(pcm_rx, events.clone(), shutdown.clone()));

    if config.services.video_enabled {
        let screen = ScreenSnapshots::new().context("Screen capture failed")?;
        let visual =
            VisualAnalyzerClient::new(&config.services.visual_url, config.services.visual_interval);
        tokio::spawn(visual.run(Box::new(screen), events, shutdown));
    } else {
        info!("Video analysis disabled");
    }
    Ok(())
}
