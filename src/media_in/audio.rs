//! Audience audio capture using PulseAudio

use super::CapturedAudio;
use anyhow::{anyhow, Context, Result};
use libpulse_binding as pulse;
use libpulse_simple_binding as psimple;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

const CAPTURE_RATE: u32 = 48_000;
const CHANNELS: u8 = 1;
const CHUNK_DURATION_MS: u64 = 20;
const SAMPLES_PER_CHUNK: usize = (CAPTURE_RATE as u64 * CHUNK_DURATION_MS / 1000) as usize;

/// Which PulseAudio source to listen to
#[derive(Debug, Clone, Copy, Default)]
pub enum AudioSource {
    /// The room microphone
    #[default]
    Microphone,
    /// Whatever the machine is playing (sink monitor)
    System,
}

impl AudioSource {
    fn device(&self) -> Option<&'static str> {
        match self {
            AudioSource::Microphone => None,
            AudioSource::System => Some("@DEFAULT_MONITOR@"),
        }
    }
}

/// Open the capture device and stream float chunks into `tx` from a
/// dedicated thread.
///
/// Returns an error if the device cannot be opened, so a session never starts
/// half-deaf.
pub fn spawn_audio_capture(tx: mpsc::Sender<CapturedAudio>, source: AudioSource) -> Result<()> {
    info!(
        "Starting audio capture at {}Hz, {}ms chunks, source: {:?}",
        CAPTURE_RATE, CHUNK_DURATION_MS, source
    );

    let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<Result<()>>(1);
    std::thread::spawn(move || {
        let capture = match open(source) {
            Ok(capture) => {
                let _ = ready_tx.send(Ok(()));
                capture
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
                return;
            }
        };
        if let Err(e) = capture_loop(capture, tx) {
            error!("Audio capture error: {}", e);
        }
    });

    ready_rx
        .recv()
        .map_err(|_| anyhow!("Audio capture thread exited during startup"))?
}

fn open(source: AudioSource) -> Result<psimple::Simple> {
    let spec = pulse::sample::Spec {
        format: pulse::sample::Format::F32le,
        channels: CHANNELS,
        rate: CAPTURE_RATE,
    };
    let capture = psimple::Simple::new(
        None,
        "laughtrack",
        pulse::stream::Direction::Record,
        source.device(),
        "audience",
        &spec,
        None,
        None,
    )
    .with_context(|| format!("Failed to open PulseAudio {:?} source", source))?;
    info!("Audio capture connected ({:?})", source);
    Ok(capture)
}

fn capture_loop(capture: psimple::Simple, tx: mpsc::Sender<CapturedAudio>) -> Result<()> {
    let mut bytes = vec![0u8; SAMPLES_PER_CHUNK * 4];
    let mut dropped = 0u64;

    loop {
        capture.read(&mut bytes).context("Failed to read audio")?;
        let samples = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        match tx.try_send(CapturedAudio {
            samples,
            sample_rate: CAPTURE_RATE,
        }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                dropped += 1;
                if dropped % 250 == 1 {
                    // Every 5 seconds of backlog
                    warn!("Audio consumer is behind, dropped {} chunk(s)", dropped);
                }
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Audio consumer gone, stopping capture");
                return Ok(());
            }
        }
    }
}
