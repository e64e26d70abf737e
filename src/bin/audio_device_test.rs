//! Checks the live audio path: capture a few seconds from the microphone
//! through the analyzer resampler, report levels, then play a test tone.

use laughtrack::media_in::{self, AudioSource};
use laughtrack::playback::{Playback, PulsePlayback};
use laughtrack::resample::ANALYZER_SAMPLE_RATE;
use laughtrack::wav;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};

const LISTEN: Duration = Duration::from_secs(3);
const TONE_RATE: u32 = 24_000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let source = match std::env::args().nth(1).as_deref() {
        Some("system") => AudioSource::System,
        _ => AudioSource::Microphone,
    };

    println!("Listening on {:?} for {:?}...", source, LISTEN);
    let (frames_tx, frames_rx) = mpsc::channel(64);
    let (pcm_tx, mut pcm_rx) = mpsc::channel(64);
    media_in::spawn_audio_capture(frames_tx, source)?;
    media_in::spawn_resampler_pump(frames_rx, pcm_tx, ANALYZER_SAMPLE_RATE);

    let deadline = Instant::now() + LISTEN;
    let mut samples = 0usize;
    let mut peak = 0i16;
    let mut sum_sq = 0f64;
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        let Ok(Some(chunk)) = timeout(left, pcm_rx.recv()).await else {
            break;
        };
        samples += chunk.len();
        for s in chunk {
            peak = peak.max(s.saturating_abs());
            sum_sq += (s as f64) * (s as f64);
        }
    }

    if samples == 0 {
        println!("  ❌ No audio received");
    } else {
        let rms = (sum_sq / samples as f64).sqrt();
        println!(
            "  ✅ {} samples ({:.2}s at {} Hz), peak {}, rms {:.0}",
            samples,
            samples as f64 / ANALYZER_SAMPLE_RATE as f64,
            ANALYZER_SAMPLE_RATE,
            peak,
            rms
        );
    }

    println!("\nPlaying a 440 Hz test tone...");
    let pcm: Vec<u8> = (0..TONE_RATE / 2)
        .map(|n| {
            let t = n as f32 / TONE_RATE as f32;
            ((t * 440.0 * std::f32::consts::TAU).sin() * 0.3 * i16::MAX as f32) as i16
        })
        .flat_map(i16::to_le_bytes)
        .collect();
    let container = wav::encode(&pcm, TONE_RATE, 1)?;
    match PulsePlayback::new("laughtrack-test").play(container).await {
        Ok(()) => println!("  ✅ Played"),
        Err(e) => println!("  ❌ Playback failed: {}", e),
    }

    println!("\nAudio device test complete!");
    Ok(())
}
