//! Media input: audience audio and screen snapshots

#[cfg(feature = "capture")]
pub mod audio;
#[cfg(feature = "capture")]
pub mod video;

#[cfg(feature = "capture")]
pub use audio::{spawn_audio_capture, AudioSource};
#[cfg(feature = "capture")]
pub use video::ScreenSnapshots;

use crate::resample::StreamingResampler;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// One chunk of float samples at the device's native rate
#[derive(Debug, Clone)]
pub struct CapturedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Resample captured chunks to `target_rate` and forward them.
///
/// Chunks are dropped rather than buffered when the analyzer side is not
/// keeping up (e.g. while it reconnects).
pub fn spawn_resampler_pump(
    mut frames: mpsc::Receiver<CapturedAudio>,
    pcm: mpsc::Sender<Vec<i16>>,
    target_rate: u32,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut resampler = StreamingResampler::new(target_rate);
        let mut input_rate = None;
        let mut dropped = 0u64;

        while let Some(frame) = frames.recv().await {
            if input_rate != Some(frame.sample_rate) {
                info!(
                    "Resampling {} Hz -> {} Hz",
                    frame.sample_rate,
                    resampler.target_rate()
                );
                resampler.reset();
                input_rate = Some(frame.sample_rate);
            }

            let out = resampler.process(&frame.samples, frame.sample_rate);
            if out.is_empty() {
                continue;
            }
            match pcm.try_send(out) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    dropped += 1;
                    if dropped % 50 == 1 {
                        debug!("Analyzer backlog, dropped {} chunk(s)", dropped);
                    }
                }
                Err(TrySendError::Closed(_)) => break,
            }
        }
        debug!("Resampler pump stopped");
    })
}
