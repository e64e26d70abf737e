//! Speech playback sinks

use crate::wav::{self, ContainerError};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Error type for playback
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("Container error: {0}")]
    Container(#[from] ContainerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Playback task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, PlaybackError>;

/// Something that can play a WAV container.
///
/// `play` resolves once the audio has finished playing.
#[async_trait]
pub trait Playback: Send + Sync {
    async fn play(&self, container: Vec<u8>) -> Result<()>;
}

/// Writes each container to a directory and waits as long as it would play for
pub struct FileSink {
    dir: PathBuf,
    counter: AtomicU64,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        info!("Playback to files in {:?}", dir);
        Ok(Self {
            dir,
            counter: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }
}

#[async_trait]
impl Playback for FileSink {
    async fn play(&self, container: Vec<u8>) -> Result<()> {
        let decoded = wav::decode(&container)?;
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let path = self.dir.join(format!("speech_{:03}.wav", n));
        tokio::fs::write(&path, &container).await?;
        debug!("Wrote {:?} ({:?})", path, decoded.duration());
        tokio::time::sleep(decoded.duration()).await;
        Ok(())
    }
}

#[cfg(feature = "capture")]
pub use pulse::PulsePlayback;

#[cfg(feature = "capture")]
mod pulse {
    use super::{Playback, PlaybackError, Result};
    use crate::wav;
    use async_trait::async_trait;
    use libpulse_binding as pulse;
    use libpulse_simple_binding as psimple;
    use tracing::debug;

    /// Plays through the default PulseAudio sink
    pub struct PulsePlayback {
        app_name: String,
    }

    impl PulsePlayback {
        pub fn new(app_name: &str) -> Self {
            Self {
                app_name: app_name.to_string(),
            }
        }
    }

    #[async_trait]
    impl Playback for PulsePlayback {
        async fn play(&self, container: Vec<u8>) -> Result<()> {
            let decoded = wav::decode(&container)?;
            let app_name = self.app_name.clone();

            tokio::task::spawn_blocking(move || -> Result<()> {
                let spec = pulse::sample::Spec {
                    format: pulse::sample::Format::S16le,
                    channels: decoded.channels as u8,
                    rate: decoded.sample_rate,
                };
                let sink = psimple::Simple::new(
                    None,
                    &app_name,
                    pulse::stream::Direction::Playback,
                    None,
                    "speech",
                    &spec,
                    None,
                    None,
                )
                .map_err(|e| PlaybackError::Device(e.to_string()))?;

                debug!("Playing {} bytes at {} Hz", decoded.pcm.len(), decoded.sample_rate);
                sink.write(&decoded.pcm)
                    .map_err(|e| PlaybackError::Device(e.to_string()))?;
                sink.drain().map_err(|e| PlaybackError::Device(e.to_string()))?;
                Ok(())
            })
            .await?
        }
    }
}
