//! Turn recorder - saves each delivered turn to the filesystem

use crate::events::TurnRecord;
use crate::wav;
use chrono::Local;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

pub struct TurnRecorder {
    enabled: bool,
    base: PathBuf, // ./recordings/20250603_153055/
    sample_rate: u32,
}

impl TurnRecorder {
    pub fn new(enabled: bool, sample_rate: u32) -> Self {
        let ts = Local::now().format("%Y%m%d_%H%M%S").to_string();
        Self::in_dir(enabled, PathBuf::from("recordings").join(ts), sample_rate)
    }

    pub fn in_dir(enabled: bool, base: PathBuf, sample_rate: u32) -> Self {
        if enabled {
            if let Err(e) = fs::create_dir_all(&base) {
                error!("Failed to create recordings directory: {}", e);
            } else {
                info!("Recording enabled, saving to: {:?}", base);
            }
        }
        Self {
            enabled,
            base,
            sample_rate,
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Write `turn_NNN.json` and, when the turn had audio, `turn_NNN.wav`.
    pub fn on_turn(&self, turn: &TurnRecord) {
        if !self.enabled {
            return;
        }

        let stem = format!("turn_{:03}", turn.id);
        let meta = json!({
            "id": turn.id,
            "text": turn.text,
            "requested_at": turn.requested_at,
            "started_at": turn.started_at,
            "ended_at": turn.ended_at,
            "audio_bytes": turn.audio.as_ref().map(Vec::len),
        });
        let meta_path = self.base.join(format!("{}.json", stem));
        match serde_json::to_vec_pretty(&meta) {
            Ok(bytes) => {
                if let Err(e) = fs::write(&meta_path, bytes) {
                    error!("Failed to write {:?}: {}", meta_path, e);
                }
            }
            Err(e) => error!("Failed to serialize turn {}: {}", turn.id, e),
        }

        if let Some(pcm) = &turn.audio {
            match wav::encode(pcm, self.sample_rate, 1) {
                Ok(container) => {
                    let path = self.base.join(format!("{}.wav", stem));
                    if let Err(e) = fs::write(&path, container) {
                        error!("Failed to write {:?}: {}", path, e);
                    } else {
                        debug!("Saved turn {} audio to {:?}", turn.id, path);
                    }
                }
                Err(e) => error!("Not saving audio for turn {}: {}", turn.id, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("laughtrack_rec_{}_{}", name, std::process::id()))
    }

    fn turn(id: u64, audio: Option<Vec<u8>>) -> TurnRecord {
        let now = Utc::now();
        TurnRecord {
            id,
            text: Some("Why did the crab never share?".to_string()),
            audio,
            requested_at: now,
            started_at: Some(now),
            ended_at: Some(now),
        }
    }

    #[test]
    fn test_records_text_and_audio() {
        let dir = scratch("full");
        let recorder = TurnRecorder::in_dir(true, dir.clone(), 24_000);
        recorder.on_turn(&turn(4, Some(vec![1, 0, 2, 0])));

        let meta: serde_json::Value =
            serde_json::from_slice(&fs::read(dir.join("turn_004.json")).unwrap()).unwrap();
        assert_eq!(meta["id"], 4);
        assert_eq!(meta["text"], "Why did the crab never share?");
        assert_eq!(meta["audio_bytes"], 4);

        let decoded = wav::decode(&fs::read(dir.join("turn_004.wav")).unwrap()).unwrap();
        assert_eq!(decoded.pcm, vec![1, 0, 2, 0]);
        assert_eq!(decoded.sample_rate, 24_000);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_disabled_writes_nothing() {
        let dir = scratch("off");
        let recorder = TurnRecorder::in_dir(false, dir.clone(), 24_000);
        recorder.on_turn(&turn(1, None));
        assert!(!dir.exists());
    }

    #[test]
    fn test_text_only_turn() {
        let dir = scratch("text");
        let recorder = TurnRecorder::in_dir(true, dir.clone(), 24_000);
        recorder.on_turn(&turn(2, None));
        assert!(dir.join("turn_002.json").exists());
        assert!(!dir.join("turn_002.wav").exists());
        fs::remove_dir_all(&dir).ok();
    }
}
