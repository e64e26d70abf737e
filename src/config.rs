//! Runtime configuration
//!
//! Everything has a working default; `Config::from_env` overrides individual
//! values from `LAUGHTRACK_*` environment variables (a `.env` file is honoured).

use std::time::Duration;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got {value:?}")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Upper bounds that keep deadline arithmetic on `Instant` in range
const MAX_PACING: Duration = Duration::from_secs(24 * 60 * 60);
const MAX_SESSION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Pacing and bookkeeping constants for the turn engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Minimum time between two generation requests
    pub cooldown: Duration,
    /// Minimum quiet time after a turn finishes before the next may start
    pub minimum_gap: Duration,
    /// How long to wait for a genuine reaction before prompting anyway
    pub fallback_window: Duration,
    /// Extra pause after playback so a fresh reaction burst is not stepped on
    pub post_playback_delay: Duration,
    /// Give up waiting for a playback-finished signal after this long
    pub playback_safety_timeout: Duration,
    /// Timeline capacity
    pub timeline_capacity: usize,
    /// Entries included in a context snapshot's tail
    pub context_tail_len: usize,
    /// Length of the window before the previous turn
    pub pre_window: Duration,
    /// Signals this close to an already-reported verdict are dropped from the tail
    pub dedupe_tolerance: Duration,
    /// Rate of PCM sent to the audio analyzer
    pub analyzer_sample_rate: u32,
    /// Rate of PCM returned by the generator
    pub speech_sample_rate: u32,
    /// Stop after this many completed turns
    pub max_turns: Option<u32>,
    /// Stop after this much wall time
    pub max_duration: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_millis(1_500),
            minimum_gap: Duration::from_millis(1_000),
            fallback_window: Duration::from_millis(3_200),
            post_playback_delay: Duration::from_millis(700),
            playback_safety_timeout: Duration::from_secs(15),
            timeline_capacity: crate::timeline::DEFAULT_CAPACITY,
            context_tail_len: 12,
            pre_window: Duration::from_secs(3),
            dedupe_tolerance: Duration::from_millis(5),
            analyzer_sample_rate: crate::resample::ANALYZER_SAMPLE_RATE,
            speech_sample_rate: 24_000,
            max_turns: None,
            max_duration: None,
        }
    }
}

/// Where the collaborating services live and which inputs are enabled
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Audio analyzer WebSocket
    pub audio_ws_url: String,
    /// Visual analyzer endpoint
    pub visual_url: String,
    /// Base URL of the generation service
    pub generator_url: String,
    /// Timeout for a single generation request
    pub generator_timeout: Duration,
    /// Delay before reconnecting the analyzer socket
    pub reconnect_backoff: Duration,
    /// Interval between visual snapshots
    pub visual_interval: Duration,
    /// Send periodic snapshots to the visual analyzer
    pub video_enabled: bool,
    /// Save each delivered turn under ./recordings
    pub record: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            audio_ws_url: "ws://localhost:8000/ws/analyze".to_string(),
            visual_url: "http://localhost:8000/analyze/visual".to_string(),
            generator_url: "http://localhost:8001".to_string(),
            generator_timeout: Duration::from_secs(30),
            reconnect_backoff: Duration::from_millis(1_500),
            visual_interval: Duration::from_secs(3),
            video_enabled: true,
            record: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub engine: EngineConfig,
    pub services: ServiceConfig,
}

impl Config {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();
        let engine = &mut config.engine;
        let services = &mut config.services;

        if let Some(v) = lookup("LAUGHTRACK_AUDIO_WS_URL") {
            services.audio_ws_url = v;
        }
        if let Some(v) = lookup("LAUGHTRACK_VISUAL_URL") {
            services.visual_url = v;
        }
        if let Some(v) = lookup("LAUGHTRACK_GENERATOR_URL") {
            services.generator_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = lookup("LAUGHTRACK_COOLDOWN_MS") {
            engine.cooldown = millis("LAUGHTRACK_COOLDOWN_MS", &v)?;
        }
        if let Some(v) = lookup("LAUGHTRACK_MIN_GAP_MS") {
            engine.minimum_gap = millis("LAUGHTRACK_MIN_GAP_MS", &v)?;
        }
        if let Some(v) = lookup("LAUGHTRACK_FALLBACK_MS") {
            engine.fallback_window = millis("LAUGHTRACK_FALLBACK_MS", &v)?;
        }
        if let Some(v) = lookup("LAUGHTRACK_POST_DELAY_MS") {
            engine.post_playback_delay = millis("LAUGHTRACK_POST_DELAY_MS", &v)?;
        }
        if let Some(v) = lookup("LAUGHTRACK_MAX_TURNS") {
            let turns = number("LAUGHTRACK_MAX_TURNS", &v)?;
            engine.max_turns = Some(u32::try_from(turns).map_err(|_| ConfigError::Invalid {
                var: "LAUGHTRACK_MAX_TURNS",
                expected: "a turn count that fits in 32 bits",
                value: v.clone(),
            })?);
        }
        if let Some(v) = lookup("LAUGHTRACK_MAX_MINUTES") {
            let minutes = number("LAUGHTRACK_MAX_MINUTES", &v)?;
            let secs = minutes
                .checked_mul(60)
                .filter(|secs| Duration::from_secs(*secs) <= MAX_SESSION)
                .ok_or_else(|| ConfigError::Invalid {
                    var: "LAUGHTRACK_MAX_MINUTES",
                    expected: "at most a week of minutes",
                    value: v.clone(),
                })?;
            engine.max_duration = Some(Duration::from_secs(secs));
        }
        if let Some(v) = lookup("LAUGHTRACK_RECORD") {
            services.record = flag("LAUGHTRACK_RECORD", &v)?;
        }
        if let Some(v) = lookup("LAUGHTRACK_VIDEO") {
            services.video_enabled = flag("LAUGHTRACK_VIDEO", &v)?;
        }

        Ok(config)
    }
}

fn number(var: &'static str, value: &str) -> Result<u64> {
    value.trim().parse::<u64>().map_err(|_| ConfigError::Invalid {
        var,
        expected: "a non-negative integer",
        value: value.to_string(),
    })
}

fn millis(var: &'static str, value: &str) -> Result<Duration> {
    let duration = number(var, value).map(Duration::from_millis)?;
    if duration > MAX_PACING {
        return Err(ConfigError::Invalid {
            var,
            expected: "at most a day in milliseconds",
            value: value.to_string(),
        });
    }
    Ok(duration)
}

fn flag(var: &'static str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            expected: "a boolean",
            value: value.to_string(),
        }),
    }
}
