//! Shared session data types

use crate::verdict::ReactionVerdict;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One request/response cycle with the generation service
#[derive(Debug, Clone, PartialEq)]
pub struct TurnRecord {
    pub id: u64,
    pub text: Option<String>,
    pub audio: Option<Vec<u8>>,
    pub requested_at: DateTime<Utc>,
    /// Set when the response is accepted and delivery begins
    pub started_at: Option<DateTime<Utc>>,
    /// Set when playback of the turn finishes
    pub ended_at: Option<DateTime<Utc>>,
}

impl TurnRecord {
    pub fn requested(id: u64, at: DateTime<Utc>) -> Self {
        Self {
            id,
            text: None,
            audio: None,
            requested_at: at,
            started_at: None,
            ended_at: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.started_at.is_some() && self.ended_at.is_some()
    }
}

/// A generated turn waiting to be delivered
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechItem {
    pub id: u64,
    pub text: Option<String>,
    /// Raw little-endian PCM16 mono
    pub audio: Option<Vec<u8>>,
    pub sample_rate: u32,
}

/// Stand-in reaction used when nothing genuine triggered the request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyntheticSignal {
    pub verdict: String,
    pub rationale: String,
    pub reaction_type: String,
}

impl SyntheticSignal {
    /// Signal sent with the first request of a session.
    pub fn opening() -> Self {
        Self {
            verdict: "uncertain".to_string(),
            rationale: "no reactions yet".to_string(),
            reaction_type: "neutral".to_string(),
        }
    }

    /// Signal sent when the fallback timer fires.
    pub fn no_reaction() -> Self {
        Self {
            verdict: "uncertain".to_string(),
            rationale: "no reaction yet".to_string(),
            reaction_type: "neutral".to_string(),
        }
    }
}

/// Whatever made the scheduler fire, passed through to the generator unchanged
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RawSignal {
    Verdict(ReactionVerdict),
    Synthetic(SyntheticSignal),
}

/// Messages delivered to the session runner
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A verdict from one of the analyzers
    Verdict(ReactionVerdict),
    /// The generation service answered
    Response {
        id: u64,
        text: Option<String>,
        audio: Option<Vec<u8>>,
    },
    /// The generation request failed
    RequestFailed { id: u64, error: String },
    /// The speech queue began delivering a turn
    SpeechStarted { id: u64 },
    /// The speech queue finished delivering a turn
    SpeechFinished { id: u64 },
    /// Reset and issue a fresh opening request
    Restart,
    /// End the session
    Stop,
}
