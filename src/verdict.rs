//! Audience verdicts and the analyzer wire formats they arrive in

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sensing channel a verdict came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Audio,
    Video,
}

/// Normalized reaction label.
///
/// Analyzers are free to send labels outside the known set; those are kept
/// verbatim as `Other` and never match a fusion tier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReactionLabel {
    StronglyPositive,
    MildlyPositive,
    Negative,
    Uncertain,
    Neutral,
    Other(String),
}

impl ReactionLabel {
    /// Map a wire label to a known tier. Accepts the analyzer service's
    /// hit / mixed / miss vocabulary as aliases.
    pub fn from_wire(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "strongly-positive" | "hit" => ReactionLabel::StronglyPositive,
            "mildly-positive" | "mixed" => ReactionLabel::MildlyPositive,
            "negative" | "miss" => ReactionLabel::Negative,
            "uncertain" => ReactionLabel::Uncertain,
            "neutral" => ReactionLabel::Neutral,
            _ => ReactionLabel::Other(label.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ReactionLabel::StronglyPositive => "strongly-positive",
            ReactionLabel::MildlyPositive => "mildly-positive",
            ReactionLabel::Negative => "negative",
            ReactionLabel::Uncertain => "uncertain",
            ReactionLabel::Neutral => "neutral",
            ReactionLabel::Other(label) => label,
        }
    }
}

impl fmt::Display for ReactionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ReactionLabel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ReactionLabel {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(ReactionLabel::from_wire(&raw))
    }
}

/// One classification of audience reaction from one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionVerdict {
    pub source: Source,
    pub label: ReactionLabel,
    /// Confidence as a whole percentage, when the analyzer supplied one
    pub confidence_pct: Option<u8>,
    pub timestamp: DateTime<Utc>,
}

impl ReactionVerdict {
    pub fn new(source: Source, label: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            source,
            label: ReactionLabel::from_wire(label),
            confidence_pct: None,
            timestamp,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence_pct = confidence_to_pct(confidence);
        self
    }
}

/// Error type for verdict parsing
#[derive(Debug, thiserror::Error)]
pub enum VerdictError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("analyzer reported {code}: {message}")]
    Analyzer { code: String, message: String },

    #[error("frame carries no verdict label")]
    MissingLabel,
}

pub type Result<T> = std::result::Result<T, VerdictError>;

/// Frame pushed by the audio analyzer socket
#[derive(Debug, Clone, Deserialize)]
pub struct AudioVerdictFrame {
    #[serde(default)]
    pub verdict: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub reaction_type: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Response body of the visual analyzer
#[derive(Debug, Clone, Deserialize)]
pub struct VisualVerdictResponse {
    #[serde(default)]
    pub visual_verdict: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// `{ "error": { "code", "message", ... } }` envelope used by the services
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl From<ErrorEnvelope> for VerdictError {
    fn from(envelope: ErrorEnvelope) -> Self {
        VerdictError::Analyzer {
            code: envelope.error.code,
            message: envelope.error.message,
        }
    }
}

/// Parse one text frame from the audio analyzer socket.
///
/// `received_at` stands in for the timestamp when the sender omitted one or
/// sent something unparseable.
pub fn parse_audio_frame(text: &str, received_at: DateTime<Utc>) -> Result<ReactionVerdict> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    if value.get("error").is_some() {
        let envelope: ErrorEnvelope = serde_json::from_value(value)?;
        return Err(envelope.into());
    }

    let frame: AudioVerdictFrame = serde_json::from_value(value)?;
    let label = frame
        .verdict
        .or(frame.reaction_type)
        .filter(|label| !label.trim().is_empty())
        .ok_or(VerdictError::MissingLabel)?;
    let timestamp = frame
        .timestamp
        .as_deref()
        .and_then(parse_timestamp)
        .unwrap_or(received_at);

    Ok(ReactionVerdict {
        source: Source::Audio,
        label: ReactionLabel::from_wire(&label),
        confidence_pct: frame.confidence.and_then(confidence_to_pct),
        timestamp,
    })
}

/// Parse a visual analyzer response body.
pub fn parse_visual_response(text: &str, received_at: DateTime<Utc>) -> Result<ReactionVerdict> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    if value.get("error").is_some() {
        let envelope: ErrorEnvelope = serde_json::from_value(value)?;
        return Err(envelope.into());
    }

    let response: VisualVerdictResponse = serde_json::from_value(value)?;
    let label = response
        .visual_verdict
        .filter(|label| !label.trim().is_empty())
        .ok_or(VerdictError::MissingLabel)?;

    Ok(ReactionVerdict {
        source: Source::Video,
        label: ReactionLabel::from_wire(&label),
        confidence_pct: response.confidence.and_then(confidence_to_pct),
        timestamp: received_at,
    })
}

/// ISO-8601 timestamps, with or without an offset (naive ones are taken as UTC).
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// 0.0-1.0 confidence to a whole percentage. Non-finite values mean "unknown".
fn confidence_to_pct(confidence: f64) -> Option<u8> {
    if !confidence.is_finite() {
        return None;
    }
    Some((confidence.clamp(0.0, 1.0) * 100.0).round() as u8)
}
