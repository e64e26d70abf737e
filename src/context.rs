//! Compact history digest attached to every generation request
//!
//! The generator is billed per request and has a finite context window, so
//! the snapshot favours recency and never repeats a fact twice: the previous
//! turn and the latest verdicts are reported once, up front, and removed from
//! the timeline tail.

use crate::events::{RawSignal, TurnRecord};
use crate::fusion::{FusedReaction, LatestVerdicts};
use crate::timeline::{EventKind, Timeline, TimelineEvent, TimelinePayload};
use crate::verdict::{ReactionLabel, ReactionVerdict, Source};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// The last completed turn, as reported to the generator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviousTurn {
    pub id: u64,
    pub text: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// Label counts over one stretch of time
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct WindowSummary {
    pub duration_ms: u64,
    pub counts: BTreeMap<String, u32>,
}

/// Reactions before, during and after the previous turn
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReactionWindows {
    pub pre: WindowSummary,
    pub during: WindowSummary,
    pub post: WindowSummary,
}

/// A timeline entry reduced to the fields that tell it apart
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TailEntry {
    Turn { text: Option<String> },
    Audio { label: ReactionLabel, at: DateTime<Utc> },
    Video { label: ReactionLabel, at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextSnapshot {
    pub previous_turn: Option<PreviousTurn>,
    pub fused_reaction: FusedReaction,
    pub latest_audio_verdict: Option<ReactionVerdict>,
    pub latest_video_verdict: Option<ReactionVerdict>,
    pub windows: Option<ReactionWindows>,
    pub timeline_tail: Vec<TailEntry>,
    pub raw_signal: RawSignal,
}

/// Tunables for snapshot construction
#[derive(Debug, Clone)]
pub struct ContextLimits {
    pub tail_len: usize,
    pub pre_window: Duration,
    pub dedupe_tolerance: Duration,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            tail_len: 12,
            pre_window: Duration::from_secs(3),
            dedupe_tolerance: Duration::from_millis(5),
        }
    }
}

impl From<&crate::config::EngineConfig> for ContextLimits {
    fn from(config: &crate::config::EngineConfig) -> Self {
        Self {
            tail_len: config.context_tail_len,
            pre_window: config.pre_window,
            dedupe_tolerance: config.dedupe_tolerance,
        }
    }
}

/// Read-only view of session history used to build a snapshot
pub struct ContextBuilder<'a> {
    pub timeline: &'a Timeline,
    pub latest: &'a LatestVerdicts,
    /// Most recent turn, complete or not
    pub last_turn: Option<&'a TurnRecord>,
    pub limits: &'a ContextLimits,
}

impl<'a> ContextBuilder<'a> {
    pub fn build(&self, raw_signal: RawSignal, now: DateTime<Utc>) -> ContextSnapshot {
        // A turn that never finished is treated as no data.
        let previous_turn = self.last_turn.and_then(|turn| match (turn.started_at, turn.ended_at) {
            (Some(started_at), Some(ended_at)) => Some(PreviousTurn {
                id: turn.id,
                text: turn.text.clone(),
                started_at,
                ended_at,
            }),
            _ => None,
        });

        let windows = previous_turn.as_ref().map(|turn| self.windows(turn, now));
        let timeline_tail = self.tail(previous_turn.as_ref());

        ContextSnapshot {
            fused_reaction: self.latest.fused(),
            latest_audio_verdict: self.latest.audio.clone(),
            latest_video_verdict: self.latest.video.clone(),
            previous_turn,
            windows,
            timeline_tail,
            raw_signal,
        }
    }

    /// pre is `[start - pre_window, start)`, during is `[start, end]`, post
    /// is `(end, now]`.
    fn windows(&self, turn: &PreviousTurn, now: DateTime<Utc>) -> ReactionWindows {
        let (start, end) = (turn.started_at, turn.ended_at);
        let pre_start = start - to_chrono(self.limits.pre_window);
        let pre = self.timeline.query(pre_start, start);
        let during = self.timeline.query(start, end);
        let post = self.timeline.query(end, now);
        ReactionWindows {
            pre: summarize(pre_start, start, pre.into_iter().filter(|e| e.timestamp < start)),
            during: summarize(start, end, during),
            post: summarize(end, now, post.into_iter().filter(|e| e.timestamp > end)),
        }
    }

    fn tail(&self, previous: Option<&PreviousTurn>) -> Vec<TailEntry> {
        let tolerance = to_chrono(self.limits.dedupe_tolerance);
        let already_reported = |verdict: &ReactionVerdict| {
            let latest = match verdict.source {
                Source::Audio => self.latest.audio.as_ref(),
                Source::Video => self.latest.video.as_ref(),
            };
            latest.is_some_and(|latest| (verdict.timestamp - latest.timestamp).abs() <= tolerance)
        };

        self.timeline
            .tail(self.limits.tail_len)
            .into_iter()
            .filter_map(|event| match &event.payload {
                TimelinePayload::Turn { id, .. } if previous.is_some_and(|p| p.id == *id) => None,
                TimelinePayload::Turn { text, .. } => Some(TailEntry::Turn { text: text.clone() }),
                TimelinePayload::Signal(verdict) if already_reported(verdict) => None,
                TimelinePayload::Signal(verdict) => Some(match event.kind() {
                    EventKind::VideoSignal => TailEntry::Video {
                        label: verdict.label.clone(),
                        at: verdict.timestamp,
                    },
                    _ => TailEntry::Audio {
                        label: verdict.label.clone(),
                        at: verdict.timestamp,
                    },
                }),
            })
            .collect()
    }
}

fn summarize<'e>(
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    events: impl IntoIterator<Item = &'e TimelineEvent>,
) -> WindowSummary {
    let mut counts = BTreeMap::new();
    for verdict in events.into_iter().filter_map(TimelineEvent::verdict) {
        *counts.entry(verdict.label.as_str().to_string()).or_insert(0) += 1;
    }
    WindowSummary {
        duration_ms: (to - from).num_milliseconds().max(0) as u64,
        counts,
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero())
}
