//! Bounded, time-ordered log of what happened during a session

use crate::verdict::{ReactionVerdict, Source};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

/// Default number of events kept
pub const DEFAULT_CAPACITY: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Turn,
    AudioSignal,
    VideoSignal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TimelinePayload {
    /// Text the performer delivered for a turn
    Turn { id: u64, text: Option<String> },
    /// Verdict from one of the analyzers
    Signal(ReactionVerdict),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEvent {
    pub timestamp: DateTime<Utc>,
    pub payload: TimelinePayload,
}

impl TimelineEvent {
    pub fn turn(id: u64, text: Option<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            payload: TimelinePayload::Turn { id, text },
        }
    }

    pub fn signal(verdict: ReactionVerdict) -> Self {
        Self {
            timestamp: verdict.timestamp,
            payload: TimelinePayload::Signal(verdict),
        }
    }

    pub fn kind(&self) -> EventKind {
        match &self.payload {
            TimelinePayload::Turn { .. } => EventKind::Turn,
            TimelinePayload::Signal(v) if v.source == Source::Audio => EventKind::AudioSignal,
            TimelinePayload::Signal(_) => EventKind::VideoSignal,
        }
    }

    pub fn verdict(&self) -> Option<&ReactionVerdict> {
        match &self.payload {
            TimelinePayload::Signal(v) => Some(v),
            TimelinePayload::Turn { .. } => None,
        }
    }
}

/// Append-mostly event log capped at `capacity` entries.
///
/// Excess entries are dropped in batches rather than on every append; reads
/// only ever see the newest `capacity` events.
#[derive(Debug, Clone)]
pub struct Timeline {
    events: VecDeque<TimelineEvent>,
    capacity: usize,
    slack: usize,
}

impl Default for Timeline {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl Timeline {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let slack = (capacity / 10).max(1);
        Self {
            events: VecDeque::with_capacity(capacity + slack + 1),
            capacity,
            slack,
        }
    }

    pub fn append(&mut self, event: TimelineEvent) {
        let in_order = self
            .events
            .back()
            .map_or(true, |last| last.timestamp <= event.timestamp);
        if in_order {
            self.events.push_back(event);
        } else {
            // Late arrival: keep it after any equal timestamps already logged.
            let at = self.events.partition_point(|e| e.timestamp <= event.timestamp);
            self.events.insert(at, event);
        }

        if self.events.len() > self.capacity + self.slack {
            let excess = self.events.len() - self.capacity;
            self.events.drain(..excess);
        }
    }

    /// Events with `from <= timestamp <= to`, oldest first.
    pub fn query(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<&TimelineEvent> {
        self.iter()
            .filter(|e| e.timestamp >= from && e.timestamp <= to)
            .collect()
    }

    /// The most recent `n` events, oldest first.
    pub fn tail(&self, n: usize) -> Vec<&TimelineEvent> {
        let visible = self.len();
        self.iter().skip(visible.saturating_sub(n)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimelineEvent> {
        self.events.iter().skip(self.hidden())
    }

    pub fn len(&self) -> usize {
        self.events.len() - self.hidden()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    fn hidden(&self) -> usize {
        self.events.len().saturating_sub(self.capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 20, 0, 0).unwrap() + chrono::Duration::milliseconds(ms)
    }

    fn audio(label: &str, ms: i64) -> TimelineEvent {
        TimelineEvent::signal(ReactionVerdict::new(Source::Audio, label, at(ms)))
    }

    fn turn_id(event: &TimelineEvent) -> u64 {
        match &event.payload {
            TimelinePayload::Turn { id, .. } => *id,
            other => panic!("Unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_eviction_keeps_newest() {
        let mut timeline = Timeline::with_capacity(500);
        for i in 0..1_234u64 {
            timeline.append(TimelineEvent::turn(i, None, at(i as i64)));
            assert!(timeline.len() <= 500);
        }

        assert_eq!(timeline.len(), 500);
        let ids: Vec<u64> = timeline.iter().map(turn_id).collect();
        let expected: Vec<u64> = (734..1_234).collect();
        assert_eq!(ids, expected);
        assert!(timeline
            .iter()
            .zip(timeline.iter().skip(1))
            .all(|(a, b)| a.timestamp <= b.timestamp));
    }

    #[test]
    fn test_out_of_order_insert() {
        let mut timeline = Timeline::default();
        timeline.append(audio("neutral", 10));
        timeline.append(audio("hit", 30));
        timeline.append(audio("miss", 20));
        timeline.append(audio("uncertain", 20));

        let labels: Vec<&str> = timeline
            .iter()
            .map(|e| e.verdict().unwrap().label.as_str())
            .collect();
        assert_eq!(labels, vec!["neutral", "negative", "uncertain", "strongly-positive"]);
    }

    #[test]
    fn test_query_is_inclusive() {
        let mut timeline = Timeline::default();
        for ms in [0, 100, 200, 300, 400] {
            timeline.append(audio("neutral", ms));
        }
        let hits = timeline.query(at(100), at(300));
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].timestamp, at(100));
        assert_eq!(hits[2].timestamp, at(300));
        assert!(timeline.query(at(401), at(900)).is_empty());
    }

    #[test]
    fn test_tail() {
        let mut timeline = Timeline::with_capacity(4);
        for i in 0..6u64 {
            timeline.append(TimelineEvent::turn(i, Some(format!("joke {}", i)), at(i as i64)));
        }
        let tail: Vec<u64> = timeline.tail(3).into_iter().map(turn_id).collect();
        assert_eq!(tail, vec![3, 4, 5]);
        assert_eq!(timeline.tail(10).len(), 4);
    }

    #[test]
    fn test_kinds() {
        let video = TimelineEvent::signal(ReactionVerdict::new(Source::Video, "neutral", at(0)));
        assert_eq!(video.kind(), EventKind::VideoSignal);
        assert_eq!(audio("hit", 0).kind(), EventKind::AudioSignal);
        assert_eq!(TimelineEvent::turn(1, None, at(0)).kind(), EventKind::Turn);
    }
}
