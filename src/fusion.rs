//! Audio + video verdict fusion

use crate::verdict::{ReactionLabel, ReactionVerdict, Source};
use serde::Serialize;
use std::fmt;

/// Single reaction label handed to the generator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FusedReaction {
    #[serde(rename = "big reaction")]
    BigReaction,
    #[serde(rename = "small reaction")]
    SmallReaction,
    #[serde(rename = "silence/negative")]
    SilenceNegative,
    #[serde(rename = "confusion")]
    Confusion,
    #[serde(rename = "neutral")]
    Neutral,
}

impl FusedReaction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FusedReaction::BigReaction => "big reaction",
            FusedReaction::SmallReaction => "small reaction",
            FusedReaction::SilenceNegative => "silence/negative",
            FusedReaction::Confusion => "confusion",
            FusedReaction::Neutral => "neutral",
        }
    }
}

impl fmt::Display for FusedReaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Combine the latest verdict of each channel.
///
/// Positive tiers trust video first; negative and uncertain tiers trust audio
/// first. The order is fixed and total.
pub fn fuse(audio: Option<&ReactionVerdict>, video: Option<&ReactionVerdict>) -> FusedReaction {
    let audio = audio.map(|v| &v.label);
    let video = video.map(|v| &v.label);
    let is = |label: Option<&ReactionLabel>, want: ReactionLabel| label == Some(&want);

    if is(video, ReactionLabel::StronglyPositive) || is(audio, ReactionLabel::StronglyPositive) {
        FusedReaction::BigReaction
    } else if is(video, ReactionLabel::MildlyPositive) || is(audio, ReactionLabel::MildlyPositive) {
        FusedReaction::SmallReaction
    } else if is(audio, ReactionLabel::Negative) {
        FusedReaction::SilenceNegative
    } else if is(audio, ReactionLabel::Uncertain) || is(video, ReactionLabel::Uncertain) {
        FusedReaction::Confusion
    } else {
        FusedReaction::Neutral
    }
}

/// Most recently processed verdict per channel
#[derive(Debug, Clone, Default)]
pub struct LatestVerdicts {
    pub audio: Option<ReactionVerdict>,
    pub video: Option<ReactionVerdict>,
}

impl LatestVerdicts {
    /// Overwrite the pointer for the verdict's channel.
    pub fn record(&mut self, verdict: ReactionVerdict) {
        match verdict.source {
            Source::Audio => self.audio = Some(verdict),
            Source::Video => self.video = Some(verdict),
        }
    }

    pub fn fused(&self) -> FusedReaction {
        fuse(self.audio.as_ref(), self.video.as_ref())
    }

    pub fn clear(&mut self) {
        self.audio = None;
        self.video = None;
    }
}
