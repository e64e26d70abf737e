//! Turn scheduler - decides when the performer may speak next
//!
//! Pure state machine: `on_event` mutates the machine and queues `Effect`s,
//! the session runner drains and applies them. No I/O happens here.
//!
//! ```text
//!   Idle --trigger/fallback--> Requesting --response--> Speaking --finished--> Idle
//!                                  \--failure--> Idle
//! ```
//!
//! Every entry to `Idle` arms the fallback timer so the performer never stalls.

use crate::config::EngineConfig;
use crate::context::{ContextBuilder, ContextLimits};
use crate::events::{RawSignal, SpeechItem, SyntheticSignal, TurnRecord};
use crate::fusion::LatestVerdicts;
use crate::generator::GenerationRequest;
use crate::timeline::{Timeline, TimelineEvent};
use crate::verdict::ReactionVerdict;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Inputs to the scheduler
#[derive(Debug, Clone)]
pub enum Event {
    /// Session start; issues the opening request
    Start,
    /// A verdict from either analyzer (a genuine trigger)
    Verdict(ReactionVerdict),
    /// The fallback deadline passed
    FallbackFired,
    /// The generator answered
    Response {
        id: u64,
        text: Option<String>,
        audio: Option<Vec<u8>>,
    },
    /// The generation request failed
    RequestFailed { id: u64 },
    /// The speech queue began delivering a turn
    SpeechStarted { id: u64 },
    /// The speech queue finished delivering a turn
    SpeechFinished { id: u64 },
    /// Session stop
    Stop,
}

/// Work for the runner
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Clear the generator's conversational state (fire and forget)
    ResetRemote,
    /// Send a generation request
    IssueRequest { id: u64, request: GenerationRequest },
    /// Hand a turn to the speech queue
    Enqueue(SpeechItem),
    /// (Re)arm the single fallback timer
    ArmFallback { deadline: Instant },
    /// Disarm the fallback timer
    CancelFallback,
    /// Drop queued speech and abort in-progress playback waits
    ClearSpeech,
    /// A turn finished delivery
    TurnCompleted(TurnRecord),
    /// A session limit was reached; the machine has already stopped
    SessionEnded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Requesting { id: u64 },
    Speaking { id: u64 },
}

impl Phase {
    pub fn active_id(&self) -> Option<u64> {
        match self {
            Phase::Idle => None,
            Phase::Requesting { id } | Phase::Speaking { id } => Some(*id),
        }
    }
}

/// Per-session counters, logged when the session stops
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub requested: u32,
    pub completed: u32,
    pub failed: u32,
    pub stale_discarded: u32,
    pub fallback_requests: u32,
    pub verdicts: u32,
}

/// Turn-taking state machine for one performer session
pub struct Scheduler {
    config: EngineConfig,
    limits: ContextLimits,

    running: bool,
    phase: Phase,
    last_trigger_at: Option<Instant>,
    last_turn_end_at: Option<Instant>,
    fallback_deadline: Option<Instant>,
    started_at: Option<Instant>,

    /// Never reset, so ids stay unique across restarts
    next_id: u64,
    /// Turn in `Requesting`/`Speaking`
    active: Option<TurnRecord>,
    /// Most recent completed turn
    last_turn: Option<TurnRecord>,

    timeline: Timeline,
    latest: LatestVerdicts,
    stats: SessionStats,

    /// Wall clock at `anchor`, used to stamp turns
    anchor: Instant,
    anchor_wall: DateTime<Utc>,

    /// Effects queue (drained after each event)
    effects: Vec<Effect>,
}

impl Scheduler {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_anchor(config, Instant::now(), Utc::now())
    }

    /// Scheduler whose wall clock reads `wall` at instant `at`.
    pub fn with_anchor(config: EngineConfig, at: Instant, wall: DateTime<Utc>) -> Self {
        Self {
            limits: ContextLimits::from(&config),
            timeline: Timeline::with_capacity(config.timeline_capacity),
            config,
            running: false,
            phase: Phase::Idle,
            last_trigger_at: None,
            last_turn_end_at: None,
            fallback_deadline: None,
            started_at: None,
            next_id: 1,
            active: None,
            last_turn: None,
            latest: LatestVerdicts::default(),
            stats: SessionStats::default(),
            anchor: at,
            anchor_wall: wall,
            effects: Vec::new(),
        }
    }

    /// Process an event and queue the resulting effects
    pub fn on_event(&mut self, now: Instant, event: Event) {
        match event {
            Event::Start => self.start(now),
            Event::Stop => self.stop(),
            _ if !self.running => debug!("Session stopped, ignoring {}", event_name(&event)),

            Event::Verdict(verdict) => {
                self.stats.verdicts += 1;
                debug!("{:?} verdict: {}", verdict.source, verdict.label);
                self.timeline.append(TimelineEvent::signal(verdict.clone()));
                self.latest.record(verdict.clone());

                if self.eligible(now) {
                    info!("🎯 Reaction trigger ({}, fused: {})", verdict.label, self.latest.fused());
                    self.issue(now, RawSignal::Verdict(verdict));
                } else if self.phase == Phase::Idle {
                    self.arm_fallback();
                }
            }

            Event::FallbackFired => {
                let due = self.fallback_deadline.is_some_and(|deadline| now >= deadline);
                if !due {
                    return;
                }
                self.fallback_deadline = None;
                if self.eligible(now) {
                    info!("⏰ No reaction, prompting anyway");
                    self.stats.fallback_requests += 1;
                    self.issue(now, RawSignal::Synthetic(SyntheticSignal::no_reaction()));
                } else if self.phase == Phase::Idle {
                    self.arm_fallback();
                }
            }

            Event::Response { id, text, audio } => match self.phase {
                Phase::Requesting { id: active } if active == id => {
                    let started_at = self.wall(now);
                    if let Some(turn) = self.active.as_mut() {
                        turn.text = text.clone();
                        turn.audio = audio.clone();
                        turn.started_at = Some(started_at);
                    }
                    info!("💬 Turn {}: {}", id, text.as_deref().unwrap_or("<no text>"));
                    self.timeline.append(TimelineEvent::turn(id, text.clone(), started_at));
                    self.phase = Phase::Speaking { id };
                    self.effects.push(Effect::Enqueue(SpeechItem {
                        id,
                        text,
                        audio,
                        sample_rate: self.config.speech_sample_rate,
                    }));
                }
                _ => {
                    self.stats.stale_discarded += 1;
                    debug!("Discarding stale response {} (phase {:?})", id, self.phase);
                }
            },

            Event::RequestFailed { id } => match self.phase {
                Phase::Requesting { id: active } if active == id => {
                    warn!("Turn {} failed, back to idle", id);
                    self.stats.failed += 1;
                    self.active = None;
                    self.enter_idle();
                }
                _ => debug!("Ignoring failure of stale request {}", id),
            },

            Event::SpeechStarted { id } => {
                debug!("🔊 Speaking turn {}", id);
            }

            Event::SpeechFinished { id } => match self.phase {
                Phase::Speaking { id: active } if active == id => {
                    let ended_at = self.wall(now);
                    self.last_turn_end_at = Some(now);
                    self.stats.completed += 1;
                    if let Some(mut turn) = self.active.take() {
                        turn.ended_at = Some(ended_at);
                        self.effects.push(Effect::TurnCompleted(turn.clone()));
                        self.last_turn = Some(turn);
                    }
                    info!("✅ Turn {} done", id);

                    let limit_reached = self
                        .config
                        .max_turns
                        .is_some_and(|max| self.stats.completed >= max);
                    if limit_reached {
                        info!("🏁 Reached {} turns", self.stats.completed);
                        self.stop();
                        self.effects.push(Effect::SessionEnded);
                    } else {
                        self.enter_idle();
                    }
                }
                _ => debug!("Ignoring playback end of stale turn {}", id),
            },
        }
    }

    /// Take all effects queued since the last drain
    pub fn drain_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Anything in flight or being spoken
    pub fn is_busy(&self) -> bool {
        self.phase != Phase::Idle
    }

    /// Human readable phase, including the derived cooling-down condition
    pub fn phase_label(&self, now: Instant) -> &'static str {
        match self.phase {
            Phase::Requesting { .. } => "requesting",
            Phase::Speaking { .. } => "speaking",
            Phase::Idle if self.running && !self.guards_clear(now) => "cooling-down",
            Phase::Idle => "idle",
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn latest(&self) -> &LatestVerdicts {
        &self.latest
    }

    pub fn last_turn(&self) -> Option<&TurnRecord> {
        self.last_turn.as_ref()
    }

    pub fn last_trigger_at(&self) -> Option<Instant> {
        self.last_trigger_at
    }

    pub fn last_turn_end_at(&self) -> Option<Instant> {
        self.last_turn_end_at
    }

    pub fn fallback_deadline(&self) -> Option<Instant> {
        self.fallback_deadline
    }

    /// When the session began, if running
    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    fn start(&mut self, now: Instant) {
        if self.running {
            debug!("Session already running");
            return;
        }
        info!("🎬 Session starting");
        self.running = true;
        self.started_at = Some(now);
        self.stats = SessionStats::default();
        self.effects.push(Effect::ResetRemote);

        let id = self.allocate(now);
        self.stats.requested += 1;
        self.effects.push(Effect::IssueRequest {
            id,
            request: GenerationRequest::with_signal(id, SyntheticSignal::opening()),
        });
    }

    fn stop(&mut self) {
        if self.running {
            info!(
                "🛑 Session stopped: {} requested, {} completed, {} failed, {} stale, {} fallback, {} verdicts",
                self.stats.requested,
                self.stats.completed,
                self.stats.failed,
                self.stats.stale_discarded,
                self.stats.fallback_requests,
                self.stats.verdicts
            );
        }
        self.effects.push(Effect::CancelFallback);
        self.effects.push(Effect::ClearSpeech);

        self.running = false;
        self.phase = Phase::Idle;
        self.last_trigger_at = None;
        self.last_turn_end_at = None;
        self.fallback_deadline = None;
        self.started_at = None;
        self.active = None;
        self.last_turn = None;
        self.timeline.clear();
        self.latest.clear();
    }

    fn eligible(&self, now: Instant) -> bool {
        self.running && self.phase == Phase::Idle && self.guards_clear(now)
    }

    fn guards_clear(&self, now: Instant) -> bool {
        let cooled = self
            .last_trigger_at
            .map_or(true, |at| now.saturating_duration_since(at) >= self.config.cooldown);
        let gapped = self
            .last_turn_end_at
            .map_or(true, |at| now.saturating_duration_since(at) >= self.config.minimum_gap);
        cooled && gapped
    }

    fn allocate(&mut self, now: Instant) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.active = Some(TurnRecord::requested(id, self.wall(now)));
        self.phase = Phase::Requesting { id };
        self.last_trigger_at = Some(now);
        id
    }

    fn issue(&mut self, now: Instant, raw_signal: RawSignal) {
        let context = ContextBuilder {
            timeline: &self.timeline,
            latest: &self.latest,
            last_turn: self.last_turn.as_ref(),
            limits: &self.limits,
        }
        .build(raw_signal, self.wall(now));

        if self.fallback_deadline.take().is_some() {
            self.effects.push(Effect::CancelFallback);
        }
        let id = self.allocate(now);
        self.stats.requested += 1;
        info!("📤 Requesting turn {} ({})", id, context.fused_reaction);
        self.effects.push(Effect::IssueRequest {
            id,
            request: GenerationRequest::with_context(id, context),
        });
    }

    fn enter_idle(&mut self) {
        self.phase = Phase::Idle;
        self.arm_fallback();
    }

    /// Deadline is `fallback_window` after the later of the last trigger and
    /// the last turn end, pushed out if a guard would still block it.
    fn arm_fallback(&mut self) {
        let base = match (self.last_trigger_at, self.last_turn_end_at) {
            (Some(a), Some(b)) => a.max(b),
            (Some(a), None) | (None, Some(a)) => a,
            (None, None) => self.anchor,
        };
        let mut deadline = base + self.config.fallback_window;
        if let Some(at) = self.last_trigger_at {
            deadline = deadline.max(at + self.config.cooldown);
        }
        if let Some(at) = self.last_turn_end_at {
            deadline = deadline.max(at + self.config.minimum_gap);
        }

        self.fallback_deadline = Some(deadline);
        self.effects.push(Effect::ArmFallback { deadline });
    }

    fn wall(&self, at: Instant) -> DateTime<Utc> {
        let offset = at.saturating_duration_since(self.anchor);
        self.anchor_wall + chrono::Duration::from_std(offset).unwrap_or(chrono::Duration::zero())
    }
}

fn event_name(event: &Event) -> &'static str {
    match event {
        Event::Start => "start",
        Event::Verdict(_) => "verdict",
        Event::FallbackFired => "fallback",
        Event::Response { .. } => "response",
        Event::RequestFailed { .. } => "request failure",
        Event::SpeechStarted { .. } => "speech start",
        Event::SpeechFinished { .. } => "speech end",
        Event::Stop => "stop",
    }
}
