//! Session runner - connects analyzers, scheduler, generator and speech queue

use crate::config::EngineConfig;
use crate::events::SessionEvent;
use crate::generator::Generator;
use crate::playback::Playback;
use crate::recorder::TurnRecorder;
use crate::scheduler::{Effect, Event, Scheduler, SessionStats};
use crate::speech::{SpeechPacing, SpeechQueue};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, sleep_until, Instant, MissedTickBehavior, Sleep};
use tracing::{debug, info, warn};

const STATUS_INTERVAL: Duration = Duration::from_secs(30);

/// One performer session. All scheduler state lives on the task running
/// [`Session::run`]; everything else talks to it through [`SessionEvent`]s.
pub struct Session {
    config: EngineConfig,
    scheduler: Scheduler,
    speech: SpeechQueue,
    generator: Arc<dyn Generator>,
    recorder: TurnRecorder,
    tx: mpsc::UnboundedSender<SessionEvent>,
    rx: mpsc::UnboundedReceiver<SessionEvent>,
    fallback: Pin<Box<Sleep>>,
    fallback_armed: bool,
    finished: bool,
}

impl Session {
    pub fn new(
        config: EngineConfig,
        generator: Arc<dyn Generator>,
        playback: Arc<dyn Playback>,
        recorder: TurnRecorder,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            scheduler: Scheduler::new(config.clone()),
            speech: SpeechQueue::new(playback, tx.clone(), SpeechPacing::from(&config)),
            config,
            generator,
            recorder,
            tx,
            rx,
            fallback: Box::pin(sleep(Duration::ZERO)),
            fallback_armed: false,
            finished: false,
        }
    }

    /// Channel for verdicts and control events.
    pub fn sender(&self) -> mpsc::UnboundedSender<SessionEvent> {
        self.tx.clone()
    }

    /// Drive the session until it is stopped or hits a limit.
    pub async fn run(mut self) -> SessionStats {
        let started = Instant::now();
        let limit = self.config.max_duration.and_then(|d| started.checked_add(d));
        let time_limit = sleep_until(limit.unwrap_or(started));
        tokio::pin!(time_limit);
        let mut status = interval(STATUS_INTERVAL);
        status.set_missed_tick_behavior(MissedTickBehavior::Delay);
        status.tick().await;

        info!(
            "Session started (cooldown {:?}, gap {:?}, fallback {:?})",
            self.config.cooldown, self.config.minimum_gap, self.config.fallback_window
        );
        self.dispatch(Event::Start);

        while !self.finished {
            tokio::select! {
                _ = &mut self.fallback, if self.fallback_armed => {
                    self.fallback_armed = false;
                    self.dispatch(Event::FallbackFired);
                }

                _ = &mut time_limit, if limit.is_some() => {
                    info!("⏱️ Time limit reached");
                    self.dispatch(Event::Stop);
                    break;
                }

                _ = status.tick() => {
                    let stats = self.scheduler.stats();
                    info!(
                        "📊 {} | {} turns, {} verdicts, {} queued",
                        self.scheduler.phase_label(Instant::now()),
                        stats.completed,
                        stats.verdicts,
                        self.speech.len()
                    );
                }

                Some(event) = self.rx.recv() => {
                    if !self.handle(event) {
                        break;
                    }
                }
            }
        }

        self.speech.shutdown();
        let stats = self.scheduler.stats().clone();
        info!("Session over");
        stats
    }

    /// Returns false once the session should end.
    fn handle(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::Verdict(verdict) => self.dispatch(Event::Verdict(verdict)),
            SessionEvent::Response { id, text, audio } => {
                self.dispatch(Event::Response { id, text, audio })
            }
            SessionEvent::RequestFailed { id, error } => {
                warn!("❌ Generation for turn {} failed: {}", id, error);
                self.dispatch(Event::RequestFailed { id });
            }
            SessionEvent::SpeechStarted { id } => self.dispatch(Event::SpeechStarted { id }),
            SessionEvent::SpeechFinished { id } => self.dispatch(Event::SpeechFinished { id }),
            SessionEvent::Restart => {
                info!("🔄 Restarting session");
                self.dispatch(Event::Stop);
                self.dispatch(Event::Start);
            }
            SessionEvent::Stop => {
                self.dispatch(Event::Stop);
                return false;
            }
        }
        true
    }

    fn dispatch(&mut self, event: Event) {
        self.scheduler.on_event(Instant::now(), event);
        for effect in self.scheduler.drain_effects() {
            self.apply(effect);
        }
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::ResetRemote => {
                let generator = self.generator.clone();
                tokio::spawn(async move {
                    if let Err(e) = generator.reset().await {
                        debug!("Generator reset failed (ignored): {}", e);
                    }
                });
            }
            Effect::IssueRequest { id, request } => {
                let generator = self.generator.clone();
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let event = match generator.generate(&request).await {
                        Ok(turn) if turn.joke_id != id => {
                            warn!("Generator answered turn {} with id {}", id, turn.joke_id);
                            SessionEvent::RequestFailed {
                                id,
                                error: format!("response carried joke_id {}", turn.joke_id),
                            }
                        }
                        Ok(turn) => SessionEvent::Response {
                            id,
                            text: turn.text,
                            audio: turn.audio,
                        },
                        Err(e) => SessionEvent::RequestFailed {
                            id,
                            error: e.to_string(),
                        },
                    };
                    let _ = tx.send(event);
                });
            }
            Effect::Enqueue(item) => self.speech.enqueue(item),
            Effect::ArmFallback { deadline } => {
                self.fallback.as_mut().reset(deadline);
                self.fallback_armed = true;
            }
            Effect::CancelFallback => self.fallback_armed = false,
            Effect::ClearSpeech => self.speech.clear(),
            Effect::TurnCompleted(turn) => self.recorder.on_turn(&turn),
            Effect::SessionEnded => self.finished = true,
        }
    }
}
