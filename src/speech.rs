//! Speech output queue - serialized, paced delivery of generated turns

use crate::config::EngineConfig;
use crate::events::{SessionEvent, SpeechItem};
use crate::playback::Playback;
use crate::wav;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

/// Timing rules for the drain loop
#[derive(Debug, Clone)]
pub struct SpeechPacing {
    pub minimum_gap: Duration,
    pub post_delay: Duration,
    pub safety_timeout: Duration,
}

impl From<&EngineConfig> for SpeechPacing {
    fn from(config: &EngineConfig) -> Self {
        Self {
            minimum_gap: config.minimum_gap,
            post_delay: config.post_playback_delay,
            safety_timeout: config.playback_safety_timeout,
        }
    }
}

struct Shared {
    items: Mutex<VecDeque<SpeechItem>>,
    notify: Notify,
    active: AtomicBool,
    /// When the previous item stopped playing
    last_end: Mutex<Option<Instant>>,
}

impl Shared {
    fn pop(&self) -> Option<SpeechItem> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }
}

/// FIFO of turns waiting to be spoken, drained by a single task
pub struct SpeechQueue {
    shared: Arc<Shared>,
    playback: Arc<dyn Playback>,
    events: mpsc::UnboundedSender<SessionEvent>,
    pacing: SpeechPacing,
    task: Option<JoinHandle<()>>,
}

impl SpeechQueue {
    pub fn new(
        playback: Arc<dyn Playback>,
        events: mpsc::UnboundedSender<SessionEvent>,
        pacing: SpeechPacing,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                items: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                active: AtomicBool::new(true),
                last_end: Mutex::new(None),
            }),
            playback,
            events,
            pacing,
            task: None,
        }
    }

    pub fn enqueue(&mut self, item: SpeechItem) {
        debug!("Queueing speech for turn {}", item.id);
        self.shared
            .items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(item);
        self.shared.active.store(true, Ordering::SeqCst);
        self.ensure_drain();
        self.shared.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.shared
            .items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop queued items and abort whatever the drain task is waiting on.
    pub fn clear(&mut self) {
        let dropped = {
            let mut items = self.shared.items.lock().unwrap_or_else(PoisonError::into_inner);
            let n = items.len();
            items.clear();
            n
        };
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if dropped > 0 {
            info!("🧹 Dropped {} queued speech item(s)", dropped);
        }
    }

    /// Let the drain task exit once the queue is empty.
    pub fn shutdown(&mut self) {
        self.shared.active.store(false, Ordering::SeqCst);
        self.shared.notify.notify_one();
    }

    /// Wait for the drain task to finish (after `shutdown`).
    pub async fn join(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    fn ensure_drain(&mut self) {
        if self.task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let drain = Drain {
            shared: self.shared.clone(),
            playback: self.playback.clone(),
            events: self.events.clone(),
            pacing: self.pacing.clone(),
        };
        self.task = Some(tokio::spawn(drain.run()));
    }
}

impl Drop for SpeechQueue {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct Drain {
    shared: Arc<Shared>,
    playback: Arc<dyn Playback>,
    events: mpsc::UnboundedSender<SessionEvent>,
    pacing: SpeechPacing,
}

impl Drain {
    async fn run(self) {
        loop {
            match self.shared.pop() {
                Some(item) => self.deliver(item).await,
                None if self.shared.active.load(Ordering::SeqCst) => {
                    self.shared.notify.notified().await
                }
                None => break,
            }
        }
        debug!("Speech drain finished");
    }

    async fn deliver(&self, item: SpeechItem) {
        let last_end = *self
            .shared
            .last_end
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(end) = last_end {
            sleep_until(end + self.pacing.minimum_gap).await;
        }

        let _ = self.events.send(SessionEvent::SpeechStarted { id: item.id });
        if let Some(text) = &item.text {
            info!("🗣️  {}", text);
        }

        let container = item.audio.as_deref().and_then(|pcm| {
            wav::encode(pcm, item.sample_rate, 1)
                .map_err(|e| warn!("Skipping audio for turn {}: {}", item.id, e))
                .ok()
        });

        match container {
            Some(container) => {
                match timeout(self.pacing.safety_timeout, self.playback.play(container)).await {
                    Ok(Ok(())) => debug!("Playback of turn {} finished", item.id),
                    Ok(Err(e)) => warn!("Playback of turn {} failed: {}", item.id, e),
                    Err(_) => warn!("No playback end for turn {} after {:?}", item.id, self.pacing.safety_timeout),
                }
                self.mark_end();
                sleep(self.pacing.post_delay).await;
            }
            None => {
                sleep(self.pacing.minimum_gap.max(self.pacing.post_delay)).await;
                self.mark_end();
            }
        }

        let _ = self.events.send(SessionEvent::SpeechFinished { id: item.id });
    }

    fn mark_end(&self) {
        *self
            .shared
            .last_end
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback;
    use async_trait::async_trait;

    /// Records when each container started playing, then "plays" it.
    #[derive(Default)]
    struct FakePlayback {
        started: Mutex<Vec<Instant>>,
        hang: bool,
    }

    #[async_trait]
    impl Playback for FakePlayback {
        async fn play(&self, container: Vec<u8>) -> playback::Result<()> {
            self.started.lock().unwrap().push(Instant::now());
            if self.hang {
                std::future::pending::<()>().await;
            }
            let decoded = wav::decode(&container)?;
            sleep(decoded.duration()).await;
            Ok(())
        }
    }

    fn pacing() -> SpeechPacing {
        SpeechPacing::from(&EngineConfig::default())
    }

    fn item(id: u64, audio_ms: Option<u64>) -> SpeechItem {
        SpeechItem {
            id,
            text: Some(format!("line {}", id)),
            // 24 kHz mono PCM16 = 48 bytes per ms
            audio: audio_ms.map(|ms| vec![0u8; (ms * 48) as usize]),
            sample_rate: 24_000,
        }
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> (String, u64, Instant) {
        match rx.recv().await.unwrap() {
            SessionEvent::SpeechStarted { id } => ("start".into(), id, Instant::now()),
            SessionEvent::SpeechFinished { id } => ("end".into(), id, Instant::now()),
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_with_gap_and_post_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let fake = Arc::new(FakePlayback::default());
        let mut queue = SpeechQueue::new(fake.clone(), tx, pacing());
        let t0 = Instant::now();

        queue.enqueue(item(1, Some(2_000)));
        queue.enqueue(item(2, Some(500)));

        let (kind, id, at) = next(&mut rx).await;
        assert_eq!((kind.as_str(), id, at), ("start", 1, t0));
        let (kind, id, at) = next(&mut rx).await;
        // 2 s of audio + 700 ms post delay
        assert_eq!((kind.as_str(), id), ("end", 1));
        assert_eq!(at - t0, Duration::from_millis(2_700));

        let (kind, id, at) = next(&mut rx).await;
        assert_eq!((kind.as_str(), id), ("start", 2));
        // Minimum gap is measured from the end of playback.
        assert_eq!(at - t0, Duration::from_millis(3_000));
        let (kind, id, _) = next(&mut rx).await;
        assert_eq!((kind.as_str(), id), ("end", 2));

        let started = fake.started.lock().unwrap().clone();
        assert_eq!(started.len(), 2);
        assert!(started[1] - started[0] >= Duration::from_millis(3_000));
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_item_without_audio_still_paces() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let fake = Arc::new(FakePlayback::default());
        let mut queue = SpeechQueue::new(fake.clone(), tx, pacing());
        let t0 = Instant::now();

        queue.enqueue(item(7, None));
        assert_eq!(next(&mut rx).await.0, "start");
        let (kind, id, at) = next(&mut rx).await;
        assert_eq!((kind.as_str(), id), ("end", 7));
        assert_eq!(at - t0, Duration::from_millis(1_000));
        assert!(fake.started.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_misaligned_audio_is_skipped() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let fake = Arc::new(FakePlayback::default());
        let mut queue = SpeechQueue::new(fake.clone(), tx, pacing());

        let mut bad = item(3, None);
        bad.audio = Some(vec![0u8; 3]);
        queue.enqueue(bad);
        assert_eq!(next(&mut rx).await.0, "start");
        assert_eq!(next(&mut rx).await.1, 3);
        assert!(fake.started.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_safety_timeout() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let fake = Arc::new(FakePlayback {
            hang: true,
            ..Default::default()
        });
        let mut queue = SpeechQueue::new(fake, tx, pacing());
        let t0 = Instant::now();

        queue.enqueue(item(1, Some(100)));
        next(&mut rx).await;
        let (kind, _, at) = next(&mut rx).await;
        assert_eq!(kind, "end");
        assert_eq!(at - t0, Duration::from_millis(15_700));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_aborts_and_drops() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let fake = Arc::new(FakePlayback {
            hang: true,
            ..Default::default()
        });
        let mut queue = SpeechQueue::new(fake.clone(), tx, pacing());

        queue.enqueue(item(1, Some(100)));
        queue.enqueue(item(2, Some(100)));
        assert_eq!(next(&mut rx).await.1, 1);
        queue.clear();
        assert!(queue.is_empty());

        sleep(Duration::from_secs(60)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(fake.started.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_exits_after_shutdown() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut queue = SpeechQueue::new(Arc::new(FakePlayback::default()), tx, pacing());

        queue.enqueue(item(1, None));
        queue.shutdown();
        queue.join().await;

        // The queued item was still delivered before the task ended.
        assert_eq!(next(&mut rx).await.0, "start");
        assert_eq!(next(&mut rx).await.0, "end");
    }
}
