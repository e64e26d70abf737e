//! Audience analyzer clients
//!
//! The audio analyzer is a persistent WebSocket: we stream base64 PCM16 up,
//! it pushes verdict frames down whenever it has one. The visual analyzer is
//! a plain HTTP endpoint polled with a screenshot every few seconds.

use crate::events::SessionEvent;
use crate::resample::pcm16_to_le_bytes;
use crate::verdict::{self, ReactionVerdict, VerdictError};
use base64::engine::general_purpose;
use base64::Engine;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Error type for analyzer operations
#[derive(Debug, thiserror::Error)]
pub enum AnalyzerError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Verdict error: {0}")]
    Verdict(#[from] VerdictError),

    #[error("Visual analyzer returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Connection closed")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, AnalyzerError>;

/// Turn one socket text frame into a session event.
///
/// Bad frames are logged and dropped so the latest-verdict pointer is left
/// untouched.
pub fn frame_to_event(text: &str) -> Option<SessionEvent> {
    match verdict::parse_audio_frame(text, Utc::now()) {
        Ok(verdict) => Some(SessionEvent::Verdict(verdict)),
        Err(VerdictError::Analyzer { code, message }) => {
            warn!("Audio analyzer error {}: {}", code, message);
            None
        }
        Err(e) => {
            warn!("Dropping malformed analyzer frame: {}", e);
            debug!("Frame was: {}", text);
            None
        }
    }
}

/// JSON text frame carrying one chunk of analyzer-rate PCM
pub fn audio_message(pcm: &[i16]) -> String {
    let b64 = general_purpose::STANDARD.encode(pcm16_to_le_bytes(pcm));
    json!({ "audio": b64 }).to_string()
}

/// Persistent connection to the audio analyzer, reconnecting forever
pub struct AudioAnalyzerClient {
    url: String,
    backoff: Duration,
}

impl AudioAnalyzerClient {
    pub fn new(url: &str, backoff: Duration) -> Self {
        Self {
            url: url.to_string(),
            backoff,
        }
    }

    /// Stream `pcm` chunks to the analyzer and forward verdicts to `events`
    /// until `shutdown` flips to true.
    pub async fn run(
        self,
        mut pcm: mpsc::Receiver<Vec<i16>>,
        events: mpsc::UnboundedSender<SessionEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        while !stopped(&shutdown) {
            match self.session(&mut pcm, &events, &mut shutdown).await {
                Ok(()) => info!("Audio analyzer connection closed"),
                Err(e) => warn!("Audio analyzer connection lost: {}", e),
            }
            if stopped(&shutdown) || events.is_closed() {
                break;
            }

            info!("🔌 Reconnecting to audio analyzer in {:?}", self.backoff);
            // Chunks captured while disconnected are stale; drop them.
            let until = tokio::time::Instant::now() + self.backoff;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep_until(until) => break,
                    _ = shutdown.changed() => break,
                    chunk = pcm.recv() => if chunk.is_none() { return },
                }
            }
        }
        debug!("Audio analyzer client stopped");
    }

    async fn session(
        &self,
        pcm: &mut mpsc::Receiver<Vec<i16>>,
        events: &mpsc::UnboundedSender<SessionEvent>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let (ws_stream, _) = connect_async(&self.url).await?;
        info!("🎧 Connected to audio analyzer at {}", self.url);
        let (mut sink, mut stream) = ws_stream.split();

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(());
                }

                chunk = pcm.recv() => match chunk {
                    Some(chunk) => {
                        sink.send(Message::Text(audio_message(&chunk).into())).await?;
                    }
                    None => {
                        info!("Audio input ended");
                        let _ = sink.send(Message::Close(None)).await;
                        return Ok(());
                    }
                },

                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(event) = frame_to_event(&text) {
                            if events.send(event).is_err() {
                                return Ok(());
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!("Analyzer sent close: {:?}", frame);
                        return Err(AnalyzerError::ConnectionClosed);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Err(AnalyzerError::ConnectionClosed),
                },
            }
        }
    }
}

/// True once shutdown was requested or its sender is gone.
fn stopped(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

/// Source of still images for the visual analyzer
pub trait FrameSource: Send {
    /// Capture one JPEG-encoded snapshot.
    fn snapshot(&mut self) -> anyhow::Result<Vec<u8>>;
}

/// Periodic snapshot analysis over HTTP
pub struct VisualAnalyzerClient {
    url: String,
    interval: Duration,
    client: reqwest::Client,
}

impl VisualAnalyzerClient {
    pub fn new(url: &str, interval: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            url: url.to_string(),
            interval,
            client,
        }
    }

    /// Classify one JPEG snapshot.
    pub async fn analyze(&self, jpeg: &[u8]) -> Result<ReactionVerdict> {
        let body = json!({ "image_base64": general_purpose::STANDARD.encode(jpeg) });
        let res = self.client.post(&self.url).json(&body).send().await?;
        let status = res.status();
        let text = res.text().await?;
        if !status.is_success() {
            return Err(AnalyzerError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(verdict::parse_visual_response(&text, Utc::now())?)
    }

    /// Snapshot and classify every `interval` until `shutdown` flips to true.
    pub async fn run(
        self,
        mut source: Box<dyn FrameSource>,
        events: mpsc::UnboundedSender<SessionEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("📷 Visual analysis every {:?}", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }
            if stopped(&shutdown) {
                break;
            }

            let jpeg = match source.snapshot() {
                Ok(jpeg) => jpeg,
                Err(e) => {
                    debug!("Snapshot failed: {}", e);
                    continue;
                }
            };
            match self.analyze(&jpeg).await {
                Ok(verdict) => {
                    if events.send(SessionEvent::Verdict(verdict)).is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Visual analysis failed: {}", e),
            }
        }
        debug!("Visual analyzer client stopped");
    }
}

impl std::fmt::Debug for VisualAnalyzerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisualAnalyzerClient")
            .field("url", &self.url)
            .field("interval", &self.interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verdict::{ReactionLabel, Source};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_audio_message() {
        let text = audio_message(&[0, -1, i16::MAX]);
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        let bytes = general_purpose::STANDARD
            .decode(value["audio"].as_str().unwrap())
            .unwrap();
        assert_eq!(bytes, vec![0x00, 0x00, 0xff, 0xff, 0xff, 0x7f]);
    }

    #[test]
    fn test_frame_to_event() {
        match frame_to_event(r#"{"verdict":"mixed","confidence":0.6}"#) {
            Some(SessionEvent::Verdict(v)) => {
                assert_eq!(v.source, Source::Audio);
                assert_eq!(v.label, ReactionLabel::MildlyPositive);
            }
            other => panic!("Unexpected: {:?}", other),
        }
        assert!(frame_to_event(r#"{"error":{"code":"X","message":"y"}}"#).is_none());
        assert!(frame_to_event("garbage").is_none());
    }

    #[tokio::test]
    async fn test_audio_client_streams_and_reconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let (uploads_tx, mut uploads) = mpsc::unbounded_channel::<String>();
        let (reconnected_tx, mut reconnected) = mpsc::unbounded_channel::<()>();
        let server = tokio::spawn(async move {
            // First connection: take one upload, answer, then hang up.
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                uploads_tx.send(text.to_string()).unwrap();
            }
            ws.send(Message::Text(
                r#"{"error":{"code":"UPSTREAM_ERROR","message":"busy"}}"#.into(),
            ))
            .await
            .unwrap();
            ws.send(Message::Text(r#"{"verdict":"hit","confidence":0.9}"#.into()))
                .await
                .unwrap();
            ws.close(None).await.ok();
            drop(ws);

            // Second connection: the client came back after its backoff.
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            reconnected_tx.send(()).unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let (pcm_tx, pcm_rx) = mpsc::channel(8);
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let client = AudioAnalyzerClient::new(&url, Duration::from_millis(50));
        let task = tokio::spawn(client.run(pcm_rx, events_tx, stop_rx));

        pcm_tx.send(vec![1, 2, 3]).await.unwrap();
        let upload = uploads.recv().await.unwrap();
        assert!(upload.contains("\"audio\""));

        // The error envelope is skipped; only the verdict comes through.
        match events.recv().await.unwrap() {
            SessionEvent::Verdict(v) => assert_eq!(v.label, ReactionLabel::StronglyPositive),
            other => panic!("Unexpected: {:?}", other),
        }

        tokio::time::timeout(Duration::from_secs(5), reconnected.recv())
            .await
            .unwrap()
            .unwrap();

        stop_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert!(events.try_recv().is_err());
    }

    /// Answers a single HTTP request with `status` and `body`, returning the
    /// request body it received.
    async fn one_shot_http(listener: TcpListener, status: &str, body: &str) -> String {
        let (mut tcp, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let (head_end, content_length) = loop {
            let n = tcp.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..pos]).to_ascii_lowercase();
                let length = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                break (pos + 4, length);
            }
        };
        while buf.len() < head_end + content_length {
            let n = tcp.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);
        }

        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        tcp.write_all(response.as_bytes()).await.unwrap();
        tcp.shutdown().await.ok();
        String::from_utf8_lossy(&buf[head_end..]).to_string()
    }

    #[tokio::test]
    async fn test_visual_analyze() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/analyze/visual", listener.local_addr().unwrap());
        let server = tokio::spawn(one_shot_http(
            listener,
            "200 OK",
            r#"{"visual_verdict":"strongly-positive","confidence":0.8}"#,
        ));

        let client = VisualAnalyzerClient::new(&url, Duration::from_secs(3));
        let verdict = client.analyze(&[0xff, 0xd8, 0xff]).await.unwrap();
        assert_eq!(verdict.source, Source::Video);
        assert_eq!(verdict.label, ReactionLabel::StronglyPositive);
        assert_eq!(verdict.confidence_pct, Some(80));

        let request: serde_json::Value = serde_json::from_str(&server.await.unwrap()).unwrap();
        assert_eq!(request["image_base64"], "/9j/");
    }

    #[tokio::test]
    async fn test_visual_error_status() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/analyze/visual", listener.local_addr().unwrap());
        tokio::spawn(one_shot_http(listener, "500 Internal Server Error", r#"{"detail":"boom"}"#));

        let client = VisualAnalyzerClient::new(&url, Duration::from_secs(3));
        assert!(matches!(
            client.analyze(b"jpeg").await,
            Err(AnalyzerError::Status { status: 500, .. })
        ));
    }
}
