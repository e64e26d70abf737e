//! Client for the joke generation service

use crate::context::ContextSnapshot;
use crate::events::SyntheticSignal;
use crate::verdict::ErrorEnvelope;
use async_trait::async_trait;
use base64::engine::general_purpose;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Body of a generation request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub joke_id: u64,
    #[serde(flatten)]
    pub body: RequestBody,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RequestBody {
    /// Full history digest
    Context { context: Box<ContextSnapshot> },
    /// Synthetic signal fields inlined next to `joke_id`
    Signal(SyntheticSignal),
}

impl GenerationRequest {
    pub fn with_context(joke_id: u64, context: ContextSnapshot) -> Self {
        Self {
            joke_id,
            body: RequestBody::Context {
                context: Box::new(context),
            },
        }
    }

    pub fn with_signal(joke_id: u64, signal: SyntheticSignal) -> Self {
        Self {
            joke_id,
            body: RequestBody::Signal(signal),
        }
    }

    pub fn context(&self) -> Option<&ContextSnapshot> {
        match &self.body {
            RequestBody::Context { context } => Some(context),
            RequestBody::Signal(_) => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct GenerationResponseWire {
    joke_id: u64,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    audio_base64: Option<String>,
}

/// A decoded generation response
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedTurn {
    pub joke_id: u64,
    pub text: Option<String>,
    /// Raw PCM16 mono at the service's output rate
    pub audio: Option<Vec<u8>>,
}

/// Error type for generation service calls
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid audio payload: {0}")]
    Audio(#[from] base64::DecodeError),

    #[error("Service returned {status}: {code}: {message}")]
    Service {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Service returned {status}: {body}")]
    Status { status: u16, body: String },
}

pub type Result<T> = std::result::Result<T, GenerationError>;

/// The remote side of a turn
#[async_trait]
pub trait Generator: Send + Sync {
    /// Ask for the next turn.
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedTurn>;

    /// Clear any conversational state the service keeps.
    async fn reset(&self) -> Result<()>;
}

/// `Generator` over the service's HTTP API
pub struct HttpGenerator {
    base_url: String,
    client: reqwest::Client,
}

impl HttpGenerator {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn generate_url(&self) -> String {
        format!("{}/generate?include_audio=true", self.base_url)
    }

    pub fn reset_url(&self) -> String {
        format!("{}/reset", self.base_url)
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedTurn> {
        debug!("Requesting joke {}", request.joke_id);
        let res = self
            .client
            .post(self.generate_url())
            .json(request)
            .send()
            .await?;

        let status = res.status();
        let body = res.text().await?;
        if !status.is_success() {
            return Err(status_error(status.as_u16(), body));
        }
        decode_response(&body)
    }

    async fn reset(&self) -> Result<()> {
        let res = self.client.post(self.reset_url()).send().await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(status_error(status.as_u16(), body));
        }
        Ok(())
    }
}

/// Decode a successful response body.
pub fn decode_response(body: &str) -> Result<GeneratedTurn> {
    let wire: GenerationResponseWire = serde_json::from_str(body)?;
    let audio = match wire.audio_base64.as_deref() {
        Some(b64) if !b64.is_empty() => Some(general_purpose::STANDARD.decode(b64)?),
        _ => None,
    };
    Ok(GeneratedTurn {
        joke_id: wire.joke_id,
        text: wire.text.filter(|t| !t.trim().is_empty()),
        audio,
    })
}

fn status_error(status: u16, body: String) -> GenerationError {
    match serde_json::from_str::<ErrorEnvelope>(&body) {
        Ok(envelope) => GenerationError::Service {
            status,
            code: envelope.error.code,
            message: envelope.error.message,
        },
        Err(_) => GenerationError::Status { status, body },
    }
}
