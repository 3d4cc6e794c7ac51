use std::time::Duration;

use async_trait::async_trait;

// ── Prompt ──────────────────────────────────────────────────────────────────

/// One inference request: the fixed instruction preamble plus the content of
/// a single logical message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }

    /// Single-string rendering for backends without a separate system slot,
    /// and for the exchange log.
    #[must_use]
    pub fn render(&self) -> String {
        if self.system.is_empty() {
            return self.user.clone();
        }
        format!("{}\n\n{}", self.system, self.user)
    }
}

// ── Options ─────────────────────────────────────────────────────────────────

/// Sampling and deadline settings for one completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionOptions {
    /// Sampling temperature in `0.0..=1.0`.
    pub temperature: f32,
    /// Deadline for the whole round-trip.
    pub timeout: Duration,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            timeout: Duration::from_secs(60),
        }
    }
}

// ── Errors ──────────────────────────────────────────────────────────────────

/// Failure reported by an inference backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InferenceError {
    /// The backend did not answer within the deadline.
    #[error("inference timed out after {0:?}")]
    Timeout(Duration),

    /// The backend answered with an error status.
    #[error("inference backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Connection or protocol failure talking to the backend.
    #[error("inference request failed: {0}")]
    Transport(String),

    /// The backend answered but the body could not be decoded.
    #[error("inference response could not be decoded: {0}")]
    Decode(String),
}

impl InferenceError {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

// ── Backend contract ────────────────────────────────────────────────────────

/// An inference service: prompt in, unstructured text out.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Provider name used in logs (e.g. "ollama").
    fn name(&self) -> &str;

    /// Model identifier (e.g. "llama3.1:8b").
    fn model(&self) -> &str;

    async fn complete(
        &self,
        prompt: &Prompt,
        options: &CompletionOptions,
    ) -> Result<String, InferenceError>;
}
