//! One inference round-trip per logical message.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use {tether_protocol::LogicalMessage, tracing::debug};

#[cfg(feature = "metrics")]
use tether_metrics::{counter, histogram, labels, turns as turn_metrics};

use crate::{
    extract::{ExtractError, StructuredPayload, extract},
    model::{CompletionOptions, InferenceBackend, InferenceError, Prompt},
};

/// How a model exchange ended.
#[derive(Debug, Clone)]
pub enum ExchangeOutcome {
    /// A JSON object was extracted from the reply.
    Success(StructuredPayload),
    /// The backend answered, but no payload could be extracted.
    ExtractionFailure(ExtractError),
    /// The backend failed to answer.
    BackendFailure(InferenceError),
    /// The backend did not answer within the configured deadline.
    Timeout(Duration),
}

impl ExchangeOutcome {
    /// Stable label used in logs and metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::ExtractionFailure(_) => "extraction_failure",
            Self::BackendFailure(_) => "backend_failure",
            Self::Timeout(_) => "timeout",
        }
    }

    /// Timeouts count as backend failures for the session loop.
    #[must_use]
    pub fn is_backend_failure(&self) -> bool {
        matches!(self, Self::BackendFailure(_) | Self::Timeout(_))
    }

    #[must_use]
    pub fn payload(&self) -> Option<&StructuredPayload> {
        match self {
            Self::Success(payload) => Some(payload),
            _ => None,
        }
    }
}

/// Record of one request/response round-trip.
#[derive(Debug, Clone)]
pub struct ModelExchange {
    /// Identity of the logical message that triggered the turn.
    pub identity: String,
    /// Rendered request text (system prompt + message content).
    pub input: String,
    /// Unmodified model reply, when the backend answered.
    pub raw_output: Option<String>,
    pub outcome: ExchangeOutcome,
    pub elapsed: Duration,
}

impl ModelExchange {
    #[must_use]
    pub fn payload(&self) -> Option<&StructuredPayload> {
        self.outcome.payload()
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ExchangeOutcome::Success(_))
    }
}

/// Drives the inference backend for completed logical messages.
///
/// Holds no per-message state: every call to [`TurnProcessor::process`]
/// issues exactly one request and awaits it in line. Nothing is retried.
pub struct TurnProcessor {
    backend: Arc<dyn InferenceBackend>,
    system_prompt: String,
    options: CompletionOptions,
}

impl TurnProcessor {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        system_prompt: impl Into<String>,
        options: CompletionOptions,
    ) -> Self {
        Self {
            backend,
            system_prompt: system_prompt.into(),
            options,
        }
    }

    #[must_use]
    pub fn backend(&self) -> &dyn InferenceBackend {
        self.backend.as_ref()
    }

    #[must_use]
    pub fn options(&self) -> &CompletionOptions {
        &self.options
    }

    pub async fn process(&self, message: &LogicalMessage) -> ModelExchange {
        let prompt = Prompt::new(self.system_prompt.as_str(), message.content());
        let input = prompt.render();

        debug!(
            identity = %message.identity,
            provider = self.backend.name(),
            model = self.backend.model(),
            fragments = message.fragment_count(),
            partial = message.partial,
            prompt_chars = input.len(),
            "sending inference request"
        );

        let started = Instant::now();
        let reply = match tokio::time::timeout(
            self.options.timeout,
            self.backend.complete(&prompt, &self.options),
        )
        .await
        {
            Ok(reply) => reply,
            Err(_) => Err(InferenceError::Timeout(self.options.timeout)),
        };
        let elapsed = started.elapsed();

        #[cfg(feature = "metrics")]
        histogram!(turn_metrics::INFERENCE_DURATION_SECONDS).record(elapsed.as_secs_f64());

        let (raw_output, outcome) = match reply {
            Ok(raw) => {
                let outcome = match extract(&raw) {
                    Ok(payload) => ExchangeOutcome::Success(payload),
                    Err(e) => ExchangeOutcome::ExtractionFailure(e),
                };
                (Some(raw), outcome)
            },
            Err(InferenceError::Timeout(after)) => (None, ExchangeOutcome::Timeout(after)),
            Err(e) => (None, ExchangeOutcome::BackendFailure(e)),
        };

        #[cfg(feature = "metrics")]
        counter!(turn_metrics::TURNS_TOTAL, labels::OUTCOME => outcome.label()).increment(1);

        debug!(
            identity = %message.identity,
            outcome = outcome.label(),
            elapsed_ms = elapsed.as_millis() as u64,
            "inference turn finished"
        );

        ModelExchange {
            identity: message.identity.clone(),
            input,
            raw_output,
            outcome,
            elapsed,
        }
    }
}
