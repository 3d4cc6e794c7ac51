use std::{future::Future, sync::Arc, time::Duration};

use {
    anyhow::{Context, Result},
    tether_agents::{CompletionOptions, InferenceBackend, TurnProcessor},
    tether_auto_reply::{
        BufferConfig, CloseReason, DispatchMode, FragmentBuffer, SessionConfig, SessionLoop,
        SessionSummary,
    },
    tether_channels::{Channel, WebSocketChannel},
    tether_config::TetherConfig,
    tether_providers::OllamaProvider,
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use crate::operator::StdinOperator;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Reconnect policy for the outer connection loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconnect {
    pub enabled: bool,
    pub max_backoff: Duration,
}

impl Reconnect {
    #[must_use]
    pub fn from_config(config: &TetherConfig) -> Self {
        Self {
            enabled: config.transport.reconnect,
            max_backoff: config.transport.max_backoff(),
        }
    }

    /// Delay before reconnect attempt `attempt` (zero-based): doubles from
    /// one second, capped at `max_backoff`.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        INITIAL_BACKOFF
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_backoff)
    }
}

/// Connect, run one session, and repeat per the reconnect policy until the
/// operator quits, shutdown is requested, or (without reconnect) the first
/// session ends. Returns the summary of every session that ran.
///
/// `build` turns a fresh connection into a session loop; cancellation is
/// wired in here.
pub async fn supervise<C, Connect, Fut, Build>(
    reconnect: Reconnect,
    cancel: CancellationToken,
    mut connect: Connect,
    mut build: Build,
) -> Result<Vec<SessionSummary>>
where
    C: Channel,
    Connect: FnMut() -> Fut,
    Fut: Future<Output = tether_channels::Result<C>>,
    Build: FnMut(C) -> SessionLoop<C>,
{
    let mut summaries = Vec::new();
    let mut attempt: u32 = 0;

    loop {
        let connected = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(summaries),
            result = connect() => result,
        };

        let failure = match connected {
            Ok(channel) => {
                attempt = 0;
                info!(peer = channel.peer(), "connected");
                let mut session = build(channel).with_cancellation(cancel.clone());
                match session.run().await {
                    Ok(summary) => {
                        let reason = summary.close_reason;
                        summaries.push(summary);
                        if reason != CloseReason::PeerClosed || !reconnect.enabled {
                            return Ok(summaries);
                        }
                        anyhow::anyhow!("peer closed the connection")
                    },
                    Err(e) => anyhow::Error::new(e).context("session failed"),
                }
            },
            Err(e) => anyhow::Error::new(e).context("connection failed"),
        };

        if !reconnect.enabled {
            return Err(failure);
        }

        let delay = reconnect.delay(attempt);
        attempt = attempt.saturating_add(1);
        let reason = format!("{failure:#}");
        warn!(
            error = %reason,
            attempt,
            delay_secs = delay.as_secs_f64(),
            "reconnecting"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(summaries),
            () = tokio::time::sleep(delay) => {},
        }
    }
}

/// `tether run` after config, logging and the Ollama probe are settled.
pub async fn run_agent(
    config: &TetherConfig,
    system_prompt: String,
    cancel: CancellationToken,
) -> Result<Vec<SessionSummary>> {
    let backend: Arc<dyn InferenceBackend> = Arc::new(
        OllamaProvider::from_config(&config.inference).context("building ollama client")?,
    );
    let options = CompletionOptions {
        temperature: config.inference.temperature,
        timeout: config.inference.timeout(),
    };
    let buffer_config = BufferConfig {
        reconstruction: config.agent.fragment_reconstruction,
        staleness_window: config.agent.staleness_window(),
    };
    let session_config = SessionConfig {
        mode: if config.agent.auto_mode {
            DispatchMode::Auto
        } else {
            DispatchMode::Manual
        },
        sweep_interval: config.agent.sweep_interval(),
    };

    let uri = config.transport.uri.clone();
    let connect_timeout = config.transport.connect_timeout();

    supervise(
        Reconnect::from_config(config),
        cancel,
        || {
            let uri = uri.clone();
            async move { WebSocketChannel::connect(&uri, connect_timeout).await }
        },
        |channel| {
            let turns = TurnProcessor::new(Arc::clone(&backend), system_prompt.as_str(), options);
            let session = SessionLoop::new(
                channel,
                FragmentBuffer::new(buffer_config),
                turns,
                session_config,
            );
            match session_config.mode {
                DispatchMode::Auto => session,
                DispatchMode::Manual => session.with_operator(Box::new(StdinOperator::stdin())),
            }
        },
    )
    .await
}

/// Print the per-session tallies to stderr.
pub fn print_summaries(summaries: &[SessionSummary]) {
    for (i, s) in summaries.iter().enumerate() {
        eprintln!(
            "session {}: {} | frames {} · turns {} · sent {} · extraction failures {} · \
             backend failures {} (timeouts {}) · skipped {} · discarded partials {}",
            i + 1,
            s.close_reason.as_str(),
            s.frames_received,
            s.turns,
            s.payloads_sent,
            s.extraction_failures,
            s.backend_failures,
            s.timeouts,
            s.operator_skips,
            s.discarded_partials,
        );
    }
}
