//! The session loop: transport → buffer → turn → transport.
//!
//! One inbound frame is fully routed (buffered, and if that completes a
//! message, processed and dispatched) before the next is read, so at most one
//! inference request is ever in flight.

use std::time::{Duration, Instant};

use {
    async_trait::async_trait,
    tether_agents::{ExchangeOutcome, ModelExchange, StructuredPayload, TurnProcessor},
    tether_channels::{Channel, Inbound},
    tether_protocol::{Fragment, LogicalMessage},
    tokio::time::MissedTickBehavior,
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

#[cfg(feature = "metrics")]
use tether_metrics::{counter, labels, transport as transport_metrics};

use crate::{
    buffer::{FragmentBuffer, FragmentOutcome},
    error::{Error, Result},
};

// ── Operator ────────────────────────────────────────────────────────────────

/// Decision returned by a human reviewer in manual mode.
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorDecision {
    /// Send this payload (the candidate, or a replacement).
    Approve(StructuredPayload),
    /// Send nothing for this message.
    Skip,
    /// End the session.
    Quit,
}

/// Reviews extracted payloads before they are sent.
#[async_trait]
pub trait Operator: Send {
    async fn review(
        &mut self,
        message: &LogicalMessage,
        candidate: &StructuredPayload,
    ) -> Result<OperatorDecision>;
}

// ── Configuration and state ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Send every extracted payload without review.
    Auto,
    /// Ask the operator before sending.
    Manual,
}

impl DispatchMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub mode: DispatchMode,
    /// How often idle buffered messages are checked for staleness.
    pub sweep_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: DispatchMode::Auto,
            sweep_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Ready,
    Processing,
    Closing,
}

/// Why a session ended without a transport error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CloseReason {
    #[default]
    PeerClosed,
    OperatorQuit,
    Shutdown,
}

impl CloseReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PeerClosed => "peer_closed",
            Self::OperatorQuit => "operator_quit",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Counters reported when a session ends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub close_reason: CloseReason,
    pub frames_received: u64,
    pub turns: u64,
    pub payloads_sent: u64,
    pub extraction_failures: u64,
    /// Includes timeouts.
    pub backend_failures: u64,
    pub timeouts: u64,
    pub operator_skips: u64,
    /// Partial messages dropped at shutdown.
    pub discarded_partials: u64,
}

/// Runtime clock, so staleness follows paused time in tests.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close(CloseReason),
}

// ── Loop ────────────────────────────────────────────────────────────────────

pub struct SessionLoop<C: Channel> {
    channel: C,
    buffer: FragmentBuffer,
    turns: TurnProcessor,
    operator: Option<Box<dyn Operator>>,
    config: SessionConfig,
    cancel: CancellationToken,
    state: SessionState,
    summary: SessionSummary,
}

impl<C: Channel> SessionLoop<C> {
    pub fn new(
        channel: C,
        buffer: FragmentBuffer,
        turns: TurnProcessor,
        config: SessionConfig,
    ) -> Self {
        Self {
            channel,
            buffer,
            turns,
            operator: None,
            config,
            cancel: CancellationToken::new(),
            state: SessionState::Connecting,
            summary: SessionSummary::default(),
        }
    }

    #[must_use]
    pub fn with_operator(mut self, operator: Box<dyn Operator>) -> Self {
        self.operator = Some(operator);
        self
    }

    /// Use an externally owned token so the caller can request shutdown.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn summary(&self) -> &SessionSummary {
        &self.summary
    }

    /// Give the channel back, e.g. to inspect it after the session ended.
    pub fn into_channel(self) -> C {
        self.channel
    }

    /// Run until the peer closes, the operator quits, or shutdown is
    /// requested. A transport failure ends the session with `Err`; buffered
    /// partial messages are discarded either way.
    pub async fn run(&mut self) -> Result<SessionSummary> {
        if self.config.mode == DispatchMode::Manual && self.operator.is_none() {
            return Err(Error::MissingOperator);
        }

        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        sweep.tick().await;

        info!(
            peer = %self.channel.peer(),
            mode = self.config.mode.as_str(),
            reconstruction = self.buffer.config().reconstruction,
            model = self.turns.backend().model(),
            "session ready"
        );

        let result = loop {
            self.state = SessionState::Ready;
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("shutdown requested");
                    break Ok(CloseReason::Shutdown);
                },
                inbound = self.channel.receive() => {
                    match inbound {
                        Ok(Inbound::Message(text)) => {
                            self.state = SessionState::Processing;
                            match self.handle_frame(&text).await {
                                Ok(Flow::Continue) => {},
                                Ok(Flow::Close(reason)) => break Ok(reason),
                                Err(e) => break Err(e),
                            }
                        },
                        Ok(Inbound::Closed) => {
                            info!(peer = %self.channel.peer(), "connection closed by peer");
                            break Ok(CloseReason::PeerClosed);
                        },
                        Err(e) => {
                            error!(peer = %self.channel.peer(), error = %e, "transport error");
                            break Err(Error::Channel(e));
                        },
                    }
                },
                _ = sweep.tick() => {
                    let expired = self.buffer.sweep_stale(now());
                    if !expired.is_empty() {
                        self.state = SessionState::Processing;
                        match self.run_turns(expired).await {
                            Ok(Flow::Continue) => {},
                            Ok(Flow::Close(reason)) => break Ok(reason),
                            Err(e) => break Err(e),
                        }
                    }
                },
            }
        };

        if let Ok(reason) = &result {
            self.summary.close_reason = *reason;
        }
        self.close().await;
        result.map(|_| self.summary.clone())
    }

    async fn close(&mut self) {
        self.state = SessionState::Closing;

        let discarded = self.buffer.clear();
        if discarded > 0 {
            warn!(count = discarded, "discarding partial messages");
        }
        self.summary.discarded_partials += discarded as u64;

        if let Err(e) = self.channel.close().await {
            debug!(error = %e, "error while closing channel");
        }

        let s = &self.summary;
        info!(
            reason = s.close_reason.as_str(),
            frames = s.frames_received,
            turns = s.turns,
            sent = s.payloads_sent,
            extraction_failures = s.extraction_failures,
            backend_failures = s.backend_failures,
            skipped = s.operator_skips,
            discarded = s.discarded_partials,
            "session closed"
        );
    }

    async fn handle_frame(&mut self, text: &str) -> Result<Flow> {
        self.summary.frames_received += 1;
        #[cfg(feature = "metrics")]
        counter!(transport_metrics::FRAMES_RECEIVED_TOTAL).increment(1);

        let fragment = Fragment::decode(text).with_received_at(now());
        debug!(
            identity = %fragment.identity_key(),
            fragment = fragment.is_fragment(),
            sequence = ?fragment.sequence,
            total = ?fragment.total,
            bytes = text.len(),
            "frame received"
        );

        let outcome = self.buffer.submit(fragment);

        // Messages that went stale before this frame completed first.
        let expired = self.buffer.take_expired();
        if let Flow::Close(reason) = self.run_turns(expired).await? {
            return Ok(Flow::Close(reason));
        }

        match outcome {
            FragmentOutcome::Pending => Ok(Flow::Continue),
            FragmentOutcome::Completed(message) | FragmentOutcome::Passthrough(message) => {
                self.run_turn(message).await
            },
        }
    }

    async fn run_turns(&mut self, messages: Vec<LogicalMessage>) -> Result<Flow> {
        for message in messages {
            if let Flow::Close(reason) = self.run_turn(message).await? {
                return Ok(Flow::Close(reason));
            }
        }
        Ok(Flow::Continue)
    }

    /// One inference turn and its single outcome record.
    async fn run_turn(&mut self, message: LogicalMessage) -> Result<Flow> {
        self.summary.turns += 1;

        let exchange = tokio::select! {
            exchange = self.turns.process(&message) => exchange,
            _ = self.cancel.cancelled() => {
                info!(identity = %message.identity, "shutdown requested during inference");
                return Ok(Flow::Close(CloseReason::Shutdown));
            },
        };

        match &exchange.outcome {
            ExchangeOutcome::Success(payload) => {
                let payload = payload.clone();
                self.dispatch(&message, &exchange, payload).await
            },
            ExchangeOutcome::ExtractionFailure(reason) => {
                self.summary.extraction_failures += 1;
                warn!(
                    identity = %message.identity,
                    reason = reason.reason(),
                    error = %reason,
                    elapsed_ms = exchange.elapsed.as_millis() as u64,
                    raw = exchange.raw_output.as_deref().unwrap_or_default(),
                    "no structured payload in model output"
                );
                Ok(Flow::Continue)
            },
            ExchangeOutcome::BackendFailure(e) => {
                self.summary.backend_failures += 1;
                error!(
                    identity = %message.identity,
                    error = %e,
                    elapsed_ms = exchange.elapsed.as_millis() as u64,
                    "inference failed"
                );
                Ok(Flow::Continue)
            },
            ExchangeOutcome::Timeout(after) => {
                self.summary.backend_failures += 1;
                self.summary.timeouts += 1;
                error!(
                    identity = %message.identity,
                    timeout_secs = after.as_secs_f64(),
                    "inference timed out"
                );
                Ok(Flow::Continue)
            },
        }
    }

    async fn dispatch(
        &mut self,
        message: &LogicalMessage,
        exchange: &ModelExchange,
        candidate: StructuredPayload,
    ) -> Result<Flow> {
        let payload = match self.config.mode {
            DispatchMode::Auto => candidate,
            DispatchMode::Manual => {
                let operator = self.operator.as_mut().ok_or(Error::MissingOperator)?;
                let decision = tokio::select! {
                    decision = operator.review(message, &candidate) => decision?,
                    _ = self.cancel.cancelled() => {
                        info!(identity = %message.identity, "shutdown requested during review");
                        return Ok(Flow::Close(CloseReason::Shutdown));
                    },
                };
                match decision {
                    OperatorDecision::Approve(payload) => payload,
                    OperatorDecision::Skip => {
                        self.summary.operator_skips += 1;
                        info!(identity = %message.identity, "operator skipped payload");
                        return Ok(Flow::Continue);
                    },
                    OperatorDecision::Quit => {
                        info!(identity = %message.identity, "operator ended the session");
                        return Ok(Flow::Close(CloseReason::OperatorQuit));
                    },
                }
            },
        };

        let text = serde_json::to_string(&payload)?;
        self.channel.send(text.clone()).await?;
        self.summary.payloads_sent += 1;
        #[cfg(feature = "metrics")]
        counter!(
            transport_metrics::PAYLOADS_SENT_TOTAL,
            labels::MODE => self.config.mode.as_str()
        )
        .increment(1);

        info!(
            identity = %message.identity,
            fragments = message.fragment_count(),
            partial = message.partial,
            elapsed_ms = exchange.elapsed.as_millis() as u64,
            payload = %text,
            "payload sent"
        );
        Ok(Flow::Continue)
    }
}
