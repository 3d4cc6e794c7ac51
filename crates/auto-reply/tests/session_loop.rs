#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end session runs over an in-memory channel with scripted
//! inference backends and operators.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    async_trait::async_trait,
    serde_json::{Value, json},
    tether_agents::{
        CompletionOptions, InferenceBackend, InferenceError, Prompt, StructuredPayload,
        TurnProcessor,
    },
    tether_auto_reply::{
        BufferConfig, CloseReason, DispatchMode, Error, FragmentBuffer, Operator, OperatorDecision,
        SessionConfig, SessionLoop, SessionSummary,
    },
    tether_channels::{MemoryChannel, MemoryPeer},
    tether_protocol::LogicalMessage,
    tokio_util::sync::CancellationToken,
};

// ── Scripted collaborators ──────────────────────────────────────────────────

enum Reply {
    /// Answer `{"echo": <prompt content>}` wrapped in prose.
    Echo,
    Text(&'static str),
    Fail,
    Hang,
}

#[derive(Default)]
struct ScriptedBackend {
    replies: Mutex<VecDeque<Reply>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    fn new(replies: impl IntoIterator<Item = Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn complete(
        &self,
        prompt: &Prompt,
        _options: &CompletionOptions,
    ) -> Result<String, InferenceError> {
        self.prompts.lock().unwrap().push(prompt.user.clone());
        let reply = self.replies.lock().unwrap().pop_front().unwrap_or(Reply::Echo);
        match reply {
            Reply::Echo => Ok(format!(
                "Here you go: {} Anything else?",
                json!({ "echo": prompt.user })
            )),
            Reply::Text(text) => Ok(text.to_string()),
            Reply::Fail => Err(InferenceError::Transport("connection refused".into())),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok("{}".into())
            },
        }
    }
}

#[derive(Clone, Default)]
struct ScriptedOperator {
    decisions: Arc<Mutex<VecDeque<OperatorDecision>>>,
    reviewed: Arc<Mutex<Vec<(String, Value)>>>,
}

impl ScriptedOperator {
    fn new(decisions: impl IntoIterator<Item = OperatorDecision>) -> Self {
        Self {
            decisions: Arc::new(Mutex::new(decisions.into_iter().collect())),
            reviewed: Arc::default(),
        }
    }
}

#[async_trait]
impl Operator for ScriptedOperator {
    async fn review(
        &mut self,
        message: &LogicalMessage,
        candidate: &StructuredPayload,
    ) -> tether_auto_reply::Result<OperatorDecision> {
        self.reviewed
            .lock()
            .unwrap()
            .push((message.content(), Value::Object(candidate.clone())));
        Ok(self
            .decisions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(OperatorDecision::Quit))
    }
}

// ── Harness ─────────────────────────────────────────────────────────────────

fn session(
    backend: Arc<ScriptedBackend>,
    mode: DispatchMode,
    reconstruction: bool,
) -> (SessionLoop<MemoryChannel>, MemoryPeer) {
    let (channel, peer) = MemoryChannel::pair("memory://test");
    let turns = TurnProcessor::new(backend, "Reply with one JSON object.", CompletionOptions {
        temperature: 0.7,
        timeout: Duration::from_secs(5),
    });
    let buffer = FragmentBuffer::new(BufferConfig {
        reconstruction,
        staleness_window: Duration::from_secs(30),
    });
    let config = SessionConfig {
        mode,
        sweep_interval: Duration::from_secs(1),
    };
    (SessionLoop::new(channel, buffer, turns, config), peer)
}

fn sent_json(peer: &mut MemoryPeer) -> Vec<Value> {
    peer.drain_sent()
        .iter()
        .map(|frame| serde_json::from_str(frame).unwrap())
        .collect()
}

fn payload(value: Value) -> StructuredPayload {
    value.as_object().cloned().unwrap()
}

// ── Automatic mode ──────────────────────────────────────────────────────────

#[tokio::test]
async fn fragments_are_reassembled_and_answered_once() {
    let backend = ScriptedBackend::new([]);
    let (mut session, mut peer) = session(backend.clone(), DispatchMode::Auto, true);

    peer.push(r#"{"id":1,"seq":1,"total":2,"text":"world"}"#);
    peer.push(r#"{"id":1,"seq":0,"total":2,"text":"Hello "}"#);
    peer.hang_up();

    let summary = session.run().await.unwrap();

    assert_eq!(backend.prompts(), vec!["Hello world"]);
    assert_eq!(sent_json(&mut peer), vec![json!({"echo": "Hello world"})]);
    assert_eq!(summary, SessionSummary {
        frames_received: 2,
        turns: 1,
        payloads_sent: 1,
        ..SessionSummary::default()
    });
}

#[tokio::test]
async fn whole_messages_each_get_a_turn() {
    let backend = ScriptedBackend::new([]);
    let (mut session, mut peer) = session(backend.clone(), DispatchMode::Auto, true);

    peer.push("look around");
    peer.push(r#"{"message":"open the door"}"#);
    peer.hang_up();

    let summary = session.run().await.unwrap();

    assert_eq!(backend.prompts(), vec!["look around", "open the door"]);
    assert_eq!(sent_json(&mut peer), vec![
        json!({"echo": "look around"}),
        json!({"echo": "open the door"}),
    ]);
    assert_eq!(summary.payloads_sent, 2);
}

#[tokio::test]
async fn reconstruction_disabled_sends_one_reply_per_frame() {
    let backend = ScriptedBackend::new([]);
    let (mut session, mut peer) = session(backend.clone(), DispatchMode::Auto, false);

    peer.push(r#"{"id":1,"seq":0,"total":2,"text":"Hello "}"#);
    peer.push(r#"{"id":1,"seq":1,"total":2,"text":"world"}"#);
    peer.hang_up();

    let summary = session.run().await.unwrap();

    assert_eq!(backend.prompts(), vec!["Hello ", "world"]);
    assert_eq!(summary.turns, 2);
    assert_eq!(summary.payloads_sent, 2);
}

#[tokio::test]
async fn extraction_failure_sends_nothing_and_continues() {
    let backend = ScriptedBackend::new([Reply::Text("I cannot decide."), Reply::Echo]);
    let (mut session, mut peer) = session(backend, DispatchMode::Auto, true);

    peer.push("first");
    peer.push("second");
    peer.hang_up();

    let summary = session.run().await.unwrap();

    assert_eq!(sent_json(&mut peer), vec![json!({"echo": "second"})]);
    assert_eq!(summary.extraction_failures, 1);
    assert_eq!(summary.turns, 2);
    assert_eq!(summary.payloads_sent, 1);
}

#[tokio::test]
async fn backend_failure_sends_nothing_and_continues() {
    let backend = ScriptedBackend::new([Reply::Fail]);
    let (mut session, mut peer) = session(backend, DispatchMode::Auto, true);

    peer.push("first");
    peer.push("second");
    peer.hang_up();

    let summary = session.run().await.unwrap();

    assert_eq!(sent_json(&mut peer), vec![json!({"echo": "second"})]);
    assert_eq!(summary.backend_failures, 1);
    assert_eq!(summary.timeouts, 0);
}

#[tokio::test(start_paused = true)]
async fn inference_timeout_sends_nothing_and_continues() {
    let backend = ScriptedBackend::new([Reply::Hang]);
    let (mut session, mut peer) = session(backend.clone(), DispatchMode::Auto, true);

    peer.push("slow question");
    peer.push("fast question");
    peer.hang_up();

    let summary = session.run().await.unwrap();

    assert_eq!(sent_json(&mut peer), vec![json!({"echo": "fast question"})]);
    assert_eq!(summary.timeouts, 1);
    assert_eq!(summary.backend_failures, 1);
    assert_eq!(backend.prompts().len(), 2);
}

#[tokio::test]
async fn close_discards_partial_messages() {
    let backend = ScriptedBackend::new([]);
    let (mut session, mut peer) = session(backend.clone(), DispatchMode::Auto, true);

    peer.push(r#"{"id":"a","seq":0,"total":3,"text":"never "}"#);
    peer.push(r#"{"id":"a","seq":1,"total":3,"text":"finished"}"#);
    peer.hang_up();

    let summary = session.run().await.unwrap();

    assert!(backend.prompts().is_empty());
    assert!(peer.drain_sent().is_empty());
    assert_eq!(summary.discarded_partials, 1);
    assert_eq!(summary.turns, 0);
}

#[tokio::test(start_paused = true)]
async fn stale_message_is_answered_by_the_sweep() {
    let backend = ScriptedBackend::new([]);
    let (session, mut peer) = session(backend.clone(), DispatchMode::Auto, true);
    let cancel = CancellationToken::new();
    let mut session = session.with_cancellation(cancel.clone());

    peer.push(r#"{"id":9,"seq":0,"total":3,"text":"only this "}"#);
    peer.push(r#"{"id":9,"seq":1,"total":3,"text":"arrived"}"#);

    let handle = tokio::spawn(async move { session.run().await });

    // Paused time auto-advances through sweep ticks until the window lapses.
    let sent = peer.next_sent().await.unwrap();
    assert_eq!(
        serde_json::from_str::<Value>(&sent).unwrap(),
        json!({"echo": "only this arrived"})
    );

    // A late piece starts a new message instead of joining the evicted one.
    peer.push(r#"{"id":9,"seq":2,"total":3,"text":"late"}"#);
    let sent = peer.next_sent().await.unwrap();
    assert_eq!(
        serde_json::from_str::<Value>(&sent).unwrap(),
        json!({"echo": "late"})
    );

    cancel.cancel();
    let summary = handle.await.unwrap().unwrap();
    assert_eq!(summary.close_reason, CloseReason::Shutdown);
    assert_eq!(summary.turns, 2);
    assert_eq!(summary.discarded_partials, 0);
    assert_eq!(backend.prompts(), vec!["only this arrived", "late"]);
}

#[tokio::test]
async fn cancellation_ends_an_idle_session() {
    let backend = ScriptedBackend::new([]);
    let (session, _peer) = session(backend, DispatchMode::Auto, true);
    let cancel = CancellationToken::new();
    let mut session = session.with_cancellation(cancel.clone());

    cancel.cancel();
    let summary = session.run().await.unwrap();
    assert_eq!(summary, SessionSummary {
        close_reason: CloseReason::Shutdown,
        ..SessionSummary::default()
    });
}

// ── Manual mode ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn manual_mode_requires_an_operator() {
    let backend = ScriptedBackend::new([]);
    let (mut session, _peer) = session(backend, DispatchMode::Manual, true);
    assert!(matches!(session.run().await, Err(Error::MissingOperator)));
}

#[tokio::test]
async fn operator_approves_overrides_and_skips() {
    let backend = ScriptedBackend::new([]);
    let operator = ScriptedOperator::new([
        OperatorDecision::Approve(payload(json!({"echo": "one"}))),
        OperatorDecision::Approve(payload(json!({"action": "override"}))),
        OperatorDecision::Skip,
    ]);
    let (session, mut peer) = session(backend, DispatchMode::Manual, true);
    let mut session = session.with_operator(Box::new(operator.clone()));

    peer.push("one");
    peer.push("two");
    peer.push("three");
    peer.hang_up();

    let summary = session.run().await.unwrap();

    assert_eq!(sent_json(&mut peer), vec![
        json!({"echo": "one"}),
        json!({"action": "override"}),
    ]);
    assert_eq!(summary.operator_skips, 1);
    assert_eq!(summary.payloads_sent, 2);

    let reviewed = operator.reviewed.lock().unwrap();
    assert_eq!(reviewed.len(), 3);
    assert_eq!(reviewed[1], ("two".to_string(), json!({"echo": "two"})));
}

#[tokio::test]
async fn operator_quit_closes_the_session() {
    let backend = ScriptedBackend::new([]);
    let operator = ScriptedOperator::new([OperatorDecision::Quit]);
    let (session, mut peer) = session(backend.clone(), DispatchMode::Manual, true);
    let mut session = session.with_operator(Box::new(operator));

    peer.push("first");
    peer.push("never processed");

    let summary = session.run().await.unwrap();

    assert!(peer.drain_sent().is_empty());
    assert_eq!(backend.prompts(), vec!["first"]);
    assert_eq!(summary.close_reason, CloseReason::OperatorQuit);
    assert_eq!(summary.frames_received, 1);
    // The session closed its end; further frames are refused.
    assert!(!peer.push("after quit"));
}

#[tokio::test]
async fn operator_is_not_consulted_on_failed_extraction() {
    let backend = ScriptedBackend::new([Reply::Text("no json here")]);
    let operator = ScriptedOperator::new([]);
    let (session, mut peer) = session(backend, DispatchMode::Manual, true);
    let mut session = session.with_operator(Box::new(operator.clone()));

    peer.push("hello");
    peer.hang_up();

    let summary = session.run().await.unwrap();
    assert!(operator.reviewed.lock().unwrap().is_empty());
    assert_eq!(summary.extraction_failures, 1);
    assert!(peer.drain_sent().is_empty());
}
