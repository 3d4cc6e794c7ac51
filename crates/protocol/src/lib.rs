//! Inbound frame decoding.
//!
//! Frames arriving over the WebSocket carry no fixed schema: deployments send
//! plain text, bare JSON objects, or JSON objects with fragment metadata under
//! varying key names. A [`Fragment`] is the decoded view of one frame, built
//! by probing the object for the known optional fields below.

mod message;

use std::time::Instant;

use serde_json::{Map, Value};

pub use message::{LogicalMessage, MAX_LISTED_GAPS};

// ── Constants ────────────────────────────────────────────────────────────────

/// Identity key shared by all fragments that carry no identity of their own.
pub const IMPLICIT_SESSION: &str = "default";

/// Largest inbound frame accepted by the WebSocket reader.
pub const MAX_FRAME_BYTES: usize = 1_048_576; // 1 MB

// ── Field names ──────────────────────────────────────────────────────────────

/// Key names probed for each piece of fragment metadata, in priority order.
pub mod fields {
    pub const IDENTITY: &[&str] = &["id", "message_id", "session_id", "session"];
    pub const SEQUENCE: &[&str] = &["sequence", "seq", "index", "part", "chunk", "fragment"];
    pub const TOTAL: &[&str] = &["total", "total_fragments", "total_parts", "count"];
    pub const FINAL: &[&str] = &["final", "is_final", "last", "done"];
    pub const CONTENT: &[&str] = &["text", "content", "message", "data"];
    pub const TIMESTAMP: &str = "timestamp";
}

// ── Fragment ─────────────────────────────────────────────────────────────────

/// One decoded inbound frame.
#[derive(Debug, Clone)]
pub struct Fragment {
    /// Decoded frame. Non-JSON frames are kept as `Value::String`.
    pub raw: Value,
    /// Explicit identity token (`id`, `message_id`, ...). Numbers are
    /// rendered as decimal strings.
    pub identity: Option<String>,
    /// Position of this piece within its logical message.
    pub sequence: Option<u64>,
    /// Declared number of pieces. Zero is treated as unknown.
    pub total: Option<u64>,
    /// Explicit end-of-message marker. `Some(false)` still counts as a
    /// completion signal being present.
    pub is_final: Option<bool>,
    /// Text content used for reassembly and prompting.
    pub content: String,
    pub received_at: Instant,
    fragment_marker: bool,
}

impl Fragment {
    /// Decode a raw text frame. Never fails: anything that is not JSON is
    /// treated as a plain-text message.
    #[must_use]
    pub fn decode(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => Self::from_value(value),
            Err(_) => Self::plain(text),
        }
    }

    /// A plain-text frame with no metadata.
    #[must_use]
    pub fn plain(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            raw: Value::String(text.clone()),
            identity: None,
            sequence: None,
            total: None,
            is_final: None,
            content: text,
            received_at: Instant::now(),
            fragment_marker: false,
        }
    }

    /// Build a fragment from an already-decoded JSON value.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        let Value::Object(ref map) = value else {
            let content = match &value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return Self {
                raw: value,
                identity: None,
                sequence: None,
                total: None,
                is_final: None,
                content,
                received_at: Instant::now(),
                fragment_marker: false,
            };
        };

        let identity = probe(map, fields::IDENTITY, as_identity);
        let sequence = probe(map, fields::SEQUENCE, as_count);
        let total = probe(map, fields::TOTAL, as_count).filter(|t| *t > 0);
        let is_final = probe(map, fields::FINAL, as_flag);
        let has_timestamp = map.contains_key(fields::TIMESTAMP);

        let fragment_marker = has_any(map, fields::SEQUENCE)
            || has_any(map, fields::TOTAL)
            || has_any(map, fields::FINAL)
            || (has_timestamp && identity.is_some());

        let content = probe(map, fields::CONTENT, as_content).unwrap_or_else(|| value.to_string());

        Self {
            identity,
            sequence,
            total,
            is_final,
            content,
            received_at: Instant::now(),
            fragment_marker,
            raw: value,
        }
    }

    /// Override the arrival time (used when replaying frames).
    #[must_use]
    pub fn with_received_at(mut self, at: Instant) -> Self {
        self.received_at = at;
        self
    }

    /// Whether the frame carries any fragmentation metadata.
    #[must_use]
    pub fn is_fragment(&self) -> bool {
        self.fragment_marker
    }

    /// Whether the frame carries an explicit final-flag field at all.
    #[must_use]
    pub fn has_final_field(&self) -> bool {
        self.is_final.is_some()
    }

    /// The key this fragment is grouped under when reassembling.
    #[must_use]
    pub fn identity_key(&self) -> &str {
        self.identity.as_deref().unwrap_or(IMPLICIT_SESSION)
    }

    /// JSON object view of the frame, if it was an object.
    #[must_use]
    pub fn object(&self) -> Option<&Map<String, Value>> {
        self.raw.as_object()
    }
}

// ── Probing helpers ──────────────────────────────────────────────────────────

fn probe<T>(
    map: &Map<String, Value>,
    keys: &[&str],
    convert: impl Fn(&Value) -> Option<T>,
) -> Option<T> {
    keys.iter()
        .filter_map(|key| map.get(*key))
        .find_map(convert)
}

fn has_any(map: &Map<String, Value>, keys: &[&str]) -> bool {
    keys.iter().any(|key| map.contains_key(*key))
}

fn as_identity(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| *f >= 0.0 && f.fract() == 0.0 && *f <= u64::MAX as f64)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_u64().map(|n| n != 0),
        _ => None,
    }
}

fn as_content(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
