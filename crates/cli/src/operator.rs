//! Manual-mode reviewer that reads decisions from a line-oriented input.

use {
    async_trait::async_trait,
    serde_json::Value,
    tether_agents::StructuredPayload,
    tether_auto_reply::{Error, Operator, OperatorDecision, Result},
    tether_protocol::LogicalMessage,
    tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin},
    tracing::warn,
};

/// Interpret one line of operator input for the given candidate payload.
///
/// An empty line approves the candidate as-is; `skip` drops it; `quit` or
/// `exit` ends the session. Anything else must be a JSON object, which
/// replaces the candidate. Other input is logged and treated as a skip.
#[must_use]
pub fn parse_decision(line: &str, candidate: &StructuredPayload) -> OperatorDecision {
    let line = line.trim();
    if line.is_empty() {
        return OperatorDecision::Approve(candidate.clone());
    }
    match line.to_ascii_lowercase().as_str() {
        "skip" | "s" => return OperatorDecision::Skip,
        "quit" | "exit" | "q" => return OperatorDecision::Quit,
        _ => {},
    }
    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(replacement)) => OperatorDecision::Approve(replacement),
        Ok(other) => {
            warn!(kind = json_kind(&other), "override must be a JSON object; skipping");
            OperatorDecision::Skip
        },
        Err(e) => {
            warn!(error = %e, "override is not valid JSON; skipping");
            OperatorDecision::Skip
        },
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Prints each candidate to stdout and waits for one line of input.
pub struct LineOperator<R> {
    lines: Lines<R>,
}

pub type StdinOperator = LineOperator<BufReader<Stdin>>;

impl StdinOperator {
    #[must_use]
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl<R: AsyncBufRead + Unpin> LineOperator<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> Operator for LineOperator<R> {
    async fn review(
        &mut self,
        message: &LogicalMessage,
        candidate: &StructuredPayload,
    ) -> Result<OperatorDecision> {
        let pretty = serde_json::to_string_pretty(candidate)?;
        println!();
        println!("── message {} ({} fragment(s)) ──", message.identity, message.fragment_count());
        if message.partial {
            println!("(partial: {} missing, first {:?})", message.missing, message.gaps);
        }
        println!("{}", message.content());
        println!("── candidate reply ──");
        println!("{pretty}");
        println!("[Enter] send · skip · quit · or paste a JSON object to send instead");

        match self.lines.next_line().await {
            Ok(Some(line)) => Ok(parse_decision(&line, candidate)),
            // End of input: nobody is left to approve anything.
            Ok(None) => Ok(OperatorDecision::Quit),
            Err(e) => Err(Error::operator(e)),
        }
    }
}
