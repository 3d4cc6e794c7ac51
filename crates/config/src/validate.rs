//! Configuration validation engine.
//!
//! Two passes: [`validate_toml_str`] checks a config file for syntax errors,
//! unknown or misspelled fields and type errors; [`validate_config`] checks
//! the effective config (after env overrides) for values the session loop
//! cannot run with.

use std::{collections::HashMap, path::Path};

use crate::schema::TetherConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "missing",
    /// "range", "file-ref"
    pub category: &'static str,
    /// Dotted path, e.g. "inference.temperature"
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn new(
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<std::path::PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    /// Append another result's diagnostics, keeping the first config path.
    pub fn merge(&mut self, other: ValidationResult) {
        self.diagnostics.extend(other.diagnostics);
        if self.config_path.is_none() {
            self.config_path = other.config_path;
        }
    }
}

// ── Schema tree for unknown-field detection ─────────────────────────────────

/// Represents the expected shape of the configuration schema.
enum KnownKeys {
    /// A table with fixed field names.
    Struct(HashMap<&'static str, KnownKeys>),
    /// Scalar value, stop recursing.
    Leaf,
}

/// Build the schema map mirroring every field in `schema.rs`.
fn build_schema_map() -> KnownKeys {
    use KnownKeys::{Leaf, Struct};

    let table = |keys: &[&'static str]| Struct(keys.iter().map(|k| (*k, Leaf)).collect());

    Struct(HashMap::from([
        (
            "transport",
            table(&["uri", "connect_timeout_secs", "reconnect", "max_backoff_secs"]),
        ),
        (
            "inference",
            table(&["model", "api_url", "timeout_secs", "temperature"]),
        ),
        ("prompt", table(&["system_prompt", "system_prompt_file"])),
        (
            "agent",
            table(&[
                "auto_mode",
                "fragment_reconstruction",
                "staleness_window_secs",
                "sweep_interval_secs",
            ]),
        ),
        ("logging", table(&["level", "file", "console", "json"])),
    ]))
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b_len = b.chars().count();
    if a.is_empty() {
        return b_len;
    }
    if b_len == 0 {
        return a.chars().count();
    }

    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0; b_len + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.chars().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_len]
}

/// Closest candidate within `max_distance` edits, if any.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    let mut best: Option<(&'a str, usize)> = None;
    for &candidate in candidates {
        let d = levenshtein(needle, candidate);
        if d > 0 && d <= max_distance && best.as_ref().is_none_or(|(_, bd)| d < *bd) {
            best = Some((candidate, d));
        }
    }
    best.map(|(s, _)| s)
}

// ── File validation ─────────────────────────────────────────────────────────

/// Validate a config file at the given path, or discover the default config
/// file location if `path` is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => crate::loader::find_config_file(),
    };

    let Some(ref actual_path) = config_path else {
        return ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Info,
                "file-ref",
                "",
                "no config file found; using defaults and environment",
            )],
            config_path: None,
        };
    };

    let is_toml = actual_path
        .extension()
        .and_then(|e| e.to_str())
        .is_none_or(|ext| ext == "toml");

    match std::fs::read_to_string(actual_path) {
        Ok(content) if is_toml => {
            let mut result = validate_toml_str(&content);
            result.config_path = Some(actual_path.clone());
            result
        },
        Ok(_) => ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Info,
                "file-ref",
                "",
                "field checks only run on TOML files",
            )],
            config_path: Some(actual_path.clone()),
        },
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                format!("failed to read config file: {e}"),
            )],
            config_path: Some(actual_path.clone()),
        },
    }
}

/// Validate a TOML string without file-system side effects.
#[must_use]
pub fn validate_toml_str(toml_str: &str) -> ValidationResult {
    let mut diagnostics = Vec::new();

    let toml_value: toml::Value = match toml::from_str(toml_str) {
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                format!("TOML syntax error: {e}"),
            ));
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    let schema = build_schema_map();
    check_unknown_fields(&toml_value, &schema, "", &mut diagnostics);

    if let Err(e) = toml::from_str::<TetherConfig>(toml_str) {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "type-error",
            "",
            format!("type error: {e}"),
        ));
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

/// Walk the TOML value tree against the schema tree and flag unknown keys.
fn check_unknown_fields(
    value: &toml::Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let (toml::Value::Table(table), KnownKeys::Struct(fields)) = (value, schema) else {
        return;
    };

    let known_keys: Vec<&str> = fields.keys().copied().collect();
    for (key, child_value) in table {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        if let Some(child_schema) = fields.get(key.as_str()) {
            check_unknown_fields(child_value, child_schema, &path, diagnostics);
            continue;
        }
        let level = if prefix.is_empty() {
            "at top level "
        } else {
            ""
        };
        let msg = match suggest(key, &known_keys, 3) {
            Some(s) => format!("unknown field {level}(did you mean \"{s}\"?)"),
            None => format!("unknown field {level}"),
        };
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "unknown-field",
            path,
            msg.trim(),
        ));
    }
}

// ── Effective config validation ─────────────────────────────────────────────

/// Check the effective configuration for values the agent cannot run with.
#[must_use]
pub fn validate_config(config: &TetherConfig) -> ValidationResult {
    let mut diagnostics = Vec::new();

    let uri = config.transport.uri.trim();
    if uri.is_empty() {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "missing",
            "transport.uri",
            "WebSocket URI is required (set transport.uri or WEBSOCKET_URI)",
        ));
    } else {
        match url::Url::parse(uri) {
            Ok(parsed) if matches!(parsed.scheme(), "ws" | "wss") => {},
            Ok(parsed) => diagnostics.push(Diagnostic::new(
                Severity::Error,
                "range",
                "transport.uri",
                format!("expected a ws:// or wss:// URI, got scheme \"{}\"", parsed.scheme()),
            )),
            Err(e) => diagnostics.push(Diagnostic::new(
                Severity::Error,
                "syntax",
                "transport.uri",
                format!("invalid URI: {e}"),
            )),
        }
    }

    if let Err(e) = url::Url::parse(config.inference.api_url.trim()) {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "syntax",
            "inference.api_url",
            format!("invalid URL: {e}"),
        ));
    }

    if config.inference.model.trim().is_empty() {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "missing",
            "inference.model",
            "model name is required",
        ));
    }

    let temperature = config.inference.temperature;
    if !(0.0..=1.0).contains(&temperature) {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "range",
            "inference.temperature",
            format!("temperature must be between 0.0 and 1.0, got {temperature}"),
        ));
    }

    for (path, value) in [
        ("inference.timeout_secs", config.inference.timeout_secs),
        (
            "transport.connect_timeout_secs",
            config.transport.connect_timeout_secs,
        ),
        (
            "agent.staleness_window_secs",
            config.agent.staleness_window_secs,
        ),
    ] {
        if value == 0 {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "range",
                path,
                "must be greater than zero",
            ));
        }
    }

    let prompt = &config.prompt;
    if !prompt.is_configured() {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "missing",
            "prompt",
            "either prompt.system_prompt or prompt.system_prompt_file must be set \
             (or SYSTEM_PROMPT / SYSTEM_PROMPT_FILE)",
        ));
    } else if prompt.inline().is_some() && prompt.system_prompt_file.is_some() {
        diagnostics.push(Diagnostic::new(
            Severity::Info,
            "file-ref",
            "prompt.system_prompt_file",
            "inline system_prompt is set; the prompt file is ignored",
        ));
    } else if let Some(path) = prompt.system_prompt_file.as_ref()
        && prompt.inline().is_none()
        && !path.exists()
    {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "file-ref",
            "prompt.system_prompt_file",
            format!("system prompt file not found: {}", path.display()),
        ));
    }

    if !config.logging.console && config.logging.file.is_none() {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "range",
            "logging",
            "console and file logging are both disabled; turn outcomes will not be visible",
        ));
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}
