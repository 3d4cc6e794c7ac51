/// Config schema types (transport, inference, prompt, agent, logging).
use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    pub transport: TransportConfig,
    pub inference: InferenceConfig,
    pub prompt: PromptConfig,
    pub agent: AgentConfig,
    pub logging: LoggingConfig,
}

/// WebSocket endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// `ws://` or `wss://` URI to connect to. Required.
    pub uri: String,
    /// Upper bound on the WebSocket opening handshake. Defaults to 30.
    pub connect_timeout_secs: u64,
    /// Reconnect with exponential backoff after the connection drops.
    pub reconnect: bool,
    /// Cap for the reconnect backoff delay. Defaults to 5.
    pub max_backoff_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            uri: String::new(),
            connect_timeout_secs: 30,
            reconnect: false,
            max_backoff_secs: 5,
        }
    }
}

impl TransportConfig {
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    #[must_use]
    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs.max(1))
    }
}

/// Ollama inference settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Model tag as reported by `ollama list`, e.g. "llama3.1:8b".
    pub model: String,
    /// Full generate endpoint, e.g. `http://localhost:11434/api/generate`.
    pub api_url: String,
    /// Per-request timeout. Defaults to 60.
    pub timeout_secs: u64,
    /// Sampling temperature in `0.0..=1.0`. Defaults to 0.7.
    pub temperature: f32,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            model: "llama3.1:8b".into(),
            api_url: "http://localhost:11434/api/generate".into(),
            timeout_secs: 60,
            temperature: 0.7,
        }
    }
}

impl InferenceConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// System prompt source. Inline text wins over the file when both are set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub system_prompt: Option<String>,
    pub system_prompt_file: Option<PathBuf>,
}

impl PromptConfig {
    /// Whether any prompt source is configured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.inline().is_some() || self.system_prompt_file.is_some()
    }

    /// Inline prompt text, ignoring blank values.
    #[must_use]
    pub fn inline(&self) -> Option<&str> {
        self.system_prompt
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Turn-processing behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Send extracted payloads without operator review. Defaults to true.
    pub auto_mode: bool,
    /// Reassemble fragmented inbound messages. Defaults to true.
    pub fragment_reconstruction: bool,
    /// Force-complete a partial message after this long without a new
    /// fragment. Defaults to 30.
    pub staleness_window_secs: u64,
    /// How often the session loop sweeps for stale partial messages.
    /// Defaults to 1.
    pub sweep_interval_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            auto_mode: true,
            fragment_reconstruction: true,
            staleness_window_secs: 30,
            sweep_interval_secs: 1,
        }
    }
}

impl AgentConfig {
    #[must_use]
    pub fn staleness_window(&self) -> Duration {
        Duration::from_secs(self.staleness_window_secs)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level directive (trace, debug, info, warn, error). Defaults to "info".
    pub level: String,
    /// Audit log file. `None` disables file logging.
    pub file: Option<PathBuf>,
    /// Also log to stderr. Defaults to true.
    pub console: bool,
    /// Emit console logs as JSON.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: Some(PathBuf::from("logs/agent_session.log")),
            console: true,
            json: false,
        }
    }
}
