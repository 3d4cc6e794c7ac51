use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    Error, Result,
    env_subst::substitute_env,
    schema::{PromptConfig, TetherConfig},
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["tether.toml", "tether.yaml", "tether.yml", "tether.json"];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<TetherConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./tether.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/tether/tether.{toml,yaml,yml,json}` (user-global)
///
/// Returns `TetherConfig::default()` if no config file is found.
pub fn discover_and_load() -> TetherConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    TetherConfig::default()
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    if let Some(config_dir) = config_dir() {
        for name in CONFIG_FILENAMES {
            let p = config_dir.join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }

    None
}

/// Returns the user-global config directory (`~/.config/tether/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "tether").map(|d| d.config_dir().to_path_buf())
}

fn parse_config(raw: &str, path: &Path) -> Result<TetherConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => Err(Error::UnsupportedFormat(ext.to_string())),
    }
}

/// Apply the flat environment variables (`WEBSOCKET_URI`, `OLLAMA_MODEL`, ...)
/// on top of a loaded config. Set variables always win over file values.
pub fn apply_env_overrides(config: &mut TetherConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

fn apply_env_overrides_with(config: &mut TetherConfig, lookup: impl Fn(&str) -> Option<String>) {
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(v) = get("WEBSOCKET_URI") {
        config.transport.uri = v.trim().to_string();
    }
    if let Some(v) = get("WEBSOCKET_TIMEOUT").and_then(|v| parse_number("WEBSOCKET_TIMEOUT", &v)) {
        config.transport.connect_timeout_secs = v;
    }
    if let Some(v) = get("OLLAMA_MODEL") {
        config.inference.model = v.trim().to_string();
    }
    if let Some(v) = get("OLLAMA_API_URL") {
        config.inference.api_url = v.trim().to_string();
    }
    if let Some(v) = get("OLLAMA_TIMEOUT").and_then(|v| parse_number("OLLAMA_TIMEOUT", &v)) {
        config.inference.timeout_secs = v;
    }
    if let Some(v) = get("OLLAMA_TEMPERATURE") {
        match v.trim().parse::<f32>() {
            Ok(t) => config.inference.temperature = t,
            Err(_) => warn!(var = "OLLAMA_TEMPERATURE", value = %v, "ignoring non-numeric value"),
        }
    }
    if let Some(v) = get("SYSTEM_PROMPT") {
        config.prompt.system_prompt = Some(v);
    }
    if let Some(v) = get("SYSTEM_PROMPT_FILE") {
        config.prompt.system_prompt_file = Some(PathBuf::from(v.trim()));
    }
    if let Some(v) = get("LOG_LEVEL") {
        config.logging.level = v.trim().to_lowercase();
    }
    if let Some(v) = get("LOG_FILE") {
        config.logging.file = Some(PathBuf::from(v.trim()));
    }
    if let Some(v) = get("ENABLE_CONSOLE_LOG").and_then(|v| parse_flag("ENABLE_CONSOLE_LOG", &v)) {
        config.logging.console = v;
    }
    if let Some(v) = get("AUTO_MODE").and_then(|v| parse_flag("AUTO_MODE", &v)) {
        config.agent.auto_mode = v;
    }
    if let Some(v) = get("ENABLE_FRAGMENT_RECONSTRUCTION")
        .and_then(|v| parse_flag("ENABLE_FRAGMENT_RECONSTRUCTION", &v))
    {
        config.agent.fragment_reconstruction = v;
    }
    if let Some(v) =
        get("FRAGMENT_STALENESS_SECS").and_then(|v| parse_number("FRAGMENT_STALENESS_SECS", &v))
    {
        config.agent.staleness_window_secs = v;
    }
}

fn parse_flag(var: &str, value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => {
            warn!(var, value, "ignoring non-boolean value");
            None
        },
    }
}

fn parse_number(var: &str, value: &str) -> Option<u64> {
    match value.trim().parse::<u64>() {
        Ok(n) => Some(n),
        Err(_) => {
            warn!(var, value, "ignoring non-numeric value");
            None
        },
    }
}

/// Resolve the system prompt text: inline text first, then the prompt file.
pub fn resolve_system_prompt(prompt: &PromptConfig) -> Result<String> {
    if let Some(inline) = prompt.inline() {
        return Ok(inline.to_string());
    }
    let Some(path) = prompt.system_prompt_file.as_ref() else {
        return Err(Error::PromptMissing);
    };
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(text.trim().to_string()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(Error::PromptFileMissing(path.clone()))
        },
        Err(source) => Err(Error::Read {
            path: path.clone(),
            source,
        }),
    }
}
