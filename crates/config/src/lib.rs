//! Configuration loading, validation and env substitution.
//!
//! Config files: `tether.toml`, `tether.yaml`, or `tether.json`
//! Searched in `./` then `~/.config/tether/`.
//!
//! Supports `${ENV_VAR}` substitution in file contents, and the flat
//! `WEBSOCKET_URI` / `OLLAMA_*` / `SYSTEM_PROMPT` variables as overrides.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{
        apply_env_overrides, config_dir, discover_and_load, find_config_file, load_config,
        resolve_system_prompt,
    },
    schema::{
        AgentConfig, InferenceConfig, LoggingConfig, PromptConfig, TetherConfig, TransportConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate_config},
};
