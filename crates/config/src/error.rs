use std::path::PathBuf;

/// Crate-wide result type for config operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading or resolving configuration.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported config format: .{0}")]
    UnsupportedFormat(String),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("system prompt file not found: {0}")]
    PromptFileMissing(PathBuf),

    #[error("no system prompt configured (set prompt.system_prompt or prompt.system_prompt_file)")]
    PromptMissing,
}
