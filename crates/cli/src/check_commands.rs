use {
    anyhow::{Result, bail},
    tether_config::TetherConfig,
    tether_providers::{ModelAvailability, OllamaProvider},
    tracing::{error, info, warn},
};

use crate::config_commands::{Overrides, effective_config, full_report, print_diagnostics};

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";

/// Ask Ollama for its model list and confirm the configured model is there.
///
/// Prints a one-line verdict (plus remediation hints on failure) and errors
/// when the server is unreachable or the model is missing.
pub async fn probe_ollama(config: &TetherConfig) -> Result<ModelAvailability> {
    let provider = OllamaProvider::from_config(&config.inference)?;
    let model = &config.inference.model;
    info!(api_base = %provider.api_base(), model = %model, "probing ollama");

    let availability = match provider.check_model().await {
        Ok(availability) => availability,
        Err(e) => {
            error!(error = %e, "cannot reach ollama");
            eprintln!("  {RED}✗{RESET} cannot reach Ollama at {}: {e}", provider.api_base());
            print_hints(model);
            bail!("ollama is not reachable");
        },
    };

    match &availability {
        ModelAvailability::Exact => {
            eprintln!("  {GREEN}✓{RESET} Ollama is up, model '{model}' is available");
        },
        ModelAvailability::Similar(name) => {
            warn!(model = %model, listed = %name, "using closest listed model tag");
            eprintln!("  {YELLOW}✓{RESET} Ollama is up, model '{model}' matches '{name}'");
        },
        ModelAvailability::Missing(listed) => {
            error!(model = %model, available = ?listed, "model not found");
            eprintln!("  {RED}✗{RESET} model '{model}' not found");
            if listed.is_empty() {
                eprintln!("    the server lists no models");
            } else {
                eprintln!("    available: {}", listed.join(", "));
            }
            print_hints(model);
            bail!("model '{model}' is not available");
        },
    }

    Ok(availability)
}

fn print_hints(model: &str) {
    eprintln!();
    eprintln!("  Make sure Ollama is running:");
    eprintln!("    1. Start Ollama: ollama serve");
    eprintln!("    2. Verify the model is available: ollama list");
    eprintln!("    3. Pull the model if needed: ollama pull {model}");
}

/// `tether check`: validate the effective config, then probe Ollama.
pub async fn handle_check(overrides: &Overrides) -> Result<()> {
    let config = effective_config(overrides)?;
    let report = full_report(overrides.config.as_deref(), &config);
    if print_diagnostics(&report, false) > 0 {
        bail!("configuration has errors");
    }
    eprintln!();
    probe_ollama(&config).await?;
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(server: &mockito::ServerGuard, model: &str) -> TetherConfig {
        let mut config = TetherConfig::default();
        config.inference.api_url = format!("{}/api/generate", server.url());
        config.inference.model = model.into();
        config
    }

    #[tokio::test]
    async fn probe_accepts_tagged_model() {
        let mut server = mockito::Server::new_async().await;
        let _tags = server
            .mock("GET", "/api/tags")
            .with_status(200)
            .with_body(r#"{"models":[{"name":"llama3.1:8b"}]}"#)
            .create_async()
            .await;

        let availability = probe_ollama(&config_for(&server, "llama3.1")).await.unwrap();
        assert_eq!(availability, ModelAvailability::Similar("llama3.1:8b".into()));
    }

    #[tokio::test]
    async fn probe_fails_when_model_missing() {
        let mut server = mockito::Server::new_async().await;
        let _tags = server
            .mock("GET", "/api/tags")
            .with_status(200)
            .with_body(r#"{"models":[{"name":"mistral:7b"}]}"#)
            .create_async()
            .await;

        let err = probe_ollama(&config_for(&server, "llama3.1")).await.unwrap_err();
        assert!(err.to_string().contains("llama3.1"));
    }

    #[tokio::test]
    async fn probe_fails_on_server_error() {
        let mut server = mockito::Server::new_async().await;
        let _tags = server
            .mock("GET", "/api/tags")
            .with_status(500)
            .create_async()
            .await;

        assert!(probe_ollama(&config_for(&server, "llama3.1")).await.is_err());
    }
}
