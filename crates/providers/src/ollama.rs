//! Ollama backend: non-streaming `/api/generate` plus `/api/tags` discovery.

use std::time::Duration;

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tether_agents::{CompletionOptions, InferenceBackend, InferenceError, Prompt},
    tether_config::InferenceConfig,
    tracing::{debug, trace, warn},
};

use crate::error::{Error, Result};

/// Deadline for discovery requests, which should be answered instantly by a
/// running server.
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Derive the server root from any Ollama endpoint URL.
///
/// Accepts the generate URL (`http://host:11434/api/generate`), the root
/// itself, or the OpenAI-compatible `/v1` base.
#[must_use]
pub fn ollama_api_base(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix("/v1").unwrap_or(trimmed);
    if let Some(idx) = trimmed.find("/api/") {
        return trimmed[..idx].to_string();
    }
    trimmed.strip_suffix("/api").unwrap_or(trimmed).to_string()
}

// ── Wire types ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TagsPayload {
    #[serde(default)]
    models: Vec<TagEntry>,
}

// ── Model availability ──────────────────────────────────────────────────────

/// Result of looking the configured model up in the server's tag list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelAvailability {
    /// Listed under exactly the configured name.
    Exact,
    /// Listed under a longer tag containing the configured name
    /// (`llama3.1` matches `llama3.1:8b`).
    Similar(String),
    /// Not listed. Carries what the server has.
    Missing(Vec<String>),
}

impl ModelAvailability {
    #[must_use]
    pub fn is_available(&self) -> bool {
        !matches!(self, Self::Missing(_))
    }

    fn resolve(model: &str, available: Vec<String>) -> Self {
        if available.iter().any(|name| name == model) {
            return Self::Exact;
        }
        match available.iter().find(|name| name.contains(model)) {
            Some(name) => Self::Similar(name.clone()),
            None => Self::Missing(available),
        }
    }
}

// ── Provider ────────────────────────────────────────────────────────────────

pub struct OllamaProvider {
    model: String,
    generate_url: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(model: impl Into<String>, generate_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder().build().map_err(Error::Client)?;
        Ok(Self {
            model: model.into(),
            generate_url: generate_url.into(),
            client,
        })
    }

    pub fn from_config(config: &InferenceConfig) -> Result<Self> {
        Self::new(config.model.as_str(), config.api_url.as_str())
    }

    #[must_use]
    pub fn generate_url(&self) -> &str {
        &self.generate_url
    }

    #[must_use]
    pub fn api_base(&self) -> String {
        ollama_api_base(&self.generate_url)
    }

    /// List the model tags the server has pulled, sorted and deduplicated.
    pub async fn discover_models(&self) -> Result<Vec<String>> {
        let endpoint = format!("{}/api/tags", self.api_base());
        let response = self
            .client
            .get(&endpoint)
            .timeout(DISCOVERY_TIMEOUT)
            .send()
            .await
            .map_err(|source| Error::Request {
                endpoint: endpoint.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status {
                endpoint,
                status: status.as_u16(),
            });
        }

        let payload: TagsPayload = response.json().await.map_err(|source| Error::Decode {
            endpoint: endpoint.clone(),
            source,
        })?;
        let mut models: Vec<String> = payload
            .models
            .into_iter()
            .map(|entry| entry.name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();
        models.sort();
        models.dedup();
        debug!(endpoint = %endpoint, count = models.len(), "discovered ollama models");
        Ok(models)
    }

    /// Check whether the configured model is available on the server.
    pub async fn check_model(&self) -> Result<ModelAvailability> {
        let available = self.discover_models().await?;
        Ok(ModelAvailability::resolve(&self.model, available))
    }
}

#[async_trait]
impl InferenceBackend for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        prompt: &Prompt,
        options: &CompletionOptions,
    ) -> std::result::Result<String, InferenceError> {
        let body = GenerateRequest {
            model: &self.model,
            prompt: &prompt.user,
            system: Some(prompt.system.as_str()).filter(|s| !s.is_empty()),
            stream: false,
            options: GenerateOptions {
                temperature: options.temperature,
            },
        };

        debug!(
            model = %self.model,
            url = %self.generate_url,
            prompt_chars = prompt.user.len(),
            "ollama generate request"
        );

        let response = self
            .client
            .post(&self.generate_url)
            .timeout(options.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, options.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, model = %self.model, body = %body, "ollama API error");
            return Err(InferenceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| transport_error(e, options.timeout))?;
        trace!(body = %text, "ollama response body");

        let parsed: GenerateResponse =
            serde_json::from_str(&text).map_err(|e| InferenceError::Decode(e.to_string()))?;
        Ok(parsed.response.trim().to_string())
    }
}

fn transport_error(error: reqwest::Error, timeout: Duration) -> InferenceError {
    if error.is_timeout() {
        InferenceError::Timeout(timeout)
    } else {
        InferenceError::Transport(error.to_string())
    }
}
