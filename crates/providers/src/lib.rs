//! Inference backend implementations.

pub mod error;
pub mod ollama;

pub use {
    error::{Error, Result},
    ollama::{ModelAvailability, OllamaProvider, ollama_api_base},
};
