//! Inference side of the pipeline: the backend contract, the turn processor
//! that drives it, and extraction of the structured reply.

pub mod extract;
pub mod model;
pub mod turn;

pub use {
    extract::{ExtractError, StructuredPayload, extract},
    model::{CompletionOptions, InferenceBackend, InferenceError, Prompt},
    turn::{ExchangeOutcome, ModelExchange, TurnProcessor},
};
