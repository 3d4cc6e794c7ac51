//! Metrics for tether.
//!
//! Crates record through the `metrics` facade behind their own `metrics`
//! feature. Nothing is exported until the embedding binary installs a
//! recorder, so recording is free when no one listens.
//!
//! ```rust,ignore
//! use tether_metrics::{counter, turns};
//!
//! counter!(turns::TURNS_TOTAL, "outcome" => "success").increment(1);
//! ```

mod definitions;

pub use definitions::*;

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
