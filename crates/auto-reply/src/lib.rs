//! Inbound processing pipeline: the glue between channels and agents.
//!
//! Flow: channel frame → fragment buffer → (on completion) turn processor →
//! response extractor → channel send (after operator review in manual mode).

pub mod buffer;
pub mod error;
pub mod session;

pub use {
    buffer::{BufferConfig, FragmentBuffer, FragmentOutcome},
    error::{Error, Result},
    session::{
        CloseReason, DispatchMode, Operator, OperatorDecision, SessionConfig, SessionLoop, SessionState,
        SessionSummary,
    },
};
