//! Transport channels.
//!
//! The session loop talks to its peer through the [`Channel`] trait: pull one
//! text frame at a time, push serialized replies back. [`WebSocketChannel`]
//! is the production transport; [`MemoryChannel`] is an in-process pair for
//! scripted sessions and tests.

pub mod channel;
pub mod error;
pub mod memory;
pub mod websocket;

pub use {
    channel::{Channel, Inbound},
    error::{Error, Result},
    memory::{MemoryChannel, MemoryPeer},
    websocket::WebSocketChannel,
};
