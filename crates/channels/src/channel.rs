use async_trait::async_trait;

use crate::Result;

/// One event pulled from a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A text frame from the peer.
    Message(String),
    /// The peer closed the connection cleanly.
    Closed,
}

/// Bidirectional text transport.
///
/// `receive` must be cancel-safe: the session loop races it against timers
/// and shutdown in `tokio::select!`, and a frame must never be lost because a
/// receive future was dropped.
#[async_trait]
pub trait Channel: Send {
    /// Human-readable peer description for logs (usually the URI).
    fn peer(&self) -> &str;

    /// Wait for the next inbound event.
    async fn receive(&mut self) -> Result<Inbound>;

    /// Send one text frame. Resolves once the frame has been written.
    async fn send(&mut self, text: String) -> Result<()>;

    /// Close the connection. Idempotent.
    async fn close(&mut self) -> Result<()>;
}
