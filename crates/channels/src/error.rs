use std::error::Error as StdError;

/// Crate-wide result type for channel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed transport errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The endpoint URI is malformed or uses an unsupported scheme.
    #[error("invalid channel URI {uri}: {message}")]
    InvalidUri { uri: String, message: String },

    /// The handshake did not finish in time.
    #[error("timed out connecting to {uri} after {}s", timeout.as_secs())]
    ConnectTimeout {
        uri: String,
        timeout: std::time::Duration,
    },

    /// The peer or the background task has gone away.
    #[error("channel closed")]
    Closed,

    /// WebSocket protocol or I/O failure.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Wrapped source error from an external dependency.
    #[error("channel operation failed: {context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn invalid_uri(uri: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::InvalidUri {
            uri: uri.into(),
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Whether the error means the peer went away rather than misbehaved.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        use tokio_tungstenite::tungstenite::Error as WsError;
        matches!(
            self,
            Self::Closed | Self::WebSocket(WsError::ConnectionClosed | WsError::AlreadyClosed)
        )
    }
}
