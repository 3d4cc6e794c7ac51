/// Crate-wide result type for session operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport failure; ends the session.
    #[error(transparent)]
    Channel(#[from] tether_channels::Error),

    /// Manual mode was requested without an operator to review payloads.
    #[error("manual mode requires an operator")]
    MissingOperator,

    /// The operator could not be consulted (e.g. stdin closed).
    #[error("operator input failed: {message}")]
    Operator { message: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn operator(message: impl std::fmt::Display) -> Self {
        Self::Operator {
            message: message.to_string(),
        }
    }
}
