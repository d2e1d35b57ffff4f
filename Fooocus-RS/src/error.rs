use thiserror::Error;

/// Errors returned by Fooocus-API operations.
#[derive(Error, Debug)]
pub enum FooocusError {
    /// Fooocus-API returned a non-success HTTP status.
    #[error("Fooocus-API returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The response from Fooocus-API was missing expected fields.
    #[error("{0}")]
    InvalidResponse(String),

    /// Network-level request failure with context.
    #[error("{context}: {source}")]
    Network {
        context: String,
        source: reqwest::Error,
    },

    /// The backend process could not be launched.
    #[error("Failed to launch Fooocus-API: {0}")]
    Spawn(String),

    /// The backend process was launched but never became healthy.
    #[error("Fooocus-API did not become ready: {0}")]
    StartFailed(String),
}

impl FooocusError {
    /// True when the backend could not be reached at all (connection
    /// refused, DNS failure, or request timeout).
    pub fn is_unavailable(&self) -> bool {
        match self {
            FooocusError::Network { source, .. } => source.is_connect() || source.is_timeout(),
            FooocusError::Spawn(_) | FooocusError::StartFailed(_) => true,
            _ => false,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, FooocusError>;
