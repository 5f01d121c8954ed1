use std::error::Error as StdError;

/// Common error type for `formsync_core`.
///
/// Each variant is one failure kind callers branch on. Store implementations should
/// preserve the underlying error chain via `Error::backend`.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The actor lacks the rights required for the operation.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error(
        "workspace holds {count} responses, above the limit of {limit}; upgrade plan to import more forms"
    )]
    QuotaExceeded { count: u64, limit: u64 },

    /// Network failure, timeout or non-2xx status from a provider.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The provider answered but the body is not a converted form payload.
    #[error("malformed provider payload: {0}")]
    MalformedPayload(String),

    #[error("backend error: {context}")]
    Backend {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync + 'static>,
    },

    #[error("backend error: {0}")]
    BackendMessage(String),
}

impl Error {
    #[tracing::instrument(level = "debug", name = "formsync.error.backend", skip(source))]
    pub fn backend(
        context: impl Into<String> + std::fmt::Debug,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// True for storage failures (`Backend` / `BackendMessage`).
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Backend { .. } | Self::BackendMessage(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
