//! Error type shared by the engine and the reference backend.

/// Failures surfaced by backend calls and invocations.
///
/// Lookup misses inside the registries are not errors; they are silent no-ops.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("provider not found: {0}")]
    ProviderNotFound(String),

    #[error("no active session")]
    NoActiveSession,

    #[error("backend error: {0}")]
    Backend(String),

    #[error("context retrieval failed: {0}")]
    Retrieval(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ChatError>;
