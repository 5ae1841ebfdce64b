//! Error taxonomy for the retrieval pipeline.
//!
//! Only store unavailability and malformed input data escape the pipeline.
//! Generator faults are retried and then degrade to a documented fallback at
//! the call site, so they rarely surface past [`crate::memory::search`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecallError {
    /// The backing memory store failed (connection, query, lock poisoning).
    #[error("memory store error: {0}")]
    Store(String),

    /// The text generator call failed (HTTP, rate limit, non-success status).
    #[error("generator error: {0}")]
    Generator(String),

    /// The generator answered, but not in the shape we asked for.
    #[error("malformed generator response: {0}")]
    MalformedResponse(String),

    /// An external call exceeded the per-attempt timeout.
    #[error("external call timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A chat turn names a speaker that is neither participant.
    #[error("unknown speaker: {0}")]
    UnknownSpeaker(String),

    /// The dataset file could not be read or parsed.
    #[error("dataset error: {0}")]
    Dataset(String),
}

impl RecallError {
    /// Whether a retry policy should attempt the call again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Store(_) | Self::Generator(_) | Self::MalformedResponse(_) | Self::Timeout(_)
        )
    }
}

impl From<rusqlite::Error> for RecallError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<reqwest::Error> for RecallError {
    fn from(e: reqwest::Error) -> Self {
        Self::Generator(e.to_string())
    }
}

impl From<serde_json::Error> for RecallError {
    fn from(e: serde_json::Error) -> Self {
        Self::MalformedResponse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RecallError>;
