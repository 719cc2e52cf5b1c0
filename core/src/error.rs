//! Error types for the batch codec.
//!
//! # Design
//! Only the edges of the codec can fail. Turning a typed request body into
//! JSON happens when a `CallDescriptor` is built, and a batch response with a
//! non-200 status is rejected before any part is looked at. Malformed parts
//! inside a successful response are never errors; they become
//! `PartResult::Unparsed`.

use thiserror::Error;

/// Errors returned by descriptor construction and `BatchClient::parse_response`.
#[derive(Debug, Error)]
pub enum BatchError {
    /// A request body could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The batch endpoint answered with something other than 200.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },
}

impl From<serde_json::Error> for BatchError {
    fn from(err: serde_json::Error) -> Self {
        BatchError::Serialization(err.to_string())
    }
}
