//
// Copyright (c) 2024 shoebox authors
//
use thiserror::Error;

pub mod entities;
pub mod repositories;
pub mod usecases;

///
/// Error kinds surfaced to callers of the engine. Use cases and repositories
/// return `anyhow::Error` and wrap one of these values when the failure is
/// meaningful to the caller; `err.downcast_ref::<EngineError>()` recovers the
/// kind at the boundary.
///
#[derive(Debug, Error)]
pub enum EngineError {
    /// Asset identifier or checksum is not present in the data source.
    #[error("not found: {0}")]
    NotFound(String),
    /// Malformed input, such as an undecodable asset identifier, an
    /// unparsable date, or bad query syntax.
    #[error("invalid input: {0}")]
    Invalid(String),
    /// Media family for which a rendition cannot be produced.
    #[error("unsupported media type: {0}")]
    Unsupported(String),
    /// Filesystem or blob store failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Key-value store failure.
    #[error("storage error: {0}")]
    Backend(String),
    /// Collaborator (transcoder, geocoder) failure; normally degraded
    /// silently rather than surfaced.
    #[error("external tool error: {0}")]
    External(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_downcast() {
        let err: anyhow::Error = EngineError::NotFound("abc123".into()).into();
        let kind = err.downcast_ref::<EngineError>();
        assert!(matches!(kind, Some(EngineError::NotFound(_))));
        assert_eq!(err.to_string(), "not found: abc123");
    }
}
