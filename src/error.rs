//! Error types for xmlsilo.
//!
//! All fallible operations in the library return [`Result`]. Every error
//! carries one of the closed set of [`ErrorKind`]s plus a human-readable
//! message; load errors embed the byte offset of the violation and query
//! compile errors embed the character offset of the offending token.

use thiserror::Error;

/// The closed set of error categories surfaced by the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A caller-supplied parameter violates a precondition.
    InvalidArgument,
    /// A required result was absent (query matched nothing, text unset).
    NotFound,
    /// A silo blob or XML document violates the expected format.
    InvalidData,
    /// Version mismatch or a construct outside the accepted grammar.
    Unsupported,
    /// Filesystem failure on load or save.
    Io,
    /// Invariant violation caught at runtime.
    Internal,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("{message}: {source}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::InvalidData(_) => ErrorKind::InvalidData,
            Error::Unsupported(_) => ErrorKind::Unsupported,
            Error::Io { .. } => ErrorKind::Io,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }

    pub(crate) fn not_found(message: impl Into<String>) -> Self {
        Error::NotFound(message.into())
    }

    pub(crate) fn invalid_data(message: impl Into<String>) -> Self {
        Error::InvalidData(message.into())
    }

    pub(crate) fn unsupported(message: impl Into<String>) -> Self {
        Error::Unsupported(message.into())
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Error::Internal(message.into())
    }

    pub(crate) fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            message: message.into(),
            source,
        }
    }
}

/// Result type for all library operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(
            Error::invalid_data("x").kind(),
            ErrorKind::InvalidData
        );
        assert_eq!(Error::not_found("x").kind(), ErrorKind::NotFound);
        assert_eq!(Error::unsupported("x").kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn messages_render_with_prefix() {
        let err = Error::unsupported("unknown function 'bar' at position 4");
        assert_eq!(
            err.to_string(),
            "unsupported: unknown function 'bar' at position 4"
        );
    }
}
