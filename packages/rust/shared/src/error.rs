//! Error types for ContextQA.
//!
//! Library crates use [`ContextQaError`] via `thiserror`.
//! The CLI app wraps this with `color-eyre` for rich diagnostics.
//!
//! Variants double as pipeline failure reasons: each one carries a stable
//! [`reason_code`](ContextQaError::reason_code) that is logged whenever a run
//! ends in failure.

use std::path::PathBuf;

/// Top-level error type for all ContextQA operations.
#[derive(Debug, thiserror::Error)]
pub enum ContextQaError {
    /// The stored credential is empty or does not match the expected pattern.
    #[error("credential missing or invalid")]
    InvalidCredential,

    /// A query was issued without any credential stored.
    #[error("credential not set")]
    MissingCredential,

    /// The uploaded document's media type has no backend script.
    #[error("unsupported document type: {media_type}")]
    UnsupportedFormat { media_type: String },

    /// Query text was empty or whitespace only.
    #[error("query text is empty")]
    EmptyQuery,

    /// The user has no active document.
    #[error("no document configured")]
    NoDocument,

    /// A backend argument contained characters that are not allowed.
    #[error("unsafe backend argument: {message}")]
    UnsafeArgument { message: String },

    /// Workspace directory could not be created or removed.
    #[error("workspace error: {message}")]
    Workspace { message: String },

    /// The raw document could not be staged inside the workspace.
    #[error("staging error: {message}")]
    Staging { message: String },

    /// Interpreter setting or script resource is missing.
    #[error("backend unavailable: {message}")]
    BackendUnavailable { message: String },

    /// The backend ran but left no `index` directory behind.
    #[error("backend produced no index")]
    BackendProducedNoIndex,

    /// Packing the index directory failed.
    #[error("archive error: {message}")]
    Archive { message: String },

    /// The stored index could not be restored or its output decoded.
    #[error("index corrupt: {message}")]
    IndexCorrupt { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Network/HTTP error while downloading a document.
    #[error("network error: {0}")]
    Network(String),

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ContextQaError>;

impl ContextQaError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn workspace(msg: impl Into<String>) -> Self {
        Self::Workspace {
            message: msg.into(),
        }
    }

    pub fn staging(msg: impl Into<String>) -> Self {
        Self::Staging {
            message: msg.into(),
        }
    }

    pub fn backend_unavailable(msg: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            message: msg.into(),
        }
    }

    pub fn archive(msg: impl Into<String>) -> Self {
        Self::Archive {
            message: msg.into(),
        }
    }

    pub fn index_corrupt(msg: impl Into<String>) -> Self {
        Self::IndexCorrupt {
            message: msg.into(),
        }
    }

    pub fn unsafe_argument(msg: impl Into<String>) -> Self {
        Self::UnsafeArgument {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Stable snake_case code used in logs.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::InvalidCredential => "credential_missing_or_invalid",
            Self::MissingCredential => "credential_missing",
            Self::UnsupportedFormat { .. } => "unsupported_format",
            Self::EmptyQuery => "empty_query",
            Self::NoDocument => "no_document",
            Self::UnsafeArgument { .. } => "unsafe_argument",
            Self::Workspace { .. } => "workspace_error",
            Self::Staging { .. } => "staging_error",
            Self::BackendUnavailable { .. } => "backend_unavailable",
            Self::BackendProducedNoIndex => "backend_produced_no_index",
            Self::Archive { .. } => "archive_error",
            Self::IndexCorrupt { .. } => "index_corrupt",
            Self::Storage(_) => "storage_error",
            Self::Network(_) => "network_error",
            Self::Config { .. } => "config_error",
            Self::Io { .. } => "io_error",
        }
    }

    /// Validation failures caused by user input. These are reported to the
    /// user but never logged as severe.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidCredential
                | Self::MissingCredential
                | Self::UnsupportedFormat { .. }
                | Self::EmptyQuery
                | Self::NoDocument
                | Self::UnsafeArgument { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = ContextQaError::config("DB_DIR not set");
        assert_eq!(err.to_string(), "config error: DB_DIR not set");

        let err = ContextQaError::UnsupportedFormat {
            media_type: "image/png".into(),
        };
        assert!(err.to_string().contains("image/png"));
    }

    #[test]
    fn reason_codes_are_stable() {
        assert_eq!(
            ContextQaError::InvalidCredential.reason_code(),
            "credential_missing_or_invalid"
        );
        assert_eq!(
            ContextQaError::BackendProducedNoIndex.reason_code(),
            "backend_produced_no_index"
        );
        assert_eq!(
            ContextQaError::Storage("disk full".into()).reason_code(),
            "storage_error"
        );
    }

    #[test]
    fn validation_family_is_user_error() {
        assert!(ContextQaError::EmptyQuery.is_user_error());
        assert!(ContextQaError::NoDocument.is_user_error());
        assert!(!ContextQaError::archive("truncated").is_user_error());
        assert!(!ContextQaError::Storage("locked".into()).is_user_error());
    }
}
