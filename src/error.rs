//! Error types for reddit-dl
//!
//! This module provides the error taxonomy for the library:
//! - [`ParseError`] for everything that can go wrong turning an envelope into a typed thing
//! - [`Error`] for the fetch path (validation, transport, auth, cancellation, batches)
//! - [`ErrorKind`] so callers can branch on the category without string matching

use thiserror::Error;

use crate::types::Kind;

/// Result type alias for reddit-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for reddit-dl
///
/// Every variant carries enough context (operation, field, index) to make the
/// failure actionable from the message alone.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "fetch.max_concurrency")
        key: Option<String>,
    },

    /// A response envelope could not be turned into a typed object
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// A request field failed format validation before any network call was made
    #[error("validation failed for {field}: {reason} (value: {value:?})")]
    Validation {
        /// The request field that was rejected (e.g., "article")
        field: String,
        /// The offending value
        value: String,
        /// Why the value was rejected
        reason: String,
    },

    /// The server answered with a non-success status
    #[error("HTTP {status} from {path}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Request path that produced the status
        path: String,
    },

    /// The requested resource does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The server rejected the request because the rate budget is exhausted
    #[error("rate limited on {path}")]
    RateLimited {
        /// Request path that was rejected
        path: String,
    },

    /// Network error from the HTTP client
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Authentication failed (token acquisition or a 401/403 answer)
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The operation was cancelled through its cancellation token
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// The operation's deadline elapsed
    #[error("operation timed out after {elapsed_ms}ms: {operation}")]
    Timeout {
        /// Name of the operation that timed out
        operation: String,
        /// Configured deadline in milliseconds
        elapsed_ms: u128,
    },

    /// A batch was aborted by its first failing item (fail-fast policy)
    #[error("batch aborted by request {index}: {source}")]
    Batch {
        /// Position of the failing request in the input
        index: usize,
        /// The item's own error
        #[source]
        source: Box<Error>,
    },

    /// One or more items of a batch failed
    #[error("{failed} of {total} requests failed; first failure at request {first_index}: {first}")]
    Aggregate {
        /// Number of failed items
        failed: usize,
        /// Number of items in the batch
        total: usize,
        /// Position of the first failed item
        first_index: usize,
        /// The first failed item's error
        #[source]
        first: Box<Error>,
    },

    /// A background fetch task panicked or was aborted by the runtime
    #[error("fetch task for request {index} failed: {reason}")]
    TaskFailed {
        /// Position of the request the task was handling
        index: usize,
        /// Join error description
        reason: String,
    },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Errors raised while decoding envelopes into typed things
#[derive(Debug, Error)]
pub enum ParseError {
    /// No envelope was supplied (empty input or JSON `null`)
    #[error("nil input: {context}")]
    NilInput {
        /// Where the missing envelope was expected
        context: String,
    },

    /// The envelope kind is outside the known vocabulary
    #[error("unknown kind: {kind}")]
    UnknownKind {
        /// The unrecognized kind tag
        kind: String,
    },

    /// The envelope kind differs from what the caller asked for
    #[error("kind mismatch: expected {expected}, got {actual}")]
    KindMismatch {
        /// The kind (or kinds) the caller expected
        expected: String,
        /// The kind found on the wire
        actual: String,
    },

    /// The envelope wrapper itself is not `{kind, data}`
    #[error("malformed envelope: {source}")]
    Envelope {
        /// Underlying JSON error
        #[source]
        source: serde_json::Error,
    },

    /// The payload of a recognized kind failed to decode
    #[error("failed to decode {kind} data: {source}")]
    Decode {
        /// Kind whose payload was being decoded
        kind: Kind,
        /// Underlying JSON error (names the missing or mistyped field)
        #[source]
        source: serde_json::Error,
    },

    /// The payload decoded but violates a field invariant
    #[error("invalid {kind} field `{field}`: {reason}")]
    Invalid {
        /// Kind whose payload was being checked
        kind: Kind,
        /// Offending field name
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// A listing child failed to parse; the whole listing is rejected
    #[error("listing child {index}: {source}")]
    Child {
        /// Position of the failing child in the `children` array
        index: usize,
        /// The child's own error
        #[source]
        source: Box<ParseError>,
    },

    /// The replies of a comment failed to parse
    #[error("replies of comment {id}: {source}")]
    Replies {
        /// Id of the comment whose replies failed
        id: String,
        /// The replies listing error
        #[source]
        source: Box<ParseError>,
    },

    /// A comments response did not have the `[post, comments]` shape
    #[error("malformed comments response: {reason}")]
    Response {
        /// What is wrong with the response
        reason: String,
    },
}

/// Coarse error category, for branching without string matching
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad bytes or JSON shape
    MalformedInput,
    /// Kind outside the known vocabulary
    UnknownKind,
    /// Kind differs from the expected one
    KindMismatch,
    /// Missing envelope
    NilInput,
    /// Request field failed format validation
    Validation,
    /// Network, HTTP status, or rate-limit rejection
    Transport,
    /// Cancelled through a token
    Cancelled,
    /// Deadline elapsed
    Timeout,
    /// Credential acquisition or rejection
    Authentication,
    /// Batch-level failure made of per-item failures
    Aggregate,
    /// Invalid configuration
    Config,
    /// Anything else (panicked task, serialization)
    Internal,
}

impl ParseError {
    /// The coarse category of this parse error, looking through child/replies wrappers
    pub fn kind(&self) -> ErrorKind {
        match self {
            ParseError::NilInput { .. } => ErrorKind::NilInput,
            ParseError::UnknownKind { .. } => ErrorKind::UnknownKind,
            ParseError::KindMismatch { .. } => ErrorKind::KindMismatch,
            ParseError::Envelope { .. }
            | ParseError::Decode { .. }
            | ParseError::Invalid { .. }
            | ParseError::Response { .. } => ErrorKind::MalformedInput,
            ParseError::Child { source, .. } | ParseError::Replies { source, .. } => source.kind(),
        }
    }

    pub(crate) fn nil(context: impl Into<String>) -> Self {
        ParseError::NilInput {
            context: context.into(),
        }
    }

    pub(crate) fn invalid(kind: Kind, field: &'static str, reason: impl Into<String>) -> Self {
        ParseError::Invalid {
            kind,
            field,
            reason: reason.into(),
        }
    }
}

impl Error {
    /// The coarse category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config { .. } => ErrorKind::Config,
            Error::Parse(e) => e.kind(),
            Error::Validation { .. } => ErrorKind::Validation,
            Error::Http { .. } | Error::NotFound(_) | Error::RateLimited { .. } => {
                ErrorKind::Transport
            }
            Error::Network(e) if e.is_timeout() => ErrorKind::Timeout,
            Error::Network(_) => ErrorKind::Transport,
            Error::Auth(_) => ErrorKind::Authentication,
            Error::Cancelled(_) => ErrorKind::Cancelled,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Batch { source, .. } => source.kind(),
            Error::Aggregate { .. } => ErrorKind::Aggregate,
            Error::TaskFailed { .. } | Error::Serialization(_) | Error::Other(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// True for cancellation and deadline errors
    pub fn is_cancellation(&self) -> bool {
        matches!(self.kind(), ErrorKind::Cancelled | ErrorKind::Timeout)
    }

    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Parse(e) => match e.kind() {
                ErrorKind::NilInput => "nil_input",
                ErrorKind::UnknownKind => "unknown_kind",
                ErrorKind::KindMismatch => "kind_mismatch",
                _ => "malformed_input",
            },
            Error::Validation { .. } => "validation_error",
            Error::Http { .. } => "http_error",
            Error::NotFound(_) => "not_found",
            Error::RateLimited { .. } => "rate_limited",
            Error::Network(_) => "network_error",
            Error::Auth(_) => "authentication_failed",
            Error::Cancelled(_) => "cancelled",
            Error::Timeout { .. } => "timeout",
            Error::Batch { .. } => "batch_aborted",
            Error::Aggregate { .. } => "aggregate_failure",
            Error::TaskFailed { .. } => "task_failed",
            Error::Serialization(_) => "serialization_error",
            Error::Other(_) => "internal_error",
        }
    }

    pub(crate) fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    pub(crate) fn cancelled(operation: impl Into<String>) -> Self {
        Error::Cancelled(operation.into())
    }
}
