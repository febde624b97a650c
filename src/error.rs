//! Error handling for ncmfetch.
//!
//! Provides a unified error handling system based on gRPC status codes,
//! with mapping from various underlying errors to appropriate categories.
//!
//! # Error Categories
//!
//! The pipeline distinguishes a handful of failure classes. Each one maps
//! onto an [`ErrorKind`]:
//!
//! | Failure | Kind | Retried |
//! |---|---|---|
//! | Request payload cannot be encoded | [`ErrorKind::Internal`] | never, fatal |
//! | Catalog denied the track | [`ErrorKind::PermissionDenied`] | never |
//! | Catalog response has an unexpected shape | [`ErrorKind::InvalidArgument`] | never |
//! | Download failed after all attempts | [`ErrorKind::Unavailable`] | by the download engine |
//! | Work was cancelled | [`ErrorKind::Cancelled`] | never |
//!
//! Writing tags is not an error class of its own: a download whose tags
//! could not be written is kept and reported as untagged by the album
//! assembler.
//!
//! # Example
//!
//! ```rust
//! use ncmfetch::error::{Error, ErrorKind, Result};
//!
//! fn first_song(songs: &[String]) -> Result<&String> {
//!     songs
//!         .first()
//!         .ok_or_else(|| Error::not_found("no songs in detail response"))
//! }
//! ```

#![allow(clippy::enum_glob_use)]

use std::fmt;
use thiserror::Error;

/// Main error type combining error kind and details.
///
/// Provides:
/// * Categorized error types ([`ErrorKind`])
/// * Underlying error details
/// * Conversion from common error types
#[derive(Debug)]
pub struct Error {
    /// Classification of the error
    pub kind: ErrorKind,

    /// Details of the underlying error
    pub error: Source,
}

/// Underlying cause of an [`struct@Error`].
pub type Source = Box<dyn std::error::Error + Send + Sync>;

impl Error {
    /// Attempts to downcast the underlying error to a concrete type.
    ///
    /// Allows accessing the original error when its concrete type is known.
    #[must_use]
    pub fn downcast<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.error.downcast_ref::<E>()
    }

    /// Whether this error should stop the whole run instead of just the
    /// track or album it happened in.
    ///
    /// Only internal errors qualify: they signal a defect such as a request
    /// payload that cannot be serialized, which will fail for every track.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.kind == ErrorKind::Internal
    }
}

/// Standard result type for ncmfetch operations.
///
/// Wraps the standard `Result` type with our custom [`struct@Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories based on gRPC status codes.
///
/// See [gRPC status codes](https://github.com/googleapis/googleapis/blob/master/google/rpc/code.proto)
/// for the original definitions.
#[expect(clippy::module_name_repetitions)]
#[derive(Clone, Copy, Debug, Eq, Error, Hash, Ord, PartialEq, PartialOrd)]
#[repr(u32)]
pub enum ErrorKind {
    /// HTTP Mapping: 499 Client Closed Request
    #[error("operation was cancelled")]
    Cancelled = 1,

    /// HTTP Mapping: 500 Internal Server Error
    #[error("unknown error")]
    Unknown = 2,

    /// HTTP Mapping: 400 Bad Request
    #[error("invalid argument specified")]
    InvalidArgument = 3,

    /// HTTP Mapping: 504 Gateway Timeout
    #[error("operation timed out")]
    DeadlineExceeded = 4,

    /// HTTP Mapping: 404 Not Found
    #[error("not found")]
    NotFound = 5,

    /// HTTP Mapping: 409 Conflict
    #[error("attempt to create what already exists")]
    AlreadyExists = 6,

    /// HTTP Mapping: 403 Forbidden
    #[error("permission denied")]
    PermissionDenied = 7,

    /// HTTP Mapping: 401 Unauthorized
    #[error("no valid authentication credentials")]
    Unauthenticated = 16,

    /// HTTP Mapping: 429 Too Many Requests
    #[error("resource has been exhausted")]
    ResourceExhausted = 8,

    /// HTTP Mapping: 400 Bad Request
    #[error("invalid state")]
    FailedPrecondition = 9,

    /// HTTP Mapping: 409 Conflict
    #[error("operation aborted")]
    Aborted = 10,

    /// HTTP Mapping: 400 Bad Request
    #[error("out of range")]
    OutOfRange = 11,

    /// HTTP Mapping: 501 Not Implemented
    #[error("not implemented")]
    Unimplemented = 12,

    /// HTTP Mapping: 500 Internal Server Error
    #[error("internal error")]
    Internal = 13,

    /// HTTP Mapping: 503 Service Unavailable
    #[error("service unavailable")]
    Unavailable = 14,

    /// HTTP Mapping: 500 Internal Server Error
    #[error("unrecoverable data loss or corruption")]
    DataLoss = 15,
}

impl Error {
    /// Creates a new error with specified kind and details.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::new(ErrorKind::NotFound, "song detail not found");
    /// assert_eq!(err.kind, ErrorKind::NotFound);
    /// ```
    pub fn new(kind: ErrorKind, error: impl Into<Source>) -> Self {
        Self {
            kind,
            error: error.into(),
        }
    }

    pub fn aborted(error: impl Into<Source>) -> Self {
        Self::new(ErrorKind::Aborted, error)
    }

    pub fn already_exists(error: impl Into<Source>) -> Self {
        Self::new(ErrorKind::AlreadyExists, error)
    }

    /// An album run or a download was cancelled between tracks or between
    /// attempts.
    pub fn cancelled(error: impl Into<Source>) -> Self {
        Self::new(ErrorKind::Cancelled, error)
    }

    /// A transfer ended early or yielded fewer bytes than a valid file.
    pub fn data_loss(error: impl Into<Source>) -> Self {
        Self::new(ErrorKind::DataLoss, error)
    }

    pub fn deadline_exceeded(error: impl Into<Source>) -> Self {
        Self::new(ErrorKind::DeadlineExceeded, error)
    }

    /// An unexpected HTTP status, or content of the wrong type.
    pub fn failed_precondition(error: impl Into<Source>) -> Self {
        Self::new(ErrorKind::FailedPrecondition, error)
    }

    /// A defect such as a payload that cannot be serialized. Errors of this
    /// kind are [fatal](Self::is_fatal).
    pub fn internal(error: impl Into<Source>) -> Self {
        Self::new(ErrorKind::Internal, error)
    }

    /// Bad input, including catalog responses that do not match the
    /// expected schema.
    pub fn invalid_argument(error: impl Into<Source>) -> Self {
        Self::new(ErrorKind::InvalidArgument, error)
    }

    pub fn not_found(error: impl Into<Source>) -> Self {
        Self::new(ErrorKind::NotFound, error)
    }

    pub fn out_of_range(error: impl Into<Source>) -> Self {
        Self::new(ErrorKind::OutOfRange, error)
    }

    /// The catalog withheld the streaming URL of a track and something
    /// tried to fetch it anyway.
    pub fn permission_denied(error: impl Into<Source>) -> Self {
        Self::new(ErrorKind::PermissionDenied, error)
    }

    pub fn resource_exhausted(error: impl Into<Source>) -> Self {
        Self::new(ErrorKind::ResourceExhausted, error)
    }

    /// The catalog wants a logged in session.
    pub fn unauthenticated(error: impl Into<Source>) -> Self {
        Self::new(ErrorKind::Unauthenticated, error)
    }

    /// A download failed all of its attempts, or a server failed.
    pub fn unavailable(error: impl Into<Source>) -> Self {
        Self::new(ErrorKind::Unavailable, error)
    }

    pub fn unimplemented(error: impl Into<Source>) -> Self {
        Self::new(ErrorKind::Unimplemented, error)
    }

    pub fn unknown(error: impl Into<Source>) -> Self {
        Self::new(ErrorKind::Unknown, error)
    }

    /// Creates an error from an unsuccessful HTTP status code.
    ///
    /// * 401 -> `Unauthenticated`
    /// * 403 -> `PermissionDenied`
    /// * 404, 410 -> `NotFound`
    /// * 408 -> `DeadlineExceeded`
    /// * 429 -> `ResourceExhausted`
    /// * 5xx -> `Unavailable`
    /// * others -> `FailedPrecondition`
    pub fn from_status(status: http::StatusCode, context: impl fmt::Display) -> Self {
        use http::StatusCode;

        let message = format!("{context}: HTTP {status}");
        match status {
            StatusCode::UNAUTHORIZED => Self::unauthenticated(message),
            StatusCode::FORBIDDEN => Self::permission_denied(message),
            StatusCode::NOT_FOUND | StatusCode::GONE => Self::not_found(message),
            StatusCode::REQUEST_TIMEOUT => Self::deadline_exceeded(message),
            StatusCode::TOO_MANY_REQUESTS => Self::resource_exhausted(message),
            status if status.is_server_error() => Self::unavailable(message),
            _ => Self::failed_precondition(message),
        }
    }
}

/// Returns the underlying error source.
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

/// Formats the error for display, showing both kind and details.
///
/// Format: "{kind}: {details}"
impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}: {}", self.kind, self.error)
    }
}

/// Converts IO errors into appropriate error kinds.
///
/// Maps standard IO errors to their logical equivalents:
/// * `NotFound` -> `NotFound`
/// * `PermissionDenied` -> `PermissionDenied`
/// * `ConnectionReset` -> `Aborted`
/// * etc.
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match err.kind() {
            NotFound => Self::not_found(err),
            PermissionDenied => Self::permission_denied(err),
            AddrInUse | AlreadyExists => Self::already_exists(err),
            AddrNotAvailable | ConnectionRefused | NotConnected => Self::unavailable(err),
            BrokenPipe | ConnectionReset | ConnectionAborted => Self::aborted(err),
            Interrupted | WouldBlock => Self::cancelled(err),
            UnexpectedEof => Self::data_loss(err),
            TimedOut => Self::deadline_exceeded(err),
            InvalidInput | InvalidData => Self::invalid_argument(err),
            WriteZero => Self::resource_exhausted(err),
            _ => Self::unknown(err),
        }
    }
}

/// Converts HTTP client errors into appropriate error kinds.
///
/// Maps HTTP errors based on their nature:
/// * Body errors -> `DataLoss`
/// * Decode errors -> `InvalidArgument`
/// * Connect errors -> `Unavailable`
/// * Timeout errors -> `DeadlineExceeded`
/// * etc.
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::deadline_exceeded(err);
        }

        if err.is_body() {
            return Self::data_loss(err);
        }

        if err.is_decode() {
            return Self::invalid_argument(err);
        }

        if err.is_builder() {
            return Self::invalid_argument(err);
        }

        if err.is_connect() {
            return Self::unavailable(err);
        }

        if err.is_redirect() {
            return Self::resource_exhausted(err);
        }

        if let Some(status) = err.status() {
            return Self::from_status(status, err);
        }

        Self::unknown(err)
    }
}

/// Converts JSON errors through IO error mapping.
///
/// JSON errors are first converted to IO errors, then mapped
/// using the IO error conversion rules. Syntax and data errors end up as
/// `InvalidArgument`, which is how schema drift in catalog responses is
/// reported.
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        std::io::Error::from(err).into()
    }
}

/// Converts invalid header errors to `Internal`: header values are built
/// by this crate.
impl From<http::header::InvalidHeaderValue> for Error {
    fn from(e: http::header::InvalidHeaderValue) -> Self {
        Self::internal(e.to_string())
    }
}

/// Converts URL parsing errors to `InvalidArgument`.
///
/// URLs are parsed from catalog responses and user input, so a bad one is
/// bad input rather than a defect.
impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

/// Converts integer parsing errors to `InvalidArgument`.
impl From<std::num::ParseIntError> for Error {
    fn from(e: std::num::ParseIntError) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

/// Converts configuration file errors to `InvalidArgument`.
impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

/// Converts tagging errors into appropriate error kinds.
///
/// * IO errors -> mapped through the IO rules
/// * Unsupported files -> `Unimplemented`
/// * everything else -> `DataLoss`, as the file could not be understood
impl From<lofty::error::LoftyError> for Error {
    fn from(e: lofty::error::LoftyError) -> Self {
        use lofty::error::ErrorKind as Lofty;
        match e.kind() {
            Lofty::Io(io) => std::io::Error::new(io.kind(), e.to_string()).into(),
            Lofty::UnknownFormat | Lofty::UnsupportedTag => Self::unimplemented(e.to_string()),
            _ => Self::data_loss(e.to_string()),
        }
    }
}

/// Converts failed blocking tasks.
///
/// A panicking task is `Unknown` rather than `Internal`: it is confined to
/// the one file it worked on.
impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        if e.is_cancelled() {
            Self::cancelled(e.to_string())
        } else {
            Self::unknown(e.to_string())
        }
    }
}
