use std::io;
use thiserror::Error;

use crate::http::Method;

/// Errors produced while reading a request off a connection.
///
/// Any of these aborts the connection with a `500 Internal Server Error`;
/// nothing is retried.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The stream ended before a `\r\n` terminator was seen
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// The line ended in a bare `\n`
    #[error("line is not terminated by CRLF")]
    MissingCrlf,

    /// The request line was shorter than its terminator
    #[error("request line too short")]
    LineTooShort,

    /// The request line or a header line was not valid UTF-8
    #[error("line is not valid utf-8")]
    InvalidUtf8,

    /// The request line did not split into method, path and version
    #[error("malformed request line: {0:?}")]
    MalformedRequestLine(String),

    /// A header line had no `name: value` shape (strict body policy only)
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),

    /// `Content-Length` was not a non-negative integer (strict body policy only)
    #[error("invalid content-length: {0:?}")]
    InvalidContentLength(String),

    /// The stream ended before the declared body was read (strict body policy only)
    #[error("body truncated: expected {expected} bytes, received {received}")]
    TruncatedBody { expected: usize, received: usize },

    /// Wrapper for standard I/O errors
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised while building the route tree.
///
/// These are configuration mistakes; the startup sequence is expected to
/// abort on them rather than serve a partial tree.
#[derive(Debug, Error)]
pub enum RouteError {
    /// The same method was bound twice to the same path shape
    #[error("route already exists: {method} {path}")]
    DuplicateRoute { method: Method, path: String },

    /// A different wildcard name already occupies this position
    #[error("conflicting parameter names in {path}: {{{existing}}} and {{{requested}}}")]
    ConflictingParam {
        existing: String,
        requested: String,
        path: String,
    },

    /// A `{}` segment with no name
    #[error("empty parameter name in {path}")]
    EmptyParamName { path: String },

    /// The same parameter name appears twice in one path
    #[error("parameter {{{name}}} appears more than once in {path}")]
    RepeatedParam { name: String, path: String },
}

/// Errors that stop the server from starting or accepting.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Error binding the listening socket
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    /// Error when spawning a connection worker fails
    #[error("thread spawn failed: {0}")]
    ThreadSpawn(io::Error),

    /// Error when a mutex lock becomes poisoned due to a panic in another thread
    #[error("mutex lock poisoned")]
    LockPoisoned,

    /// Route registration failed during startup
    #[error("route registration failed: {0}")]
    Route(#[from] RouteError),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Wrapper for standard I/O errors
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Type alias for Results using ServerError as the error type
pub type Result<T> = std::result::Result<T, ServerError>;

/// Type alias for Results using ParseError as the error type
pub type ParseResult<T> = std::result::Result<T, ParseError>;
