//! Error types for sqlrpc-exec.
//!
//! This module defines the error taxonomy of the execution engine, organized by
//! functional area. `ExecError` is what every statement operation returns;
//! `TransportError` and `ConfigError` are the layers it wraps.

use std::fmt;
use std::io;
use thiserror::Error;

/// Top-level error type returned by statement execution.
#[derive(Error, Debug)]
pub enum ExecError {
    /// Transport failure (I/O break or premature end of stream)
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Configuration errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Malformed frame, undecodable body, or INVALID confirmation
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// ERROR confirmation, surfaced verbatim
    #[error("Server error [{sql_state}, {vendor_code}]: {reason}")]
    Server {
        reason: String,
        sql_state: String,
        vendor_code: i32,
    },

    /// Client-side deadline exceeded. A failed kill attempt is kept as the source.
    #[error("Timeout of {timeout_secs} seconds exceeded")]
    Timeout {
        timeout_secs: u64,
        #[source]
        suppressed: Option<TransportError>,
    },

    /// Malformed meta-command text
    #[error("Syntax error: {0}")]
    Syntax(String),

    /// More unquoted markers than bound parameters
    #[error("Invalid parameter marker: no value bound for marker {index}")]
    InvalidParameterMarker { index: usize },

    /// Operation or parameter type outside the supported surface
    #[error("Unsupported feature: {0}")]
    Unsupported(String),

    /// The call was cancelled before it produced a result
    #[error("Query cancelled")]
    Cancelled,

    /// A query-bearing request was issued while a result set is still open
    #[error("Previous result set is still open")]
    ResultSetStillOpen,

    /// Invalid statement state
    #[error("Invalid statement state: {0}")]
    InvalidState(String),

    /// Invalid argument passed by the caller
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Call on a closed statement
    #[error("Statement is closed")]
    Closed,
}

/// Errors raised by the byte transport.
///
/// Every variant triggers the reconnect-and-retry path of the failover controller.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Network I/O error
    #[error("Network I/O error: {0}")]
    Io(#[from] io::Error),

    /// Stream ended before a full frame was read
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// No transport is currently established
    #[error("Not connected")]
    NotConnected,

    /// Failed to establish (or re-establish) the transport
    #[error("Failed to connect to {host}:{port}: {message}")]
    ConnectionFailed {
        host: String,
        port: u16,
        message: String,
    },

    /// Connect attempt did not complete in time
    #[error("Connection timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// Errors related to statement configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Connection string parsing error
    #[error("Failed to parse connection string: {0}")]
    ParseError(String),

    /// Invalid configuration value
    #[error("Invalid parameter '{parameter}': {message}")]
    InvalidParameter { parameter: String, message: String },
}

/// A WARNING confirmation accumulated on the statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerWarning {
    pub reason: String,
    pub sql_state: String,
    pub vendor_code: i32,
}

impl fmt::Display for ServerWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Warning [{}, {}]: {}",
            self.sql_state, self.vendor_code, self.reason
        )
    }
}

/// Coarse classification of an [`ExecError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Protocol,
    Server,
    Transport,
    Timeout,
    Syntax,
    Unsupported,
    Cancelled,
    InvalidState,
    InvalidArgument,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Protocol => write!(f, "PROTOCOL"),
            ErrorKind::Server => write!(f, "SERVER"),
            ErrorKind::Transport => write!(f, "TRANSPORT"),
            ErrorKind::Timeout => write!(f, "TIMEOUT"),
            ErrorKind::Syntax => write!(f, "SYNTAX"),
            ErrorKind::Unsupported => write!(f, "UNSUPPORTED"),
            ErrorKind::Cancelled => write!(f, "CANCELLED"),
            ErrorKind::InvalidState => write!(f, "INVALID_STATE"),
            ErrorKind::InvalidArgument => write!(f, "INVALID_ARGUMENT"),
        }
    }
}

impl ExecError {
    /// Map to the coarse error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecError::Transport(_) => ErrorKind::Transport,
            ExecError::Config(_) => ErrorKind::InvalidArgument,
            ExecError::Protocol(_) => ErrorKind::Protocol,
            ExecError::Server { .. } => ErrorKind::Server,
            ExecError::Timeout { .. } => ErrorKind::Timeout,
            ExecError::Syntax(_) | ExecError::InvalidParameterMarker { .. } => ErrorKind::Syntax,
            ExecError::Unsupported(_) => ErrorKind::Unsupported,
            ExecError::Cancelled => ErrorKind::Cancelled,
            ExecError::ResultSetStillOpen | ExecError::InvalidState(_) | ExecError::Closed => {
                ErrorKind::InvalidState
            }
            ExecError::InvalidArgument(_) => ErrorKind::InvalidArgument,
        }
    }

    /// SQLSTATE-style code for this error.
    ///
    /// Server errors report the state sent by the server; everything else maps
    /// to a fixed client-side state.
    pub fn sql_state(&self) -> &str {
        match self {
            ExecError::Server { sql_state, .. } => sql_state,
            ExecError::Transport(_) => "08006",
            ExecError::Protocol(_) => "08P01",
            ExecError::Timeout { .. } => "HYT00",
            ExecError::Syntax(_) => "42601",
            ExecError::InvalidParameterMarker { .. } => "07001",
            ExecError::Unsupported(_) => "0A000",
            ExecError::Cancelled => "00000",
            ExecError::ResultSetStillOpen => "24000",
            ExecError::Closed | ExecError::InvalidState(_) => "HY010",
            ExecError::InvalidArgument(_) | ExecError::Config(_) => "HY024",
        }
    }

    /// Whether this error is a transport failure eligible for reconnect-and-retry.
    pub fn is_transport(&self) -> bool {
        matches!(self, ExecError::Transport(_))
    }

    pub(crate) fn server(reason: &str, sql_state: &str, vendor_code: i32) -> Self {
        ExecError::Server {
            reason: reason.to_string(),
            sql_state: sql_state.to_string(),
            vendor_code,
        }
    }
}

impl From<io::Error> for ExecError {
    fn from(err: io::Error) -> Self {
        ExecError::Transport(TransportError::from(err))
    }
}
