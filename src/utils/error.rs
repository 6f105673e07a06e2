//! Error types for rethinkdb-exporter

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level application error
#[derive(Error, Debug)]
pub enum ExporterError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Metric {metric} seen with labels [{actual}], first seen with [{expected}]")]
    LabelShape {
        metric: String,
        expected: String,
        actual: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ExporterError {
    /// True when the transport reported that the connection went away
    /// mid-query. This is the only error the session retries.
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, ExporterError::Connection(ConnectionError::Closed))
    }

    /// True for failures of the socket itself, after which a connection
    /// must not be reused.
    pub fn is_connection_level(&self) -> bool {
        matches!(self, ExporterError::Connection(_) | ExporterError::Io(_))
    }

    /// True when the server answered the query with a ReQL error. The
    /// connection stays in sync and can be reused.
    pub fn is_query_error(&self) -> bool {
        matches!(
            self,
            ExporterError::Protocol(
                ProtocolError::ClientError(_)
                    | ProtocolError::CompileError(_)
                    | ProtocolError::RuntimeError(_)
            )
        )
    }

    /// Classify a socket error raised while a query was in flight.
    pub fn from_socket(err: io::Error, timeout_ms: u64) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected => ConnectionError::Closed.into(),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
                ConnectionError::Timeout(timeout_ms).into()
            }
            _ => ExporterError::Io(err),
        }
    }
}

/// Connection-related errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Failed to connect to {addr}: {source}")]
    ConnectFailed { addr: String, source: io::Error },

    #[error("No cluster addresses configured")]
    NoAddresses,

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("TLS handshake failed: {0}")]
    TlsFailed(String),

    #[error("Connection closed")]
    Closed,

    #[error("Connection timeout after {0}ms")]
    Timeout(u64),
}

/// ReQL protocol errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Response token {actual} does not match query token {expected}")]
    TokenMismatch { expected: u64, actual: u64 },

    #[error("Unexpected response type {0}")]
    UnexpectedResponse(i64),

    #[error("Client error: {0}")]
    ClientError(String),

    #[error("Compile error: {0}")]
    CompileError(String),

    #[error("Runtime error: {0}")]
    RuntimeError(String),
}

/// TLS credential loading errors
#[derive(Error, Debug)]
pub enum TlsError {
    #[error("cert file and key file must be both specified")]
    PartialKeyPair,

    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("invalid CA certificate: {0}")]
    InvalidCa(String),

    #[error("invalid client identity: {0}")]
    InvalidIdentity(String),

    #[error("TLS support not compiled in")]
    Unsupported,
}

pub type Result<T> = std::result::Result<T, ExporterError>;
