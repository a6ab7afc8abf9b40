//! Error types surfaced by the client facades.
//!
//! Every failure a caller sees is an [`HttpClientError`]. Its variant says
//! which operation failed; the wrapped [`ErrorRecord`] carries the normalized
//! [`ErrorKind`], a human-readable message and the original transport cause.

use strum::{Display, EnumIter};
use thiserror::Error;

use crate::options::Scheme;
use crate::transport::TransportFailure;

/// Normalized failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum ErrorKind {
    /// Malformed host, URL, header or field combination.
    InvalidParameters,
    /// URL scheme other than `http`/`https`.
    UnknownScheme,
    /// Connect, read or pool wait timeout.
    Timeout,
    /// TLS or proxy failure.
    TlsOrProxyError,
    /// Closed, empty or full pool.
    PoolExhausted,
    /// A new connection could not be established.
    ConnectionFailed,
    /// Request aimed at another host than the pool serves.
    HostChanged,
    /// Retry policy gave up.
    MaxRetriesExceeded,
    /// The peer violated the HTTP protocol.
    ProtocolError,
    /// Other transport-level HTTP failure.
    TransportHttpError,
    /// Anything else.
    Unexpected,
}

/// What kind of connection object failed to initialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ConnectionTarget {
    #[strum(serialize = "HTTP Connection Pool")]
    HttpPool,
    #[strum(serialize = "HTTPS Connection Pool")]
    HttpsPool,
    #[strum(serialize = "Pool Manager")]
    PoolManager,
}

impl ConnectionTarget {
    /// Single-host pool target for `scheme`.
    pub fn for_scheme(scheme: Scheme) -> Self {
        match scheme {
            Scheme::Http => Self::HttpPool,
            Scheme::Https => Self::HttpsPool,
        }
    }
}

/// A classified failure.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ErrorRecord {
    kind: ErrorKind,
    message: String,
    #[source]
    cause: Option<TransportFailure>,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, message: impl Into<String>, cause: Option<TransportFailure>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Transport failure this record was classified from.
    pub fn cause(&self) -> Option<&TransportFailure> {
        self.cause.as_ref()
    }

    /// Message followed by the original cause, for display to end users.
    pub fn detailed(&self) -> String {
        match &self.cause {
            Some(cause) => format!("{} - original error: {cause}", self.message),
            None => self.message.clone(),
        }
    }

    pub(crate) fn with_context(mut self, context: &str) -> Self {
        self.message = format!("{context}: {}", self.message);
        self
    }
}

/// Error returned by the client facades.
#[derive(Debug, Error)]
pub enum HttpClientError {
    /// A pool or pool manager could not be built.
    #[error(transparent)]
    ConnectionInit(ErrorRecord),

    /// `request` or one of the verb methods failed.
    #[error(transparent)]
    Request(ErrorRecord),

    /// `urlopen` failed.
    #[error(transparent)]
    UrlOpen(ErrorRecord),

    /// A maintenance operation (close, clear, pool lookup) failed.
    #[error(transparent)]
    Client(ErrorRecord),
}

impl HttpClientError {
    pub fn record(&self) -> &ErrorRecord {
        match self {
            Self::ConnectionInit(record)
            | Self::Request(record)
            | Self::UrlOpen(record)
            | Self::Client(record) => record,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.record().kind()
    }

    pub fn message(&self) -> &str {
        self.record().message()
    }

    pub fn cause(&self) -> Option<&TransportFailure> {
        self.record().cause()
    }
}

/// Result alias for facade operations.
pub type Result<T, E = HttpClientError> = std::result::Result<T, E>;
