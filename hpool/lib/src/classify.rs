//! Maps transport failures onto [`ErrorKind`]s and facade errors.
//!
//! The mapping is a fixed rule table. Each rule has two messages: one for
//! failures while a connection object is built, one for failures while a
//! request is sent (suffixed with `for {METHOD} {URL}`).

use std::future::Future;

use tracing::error;

use crate::error::{ConnectionTarget, ErrorKind, ErrorRecord, HttpClientError};
use crate::method::Method;
use crate::transport::{FailureKind, TransportFailure};

/// Operation during which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase<'a> {
    /// Building a pool or pool manager, or a maintenance call.
    ConnectionInit,
    /// Sending a request.
    Request { method: Method, url: &'a str },
}

/// Facade error variant a classified record is wrapped in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass<'a> {
    /// Prefixes the message with `Failed to initialize {target}`.
    ConnectionInit(ConnectionTarget),
    Request,
    UrlOpen,
    /// Prefixes the message with the given context.
    Client(&'a str),
}

impl ErrorClass<'_> {
    pub fn wrap(self, record: ErrorRecord) -> HttpClientError {
        match self {
            Self::ConnectionInit(target) => HttpClientError::ConnectionInit(
                record.with_context(&format!("Failed to initialize {target}")),
            ),
            Self::Request => HttpClientError::Request(record),
            Self::UrlOpen => HttpClientError::UrlOpen(record),
            Self::Client(context) => HttpClientError::Client(record.with_context(context)),
        }
    }
}

/// Maps a low-level failure category onto its [`ErrorKind`].
pub fn kind_of(failure: FailureKind) -> ErrorKind {
    match failure {
        FailureKind::LocationValue | FailureKind::Value => ErrorKind::InvalidParameters,
        FailureKind::SchemeUnknown => ErrorKind::UnknownScheme,
        FailureKind::Timeout | FailureKind::ConnectTimeout | FailureKind::ReadTimeout => {
            ErrorKind::Timeout
        }
        FailureKind::Ssl | FailureKind::Proxy => ErrorKind::TlsOrProxyError,
        FailureKind::ClosedPool | FailureKind::EmptyPool | FailureKind::FullPool => {
            ErrorKind::PoolExhausted
        }
        FailureKind::NewConnection => ErrorKind::ConnectionFailed,
        FailureKind::HostChanged => ErrorKind::HostChanged,
        FailureKind::MaxRetry => ErrorKind::MaxRetriesExceeded,
        FailureKind::Protocol => ErrorKind::ProtocolError,
        FailureKind::Http => ErrorKind::TransportHttpError,
        FailureKind::Other => ErrorKind::Unexpected,
    }
}

fn connection_message(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::InvalidParameters => "Invalid connection parameters",
        ErrorKind::UnknownScheme => "Unknown URL scheme",
        ErrorKind::Timeout => "Connection timeout",
        ErrorKind::TlsOrProxyError => "SSL or proxy error",
        ErrorKind::PoolExhausted => "Pool error",
        ErrorKind::ConnectionFailed => "Failed to establish a new connection",
        ErrorKind::HostChanged => "Host changed error",
        ErrorKind::MaxRetriesExceeded => "Max retries exceeded",
        ErrorKind::ProtocolError => "Protocol error",
        ErrorKind::TransportHttpError => "HTTP error",
        ErrorKind::Unexpected => "Unexpected error",
    }
}

fn request_message(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::InvalidParameters => "Invalid request parameters",
        ErrorKind::Timeout => "Request timeout",
        ErrorKind::ConnectionFailed => "Connection error",
        other => connection_message(other),
    }
}

/// Classifies `cause` and logs the result.
pub fn classify(cause: TransportFailure, phase: Phase<'_>) -> ErrorRecord {
    let kind = kind_of(cause.kind());
    let message = match phase {
        Phase::ConnectionInit => connection_message(kind).to_string(),
        Phase::Request { method, url } => {
            format!("{} for {method} {url}", request_message(kind))
        }
    };
    error!(error.kind = %kind, cause = %cause, "{message}");
    ErrorRecord::new(kind, message, Some(cause))
}

/// Runs a synchronous transport call, classifying its failure.
///
/// ## Errors
///
/// Returns the classified failure wrapped per `class`.
pub fn run_classified<T>(
    phase: Phase<'_>,
    class: ErrorClass<'_>,
    operation: impl FnOnce() -> Result<T, TransportFailure>,
) -> Result<T, HttpClientError> {
    operation().map_err(|cause| class.wrap(classify(cause, phase)))
}

/// Async counterpart of [`run_classified`].
///
/// ## Errors
///
/// Returns the classified failure wrapped per `class`.
pub async fn run_classified_async<T>(
    phase: Phase<'_>,
    class: ErrorClass<'_>,
    operation: impl Future<Output = Result<T, TransportFailure>>,
) -> Result<T, HttpClientError> {
    operation
        .await
        .map_err(|cause| class.wrap(classify(cause, phase)))
}
