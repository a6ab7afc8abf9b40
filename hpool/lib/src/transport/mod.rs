//! Transport seam between the client facades and the HTTP implementation.
//!
//! The facades never talk to `reqwest` directly. They go through three small
//! traits:
//!
//! - [`Transport`] - builds single-host pools and pool managers from
//!   [`ClientOptions`]
//! - [`Dispatch`] - sends requests (`request` encodes fields, `urlopen` does
//!   not) and closes the underlying resource
//! - [`ManagePools`] - routes many hosts through per-host pools
//!
//! Every low-level problem is reported as a [`TransportFailure`], whose
//! [`FailureKind`] is what the classifier maps onto the public error taxonomy.
//! [`ReqwestTransport`] is the production implementation.

use std::error::Error as StdError;
use std::fmt;
#[allow(
    redundant_imports,
    reason = "Future needed for RPITIT despite being in Edition 2024 prelude"
)]
use std::future::Future;
use std::sync::Arc;

use strum::Display;
use thiserror::Error;

use crate::message::{RequestSpec, ResponseEnvelope};
use crate::options::{ClientOptions, PoolOverrides, Scheme};

mod manager;
mod pool;
pub mod retry;
#[cfg(test)]
pub(crate) mod scripted;

pub use manager::ReqwestManager;
pub use pool::{ReqwestPool, ReqwestTransport};

/// Boxed error used as the original cause of a [`TransportFailure`].
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Low-level failure categories reported by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    /// Malformed host, URL or location.
    LocationValue,
    /// Invalid argument value (header, option, field combination).
    Value,
    /// URL scheme other than `http`/`https`.
    SchemeUnknown,
    /// Unspecified timeout.
    Timeout,
    /// Timed out while connecting.
    ConnectTimeout,
    /// Timed out while waiting for the response.
    ReadTimeout,
    /// TLS negotiation or certificate failure.
    Ssl,
    /// Proxy failure.
    Proxy,
    /// The pool was closed.
    ClosedPool,
    /// No connection became available in time.
    EmptyPool,
    /// The pool refused another connection.
    FullPool,
    /// A new connection could not be established.
    NewConnection,
    /// The request targeted another host than the pool, or a redirect went astray.
    HostChanged,
    /// The retry policy gave up.
    MaxRetry,
    /// The peer violated the HTTP protocol.
    Protocol,
    /// Any other transport-level HTTP failure.
    Http,
    /// Something the transport did not recognize.
    Other,
}

/// A failure reported by a transport, carrying the original cause.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TransportFailure {
    kind: FailureKind,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl TransportFailure {
    /// Creates a failure without an underlying cause.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attaches the original cause.
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Failure for an operation on a closed pool.
    pub fn closed_pool() -> Self {
        Self::new(FailureKind::ClosedPool, "Pool is closed.")
    }

    /// Returns the failure category.
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    /// Returns the failure message without the cause.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns `true` for failures a retry policy may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            FailureKind::NewConnection
                | FailureKind::Timeout
                | FailureKind::ConnectTimeout
                | FailureKind::ReadTimeout
        )
    }
}

impl From<reqwest::Error> for TransportFailure {
    fn from(error: reqwest::Error) -> Self {
        let kind = if error.is_timeout() {
            if error.is_connect() {
                FailureKind::ConnectTimeout
            } else {
                FailureKind::ReadTimeout
            }
        } else if mentions_tls(&error) {
            FailureKind::Ssl
        } else if error.is_connect() {
            FailureKind::NewConnection
        } else if error.is_builder() {
            if error.to_string().contains("scheme") {
                FailureKind::SchemeUnknown
            } else {
                FailureKind::Value
            }
        } else if error.is_redirect() {
            FailureKind::HostChanged
        } else if error.is_body() || error.is_decode() {
            FailureKind::Protocol
        } else {
            FailureKind::Http
        };
        Self::new(kind, error.to_string()).with_source(error)
    }
}

/// Looks for TLS trouble anywhere in the cause chain; reqwest has no dedicated flag.
fn mentions_tls(error: &(dyn StdError + 'static)) -> bool {
    let mut cause = error.source();
    while let Some(current) = cause {
        let text = current.to_string().to_ascii_lowercase();
        if text.contains("certificate") || text.contains("tls") || text.contains("handshake") {
            return true;
        }
        cause = current.source();
    }
    false
}

/// A connection object able to send requests.
pub trait Dispatch: Send + Sync + fmt::Debug + 'static {
    /// Sends a request, encoding `spec.fields` the way the verb expects.
    fn request(
        &self,
        spec: RequestSpec,
    ) -> impl Future<Output = Result<ResponseEnvelope, TransportFailure>> + Send;

    /// Sends a request as is; `spec.fields` is ignored.
    fn urlopen(
        &self,
        spec: RequestSpec,
    ) -> impl Future<Output = Result<ResponseEnvelope, TransportFailure>> + Send;

    /// Releases the underlying connections.
    ///
    /// ## Errors
    ///
    /// Returns a failure if the transport could not release its resources.
    fn close(&self) -> Result<(), TransportFailure>;
}

/// A router over per-host pools.
pub trait ManagePools: Dispatch {
    /// Pool type handed out per host.
    type Pool: Dispatch;

    /// Returns the pool for `scheme://host:port`, creating it when needed.
    ///
    /// ## Errors
    ///
    /// Returns a failure for an empty host or when the pool cannot be built.
    fn connection_from_host(
        &self,
        host: &str,
        port: Option<u16>,
        scheme: Scheme,
        overrides: Option<&PoolOverrides>,
    ) -> Result<Arc<Self::Pool>, TransportFailure>;

    /// Returns the pool serving the origin of `url`.
    ///
    /// ## Errors
    ///
    /// Returns a failure for unparsable URLs, unknown schemes or missing hosts.
    fn connection_from_url(
        &self,
        url: &str,
        overrides: Option<&PoolOverrides>,
    ) -> Result<Arc<Self::Pool>, TransportFailure>;

    /// Closes and drops every pool. Calling it again is a no-op.
    ///
    /// ## Errors
    ///
    /// Returns a failure if a pool could not be closed.
    fn clear(&self) -> Result<(), TransportFailure>;
}

/// Factory for connection objects.
pub trait Transport: Send + Sync + fmt::Debug + 'static {
    /// Single-host pool type.
    type Pool: Dispatch;
    /// Multi-host pool manager type.
    type Manager: ManagePools<Pool = Self::Pool>;

    /// Builds a single-host pool. `options.host` is required.
    ///
    /// ## Errors
    ///
    /// Returns a failure when the options cannot produce a pool.
    fn open_pool(&self, options: &ClientOptions) -> Result<Self::Pool, TransportFailure>;

    /// Builds a pool manager.
    ///
    /// ## Errors
    ///
    /// Returns a failure when the options cannot produce a manager.
    fn open_manager(&self, options: &ClientOptions) -> Result<Self::Manager, TransportFailure>;
}
