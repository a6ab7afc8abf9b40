//! Single-host connection pool backed by `reqwest`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{Span, debug, instrument};
use url::Url;

use super::manager::ReqwestManager;
use super::retry::with_retries;
use super::{Dispatch, FailureKind, Transport, TransportFailure};
use crate::message::{RequestSpec, ResponseEnvelope};
use crate::options::{ClientOptions, RetryPolicy, Scheme};

/// Production [`Transport`] building `reqwest` backed pools.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReqwestTransport;

impl Transport for ReqwestTransport {
    type Pool = ReqwestPool;
    type Manager = ReqwestManager;

    fn open_pool(&self, options: &ClientOptions) -> Result<ReqwestPool, TransportFailure> {
        ReqwestPool::open(options)
    }

    fn open_manager(&self, options: &ClientOptions) -> Result<ReqwestManager, TransportFailure> {
        ReqwestManager::open(options)
    }
}

/// Connection pool bound to one `scheme://host:port` origin.
///
/// Requests take a slot out of `max_connections` permits for their duration.
/// When the pool is full, a blocking pool waits up to the configured timeout
/// for a slot; a non-blocking pool sends the request on an unretained
/// connection instead.
#[derive(Debug)]
pub struct ReqwestPool {
    client: reqwest::Client,
    origin: Url,
    permits: Arc<Semaphore>,
    block_when_full: bool,
    acquire_timeout: Option<Duration>,
    retries: RetryPolicy,
    closed: AtomicBool,
}

impl ReqwestPool {
    /// Builds a pool for `options.host`.
    ///
    /// ## Errors
    ///
    /// Returns a [`FailureKind::LocationValue`] failure for a missing or
    /// malformed host and a [`FailureKind::Value`] failure for invalid default
    /// headers.
    pub fn open(options: &ClientOptions) -> Result<Self, TransportFailure> {
        let host = options
            .host
            .as_deref()
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .ok_or_else(|| {
                TransportFailure::new(
                    FailureKind::LocationValue,
                    format!("No host specified for {} connection pool.", options.scheme),
                )
            })?;
        let origin = origin_url(options.scheme, host, options.port)?;
        let max_connections = options.max_connections.max(1);

        let default_headers = header_map(options.default_headers.as_deref().unwrap_or_default())?;
        let mut builder = reqwest::Client::builder()
            .default_headers(default_headers)
            .pool_max_idle_per_host(max_connections);
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout).connect_timeout(timeout);
        }
        let client = builder.build()?;

        debug!(%origin, max_connections, block = options.block_when_full, "opened connection pool");
        Ok(Self {
            client,
            origin,
            permits: Arc::new(Semaphore::new(max_connections)),
            block_when_full: options.block_when_full,
            acquire_timeout: options.timeout,
            retries: options.retries,
            closed: AtomicBool::new(false),
        })
    }

    /// Origin every request of this pool goes to.
    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Returns `true` once [`close`](Dispatch::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves a path against the origin; absolute URLs must share it.
    fn resolve(&self, url: &str) -> Result<Url, TransportFailure> {
        let resolved = match Url::parse(url) {
            Ok(absolute) => absolute,
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                self.origin.join(url).map_err(|e| {
                    TransportFailure::new(FailureKind::LocationValue, format!("Invalid URL {url}: {e}"))
                        .with_source(e)
                })?
            }
            Err(e) => {
                return Err(TransportFailure::new(
                    FailureKind::LocationValue,
                    format!("Invalid URL {url}: {e}"),
                )
                .with_source(e));
            }
        };

        if !self.is_same_host(&resolved) {
            return Err(TransportFailure::new(
                FailureKind::HostChanged,
                format!("Tried to open a foreign host with url: {url}"),
            ));
        }
        Ok(resolved)
    }

    fn is_same_host(&self, url: &Url) -> bool {
        url.scheme() == self.origin.scheme()
            && url.host_str() == self.origin.host_str()
            && url.port_or_known_default() == self.origin.port_or_known_default()
    }

    /// Takes a connection slot, honoring `block_when_full`.
    async fn acquire(&self) -> Result<Option<OwnedSemaphorePermit>, TransportFailure> {
        if self.is_closed() {
            return Err(TransportFailure::closed_pool());
        }

        if !self.block_when_full {
            return match Arc::clone(&self.permits).try_acquire_owned() {
                Ok(permit) => Ok(Some(permit)),
                Err(TryAcquireError::NoPermits) => {
                    debug!(origin = %self.origin, "pool is full, using an unretained connection");
                    Ok(None)
                }
                Err(TryAcquireError::Closed) => Err(TransportFailure::closed_pool()),
            };
        }

        let acquire = Arc::clone(&self.permits).acquire_owned();
        let permit = match self.acquire_timeout {
            Some(timeout) => tokio::time::timeout(timeout, acquire).await.map_err(|_| {
                TransportFailure::new(
                    FailureKind::EmptyPool,
                    "Pool reached maximum size and no more connections are allowed.",
                )
            })?,
            None => acquire.await,
        };
        permit
            .map(Some)
            .map_err(|_| TransportFailure::closed_pool())
    }

    async fn send_once(
        &self,
        url: &Url,
        spec: &RequestSpec,
        headers: &HeaderMap,
    ) -> Result<ResponseEnvelope, TransportFailure> {
        let mut request = self
            .client
            .request(spec.method.to_reqwest(), url.clone())
            .headers(headers.clone());
        if let Some(body) = &spec.body {
            request = request.body(body.clone());
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok(ResponseEnvelope {
            status,
            headers,
            body,
        })
    }
}

impl Dispatch for ReqwestPool {
    async fn request(&self, spec: RequestSpec) -> Result<ResponseEnvelope, TransportFailure> {
        let spec = spec.encode_fields()?;
        self.urlopen(spec).await
    }

    #[instrument(
        name = "pool_urlopen",
        skip(self, spec),
        fields(
            http.method = %spec.method,
            http.url = tracing::field::Empty,
            http.status_code = tracing::field::Empty,
        )
    )]
    async fn urlopen(&self, spec: RequestSpec) -> Result<ResponseEnvelope, TransportFailure> {
        let url = self.resolve(&spec.url)?;
        Span::current().record("http.url", url.as_str());
        let headers = header_map(&spec.headers)?;

        let _permit = self.acquire().await?;
        let response = with_retries(self.retries, url.as_str(), || {
            self.send_once(&url, &spec, &headers)
        })
        .await?;

        Span::current().record("http.status_code", response.status);
        Ok(response)
    }

    fn close(&self) -> Result<(), TransportFailure> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.permits.close();
            debug!(origin = %self.origin, "closed connection pool");
        }
        Ok(())
    }
}

fn origin_url(scheme: Scheme, host: &str, port: Option<u16>) -> Result<Url, TransportFailure> {
    let invalid = |reason: String| {
        TransportFailure::new(
            FailureKind::LocationValue,
            format!("Invalid host {host:?}: {reason}"),
        )
    };

    let mut origin = Url::parse(&format!("{scheme}://{host}")).map_err(|e| invalid(e.to_string()))?;
    if origin.host_str().is_none() || origin.path() != "/" || origin.query().is_some() {
        return Err(invalid("expected a bare host name".to_string()));
    }
    if let Some(port) = port {
        origin
            .set_port(Some(port))
            .map_err(|()| invalid(format!("cannot use port {port}")))?;
    }
    Ok(origin)
}

/// Validates header pairs into a [`HeaderMap`], later pairs replacing earlier ones.
pub(crate) fn header_map(pairs: &[(String, String)]) -> Result<HeaderMap, TransportFailure> {
    let mut headers = HeaderMap::with_capacity(pairs.len());
    for (name, value) in pairs {
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            TransportFailure::new(FailureKind::Value, format!("invalid header name {name:?}"))
                .with_source(e)
        })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| {
            TransportFailure::new(FailureKind::Value, format!("invalid value for header {name}"))
                .with_source(e)
        })?;
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}
