//! Multi-host client facade over a pool manager.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{Span, info, instrument};

use crate::cache::{ClientIdentity, ConnectionCache};
use crate::classify::{ErrorClass, Phase, run_classified, run_classified_async};
use crate::client::verb_methods;
use crate::error::{ConnectionTarget, Result};
use crate::message::{RequestArgs, RequestSpec, ResponseEnvelope};
use crate::method::Method;
use crate::options::{ClientOptions, DEFAULT_NUM_POOLS, PoolOverrides, Scheme};
use crate::transport::{Dispatch, ManagePools, ReqwestTransport, Transport};

/// Client routing requests for many hosts through one cached pool manager.
///
/// Verb methods take absolute URLs. Per-host pools can also be fetched with
/// [`connection_from_host`](Self::connection_from_host) and used directly.
#[derive(Debug)]
pub struct PoolManagerClient<T: Transport = ReqwestTransport> {
    identity: ClientIdentity,
    options: ClientOptions,
    transport: Arc<T>,
    cache: Arc<ConnectionCache<T::Manager>>,
}

impl<T: Transport> Clone for PoolManagerClient<T> {
    fn clone(&self) -> Self {
        Self {
            identity: self.identity.clone(),
            options: self.options.clone(),
            transport: Arc::clone(&self.transport),
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<T: Transport> PoolManagerClient<T> {
    pub fn new(
        identity: ClientIdentity,
        options: ClientOptions,
        transport: Arc<T>,
        cache: Arc<ConnectionCache<T::Manager>>,
    ) -> Self {
        Self {
            identity,
            options,
            transport,
            cache,
        }
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    pub fn client_options(&self) -> &ClientOptions {
        &self.options
    }

    /// Returns the cached manager, building it on first use.
    ///
    /// ## Errors
    ///
    /// Returns a [`ConnectionInit`](crate::HttpClientError::ConnectionInit)
    /// error prefixed with `Failed to initialize Pool Manager`.
    pub fn connection(&self) -> Result<Arc<T::Manager>> {
        self.cache
            .get_or_create(&self.identity, || self.init_connection())
    }

    fn init_connection(&self) -> Result<T::Manager> {
        let mut options = self.options.clone();
        options.num_pools.get_or_insert(DEFAULT_NUM_POOLS);
        info!(identity = %self.identity, num_pools = ?options.num_pools, "initializing pool manager");
        run_classified(
            Phase::ConnectionInit,
            ErrorClass::ConnectionInit(ConnectionTarget::PoolManager),
            || self.transport.open_manager(&options),
        )
    }

    /// Returns the pool for `scheme://host:port`.
    ///
    /// ## Errors
    ///
    /// Returns a [`Client`](crate::HttpClientError::Client) error prefixed with
    /// `Error getting connection from host {host}:{port}`.
    pub fn connection_from_host(
        &self,
        host: &str,
        port: Option<u16>,
        scheme: Scheme,
        overrides: Option<&PoolOverrides>,
    ) -> Result<Arc<T::Pool>> {
        let manager = self.connection()?;
        let port_label = port.map_or_else(|| "default".to_string(), |port| port.to_string());
        let context = format!("Error getting connection from host {host}:{port_label}");
        run_classified(Phase::ConnectionInit, ErrorClass::Client(&context), || {
            manager.connection_from_host(host, port, scheme, overrides)
        })
    }

    /// Returns the pool serving the origin of `url`.
    ///
    /// ## Errors
    ///
    /// Returns a [`Client`](crate::HttpClientError::Client) error prefixed with
    /// `Error getting connection from URL {url}`.
    pub fn connection_from_url(
        &self,
        url: &str,
        overrides: Option<&PoolOverrides>,
    ) -> Result<Arc<T::Pool>> {
        let manager = self.connection()?;
        let context = format!("Error getting connection from URL {url}");
        run_classified(Phase::ConnectionInit, ErrorClass::Client(&context), || {
            manager.connection_from_url(url, overrides)
        })
    }

    /// Closes every per-host pool. The manager stays usable.
    ///
    /// ## Errors
    ///
    /// Returns a [`Client`](crate::HttpClientError::Client) error prefixed with
    /// `Error clearing connection pools`.
    pub fn clear(&self) -> Result<()> {
        let manager = self.connection()?;
        run_classified(
            Phase::ConnectionInit,
            ErrorClass::Client("Error clearing connection pools"),
            || manager.clear(),
        )
    }

    /// Sends a request through the pool of the URL's origin.
    ///
    /// ## Errors
    ///
    /// Returns a [`Request`](crate::HttpClientError::Request) error for
    /// relative URLs and transport failures.
    #[instrument(
        name = "http_request",
        skip(self, args),
        fields(
            identity = %self.identity,
            http.method = %method,
            http.url = url,
            http.status_code = tracing::field::Empty,
        )
    )]
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        args: RequestArgs,
    ) -> Result<ResponseEnvelope> {
        let manager = self.connection()?;
        let spec = args.into_spec(method, url);
        let response = run_classified_async(
            Phase::Request { method, url },
            ErrorClass::Request,
            manager.request(spec),
        )
        .await?;
        Span::current().record("http.status_code", response.status);
        Ok(response)
    }

    /// Sends a request as is through the pool of the URL's origin.
    ///
    /// ## Errors
    ///
    /// Returns an [`UrlOpen`](crate::HttpClientError::UrlOpen) error when
    /// sending fails.
    #[instrument(
        name = "http_urlopen",
        skip(self, body, headers),
        fields(
            identity = %self.identity,
            http.method = %method,
            http.url = url,
            http.status_code = tracing::field::Empty,
        )
    )]
    pub async fn urlopen(
        &self,
        method: Method,
        url: &str,
        body: Option<Bytes>,
        headers: Vec<(String, String)>,
    ) -> Result<ResponseEnvelope> {
        let manager = self.connection()?;
        let mut spec = RequestSpec::new(method, url);
        spec.body = body;
        spec.headers = headers;
        let response = run_classified_async(
            Phase::Request { method, url },
            ErrorClass::UrlOpen,
            manager.urlopen(spec),
        )
        .await?;
        Span::current().record("http.status_code", response.status);
        Ok(response)
    }

    /// Sends a request with `method`; same as the matching verb method.
    ///
    /// ## Errors
    ///
    /// See [`request`](Self::request).
    pub async fn call(&self, method: Method, url: &str, args: RequestArgs) -> Result<ResponseEnvelope> {
        self.request(method, url, args).await
    }

    verb_methods! {
        /// Sends a GET request to an absolute URL.
        get => Get,
        /// Sends a POST request to an absolute URL.
        post => Post,
        /// Sends a PUT request to an absolute URL.
        put => Put,
        /// Sends a DELETE request to an absolute URL.
        delete => Delete,
        /// Sends a HEAD request to an absolute URL.
        head => Head,
        /// Sends an OPTIONS request to an absolute URL.
        options => Options,
        /// Sends a PATCH request to an absolute URL.
        patch => Patch,
        /// Sends a TRACE request to an absolute URL.
        trace => Trace,
    }

    /// Evicts and closes the manager with all of its pools.
    ///
    /// ## Errors
    ///
    /// Returns a [`Client`](crate::HttpClientError::Client) error when closing
    /// fails; the manager is evicted regardless.
    pub fn close(&self) -> Result<()> {
        self.cache.close(&self.identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientsConfig;
    use crate::error::{ErrorKind, HttpClientError};
    use crate::registry::Registry;
    use crate::transport::FailureKind;
    use crate::transport::scripted::ScriptedTransport;

    fn manager() -> (PoolManagerClient<ScriptedTransport>, ScriptedTransport) {
        let transport = ScriptedTransport::default();
        let registry = Registry::with_transport(transport.clone(), ClientsConfig::default());
        (registry.pool_manager("multi"), transport)
    }

    #[tokio::test]
    async fn test_manager_defaults_to_ten_pools() {
        let (manager, transport) = manager();
        manager.get("http://a.test/", RequestArgs::new()).await.unwrap();

        let opened = transport.script.opened_options.lock().unwrap();
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].num_pools, Some(DEFAULT_NUM_POOLS));
    }

    #[tokio::test]
    async fn test_clear_twice_keeps_manager_usable() {
        let (manager, transport) = manager();
        manager.clear().unwrap();
        manager.clear().unwrap();
        let response = manager.get("http://a.test/", RequestArgs::new()).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(transport.script.opened(), 1);
    }

    #[test]
    fn test_maintenance_failures_carry_context() {
        let (manager, _) = manager();
        let err = manager
            .connection_from_host("", Some(8080), Scheme::Http, None)
            .unwrap_err();
        assert!(matches!(err, HttpClientError::Client(_)));
        assert_eq!(
            err.to_string(),
            "Error getting connection from host :8080: Invalid connection parameters"
        );

        let err = manager.connection_from_url("ftp://a.test/", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownScheme);
        assert!(err.to_string().starts_with("Error getting connection from URL ftp://a.test/"));
    }

    #[test]
    fn test_clear_failure_is_a_client_error() {
        let (manager, transport) = manager();
        *transport.script.fail_close.lock().unwrap() = Some(FailureKind::Other);
        let err = manager.clear().unwrap_err();
        assert_eq!(err.to_string(), "Error clearing connection pools: Unexpected error");
    }

    #[tokio::test]
    async fn test_manager_init_failure() {
        let (manager, transport) = manager();
        *transport.script.fail_open.lock().unwrap() = Some(FailureKind::Value);
        let err = manager.get("http://a.test/", RequestArgs::new()).await.unwrap_err();
        assert!(matches!(err, HttpClientError::ConnectionInit(_)));
        assert_eq!(
            err.to_string(),
            "Failed to initialize Pool Manager: Invalid connection parameters"
        );
    }

    #[tokio::test]
    async fn test_pools_from_manager_are_usable_directly() {
        let (manager, transport) = manager();
        let overrides = PoolOverrides::new().header("X-Pool", "1");
        let pool = manager
            .connection_from_host("a.test", None, Scheme::Https, Some(&overrides))
            .unwrap();
        assert_eq!(
            pool.options.default_headers,
            Some(vec![("X-Pool".to_string(), "1".to_string())])
        );

        pool.request(RequestSpec::new(Method::Get, "/x")).await.unwrap();
        assert_eq!(transport.script.last_seen().unwrap().1.url, "/x");
    }
}
