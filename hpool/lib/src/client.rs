//! Single-host client facade.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{Span, info, instrument};

use crate::cache::{ClientIdentity, ConnectionCache};
use crate::classify::{ErrorClass, Phase, run_classified, run_classified_async};
use crate::error::{ConnectionTarget, Result};
use crate::message::{RequestArgs, RequestSpec, ResponseEnvelope};
use crate::method::Method;
use crate::options::ClientOptions;
use crate::transport::{Dispatch, ReqwestTransport, Transport};

/// Generates the per-verb convenience methods of a facade.
macro_rules! verb_methods {
    ($($(#[$doc:meta])* $name:ident => $method:ident),+ $(,)?) => {
        $(
            $(#[$doc])*
            ///
            /// ## Errors
            ///
            /// Returns a [`ConnectionInit`](crate::HttpClientError::ConnectionInit)
            /// error when the connection cannot be built and a
            /// [`Request`](crate::HttpClientError::Request) error when sending fails.
            pub async fn $name(&self, url: &str, args: RequestArgs) -> Result<ResponseEnvelope> {
                self.request(Method::$method, url, args).await
            }
        )+
    };
}
pub(crate) use verb_methods;

/// Client sending requests to one host through a shared connection pool.
///
/// Clients are cheap handles: the pool lives in the registry's cache under the
/// client's identity and is built on first use.
///
/// ## Examples
///
/// ```rust,no_run
/// use hpool_lib::{ClientOptions, ClientsConfig, Registry, RequestArgs};
///
/// # async fn run() -> hpool_lib::Result<()> {
/// let registry = Registry::new(ClientsConfig::default());
/// let client = registry.client_with_options("httpbin", ClientOptions::for_host("httpbin.org"));
///
/// let response = client.get("/get", RequestArgs::new().param("a", "1")).await?;
/// assert_eq!(response.status, 200);
/// client.close()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct HttpClient<T: Transport = ReqwestTransport> {
    identity: ClientIdentity,
    options: ClientOptions,
    transport: Arc<T>,
    cache: Arc<ConnectionCache<T::Pool>>,
}

impl<T: Transport> Clone for HttpClient<T> {
    fn clone(&self) -> Self {
        Self {
            identity: self.identity.clone(),
            options: self.options.clone(),
            transport: Arc::clone(&self.transport),
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<T: Transport> HttpClient<T> {
    pub fn new(
        identity: ClientIdentity,
        options: ClientOptions,
        transport: Arc<T>,
        cache: Arc<ConnectionCache<T::Pool>>,
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

    /// Options the pool is built from.
    pub fn client_options(&self) -> &ClientOptions {
        &self.options
    }

    /// Returns the cached pool, building it on first use.
    ///
    /// ## Errors
    ///
    /// Returns a [`ConnectionInit`](crate::HttpClientError::ConnectionInit)
    /// error prefixed with `Failed to initialize HTTP(S) Connection Pool`.
    pub fn connection(&self) -> Result<Arc<T::Pool>> {
        self.cache
            .get_or_create(&self.identity, || self.init_connection())
    }

    fn init_connection(&self) -> Result<T::Pool> {
        let target = ConnectionTarget::for_scheme(self.options.scheme);
        info!(identity = %self.identity, %target, host = ?self.options.host, "initializing connection");
        run_classified(Phase::ConnectionInit, ErrorClass::ConnectionInit(target), || {
            self.transport.open_pool(&self.options)
        })
    }

    /// Sends a request with `method`, applying the verb policy to `args.params`.
    ///
    /// ## Errors
    ///
    /// Returns a [`ConnectionInit`](crate::HttpClientError::ConnectionInit)
    /// error when the pool cannot be built and a
    /// [`Request`](crate::HttpClientError::Request) error when sending fails.
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
        let connection = self.connection()?;
        let spec = args.into_spec(method, url);
        let response = run_classified_async(
            Phase::Request { method, url },
            ErrorClass::Request,
            connection.request(spec),
        )
        .await?;
        Span::current().record("http.status_code", response.status);
        Ok(response)
    }

    /// Sends a request as is, without field encoding.
    ///
    /// ## Errors
    ///
    /// Returns a [`ConnectionInit`](crate::HttpClientError::ConnectionInit)
    /// error when the pool cannot be built and an
    /// [`UrlOpen`](crate::HttpClientError::UrlOpen) error when sending fails.
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
        let connection = self.connection()?;
        let mut spec = RequestSpec::new(method, url);
        spec.body = body;
        spec.headers = headers;
        let response = run_classified_async(
            Phase::Request { method, url },
            ErrorClass::UrlOpen,
            connection.urlopen(spec),
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
        /// Sends a GET request.
        get => Get,
        /// Sends a POST request.
        post => Post,
        /// Sends a PUT request.
        put => Put,
        /// Sends a DELETE request.
        delete => Delete,
        /// Sends a HEAD request.
        head => Head,
        /// Sends an OPTIONS request.
        options => Options,
        /// Sends a PATCH request.
        patch => Patch,
        /// Sends a TRACE request.
        trace => Trace,
    }

    /// Evicts and closes this identity's pool.
    ///
    /// The next request builds a new pool. Closing twice is fine.
    ///
    /// ## Errors
    ///
    /// Returns a [`Client`](crate::HttpClientError::Client) error when the
    /// transport fails to close; the pool is evicted regardless.
    pub fn close(&self) -> Result<()> {
        self.cache.close(&self.identity)
    }
}
