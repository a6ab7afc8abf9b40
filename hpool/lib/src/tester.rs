//! Interactive API tester.
//!
//! Builds a request from free-form text fields, runs it through a pooled
//! client and renders the decoded response. Errors never escape
//! [`ApiTester::run`]; they end up in [`TesterReport::error`].

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, instrument, warn};
use url::Url;

use crate::cache::ClientIdentity;
use crate::classify::{ErrorClass, Phase, run_classified};
use crate::decode::{DecodedResponse, decode};
use crate::error::{HttpClientError, Result};
use crate::message::{Fields, RequestArgs, ResponseEnvelope};
use crate::method::Method;
use crate::options::{DEFAULT_NUM_POOLS, Scheme};
use crate::registry::Registry;
use crate::transport::{FailureKind, ReqwestTransport, Transport, TransportFailure};

/// Splits `text` into `key{splitter}value` pairs separated by `delimiter`.
///
/// Lines without `splitter` are ignored; keys and values are trimmed and
/// later keys override earlier ones.
///
/// ## Examples
///
/// ```rust
/// use hpool_lib::tester::parse_pairs;
///
/// let headers = parse_pairs("Accept: text/plain\nbogus\nX-Id: 1\n", ':', '\n');
/// assert_eq!(headers.get("Accept"), Some("text/plain"));
/// assert_eq!(headers.len(), 2);
/// ```
pub fn parse_pairs(text: &str, splitter: char, delimiter: char) -> Fields {
    text.trim()
        .split(delimiter)
        .filter_map(|line| line.split_once(splitter))
        .map(|(key, value)| (key.trim(), value.trim()))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

/// Free-form request description.
#[derive(Debug, Clone, PartialEq)]
pub struct TesterForm {
    pub url: String,
    pub method: Method,
    /// `key=value` lines.
    pub params: Option<String>,
    /// `Key: Value` lines.
    pub headers: Option<String>,
    pub body: Option<String>,
}

impl TesterForm {
    /// GET request to `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::Get,
            params: None,
            headers: None,
            body: None,
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_params(mut self, params: impl Into<String>) -> Self {
        self.params = Some(params.into());
        self
    }

    pub fn with_headers(mut self, headers: impl Into<String>) -> Self {
        self.headers = Some(headers.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Parsed params, headers and body.
    pub fn request_args(&self) -> RequestArgs {
        let mut args = RequestArgs::new();
        if let Some(headers) = &self.headers {
            for (name, value) in parse_pairs(headers, ':', '\n').iter() {
                args = args.header(name, value);
            }
        }
        if let Some(params) = self.params.as_deref().map(|p| parse_pairs(p, '=', '\n')) {
            if !params.is_empty() {
                args = args.params(params);
            }
        }
        if let Some(body) = self.body.as_deref().filter(|body| !body.is_empty()) {
            args = args.body(body.to_string());
        }
        args
    }
}

/// Outcome of one tester run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TesterReport {
    pub status: Option<u16>,
    /// `Key: value` per line.
    pub headers_text: String,
    pub content_type: Option<String>,
    pub payload: Option<DecodedResponse>,
    pub error: Option<String>,
}

impl TesterReport {
    pub fn from_response(envelope: &ResponseEnvelope) -> Self {
        Self {
            status: Some(envelope.status),
            headers_text: envelope.headers_text(),
            content_type: envelope.content_type().map(str::to_string),
            payload: Some(decode(envelope)),
            error: None,
        }
    }

    pub fn from_error(error: &HttpClientError) -> Self {
        Self {
            error: Some(error.record().detailed()),
            ..Self::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Text shown for the payload. Empty payloads show `No response`.
    pub fn display(&self) -> String {
        if let Some(error) = &self.error {
            return format!("Error: {error}");
        }
        match &self.payload {
            Some(DecodedResponse::Json { text, .. } | DecodedResponse::Text { text })
                if !text.is_empty() =>
            {
                text.clone()
            }
            Some(DecodedResponse::Binary { bytes, filename }) if !bytes.is_empty() => {
                format!("Binary content: {filename}")
            }
            Some(DecodedResponse::Html { text }) if !text.is_empty() => {
                "HTML content (see HTML tab)".to_string()
            }
            _ => "No response".to_string(),
        }
    }
}

/// Callbacks around a tester run.
pub trait TesterHooks: Send + Sync {
    /// Runs before the request; returning a report skips the request.
    fn before_request(&self, _form: &TesterForm) -> Option<TesterReport> {
        None
    }

    /// Runs on every report, including error reports.
    fn after_response(&self, _report: &mut TesterReport) {}
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl TesterHooks for NoHooks {}

/// Origin and path extracted from a tester URL.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    scheme: Scheme,
    host: String,
    port: Option<u16>,
    path: String,
}

impl Target {
    fn parse(raw: &str) -> std::result::Result<Self, TransportFailure> {
        let raw = raw.trim();
        let candidate = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("http://{raw}")
        };
        let url = Url::parse(&candidate).map_err(|e| {
            TransportFailure::new(FailureKind::LocationValue, format!("Invalid URL {raw}: {e}"))
                .with_source(e)
        })?;
        let scheme = url.scheme().parse::<Scheme>().map_err(|_| {
            TransportFailure::new(
                FailureKind::SchemeUnknown,
                format!("Not supported URL scheme {}", url.scheme()),
            )
        })?;
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| TransportFailure::new(FailureKind::LocationValue, "No host specified."))?;

        let mut path = url.path().to_string();
        if path.is_empty() {
            path.push('/');
        }
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }
        Ok(Self {
            scheme,
            host: host.to_string(),
            port: url.port(),
            path,
        })
    }

    fn identity(&self) -> ClientIdentity {
        let port = self.port.unwrap_or_else(|| self.scheme.default_port());
        ClientIdentity::new(format!("tester:{}://{}:{port}", self.scheme, self.host))
    }
}

/// Runs [`TesterForm`]s through pooled clients, one pool per origin.
///
/// At most `max_origins` pools are kept; the least recently used origin's
/// pool is closed when a new origin would exceed the limit.
///
/// ## Examples
///
/// ```rust,no_run
/// use hpool_lib::{ApiTester, Method, Registry, TesterForm};
///
/// # async fn run() {
/// let tester = ApiTester::new(Registry::default());
/// let form = TesterForm::new("https://httpbin.org/post")
///     .with_method(Method::Post)
///     .with_params("a=1")
///     .with_headers("Accept: application/json");
/// let report = tester.run(&form).await;
/// println!("{}", report.display());
/// # }
/// ```
pub struct ApiTester<T: Transport = ReqwestTransport> {
    registry: Registry<T>,
    hooks: Arc<dyn TesterHooks>,
    max_origins: usize,
    origins: Mutex<VecDeque<ClientIdentity>>,
}

impl<T: Transport> fmt::Debug for ApiTester<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiTester")
            .field("registry", &self.registry)
            .field("max_origins", &self.max_origins)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> ApiTester<T> {
    pub fn new(registry: Registry<T>) -> Self {
        Self {
            registry,
            hooks: Arc::new(NoHooks),
            max_origins: DEFAULT_NUM_POOLS,
            origins: Mutex::new(VecDeque::new()),
        }
    }

    /// Limits how many origins keep an open pool. Zero is treated as one.
    pub fn with_max_origins(mut self, max_origins: usize) -> Self {
        self.max_origins = max_origins.max(1);
        self
    }

    pub fn with_hooks(mut self, hooks: impl TesterHooks + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn registry(&self) -> &Registry<T> {
        &self.registry
    }

    /// Closes the pool of every origin this tester has used.
    ///
    /// ## Errors
    ///
    /// Returns the first [`Client`](crate::HttpClientError::Client) error;
    /// every pool is evicted regardless.
    pub fn close(&self) -> Result<()> {
        let origins: Vec<_> = self.origins().drain(..).collect();
        let mut first_error = None;
        for identity in origins {
            if let Err(e) = self.registry.pools().close(&identity) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn origins(&self) -> MutexGuard<'_, VecDeque<ClientIdentity>> {
        self.origins.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks `identity` as most recently used and closes origins over the limit.
    fn touch(&self, identity: &ClientIdentity) {
        let evicted: Vec<_> = {
            let mut origins = self.origins();
            origins.retain(|known| known != identity);
            origins.push_back(identity.clone());
            let excess = origins.len().saturating_sub(self.max_origins);
            origins.drain(..excess).collect()
        };
        for identity in evicted {
            debug!(%identity, "closing least recently used tester origin");
            if let Err(e) = self.registry.pools().close(&identity) {
                warn!(%identity, error = %e, "failed to close tester origin");
            }
        }
    }

    /// Runs `form` and reports the outcome.
    #[instrument(skip(self, form), fields(http.method = %form.method, http.url = %form.url))]
    pub async fn run(&self, form: &TesterForm) -> TesterReport {
        if let Some(report) = self.hooks.before_request(form) {
            debug!("request short-circuited by hook");
            return report;
        }
        let mut report = match self.execute(form).await {
            Ok(envelope) => TesterReport::from_response(&envelope),
            Err(error) => TesterReport::from_error(&error),
        };
        self.hooks.after_response(&mut report);
        report
    }

    async fn execute(&self, form: &TesterForm) -> Result<ResponseEnvelope> {
        let target = run_classified(
            Phase::ConnectionInit,
            ErrorClass::Client("Invalid tester URL"),
            || Target::parse(&form.url),
        )?;
        let identity = target.identity();
        self.touch(&identity);

        let mut options = self.registry.options_for(&identity);
        options.host = Some(target.host.clone());
        options.port = target.port;
        options.scheme = target.scheme;

        let client = self.registry.client_with_options(identity, options);
        client
            .request(form.method, &target.path, form.request_args())
            .await
    }
}
