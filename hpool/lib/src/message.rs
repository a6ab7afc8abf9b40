//! Request and response values passed between the facades and the transport.

use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use serde::de::DeserializeOwned;
use url::form_urlencoded;

use crate::method::Method;
use crate::transport::{FailureKind, TransportFailure};

/// Content type used when `fields` are encoded into a request body.
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Ordered string key/value pairs used for form fields and query parameters.
///
/// Keys are unique: inserting an existing key replaces its value in place,
/// so the first-seen key order is kept while later values win.
///
/// ## Examples
///
/// ```rust
/// use hpool_lib::Fields;
///
/// let mut fields = Fields::from([("a", "1"), ("b", "2")]);
/// fields.merge(&Fields::from([("a", "9"), ("c", "3")]));
/// assert_eq!(fields.to_query_string(), "a=9&b=2&c=3");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Fields(Vec<(String, String)>);

impl Fields {
    /// Creates an empty set of fields.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a pair, replacing the value of an existing key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(existing, _)| *existing == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Returns the value stored for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    /// Merges `other` into `self`, with `other` winning on duplicate keys.
    pub fn merge(&mut self, other: &Fields) {
        for (key, value) in other.iter() {
            self.insert(key, value);
        }
    }

    /// Returns the number of pairs.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when there are no pairs.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Serializes the pairs as `application/x-www-form-urlencoded`.
    pub fn to_query_string(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.0.iter())
            .finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Fields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut fields = Fields::new();
        for (key, value) in iter {
            fields.insert(key, value);
        }
        fields
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for Fields {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

/// Splits `url` into the part before the query, the query and the fragment.
fn split_url(url: &str) -> (&str, Option<&str>, Option<&str>) {
    let (rest, fragment) = match url.split_once('#') {
        Some((rest, fragment)) => (rest, Some(fragment)),
        None => (url, None),
    };
    match rest.split_once('?') {
        Some((base, query)) => (base, Some(query), fragment),
        None => (rest, None, fragment),
    }
}

fn join_url(base: &str, query: &str, fragment: Option<&str>) -> String {
    let mut url = String::with_capacity(base.len() + query.len() + 2);
    url.push_str(base);
    if !query.is_empty() {
        url.push('?');
        url.push_str(query);
    }
    if let Some(fragment) = fragment {
        url.push('#');
        url.push_str(fragment);
    }
    url
}

/// Merges `params` into the query string of `url`.
///
/// The existing query is parsed into unique keys (last occurrence wins),
/// `params` override clashing keys and the result is re-serialized. Works
/// for absolute URLs as well as bare paths such as `/post?b=2`.
///
/// ## Examples
///
/// ```rust
/// use hpool_lib::{Fields, message::merge_query};
///
/// let url = merge_query("https://h/p?b=2&a=0", &Fields::from([("a", "1")]));
/// assert_eq!(url, "https://h/p?b=2&a=1");
/// ```
pub fn merge_query(url: &str, params: &Fields) -> String {
    if params.is_empty() {
        return url.to_string();
    }
    let (base, query, fragment) = split_url(url);
    let mut merged: Fields = form_urlencoded::parse(query.unwrap_or_default().as_bytes())
        .into_owned()
        .collect();
    merged.merge(params);
    join_url(base, &merged.to_query_string(), fragment)
}

/// Appends `fields` to the query string of `url`, keeping what is already there.
pub fn append_query(url: &str, fields: &Fields) -> String {
    if fields.is_empty() {
        return url.to_string();
    }
    let (base, query, fragment) = split_url(url);
    let encoded = fields.to_query_string();
    let query = match query {
        Some(existing) if !existing.is_empty() => {
            format!("{}&{encoded}", existing.trim_end_matches('&'))
        }
        _ => encoded,
    };
    join_url(base, &query, fragment)
}

/// A request as handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL or, for single-host pools, a path relative to the pool origin.
    pub url: String,
    /// Form fields, encoded by [`encode_fields`](Self::encode_fields).
    pub fields: Option<Fields>,
    /// Request headers in sending order.
    pub headers: Vec<(String, String)>,
    /// Raw request body.
    pub body: Option<Bytes>,
}

impl RequestSpec {
    /// Creates a request without fields, headers or body.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            fields: None,
            headers: Vec::new(),
            body: None,
        }
    }

    /// Returns the first header value named `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Encodes `fields` the way the verb expects.
    ///
    /// Verbs without a body get the fields appended to the URL query. Verbs
    /// with a body get them form-encoded as the body, which fails when a raw
    /// body was supplied as well.
    ///
    /// ## Errors
    ///
    /// Returns a [`FailureKind::Value`] failure when both fields and a body are
    /// given to a body-carrying verb.
    pub fn encode_fields(mut self) -> Result<Self, TransportFailure> {
        let Some(fields) = self.fields.take().filter(|fields| !fields.is_empty()) else {
            return Ok(self);
        };

        if self.method.query_in_fields() {
            self.url = append_query(&self.url, &fields);
            return Ok(self);
        }

        if self.body.is_some() {
            return Err(TransportFailure::new(
                FailureKind::Value,
                "request got values for both 'fields' and 'body', can only specify one",
            ));
        }
        self.body = Some(Bytes::from(fields.to_query_string()));
        if self.header(CONTENT_TYPE.as_str()).is_none() {
            self.headers
                .push((CONTENT_TYPE.to_string(), FORM_CONTENT_TYPE.to_string()));
        }
        Ok(self)
    }
}

/// Caller arguments for the verb methods.
///
/// `params` follow the verb policy: bodyless verbs send them as encoded
/// fields, body verbs get them merged into the URL query.
///
/// ## Examples
///
/// ```rust
/// use hpool_lib::{Method, RequestArgs};
///
/// let spec = RequestArgs::new()
///     .param("page", "2")
///     .body("{}")
///     .header("Content-Type", "application/json")
///     .into_spec(Method::Post, "/items?sort=asc");
/// assert_eq!(spec.url, "/items?sort=asc&page=2");
/// assert!(spec.fields.is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestArgs {
    pub fields: Option<Fields>,
    pub headers: Vec<(String, String)>,
    pub params: Option<Fields>,
    pub body: Option<Bytes>,
}

impl RequestArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a form field.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.get_or_insert_with(Fields::new).insert(key, value);
        self
    }

    pub fn fields(mut self, fields: Fields) -> Self {
        self.fields = Some(fields);
        self
    }

    /// Adds a query parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.get_or_insert_with(Fields::new).insert(key, value);
        self
    }

    pub fn params(mut self, params: Fields) -> Self {
        self.params = Some(params);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Builds the transport request, applying the verb policy to `params`.
    pub fn into_spec(self, method: Method, url: &str) -> RequestSpec {
        let Self {
            mut fields,
            headers,
            params,
            body,
        } = self;

        let mut url = url.to_string();
        if let Some(params) = params.filter(|params| !params.is_empty()) {
            if method.query_in_fields() {
                fields.get_or_insert_with(Fields::new).merge(&params);
            } else {
                url = merge_query(&url, &params);
            }
        }

        RequestSpec {
            method,
            url,
            fields,
            headers,
            body,
        }
    }
}

/// A fully read HTTP response.
#[derive(Debug, Clone, Default)]
pub struct ResponseEnvelope {
    /// HTTP status code.
    pub status: u16,
    /// Response headers in received order.
    pub headers: HeaderMap,
    /// Raw response body.
    pub body: Bytes,
}

impl ResponseEnvelope {
    /// Creates an envelope from its parts.
    pub fn new(status: u16, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// Returns a header value, if present and valid visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Returns the `Content-Type` header.
    pub fn content_type(&self) -> Option<&str> {
        self.header(CONTENT_TYPE.as_str())
    }

    /// Returns `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decodes the body as UTF-8, replacing invalid sequences.
    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Deserializes the body as JSON.
    ///
    /// ## Errors
    ///
    /// Returns an error if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Renders the headers one `name: value` pair per line.
    pub fn headers_text(&self) -> String {
        self.headers
            .iter()
            .map(|(name, value)| {
                format!(
                    "{}: {}\n",
                    name.as_str(),
                    String::from_utf8_lossy(value.as_bytes())
                )
            })
            .collect()
    }
}
