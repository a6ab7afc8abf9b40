//! Connection options and their overrides.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Default number of per-host pools a pool manager keeps.
pub const DEFAULT_NUM_POOLS: usize = 10;

/// Backoff used when a retry count is configured without an explicit delay.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// URL scheme of a single-host pool.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Plain HTTP.
    #[default]
    Http,
    /// HTTP over TLS.
    Https,
}

impl Scheme {
    /// Port used when none is given.
    pub fn default_port(self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }
}

/// How often a failed connection attempt is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RetryPolicy {
    /// Failures are reported as they happen.
    #[default]
    None,
    /// Retry connect failures and timeouts up to `total` times.
    ///
    /// The delay starts at `backoff` and doubles after every attempt.
    Attempts { total: u32, backoff: Duration },
}

impl RetryPolicy {
    /// Retries `total` times with the default backoff.
    pub fn attempts(total: u32) -> Self {
        Self::Attempts {
            total,
            backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    /// Returns the number of retries allowed.
    pub fn total(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::Attempts { total, .. } => *total,
        }
    }
}

/// Options used to build a pool or pool manager.
///
/// The defaults are a one-connection pool that does not block when full,
/// has no timeout, no retries and no default headers.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientOptions {
    /// Timeout applied to connecting, reading and waiting for a free connection.
    pub timeout: Option<Duration>,
    /// Maximum number of connections kept by a pool.
    pub max_connections: usize,
    /// Retry policy for connect failures and timeouts.
    pub retries: RetryPolicy,
    /// Wait for a free connection instead of opening an extra one.
    pub block_when_full: bool,
    /// Headers sent with every request.
    pub default_headers: Option<Vec<(String, String)>>,
    /// Host of a single-host pool; required there, unused by managers.
    pub host: Option<String>,
    /// Port of a single-host pool; the scheme default when absent.
    pub port: Option<u16>,
    /// Scheme of a single-host pool.
    pub scheme: Scheme,
    /// Number of per-host pools a manager keeps; [`DEFAULT_NUM_POOLS`] when absent.
    pub num_pools: Option<usize>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            max_connections: 1,
            retries: RetryPolicy::None,
            block_when_full: false,
            default_headers: None,
            host: None,
            port: None,
            scheme: Scheme::Http,
            num_pools: None,
        }
    }
}

impl ClientOptions {
    /// Default options pointing at `host`.
    pub fn for_host(host: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            ..Self::default()
        }
    }

    pub fn with_scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_retries(mut self, retries: RetryPolicy) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_block_when_full(mut self, block: bool) -> Self {
        self.block_when_full = block;
        self
    }

    pub fn with_num_pools(mut self, num_pools: usize) -> Self {
        self.num_pools = Some(num_pools);
        self
    }

    /// Adds a default header, replacing an existing one with the same name.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        upsert_header(
            self.default_headers.get_or_insert_with(Vec::new),
            name.into(),
            value.into(),
        );
        self
    }

    /// Port that will actually be used.
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.scheme.default_port())
    }

    /// Applies the fields set in `overrides`.
    ///
    /// Headers are merged by name; a retry count of zero disables retries.
    pub fn merged(mut self, overrides: &OptionsOverride) -> Self {
        if let Some(host) = &overrides.host {
            self.host = Some(host.clone());
        }
        if let Some(port) = overrides.port {
            self.port = Some(port);
        }
        if let Some(scheme) = overrides.scheme {
            self.scheme = scheme;
        }
        if let Some(timeout) = overrides
            .timeout_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        {
            self.timeout = Some(timeout);
        }
        if let Some(max_connections) = overrides.max_connections {
            self.max_connections = max_connections;
        }
        if let Some(block) = overrides.block_when_full {
            self.block_when_full = block;
        }
        if let Some(num_pools) = overrides.num_pools {
            self.num_pools = Some(num_pools);
        }

        let backoff = overrides.retry_backoff_ms.map(Duration::from_millis);
        self.retries = match (overrides.retries, self.retries) {
            (Some(0), _) => RetryPolicy::None,
            (Some(total), current) => RetryPolicy::Attempts {
                total,
                backoff: backoff.unwrap_or(match current {
                    RetryPolicy::Attempts { backoff, .. } => backoff,
                    RetryPolicy::None => DEFAULT_RETRY_BACKOFF,
                }),
            },
            (None, RetryPolicy::Attempts { total, backoff: current }) => RetryPolicy::Attempts {
                total,
                backoff: backoff.unwrap_or(current),
            },
            (None, RetryPolicy::None) => RetryPolicy::None,
        };

        if let Some(headers) = &overrides.headers {
            let target = self.default_headers.get_or_insert_with(Vec::new);
            for (name, value) in headers {
                upsert_header(target, name.clone(), value.clone());
            }
        }
        self
    }

    /// Applies per-pool overrides handed to a pool manager.
    ///
    /// Override headers replace the default headers entirely.
    pub fn with_pool_overrides(mut self, overrides: &PoolOverrides) -> Self {
        if let Some(headers) = &overrides.headers {
            self.default_headers = Some(headers.clone());
        }
        if let Some(max_connections) = overrides.max_connections {
            self.max_connections = max_connections;
        }
        if let Some(timeout) = overrides.timeout {
            self.timeout = Some(timeout);
        }
        if let Some(block) = overrides.block_when_full {
            self.block_when_full = block;
        }
        if let Some(retries) = overrides.retries {
            self.retries = retries;
        }
        self
    }
}

fn upsert_header(headers: &mut Vec<(String, String)>, name: String, value: String) {
    match headers
        .iter_mut()
        .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
    {
        Some(slot) => slot.1 = value,
        None => headers.push((name, value)),
    }
}

/// Partial options as read from configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptionsOverride {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub scheme: Option<Scheme>,
    /// Timeout in seconds; fractions allowed.
    pub timeout_secs: Option<f64>,
    pub max_connections: Option<usize>,
    /// Retry count; `0` disables retries.
    pub retries: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
    pub block_when_full: Option<bool>,
    pub num_pools: Option<usize>,
    pub headers: Option<BTreeMap<String, String>>,
}

/// Per-pool overrides for [`connection_from_host`](crate::PoolManagerClient::connection_from_host).
///
/// Pools created with different overrides are kept apart, even for the same
/// origin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PoolOverrides {
    pub headers: Option<Vec<(String, String)>>,
    pub max_connections: Option<usize>,
    pub timeout: Option<Duration>,
    pub block_when_full: Option<bool>,
    pub retries: Option<RetryPolicy>,
}

impl PoolOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a header sent by this pool.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        upsert_header(
            self.headers.get_or_insert_with(Vec::new),
            name.into(),
            value.into(),
        );
        self
    }

    pub fn max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = Some(max_connections);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn block_when_full(mut self, block: bool) -> Self {
        self.block_when_full = Some(block);
        self
    }

    pub fn retries(mut self, retries: RetryPolicy) -> Self {
        self.retries = Some(retries);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_a_single_non_blocking_connection() {
        let options = ClientOptions::default();
        assert_eq!(options.max_connections, 1);
        assert!(!options.block_when_full);
        assert_eq!(options.retries, RetryPolicy::None);
        assert!(options.timeout.is_none());
        assert!(options.default_headers.is_none());
        assert_eq!(options.effective_port(), 80);
        assert_eq!(options.clone().with_scheme(Scheme::Https).effective_port(), 443);
    }

    #[test]
    fn test_scheme_parses_case_insensitively() {
        assert_eq!("HTTPS".parse::<Scheme>().unwrap(), Scheme::Https);
        assert!("ftp".parse::<Scheme>().is_err());
        assert_eq!(Scheme::Http.to_string(), "http");
    }

    #[test]
    fn test_merged_applies_only_present_fields() {
        let base = ClientOptions::for_host("example.com").with_header("Accept", "text/plain");
        let overrides = OptionsOverride {
            timeout_secs: Some(1.5),
            retries: Some(3),
            headers: Some(BTreeMap::from([
                ("accept".to_string(), "application/json".to_string()),
                ("X-Trace".to_string(), "1".to_string()),
            ])),
            ..OptionsOverride::default()
        };

        let merged = base.merged(&overrides);
        assert_eq!(merged.host.as_deref(), Some("example.com"));
        assert_eq!(merged.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(merged.retries, RetryPolicy::attempts(3));
        assert_eq!(
            merged.default_headers,
            Some(vec![
                ("Accept".to_string(), "application/json".to_string()),
                ("X-Trace".to_string(), "1".to_string()),
            ])
        );
    }

    #[test]
    fn test_zero_retries_disable_the_policy() {
        let options = ClientOptions::default().with_retries(RetryPolicy::attempts(2));
        let merged = options.merged(&OptionsOverride {
            retries: Some(0),
            ..OptionsOverride::default()
        });
        assert_eq!(merged.retries, RetryPolicy::None);
    }

    #[test]
    fn test_pool_override_headers_replace_defaults() {
        let options = ClientOptions::default()
            .with_header("Accept", "text/plain")
            .with_pool_overrides(&PoolOverrides::new().header("X-Pool", "a").max_connections(4));
        assert_eq!(
            options.default_headers,
            Some(vec![("X-Pool".to_string(), "a".to_string())])
        );
        assert_eq!(options.max_connections, 4);
    }
}
