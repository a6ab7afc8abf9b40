//! Multi-host pool manager keeping one [`ReqwestPool`] per origin.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};
use url::Url;

use super::pool::ReqwestPool;
use super::{Dispatch, FailureKind, ManagePools, TransportFailure};
use crate::message::{RequestSpec, ResponseEnvelope};
use crate::options::{ClientOptions, DEFAULT_NUM_POOLS, PoolOverrides, Scheme};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PoolKey {
    scheme: Scheme,
    host: String,
    port: u16,
    overrides: Option<PoolOverrides>,
}

/// Pools in least-recently-used order.
#[derive(Debug, Default)]
struct PoolTable {
    pools: HashMap<PoolKey, Arc<ReqwestPool>>,
    recency: VecDeque<PoolKey>,
}

impl PoolTable {
    fn touch(&mut self, key: &PoolKey) {
        if let Some(position) = self.recency.iter().position(|existing| existing == key) {
            if let Some(key) = self.recency.remove(position) {
                self.recency.push_back(key);
            }
        }
    }

    /// Inserts a pool and returns the ones evicted to stay within `capacity`.
    fn insert(&mut self, key: PoolKey, pool: Arc<ReqwestPool>, capacity: usize) -> Vec<Arc<ReqwestPool>> {
        self.pools.insert(key.clone(), pool);
        self.recency.push_back(key);

        let mut evicted = Vec::new();
        while self.recency.len() > capacity {
            let Some(oldest) = self.recency.pop_front() else {
                break;
            };
            if let Some(pool) = self.pools.remove(&oldest) {
                evicted.push(pool);
            }
        }
        evicted
    }

    fn drain(&mut self) -> Vec<Arc<ReqwestPool>> {
        self.recency.clear();
        self.pools.drain().map(|(_, pool)| pool).collect()
    }
}

/// Routes requests to per-origin pools, keeping at most `num_pools` of them.
///
/// The least recently used pool is closed when a new origin would exceed the
/// limit.
#[derive(Debug)]
pub struct ReqwestManager {
    options: ClientOptions,
    num_pools: usize,
    table: Mutex<PoolTable>,
}

impl ReqwestManager {
    /// Creates an empty manager.
    ///
    /// ## Errors
    ///
    /// Returns a [`FailureKind::Value`] failure when `num_pools` is zero.
    pub fn open(options: &ClientOptions) -> Result<Self, TransportFailure> {
        let num_pools = options.num_pools.unwrap_or(DEFAULT_NUM_POOLS);
        if num_pools == 0 {
            return Err(TransportFailure::new(
                FailureKind::Value,
                "num_pools must be at least 1",
            ));
        }
        debug!(num_pools, "opened pool manager");
        Ok(Self {
            options: options.clone(),
            num_pools,
            table: Mutex::new(PoolTable::default()),
        })
    }

    /// Number of pools currently kept.
    pub fn pool_count(&self) -> usize {
        self.table().pools.len()
    }

    fn table(&self) -> MutexGuard<'_, PoolTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pool_for(&self, key: PoolKey) -> Result<Arc<ReqwestPool>, TransportFailure> {
        let mut table = self.table();
        if let Some(pool) = table.pools.get(&key).cloned() {
            table.touch(&key);
            return Ok(pool);
        }

        let mut options = self.options.clone();
        options.host = Some(key.host.clone());
        options.port = Some(key.port);
        options.scheme = key.scheme;
        if let Some(overrides) = &key.overrides {
            options = options.with_pool_overrides(overrides);
        }

        let pool = Arc::new(ReqwestPool::open(&options)?);
        for evicted in table.insert(key, Arc::clone(&pool), self.num_pools) {
            debug!(origin = %evicted.origin(), "evicting least recently used pool");
            evicted.close()?;
        }
        Ok(pool)
    }
}

impl ManagePools for ReqwestManager {
    type Pool = ReqwestPool;

    fn connection_from_host(
        &self,
        host: &str,
        port: Option<u16>,
        scheme: Scheme,
        overrides: Option<&PoolOverrides>,
    ) -> Result<Arc<ReqwestPool>, TransportFailure> {
        let host = host.trim();
        if host.is_empty() {
            return Err(TransportFailure::new(
                FailureKind::LocationValue,
                "No host specified.",
            ));
        }
        self.pool_for(PoolKey {
            scheme,
            host: host.to_ascii_lowercase(),
            port: port.unwrap_or_else(|| scheme.default_port()),
            overrides: overrides.cloned(),
        })
    }

    fn connection_from_url(
        &self,
        url: &str,
        overrides: Option<&PoolOverrides>,
    ) -> Result<Arc<ReqwestPool>, TransportFailure> {
        let parsed = Url::parse(url).map_err(|e| {
            TransportFailure::new(FailureKind::LocationValue, format!("Invalid URL {url}: {e}"))
                .with_source(e)
        })?;
        let scheme: Scheme = parsed.scheme().parse().map_err(|_| {
            TransportFailure::new(
                FailureKind::SchemeUnknown,
                format!("Not supported URL scheme {}", parsed.scheme()),
            )
        })?;
        let host = parsed.host_str().ok_or_else(|| {
            TransportFailure::new(FailureKind::LocationValue, "No host specified.")
        })?;
        self.connection_from_host(host, parsed.port(), scheme, overrides)
    }

    fn clear(&self) -> Result<(), TransportFailure> {
        let pools = self.table().drain();
        if !pools.is_empty() {
            info!(count = pools.len(), "clearing connection pools");
        }
        for pool in pools {
            pool.close()?;
        }
        Ok(())
    }
}

impl Dispatch for ReqwestManager {
    async fn request(&self, spec: RequestSpec) -> Result<ResponseEnvelope, TransportFailure> {
        let pool = self.connection_from_url(&spec.url, None)?;
        pool.request(spec).await
    }

    async fn urlopen(&self, spec: RequestSpec) -> Result<ResponseEnvelope, TransportFailure> {
        let pool = self.connection_from_url(&spec.url, None)?;
        pool.urlopen(spec).await
    }

    fn close(&self) -> Result<(), TransportFailure> {
        self.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::Method;

    fn manager(num_pools: usize) -> ReqwestManager {
        ReqwestManager::open(&ClientOptions::default().with_num_pools(num_pools)).unwrap()
    }

    #[test]
    fn test_same_origin_shares_a_pool() {
        let manager = manager(10);
        let a = manager.connection_from_url("http://Example.com/a", None).unwrap();
        let b = manager
            .connection_from_host("example.com", Some(80), Scheme::Http, None)
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.pool_count(), 1);
    }

    #[test]
    fn test_overrides_get_their_own_pool() {
        let manager = manager(10);
        let plain = manager
            .connection_from_host("example.com", None, Scheme::Https, None)
            .unwrap();
        let overrides = PoolOverrides::new().header("X-Pool", "1");
        let custom = manager
            .connection_from_host("example.com", None, Scheme::Https, Some(&overrides))
            .unwrap();
        assert!(!Arc::ptr_eq(&plain, &custom));
        assert_eq!(manager.pool_count(), 2);
    }

    #[test]
    fn test_least_recently_used_pool_is_evicted() {
        let manager = manager(2);
        let a = manager.connection_from_url("http://a.test/", None).unwrap();
        let b = manager.connection_from_url("http://b.test/", None).unwrap();
        manager.connection_from_url("http://a.test/", None).unwrap();
        let _c = manager.connection_from_url("http://c.test/", None).unwrap();

        assert_eq!(manager.pool_count(), 2);
        assert!(!a.is_closed());
        let b_again = manager.connection_from_url("http://b.test/", None).unwrap();
        assert!(!b_again.is_closed());
        assert!(!Arc::ptr_eq(&b, &b_again));
        assert!(b.is_closed());
    }

    #[test]
    fn test_invalid_urls_are_classified() {
        let manager = manager(10);
        let err = manager.connection_from_url("/relative", None).unwrap_err();
        assert_eq!(err.kind(), FailureKind::LocationValue);

        let err = manager.connection_from_url("ftp://example.com/", None).unwrap_err();
        assert_eq!(err.kind(), FailureKind::SchemeUnknown);

        let err = manager
            .connection_from_host("", None, Scheme::Http, None)
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::LocationValue);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let manager = manager(10);
        let pool = manager.connection_from_url("http://a.test/", None).unwrap();
        manager.clear().unwrap();
        manager.clear().unwrap();
        assert!(pool.is_closed());
        assert_eq!(manager.pool_count(), 0);

        let fresh = manager.connection_from_url("http://a.test/", None).unwrap();
        assert!(!fresh.is_closed());
    }

    #[test]
    fn test_zero_pools_is_rejected() {
        let err = ReqwestManager::open(&ClientOptions::default().with_num_pools(0)).unwrap_err();
        assert_eq!(err.kind(), FailureKind::Value);
    }

    #[tokio::test]
    async fn test_relative_request_url_is_rejected() {
        let manager = manager(10);
        let err = manager
            .request(RequestSpec::new(Method::Get, "/get"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::LocationValue);
    }
}
