//! Process-wide cache of connection objects keyed by client identity.
//!
//! Every facade with the same [`ClientIdentity`] shares one connection object.
//! The first caller builds it under a per-identity lock, so concurrent first
//! uses never construct two objects. Closing evicts the entry before the
//! object is closed; the next use of the identity builds a fresh one.

use std::collections::HashMap;
use std::fmt;
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use tracing::debug;

use crate::classify::{ErrorClass, Phase, run_classified};
use crate::error::Result;
use crate::transport::Dispatch;

/// Name under which a facade's connection object is cached.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientIdentity {
    fn from(identity: &str) -> Self {
        Self::new(identity)
    }
}

impl From<String> for ClientIdentity {
    fn from(identity: String) -> Self {
        Self(identity)
    }
}

/// Shared map from identity to connection object.
pub struct ConnectionCache<C> {
    entries: RwLock<HashMap<ClientIdentity, Arc<C>>>,
    init_locks: Mutex<HashMap<ClientIdentity, Arc<Mutex<()>>>>,
}

impl<C> fmt::Debug for ConnectionCache<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionCache")
            .field("identities", &self.identities())
            .finish()
    }
}

impl<C> Default for ConnectionCache<C> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            init_locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<C> ConnectionCache<C> {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ClientIdentity, Arc<C>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ClientIdentity, Arc<C>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn init_locks(&self) -> MutexGuard<'_, HashMap<ClientIdentity, Arc<Mutex<()>>>> {
        self.init_locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init_lock(&self, identity: &ClientIdentity) -> Arc<Mutex<()>> {
        Arc::clone(self.init_locks().entry(identity.clone()).or_default())
    }

    /// Returns the cached object for `identity`.
    pub fn get(&self, identity: &ClientIdentity) -> Option<Arc<C>> {
        self.read().get(identity).cloned()
    }

    /// Returns the cached object, building it with `factory` on first use.
    ///
    /// Failed constructions are not cached.
    ///
    /// ## Errors
    ///
    /// Returns whatever `factory` returns.
    pub fn get_or_create<F>(&self, identity: &ClientIdentity, factory: F) -> Result<Arc<C>>
    where
        F: FnOnce() -> Result<C>,
    {
        if let Some(existing) = self.get(identity) {
            return Ok(existing);
        }

        let lock = self.init_lock(identity);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = self.get(identity) {
            return Ok(existing);
        }

        let connection = match factory() {
            Ok(connection) => Arc::new(connection),
            Err(e) => {
                self.init_locks().remove(identity);
                return Err(e);
            }
        };
        self.write().insert(identity.clone(), Arc::clone(&connection));
        debug!(%identity, "cached new connection");
        Ok(connection)
    }

    /// Removes the entry for `identity` without closing it.
    pub fn invalidate(&self, identity: &ClientIdentity) -> Option<Arc<C>> {
        let removed = self.write().remove(identity);
        self.init_locks().remove(identity);
        removed
    }

    pub fn contains(&self, identity: &ClientIdentity) -> bool {
        self.read().contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Cached identities in sorted order.
    pub fn identities(&self) -> Vec<ClientIdentity> {
        let mut identities: Vec<_> = self.read().keys().cloned().collect();
        identities.sort();
        identities
    }
}

impl<C: Dispatch> ConnectionCache<C> {
    /// Evicts and closes the object cached for `identity`.
    ///
    /// Closing an identity with nothing cached is a no-op. The entry is gone
    /// even when closing fails.
    ///
    /// ## Errors
    ///
    /// Returns a [`Client`](crate::HttpClientError::Client) error prefixed with
    /// `Error closing connection for {identity}` when the transport fails to close.
    pub fn close(&self, identity: &ClientIdentity) -> Result<()> {
        let Some(connection) = self.invalidate(identity) else {
            debug!(%identity, "nothing to close");
            return Ok(());
        };

        let context = format!("Error closing connection for {identity}");
        run_classified(Phase::ConnectionInit, ErrorClass::Client(&context), || {
            connection.close()
        })?;
        debug!(%identity, "closed connection");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, ErrorRecord, HttpClientError};
    use crate::options::ClientOptions;
    use crate::transport::scripted::ScriptedTransport;
    use crate::transport::{FailureKind, Transport};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_get_or_create_builds_once() {
        let cache = ConnectionCache::<String>::new();
        let identity = ClientIdentity::from("svc");
        let calls = AtomicUsize::new(0);

        let first = cache
            .get_or_create(&identity, || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("conn".to_string())
            })
            .unwrap();
        let second = cache
            .get_or_create(&identity, || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("other".to_string())
            })
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.identities(), vec![identity]);
    }

    #[test]
    fn test_concurrent_first_use_builds_once() {
        let cache = ConnectionCache::<usize>::new();
        let identity = ClientIdentity::from("shared");
        let calls = AtomicUsize::new(0);

        let results: Vec<Arc<usize>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        cache
                            .get_or_create(&identity, || {
                                std::thread::sleep(Duration::from_millis(20));
                                Ok(calls.fetch_add(1, Ordering::SeqCst))
                            })
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    }

    #[test]
    fn test_failed_construction_is_not_cached() {
        let cache = ConnectionCache::<String>::new();
        let identity = ClientIdentity::from("svc");

        let err = cache
            .get_or_create(&identity, || {
                Err(HttpClientError::ConnectionInit(ErrorRecord::new(
                    ErrorKind::InvalidParameters,
                    "nope",
                    None,
                )))
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameters);
        assert!(!cache.contains(&identity));

        cache
            .get_or_create(&identity, || Ok("ok".to_string()))
            .unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_close_evicts_even_when_close_fails() {
        let transport = ScriptedTransport::default();
        let cache = ConnectionCache::new();
        let identity = ClientIdentity::from("svc");
        cache
            .get_or_create(&identity, || {
                Ok(transport
                    .open_pool(&ClientOptions::for_host("example.com"))
                    .unwrap())
            })
            .unwrap();

        *transport.script.fail_close.lock().unwrap() = Some(FailureKind::Other);
        let err = cache.close(&identity).unwrap_err();

        assert!(matches!(err, HttpClientError::Client(_)));
        assert_eq!(
            err.to_string(),
            "Error closing connection for svc: Unexpected error"
        );
        assert!(cache.is_empty());
        cache.close(&identity).unwrap();
    }

    #[test]
    fn test_closed_identities_leave_nothing_behind() {
        let transport = ScriptedTransport::default();
        let cache = ConnectionCache::new();

        for n in 0..50 {
            let identity = ClientIdentity::new(format!("tester:http://host{n}.test:80"));
            cache
                .get_or_create(&identity, || {
                    Ok(transport
                        .open_pool(&ClientOptions::for_host("example.com"))
                        .unwrap())
                })
                .unwrap();
            cache.close(&identity).unwrap();
        }

        let failing = ClientIdentity::from("broken");
        let _ = cache.get_or_create(&failing, || {
            Err(HttpClientError::ConnectionInit(ErrorRecord::new(
                ErrorKind::InvalidParameters,
                "nope",
                None,
            )))
        });

        assert!(cache.is_empty());
        assert!(cache.init_locks().is_empty());
    }
}
