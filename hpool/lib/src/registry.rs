//! Holder of the transport, configuration and connection caches.

use std::sync::Arc;

use crate::cache::{ClientIdentity, ConnectionCache};
use crate::client::HttpClient;
use crate::config::ClientsConfig;
use crate::manager::PoolManagerClient;
use crate::options::ClientOptions;
use crate::transport::{ReqwestTransport, Transport};

/// Hands out facades sharing one set of connection caches.
///
/// Cloning a registry is cheap; clones share the caches. Facades created for
/// the same identity share one connection object.
///
/// ## Examples
///
/// ```rust
/// use hpool_lib::{ClientsConfig, OptionsOverride, Registry};
///
/// let config = ClientsConfig::default().with_client(
///     "billing",
///     OptionsOverride {
///         host: Some("billing.internal".into()),
///         ..OptionsOverride::default()
///     },
/// );
/// let registry = Registry::new(config);
/// let client = registry.client("billing");
/// assert_eq!(client.client_options().host.as_deref(), Some("billing.internal"));
/// ```
#[derive(Debug)]
pub struct Registry<T: Transport = ReqwestTransport> {
    transport: Arc<T>,
    config: Arc<ClientsConfig>,
    pools: Arc<ConnectionCache<T::Pool>>,
    managers: Arc<ConnectionCache<T::Manager>>,
}

impl<T: Transport> Clone for Registry<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            config: Arc::clone(&self.config),
            pools: Arc::clone(&self.pools),
            managers: Arc::clone(&self.managers),
        }
    }
}

impl Registry<ReqwestTransport> {
    /// Registry over the `reqwest` transport.
    pub fn new(config: ClientsConfig) -> Self {
        Self::with_transport(ReqwestTransport, config)
    }
}

impl Default for Registry<ReqwestTransport> {
    fn default() -> Self {
        Self::new(ClientsConfig::default())
    }
}

impl<T: Transport> Registry<T> {
    pub fn with_transport(transport: T, config: ClientsConfig) -> Self {
        Self {
            transport: Arc::new(transport),
            config: Arc::new(config),
            pools: Arc::new(ConnectionCache::new()),
            managers: Arc::new(ConnectionCache::new()),
        }
    }

    pub fn config(&self) -> &ClientsConfig {
        &self.config
    }

    /// Configured options for `identity`.
    pub fn options_for(&self, identity: &ClientIdentity) -> ClientOptions {
        self.config.options_for(identity.as_str())
    }

    /// Single-host client using the configured options of `identity`.
    pub fn client(&self, identity: impl Into<ClientIdentity>) -> HttpClient<T> {
        let identity = identity.into();
        let options = self.options_for(&identity);
        self.client_with_options(identity, options)
    }

    /// Single-host client with explicit options.
    ///
    /// The options only matter if this identity has no cached pool yet.
    pub fn client_with_options(
        &self,
        identity: impl Into<ClientIdentity>,
        options: ClientOptions,
    ) -> HttpClient<T> {
        HttpClient::new(
            identity.into(),
            options,
            Arc::clone(&self.transport),
            Arc::clone(&self.pools),
        )
    }

    /// Pool manager client using the configured options of `identity`.
    pub fn pool_manager(&self, identity: impl Into<ClientIdentity>) -> PoolManagerClient<T> {
        let identity = identity.into();
        let options = self.options_for(&identity);
        self.pool_manager_with_options(identity, options)
    }

    pub fn pool_manager_with_options(
        &self,
        identity: impl Into<ClientIdentity>,
        options: ClientOptions,
    ) -> PoolManagerClient<T> {
        PoolManagerClient::new(
            identity.into(),
            options,
            Arc::clone(&self.transport),
            Arc::clone(&self.managers),
        )
    }

    /// Cache of single-host pools.
    pub fn pools(&self) -> &ConnectionCache<T::Pool> {
        &self.pools
    }

    /// Cache of pool managers.
    pub fn managers(&self) -> &ConnectionCache<T::Manager> {
        &self.managers
    }
}
