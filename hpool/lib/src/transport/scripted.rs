//! In-memory transport replaying scripted outcomes, for facade tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{Dispatch, FailureKind, ManagePools, Transport, TransportFailure};
use crate::message::{RequestSpec, ResponseEnvelope};
use crate::options::{ClientOptions, PoolOverrides, Scheme};

/// Which dispatch entry point saw a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Entry {
    Request,
    UrlOpen,
}

/// Shared record of everything the scripted transport did.
#[derive(Debug, Default)]
pub(crate) struct Script {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub opened_options: Mutex<Vec<ClientOptions>>,
    pub outcomes: Mutex<VecDeque<Result<ResponseEnvelope, TransportFailure>>>,
    pub seen: Mutex<Vec<(Entry, RequestSpec)>>,
    pub fail_open: Mutex<Option<FailureKind>>,
    pub fail_close: Mutex<Option<FailureKind>>,
}

impl Script {
    pub fn push_failure(&self, kind: FailureKind) {
        self.outcomes
            .lock()
            .unwrap()
            .push_back(Err(TransportFailure::new(kind, format!("scripted {kind}"))));
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn last_seen(&self) -> Option<(Entry, RequestSpec)> {
        self.seen.lock().unwrap().last().cloned()
    }

    fn open(&self, options: &ClientOptions) -> Result<(), TransportFailure> {
        if let Some(kind) = *self.fail_open.lock().unwrap() {
            return Err(TransportFailure::new(kind, "scripted open failure"));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.opened_options.lock().unwrap().push(options.clone());
        Ok(())
    }

    fn dispatch(&self, entry: Entry, spec: RequestSpec) -> Result<ResponseEnvelope, TransportFailure> {
        self.seen.lock().unwrap().push((entry, spec));
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ResponseEnvelope::new(200, Default::default(), "")))
    }

    fn close(&self) -> Result<(), TransportFailure> {
        if let Some(kind) = *self.fail_close.lock().unwrap() {
            return Err(TransportFailure::new(kind, "scripted close failure"));
        }
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ScriptedTransport {
    pub script: Arc<Script>,
}

#[derive(Debug)]
pub(crate) struct ScriptedPool {
    script: Arc<Script>,
    pub options: ClientOptions,
}

impl Dispatch for ScriptedPool {
    async fn request(&self, spec: RequestSpec) -> Result<ResponseEnvelope, TransportFailure> {
        self.script.dispatch(Entry::Request, spec)
    }

    async fn urlopen(&self, spec: RequestSpec) -> Result<ResponseEnvelope, TransportFailure> {
        self.script.dispatch(Entry::UrlOpen, spec)
    }

    fn close(&self) -> Result<(), TransportFailure> {
        self.script.close()
    }
}

#[derive(Debug)]
pub(crate) struct ScriptedManager {
    script: Arc<Script>,
    pools: Mutex<HashMap<(Scheme, String, Option<u16>), Arc<ScriptedPool>>>,
}

impl ManagePools for ScriptedManager {
    type Pool = ScriptedPool;

    fn connection_from_host(
        &self,
        host: &str,
        port: Option<u16>,
        scheme: Scheme,
        overrides: Option<&PoolOverrides>,
    ) -> Result<Arc<ScriptedPool>, TransportFailure> {
        if host.is_empty() {
            return Err(TransportFailure::new(FailureKind::LocationValue, "No host specified."));
        }
        let mut pools = self.pools.lock().unwrap();
        let pool = pools
            .entry((scheme, host.to_string(), port))
            .or_insert_with(|| {
                let mut options = ClientOptions::for_host(host).with_scheme(scheme);
                if let Some(overrides) = overrides {
                    options = options.with_pool_overrides(overrides);
                }
                Arc::new(ScriptedPool {
                    script: Arc::clone(&self.script),
                    options,
                })
            });
        Ok(Arc::clone(pool))
    }

    fn connection_from_url(
        &self,
        url: &str,
        overrides: Option<&PoolOverrides>,
    ) -> Result<Arc<ScriptedPool>, TransportFailure> {
        let parsed = url::Url::parse(url)
            .map_err(|e| TransportFailure::new(FailureKind::LocationValue, e.to_string()))?;
        let scheme = parsed
            .scheme()
            .parse()
            .map_err(|_| TransportFailure::new(FailureKind::SchemeUnknown, "unknown scheme"))?;
        self.connection_from_host(parsed.host_str().unwrap_or_default(), parsed.port(), scheme, overrides)
    }

    fn clear(&self) -> Result<(), TransportFailure> {
        self.script.close()?;
        self.pools.lock().unwrap().clear();
        Ok(())
    }
}

impl Dispatch for ScriptedManager {
    async fn request(&self, spec: RequestSpec) -> Result<ResponseEnvelope, TransportFailure> {
        self.connection_from_url(&spec.url, None)?;
        self.script.dispatch(Entry::Request, spec)
    }

    async fn urlopen(&self, spec: RequestSpec) -> Result<ResponseEnvelope, TransportFailure> {
        self.connection_from_url(&spec.url, None)?;
        self.script.dispatch(Entry::UrlOpen, spec)
    }

    fn close(&self) -> Result<(), TransportFailure> {
        self.clear()
    }
}

impl Transport for ScriptedTransport {
    type Pool = ScriptedPool;
    type Manager = ScriptedManager;

    fn open_pool(&self, options: &ClientOptions) -> Result<ScriptedPool, TransportFailure> {
        if options.host.as_deref().is_none_or(str::is_empty) {
            return Err(TransportFailure::new(
                FailureKind::LocationValue,
                "No host specified.",
            ));
        }
        self.script.open(options)?;
        Ok(ScriptedPool {
            script: Arc::clone(&self.script),
            options: options.clone(),
        })
    }

    fn open_manager(&self, options: &ClientOptions) -> Result<ScriptedManager, TransportFailure> {
        self.script.open(options)?;
        Ok(ScriptedManager {
            script: Arc::clone(&self.script),
            pools: Mutex::new(HashMap::new()),
        })
    }
}
