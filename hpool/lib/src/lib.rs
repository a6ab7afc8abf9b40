//! Pooled HTTP client library.
//!
//! Clients are identified by name. Every client with the same identity shares
//! one lazily built connection object, and every transport failure is mapped
//! onto a small closed error taxonomy that keeps the original cause.
//!
//! ## Facades
//!
//! - [`Registry`] - Holds the transport, configuration and connection caches
//! - [`HttpClient`] - Single-host client with one method per HTTP verb
//! - [`PoolManagerClient`] - Multi-host client routing through per-host pools
//!
//! ## Errors
//!
//! - [`HttpClientError`] - Which operation failed (init, request, urlopen, maintenance)
//! - [`ErrorKind`] - Normalized failure category
//! - [`classify()`] - Transport failure to error mapping
//!
//! ## Responses
//!
//! - [`ResponseEnvelope`] - Status, headers and body of a response
//! - [`decode()`] - Content-type driven body decoding into [`DecodedResponse`]
//!
//! ## Tooling
//!
//! - [`ApiTester`] - Builds requests from free-form text and renders responses
//! - [`ClientsConfig`] - TOML configuration of per-identity options

pub mod cache;
pub mod classify;
mod client;
mod config;
pub mod decode;
mod error;
mod manager;
pub mod message;
mod method;
mod options;
mod registry;
pub mod tester;
pub mod transport;

pub use cache::{ClientIdentity, ConnectionCache};
pub use classify::{ErrorClass, Phase, classify, run_classified, run_classified_async};
pub use client::HttpClient;
pub use config::{ClientsConfig, ConfigError};
pub use decode::{DecodedResponse, decode};
pub use error::{ConnectionTarget, ErrorKind, ErrorRecord, HttpClientError, Result};
pub use manager::PoolManagerClient;
pub use message::{Fields, RequestArgs, RequestSpec, ResponseEnvelope};
pub use method::Method;
pub use options::{
    ClientOptions, DEFAULT_NUM_POOLS, OptionsOverride, PoolOverrides, RetryPolicy, Scheme,
};
pub use registry::Registry;
pub use tester::{ApiTester, NoHooks, TesterForm, TesterHooks, TesterReport};
pub use transport::{
    Dispatch, FailureKind, ManagePools, ReqwestManager, ReqwestPool, ReqwestTransport, Transport,
    TransportFailure,
};
