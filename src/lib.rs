//! # hostpool
//!
//! Per-host connection pool for clients of a distributed, multi-node data
//! store. A `HostPool` owns a bounded set of expensive, stateful connections
//! to one host, hands them out to application threads, takes them back,
//! evicts stale ones and tears down the ones that fail.
//!
//! ## Features
//!
//! - Thread-safe borrow/release/invalidate with idempotent release
//! - Exhaustion policies: fail fast, block with timeout, or grow
//! - LIFO or FIFO serving of idle connections and blocked borrowers
//! - Direct handoff of released connections to blocked borrowers
//! - Background eviction of idle connections
//! - Live connection registry for topology refresh and bulk invalidation
//! - Validation on borrow with a bounded retry budget
//! - Metrics snapshot and Prometheus export
//!
//! ## Quick Start
//!
//! ```rust
//! use hostpool::{BoxError, Connection, ConnectionFactory, HostPool, HostPoolConfig};
//!
//! struct Client;
//! impl Connection for Client {}
//!
//! struct ClientFactory;
//! impl ConnectionFactory for ClientFactory {
//!     type Connection = Client;
//!     fn create(&self) -> Result<Client, BoxError> { Ok(Client) }
//!     fn destroy(&self, _: &Client) -> Result<(), BoxError> { Ok(()) }
//! }
//!
//! let pool = HostPool::new(HostPoolConfig::new("127.0.0.1", 9160), ClientFactory).unwrap();
//! {
//!     let _client = pool.lease().unwrap();
//!     // Connection goes back to the pool when `_client` goes out of scope
//! }
//! assert_eq!(pool.idle_count(), 1);
//! ```

mod config;
mod connection;
mod engine;
mod errors;
mod eviction;
mod metrics;
mod policy;
mod pool;
mod registry;

pub use config::{HostAddress, HostPoolConfig, ServingOrder, DEFAULT_PORT};
pub use connection::{
    Connection, ConnectionFactory, ConnectionId, ConnectionState, LiveConnection,
    PooledConnection,
};
pub use errors::{BoxError, PoolError, PoolResult, SharedError};
pub use metrics::{MetricsExporter, PoolMetrics};
pub use policy::{ExhaustedAction, ExhaustionPolicy};
pub use pool::{HostPool, PooledLease};
