//! The per-host pool exposed to callers

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use tracing::{debug, error};

use crate::config::{HostAddress, HostPoolConfig};
use crate::connection::{Connection, ConnectionFactory, LiveConnection, PooledConnection};
use crate::engine::PoolEngine;
use crate::errors::{PoolError, PoolResult};
use crate::eviction::Evictor;
use crate::metrics::{MetricsExporter, PoolMetrics};

/// Connection pool for a single host
///
/// Cloning is cheap; clones share the same pool.
///
/// # Examples
///
/// ```
/// use hostpool::{BoxError, Connection, ConnectionFactory, HostPool, HostPoolConfig};
///
/// struct Client;
/// impl Connection for Client {}
///
/// struct ClientFactory;
/// impl ConnectionFactory for ClientFactory {
///     type Connection = Client;
///     fn create(&self) -> Result<Client, BoxError> { Ok(Client) }
///     fn destroy(&self, _: &Client) -> Result<(), BoxError> { Ok(()) }
/// }
///
/// let pool = HostPool::new(HostPoolConfig::new("10.0.0.1", 9160), ClientFactory).unwrap();
/// let client = pool.borrow().unwrap();
/// assert_eq!(pool.active_count(), 1);
///
/// pool.release(&client);
/// pool.release(&client); // second release is a no-op
/// assert_eq!(pool.idle_count(), 1);
/// assert_eq!(pool.active_count(), 0);
/// pool.close();
/// ```
pub struct HostPool<F: ConnectionFactory> {
    inner: Arc<HostPoolInner<F>>,
}

struct HostPoolInner<F: ConnectionFactory> {
    engine: Arc<PoolEngine<F>>,
    evictor: Option<Evictor>,
}

impl<F: ConnectionFactory> Clone for HostPool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ConnectionFactory> HostPool<F> {
    /// Create a pool for the configured host and start its eviction sweep
    pub fn new(config: HostPoolConfig, factory: F) -> PoolResult<Self> {
        config.validate()?;
        debug!(host = %config.address, name = %config.name, "Creating new connection pool");

        let engine = Arc::new(PoolEngine::new(config, factory));
        let evictor = match engine.config().sweep_interval() {
            Some(interval) => Some(
                Evictor::start(Arc::downgrade(&engine), &engine.config().name, interval)
                    .map_err(|err| PoolError::Scheduler(err.to_string()))?,
            ),
            None => None,
        };

        Ok(Self {
            inner: Arc::new(HostPoolInner { engine, evictor }),
        })
    }

    fn engine(&self) -> &PoolEngine<F> {
        &self.inner.engine
    }

    /// Borrow a connection.
    ///
    /// Fails with `PoolExhausted` when the exhaustion policy denies the
    /// request and with `PoolClosed` after `close`.
    pub fn borrow(&self) -> PoolResult<PooledConnection<F::Connection>> {
        debug!(pool = %self, "Borrowing connection");
        self.engine().borrow()
    }

    /// Borrow without blocking the async runtime
    pub async fn borrow_async(&self) -> PoolResult<PooledConnection<F::Connection>> {
        let pool = self.clone();
        tokio::task::spawn_blocking(move || pool.borrow())
            .await
            .map_err(|_| PoolError::Cancelled)?
    }

    /// Borrow a connection that is released when the lease is dropped
    pub fn lease(&self) -> PoolResult<PooledLease<'_, F>> {
        let conn = self.borrow()?;
        Ok(PooledLease {
            pool: self,
            conn,
            returned: false,
        })
    }

    /// Return a connection for reuse. Releasing twice is a no-op.
    pub fn release(&self, conn: &PooledConnection<F::Connection>) {
        self.engine().release(conn);
    }

    /// Discard a broken connection. Returns `false` if it had already been
    /// released or invalidated.
    pub fn invalidate(&self, conn: &PooledConnection<F::Connection>) -> bool {
        self.engine().invalidate(conn)
    }

    /// Invalidate every live connection, idle or borrowed.
    /// Returns the number of connections destroyed.
    pub fn invalidate_all(&self) -> usize {
        self.engine().invalidate_all()
    }

    /// Stop accepting borrows, destroy idle connections and stop the sweep.
    ///
    /// Borrowed connections are destroyed when they are released or
    /// invalidated.
    pub fn close(&self) {
        self.engine().close();
        if let Some(evictor) = &self.inner.evictor {
            evictor.stop();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.engine().is_closed()
    }

    /// Run one eviction sweep now
    pub fn evict_idle(&self) -> usize {
        self.engine().evict_idle()
    }

    /// Whether the background sweep thread is running
    pub fn is_evicting(&self) -> bool {
        self.inner
            .evictor
            .as_ref()
            .is_some_and(|evictor| evictor.is_running())
    }

    pub fn name(&self) -> &str {
        &self.engine().config().name
    }

    pub fn address(&self) -> &HostAddress {
        &self.engine().config().address
    }

    pub fn config(&self) -> &HostPoolConfig {
        self.engine().config()
    }

    pub fn idle_count(&self) -> usize {
        self.engine().idle_count()
    }

    pub fn active_count(&self) -> usize {
        self.engine().active_count()
    }

    /// Borrows left before the pool is saturated. Negative when a growing
    /// pool has gone past `max_active`.
    pub fn num_before_exhausted(&self) -> i64 {
        self.config().max_active as i64 - self.active_count() as i64
    }

    /// Threads currently inside `borrow`
    pub fn blocked_count(&self) -> usize {
        self.engine().blocked_count()
    }

    /// Saturated under a policy that can refuse or delay a borrow
    pub fn is_exhausted(&self) -> bool {
        self.num_before_exhausted() <= 0 && self.config().exhaustion_policy.can_exhaust()
    }

    pub fn live_connection_count(&self) -> usize {
        self.engine().registry().size()
    }

    /// Snapshot of every connection the pool owns
    pub fn live_connections(&self) -> Vec<LiveConnection<F::Connection>> {
        self.engine()
            .registry()
            .snapshot()
            .into_iter()
            .map(LiveConnection::new)
            .collect()
    }

    /// Union of the hosts known to every open live connection
    pub fn known_hosts(&self) -> HashSet<String> {
        self.engine()
            .registry()
            .snapshot()
            .iter()
            .filter(|managed| !managed.conn().is_closed())
            .flat_map(|managed| managed.conn().known_hosts())
            .collect()
    }

    /// Ask every open live connection to refresh its view of the cluster,
    /// then return the union of the hosts they know.
    ///
    /// Closed connections are dropped from the live registry along the way.
    /// The first refresh failure stops the broadcast and is returned.
    pub fn refresh_known_hosts(&self) -> PoolResult<HashSet<String>> {
        let registry = self.engine().registry();
        let mut dead = Vec::new();
        let mut failure = None;

        for managed in registry.snapshot() {
            if managed.conn().is_closed() {
                dead.push(managed.id());
                continue;
            }
            if let Err(err) = managed.conn().refresh_known_hosts() {
                error!(pool = %self, connection = %managed.id(), error = %err, "Unable to update hosts list");
                failure = Some(PoolError::topology(err));
                break;
            }
        }

        for id in dead {
            registry.remove(id);
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(self.known_hosts()),
        }
    }

    pub fn metrics(&self) -> PoolMetrics {
        self.engine().metrics()
    }

    /// Export metrics as a HashMap
    pub fn export_metrics(&self) -> HashMap<String, String> {
        self.metrics().export()
    }

    /// Export metrics in Prometheus format
    pub fn export_metrics_prometheus(&self, tags: Option<&HashMap<String, String>>) -> String {
        MetricsExporter::export_prometheus(
            &self.metrics(),
            self.name(),
            &self.address().to_string(),
            tags,
        )
    }

    /// Configuration and counters in one line, for logs
    pub fn debug_string(&self) -> String {
        self.engine().debug_string()
    }
}

impl<F: ConnectionFactory> fmt::Display for HostPool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.engine(), f)
    }
}

impl<F: ConnectionFactory> fmt::Debug for HostPool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.debug_string())
    }
}

/// A borrowed connection that goes back to its pool when dropped
pub struct PooledLease<'a, F: ConnectionFactory> {
    pool: &'a HostPool<F>,
    conn: PooledConnection<F::Connection>,
    returned: bool,
}

impl<F: ConnectionFactory> PooledLease<'_, F> {
    /// The handle behind this lease
    pub fn connection(&self) -> &PooledConnection<F::Connection> {
        &self.conn
    }

    /// Discard the connection instead of returning it
    pub fn invalidate(mut self) {
        self.returned = true;
        self.pool.invalidate(&self.conn);
    }
}

impl<F: ConnectionFactory> Deref for PooledLease<'_, F> {
    type Target = F::Connection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl<F: ConnectionFactory> Drop for PooledLease<'_, F> {
    fn drop(&mut self) {
        if !self.returned {
            self.pool.release(&self.conn);
        }
    }
}
