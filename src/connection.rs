//! Connections, their factory, and the handles the pool hands out

use std::collections::HashSet;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::errors::BoxError;

/// A live link to a host, as created by a [`ConnectionFactory`]
///
/// The topology methods are used by `HostPool::refresh_known_hosts` and
/// `HostPool::known_hosts`; connections that know nothing about the cluster
/// can rely on the defaults.
pub trait Connection: Send + Sync + 'static {
    /// Whether the underlying transport has been closed
    fn is_closed(&self) -> bool {
        false
    }

    /// Hosts this connection currently knows about
    fn known_hosts(&self) -> HashSet<String> {
        HashSet::new()
    }

    /// Ask the remote end for a fresh view of the cluster
    fn refresh_known_hosts(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Creates, validates and destroys connections to one host.
///
/// Called concurrently from many threads without extra synchronization.
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: Connection;

    /// Open and handshake a new connection
    fn create(&self) -> Result<Self::Connection, BoxError>;

    /// Check a connection is fit to hand to a borrower
    fn validate(&self, conn: &Self::Connection) -> bool {
        !conn.is_closed()
    }

    /// Tear a connection down
    fn destroy(&self, conn: &Self::Connection) -> Result<(), BoxError>;
}

impl<F: ConnectionFactory> ConnectionFactory for Arc<F> {
    type Connection = F::Connection;

    fn create(&self) -> Result<Self::Connection, BoxError> {
        (**self).create()
    }

    fn validate(&self, conn: &Self::Connection) -> bool {
        (**self).validate(conn)
    }

    fn destroy(&self, conn: &Self::Connection) -> Result<(), BoxError> {
        (**self).destroy(conn)
    }
}

/// Opaque identity of a pooled connection, unique per process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

impl ConnectionId {
    fn next() -> Self {
        ConnectionId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The id the next connection will receive; every existing id is lower
    pub(crate) fn peek_next() -> Self {
        ConnectionId(NEXT_ID.load(Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycle state of a pooled connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Created,
    Idle,
    Active,
    Invalid,
    Destroyed,
}

impl ConnectionState {
    /// Invalid and destroyed connections never come back
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Invalid | ConnectionState::Destroyed)
    }
}

#[derive(Debug)]
pub(crate) struct Lifecycle {
    pub state: ConnectionState,
    /// Bumped every time the connection changes hands, so a stale handle
    /// cannot release or invalidate a later borrower's lease.
    pub lease: u64,
    pub last_active: Instant,
}

/// A connection together with the pool's bookkeeping for it
pub(crate) struct ManagedConnection<C> {
    id: ConnectionId,
    conn: C,
    lifecycle: Mutex<Lifecycle>,
}

impl<C> ManagedConnection<C> {
    pub fn new(conn: C) -> Self {
        Self {
            id: ConnectionId::next(),
            conn,
            lifecycle: Mutex::new(Lifecycle {
                state: ConnectionState::Created,
                lease: 0,
                last_active: Instant::now(),
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn conn(&self) -> &C {
        &self.conn
    }

    pub fn lifecycle(&self) -> parking_lot::MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock()
    }

    pub fn state(&self) -> ConnectionState {
        self.lifecycle.lock().state
    }

    pub fn idle_for(&self) -> Duration {
        self.lifecycle.lock().last_active.elapsed()
    }
}

impl Lifecycle {
    /// Hand the connection to a new borrower, returning the new lease
    pub fn activate(&mut self) -> u64 {
        self.state = ConnectionState::Active;
        self.lease += 1;
        self.last_active = Instant::now();
        self.lease
    }

    /// Park the connection in the idle collection
    pub fn park(&mut self) {
        self.state = ConnectionState::Idle;
        self.last_active = Instant::now();
    }

    /// Whether `lease` is the current, active lease
    pub fn holds(&self, lease: u64) -> bool {
        self.state == ConnectionState::Active && self.lease == lease
    }

    /// Move to `Invalid`. Returns `false` if already terminal.
    pub fn invalidate(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = ConnectionState::Invalid;
        true
    }
}

/// A connection borrowed from a `HostPool`
///
/// Hand it back with `HostPool::release` or `HostPool::invalidate`. Both are
/// no-ops once the lease has ended, so error paths may call either freely.
pub struct PooledConnection<C> {
    inner: Arc<ManagedConnection<C>>,
    lease: u64,
}

impl<C> PooledConnection<C> {
    pub(crate) fn new(inner: Arc<ManagedConnection<C>>, lease: u64) -> Self {
        Self { inner, lease }
    }

    pub(crate) fn managed(&self) -> &Arc<ManagedConnection<C>> {
        &self.inner
    }

    pub(crate) fn lease(&self) -> u64 {
        self.lease
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id()
    }

    /// Current lifecycle state of the underlying connection
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Whether this handle's lease is still the active one
    pub fn is_leased(&self) -> bool {
        self.inner.lifecycle().holds(self.lease)
    }
}

impl<C> Clone for PooledConnection<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            lease: self.lease,
        }
    }
}

impl<C> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &Self::Target {
        self.inner.conn()
    }
}

impl<C> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.inner.id())
            .field("lease", &self.lease)
            .field("state", &self.inner.state())
            .finish()
    }
}

/// Read-only view of a connection currently owned by a pool
pub struct LiveConnection<C> {
    inner: Arc<ManagedConnection<C>>,
}

impl<C> LiveConnection<C> {
    pub(crate) fn new(inner: Arc<ManagedConnection<C>>) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Time since the connection was last borrowed or released
    pub fn idle_for(&self) -> Duration {
        self.inner.idle_for()
    }

    pub fn connection(&self) -> &C {
        self.inner.conn()
    }
}

impl<C> fmt::Debug for LiveConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveConnection")
            .field("id", &self.inner.id())
            .field("state", &self.inner.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = ManagedConnection::new(());
        let b = ManagedConnection::new(());
        assert_ne!(a.id(), b.id());
        assert_eq!(a.state(), ConnectionState::Created);
    }

    #[test]
    fn test_lease_changes_hands() {
        let managed = ManagedConnection::new(());
        let mut life = managed.lifecycle();
        let first = life.activate();
        assert!(life.holds(first));

        let second = life.activate();
        assert!(!life.holds(first));
        assert!(life.holds(second));

        life.park();
        assert!(!life.holds(second));
    }

    #[test]
    fn test_invalidate_is_one_shot() {
        let managed = ManagedConnection::new(());
        let mut life = managed.lifecycle();
        life.activate();
        assert!(life.invalidate());
        assert!(!life.invalidate());
        assert!(life.state.is_terminal());
    }
}
