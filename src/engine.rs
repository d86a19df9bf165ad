//! Slot accounting, waiter handoff and the borrow/release/invalidate protocol

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::{HostPoolConfig, ServingOrder};
use crate::connection::{
    ConnectionFactory, ConnectionId, ConnectionState, ManagedConnection, PooledConnection,
};
use crate::errors::{PoolError, PoolResult};
use crate::eviction::is_evictable;
use crate::metrics::{Gauges, MetricsTracker, PoolMetrics};
use crate::policy::ExhaustedAction;
use crate::registry::LiveConnectionRegistry;

type Managed<F> = Arc<ManagedConnection<<F as ConnectionFactory>::Connection>>;

/// What a blocked borrower receives when it is woken
enum Handoff<C> {
    /// A released connection, already leased to the waiter
    Connection(Arc<ManagedConnection<C>>, u64),
    /// A freed slot, already counted as active for the waiter
    Slot,
    Closed,
}

struct Waiter<C> {
    id: u64,
    tx: Sender<Handoff<C>>,
}

/// Outcome of slot acquisition
enum Acquired<C> {
    Existing(Arc<ManagedConnection<C>>, u64),
    /// A slot was reserved; the caller must create the connection
    Create,
}

/// State guarded by the pool's single critical section
struct PoolState<C> {
    idle: VecDeque<Arc<ManagedConnection<C>>>,
    active: usize,
    waiters: VecDeque<Waiter<C>>,
    next_waiter: u64,
    closed: bool,
}

impl<C> PoolState<C> {
    fn new() -> Self {
        Self {
            idle: VecDeque::new(),
            active: 0,
            waiters: VecDeque::new(),
            next_waiter: 0,
            closed: false,
        }
    }

    /// Idle connections are always pushed at the back
    fn take_idle(&mut self, order: ServingOrder) -> Option<Arc<ManagedConnection<C>>> {
        match order {
            ServingOrder::Lifo => self.idle.pop_back(),
            ServingOrder::Fifo => self.idle.pop_front(),
        }
    }

    fn remove_idle(&mut self, id: ConnectionId) -> bool {
        let before = self.idle.len();
        self.idle.retain(|conn| conn.id() != id);
        self.idle.len() != before
    }

    fn enqueue_waiter(&mut self) -> (u64, Receiver<Handoff<C>>) {
        let (tx, rx) = channel::bounded(1);
        let id = self.next_waiter;
        self.next_waiter += 1;
        self.waiters.push_back(Waiter { id, tx });
        (id, rx)
    }

    fn next_waiter(&mut self, order: ServingOrder) -> Option<Waiter<C>> {
        match order {
            ServingOrder::Lifo => self.waiters.pop_back(),
            ServingOrder::Fifo => self.waiters.pop_front(),
        }
    }

    fn remove_waiter(&mut self, id: u64) -> bool {
        match self.waiters.iter().position(|waiter| waiter.id == id) {
            Some(pos) => self.waiters.remove(pos).is_some(),
            None => false,
        }
    }
}

/// Counts threads inside `borrow` for as long as the guard lives
struct BlockedGuard<'a>(&'a AtomicUsize);

impl<'a> BlockedGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for BlockedGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Thread-safe core of a host pool
pub(crate) struct PoolEngine<F: ConnectionFactory> {
    config: HostPoolConfig,
    factory: F,
    state: Mutex<PoolState<F::Connection>>,
    registry: LiveConnectionRegistry<F::Connection>,
    blocked: AtomicUsize,
    metrics: MetricsTracker,
}

impl<F: ConnectionFactory> PoolEngine<F> {
    pub fn new(config: HostPoolConfig, factory: F) -> Self {
        Self {
            config,
            factory,
            state: Mutex::new(PoolState::new()),
            registry: LiveConnectionRegistry::new(),
            blocked: AtomicUsize::new(0),
            metrics: MetricsTracker::new(),
        }
    }

    pub fn config(&self) -> &HostPoolConfig {
        &self.config
    }

    pub fn registry(&self) -> &LiveConnectionRegistry<F::Connection> {
        &self.registry
    }

    /// Borrow a connection, validating it before it is handed out.
    ///
    /// Stale idle connections that fail validation are destroyed without
    /// spending the attempt budget; only fresh connections are charged.
    pub fn borrow(&self) -> PoolResult<PooledConnection<F::Connection>> {
        let _blocked = BlockedGuard::enter(&self.blocked);
        let max_attempts = self.config.max_borrow_attempts;
        let mut attempts = 0;

        loop {
            let acquired = match self.acquire() {
                Ok(acquired) => acquired,
                Err(PoolError::PoolExhausted) => {
                    MetricsTracker::incr(&self.metrics.exhausted_events);
                    info!(host = %self.config.address, "Pool is exhausted {}", self.debug_string());
                    return Err(PoolError::PoolExhausted);
                }
                Err(err) => return Err(err),
            };

            let (managed, lease, fresh) = match acquired {
                Acquired::Existing(managed, lease) => (managed, lease, false),
                Acquired::Create => {
                    attempts += 1;
                    match self.create_active() {
                        Ok((managed, lease)) => (managed, lease, true),
                        Err(PoolError::PoolClosed) => return Err(PoolError::PoolClosed),
                        Err(err) if attempts >= max_attempts => return Err(err),
                        Err(err) => {
                            warn!(host = %self.config.address, attempt = attempts, error = %err, "Connection creation failed, retrying");
                            continue;
                        }
                    }
                }
            };

            if !self.factory.validate(managed.conn()) {
                MetricsTracker::incr(&self.metrics.validation_failures);
                warn!(host = %self.config.address, connection = %managed.id(), fresh, attempt = attempts, "Connection failed validation on borrow");
                self.retire(&managed, Some(lease));
                if fresh && attempts >= max_attempts {
                    return Err(PoolError::ValidationFailed { attempts });
                }
                continue;
            }

            // Torn down by a bulk invalidation while we were validating
            if !managed.lifecycle().holds(lease) {
                if !fresh {
                    attempts += 1;
                }
                if attempts >= max_attempts {
                    return Err(PoolError::ValidationFailed { attempts });
                }
                debug!(host = %self.config.address, connection = %managed.id(), attempt = attempts, "Connection invalidated during borrow, retrying");
                continue;
            }

            MetricsTracker::incr(&self.metrics.total_borrowed);
            debug!(host = %self.config.address, connection = %managed.id(), "Connection borrowed");
            return Ok(PooledConnection::new(managed, lease));
        }
    }

    /// Take an idle connection, reserve a slot, or apply the exhaustion policy
    fn acquire(&self) -> PoolResult<Acquired<F::Connection>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PoolError::PoolClosed);
        }

        if let Some(managed) = state.take_idle(self.config.serving_order) {
            let lease = managed.lifecycle().activate();
            self.registry.add(&managed);
            state.active += 1;
            return Ok(Acquired::Existing(managed, lease));
        }

        if state.active < self.config.max_active {
            state.active += 1;
            return Ok(Acquired::Create);
        }

        let max_wait = match self.config.exhaustion_policy.on_exhausted(self.config.max_wait) {
            ExhaustedAction::Fail => return Err(PoolError::PoolExhausted),
            ExhaustedAction::Grow => {
                state.active += 1;
                return Ok(Acquired::Create);
            }
            ExhaustedAction::Wait(max_wait) => max_wait,
        };

        let (waiter, rx) = state.enqueue_waiter();
        drop(state);
        debug!(host = %self.config.address, waiter, "Waiting for a connection");

        let received = match max_wait {
            Some(wait) => rx.recv_timeout(wait).ok(),
            None => rx.recv().ok(),
        };
        let handoff = match received {
            Some(handoff) => handoff,
            None => {
                // Still queued means nobody served us; otherwise the handoff
                // was sent before we took the lock and is waiting in the channel.
                if self.state.lock().remove_waiter(waiter) {
                    return Err(PoolError::PoolExhausted);
                }
                rx.try_recv().map_err(|_| PoolError::PoolExhausted)?
            }
        };

        match handoff {
            Handoff::Connection(managed, lease) => Ok(Acquired::Existing(managed, lease)),
            Handoff::Slot => Ok(Acquired::Create),
            Handoff::Closed => Err(PoolError::PoolClosed),
        }
    }

    /// Create a connection into an already reserved slot
    fn create_active(&self) -> PoolResult<(Managed<F>, u64)> {
        let conn = match self.factory.create() {
            Ok(conn) => conn,
            Err(err) => {
                self.free_slot(&mut self.state.lock());
                return Err(PoolError::factory(err));
            }
        };
        MetricsTracker::incr(&self.metrics.total_created);
        let managed = Arc::new(ManagedConnection::new(conn));

        let mut state = self.state.lock();
        if state.closed {
            state.active = state.active.saturating_sub(1);
            managed.lifecycle().invalidate();
            drop(state);
            self.destroy(&managed);
            return Err(PoolError::PoolClosed);
        }
        let lease = managed.lifecycle().activate();
        self.registry.add(&managed);
        drop(state);

        debug!(host = %self.config.address, connection = %managed.id(), "Connection created");
        Ok((managed, lease))
    }

    /// Return a borrowed connection. No-op unless `conn` holds the current lease.
    pub fn release(&self, conn: &PooledConnection<F::Connection>) {
        let managed = conn.managed();
        let mut state = self.state.lock();
        let mut life = managed.lifecycle();
        if !life.holds(conn.lease()) {
            debug!(host = %self.config.address, connection = %managed.id(), state = ?life.state, "Connection already released");
            return;
        }
        MetricsTracker::incr(&self.metrics.total_released);

        if state.closed {
            life.invalidate();
            drop(life);
            state.active = state.active.saturating_sub(1);
            drop(state);
            self.destroy(managed);
            return;
        }

        while let Some(waiter) = state.next_waiter(self.config.serving_order) {
            let lease = life.activate();
            if waiter
                .tx
                .send(Handoff::Connection(Arc::clone(managed), lease))
                .is_ok()
            {
                self.registry.add(managed);
                debug!(host = %self.config.address, connection = %managed.id(), waiter = waiter.id, "Connection handed to waiter");
                return;
            }
        }

        state.active = state.active.saturating_sub(1);
        if matches!(self.config.max_idle, Some(max_idle) if state.idle.len() >= max_idle) {
            life.invalidate();
            drop(life);
            drop(state);
            debug!(host = %self.config.address, connection = %managed.id(), "Idle collection full, destroying released connection");
            self.destroy(managed);
            return;
        }

        life.park();
        drop(life);
        state.idle.push_back(Arc::clone(managed));
        debug!(host = %self.config.address, connection = %managed.id(), "Connection released");
    }

    /// Discard a borrowed connection. No-op unless `conn` holds the current lease.
    pub fn invalidate(&self, conn: &PooledConnection<F::Connection>) -> bool {
        debug!(host = %self.config.address, connection = %conn.id(), "Invalidating connection");
        let retired = self.retire(conn.managed(), Some(conn.lease()));
        if retired {
            MetricsTracker::incr(&self.metrics.total_invalidated);
        }
        retired
    }

    /// Invalidate every connection registered before the call started.
    ///
    /// Works on snapshots until none of those connections remain, so
    /// connections created concurrently are left alone.
    pub fn invalidate_all(&self) -> usize {
        debug!(host = %self.config.address, "Invalidating all connections");
        let horizon = ConnectionId::peek_next();
        let mut count = 0;

        loop {
            let pending: Vec<_> = self
                .registry
                .snapshot()
                .into_iter()
                .filter(|managed| managed.id() < horizon)
                .collect();
            if pending.is_empty() {
                break;
            }
            for managed in pending {
                if self.retire(&managed, None) {
                    MetricsTracker::incr(&self.metrics.total_invalidated);
                    count += 1;
                }
            }
        }
        count
    }

    /// Move a connection to `Invalid`, fix the accounting, and destroy it.
    ///
    /// With `lease` set, only the holder of that lease may retire an active
    /// connection. Returns `false` when there was nothing to do.
    fn retire(&self, managed: &Managed<F>, lease: Option<u64>) -> bool {
        let mut state = self.state.lock();
        let mut life = managed.lifecycle();

        if let Some(lease) = lease
            && !life.holds(lease)
        {
            return false;
        }

        match life.state {
            ConnectionState::Invalid | ConnectionState::Destroyed => {
                drop(life);
                drop(state);
                self.registry.remove(managed.id());
                return false;
            }
            ConnectionState::Active => {
                life.invalidate();
                drop(life);
                self.free_slot(&mut state);
            }
            ConnectionState::Idle => {
                life.invalidate();
                drop(life);
                state.remove_idle(managed.id());
            }
            ConnectionState::Created => {
                life.invalidate();
                drop(life);
            }
        }
        drop(state);

        self.destroy(managed);
        true
    }

    /// Give up an active slot, passing it to a blocked borrower if one waits
    fn free_slot(&self, state: &mut PoolState<F::Connection>) {
        state.active = state.active.saturating_sub(1);
        if state.closed || state.active >= self.config.max_active {
            return;
        }
        while let Some(waiter) = state.next_waiter(self.config.serving_order) {
            if waiter.tx.send(Handoff::Slot).is_ok() {
                state.active += 1;
                debug!(host = %self.config.address, waiter = waiter.id, "Freed slot handed to waiter");
                return;
            }
        }
    }

    /// Unregister and destroy an invalidated connection. Destroy errors are logged.
    fn destroy(&self, managed: &Managed<F>) {
        self.registry.remove(managed.id());
        if let Err(err) = self.factory.destroy(managed.conn()) {
            warn!(host = %self.config.address, connection = %managed.id(), error = %err, "Unable to destroy connection");
        }
        managed.lifecycle().state = ConnectionState::Destroyed;
        MetricsTracker::incr(&self.metrics.total_destroyed);
        debug!(host = %self.config.address, connection = %managed.id(), "Connection destroyed");
    }

    /// Evict idle connections that have been idle longer than allowed
    pub fn evict_idle(&self) -> usize {
        let Some(min_idle) = self.config.min_evictable_idle else {
            return 0;
        };

        let mut evicted = Vec::new();
        {
            let mut state = self.state.lock();
            state.idle.retain(|managed| {
                let mut life = managed.lifecycle();
                if is_evictable(life.last_active, min_idle) {
                    life.invalidate();
                    evicted.push(Arc::clone(managed));
                    false
                } else {
                    true
                }
            });
        }

        for managed in &evicted {
            self.destroy(managed);
            MetricsTracker::incr(&self.metrics.total_evicted);
        }
        if !evicted.is_empty() {
            debug!(host = %self.config.address, evicted = evicted.len(), "Evicted idle connections");
        }
        evicted.len()
    }

    /// Refuse new borrows, fail blocked ones, and destroy idle connections
    pub fn close(&self) {
        let (idle, waiters) = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let idle: Vec<_> = state
                .idle
                .drain(..)
                .filter(|managed| managed.lifecycle().invalidate())
                .collect();
            let waiters: Vec<_> = state.waiters.drain(..).collect();
            (idle, waiters)
        };

        for waiter in waiters {
            let _ = waiter.tx.send(Handoff::Closed);
        }
        for managed in &idle {
            self.destroy(managed);
        }
        info!(host = %self.config.address, destroyed = idle.len(), "Pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn idle_count(&self) -> usize {
        self.state.lock().idle.len()
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().active
    }

    pub fn blocked_count(&self) -> usize {
        self.blocked.load(Ordering::SeqCst)
    }

    pub fn metrics(&self) -> PoolMetrics {
        let (active, idle) = {
            let state = self.state.lock();
            (state.active, state.idle.len())
        };
        self.metrics.get_metrics(Gauges {
            active,
            idle,
            blocked: self.blocked_count(),
            live: self.registry.size(),
            max_active: self.config.max_active,
        })
    }

    /// One-line summary of configuration and current state
    pub fn debug_string(&self) -> String {
        let (active, idle) = {
            let state = self.state.lock();
            (state.active, state.idle.len())
        };
        let max_idle = self
            .config
            .max_idle
            .map_or_else(|| "unbounded".to_string(), |max| max.to_string());
        format!(
            "{}&maxActive={}&maxIdle={}&servingOrder={:?}&minEvictableIdle={:?}&evictionInterval={:?}&blockedThreads={}&liveConnections={}&numActive={}&numIdle={}",
            self,
            self.config.max_active,
            max_idle,
            self.config.serving_order,
            self.config.min_evictable_idle,
            self.config.sweep_interval(),
            self.blocked_count(),
            self.registry.size(),
            active,
            idle,
        )
    }
}

impl<F: ConnectionFactory> fmt::Display for PoolEngine<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostPool<{}>", self.config.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::errors::BoxError;
    use crate::policy::ExhaustionPolicy;
    use std::sync::atomic::AtomicBool;
    use std::sync::{OnceLock, Weak};
    use std::thread;
    use std::time::{Duration, Instant};

    struct Conn;
    impl Connection for Conn {}

    #[derive(Default)]
    struct Factory {
        destroyed: AtomicUsize,
        reject: AtomicBool,
    }

    impl ConnectionFactory for Factory {
        type Connection = Conn;

        fn create(&self) -> Result<Conn, BoxError> {
            Ok(Conn)
        }

        fn validate(&self, _conn: &Conn) -> bool {
            !self.reject.load(Ordering::SeqCst)
        }

        fn destroy(&self, _conn: &Conn) -> Result<(), BoxError> {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn engine(config: HostPoolConfig) -> PoolEngine<Factory> {
        PoolEngine::new(config.without_eviction(), Factory::default())
    }

    #[test]
    fn test_borrow_registers_connection() {
        let engine = engine(HostPoolConfig::default());
        let conn = engine.borrow().unwrap();

        assert_eq!(conn.state(), ConnectionState::Active);
        assert!(engine.registry().contains(conn.id()));
        assert_eq!(engine.active_count(), 1);
        assert_eq!(engine.blocked_count(), 0);
    }

    #[test]
    fn test_stale_handle_cannot_release_new_lease() {
        let engine = engine(HostPoolConfig::default().with_max_active(1));
        let first = engine.borrow().unwrap();
        engine.release(&first);

        let second = engine.borrow().unwrap();
        assert_eq!(first.id(), second.id());

        engine.release(&first);
        assert_eq!(engine.active_count(), 1);
        assert!(second.is_leased());
    }

    #[test]
    fn test_validation_budget_surfaces_failure() {
        let engine = engine(
            HostPoolConfig::default()
                .with_max_borrow_attempts(2)
                .with_exhaustion_policy(ExhaustionPolicy::Fail),
        );
        engine.factory.reject.store(true, Ordering::SeqCst);

        let err = engine.borrow().unwrap_err();
        assert!(matches!(err, PoolError::ValidationFailed { attempts: 2 }));
        assert_eq!(engine.active_count(), 0);
        assert_eq!(engine.factory.destroyed.load(Ordering::SeqCst), 2);
        assert!(engine.registry().is_empty());
    }

    #[test]
    fn test_timed_out_waiter_leaves_no_reservation() {
        let engine = engine(
            HostPoolConfig::default()
                .with_max_active(1)
                .with_max_wait(Duration::from_millis(20)),
        );
        let conn = engine.borrow().unwrap();
        assert!(matches!(engine.borrow(), Err(PoolError::PoolExhausted)));
        assert!(engine.state.lock().waiters.is_empty());

        engine.release(&conn);
        assert_eq!(engine.idle_count(), 1);
        assert_eq!(engine.active_count(), 0);
    }

    /// Factory that runs a bulk invalidation from inside every validation
    #[derive(Default)]
    struct TearingFactory {
        engine: OnceLock<Weak<PoolEngine<TearingFactory>>>,
        destroyed: AtomicUsize,
    }

    impl ConnectionFactory for TearingFactory {
        type Connection = Conn;

        fn create(&self) -> Result<Conn, BoxError> {
            Ok(Conn)
        }

        fn validate(&self, _conn: &Conn) -> bool {
            if let Some(engine) = self.engine.get().and_then(Weak::upgrade) {
                engine.invalidate_all();
            }
            true
        }

        fn destroy(&self, _conn: &Conn) -> Result<(), BoxError> {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_teardown_during_validation_respects_budget() {
        let engine = Arc::new(PoolEngine::new(
            HostPoolConfig::default()
                .without_eviction()
                .with_max_borrow_attempts(3),
            TearingFactory::default(),
        ));
        let _ = engine.factory.engine.set(Arc::downgrade(&engine));

        let err = engine.borrow().unwrap_err();
        assert!(matches!(err, PoolError::ValidationFailed { attempts: 3 }));
        assert_eq!(engine.factory.destroyed.load(Ordering::SeqCst), 3);
        assert_eq!(engine.active_count(), 0);
        assert!(engine.registry().is_empty());
    }

    #[test]
    fn test_handoff_registers_connection_again() {
        let engine = Arc::new(engine(HostPoolConfig::default().with_max_active(1)));
        let held = engine.borrow().unwrap();
        let id = held.id();

        let waiter = {
            let engine = Arc::clone(&engine);
            thread::spawn(move || engine.borrow().map(|conn| conn.id()))
        };
        let deadline = Instant::now() + Duration::from_secs(2);
        while engine.state.lock().waiters.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        // Dropped from the registry, as a topology refresh does for closed connections
        assert!(engine.registry().remove(id));
        engine.release(&held);

        assert_eq!(waiter.join().unwrap().unwrap(), id);
        assert!(engine.registry().contains(id));
        assert_eq!(engine.active_count(), 1);
    }

    #[test]
    fn test_debug_string_mentions_counts() {
        let engine = engine(HostPoolConfig::new("db1", 9160));
        let _conn = engine.borrow().unwrap();
        let summary = engine.debug_string();
        assert!(summary.starts_with("HostPool<db1:9160>"));
        assert!(summary.contains("numActive=1"));
        assert!(summary.contains("maxIdle=unbounded"));
    }
}
