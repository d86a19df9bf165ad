//! Metrics collection and export for host pools

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Point-in-time metrics of a host pool
///
/// # Examples
///
/// ```
/// use hostpool::{BoxError, Connection, ConnectionFactory, HostPool, HostPoolConfig};
///
/// struct Noop;
/// impl Connection for Noop {}
///
/// struct NoopFactory;
/// impl ConnectionFactory for NoopFactory {
///     type Connection = Noop;
///     fn create(&self) -> Result<Noop, BoxError> { Ok(Noop) }
///     fn destroy(&self, _: &Noop) -> Result<(), BoxError> { Ok(()) }
/// }
///
/// let pool = HostPool::new(HostPoolConfig::default().without_eviction(), NoopFactory).unwrap();
/// let conn = pool.borrow().unwrap();
///
/// let metrics = pool.metrics();
/// assert_eq!(metrics.total_borrowed, 1);
/// assert_eq!(metrics.active_connections, 1);
/// pool.release(&conn);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PoolMetrics {
    /// Connections created by the factory
    pub total_created: usize,

    /// Connections destroyed by the factory
    pub total_destroyed: usize,

    /// Successful borrows
    pub total_borrowed: usize,

    /// Releases that returned a connection to the pool
    pub total_released: usize,

    /// Connections invalidated by callers or bulk teardown
    pub total_invalidated: usize,

    /// Connections removed by the idle sweep
    pub total_evicted: usize,

    /// Borrows that failed with `PoolExhausted`
    pub exhausted_events: usize,

    /// Connections that failed validation on borrow
    pub validation_failures: usize,

    /// Currently borrowed connections
    pub active_connections: usize,

    /// Currently idle connections
    pub idle_connections: usize,

    /// Threads inside `borrow`
    pub blocked_threads: usize,

    /// Connections in the live registry
    pub live_connections: usize,

    /// Configured maximum active connections
    pub max_active: usize,

    /// Active share of `max_active` (may exceed 1.0 under the grow policy)
    pub utilization: f64,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("total_created".to_string(), self.total_created.to_string());
        metrics.insert("total_destroyed".to_string(), self.total_destroyed.to_string());
        metrics.insert("total_borrowed".to_string(), self.total_borrowed.to_string());
        metrics.insert("total_released".to_string(), self.total_released.to_string());
        metrics.insert("total_invalidated".to_string(), self.total_invalidated.to_string());
        metrics.insert("total_evicted".to_string(), self.total_evicted.to_string());
        metrics.insert("exhausted_events".to_string(), self.exhausted_events.to_string());
        metrics.insert("validation_failures".to_string(), self.validation_failures.to_string());
        metrics.insert("active_connections".to_string(), self.active_connections.to_string());
        metrics.insert("idle_connections".to_string(), self.idle_connections.to_string());
        metrics.insert("blocked_threads".to_string(), self.blocked_threads.to_string());
        metrics.insert("live_connections".to_string(), self.live_connections.to_string());
        metrics.insert("max_active".to_string(), self.max_active.to_string());
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics
    }
}

/// Metrics exporter for Prometheus format
pub struct MetricsExporter;

impl MetricsExporter {
    /// Export metrics in Prometheus exposition format, labelled with the
    /// pool name, its host, and any extra tags.
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        host: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        let mut output = String::new();
        let labels = Self::format_labels(pool_name, host, tags);

        let gauges = [
            ("hostpool_connections_active", "Currently borrowed connections", metrics.active_connections),
            ("hostpool_connections_idle", "Currently idle connections", metrics.idle_connections),
            ("hostpool_connections_live", "Connections owned by the pool", metrics.live_connections),
            ("hostpool_threads_blocked", "Threads waiting in borrow", metrics.blocked_threads),
        ];
        for (name, help, value) in gauges {
            Self::write_metric(&mut output, name, help, "gauge", &labels, &value.to_string());
        }

        Self::write_metric(
            &mut output,
            "hostpool_utilization",
            "Active connections relative to max_active",
            "gauge",
            &labels,
            &format!("{:.2}", metrics.utilization),
        );

        let counters = [
            ("hostpool_connections_created_total", "Connections created", metrics.total_created),
            ("hostpool_connections_destroyed_total", "Connections destroyed", metrics.total_destroyed),
            ("hostpool_borrows_total", "Successful borrows", metrics.total_borrowed),
            ("hostpool_releases_total", "Connections released", metrics.total_released),
            ("hostpool_invalidations_total", "Connections invalidated", metrics.total_invalidated),
            ("hostpool_evictions_total", "Idle connections evicted", metrics.total_evicted),
            ("hostpool_exhausted_total", "Borrows failed on exhaustion", metrics.exhausted_events),
            ("hostpool_validation_failures_total", "Validation failures on borrow", metrics.validation_failures),
        ];
        for (name, help, value) in counters {
            Self::write_metric(&mut output, name, help, "counter", &labels, &value.to_string());
        }

        output
    }

    fn write_metric(output: &mut String, name: &str, help: &str, kind: &str, labels: &str, value: &str) {
        output.push_str(&format!("# HELP {} {}\n", name, help));
        output.push_str(&format!("# TYPE {} {}\n", name, kind));
        output.push_str(&format!("{}{{{}}} {}\n", name, labels, value));
    }

    fn format_labels(pool_name: &str, host: &str, tags: Option<&HashMap<String, String>>) -> String {
        let mut labels = vec![
            format!("pool=\"{}\"", pool_name),
            format!("host=\"{}\"", host),
        ];

        if let Some(tags) = tags {
            let mut tags: Vec<_> = tags.iter().collect();
            tags.sort();
            for (key, value) in tags {
                labels.push(format!("{}=\"{}\"", key, value));
            }
        }

        labels.join(",")
    }
}

/// Internal counters, bumped outside the pool's critical section
#[derive(Default)]
pub(crate) struct MetricsTracker {
    pub total_created: AtomicUsize,
    pub total_destroyed: AtomicUsize,
    pub total_borrowed: AtomicUsize,
    pub total_released: AtomicUsize,
    pub total_invalidated: AtomicUsize,
    pub total_evicted: AtomicUsize,
    pub exhausted_events: AtomicUsize,
    pub validation_failures: AtomicUsize,
}

/// Gauges read from the pool state when a snapshot is taken
pub(crate) struct Gauges {
    pub active: usize,
    pub idle: usize,
    pub blocked: usize,
    pub live: usize,
    pub max_active: usize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics(&self, gauges: Gauges) -> PoolMetrics {
        let utilization = if gauges.max_active > 0 {
            gauges.active as f64 / gauges.max_active as f64
        } else {
            0.0
        };

        PoolMetrics {
            total_created: self.total_created.load(Ordering::Relaxed),
            total_destroyed: self.total_destroyed.load(Ordering::Relaxed),
            total_borrowed: self.total_borrowed.load(Ordering::Relaxed),
            total_released: self.total_released.load(Ordering::Relaxed),
            total_invalidated: self.total_invalidated.load(Ordering::Relaxed),
            total_evicted: self.total_evicted.load(Ordering::Relaxed),
            exhausted_events: self.exhausted_events.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            active_connections: gauges.active,
            idle_connections: gauges.idle,
            blocked_threads: gauges.blocked,
            live_connections: gauges.live,
            max_active: gauges.max_active,
            utilization,
        }
    }
}
