//! Per-host pool configuration

use std::fmt;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::errors::{PoolError, PoolResult};
use crate::policy::ExhaustionPolicy;

/// Default port of the data store's client protocol
pub const DEFAULT_PORT: u16 = 9160;
pub const DEFAULT_MAX_ACTIVE: usize = 50;
pub const DEFAULT_MIN_EVICTABLE_IDLE: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_EVICTION_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_BORROW_ATTEMPTS: usize = 3;

/// Order in which idle connections, and blocked waiters, are served
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ServingOrder {
    /// Most recently released first
    #[default]
    Lifo,

    /// Oldest released first
    Fifo,
}

/// Address of the host a pool connects to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HostAddress {
    pub host: String,
    pub port: u16,
}

impl HostAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for HostAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Immutable configuration of one host's pool
///
/// # Examples
///
/// ```
/// use hostpool::{ExhaustionPolicy, HostPoolConfig, ServingOrder};
/// use std::time::Duration;
///
/// let config = HostPoolConfig::new("10.0.0.7", 9160)
///     .with_max_active(20)
///     .with_max_idle(5)
///     .with_serving_order(ServingOrder::Fifo)
///     .with_exhaustion_policy(ExhaustionPolicy::Fail)
///     .with_max_wait(Duration::from_secs(2));
///
/// assert_eq!(config.max_active, 20);
/// assert_eq!(config.max_idle, Some(5));
/// assert_eq!(config.name, "10.0.0.7");
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HostPoolConfig {
    /// Host the pool connects to
    pub address: HostAddress,

    /// Display name, defaults to the host name
    pub name: String,

    /// Maximum number of connections borrowed at once
    pub max_active: usize,

    /// Maximum number of connections parked idle; `None` is unbounded
    pub max_idle: Option<usize>,

    /// Order idle connections and blocked borrowers are served in
    pub serving_order: ServingOrder,

    /// Idle time after which a connection may be evicted; `None` never evicts
    pub min_evictable_idle: Option<Duration>,

    /// Time between eviction sweeps; `None` or zero disables the sweep
    pub eviction_interval: Option<Duration>,

    /// Longest a blocked borrow waits; `None` waits until served
    pub max_wait: Option<Duration>,

    /// Behaviour when the host is at capacity
    pub exhaustion_policy: ExhaustionPolicy,

    /// Connections a single borrow may try before giving up
    pub max_borrow_attempts: usize,
}

impl HostPoolConfig {
    /// Create a configuration with default pool settings for a host
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let address = HostAddress::new(host, port);
        Self {
            name: address.host.clone(),
            address,
            max_active: DEFAULT_MAX_ACTIVE,
            max_idle: None,
            serving_order: ServingOrder::Lifo,
            min_evictable_idle: Some(DEFAULT_MIN_EVICTABLE_IDLE),
            eviction_interval: Some(DEFAULT_EVICTION_INTERVAL),
            max_wait: None,
            exhaustion_policy: ExhaustionPolicy::Block,
            max_borrow_attempts: DEFAULT_MAX_BORROW_ATTEMPTS,
        }
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the maximum active connections
    pub fn with_max_active(mut self, count: usize) -> Self {
        self.max_active = count;
        self
    }

    /// Set the maximum idle connections
    pub fn with_max_idle(mut self, count: usize) -> Self {
        self.max_idle = Some(count);
        self
    }

    /// Allow any number of idle connections
    pub fn with_unbounded_idle(mut self) -> Self {
        self.max_idle = None;
        self
    }

    pub fn with_serving_order(mut self, order: ServingOrder) -> Self {
        self.serving_order = order;
        self
    }

    /// Set how long a connection must sit idle before a sweep may evict it
    pub fn with_min_evictable_idle(mut self, idle: Duration) -> Self {
        self.min_evictable_idle = Some(idle);
        self
    }

    /// Set the interval between eviction sweeps
    pub fn with_eviction_interval(mut self, interval: Duration) -> Self {
        self.eviction_interval = Some(interval);
        self
    }

    /// Turn off the background eviction sweep
    pub fn without_eviction(mut self) -> Self {
        self.eviction_interval = None;
        self
    }

    /// Set the maximum wait of a blocked borrow
    pub fn with_max_wait(mut self, wait: Duration) -> Self {
        self.max_wait = Some(wait);
        self
    }

    pub fn with_exhaustion_policy(mut self, policy: ExhaustionPolicy) -> Self {
        self.exhaustion_policy = policy;
        self
    }

    /// Set how many connections one borrow may create or validate
    pub fn with_max_borrow_attempts(mut self, attempts: usize) -> Self {
        self.max_borrow_attempts = attempts;
        self
    }

    /// Sweep interval, if the sweep is enabled
    pub fn sweep_interval(&self) -> Option<Duration> {
        self.eviction_interval.filter(|interval| !interval.is_zero())
    }

    /// Check the configuration can drive a pool
    pub fn validate(&self) -> PoolResult<()> {
        if self.max_active == 0 {
            return Err(PoolError::InvalidConfiguration(
                "max_active must be at least 1".to_string(),
            ));
        }
        if self.max_borrow_attempts == 0 {
            return Err(PoolError::InvalidConfiguration(
                "max_borrow_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for HostPoolConfig {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_PORT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HostPoolConfig::default();
        assert_eq!(config.address.to_string(), "localhost:9160");
        assert_eq!(config.max_active, DEFAULT_MAX_ACTIVE);
        assert_eq!(config.max_idle, None);
        assert_eq!(config.serving_order, ServingOrder::Lifo);
        assert_eq!(config.exhaustion_policy, ExhaustionPolicy::Block);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_interval_disables_sweep() {
        let config = HostPoolConfig::default().with_eviction_interval(Duration::ZERO);
        assert_eq!(config.sweep_interval(), None);
        assert_eq!(HostPoolConfig::default().without_eviction().sweep_interval(), None);
    }

    #[test]
    fn test_rejects_zero_max_active() {
        let config = HostPoolConfig::default().with_max_active(0);
        assert!(matches!(
            config.validate(),
            Err(PoolError::InvalidConfiguration(_))
        ));
    }
}
