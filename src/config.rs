//! Pool and reconnection tunables

use std::time::Duration;

use crate::eviction::EvictionPolicy;

/// Configuration for connection pool behavior
///
/// # Examples
///
/// ```
/// use resilient_pool::PoolConfig;
/// use std::time::Duration;
///
/// let config = PoolConfig::new()
///     .with_max_connections(3)
///     .with_timeout(Duration::from_secs(2))
///     .with_idle_timeout(Duration::from_secs(300));
///
/// assert_eq!(config.max_connections, 3);
/// assert_eq!(config.timeout, Duration::from_secs(2));
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of live connections, idle and in use together
    pub max_connections: usize,

    /// Maximum wait for a connection when the pool is at capacity
    pub timeout: Duration,

    /// Close idle connections older than this on checkout
    pub max_lifetime: Option<Duration>,

    /// Close connections that sat idle longer than this on checkout
    pub idle_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            timeout: Duration::from_secs(2),
            max_lifetime: None,
            idle_timeout: None,
        }
    }
}

impl PoolConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pool capacity. Zero is clamped to one.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max.max(1);
        self
    }

    /// Set the acquisition timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = Some(lifetime);
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub(crate) fn eviction_policy(&self) -> EvictionPolicy {
        match (self.max_lifetime, self.idle_timeout) {
            (Some(ttl), Some(idle_timeout)) => EvictionPolicy::Combined { ttl, idle_timeout },
            (Some(ttl), None) => EvictionPolicy::MaxLifetime(ttl),
            (None, Some(idle)) => EvictionPolicy::IdleTimeout(idle),
            (None, None) => EvictionPolicy::None,
        }
    }
}

/// Configuration for the reconnection manager
///
/// # Examples
///
/// ```
/// use resilient_pool::{ManagerConfig, PoolConfig};
/// use std::time::Duration;
///
/// let config = ManagerConfig::new()
///     .with_pool(PoolConfig::new().with_max_connections(5))
///     .with_retry_delays(Duration::from_secs(1), Duration::from_secs(30));
///
/// assert_eq!(config.pool.max_connections, 5);
/// assert_eq!(config.max_retry_delay, Duration::from_secs(30));
/// ```
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Settings for every pool the manager builds
    pub pool: PoolConfig,

    /// Reconnect gate after the first failure; restored after every success
    pub base_retry_delay: Duration,

    /// Cap for the doubling reconnect gate
    pub max_retry_delay: Duration,

    /// Attempts made by `with_connection` before giving up
    pub max_retries: u32,

    /// Linear sleep step between `with_connection` attempts
    pub retry_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::new().with_max_connections(3),
            base_retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(10),
            max_retries: 3,
            retry_interval: Duration::from_secs(1),
        }
    }
}

impl ManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Set the base and maximum reconnect delays. The maximum is raised to
    /// the base if it is smaller.
    pub fn with_retry_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_retry_delay = base;
        self.max_retry_delay = max.max(base);
        self
    }

    /// Set the number of attempts `with_connection` makes. Zero is clamped to one.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_capacity_is_clamped() {
        let config = PoolConfig::new().with_max_connections(0);
        assert_eq!(config.max_connections, 1);
    }

    #[test]
    fn test_eviction_policy_selection() {
        let ttl = Duration::from_secs(60);
        let idle = Duration::from_secs(5);

        assert!(matches!(PoolConfig::new().eviction_policy(), EvictionPolicy::None));
        assert!(matches!(
            PoolConfig::new().with_max_lifetime(ttl).eviction_policy(),
            EvictionPolicy::MaxLifetime(_)
        ));
        assert!(matches!(
            PoolConfig::new()
                .with_max_lifetime(ttl)
                .with_idle_timeout(idle)
                .eviction_policy(),
            EvictionPolicy::Combined { .. }
        ));
    }

    #[test]
    fn test_max_delay_never_below_base() {
        let config = ManagerConfig::new()
            .with_retry_delays(Duration::from_secs(4), Duration::from_secs(1));
        assert_eq!(config.max_retry_delay, Duration::from_secs(4));
    }
}
