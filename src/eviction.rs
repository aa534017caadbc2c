//! Eviction policies for idle connections

use std::time::{Duration, Instant};

/// Eviction policy applied to idle connections when they are checked out
///
/// # Examples
///
/// ```
/// use resilient_pool::PoolConfig;
/// use std::time::Duration;
///
/// // Connections idle for more than five minutes are closed and replaced
/// let config = PoolConfig::new().with_idle_timeout(Duration::from_secs(300));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Connections live as long as they pass the liveness probe
    #[default]
    None,

    /// Connections expire a fixed duration after creation
    MaxLifetime(Duration),

    /// Connections expire after sitting idle
    IdleTimeout(Duration),

    /// Either limit expires the connection
    Combined {
        ttl: Duration,
        idle_timeout: Duration,
    },
}

/// Lifecycle timestamps carried alongside each connection
#[derive(Debug, Clone, Copy)]
pub(crate) struct ConnectionMetadata {
    pub created_at: Instant,
    pub last_used: Instant,
}

impl ConnectionMetadata {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            created_at: now,
            last_used: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    pub fn is_expired(&self, policy: &EvictionPolicy) -> bool {
        match policy {
            EvictionPolicy::None => false,
            EvictionPolicy::MaxLifetime(ttl) => self.created_at.elapsed() > *ttl,
            EvictionPolicy::IdleTimeout(timeout) => self.last_used.elapsed() > *timeout,
            EvictionPolicy::Combined { ttl, idle_timeout } => {
                self.created_at.elapsed() > *ttl || self.last_used.elapsed() > *idle_timeout
            }
        }
    }
}
