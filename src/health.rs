//! Health assessment for connection pools

use serde::Serialize;

use crate::metrics::PoolStats;

/// Health status of a connection pool
///
/// # Examples
///
/// ```
/// use resilient_pool::{HealthStatus, PoolStats};
///
/// let stats = PoolStats {
///     total_connections: 2,
///     available_connections: 1,
///     in_use_connections: 1,
///     max_connections: 3,
///     is_closed: false,
/// };
///
/// let health = HealthStatus::new(&stats);
/// assert!(health.is_healthy());
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Whether the pool is healthy
    pub is_healthy: bool,

    /// Number of warnings detected
    pub warning_count: usize,

    /// Share of capacity currently checked out (0.0 to 1.0)
    pub utilization: f64,

    pub available_connections: usize,

    pub in_use_connections: usize,

    pub max_connections: usize,

    /// Warning messages
    pub warnings: Vec<String>,
}

impl HealthStatus {
    /// Assess a pool from its occupancy snapshot
    pub fn new(stats: &PoolStats) -> Self {
        let utilization = if stats.max_connections > 0 {
            stats.in_use_connections as f64 / stats.max_connections as f64
        } else {
            0.0
        };

        let mut warnings = Vec::new();
        let mut is_healthy = true;

        if stats.is_closed {
            warnings.push("Pool is closed".to_string());
            is_healthy = false;
        }

        if utilization > 0.9 {
            warnings.push(format!("High utilization: {:.1}%", utilization * 100.0));
            is_healthy = false;
        }

        if stats.is_saturated() {
            warnings.push("All connections in use - callers will wait".to_string());
        }

        Self {
            is_healthy,
            warning_count: warnings.len(),
            utilization,
            available_connections: stats.available_connections,
            in_use_connections: stats.in_use_connections,
            max_connections: stats.max_connections,
            warnings,
        }
    }

    /// Check if the pool is healthy
    pub fn is_healthy(&self) -> bool {
        self.is_healthy
    }
}
